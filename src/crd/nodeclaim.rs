//! NodeClaim (karpenter.sh/v1)
//!
//! Only the fields the provider reads or fills in; the full type is owned by
//! Karpenter core.

use crate::resources::{self, ResourceList};
use crate::scheduling::{Operator, Requirement, Requirements};
use k8s_openapi::api::core::v1::Taint;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// NodeClaim requests a single node from the cloud provider
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "karpenter.sh",
    version = "v1",
    kind = "NodeClaim",
    status = "NodeClaimStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimSpec {
    #[serde(default)]
    pub requirements: Vec<NodeSelectorRequirementWithMinValues>,

    #[serde(default)]
    pub resources: NodeClaimResources,

    #[serde(default)]
    pub taints: Vec<Taint>,

    #[serde(default)]
    pub startup_taints: Vec<Taint>,

    pub node_class_ref: NodeClassReference,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorRequirementWithMinValues {
    pub key: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub min_values: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimResources {
    #[serde(default)]
    pub requests: ResourceList,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeClassReference {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeClaimStatus {
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub capacity: ResourceList,
    #[serde(default)]
    pub allocatable: ResourceList,
}

impl NodeClaim {
    pub fn requirements(&self) -> Requirements {
        let mut out = Requirements::new();
        for r in &self.spec.requirements {
            if let Some(op) = Operator::parse(&r.operator) {
                out.add(Requirement::new(&r.key, op, r.values.clone()));
            }
        }
        out
    }

    /// Pod addresses the node needs on its subnet: the requested pod count,
    /// at least one.
    pub fn min_pod_count(&self) -> u64 {
        self.spec
            .resources
            .requests
            .get(resources::PODS)
            .and_then(|q| resources::parse_quantity(&q.0).ok())
            .map(|n| n.max(1.0) as u64)
            .unwrap_or(1)
    }
}
