//! OciNodeClass Custom Resource Definition
//!
//! Describes the desired compute configuration for nodes launched on OCI.
//! The status carries the resolved subnets, images and security groups the
//! provisioning and drift code read.

use crate::error::{ProviderError, Result};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OciNodeClass is the Schema for the ocinodeclasses API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "karpenter.k8s.oracle",
    version = "v1alpha1",
    kind = "OciNodeClass",
    status = "OciNodeClassStatus",
    shortname = "ocinc",
    printcolumn = r#"{"name":"ImageFamily","type":"string","jsonPath":".spec.imageFamily"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OciNodeClassSpec {
    /// Bootstrap flavour of the node image
    #[serde(default)]
    pub image_family: ImageFamily,

    /// Terms selecting candidate images
    #[serde(default)]
    pub image_selector: Vec<SelectorTerm>,

    /// Terms selecting candidate subnets
    #[serde(default)]
    pub subnet_selector: Vec<SelectorTerm>,

    /// Terms selecting network security groups
    #[serde(default)]
    pub security_group_selector: Vec<SelectorTerm>,

    /// Boot volume configuration; required to launch or size nodes
    #[serde(default)]
    pub boot_config: Option<BootConfig>,

    /// Additional block volumes attached at launch
    #[serde(default)]
    pub block_devices: Vec<BlockDevice>,

    /// Kubelet overrides
    #[serde(default)]
    pub kubelet: Option<KubeletConfiguration>,

    /// Custom userdata; replaces the script for the Custom family, appended otherwise
    #[serde(default)]
    pub user_data: Option<String>,

    /// Defined tags applied inside the operator's tag namespace
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Freeform tags applied as-is
    #[serde(default)]
    pub freeform_tags: BTreeMap<String, String>,

    /// SSH public keys installed on the node
    #[serde(default)]
    pub ssh_authorized_keys: Vec<String>,
}

/// Image family, selects the bootstrap strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ImageFamily {
    /// Oracle Linux OKE worker images
    #[default]
    #[serde(rename = "OKE")]
    Oke,
    /// Ubuntu images with kubeadm-style bootstrap
    Ubuntu,
    /// User-supplied userdata, passed through
    Custom,
}

/// Selector term; any set field must match
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectorTerm {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub compartment_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Boot volume configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootConfig {
    /// Boot volume size in GiB
    pub boot_volume_size_in_gbs: i64,

    /// Volume performance units per GiB
    #[serde(default = "default_vpus_per_gb")]
    pub boot_volume_vpus_per_gb: i64,
}

/// Extra block volume
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockDevice {
    pub size_in_gbs: i64,
    #[serde(default = "default_vpus_per_gb")]
    pub vpus_per_gb: i64,
}

/// Subset of the kubelet configuration that shapes capacity and overhead
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeletConfiguration {
    #[serde(default)]
    pub max_pods: Option<i32>,

    #[serde(default)]
    pub pods_per_core: Option<i32>,

    /// Resource name to quantity
    #[serde(default)]
    pub system_reserved: BTreeMap<String, String>,

    /// Resource name to quantity
    #[serde(default)]
    pub kube_reserved: BTreeMap<String, String>,

    /// Eviction signal to threshold, e.g. `memory.available: 5%`
    #[serde(default)]
    pub eviction_hard: BTreeMap<String, String>,

    #[serde(default)]
    pub cluster_dns: Vec<String>,
}

/// Resolved state produced by the node class status reconciler
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OciNodeClassStatus {
    #[serde(default)]
    pub subnets: Vec<ResolvedSubnet>,

    #[serde(default)]
    pub images: Vec<ResolvedImage>,

    #[serde(default)]
    pub security_groups: Vec<ResolvedSecurityGroup>,

    #[serde(default)]
    pub conditions: Vec<NodeClassCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSubnet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Set for AD-specific subnets, unset for regional ones
    #[serde(default)]
    pub availability_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedImage {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Shapes the image can boot; empty means any
    #[serde(default)]
    pub compatible_shapes: Vec<String>,
}

impl ResolvedImage {
    pub fn supports(&self, shape: &str) -> bool {
        self.compatible_shapes.is_empty() || self.compatible_shapes.iter().any(|s| s == shape)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSecurityGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Node class condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeClassCondition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl OciNodeClass {
    /// Resolved status, or an empty one for a class not reconciled yet.
    pub fn resolved(&self) -> OciNodeClassStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn kubelet(&self) -> KubeletConfiguration {
        self.spec.kubelet.clone().unwrap_or_default()
    }

    /// Boot config; missing or non-positive sizes are configuration errors.
    pub fn boot_config(&self) -> Result<&BootConfig> {
        let boot = self.spec.boot_config.as_ref().ok_or_else(|| {
            ProviderError::Configuration(format!(
                "node class {} has no bootConfig",
                self.name_any()
            ))
        })?;
        if boot.boot_volume_size_in_gbs <= 0 {
            return Err(ProviderError::Configuration(format!(
                "node class {} boot volume size must be positive, got {}",
                self.name_any(),
                boot.boot_volume_size_in_gbs
            )));
        }
        Ok(boot)
    }
}

fn default_vpus_per_gb() -> i64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodeclass_defaults() {
        let json = r#"{
            "apiVersion": "karpenter.k8s.oracle/v1alpha1",
            "kind": "OciNodeClass",
            "metadata": {"name": "default"},
            "spec": {}
        }"#;
        let nc: OciNodeClass = serde_json::from_str(json).unwrap();
        assert_eq!(nc.spec.image_family, ImageFamily::Oke);
        assert!(nc.resolved().subnets.is_empty());
    }

    fn with_boot(boot: serde_json::Value) -> OciNodeClass {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "karpenter.k8s.oracle/v1alpha1",
            "kind": "OciNodeClass",
            "metadata": {"name": "default"},
            "spec": {"bootConfig": boot}
        }))
        .unwrap()
    }

    #[test]
    fn test_boot_config() {
        let nc = with_boot(serde_json::json!({"bootVolumeSizeInGbs": 100}));
        let boot = nc.boot_config().unwrap();
        assert_eq!(boot.boot_volume_size_in_gbs, 100);
        assert_eq!(boot.boot_volume_vpus_per_gb, 10);
    }

    #[test]
    fn test_missing_boot_config_is_rejected() {
        let nc = OciNodeClass::new("default", serde_json::from_str::<OciNodeClassSpec>("{}").unwrap());
        assert!(matches!(nc.boot_config(), Err(ProviderError::Configuration(_))));
    }

    #[test]
    fn test_non_positive_boot_volume_is_rejected() {
        for size in [0, -50] {
            let nc = with_boot(serde_json::json!({"bootVolumeSizeInGbs": size}));
            assert!(matches!(nc.boot_config(), Err(ProviderError::Configuration(_))));
        }
    }

    #[test]
    fn test_nodeclass_status_parsing() {
        let json = r#"{
            "subnets": [{"id": "ocid1.subnet.a", "availabilityDomain": "AD-1"}],
            "images": [{"id": "img-1", "name": "oke-1.31", "compatibleShapes": ["VM.Standard.E4.Flex"]}],
            "securityGroups": [{"id": "nsg-1"}]
        }"#;
        let status: OciNodeClassStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.subnets[0].availability_domain.as_deref(), Some("AD-1"));
        assert!(status.images[0].supports("VM.Standard.E4.Flex"));
        assert!(!status.images[0].supports("VM.Standard.A1.Flex"));
        assert_eq!(status.security_groups[0].id, "nsg-1");
    }

    #[test]
    fn test_image_family_parsing() {
        let family: ImageFamily = serde_json::from_str(r#""OKE""#).unwrap();
        assert_eq!(family, ImageFamily::Oke);
        let family: ImageFamily = serde_json::from_str(r#""Custom""#).unwrap();
        assert_eq!(family, ImageFamily::Custom);
    }
}
