//! Instance lifecycle: selection, launch, lookup and termination

use crate::crd::{NodeClaim, OciNodeClass, ResolvedSubnet};
use crate::error::{ProviderError, Result};
use crate::oci::models::{
    CreateVnicDetails, Instance, InstanceSourceViaImageDetails, LaunchAttachVolumeDetails,
    LaunchCreateVolumeDetails, LaunchInstanceDetails, LaunchInstanceShapeConfigDetails,
    PreemptibleInstanceConfig,
};
use crate::oci::{collect_pages, ComputeApi};
use crate::options::Options;
use crate::providers::subnet::SubnetProvider;
use crate::providers::tags::TagBag;
use crate::providers::unavailable::UnavailableOfferings;
use crate::providers::userdata::{self, BootstrapOptions};
use crate::scheduling::{
    InstanceType, Offering, Requirements, CAPACITY_TYPE_ON_DEMAND, CAPACITY_TYPE_PREEMPTIBLE,
    LABEL_CAPACITY_TYPE, LABEL_INSTANCE_FLEXIBLE, LABEL_INSTANCE_MEMORY, LABEL_INSTANCE_OCPU,
    LABEL_NODEPOOL, LABEL_SHAPE_NAME, LABEL_ZONE,
};
use kube::ResourceExt;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Freeform tag marking instances this provider launched.
pub const TAG_MANAGED_BY: &str = "karpenter.sh/managed-by";
pub const TAG_NODECLAIM: &str = "karpenter.sh/nodeclaim";
pub const TAG_NODEPOOL: &str = "karpenter.sh/nodepool";

pub struct InstanceProvider {
    compute: Arc<dyn ComputeApi>,
    subnets: SubnetProvider,
    unavailable: Arc<UnavailableOfferings>,
    compartment_id: String,
    tag_namespace: String,
    cluster_name: String,
    cluster_endpoint: String,
    cluster_ca_bundle: String,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

/// Offering chosen for a launch
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub zone: String,
    pub capacity_type: &'static str,
}

/// A submitted launch and what it was chosen from.
#[derive(Debug, Clone)]
pub struct Launched {
    pub instance: Instance,
    pub instance_type: InstanceType,
    pub placement: Placement,
}

fn label(instance_type: &InstanceType, key: &str) -> Option<String> {
    instance_type.requirements.get(key).and_then(|r| r.any())
}

/// Instance types compatible with the claim, cheapest first.
pub fn order_by_price<'a>(claim: &Requirements, instance_types: &'a [InstanceType]) -> Vec<&'a InstanceType> {
    let mut compatible: Vec<&InstanceType> = instance_types
        .iter()
        .filter(|it| it.requirements.compatible(claim))
        .collect();
    compatible.sort_by(|a, b| a.cheapest_price(claim).total_cmp(&b.cheapest_price(claim)));
    compatible
}

impl InstanceProvider {
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        subnets: SubnetProvider,
        unavailable: Arc<UnavailableOfferings>,
        options: &Options,
    ) -> Self {
        Self::with_rng(compute, subnets, unavailable, options, Box::new(StdRng::from_entropy()))
    }

    pub fn with_rng(
        compute: Arc<dyn ComputeApi>,
        subnets: SubnetProvider,
        unavailable: Arc<UnavailableOfferings>,
        options: &Options,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            compute,
            subnets,
            unavailable,
            compartment_id: options.compartment_id.clone(),
            tag_namespace: options.tag_namespace.clone(),
            cluster_name: options.cluster_name.clone(),
            cluster_endpoint: options.cluster_endpoint.clone(),
            cluster_ca_bundle: options.cluster_ca_bundle.clone(),
            rng: Mutex::new(rng),
        }
    }

    /// Launch the cheapest compatible instance type for `node_claim`.
    pub async fn create(
        &self,
        node_class: &OciNodeClass,
        node_claim: &NodeClaim,
        instance_types: &[InstanceType],
    ) -> Result<Launched> {
        node_class.boot_config()?;
        let status = node_class.resolved();
        let (subnet, free) = self.subnets.least_utilized(&status.subnets).await?;
        let needed = node_claim.min_pod_count();
        if needed > free {
            return Err(ProviderError::InsufficientCapacity(format!(
                "subnet {} has {} free addresses, node claim needs {}",
                subnet.id, free, needed
            )));
        }

        let claim = node_claim.requirements();
        let instance_type = order_by_price(&claim, instance_types)
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::InsufficientCapacity(
                    "no instance type satisfies the node claim requirements".to_string(),
                )
            })?;
        let placement = self.select_offering(&claim, instance_type, &subnet)?;
        let details = self.launch_details(node_class, node_claim, instance_type, &subnet, &placement)?;

        info!(
            nodeclaim = %node_claim.name_any(),
            instance_type = %instance_type.name,
            zone = %placement.zone,
            capacity_type = placement.capacity_type,
            subnet = %subnet.id,
            "Launching instance"
        );
        match self.compute.launch_instance(&details).await {
            Ok(instance) => {
                info!(instance = %instance.id, nodeclaim = %node_claim.name_any(), "Launched instance");
                Ok(Launched {
                    instance,
                    instance_type: instance_type.clone(),
                    placement,
                })
            }
            Err(err) if err.is_insufficient_capacity() => {
                warn!(
                    instance_type = %instance_type.name,
                    zone = %placement.zone,
                    error = %err,
                    "Insufficient capacity"
                );
                self.unavailable.mark_unavailable_for_launch_error(
                    &err,
                    placement.capacity_type,
                    &instance_type.name,
                    &placement.zone,
                );
                Err(ProviderError::InsufficientCapacity(format!(
                    "launching {} in {}: {}",
                    instance_type.name, placement.zone, err
                )))
            }
            Err(err) => Err(err),
        }
    }

    /// Pick capacity type and zone among the offerings still launchable.
    pub fn select_offering(
        &self,
        claim: &Requirements,
        instance_type: &InstanceType,
        subnet: &ResolvedSubnet,
    ) -> Result<Placement> {
        let mut offerings: Vec<&Offering> = instance_type
            .offerings
            .iter()
            .filter(|o| o.available && o.compatible(claim))
            .filter(|o| {
                subnet
                    .availability_domain
                    .as_ref()
                    .map_or(true, |ad| *ad == o.zone)
            })
            .collect();
        if offerings.is_empty() {
            return Err(ProviderError::InsufficientCapacity(format!(
                "no available offerings for {} match the node claim",
                instance_type.name
            )));
        }

        let capacity_type = if claim.allows(LABEL_CAPACITY_TYPE, CAPACITY_TYPE_PREEMPTIBLE)
            && offerings
                .iter()
                .any(|o| o.capacity_type == CAPACITY_TYPE_PREEMPTIBLE)
        {
            CAPACITY_TYPE_PREEMPTIBLE
        } else {
            CAPACITY_TYPE_ON_DEMAND
        };
        offerings.retain(|o| o.capacity_type == capacity_type);
        offerings.shuffle(&mut *self.rng.lock());

        let zone = offerings
            .first()
            .map(|o| o.zone.clone())
            .ok_or_else(|| {
                ProviderError::InsufficientCapacity(format!(
                    "no {} offerings for {}",
                    capacity_type, instance_type.name
                ))
            })?;
        Ok(Placement {
            zone,
            capacity_type,
        })
    }

    fn shape_config(instance_type: &InstanceType) -> Result<Option<LaunchInstanceShapeConfigDetails>> {
        if label(instance_type, LABEL_INSTANCE_FLEXIBLE).as_deref() != Some("true") {
            return Ok(None);
        }
        let parse = |key: &str| {
            label(instance_type, key)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| {
                    ProviderError::Configuration(format!(
                        "flexible instance type {} has no {} label",
                        instance_type.name, key
                    ))
                })
        };
        Ok(Some(LaunchInstanceShapeConfigDetails {
            ocpus: parse(LABEL_INSTANCE_OCPU)?,
            memory_in_gbs: parse(LABEL_INSTANCE_MEMORY)? / 1024.0,
        }))
    }

    fn launch_details(
        &self,
        node_class: &OciNodeClass,
        node_claim: &NodeClaim,
        instance_type: &InstanceType,
        subnet: &ResolvedSubnet,
        placement: &Placement,
    ) -> Result<LaunchInstanceDetails> {
        let spec = &node_class.spec;
        let boot = node_class.boot_config()?;
        let status = node_class.resolved();
        let name = node_claim.name_any();
        let shape = label(instance_type, LABEL_SHAPE_NAME).unwrap_or_else(|| instance_type.name.clone());

        let image = status
            .images
            .iter()
            .find(|image| image.supports(&shape))
            .ok_or_else(|| {
                ProviderError::Configuration(format!(
                    "node class {} has no image compatible with {}",
                    node_class.name_any(),
                    shape
                ))
            })?;

        let claim_labels = node_claim.requirements().labels();
        let nodepool = node_claim
            .labels()
            .get(LABEL_NODEPOOL)
            .or_else(|| claim_labels.get(LABEL_NODEPOOL))
            .cloned();

        let mut labels: BTreeMap<String, String> = claim_labels;
        labels.extend(instance_type.requirements.labels());
        labels.insert(LABEL_ZONE.to_string(), placement.zone.clone());
        labels.insert(LABEL_CAPACITY_TYPE.to_string(), placement.capacity_type.to_string());

        let bootstrap = BootstrapOptions {
            cluster_name: self.cluster_name.clone(),
            cluster_endpoint: self.cluster_endpoint.clone(),
            cluster_ca_bundle: self.cluster_ca_bundle.clone(),
            kubelet: node_class.kubelet(),
            labels,
            taints: node_claim
                .spec
                .taints
                .iter()
                .chain(node_claim.spec.startup_taints.iter())
                .cloned()
                .collect(),
            custom_user_data: spec.user_data.clone(),
        };
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "user_data".to_string(),
            userdata::encoded(spec.image_family, &bootstrap)?,
        );
        if !spec.ssh_authorized_keys.is_empty() {
            metadata.insert(
                "ssh_authorized_keys".to_string(),
                spec.ssh_authorized_keys.join("\n"),
            );
        }

        let mut tags = TagBag::new(&self.tag_namespace);
        tags.extend(&spec.tags);
        tags.insert(TAG_MANAGED_BY, &self.cluster_name);
        tags.insert(TAG_NODECLAIM, &name);
        if let Some(nodepool) = &nodepool {
            tags.insert(TAG_NODEPOOL, nodepool);
        }

        let mut freeform_tags = spec.freeform_tags.clone();
        freeform_tags.insert(TAG_MANAGED_BY.to_string(), self.cluster_name.clone());
        freeform_tags.insert(TAG_NODECLAIM.to_string(), name.clone());

        let launch_volume_attachments = spec
            .block_devices
            .iter()
            .enumerate()
            .map(|(i, device)| LaunchAttachVolumeDetails {
                r#type: "paravirtualized".to_string(),
                display_name: format!("{}-volume-{}", name, i),
                launch_create_volume_details: LaunchCreateVolumeDetails {
                    volume_creation_type: "ATTRIBUTES".to_string(),
                    size_in_gbs: device.size_in_gbs,
                    vpus_per_gb: device.vpus_per_gb,
                },
            })
            .collect();

        Ok(LaunchInstanceDetails {
            availability_domain: placement.zone.clone(),
            compartment_id: self.compartment_id.clone(),
            display_name: name,
            shape,
            shape_config: Self::shape_config(instance_type)?,
            source_details: InstanceSourceViaImageDetails {
                source_type: "image".to_string(),
                image_id: image.id.clone(),
                boot_volume_size_in_gbs: boot.boot_volume_size_in_gbs,
                boot_volume_vpus_per_gb: boot.boot_volume_vpus_per_gb,
            },
            create_vnic_details: CreateVnicDetails {
                subnet_id: subnet.id.clone(),
                nsg_ids: status.security_groups.iter().map(|g| g.id.clone()).collect(),
                assign_public_ip: false,
            },
            metadata,
            defined_tags: tags.into_defined_tags(),
            freeform_tags,
            preemptible_instance_config: (placement.capacity_type == CAPACITY_TYPE_PREEMPTIBLE)
                .then(PreemptibleInstanceConfig::terminate),
            launch_volume_attachments,
        })
    }

    /// A live instance; terminated or terminating instances are `NotFound`.
    pub async fn get(&self, instance_id: &str) -> Result<Instance> {
        let instance = self.compute.get_instance(instance_id).await?;
        if instance.is_terminated() {
            return Err(ProviderError::NotFound(format!(
                "instance {} is {}",
                instance_id, instance.lifecycle_state
            )));
        }
        Ok(instance)
    }

    /// Live instances this cluster launched.
    pub async fn list(&self) -> Result<Vec<Instance>> {
        let instances = collect_pages(|page| self.compute.list_instances(&self.compartment_id, page)).await?;
        let managed: Vec<Instance> = instances
            .into_iter()
            .filter(|i| !i.is_terminated())
            .filter(|i| i.freeform_tags.get(TAG_MANAGED_BY) == Some(&self.cluster_name))
            .collect();
        debug!(count = managed.len(), "Listed managed instances");
        Ok(managed)
    }

    pub async fn delete(&self, instance_id: &str) -> Result<()> {
        info!(instance = %instance_id, "Terminating instance");
        self.compute.terminate_instance(instance_id).await
    }
}
