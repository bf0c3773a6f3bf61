//! Cloud provider entry points called by the Karpenter controllers

use crate::crd::{KubeletConfiguration, NodeClaim, NodeClaimStatus, OciNodeClass};
use crate::drift::{DriftDetector, DriftReason};
use crate::error::{ProviderError, Result};
use crate::oci::models::Instance;
use crate::oci::{ComputeApi, NetworkApi};
use crate::options::Options;
use crate::providers::{
    InstanceProvider, InstanceTypeProvider, PricingProvider, ShapeProvider, SubnetProvider,
    UnavailableOfferings, WrappedShape,
};
use crate::resources::{self, ResourceList, CPU, EPHEMERAL_STORAGE, MEMORY};
use crate::scheduling::{InstanceType, LABEL_CAPACITY_TYPE, LABEL_ZONE};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

/// Optional scheme some callers put in front of instance OCIDs.
const PROVIDER_ID_PREFIX: &str = "oci://";

pub fn instance_id(provider_id: &str) -> &str {
    provider_id
        .strip_prefix(PROVIDER_ID_PREFIX)
        .unwrap_or(provider_id)
}

/// Capacity minus kube-reserved, system-reserved and the eviction threshold.
pub fn allocatable(instance_type: &InstanceType) -> Result<ResourceList> {
    let overhead = &instance_type.overhead;
    let lists = [
        &overhead.kube_reserved,
        &overhead.system_reserved,
        &overhead.eviction_threshold,
    ];
    let mut out = ResourceList::new();
    for (name, quantity) in &instance_type.capacity {
        let value = match name.as_str() {
            CPU => {
                let mut millis = resources::parse_cpu_millis(&quantity.0)?;
                for list in lists {
                    if let Some(q) = list.get(CPU) {
                        millis -= resources::parse_cpu_millis(&q.0)?;
                    }
                }
                resources::cpu_millis(millis.max(0))
            }
            MEMORY | EPHEMERAL_STORAGE => {
                let mut mib = resources::parse_mebibytes(&quantity.0)?;
                for list in lists {
                    if let Some(q) = list.get(name) {
                        mib -= resources::parse_mebibytes(&q.0)?;
                    }
                }
                resources::mebibytes(mib.max(0))
            }
            _ => quantity.clone(),
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}

pub struct CloudProvider {
    instance_types: InstanceTypeProvider,
    instances: InstanceProvider,
    drift: DriftDetector,
    pricing: Arc<PricingProvider>,
    unavailable: Arc<UnavailableOfferings>,
}

impl CloudProvider {
    pub fn new(
        instance_types: InstanceTypeProvider,
        instances: InstanceProvider,
        drift: DriftDetector,
        pricing: Arc<PricingProvider>,
        unavailable: Arc<UnavailableOfferings>,
    ) -> Self {
        Self {
            instance_types,
            instances,
            drift,
            pricing,
            unavailable,
        }
    }

    /// Wire every provider from `options` over the given OCI capabilities.
    pub fn from_options(
        compute: Arc<dyn ComputeApi>,
        network: Arc<dyn NetworkApi>,
        pricing: Arc<PricingProvider>,
        options: &Options,
    ) -> Self {
        let unavailable = Arc::new(UnavailableOfferings::new(options.unavailable_offerings_ttl()));
        let shapes = Arc::new(ShapeProvider::new(compute.clone(), options));
        let instance_types = InstanceTypeProvider::new(
            shapes,
            pricing.clone(),
            unavailable.clone(),
            options.vm_memory_overhead_percent,
        );
        let instances = InstanceProvider::new(
            compute.clone(),
            SubnetProvider::new(network.clone()),
            unavailable.clone(),
            options,
        );
        let drift = DriftDetector::new(compute, network);
        Self::new(instance_types, instances, drift, pricing, unavailable)
    }

    pub fn unavailable_offerings(&self) -> &Arc<UnavailableOfferings> {
        &self.unavailable
    }

    pub async fn get_instance_types(
        &self,
        kubelet: &KubeletConfiguration,
        node_class: &OciNodeClass,
    ) -> Result<Vec<InstanceType>> {
        self.instance_types.list(kubelet, node_class).await
    }

    /// Launch a node for `node_claim`, returning the claim with labels and
    /// status filled in from the launched instance.
    pub async fn create(&self, node_class: &OciNodeClass, node_claim: &NodeClaim) -> Result<NodeClaim> {
        let instance_types = self
            .get_instance_types(&node_class.kubelet(), node_class)
            .await?;
        let launched = self
            .instances
            .create(node_class, node_claim, &instance_types)
            .await?;

        let mut out = node_claim.clone();
        let labels = out.labels_mut();
        labels.extend(launched.instance_type.requirements.labels());
        labels.insert(LABEL_ZONE.to_string(), launched.placement.zone.clone());
        labels.insert(
            LABEL_CAPACITY_TYPE.to_string(),
            launched.placement.capacity_type.to_string(),
        );
        out.status = Some(NodeClaimStatus {
            provider_id: Some(launched.instance.id.clone()),
            image_id: launched.instance.image_id.clone(),
            node_name: None,
            capacity: launched.instance_type.capacity.clone(),
            allocatable: allocatable(&launched.instance_type)?,
        });
        info!(
            nodeclaim = %node_claim.name_any(),
            provider_id = %launched.instance.id,
            instance_type = %launched.instance_type.name,
            "Created node claim"
        );
        Ok(out)
    }

    pub async fn get(&self, provider_id: &str) -> Result<Instance> {
        self.instances.get(instance_id(provider_id)).await
    }

    pub async fn list(&self) -> Result<Vec<Instance>> {
        self.instances.list().await
    }

    pub async fn delete(&self, provider_id: &str) -> Result<()> {
        self.instances.delete(instance_id(provider_id)).await
    }

    pub async fn is_drifted(
        &self,
        node_claim: &NodeClaim,
        node_class: &OciNodeClass,
    ) -> Result<Option<DriftReason>> {
        let provider_id = node_claim
            .status
            .as_ref()
            .and_then(|s| s.provider_id.as_deref())
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "node claim {} has no provider id",
                    node_claim.name_any()
                ))
            })?;
        let instance = self.get(provider_id).await?;
        self.drift.is_drifted(&instance, node_class).await
    }

    /// On-demand hourly price of a shape at the given size.
    pub fn price(&self, shape_name: &str, cpu: i64, memory_gib: i64) -> f64 {
        self.pricing
            .price(&WrappedShape::sized(shape_name, cpu, memory_gib))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        OciNodeClassSpec, OciNodeClassStatus, ResolvedImage, ResolvedSecurityGroup,
        ResolvedSubnet,
    };
    use crate::oci::fake::FakeOci;
    use crate::oci::models::{Shape, ShapeMemoryOptions, ShapeOcpuOptions, Subnet};
    use crate::resources::PODS;
    use crate::scheduling::{
        InstanceTypeOverhead, CAPACITY_TYPE_ON_DEMAND, LABEL_INSTANCE_TYPE,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn options() -> Options {
        Options {
            cluster_name: "prod".to_string(),
            cluster_endpoint: "https://10.0.0.10:6443".to_string(),
            compartment_id: "ocid1.compartment.test".to_string(),
            flexible_shape_ratios: vec![8.0],
            flexible_cpu_constraints: vec![1],
            ..Default::default()
        }
    }

    fn node_class() -> OciNodeClass {
        let mut nc = OciNodeClass::new(
            "default",
            serde_json::from_str::<OciNodeClassSpec>(r#"{"bootConfig": {"bootVolumeSizeInGbs": 50}}"#)
                .unwrap(),
        );
        nc.status = Some(OciNodeClassStatus {
            subnets: vec![ResolvedSubnet {
                id: "subnet-1".to_string(),
                ..Default::default()
            }],
            images: vec![ResolvedImage {
                id: "img-1".to_string(),
                ..Default::default()
            }],
            security_groups: vec![ResolvedSecurityGroup {
                id: "nsg-1".to_string(),
                ..Default::default()
            }],
            conditions: vec![],
        });
        nc
    }

    fn node_claim() -> NodeClaim {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "karpenter.sh/v1",
            "kind": "NodeClaim",
            "metadata": {"name": "default-xyz"},
            "spec": {
                "requirements": [
                    {"key": "karpenter.sh/capacity-type", "operator": "In", "values": ["on-demand"]}
                ],
                "nodeClassRef": {"name": "default"}
            }
        }))
        .unwrap()
    }

    fn cloud_provider() -> (CloudProvider, Arc<FakeOci>) {
        let fake = Arc::new(FakeOci::new());
        fake.add_shape(
            "AD-1",
            Shape {
                shape: "VM.Standard.E4.Flex".to_string(),
                is_flexible: Some(true),
                ocpu_options: Some(ShapeOcpuOptions {
                    min: Some(1.0),
                    max: Some(64.0),
                }),
                memory_options: Some(ShapeMemoryOptions {
                    min_in_gbs: Some(1.0),
                    max_in_gbs: Some(1024.0),
                    default_per_ocpu_in_gbs: Some(16.0),
                }),
                ..Default::default()
            },
        );
        fake.add_subnet(
            Subnet {
                id: "subnet-1".to_string(),
                ..Default::default()
            },
            100,
        );
        let options = options();
        let pricing = Arc::new(PricingProvider::new(&options).unwrap());
        let provider = CloudProvider::from_options(fake.clone(), fake.clone(), pricing, &options);
        (provider, fake)
    }

    #[test]
    fn test_instance_id() {
        assert_eq!(instance_id("oci://ocid1.instance.a"), "ocid1.instance.a");
        assert_eq!(instance_id("ocid1.instance.a"), "ocid1.instance.a");
    }

    #[test]
    fn test_allocatable_subtracts_overhead() {
        let instance_type = InstanceType {
            name: "VM.Standard2.1".to_string(),
            requirements: Default::default(),
            capacity: [
                (CPU.to_string(), Quantity("2".to_string())),
                (MEMORY.to_string(), Quantity("8192Mi".to_string())),
                (PODS.to_string(), Quantity("31".to_string())),
            ]
            .into(),
            overhead: InstanceTypeOverhead {
                kube_reserved: [
                    (CPU.to_string(), Quantity("70m".to_string())),
                    (MEMORY.to_string(), Quantity("1844Mi".to_string())),
                ]
                .into(),
                system_reserved: [(CPU.to_string(), Quantity("35m".to_string()))].into(),
                eviction_threshold: [(MEMORY.to_string(), Quantity("100Mi".to_string()))].into(),
            },
            offerings: vec![],
        };
        let out = allocatable(&instance_type).unwrap();
        assert_eq!(out[CPU].0, "1895m");
        assert_eq!(out[MEMORY].0, "6248Mi");
        assert_eq!(out[PODS].0, "31");
    }

    #[test]
    fn test_price_of_named_shape() {
        let (provider, _) = cloud_provider();
        // 1 OCPU at 0.025 plus 8 GiB at 0.0015
        assert!((provider.price("VM.Standard.E4.Flex", 2, 8) - 0.037).abs() < 1e-9);
        assert_eq!(provider.price("VM.Mystery.1", 2, 8), f64::INFINITY);
    }

    #[tokio::test]
    async fn test_create_hydrates_node_claim() {
        let (provider, fake) = cloud_provider();
        let types = provider
            .get_instance_types(&KubeletConfiguration::default(), &node_class())
            .await
            .unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name, "VM.Standard.E4.Flex-1-16");

        let claim = provider.create(&node_class(), &node_claim()).await.unwrap();
        let status = claim.status.as_ref().unwrap();
        let provider_id = status.provider_id.clone().unwrap();
        assert_eq!(status.image_id.as_deref(), Some("img-1"));
        assert_eq!(status.capacity[CPU].0, "2");
        assert!(status.allocatable.contains_key(MEMORY));
        assert_eq!(claim.labels()[LABEL_INSTANCE_TYPE], "VM.Standard.E4.Flex-1-16");
        assert_eq!(claim.labels()[LABEL_ZONE], "AD-1");
        assert_eq!(claim.labels()[LABEL_CAPACITY_TYPE], CAPACITY_TYPE_ON_DEMAND);
        assert_eq!(fake.launched().len(), 1);

        assert_eq!(provider.get(&provider_id).await.unwrap().id, provider_id);
        assert_eq!(provider.list().await.unwrap().len(), 1);
        assert_eq!(provider.is_drifted(&claim, &node_class()).await.unwrap(), None);

        let mut moved = node_class();
        if let Some(status) = moved.status.as_mut() {
            status.images[0].id = "img-2".to_string();
        }
        assert_eq!(
            provider.is_drifted(&claim, &moved).await.unwrap(),
            Some(DriftReason::ImageDrift)
        );

        provider.delete(&format!("oci://{}", provider_id)).await.unwrap();
        assert!(provider.get(&provider_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_every_zone_out_of_capacity() {
        let fake = Arc::new(FakeOci::new());
        let zones = ["AD-1", "AD-2", "AD-3"];
        for zone in zones {
            fake.add_shape(
                zone,
                Shape {
                    shape: "shape-1".to_string(),
                    ocpus: Some(1.0),
                    memory_in_gbs: Some(4.0),
                    max_vnic_attachments: Some(2),
                    ..Default::default()
                },
            );
            fake.fail_launch(
                "shape-1",
                zone,
                ProviderError::api(500, "InternalError", "Out of host capacity."),
            );
        }
        fake.add_subnet(
            Subnet {
                id: "subnet-1".to_string(),
                ..Default::default()
            },
            100,
        );
        let options = options();
        let pricing = Arc::new(PricingProvider::new(&options).unwrap());
        let provider = CloudProvider::from_options(fake.clone(), fake.clone(), pricing, &options);
        let kubelet = KubeletConfiguration::default();

        for _ in zones {
            let err = provider.create(&node_class(), &node_claim()).await.unwrap_err();
            assert!(err.is_insufficient_capacity());
        }
        assert_eq!(fake.launched().len(), zones.len());

        let types = provider.get_instance_types(&kubelet, &node_class()).await.unwrap();
        let on_demand: Vec<_> = types[0]
            .offerings
            .iter()
            .filter(|o| o.capacity_type == CAPACITY_TYPE_ON_DEMAND)
            .collect();
        assert_eq!(on_demand.len(), zones.len());
        assert!(on_demand.iter().all(|o| !o.available));

        let err = provider.create(&node_class(), &node_claim()).await.unwrap_err();
        assert!(err.is_insufficient_capacity());
        assert_eq!(fake.launched().len(), zones.len());
    }

    #[tokio::test]
    async fn test_gpu_claim_selects_gpu_shape() {
        let fake = Arc::new(FakeOci::new());
        fake.add_shape(
            "AD-1",
            Shape {
                shape: "VM.Standard2.1".to_string(),
                ocpus: Some(1.0),
                memory_in_gbs: Some(15.0),
                max_vnic_attachments: Some(2),
                ..Default::default()
            },
        );
        fake.add_shape(
            "AD-1",
            Shape {
                shape: "VM.GPU3.1".to_string(),
                ocpus: Some(6.0),
                memory_in_gbs: Some(90.0),
                max_vnic_attachments: Some(2),
                gpus: Some(1),
                gpu_description: Some("NVIDIA V100".to_string()),
                ..Default::default()
            },
        );
        fake.add_subnet(
            Subnet {
                id: "subnet-1".to_string(),
                ..Default::default()
            },
            100,
        );
        let options = options();
        let pricing = Arc::new(PricingProvider::new(&options).unwrap());
        let provider = CloudProvider::from_options(fake.clone(), fake.clone(), pricing, &options);
        let claim: NodeClaim = serde_json::from_value(serde_json::json!({
            "apiVersion": "karpenter.sh/v1",
            "kind": "NodeClaim",
            "metadata": {"name": "gpu-xyz"},
            "spec": {
                "requirements": [
                    {"key": "karpenter.sh/capacity-type", "operator": "In", "values": ["on-demand"]},
                    {"key": "karpenter.k8s.oracle/instance-gpu", "operator": "In", "values": ["1"]}
                ],
                "nodeClassRef": {"name": "default"}
            }
        }))
        .unwrap();

        for _ in 0..3 {
            let launched = provider.create(&node_class(), &claim).await.unwrap();
            assert_eq!(launched.labels()[LABEL_INSTANCE_TYPE], "VM.GPU3.1");
        }
        assert!(fake.launched().iter().all(|d| d.shape == "VM.GPU3.1"));
    }

    #[test]
    fn test_drift_without_provider_id() {
        let (provider, _) = cloud_provider();
        let err = tokio_test::block_on(provider.is_drifted(&node_claim(), &node_class())).unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_launch_failure_marks_offering() {
        let (provider, fake) = cloud_provider();
        fake.fail_launch(
            "VM.Standard.E4.Flex",
            "AD-1",
            ProviderError::api(500, "InternalError", "Out of host capacity."),
        );
        let err = provider.create(&node_class(), &node_claim()).await.unwrap_err();
        assert!(err.is_insufficient_capacity());
        assert!(provider.unavailable_offerings().is_unavailable(
            "VM.Standard.E4.Flex-1-16",
            "AD-1",
            CAPACITY_TYPE_ON_DEMAND
        ));

        let types = provider
            .get_instance_types(&KubeletConfiguration::default(), &node_class())
            .await
            .unwrap();
        assert!(types[0]
            .offerings
            .iter()
            .filter(|o| o.capacity_type == CAPACITY_TYPE_ON_DEMAND)
            .all(|o| !o.available));
    }
}
