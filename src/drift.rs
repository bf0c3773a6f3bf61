//! Drift between a running instance and its node class

use crate::crd::OciNodeClass;
use crate::error::{ProviderError, Result};
use crate::oci::models::{Instance, Vnic};
use crate::oci::{collect_pages, ComputeApi, NetworkApi};
use futures::future::try_join_all;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const VNIC_DETACHED: &str = "DETACHED";
const VNIC_DETACHING: &str = "DETACHING";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftReason {
    ImageDrift,
    SubnetDrift,
    SecurityGroupDrift,
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftReason::ImageDrift => write!(f, "ImageDrift"),
            DriftReason::SubnetDrift => write!(f, "SubnetDrift"),
            DriftReason::SecurityGroupDrift => write!(f, "SecurityGroupDrift"),
        }
    }
}

pub struct DriftDetector {
    compute: Arc<dyn ComputeApi>,
    network: Arc<dyn NetworkApi>,
}

impl DriftDetector {
    pub fn new(compute: Arc<dyn ComputeApi>, network: Arc<dyn NetworkApi>) -> Self {
        Self { compute, network }
    }

    /// First drift found, checking image, then security groups, then subnets.
    pub async fn is_drifted(
        &self,
        instance: &Instance,
        node_class: &OciNodeClass,
    ) -> Result<Option<DriftReason>> {
        let reason = if self.image_drifted(instance, node_class)? {
            Some(DriftReason::ImageDrift)
        } else {
            let vnics = self.primary_vnics(instance).await?;
            if security_groups_drifted(&vnics, node_class) {
                Some(DriftReason::SecurityGroupDrift)
            } else if subnets_drifted(&vnics, node_class)? {
                Some(DriftReason::SubnetDrift)
            } else {
                None
            }
        };
        match reason {
            Some(reason) => info!(
                instance = %instance.id,
                nodeclass = %node_class.name_any(),
                reason = %reason,
                "Instance drifted"
            ),
            None => debug!(instance = %instance.id, "Instance matches node class"),
        }
        Ok(reason)
    }

    fn image_drifted(&self, instance: &Instance, node_class: &OciNodeClass) -> Result<bool> {
        let status = node_class.resolved();
        if status.images.is_empty() {
            return Err(ProviderError::Configuration(format!(
                "node class {} has no resolved images",
                node_class.name_any()
            )));
        }
        let Some(image_id) = instance.image_id.as_deref() else {
            return Ok(true);
        };
        Ok(!status
            .images
            .iter()
            .filter(|image| image.supports(&instance.shape))
            .any(|image| image.id == image_id))
    }

    /// Primary VNICs of attachments still attached.
    async fn primary_vnics(&self, instance: &Instance) -> Result<Vec<Vnic>> {
        let attachments = collect_pages(|page| {
            self.compute
                .list_vnic_attachments(&instance.compartment_id, &instance.id, page)
        })
        .await?;
        let vnic_ids: Vec<String> = attachments
            .into_iter()
            .filter(|a| a.lifecycle_state != VNIC_DETACHED && a.lifecycle_state != VNIC_DETACHING)
            .filter_map(|a| a.vnic_id)
            .collect();
        let vnics = try_join_all(vnic_ids.iter().map(|id| self.network.get_vnic(id))).await?;
        Ok(vnics
            .into_iter()
            .filter(|v| v.is_primary.unwrap_or(false))
            .collect())
    }
}

fn security_groups_drifted(vnics: &[Vnic], node_class: &OciNodeClass) -> bool {
    let actual: BTreeSet<&str> = vnics
        .iter()
        .flat_map(|v| v.nsg_ids.iter().map(String::as_str))
        .collect();
    let status = node_class.resolved();
    let expected: BTreeSet<&str> = status
        .security_groups
        .iter()
        .map(|g| g.id.as_str())
        .collect();
    actual != expected
}

fn subnets_drifted(vnics: &[Vnic], node_class: &OciNodeClass) -> Result<bool> {
    let status = node_class.resolved();
    if status.subnets.is_empty() {
        return Err(ProviderError::Configuration(format!(
            "node class {} has no resolved subnets",
            node_class.name_any()
        )));
    }
    Ok(vnics
        .iter()
        .any(|v| !status.subnets.iter().any(|s| s.id == v.subnet_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        OciNodeClassSpec, OciNodeClassStatus, ResolvedImage, ResolvedSecurityGroup,
        ResolvedSubnet,
    };
    use crate::oci::fake::FakeOci;

    fn node_class(images: &[&str], subnets: &[&str], nsgs: &[&str]) -> OciNodeClass {
        let mut nc = OciNodeClass::new(
            "default",
            serde_json::from_str::<OciNodeClassSpec>("{}").unwrap(),
        );
        nc.status = Some(OciNodeClassStatus {
            images: images
                .iter()
                .map(|id| ResolvedImage {
                    id: id.to_string(),
                    ..Default::default()
                })
                .collect(),
            subnets: subnets
                .iter()
                .map(|id| ResolvedSubnet {
                    id: id.to_string(),
                    ..Default::default()
                })
                .collect(),
            security_groups: nsgs
                .iter()
                .map(|id| ResolvedSecurityGroup {
                    id: id.to_string(),
                    ..Default::default()
                })
                .collect(),
            conditions: vec![],
        });
        nc
    }

    fn running(fake: &FakeOci, image: &str, subnet: &str, nsgs: &[&str]) -> Instance {
        let instance = Instance {
            id: "ocid1.instance.test".to_string(),
            compartment_id: "ocid1.compartment.test".to_string(),
            shape: "VM.Standard.E4.Flex".to_string(),
            lifecycle_state: "RUNNING".to_string(),
            image_id: Some(image.to_string()),
            ..Default::default()
        };
        fake.add_instance(
            instance.clone(),
            vec![
                Vnic {
                    id: "vnic-primary".to_string(),
                    subnet_id: subnet.to_string(),
                    is_primary: Some(true),
                    nsg_ids: nsgs.iter().map(|s| s.to_string()).collect(),
                    private_ip: Some("10.0.10.5".to_string()),
                },
                Vnic {
                    id: "vnic-secondary".to_string(),
                    subnet_id: "subnet-pods".to_string(),
                    is_primary: Some(false),
                    nsg_ids: vec!["nsg-pods".to_string()],
                    private_ip: None,
                },
            ],
        );
        instance
    }

    fn detector(fake: Arc<FakeOci>) -> DriftDetector {
        DriftDetector::new(fake.clone(), fake)
    }

    #[tokio::test]
    async fn test_no_drift() {
        let fake = Arc::new(FakeOci::new());
        let instance = running(&fake, "img-1", "subnet-1", &["nsg-1", "nsg-2"]);
        let nc = node_class(&["img-1"], &["subnet-1"], &["nsg-2", "nsg-1"]);
        assert_eq!(detector(fake).is_drifted(&instance, &nc).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_image_drift() {
        let fake = Arc::new(FakeOci::new());
        let instance = running(&fake, "img-1", "subnet-1", &["nsg-1"]);
        let nc = node_class(&["img-2"], &["subnet-1"], &["nsg-1"]);
        assert_eq!(
            detector(fake).is_drifted(&instance, &nc).await.unwrap(),
            Some(DriftReason::ImageDrift)
        );
    }

    #[tokio::test]
    async fn test_image_incompatible_with_shape_drifts() {
        let fake = Arc::new(FakeOci::new());
        let instance = running(&fake, "img-1", "subnet-1", &["nsg-1"]);
        let mut nc = node_class(&["img-1"], &["subnet-1"], &["nsg-1"]);
        if let Some(status) = nc.status.as_mut() {
            status.images[0].compatible_shapes = vec!["VM.Standard.A1.Flex".to_string()];
        }
        assert_eq!(
            detector(fake).is_drifted(&instance, &nc).await.unwrap(),
            Some(DriftReason::ImageDrift)
        );
    }

    #[tokio::test]
    async fn test_security_group_drift() {
        let fake = Arc::new(FakeOci::new());
        let instance = running(&fake, "img-1", "subnet-1", &["nsg-1", "nsg-2"]);
        let nc = node_class(&["img-1"], &["subnet-1"], &["nsg-1"]);
        assert_eq!(
            detector(fake).is_drifted(&instance, &nc).await.unwrap(),
            Some(DriftReason::SecurityGroupDrift)
        );
    }

    #[tokio::test]
    async fn test_subnet_drift() {
        let fake = Arc::new(FakeOci::new());
        let instance = running(&fake, "img-1", "subnet-old", &["nsg-1"]);
        let nc = node_class(&["img-1"], &["subnet-1", "subnet-2"], &["nsg-1"]);
        assert_eq!(
            detector(fake).is_drifted(&instance, &nc).await.unwrap(),
            Some(DriftReason::SubnetDrift)
        );
    }

    #[tokio::test]
    async fn test_image_checked_before_network() {
        let fake = Arc::new(FakeOci::new());
        let instance = running(&fake, "img-1", "subnet-old", &["nsg-9"]);
        let nc = node_class(&["img-2"], &["subnet-1"], &["nsg-1"]);
        assert_eq!(
            detector(fake).is_drifted(&instance, &nc).await.unwrap(),
            Some(DriftReason::ImageDrift)
        );
    }

    #[tokio::test]
    async fn test_unresolved_status_is_an_error() {
        let fake = Arc::new(FakeOci::new());
        let instance = running(&fake, "img-1", "subnet-1", &["nsg-1"]);
        let detector = detector(fake);

        let err = detector
            .is_drifted(&instance, &node_class(&[], &["subnet-1"], &["nsg-1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        let err = detector
            .is_drifted(&instance, &node_class(&["img-1"], &[], &["nsg-1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }
}
