//! OCI API payloads, limited to the fields the provider reads or sends

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Defined tags: namespace -> key -> value
pub type DefinedTags = BTreeMap<String, BTreeMap<String, String>>;

pub const LIFECYCLE_TERMINATING: &str = "TERMINATING";
pub const LIFECYCLE_TERMINATED: &str = "TERMINATED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityDomain {
    pub name: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub shape: String,
    #[serde(default)]
    pub is_flexible: Option<bool>,
    #[serde(default)]
    pub ocpus: Option<f64>,
    #[serde(rename = "memoryInGBs", default)]
    pub memory_in_gbs: Option<f64>,
    #[serde(default)]
    pub ocpu_options: Option<ShapeOcpuOptions>,
    #[serde(default)]
    pub memory_options: Option<ShapeMemoryOptions>,
    #[serde(default)]
    pub max_vnic_attachments: Option<i32>,
    #[serde(default)]
    pub max_vnic_attachment_options: Option<ShapeMaxVnicAttachmentOptions>,
    #[serde(default)]
    pub gpus: Option<i32>,
    #[serde(default)]
    pub gpu_description: Option<String>,
    #[serde(default)]
    pub processor_description: Option<String>,
    #[serde(default)]
    pub networking_bandwidth_in_gbps: Option<f64>,
    #[serde(rename = "localDisksTotalSizeInGBs", default)]
    pub local_disks_total_size_in_gbs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShapeOcpuOptions {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShapeMemoryOptions {
    #[serde(rename = "minInGBs", default)]
    pub min_in_gbs: Option<f64>,
    #[serde(rename = "maxInGBs", default)]
    pub max_in_gbs: Option<f64>,
    #[serde(rename = "defaultPerOcpuInGBs", default)]
    pub default_per_ocpu_in_gbs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShapeMaxVnicAttachmentOptions {
    #[serde(default)]
    pub min: Option<i32>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub default_per_ocpu: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub operating_system_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub availability_domain: String,
    #[serde(default)]
    pub compartment_id: String,
    pub shape: String,
    #[serde(default)]
    pub lifecycle_state: String,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub shape_config: Option<InstanceShapeConfig>,
    #[serde(default)]
    pub freeform_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub defined_tags: DefinedTags,
    #[serde(default)]
    pub preemptible_instance_config: Option<PreemptibleInstanceConfig>,
    #[serde(default)]
    pub time_created: Option<String>,
}

impl Instance {
    pub fn is_terminated(&self) -> bool {
        self.lifecycle_state == LIFECYCLE_TERMINATED || self.lifecycle_state == LIFECYCLE_TERMINATING
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceShapeConfig {
    #[serde(default)]
    pub ocpus: Option<f64>,
    #[serde(rename = "memoryInGBs", default)]
    pub memory_in_gbs: Option<f64>,
    #[serde(default)]
    pub vcpus: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInstanceDetails {
    pub availability_domain: String,
    pub compartment_id: String,
    pub display_name: String,
    pub shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape_config: Option<LaunchInstanceShapeConfigDetails>,
    pub source_details: InstanceSourceViaImageDetails,
    pub create_vnic_details: CreateVnicDetails,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub defined_tags: DefinedTags,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub freeform_tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preemptible_instance_config: Option<PreemptibleInstanceConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub launch_volume_attachments: Vec<LaunchAttachVolumeDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInstanceShapeConfigDetails {
    pub ocpus: f64,
    #[serde(rename = "memoryInGBs")]
    pub memory_in_gbs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSourceViaImageDetails {
    pub source_type: String,
    pub image_id: String,
    #[serde(rename = "bootVolumeSizeInGBs")]
    pub boot_volume_size_in_gbs: i64,
    #[serde(rename = "bootVolumeVpusPerGB")]
    pub boot_volume_vpus_per_gb: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateVnicDetails {
    pub subnet_id: String,
    #[serde(default)]
    pub nsg_ids: Vec<String>,
    pub assign_public_ip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreemptibleInstanceConfig {
    pub preemption_action: PreemptionAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreemptionAction {
    pub r#type: String,
    pub preserve_boot_volume: bool,
}

impl PreemptibleInstanceConfig {
    pub fn terminate() -> Self {
        Self {
            preemption_action: PreemptionAction {
                r#type: "TERMINATE".to_string(),
                preserve_boot_volume: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAttachVolumeDetails {
    pub r#type: String,
    pub display_name: String,
    pub launch_create_volume_details: LaunchCreateVolumeDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCreateVolumeDetails {
    pub volume_creation_type: String,
    #[serde(rename = "sizeInGBs")]
    pub size_in_gbs: i64,
    #[serde(rename = "vpusPerGB")]
    pub vpus_per_gb: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VnicAttachment {
    pub id: String,
    pub instance_id: String,
    #[serde(default)]
    pub vnic_id: Option<String>,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub lifecycle_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vnic {
    pub id: String,
    pub subnet_id: String,
    #[serde(default)]
    pub is_primary: Option<bool>,
    #[serde(default)]
    pub nsg_ids: Vec<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub availability_domain: Option<String>,
    #[serde(default)]
    pub cidr_block: String,
    #[serde(default)]
    pub vcn_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSecurityGroup {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub vcn_id: String,
}

/// One page of a cursor-paged list call
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}
