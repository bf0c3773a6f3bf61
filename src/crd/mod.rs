//! Custom Resource Definitions read by the OCI cloud provider
//!
//! - OciNodeClass: desired node configuration and its resolved status
//! - NodeClaim: Karpenter's request for a single node

mod nodeclaim;
mod nodeclass;

pub use nodeclaim::{
    NodeClaim, NodeClaimResources, NodeClaimSpec, NodeClaimStatus, NodeClassReference,
    NodeSelectorRequirementWithMinValues,
};
pub use nodeclass::{
    BlockDevice, BootConfig, ImageFamily, KubeletConfiguration, NodeClassCondition, OciNodeClass,
    OciNodeClassSpec, OciNodeClassStatus, ResolvedImage, ResolvedSecurityGroup, ResolvedSubnet,
    SelectorTerm,
};
