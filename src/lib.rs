//! Karpenter cloud provider for Oracle Cloud Infrastructure
//!
//! Turns OCI compute shapes into priced, scheduler-ready instance types,
//! launches the cheapest compatible one for a node claim, remembers capacity
//! pools that recently ran dry, and reports nodes that drifted from their
//! node class.
//!
//! ## Custom Resources
//!
//! - `OciNodeClass`: image, network, boot volume and kubelet settings for nodes
//! - `NodeClaim`: Karpenter's request for one node (read, not owned)
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: karpenter.k8s.oracle/v1alpha1
//! kind: OciNodeClass
//! metadata:
//!   name: default
//! spec:
//!   imageFamily: OKE
//!   subnetSelector:
//!     - name: workers
//!   bootConfig:
//!     bootVolumeSizeInGbs: 100
//! ```

pub mod clock;
pub mod cloudprovider;
pub mod crd;
pub mod drift;
pub mod error;
pub mod oci;
pub mod options;
pub mod providers;
pub mod resources;
pub mod scheduling;

pub use cloudprovider::CloudProvider;
pub use crd::{NodeClaim, OciNodeClass, OciNodeClassSpec, OciNodeClassStatus};
pub use drift::{DriftDetector, DriftReason};
pub use error::{ProviderError, Result};
pub use options::Options;
pub use scheduling::{InstanceType, Offering, Requirements};
