//! Providers composed by the cloud provider
//!
//! Leaf-first: shapes, pricing and capacity feed instance types; instance
//! types, subnets, tags and userdata feed launches. The unavailable
//! offerings cache closes the loop from failed launches back to offerings.

pub mod capacity;
pub mod instance;
pub mod instancetype;
pub mod pricing;
pub mod shape;
pub mod subnet;
pub mod tags;
pub mod unavailable;
pub mod userdata;

pub use instance::InstanceProvider;
pub use instancetype::InstanceTypeProvider;
pub use pricing::PricingProvider;
pub use shape::{ShapeProvider, WrappedShape};
pub use subnet::SubnetProvider;
pub use unavailable::UnavailableOfferings;
