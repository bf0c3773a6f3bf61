//! OCI capability interfaces
//!
//! The providers only talk to OCI through [`ComputeApi`] and [`NetworkApi`].
//! [`client::OciClient`] implements both over signed HTTPS; [`fake::FakeOci`]
//! implements both in memory for tests.

pub mod client;
pub mod fake;
pub mod models;

use crate::error::Result;
use async_trait::async_trait;
use models::{
    AvailabilityDomain, Image, Instance, LaunchInstanceDetails, NetworkSecurityGroup, Page, Shape,
    Subnet, Vnic, VnicAttachment,
};
use std::future::Future;

/// Compute service operations
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_availability_domains(&self, compartment_id: &str)
        -> Result<Vec<AvailabilityDomain>>;

    async fn list_shapes(
        &self,
        compartment_id: &str,
        availability_domain: &str,
        page: Option<String>,
    ) -> Result<Page<Shape>>;

    async fn get_image(&self, image_id: &str) -> Result<Image>;

    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance>;

    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;

    async fn get_instance(&self, instance_id: &str) -> Result<Instance>;

    async fn list_instances(
        &self,
        compartment_id: &str,
        page: Option<String>,
    ) -> Result<Page<Instance>>;

    async fn list_vnic_attachments(
        &self,
        compartment_id: &str,
        instance_id: &str,
        page: Option<String>,
    ) -> Result<Page<VnicAttachment>>;
}

/// Virtual network service operations
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn list_subnets(&self, compartment_id: &str, page: Option<String>)
        -> Result<Page<Subnet>>;

    async fn list_network_security_groups(
        &self,
        compartment_id: &str,
        page: Option<String>,
    ) -> Result<Page<NetworkSecurityGroup>>;

    async fn get_vnic(&self, vnic_id: &str) -> Result<Vnic>;

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet>;

    async fn get_network_security_group(&self, nsg_id: &str) -> Result<NetworkSecurityGroup>;

    /// Free IPv4 addresses left in the subnet's CIDRs.
    async fn subnet_available_ips(&self, subnet_id: &str) -> Result<u64>;
}

/// Follow `next_page` cursors until the listing is exhausted.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor = None;
    loop {
        let page = fetch(cursor).await?;
        items.extend(page.items);
        match page.next_page {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(items),
        }
    }
}
