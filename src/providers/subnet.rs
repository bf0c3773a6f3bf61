//! Subnet selection

use crate::crd::ResolvedSubnet;
use crate::error::{ProviderError, Result};
use crate::oci::NetworkApi;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

pub struct SubnetProvider {
    network: Arc<dyn NetworkApi>,
}

impl SubnetProvider {
    pub fn new(network: Arc<dyn NetworkApi>) -> Self {
        Self { network }
    }

    /// The subnet with the most free IPv4 addresses, with that count.
    pub async fn least_utilized(&self, subnets: &[ResolvedSubnet]) -> Result<(ResolvedSubnet, u64)> {
        if subnets.is_empty() {
            return Err(ProviderError::InsufficientCapacity(
                "node class has no resolved subnets".to_string(),
            ));
        }
        let counts = try_join_all(
            subnets
                .iter()
                .map(|s| self.network.subnet_available_ips(&s.id)),
        )
        .await
        .map_err(|err| ProviderError::InsufficientCapacity(format!("resolving subnets: {}", err)))?;

        let mut best: Option<(&ResolvedSubnet, u64)> = None;
        for (subnet, available) in subnets.iter().zip(counts) {
            debug!(subnet = %subnet.id, available, "Subnet utilization");
            if best.map_or(true, |(_, most)| available > most) {
                best = Some((subnet, available));
            }
        }
        best.map(|(subnet, available)| (subnet.clone(), available))
            .ok_or_else(|| ProviderError::InsufficientCapacity("no subnet available".to_string()))
    }
}
