//! On-demand pricing
//!
//! Holds the current price list, starting from a bundled snapshot and
//! refreshed from the public OCI price list endpoint.

pub mod catalog;
pub mod parse;

use crate::error::{ProviderError, Result};
use crate::options::Options;
use crate::providers::shape::WrappedShape;
use catalog::PriceCatalog;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Price list shipped with the binary, used until the first refresh succeeds.
const BUNDLED_PRICE_LIST: &str = include_str!("price_list.json");

/// Preemptible capacity is billed at half the on-demand rate.
pub const PREEMPTIBLE_DISCOUNT: f64 = 0.5;

pub struct PricingProvider {
    http: reqwest::Client,
    url: String,
    currency: String,
    catalog: RwLock<PriceCatalog>,
}

impl PricingProvider {
    pub fn new(options: &Options) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let catalog = PriceCatalog::parse(BUNDLED_PRICE_LIST, &options.price_currency)?;
        Ok(Self {
            http,
            url: options.price_list_url.clone(),
            currency: options.price_currency.clone(),
            catalog: RwLock::new(catalog),
        })
    }

    /// Hourly on-demand price.
    pub fn price(&self, shape: &WrappedShape) -> f64 {
        self.catalog.read().calculate(shape)
    }

    pub fn preemptible_price(&self, shape: &WrappedShape) -> f64 {
        self.price(shape) * PREEMPTIBLE_DISCOUNT
    }

    pub fn item_count(&self) -> usize {
        self.catalog.read().items.len()
    }

    /// Back to the bundled snapshot.
    pub fn reset(&self) -> Result<()> {
        self.load(BUNDLED_PRICE_LIST)
    }

    /// Parse a price list and swap it in; the current list stays on failure.
    pub fn load(&self, raw: &str) -> Result<()> {
        let catalog = PriceCatalog::parse(raw, &self.currency)?;
        if catalog.is_empty() {
            return Err(ProviderError::Serialization(
                "price list has no items".to_string(),
            ));
        }
        let count = catalog.items.len();
        *self.catalog.write() = catalog;
        debug!(items = count, "Swapped price catalog");
        Ok(())
    }

    async fn fetch(&self) -> Result<()> {
        let raw = self
            .http
            .get(&self.url)
            .query(&[("currencyCode", self.currency.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        self.load(&raw)
    }

    pub async fn update_on_demand_pricing(&self) -> Result<()> {
        self.fetch().await?;
        info!(url = %self.url, items = self.item_count(), "Updated on-demand pricing");
        Ok(())
    }

    /// Refresh every `interval` until `shutdown` fires.
    pub async fn run_refresh_loop(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Pricing refresh loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.update_on_demand_pricing().await {
                        warn!(url = %self.url, error = %e, "Failed to update on-demand pricing, keeping previous catalog");
                    }
                }
            }
        }
    }
}
