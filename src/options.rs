//! Operator options
//!
//! Every knob can be set from the command line or from the environment.

use crate::error::{ProviderError, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PRICE_LIST_URL: &str =
    "https://apexapps.oracle.com/pls/apex/cetools/api/v1/products/";

/// Options shared by all providers.
#[derive(Args, Debug, Clone)]
pub struct Options {
    /// Name of the cluster nodes join
    #[arg(long, env = "CLUSTER_NAME", default_value = "")]
    pub cluster_name: String,

    /// Kubernetes API server endpoint handed to the bootstrap script
    #[arg(long, env = "CLUSTER_ENDPOINT", default_value = "")]
    pub cluster_endpoint: String,

    /// Base64 cluster CA bundle handed to the bootstrap script
    #[arg(long, env = "CLUSTER_CA_BUNDLE", default_value = "")]
    pub cluster_ca_bundle: String,

    /// Compartment instances are launched into
    #[arg(long, env = "COMPARTMENT_ID", default_value = "")]
    pub compartment_id: String,

    /// Defined-tag namespace for instance tags
    #[arg(long, env = "TAG_NAMESPACE", default_value = "karpenter")]
    pub tag_namespace: String,

    /// Availability domains to consider (empty: ask the compute API)
    #[arg(long, env = "AVAILABILITY_DOMAINS", value_delimiter = ',')]
    pub availability_domains: Vec<String>,

    /// Memory GiB per vCPU ratios expanded for flexible shapes
    #[arg(
        long,
        env = "FLEXIBLE_SHAPE_RATIOS",
        value_delimiter = ',',
        default_values_t = vec![2.0, 4.0, 8.0]
    )]
    pub flexible_shape_ratios: Vec<f64>,

    /// OCPU counts expanded for flexible shapes
    #[arg(
        long,
        env = "FLEXIBLE_CPU_CONSTRAINTS",
        value_delimiter = ',',
        default_values_t = vec![1, 2, 4, 8, 16, 32, 48, 64, 96, 128]
    )]
    pub flexible_cpu_constraints: Vec<u32>,

    /// Fraction of memory lost to the hypervisor
    #[arg(long, env = "VM_MEMORY_OVERHEAD_PERCENT", default_value_t = 0.075)]
    pub vm_memory_overhead_percent: f64,

    /// Remote price list endpoint
    #[arg(long, env = "PRICE_LIST_URL", default_value = DEFAULT_PRICE_LIST_URL)]
    pub price_list_url: String,

    /// Currency prices are read in
    #[arg(long, env = "PRICE_CURRENCY", default_value = "USD")]
    pub price_currency: String,

    /// Seconds between price list refreshes
    #[arg(long, env = "PRICE_REFRESH_INTERVAL", default_value_t = 12 * 60 * 60)]
    pub price_refresh_interval: u64,

    /// Seconds the shape catalog is cached
    #[arg(long, env = "SHAPE_CACHE_TTL", default_value_t = 5 * 60)]
    pub shape_cache_ttl: u64,

    /// Seconds an insufficient-capacity offering stays unavailable
    #[arg(long, env = "UNAVAILABLE_OFFERINGS_TTL", default_value_t = 3 * 60)]
    pub unavailable_offerings_ttl: u64,

    /// OCI region, e.g. us-ashburn-1
    #[arg(long, env = "OCI_REGION", default_value = "")]
    pub region: String,

    /// Tenancy OCID used for API signing
    #[arg(long, env = "OCI_TENANCY", default_value = "")]
    pub tenancy: String,

    /// User OCID used for API signing
    #[arg(long, env = "OCI_USER", default_value = "")]
    pub user: String,

    /// API key fingerprint
    #[arg(long, env = "OCI_FINGERPRINT", default_value = "")]
    pub fingerprint: String,

    /// PEM private key for API signing
    #[arg(long, env = "OCI_KEY_FILE")]
    pub key_file: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            cluster_endpoint: String::new(),
            cluster_ca_bundle: String::new(),
            compartment_id: String::new(),
            tag_namespace: "karpenter".to_string(),
            availability_domains: Vec::new(),
            flexible_shape_ratios: vec![2.0, 4.0, 8.0],
            flexible_cpu_constraints: vec![1, 2, 4, 8, 16, 32, 48, 64, 96, 128],
            vm_memory_overhead_percent: 0.075,
            price_list_url: DEFAULT_PRICE_LIST_URL.to_string(),
            price_currency: "USD".to_string(),
            price_refresh_interval: 12 * 60 * 60,
            shape_cache_ttl: 5 * 60,
            unavailable_offerings_ttl: 3 * 60,
            region: String::new(),
            tenancy: String::new(),
            user: String::new(),
            fingerprint: String::new(),
            key_file: None,
        }
    }
}

impl Options {
    pub fn shape_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.shape_cache_ttl)
    }

    pub fn unavailable_offerings_ttl(&self) -> Duration {
        Duration::from_secs(self.unavailable_offerings_ttl)
    }

    pub fn price_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.price_refresh_interval)
    }

    /// Reject knob values that would produce unsafe instance types.
    pub fn validate(&self) -> Result<()> {
        if self.compartment_id.is_empty() {
            return Err(ProviderError::Configuration(
                "compartment id is required".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.vm_memory_overhead_percent) {
            return Err(ProviderError::Configuration(format!(
                "vm memory overhead percent must be in [0, 1), got {}",
                self.vm_memory_overhead_percent
            )));
        }
        if let Some(ratio) = self.flexible_shape_ratios.iter().find(|r| **r <= 0.0) {
            return Err(ProviderError::Configuration(format!(
                "flexible shape ratio must be positive, got {}",
                ratio
            )));
        }
        if self.flexible_cpu_constraints.contains(&0) {
            return Err(ProviderError::Configuration(
                "flexible cpu constraints must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
