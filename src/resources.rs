//! Resource names and Kubernetes quantity helpers

use crate::error::{ProviderError, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const EPHEMERAL_STORAGE: &str = "ephemeral-storage";
pub const PODS: &str = "pods";
pub const NVIDIA_GPU: &str = "nvidia.com/gpu";

/// Resource name to quantity, the shape kubelet and the scheduler use.
pub type ResourceList = BTreeMap<String, Quantity>;

const MIB: f64 = 1024.0 * 1024.0;

pub fn cpu_millis(millis: i64) -> Quantity {
    if millis % 1000 == 0 {
        Quantity((millis / 1000).to_string())
    } else {
        Quantity(format!("{}m", millis))
    }
}

pub fn mebibytes(mib: i64) -> Quantity {
    Quantity(format!("{}Mi", mib))
}

pub fn gibibytes(gib: i64) -> Quantity {
    Quantity(format!("{}Gi", gib))
}

pub fn count(n: i64) -> Quantity {
    Quantity(n.to_string())
}

/// Parse a quantity string into its base unit (cores for cpu, bytes for memory).
pub fn parse_quantity(raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(trimmed.len());
    let (mut number, mut suffix) = trimmed.split_at(split);
    // `1e3` and `2.5E-3` are decimal exponents; a bare `E` is exa
    if let Some(rest) = suffix.strip_prefix(['e', 'E']) {
        let digits = rest.strip_prefix(['+', '-']).unwrap_or(rest);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            number = trimmed;
            suffix = "";
        }
    }
    let value: f64 = number.parse().map_err(|_| {
        ProviderError::Configuration(format!("invalid quantity \"{}\"", raw))
    })?;
    let multiplier = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => MIB,
        "Gi" => MIB * 1024.0,
        "Ti" => MIB * 1024.0 * 1024.0,
        "Pi" => MIB * 1024.0 * 1024.0 * 1024.0,
        "Ei" => MIB * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => {
            return Err(ProviderError::Configuration(format!(
                "unsupported quantity suffix \"{}\" in \"{}\"",
                other, raw
            )))
        }
    };
    Ok(value * multiplier)
}

/// Parse a cpu quantity into millicores.
pub fn parse_cpu_millis(raw: &str) -> Result<i64> {
    Ok((parse_quantity(raw)? * 1000.0).round() as i64)
}

/// Parse a byte quantity into MiB, rounding up.
pub fn parse_mebibytes(raw: &str) -> Result<i64> {
    Ok((parse_quantity(raw)? / MIB).ceil() as i64)
}

/// Eviction signal value: a share of capacity or an absolute quantity.
#[derive(Debug, Clone, PartialEq)]
pub enum Threshold {
    Percent(f64),
    Absolute(String),
}

impl Threshold {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match raw.strip_suffix('%') {
            Some(pct) => {
                let value: f64 = pct.parse().map_err(|_| {
                    ProviderError::Configuration(format!("invalid percentage \"{}\"", raw))
                })?;
                if !(0.0..=100.0).contains(&value) {
                    return Err(ProviderError::Configuration(format!(
                        "percentage out of range \"{}\"",
                        raw
                    )));
                }
                Ok(Threshold::Percent(value))
            }
            None => {
                parse_quantity(raw)?;
                Ok(Threshold::Absolute(raw.to_string()))
            }
        }
    }

    /// Resolve against a capacity in MiB. 100% disables the signal.
    pub fn resolve_mebibytes(&self, capacity_mib: i64) -> Result<i64> {
        match self {
            Threshold::Percent(pct) if *pct >= 100.0 => Ok(0),
            Threshold::Percent(pct) => Ok((capacity_mib as f64 * pct / 100.0).ceil() as i64),
            Threshold::Absolute(raw) => parse_mebibytes(raw),
        }
    }
}
