//! Price list model and per-shape price calculation

use super::parse::{parse_shape, FALLBACK_CATEGORIES};
use crate::providers::shape::WrappedShape;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const PAY_AS_YOU_GO: &str = "PAY_AS_YOU_GO";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceCatalog {
    #[serde(default)]
    pub items: Vec<PriceItem>,
    /// Currency prices are read in; set by the caller, not the payload
    #[serde(skip, default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceItem {
    pub part_number: String,
    pub display_name: String,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub service_category: String,
    #[serde(default)]
    pub currency_code_localizations: Vec<CurrencyLocalization>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyLocalization {
    pub currency_code: String,
    #[serde(default)]
    pub prices: Vec<Price>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Price {
    pub model: String,
    pub value: f64,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl PriceItem {
    /// Pay-as-you-go unit price, or the first listed price for the currency.
    pub fn unit_price(&self, currency: &str) -> Option<f64> {
        let localization = self
            .currency_code_localizations
            .iter()
            .find(|l| l.currency_code == currency)?;
        localization
            .prices
            .iter()
            .find(|p| p.model == PAY_AS_YOU_GO)
            .or_else(|| localization.prices.first())
            .map(|p| p.value)
    }

    fn is_hourly_commitment(&self) -> bool {
        self.display_name.to_lowercase().contains("hourly commitment")
    }

    fn is_term_commitment(&self) -> bool {
        let name = self.display_name.to_lowercase();
        name.contains("commitment") && !name.contains("hourly commitment")
    }

    /// Units of this item's metric one instance of `shape` consumes.
    fn quantity(&self, shape: &WrappedShape) -> f64 {
        let metric = self.metric_name.to_lowercase();
        if metric.contains("gpu") {
            shape.gpus() as f64
        } else if metric.contains("nvme") || metric.contains("terabyte") {
            shape.shape.local_disks_total_size_in_gbs.unwrap_or(0.0) / 1000.0
        } else if metric.contains("ocpu") {
            shape.ocpu
        } else if metric.contains("gigabyte") || metric.contains("memory") {
            shape.memory_gib as f64
        } else if metric.contains("node") {
            1.0
        } else {
            0.0
        }
    }
}

impl PriceCatalog {
    pub fn parse(raw: &str, currency: &str) -> serde_json::Result<Self> {
        let mut catalog: PriceCatalog = serde_json::from_str(raw)?;
        catalog.currency = currency.to_string();
        Ok(catalog)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn matching<'a>(&'a self, category: &str, pattern: &Regex) -> Vec<&'a PriceItem> {
        self.items
            .iter()
            .filter(|item| item.service_category == category)
            .filter(|item| pattern.is_match(&item.display_name))
            .collect()
    }

    /// Price items billed for a shape, by service category and display name.
    pub fn find_price_items(&self, shape_name: &str) -> Vec<&PriceItem> {
        let parsed = parse_shape(shape_name);
        let Ok(pattern) = Regex::new(&format!(r"\b{}\b", regex::escape(&parsed.pattern()))) else {
            return Vec::new();
        };
        let items = self.matching(parsed.category, &pattern);
        if !items.is_empty() {
            return items;
        }
        FALLBACK_CATEGORIES
            .iter()
            .filter(|c| **c != parsed.category)
            .map(|c| self.matching(c, &pattern))
            .find(|items| !items.is_empty())
            .unwrap_or_default()
    }

    /// Hourly price of one instance; `INFINITY` when the shape has no price.
    pub fn calculate(&self, shape: &WrappedShape) -> f64 {
        if self.is_empty() {
            return 8.0 * (shape.cpu as f64 / 2.0) + shape.memory_gib as f64;
        }
        let items = self.find_price_items(&shape.shape.shape);
        match items.as_slice() {
            [] => f64::INFINITY,
            [item] => item
                .unit_price(&self.currency)
                .map_or(f64::INFINITY, |unit| unit * item.quantity(shape)),
            _ => {
                let mut total = 0.0;
                for item in &items {
                    if item.is_term_commitment() {
                        continue;
                    }
                    let Some(unit) = item.unit_price(&self.currency) else {
                        continue;
                    };
                    if item.is_hourly_commitment() {
                        return unit * item.quantity(shape);
                    }
                    total += unit * item.quantity(shape);
                }
                total
            }
        }
    }
}
