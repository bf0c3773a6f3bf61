//! Shape catalog
//!
//! Lists compute shapes per availability domain, expands flexible shapes into
//! discrete (OCPU, memory) configurations and caches the merged result.

use crate::clock::{Clock, SystemClock};
use crate::error::{ProviderError, Result};
use crate::oci::models::Shape;
use crate::oci::{collect_pages, ComputeApi};
use crate::options::Options;
use crate::scheduling::{ARCH_AMD64, ARCH_ARM64};
use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Upper bound on VNICs OCI attaches to any single VM.
const MAX_VNICS: i64 = 24;

/// Map key identifying one launchable configuration
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeKey {
    pub name: String,
    pub cpu: i64,
    pub memory_gib: i64,
}

/// A shape with its computed launch dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedShape {
    pub shape: Shape,
    /// Instance type name; `<shape>-<ocpu>-<memGiB>` for flexible configurations
    pub name: String,
    /// vCPUs
    pub cpu: i64,
    pub ocpu: f64,
    pub memory_gib: i64,
    pub max_vnics: i64,
    pub zones: BTreeSet<String>,
    pub arch: &'static str,
}

impl WrappedShape {
    pub fn key(&self) -> ShapeKey {
        ShapeKey {
            name: self.name.clone(),
            cpu: self.cpu,
            memory_gib: self.memory_gib,
        }
    }

    pub fn is_flexible(&self) -> bool {
        self.shape.is_flexible.unwrap_or(false)
    }

    pub fn is_bare_metal(&self) -> bool {
        self.shape.shape.starts_with("BM.")
    }

    pub fn gpus(&self) -> i64 {
        self.shape.gpus.unwrap_or(0).max(0) as i64
    }

    /// Bare dimensions of a named shape, enough to price it.
    pub fn sized(shape_name: &str, cpu: i64, memory_gib: i64) -> Self {
        let ocpu = if is_single_threaded(shape_name) {
            cpu as f64
        } else {
            cpu as f64 / 2.0
        };
        let shape = Shape {
            shape: shape_name.to_string(),
            ocpus: Some(ocpu),
            memory_in_gbs: Some(memory_gib as f64),
            ..Default::default()
        };
        let arch = detect_arch(&shape);
        Self {
            shape,
            name: shape_name.to_string(),
            cpu,
            ocpu,
            memory_gib,
            max_vnics: 0,
            zones: BTreeSet::new(),
            arch,
        }
    }
}

/// Ampere A1 shapes expose one vCPU per OCPU.
fn is_single_threaded(shape: &str) -> bool {
    shape.split('.').any(|segment| segment == "A1")
}

fn detect_arch(shape: &Shape) -> &'static str {
    let family_is_arm = shape
        .shape
        .split('.')
        .any(|segment| segment == "A1" || segment == "A2");
    let processor = shape
        .processor_description
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    if family_is_arm || processor.contains("ampere") || processor.contains("aarch64") {
        ARCH_ARM64
    } else {
        ARCH_AMD64
    }
}

fn vcpus(shape: &str, ocpu: f64) -> i64 {
    if is_single_threaded(shape) {
        ocpu.round() as i64
    } else {
        (ocpu * 2.0).round() as i64
    }
}

fn flexible_max_vnics(shape: &Shape, ocpu: f64) -> i64 {
    let static_max = shape.max_vnic_attachments.unwrap_or(2) as i64;
    if ocpu <= 1.0 {
        return 2;
    }
    match shape
        .max_vnic_attachment_options
        .as_ref()
        .and_then(|o| o.default_per_ocpu)
    {
        Some(per_ocpu) => ((per_ocpu * ocpu).floor() as i64).min(MAX_VNICS),
        None => static_max,
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Expand one raw shape into its launchable configurations.
pub fn expand_shape(shape: &Shape, ratios: &[f64], cpu_constraints: &[u32]) -> Result<Vec<WrappedShape>> {
    let arch = detect_arch(shape);
    if !shape.is_flexible.unwrap_or(false) {
        let ocpu = shape.ocpus.unwrap_or(0.0);
        return Ok(vec![WrappedShape {
            shape: shape.clone(),
            name: shape.shape.clone(),
            cpu: vcpus(&shape.shape, ocpu),
            ocpu,
            memory_gib: shape.memory_in_gbs.unwrap_or(0.0).round() as i64,
            max_vnics: shape.max_vnic_attachments.unwrap_or(2) as i64,
            zones: BTreeSet::new(),
            arch,
        }]);
    }

    let ocpu_options = shape.ocpu_options.as_ref().ok_or_else(|| {
        ProviderError::Configuration(format!("flexible shape {} has no ocpu options", shape.shape))
    })?;
    let memory_options = shape.memory_options.as_ref().ok_or_else(|| {
        ProviderError::Configuration(format!("flexible shape {} has no memory options", shape.shape))
    })?;
    let (min_ocpu, max_ocpu) = (
        ocpu_options.min.unwrap_or(1.0),
        ocpu_options.max.unwrap_or(f64::MAX),
    );
    let (min_mem, max_mem) = (
        memory_options.min_in_gbs.unwrap_or(0.0),
        memory_options.max_in_gbs.unwrap_or(f64::MAX),
    );

    let mut out = Vec::new();
    for &ratio in ratios {
        if ratio <= 0.0 {
            return Err(ProviderError::Configuration(format!(
                "flexible shape ratio must be positive, got {}",
                ratio
            )));
        }
        for &constraint in cpu_constraints {
            let ocpu = constraint as f64;
            let memory = ocpu * 2.0 * ratio;
            if ocpu < min_ocpu || ocpu > max_ocpu || memory < min_mem || memory > max_mem {
                continue;
            }
            out.push(WrappedShape {
                shape: shape.clone(),
                name: format!(
                    "{}-{}-{}",
                    shape.shape,
                    format_number(ocpu),
                    format_number(memory)
                ),
                cpu: vcpus(&shape.shape, ocpu),
                ocpu,
                memory_gib: memory.round() as i64,
                max_vnics: flexible_max_vnics(shape, ocpu),
                zones: BTreeSet::new(),
                arch,
            });
        }
    }
    Ok(out)
}

struct CachedShapes {
    fetched_at: Instant,
    shapes: BTreeMap<ShapeKey, WrappedShape>,
}

pub struct ShapeProvider {
    compute: Arc<dyn ComputeApi>,
    compartment_id: String,
    availability_domains: Vec<String>,
    ratios: Vec<f64>,
    cpu_constraints: Vec<u32>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    cache: Mutex<HashMap<Vec<String>, CachedShapes>>,
}

impl ShapeProvider {
    pub fn new(compute: Arc<dyn ComputeApi>, options: &Options) -> Self {
        Self::with_clock(compute, options, Arc::new(SystemClock))
    }

    pub fn with_clock(compute: Arc<dyn ComputeApi>, options: &Options, clock: Arc<dyn Clock>) -> Self {
        Self {
            compute,
            compartment_id: options.compartment_id.clone(),
            availability_domains: options.availability_domains.clone(),
            ratios: options.flexible_shape_ratios.clone(),
            cpu_constraints: options.flexible_cpu_constraints.clone(),
            ttl: options.shape_cache_ttl(),
            clock,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Zones to list when the caller passes none.
    pub async fn zones(&self) -> Result<Vec<String>> {
        if !self.availability_domains.is_empty() {
            return Ok(self.availability_domains.clone());
        }
        let ads = self
            .compute
            .list_availability_domains(&self.compartment_id)
            .await?;
        Ok(ads.into_iter().map(|ad| ad.name).collect())
    }

    /// Launchable configurations across `zones`, each with the zones offering it.
    pub async fn list(&self, zones: &[String]) -> Result<BTreeMap<ShapeKey, WrappedShape>> {
        let mut zones = if zones.is_empty() {
            self.zones().await?
        } else {
            zones.to_vec()
        };
        zones.sort();
        zones.dedup();

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(&zones) {
            if self.clock.now().duration_since(cached.fetched_at) < self.ttl {
                return Ok(cached.shapes.clone());
            }
        }

        let fetches = zones.iter().map(|zone| async move {
            let shapes = collect_pages(|page| {
                self.compute
                    .list_shapes(&self.compartment_id, zone, page)
            })
            .await?;
            Ok::<_, ProviderError>((zone.clone(), shapes))
        });
        let per_zone = try_join_all(fetches).await?;

        let mut merged: BTreeMap<ShapeKey, WrappedShape> = BTreeMap::new();
        for (zone, shapes) in per_zone {
            debug!(zone = %zone, count = shapes.len(), "Listed shapes");
            for shape in &shapes {
                for wrapped in expand_shape(shape, &self.ratios, &self.cpu_constraints)? {
                    merged
                        .entry(wrapped.key())
                        .or_insert(wrapped)
                        .zones
                        .insert(zone.clone());
                }
            }
        }

        info!(zones = zones.len(), shapes = merged.len(), "Refreshed shape catalog");
        cache.insert(
            zones,
            CachedShapes {
                fetched_at: self.clock.now(),
                shapes: merged.clone(),
            },
        );
        Ok(merged)
    }

    pub async fn invalidate(&self) {
        self.cache.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::oci::fake::FakeOci;
    use crate::oci::models::{ShapeMaxVnicAttachmentOptions, ShapeMemoryOptions, ShapeOcpuOptions};

    fn e4_flex() -> Shape {
        Shape {
            shape: "VM.Standard.E4.Flex".to_string(),
            is_flexible: Some(true),
            ocpus: Some(1.0),
            memory_in_gbs: Some(16.0),
            ocpu_options: Some(ShapeOcpuOptions {
                min: Some(1.0),
                max: Some(4.0),
            }),
            memory_options: Some(ShapeMemoryOptions {
                min_in_gbs: Some(1.0),
                max_in_gbs: Some(32.0),
                default_per_ocpu_in_gbs: Some(16.0),
            }),
            max_vnic_attachments: Some(2),
            max_vnic_attachment_options: Some(ShapeMaxVnicAttachmentOptions {
                min: Some(2),
                max: Some(24.0),
                default_per_ocpu: Some(1.0),
            }),
            processor_description: Some("2.55 GHz AMD EPYC 7J13 (Milan)".to_string()),
            ..Default::default()
        }
    }

    fn standard2_1() -> Shape {
        Shape {
            shape: "VM.Standard2.1".to_string(),
            is_flexible: Some(false),
            ocpus: Some(1.0),
            memory_in_gbs: Some(15.0),
            max_vnic_attachments: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_fixed_shape() {
        let out = expand_shape(&standard2_1(), &[2.0], &[1]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "VM.Standard2.1");
        assert_eq!(out[0].cpu, 2);
        assert_eq!(out[0].memory_gib, 15);
        assert_eq!(out[0].arch, ARCH_AMD64);
    }

    #[test]
    fn test_a1_is_one_vcpu_per_ocpu() {
        let shape = Shape {
            shape: "BM.Standard.A1.160".to_string(),
            ocpus: Some(160.0),
            memory_in_gbs: Some(1024.0),
            processor_description: Some("3.0 GHz Ampere Altra".to_string()),
            ..Default::default()
        };
        let out = expand_shape(&shape, &[2.0], &[1]).unwrap();
        assert_eq!(out[0].cpu, 160);
        assert_eq!(out[0].arch, ARCH_ARM64);
    }

    #[test]
    fn test_sized() {
        let e4 = WrappedShape::sized("VM.Standard.E4.Flex", 4, 32);
        assert_eq!(e4.ocpu, 2.0);
        assert_eq!(e4.arch, ARCH_AMD64);
        let a1 = WrappedShape::sized("VM.Standard.A1.Flex", 4, 24);
        assert_eq!(a1.ocpu, 4.0);
        assert_eq!(a1.arch, ARCH_ARM64);
    }

    #[test]
    fn test_aarch64_processor_is_arm64() {
        let shape = Shape {
            shape: "VM.Standard.X.Flex".to_string(),
            is_flexible: Some(true),
            processor_description: Some("aarch64".to_string()),
            ..e4_flex()
        };
        let out = expand_shape(&shape, &[2.0], &[1]).unwrap();
        assert!(out.iter().all(|s| s.arch == ARCH_ARM64));
    }

    #[test]
    fn test_flexible_expansion_respects_bounds() {
        let ratios = [2.0, 4.0, 8.0];
        let constraints = [1, 2, 4, 8];
        let shape = e4_flex();
        let out = expand_shape(&shape, &ratios, &constraints).unwrap();

        for s in &out {
            assert!((1.0..=4.0).contains(&s.ocpu), "{} ocpu out of bounds", s.name);
            assert!(s.memory_gib >= 1 && s.memory_gib <= 32, "{} memory out of bounds", s.name);
        }
        let names: Vec<&str> = out.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"VM.Standard.E4.Flex-1-4"));
        assert!(names.contains(&"VM.Standard.E4.Flex-2-32"));
        // 8 OCPUs exceeds max; 4 OCPUs at ratio 8 is 64 GiB
        assert!(!names.iter().any(|n| n.starts_with("VM.Standard.E4.Flex-8-")));
        assert!(!names.contains(&"VM.Standard.E4.Flex-4-64"));
    }

    #[test]
    fn test_flexible_vnics() {
        let out = expand_shape(&e4_flex(), &[2.0], &[1, 4]).unwrap();
        assert_eq!(out[0].max_vnics, 2);
        assert_eq!(out[1].max_vnics, 4);

        let mut big = e4_flex();
        big.ocpu_options = Some(ShapeOcpuOptions {
            min: Some(1.0),
            max: Some(64.0),
        });
        big.memory_options.as_mut().unwrap().max_in_gbs = Some(1024.0);
        let out = expand_shape(&big, &[2.0], &[48]).unwrap();
        assert_eq!(out[0].max_vnics, MAX_VNICS);
    }

    #[test]
    fn test_flexible_without_bounds_fails() {
        let mut shape = e4_flex();
        shape.memory_options = None;
        let err = expand_shape(&shape, &[2.0], &[1]).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        let err = expand_shape(&e4_flex(), &[0.0], &[1]).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    fn options() -> Options {
        Options {
            compartment_id: "ocid1.compartment.test".to_string(),
            flexible_shape_ratios: vec![4.0],
            flexible_cpu_constraints: vec![1, 2],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_merges_zones_and_caches() {
        let fake = Arc::new(FakeOci::new());
        fake.add_shape("AD-1", standard2_1());
        fake.add_shape("AD-1", e4_flex());
        fake.add_shape("AD-2", e4_flex());
        let clock = Arc::new(FakeClock::new());
        let provider = ShapeProvider::with_clock(fake.clone(), &options(), clock.clone());

        let shapes = provider.list(&[]).await.unwrap();
        let flex = shapes
            .values()
            .find(|s| s.name == "VM.Standard.E4.Flex-1-8")
            .unwrap();
        assert_eq!(flex.zones.iter().cloned().collect::<Vec<_>>(), vec!["AD-1", "AD-2"]);
        let fixed = shapes.values().find(|s| s.name == "VM.Standard2.1").unwrap();
        assert_eq!(fixed.zones.len(), 1);

        let calls = fake.list_shapes_calls();
        provider.list(&[]).await.unwrap();
        assert_eq!(fake.list_shapes_calls(), calls);

        clock.advance(Duration::from_secs(301));
        provider.list(&[]).await.unwrap();
        assert!(fake.list_shapes_calls() > calls);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_cache_empty() {
        let fake = Arc::new(FakeOci::new());
        let mut broken = e4_flex();
        broken.ocpu_options = None;
        fake.add_shape("AD-1", broken);
        let provider = ShapeProvider::new(fake.clone(), &options());

        assert!(provider.list(&[]).await.is_err());
        assert!(provider.cache.lock().await.is_empty());
    }
}
