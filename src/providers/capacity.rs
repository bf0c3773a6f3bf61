//! Node capacity and reserved overhead
//!
//! Pure functions from a shape configuration and kubelet settings to the
//! resources a node reports and the share reserved for system daemons.

use crate::crd::{BootConfig, KubeletConfiguration};
use crate::error::Result;
use crate::providers::shape::WrappedShape;
use crate::resources::{
    self, count, cpu_millis, gibibytes, mebibytes, parse_cpu_millis, parse_mebibytes, Threshold,
    ResourceList, CPU, EPHEMERAL_STORAGE, MEMORY, NVIDIA_GPU, PODS,
};
use crate::scheduling::InstanceTypeOverhead;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub const DEFAULT_MAX_PODS: i64 = 110;
/// Secondary IPs each additional VNIC contributes to pod networking.
pub const PODS_PER_VNIC: i64 = 31;

const MEMORY_AVAILABLE: &str = "memory.available";
const NODEFS_AVAILABLE: &str = "nodefs.available";
const DEFAULT_EVICTION_MEMORY: &str = "100Mi";
const DEFAULT_EVICTION_NODEFS: &str = "10%";

/// (bracket width, rate); the last bracket is open-ended.
type TaxTable = [(f64, f64)];

const KUBE_RESERVED_MEMORY_MIB: &TaxTable = &[
    (4096.0, 0.25),
    (4096.0, 0.20),
    (8192.0, 0.10),
    (114688.0, 0.06),
    (f64::INFINITY, 0.02),
];
const KUBE_RESERVED_CPU_MILLIS: &TaxTable = &[
    (1000.0, 0.06),
    (1000.0, 0.01),
    (2000.0, 0.005),
    (f64::INFINITY, 0.0025),
];
const SYSTEM_RESERVED_MEMORY_MIB: &TaxTable = &[
    (4096.0, 0.05),
    (4096.0, 0.04),
    (8192.0, 0.02),
    (f64::INFINITY, 0.01),
];
const SYSTEM_RESERVED_CPU_MILLIS: &TaxTable = &[
    (1000.0, 0.03),
    (1000.0, 0.005),
    (2000.0, 0.0025),
    (f64::INFINITY, 0.00125),
];

fn tax(amount: f64, table: &TaxTable) -> f64 {
    let mut remaining = amount;
    let mut total = 0.0;
    for &(width, rate) in table {
        if remaining <= 0.0 {
            break;
        }
        let taxed = remaining.min(width);
        total += taxed * rate;
        remaining -= taxed;
    }
    total
}

fn memory_mib(shape: &WrappedShape) -> i64 {
    shape.memory_gib * 1024
}

/// Pods the node can run: the configured limit capped by VNIC-backed pod IPs.
pub fn pods(shape: &WrappedShape, kubelet: &KubeletConfiguration) -> i64 {
    let mut limit = kubelet.max_pods.map_or(DEFAULT_MAX_PODS, i64::from);
    if let Some(per_core) = kubelet.pods_per_core.filter(|p| *p > 0) {
        limit = limit.min(i64::from(per_core) * shape.cpu);
    }
    let vnic_cap = (shape.max_vnics - 1).max(0) * PODS_PER_VNIC;
    limit.min(vnic_cap).max(0)
}

/// Memory the guest sees after hypervisor overhead, in MiB.
pub fn allocatable_memory_mib(shape: &WrappedShape, vm_memory_overhead_percent: f64) -> i64 {
    let total = memory_mib(shape);
    total - (total as f64 * vm_memory_overhead_percent).ceil() as i64
}

pub fn capacity(
    shape: &WrappedShape,
    kubelet: &KubeletConfiguration,
    boot: &BootConfig,
    vm_memory_overhead_percent: f64,
) -> ResourceList {
    let mut out = ResourceList::new();
    out.insert(CPU.to_string(), count(shape.cpu));
    out.insert(
        MEMORY.to_string(),
        mebibytes(allocatable_memory_mib(shape, vm_memory_overhead_percent)),
    );
    out.insert(
        EPHEMERAL_STORAGE.to_string(),
        gibibytes(boot.boot_volume_size_in_gbs),
    );
    out.insert(PODS.to_string(), count(pods(shape, kubelet)));
    if shape.gpus() > 0 {
        out.insert(NVIDIA_GPU.to_string(), count(shape.gpus()));
    }
    out
}

fn reserved(
    shape: &WrappedShape,
    overrides: &std::collections::BTreeMap<String, String>,
    cpu_table: &TaxTable,
    memory_table: &TaxTable,
) -> Result<ResourceList> {
    let mut out = ResourceList::new();
    out.insert(
        CPU.to_string(),
        cpu_millis(tax((shape.cpu * 1000) as f64, cpu_table).round() as i64),
    );
    out.insert(
        MEMORY.to_string(),
        mebibytes(tax(memory_mib(shape) as f64, memory_table).ceil() as i64),
    );
    for (resource, raw) in overrides {
        let quantity = match resource.as_str() {
            CPU => cpu_millis(parse_cpu_millis(raw)?),
            MEMORY | EPHEMERAL_STORAGE => mebibytes(parse_mebibytes(raw)?),
            _ => {
                resources::parse_quantity(raw)?;
                Quantity(raw.clone())
            }
        };
        out.insert(resource.clone(), quantity);
    }
    Ok(out)
}

pub fn kube_reserved(shape: &WrappedShape, kubelet: &KubeletConfiguration) -> Result<ResourceList> {
    reserved(
        shape,
        &kubelet.kube_reserved,
        KUBE_RESERVED_CPU_MILLIS,
        KUBE_RESERVED_MEMORY_MIB,
    )
}

pub fn system_reserved(shape: &WrappedShape, kubelet: &KubeletConfiguration) -> Result<ResourceList> {
    reserved(
        shape,
        &kubelet.system_reserved,
        SYSTEM_RESERVED_CPU_MILLIS,
        SYSTEM_RESERVED_MEMORY_MIB,
    )
}

/// Hard eviction thresholds; `100%` disables a signal.
pub fn eviction_threshold(
    shape: &WrappedShape,
    kubelet: &KubeletConfiguration,
    boot: &BootConfig,
    vm_memory_overhead_percent: f64,
) -> Result<ResourceList> {
    let signal = |name: &str, default: &str| {
        Threshold::parse(
            kubelet
                .eviction_hard
                .get(name)
                .map(String::as_str)
                .unwrap_or(default),
        )
    };
    let memory_capacity = allocatable_memory_mib(shape, vm_memory_overhead_percent);
    let storage_capacity = boot.boot_volume_size_in_gbs * 1024;

    let mut out = ResourceList::new();
    out.insert(
        MEMORY.to_string(),
        mebibytes(signal(MEMORY_AVAILABLE, DEFAULT_EVICTION_MEMORY)?.resolve_mebibytes(memory_capacity)?),
    );
    out.insert(
        EPHEMERAL_STORAGE.to_string(),
        mebibytes(signal(NODEFS_AVAILABLE, DEFAULT_EVICTION_NODEFS)?.resolve_mebibytes(storage_capacity)?),
    );
    Ok(out)
}

pub fn overhead(
    shape: &WrappedShape,
    kubelet: &KubeletConfiguration,
    boot: &BootConfig,
    vm_memory_overhead_percent: f64,
) -> Result<InstanceTypeOverhead> {
    Ok(InstanceTypeOverhead {
        kube_reserved: kube_reserved(shape, kubelet)?,
        system_reserved: system_reserved(shape, kubelet)?,
        eviction_threshold: eviction_threshold(shape, kubelet, boot, vm_memory_overhead_percent)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::models::Shape;
    use crate::providers::shape::expand_shape;

    fn boot() -> BootConfig {
        BootConfig {
            boot_volume_size_in_gbs: 50,
            boot_volume_vpus_per_gb: 10,
        }
    }

    fn shape(ocpus: f64, memory: f64, max_vnics: i32) -> WrappedShape {
        let raw = Shape {
            shape: "VM.Standard.E4.Flex".to_string(),
            ocpus: Some(ocpus),
            memory_in_gbs: Some(memory),
            max_vnic_attachments: Some(max_vnics),
            ..Default::default()
        };
        expand_shape(&raw, &[], &[]).unwrap().remove(0)
    }

    #[test]
    fn test_tax_brackets() {
        assert_eq!(tax(4096.0, KUBE_RESERVED_MEMORY_MIB), 1024.0);
        assert!((tax(8192.0, KUBE_RESERVED_MEMORY_MIB) - 1843.2).abs() < 1e-9);
        assert!((tax(2000.0, KUBE_RESERVED_CPU_MILLIS) - 70.0).abs() < 1e-9);
        assert!((tax(8000.0, KUBE_RESERVED_CPU_MILLIS) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_reservations() {
        let s = shape(1.0, 8.0, 2);
        let kc = KubeletConfiguration::default();
        let kube = kube_reserved(&s, &kc).unwrap();
        assert_eq!(kube[CPU].0, "70m");
        assert_eq!(kube[MEMORY].0, "1844Mi");
        let system = system_reserved(&s, &kc).unwrap();
        assert_eq!(system[CPU].0, "35m");
        assert_eq!(system[MEMORY].0, "369Mi");
    }

    #[test]
    fn test_reservation_overrides() {
        let s = shape(1.0, 8.0, 2);
        let kc = KubeletConfiguration {
            kube_reserved: [("cpu".to_string(), "200m".to_string())].into(),
            system_reserved: [("memory".to_string(), "1Gi".to_string())].into(),
            ..Default::default()
        };
        let kube = kube_reserved(&s, &kc).unwrap();
        assert_eq!(kube[CPU].0, "200m");
        assert_eq!(kube[MEMORY].0, "1844Mi");
        let system = system_reserved(&s, &kc).unwrap();
        assert_eq!(system[MEMORY].0, "1024Mi");
    }

    #[test]
    fn test_capacity() {
        let s = shape(2.0, 32.0, 2);
        let boot = boot();
        let cap = capacity(&s, &KubeletConfiguration::default(), &boot, 0.075);
        assert_eq!(cap[CPU].0, "4");
        // 32768 - ceil(32768 * 0.075)
        assert_eq!(cap[MEMORY].0, "30310Mi");
        assert_eq!(cap[EPHEMERAL_STORAGE].0, "50Gi");
        assert_eq!(cap[PODS].0, "31");
        assert!(!cap.contains_key(NVIDIA_GPU));
    }

    #[test]
    fn test_pods_monotonic_and_capped() {
        let s = shape(8.0, 128.0, 4);
        let cap = (4 - 1) * PODS_PER_VNIC;
        let mut previous = i64::MAX;
        for max_pods in (0..=200).rev() {
            let kc = KubeletConfiguration {
                max_pods: Some(max_pods),
                ..Default::default()
            };
            let p = pods(&s, &kc);
            assert!(p <= cap);
            assert!(p <= previous);
            previous = p;
        }
        assert_eq!(pods(&s, &KubeletConfiguration::default()), cap);
    }

    #[test]
    fn test_pods_per_core() {
        let s = shape(8.0, 128.0, 24);
        let kc = KubeletConfiguration {
            pods_per_core: Some(4),
            ..Default::default()
        };
        assert_eq!(pods(&s, &kc), 64);
        assert_eq!(pods(&s, &KubeletConfiguration::default()), DEFAULT_MAX_PODS);
    }

    #[test]
    fn test_eviction_defaults_and_overrides() {
        let s = shape(1.0, 8.0, 2);
        let boot = boot();
        let evict = eviction_threshold(&s, &KubeletConfiguration::default(), &boot, 0.0).unwrap();
        assert_eq!(evict[MEMORY].0, "100Mi");
        assert_eq!(evict[EPHEMERAL_STORAGE].0, "5120Mi");

        let kc = KubeletConfiguration {
            eviction_hard: [
                ("memory.available".to_string(), "10%".to_string()),
                ("nodefs.available".to_string(), "100%".to_string()),
            ]
            .into(),
            ..Default::default()
        };
        let evict = eviction_threshold(&s, &kc, &boot, 0.0).unwrap();
        assert_eq!(evict[MEMORY].0, "820Mi");
        assert_eq!(evict[EPHEMERAL_STORAGE].0, "0Mi");
    }

    #[test]
    fn test_overhead_is_deterministic() {
        let s = shape(4.0, 64.0, 4);
        let kc = KubeletConfiguration::default();
        let boot = boot();
        let first = overhead(&s, &kc, &boot, 0.075).unwrap();
        for _ in 0..5 {
            assert_eq!(overhead(&s, &kc, &boot, 0.075).unwrap(), first);
        }
    }

    #[test]
    fn test_invalid_override_fails() {
        let s = shape(1.0, 8.0, 2);
        let kc = KubeletConfiguration {
            eviction_hard: [("memory.available".to_string(), "lots".to_string())].into(),
            ..Default::default()
        };
        assert!(eviction_threshold(&s, &kc, &boot(), 0.0).is_err());
    }
}
