//! Instance types offered to the scheduler

use crate::crd::{KubeletConfiguration, OciNodeClass};
use crate::error::Result;
use crate::providers::capacity;
use crate::providers::pricing::PricingProvider;
use crate::providers::shape::{ShapeProvider, WrappedShape};
use crate::providers::unavailable::UnavailableOfferings;
use crate::scheduling::{
    InstanceType, Offering, Operator, Requirement, Requirements, CAPACITY_TYPE_ON_DEMAND,
    CAPACITY_TYPE_PREEMPTIBLE, LABEL_ARCH, LABEL_CAPACITY_TYPE, LABEL_INSTANCE_CPU,
    LABEL_INSTANCE_FLEXIBLE, LABEL_INSTANCE_GPU, LABEL_INSTANCE_GPU_DESCRIPTION,
    LABEL_INSTANCE_MEMORY, LABEL_INSTANCE_NETWORK_BANDWIDTH, LABEL_INSTANCE_OCPU,
    LABEL_INSTANCE_TYPE, LABEL_OS, LABEL_SHAPE_NAME, LABEL_ZONE, OS_LINUX,
};
use std::sync::Arc;
use tracing::debug;

pub struct InstanceTypeProvider {
    shapes: Arc<ShapeProvider>,
    pricing: Arc<PricingProvider>,
    unavailable: Arc<UnavailableOfferings>,
    vm_memory_overhead_percent: f64,
}

fn format_ocpu(ocpu: f64) -> String {
    if ocpu.fract() == 0.0 {
        format!("{}", ocpu as i64)
    } else {
        format!("{}", ocpu)
    }
}

/// Capacity types a shape can be bought as; bare metal has no preemptible pool.
pub fn capacity_types(shape: &WrappedShape) -> Vec<&'static str> {
    if shape.is_bare_metal() {
        vec![CAPACITY_TYPE_ON_DEMAND]
    } else {
        vec![CAPACITY_TYPE_ON_DEMAND, CAPACITY_TYPE_PREEMPTIBLE]
    }
}

pub fn requirements(shape: &WrappedShape) -> Requirements {
    let mut reqs = Requirements::new()
        .with(Requirement::new(LABEL_INSTANCE_TYPE, Operator::In, [shape.name.as_str()]))
        .with(Requirement::new(LABEL_ARCH, Operator::In, [shape.arch]))
        .with(Requirement::new(LABEL_OS, Operator::In, [OS_LINUX]))
        .with(Requirement::new(LABEL_ZONE, Operator::In, shape.zones.iter().cloned()))
        .with(Requirement::new(LABEL_CAPACITY_TYPE, Operator::In, capacity_types(shape)))
        .with(Requirement::new(LABEL_SHAPE_NAME, Operator::In, [shape.shape.shape.as_str()]))
        .with(Requirement::new(LABEL_INSTANCE_CPU, Operator::In, [shape.cpu.to_string()]))
        .with(Requirement::new(LABEL_INSTANCE_OCPU, Operator::In, [format_ocpu(shape.ocpu)]))
        .with(Requirement::new(
            LABEL_INSTANCE_MEMORY,
            Operator::In,
            [(shape.memory_gib * 1024).to_string()],
        ))
        .with(Requirement::new(
            LABEL_INSTANCE_FLEXIBLE,
            Operator::In,
            [shape.is_flexible().to_string()],
        ));
    let gpu_description = shape
        .shape
        .gpu_description
        .as_ref()
        .filter(|_| shape.gpus() > 0)
        .map(|d| d.replace(' ', "-"));
    let bandwidth = shape
        .shape
        .networking_bandwidth_in_gbps
        .map(|gbps| ((gbps * 1000.0).round() as i64).to_string());
    reqs.add(optional(
        LABEL_INSTANCE_GPU,
        (shape.gpus() > 0).then(|| shape.gpus().to_string()),
    ));
    reqs.add(optional(LABEL_INSTANCE_GPU_DESCRIPTION, gpu_description));
    reqs.add(optional(LABEL_INSTANCE_NETWORK_BANDWIDTH, bandwidth));
    reqs
}

/// `In [value]` when the shape has the value, `DoesNotExist` otherwise.
fn optional(key: &str, value: Option<String>) -> Requirement {
    match value {
        Some(value) => Requirement::new(key, Operator::In, [value]),
        None => Requirement::new(key, Operator::DoesNotExist, Vec::<String>::new()),
    }
}

impl InstanceTypeProvider {
    pub fn new(
        shapes: Arc<ShapeProvider>,
        pricing: Arc<PricingProvider>,
        unavailable: Arc<UnavailableOfferings>,
        vm_memory_overhead_percent: f64,
    ) -> Self {
        Self {
            shapes,
            pricing,
            unavailable,
            vm_memory_overhead_percent,
        }
    }

    /// Offerings for every zone and capacity type, availability from the tracker.
    pub fn offerings(&self, shape: &WrappedShape) -> Vec<Offering> {
        let on_demand = self.pricing.price(shape);
        let mut out = Vec::new();
        for zone in &shape.zones {
            for capacity_type in capacity_types(shape) {
                let price = if capacity_type == CAPACITY_TYPE_PREEMPTIBLE {
                    self.pricing.preemptible_price(shape)
                } else {
                    on_demand
                };
                out.push(Offering {
                    zone: zone.clone(),
                    capacity_type: capacity_type.to_string(),
                    price,
                    available: !self
                        .unavailable
                        .is_unavailable(&shape.name, zone, capacity_type),
                });
            }
        }
        out
    }

    pub fn build(
        &self,
        shape: &WrappedShape,
        kubelet: &KubeletConfiguration,
        node_class: &OciNodeClass,
    ) -> Result<InstanceType> {
        let boot = node_class.boot_config()?;
        Ok(InstanceType {
            name: shape.name.clone(),
            requirements: requirements(shape),
            capacity: capacity::capacity(shape, kubelet, boot, self.vm_memory_overhead_percent),
            overhead: capacity::overhead(shape, kubelet, boot, self.vm_memory_overhead_percent)?,
            offerings: self.offerings(shape),
        })
    }

    /// Every launchable configuration, with offerings recomputed on each call.
    pub async fn list(
        &self,
        kubelet: &KubeletConfiguration,
        node_class: &OciNodeClass,
    ) -> Result<Vec<InstanceType>> {
        node_class.boot_config()?;
        let shapes = self.shapes.list(&[]).await?;
        let instance_types = shapes
            .values()
            .map(|shape| self.build(shape, kubelet, node_class))
            .collect::<Result<Vec<_>>>()?;
        debug!(count = instance_types.len(), "Built instance types");
        Ok(instance_types)
    }
}
