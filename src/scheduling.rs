//! Scheduling model handed to Karpenter
//!
//! Well-known labels, node selector requirement algebra, offerings and the
//! instance types built from OCI shapes.

use crate::resources::ResourceList;
use std::collections::{BTreeMap, BTreeSet};

// Kubernetes well-known labels
pub const LABEL_ARCH: &str = "kubernetes.io/arch";
pub const LABEL_OS: &str = "kubernetes.io/os";
pub const LABEL_INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";
pub const LABEL_ZONE: &str = "topology.kubernetes.io/zone";

// Karpenter labels
pub const LABEL_CAPACITY_TYPE: &str = "karpenter.sh/capacity-type";
pub const LABEL_NODEPOOL: &str = "karpenter.sh/nodepool";

// OCI labels
pub const LABEL_SHAPE_NAME: &str = "karpenter.k8s.oracle/instance-shape-name";
pub const LABEL_INSTANCE_CPU: &str = "karpenter.k8s.oracle/instance-cpu";
pub const LABEL_INSTANCE_OCPU: &str = "karpenter.k8s.oracle/instance-ocpu";
pub const LABEL_INSTANCE_MEMORY: &str = "karpenter.k8s.oracle/instance-memory";
pub const LABEL_INSTANCE_GPU: &str = "karpenter.k8s.oracle/instance-gpu";
pub const LABEL_INSTANCE_GPU_DESCRIPTION: &str = "karpenter.k8s.oracle/instance-gpu-description";
pub const LABEL_INSTANCE_NETWORK_BANDWIDTH: &str =
    "karpenter.k8s.oracle/instance-network-bandwidth";
pub const LABEL_INSTANCE_FLEXIBLE: &str = "karpenter.k8s.oracle/instance-flexible";

pub const CAPACITY_TYPE_ON_DEMAND: &str = "on-demand";
pub const CAPACITY_TYPE_PREEMPTIBLE: &str = "preemptible";

pub const ARCH_AMD64: &str = "amd64";
pub const ARCH_ARM64: &str = "arm64";
pub const OS_LINUX: &str = "linux";

/// Labels every instance type describes, including the optional ones it
/// marks `DoesNotExist`. Claim keys outside this set are node labels the
/// instance type has no say over.
pub const INSTANCE_TYPE_LABELS: &[&str] = &[
    LABEL_ARCH,
    LABEL_OS,
    LABEL_INSTANCE_TYPE,
    LABEL_ZONE,
    LABEL_CAPACITY_TYPE,
    LABEL_SHAPE_NAME,
    LABEL_INSTANCE_CPU,
    LABEL_INSTANCE_OCPU,
    LABEL_INSTANCE_MEMORY,
    LABEL_INSTANCE_GPU,
    LABEL_INSTANCE_GPU_DESCRIPTION,
    LABEL_INSTANCE_NETWORK_BANDWIDTH,
    LABEL_INSTANCE_FLEXIBLE,
];

/// Node selector operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

impl Operator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "In" => Some(Operator::In),
            "NotIn" => Some(Operator::NotIn),
            "Exists" => Some(Operator::Exists),
            "DoesNotExist" => Some(Operator::DoesNotExist),
            "Gt" => Some(Operator::Gt),
            "Lt" => Some(Operator::Lt),
            _ => None,
        }
    }
}

/// A set of allowed values for one label key.
///
/// A complemented requirement allows every value except `values`; bounds
/// restrict integer-valued labels further. A `Gt`/`Lt` bound that is not an
/// integer admits no value.
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub key: String,
    complement: bool,
    values: BTreeSet<String>,
    greater_than: Option<i64>,
    less_than: Option<i64>,
}

impl Requirement {
    pub fn new<I, S>(key: &str, operator: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        let bound = |unparsable: i64| {
            values
                .iter()
                .next()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(unparsable)
        };
        let (complement, values, greater_than, less_than) = match operator {
            Operator::In => (false, values.clone(), None, None),
            Operator::NotIn => (true, values.clone(), None, None),
            Operator::Exists => (true, BTreeSet::new(), None, None),
            Operator::DoesNotExist => (false, BTreeSet::new(), None, None),
            Operator::Gt => (true, BTreeSet::new(), Some(bound(i64::MAX)), None),
            Operator::Lt => (true, BTreeSet::new(), None, Some(bound(i64::MIN))),
        };
        Self {
            key: key.to_string(),
            complement,
            values,
            greater_than,
            less_than,
        }
    }

    /// True when `value` satisfies this requirement.
    pub fn has(&self, value: &str) -> bool {
        if !self.within_bounds(value) {
            return false;
        }
        if self.complement {
            !self.values.contains(value)
        } else {
            self.values.contains(value)
        }
    }

    fn within_bounds(&self, value: &str) -> bool {
        if self.greater_than.is_none() && self.less_than.is_none() {
            return true;
        }
        let Ok(n) = value.parse::<i64>() else {
            return false;
        };
        self.greater_than.map_or(true, |gt| n > gt) && self.less_than.map_or(true, |lt| n < lt)
    }

    /// Explicit allowed values; empty for complemented requirements.
    pub fn values(&self) -> Vec<String> {
        if self.complement {
            Vec::new()
        } else {
            self.values.iter().cloned().collect()
        }
    }

    pub fn any(&self) -> Option<String> {
        if self.complement {
            None
        } else {
            self.values.iter().next().cloned()
        }
    }

    pub fn is_complement(&self) -> bool {
        self.complement
    }

    pub fn operator(&self) -> Operator {
        match (self.complement, self.values.is_empty()) {
            (false, true) => Operator::DoesNotExist,
            (false, false) => Operator::In,
            (true, false) => Operator::NotIn,
            (true, true) => match (self.greater_than, self.less_than) {
                (Some(_), _) => Operator::Gt,
                (None, Some(_)) => Operator::Lt,
                (None, None) => Operator::Exists,
            },
        }
    }

    /// True when only a node carrying the key can satisfy the requirement.
    pub fn requires_key(&self) -> bool {
        !matches!(self.operator(), Operator::NotIn | Operator::DoesNotExist)
    }

    pub fn intersection(&self, other: &Requirement) -> Requirement {
        let greater_than = match (self.greater_than, other.greater_than) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let less_than = match (self.less_than, other.less_than) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let bounded = Requirement {
            key: self.key.clone(),
            complement: true,
            values: BTreeSet::new(),
            greater_than,
            less_than,
        };
        let (complement, values): (bool, BTreeSet<String>) = match (self.complement, other.complement) {
            (true, true) => (true, self.values.union(&other.values).cloned().collect()),
            (true, false) => (
                false,
                other.values.iter().filter(|v| self.has(v)).cloned().collect(),
            ),
            (false, true) => (
                false,
                self.values.iter().filter(|v| other.has(v)).cloned().collect(),
            ),
            (false, false) => (
                false,
                self.values.intersection(&other.values).cloned().collect(),
            ),
        };
        let values = if complement {
            values
        } else {
            values
                .into_iter()
                .filter(|v: &String| bounded.within_bounds(v))
                .collect()
        };
        Requirement {
            complement,
            values,
            ..bounded
        }
    }

    /// True when no value can satisfy the requirement.
    pub fn is_empty(&self) -> bool {
        if !self.complement {
            return self.values.is_empty();
        }
        match (self.greater_than, self.less_than) {
            (Some(i64::MAX), _) | (_, Some(i64::MIN)) => true,
            (Some(gt), Some(lt)) => lt.saturating_sub(gt) <= 1,
            _ => false,
        }
    }
}

/// Requirements keyed by label; adding a key twice narrows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirements(BTreeMap<String, Requirement>);

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, requirement: Requirement) {
        let merged = match self.0.get(&requirement.key) {
            Some(existing) => existing.intersection(&requirement),
            None => requirement,
        };
        self.0.insert(merged.key.clone(), merged);
    }

    pub fn with(mut self, requirement: Requirement) -> Self {
        self.add(requirement);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Requirement> {
        self.0.get(key)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.0.values()
    }

    /// True when `value` is allowed for `key`; unconstrained keys allow anything.
    pub fn allows(&self, key: &str, value: &str) -> bool {
        self.0.get(key).map_or(true, |r| r.has(value))
    }

    /// True when an instance type with these requirements can satisfy `claim`.
    ///
    /// Keys both sides constrain must intersect. A claim key missing here
    /// fails when it needs the key to exist and names an instance type label.
    pub fn compatible(&self, claim: &Requirements) -> bool {
        let shared = self.0.iter().all(|(key, ours)| match claim.0.get(key) {
            Some(theirs) => {
                !ours.intersection(theirs).is_empty()
                    || (ours.operator() == Operator::DoesNotExist
                        && theirs.operator() == Operator::DoesNotExist)
            }
            None => true,
        });
        shared
            && claim.0.iter().all(|(key, theirs)| {
                self.0.contains_key(key)
                    || !theirs.requires_key()
                    || !INSTANCE_TYPE_LABELS.contains(&key.as_str())
            })
    }

    /// Labels for keys pinned to a single value.
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.0
            .values()
            .filter(|r| !r.complement && r.values.len() == 1)
            .filter_map(|r| r.any().map(|v| (r.key.clone(), v)))
            .collect()
    }
}

/// A purchasable (zone, capacity type) variant of an instance type.
#[derive(Debug, Clone, PartialEq)]
pub struct Offering {
    pub zone: String,
    pub capacity_type: String,
    /// Hourly price
    pub price: f64,
    pub available: bool,
}

impl Offering {
    pub fn compatible(&self, requirements: &Requirements) -> bool {
        requirements.allows(LABEL_ZONE, &self.zone)
            && requirements.allows(LABEL_CAPACITY_TYPE, &self.capacity_type)
    }
}

/// Reserved resources subtracted from capacity to get allocatable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceTypeOverhead {
    pub kube_reserved: ResourceList,
    pub system_reserved: ResourceList,
    pub eviction_threshold: ResourceList,
}

/// Scheduler-facing view of one launchable shape configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceType {
    pub name: String,
    pub requirements: Requirements,
    pub capacity: ResourceList,
    pub overhead: InstanceTypeOverhead,
    pub offerings: Vec<Offering>,
}

impl InstanceType {
    /// Available offerings compatible with `requirements`.
    pub fn compatible_offerings<'a>(
        &'a self,
        requirements: &'a Requirements,
    ) -> impl Iterator<Item = &'a Offering> + 'a {
        self.offerings
            .iter()
            .filter(move |o| o.available && o.compatible(requirements))
    }

    /// Cheapest available compatible price, `INFINITY` when there is none.
    pub fn cheapest_price(&self, requirements: &Requirements) -> f64 {
        self.compatible_offerings(requirements)
            .map(|o| o.price)
            .fold(f64::INFINITY, f64::min)
    }
}
