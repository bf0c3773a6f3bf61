//! Unavailable offerings tracker
//!
//! Remembers (instance type, zone, capacity type) pools that recently failed
//! to launch for lack of capacity, so the next `List` marks the matching
//! offerings unavailable until the entry expires.

use crate::clock::{Clock, SystemClock};
use crate::error::ProviderError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_UNAVAILABLE_OFFERINGS_TTL: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OfferingKey {
    instance_type: String,
    zone: String,
    capacity_type: String,
}

impl OfferingKey {
    fn new(instance_type: &str, zone: &str, capacity_type: &str) -> Self {
        Self {
            instance_type: instance_type.to_string(),
            zone: zone.to_string(),
            capacity_type: capacity_type.to_string(),
        }
    }
}

pub struct UnavailableOfferings {
    entries: DashMap<OfferingKey, Instant>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    seq_num: AtomicU64,
}

impl UnavailableOfferings {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
            seq_num: AtomicU64::new(0),
        }
    }

    /// Incremented on every write; callers compare it to invalidate derived caches.
    pub fn seq_num(&self) -> u64 {
        self.seq_num.load(Ordering::SeqCst)
    }

    pub fn is_unavailable(&self, instance_type: &str, zone: &str, capacity_type: &str) -> bool {
        let key = OfferingKey::new(instance_type, zone, capacity_type);
        let now = self.clock.now();
        let expires_at = match self.entries.get(&key) {
            Some(entry) => *entry,
            None => return false,
        };
        if expires_at > now {
            return true;
        }
        self.entries.remove_if(&key, |_, exp| *exp <= now);
        false
    }

    /// Record a launch failure; only insufficient-capacity errors are kept.
    pub fn mark_unavailable_for_launch_error(
        &self,
        err: &ProviderError,
        capacity_type: &str,
        instance_type: &str,
        zone: &str,
    ) {
        if err.is_insufficient_capacity() {
            self.mark_unavailable(&err.to_string(), instance_type, zone, capacity_type);
        }
    }

    pub fn mark_unavailable(&self, reason: &str, instance_type: &str, zone: &str, capacity_type: &str) {
        debug!(
            reason = %reason,
            instance_type = %instance_type,
            zone = %zone,
            capacity_type = %capacity_type,
            ttl_secs = self.ttl.as_secs(),
            "Marking offering unavailable"
        );
        let expires_at = self.clock.now() + self.ttl;
        self.entries
            .insert(OfferingKey::new(instance_type, zone, capacity_type), expires_at);
        self.seq_num.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop every entry, expired or not.
    pub fn flush(&self) {
        self.entries.clear();
        self.seq_num.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for UnavailableOfferings {
    fn default() -> Self {
        Self::new(DEFAULT_UNAVAILABLE_OFFERINGS_TTL)
    }
}
