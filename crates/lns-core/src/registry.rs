//! Device registry: radio-address cache with backend fallback.
//!
//! Maps an uplink's `DevAddr` to the one cached device whose network session
//! key verifies the frame's MIC. A `DevAddr` is not unique, so the cache
//! holds a candidate list per address and the MIC picks the winner. Cache
//! misses fall back to the backend directory, with at most one outstanding
//! directory query per missing address: concurrent resolvers for the same
//! address queue on a keyed lock and re-check the cache once inside.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lns_protocol::{DevAddr, GatewayId, UplinkFrame};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::backend::{DeviceDirectory, DeviceFactory, DeviceInitializer};
use crate::device::DeviceRecord;
use crate::error::BackendError;
use crate::keyed_lock::KeyedLocks;

/// Default lifetime of a cache entry without traffic.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

struct AddrEntry {
    devices: Vec<Arc<DeviceRecord>>,
    last_touch: Mutex<Instant>,
}

impl AddrEntry {
    fn new(devices: Vec<Arc<DeviceRecord>>) -> Self {
        Self {
            devices,
            last_touch: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_touch.lock() = Instant::now();
    }

    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(*self.last_touch.lock()) >= ttl
    }
}

/// Shared per-process device cache and resolver.
pub struct DeviceRegistry {
    directory: Arc<dyn DeviceDirectory>,
    factory: Arc<dyn DeviceFactory>,
    gateway_id: GatewayId,
    ttl: Duration,
    cache: RwLock<HashMap<DevAddr, AddrEntry>>,
    fetch_locks: KeyedLocks<DevAddr>,
    initializers: RwLock<Vec<Arc<dyn DeviceInitializer>>>,
}

impl DeviceRegistry {
    /// Create a registry bound to one gateway identity.
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        factory: Arc<dyn DeviceFactory>,
        gateway_id: GatewayId,
    ) -> Self {
        Self {
            directory,
            factory,
            gateway_id,
            ttl: DEFAULT_CACHE_TTL,
            cache: RwLock::new(HashMap::new()),
            fetch_locks: KeyedLocks::new(),
            initializers: RwLock::new(Vec::new()),
        }
    }

    /// Builder: override the cache TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Register a hook invoked once per newly resolved device, before the
    /// record becomes visible to other requests.
    pub fn register_initializer(&self, hook: Arc<dyn DeviceInitializer>) {
        self.initializers.write().push(hook);
    }

    /// Resolve an uplink to the device whose key validates it.
    ///
    /// `Ok(None)` is not an error: the frame is unknown or foreign traffic
    /// (no directory match, or no candidate's MIC verified).
    ///
    /// # Errors
    /// Propagates directory/factory faults; the cache is left untouched so
    /// the next uplink retries cleanly.
    pub async fn resolve_device(
        &self,
        frame: &UplinkFrame,
    ) -> Result<Option<Arc<DeviceRecord>>, BackendError> {
        let addr = frame.dev_addr;

        let mut candidates = self.cached_candidates(addr);
        if candidates.is_empty() {
            candidates = self.fetch_candidates(addr).await?;
        }

        let resolved = candidates
            .into_iter()
            .find(|device| device.validate_mic(frame));
        match &resolved {
            Some(device) => {
                debug!(dev_addr = %addr, dev_eui = %device.dev_eui(), "device resolved");
            }
            None => {
                debug!(dev_addr = %addr, "no candidate validated the frame MIC");
            }
        }
        Ok(resolved)
    }

    /// Candidates currently cached for `addr`, touching the entry.
    fn cached_candidates(&self, addr: DevAddr) -> Vec<Arc<DeviceRecord>> {
        let cache = self.cache.read();
        cache.get(&addr).map_or_else(Vec::new, |entry| {
            entry.touch();
            entry.devices.clone()
        })
    }

    /// Fill the cache for a missing address. Holds the per-address fetch
    /// lock across the directory round trip so concurrent misses coalesce
    /// into one query.
    async fn fetch_candidates(
        &self,
        addr: DevAddr,
    ) -> Result<Vec<Arc<DeviceRecord>>, BackendError> {
        let _guard = self.fetch_locks.lock(&addr).await;

        // Another resolver may have filled the entry while we queued.
        let cached = self.cached_candidates(addr);
        if !cached.is_empty() {
            return Ok(cached);
        }

        let entries = self
            .directory
            .search_devices(&self.gateway_id, addr)
            .await?;
        if entries.is_empty() {
            debug!(dev_addr = %addr, "directory found no devices");
            return Ok(Vec::new());
        }

        let mut devices = Vec::with_capacity(entries.len());
        for entry in &entries {
            let device = Arc::new(self.factory.create(entry).await?);
            for hook in self.initializers.read().iter() {
                hook.device_resolved(&device);
            }
            devices.push(device);
        }
        debug!(
            dev_addr = %addr,
            candidates = devices.len(),
            "cached directory results"
        );
        self.cache
            .write()
            .insert(addr, AddrEntry::new(devices.clone()));
        Ok(devices)
    }

    /// Pre-populate the cache with a known device.
    pub fn seed(&self, device: Arc<DeviceRecord>) {
        let addr = device.dev_addr();
        let mut cache = self.cache.write();
        match cache.get_mut(&addr) {
            Some(entry) => {
                entry.devices.push(device);
                entry.touch();
            }
            None => {
                cache.insert(addr, AddrEntry::new(vec![device]));
            }
        }
    }

    /// Explicitly drop the cache entry for `addr`. Records still referenced
    /// by in-flight requests stay alive through their `Arc`s.
    pub fn release(&self, addr: DevAddr) -> bool {
        self.cache.write().remove(&addr).is_some()
    }

    /// Drop every entry idle past the TTL; returns how many were evicted.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|addr, entry| {
            let keep = !entry.expired(now, self.ttl);
            if !keep {
                debug!(dev_addr = %addr, "evicting idle cache entry");
            }
            keep
        });
        self.fetch_locks.prune();
        before - cache.len()
    }

    /// Periodic eviction scan; the host spawns this.
    pub async fn run_eviction_loop(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let evicted = self.evict_expired(Instant::now());
            if evicted > 0 {
                warn!(evicted, "device cache eviction scan");
            }
        }
    }

    /// Number of cached radio addresses (for tests and diagnostics).
    #[must_use]
    pub fn cached_addr_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Gateway identity this registry resolves for.
    #[must_use]
    pub const fn gateway_id(&self) -> &GatewayId {
        &self.gateway_id
    }
}
