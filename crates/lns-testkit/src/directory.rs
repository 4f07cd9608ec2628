//! Scriptable in-memory device directory and device factory.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lns_core::backend::{
    BundleRequest, BundleResponse, DeviceDirectory, DeviceFactory, DirectoryEntry,
};
use lns_core::device::{ActivationMode, DeduplicationMode, DeviceRecord};
use lns_core::error::BackendError;
use lns_protocol::{AesKey, DevAddr, DevEui, GatewayId};
use parking_lot::Mutex;

use crate::client::RecordingClient;

#[derive(Default)]
struct DirectoryState {
    entries: HashMap<DevAddr, Vec<DirectoryEntry>>,
    search_calls: HashMap<DevAddr, usize>,
    seen: HashSet<(DevEui, u32)>,
    fcnt_down: HashMap<DevEui, u32>,
    next_fcnt_calls: usize,
    resets: Vec<(DevEui, u32)>,
}

/// Shared in-memory directory backing any number of pipeline instances,
/// the way the real backend is shared across gateways.
///
/// Dedup semantics mirror the backend contract: the first call for a
/// `(device, uplink counter)` pair reports fresh, every later one reports
/// duplicate. `next_fcnt_down` hands out strictly increasing values.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: Mutex<DirectoryState>,
    search_delay: Mutex<Option<Duration>>,
    bundle_fcnt_down: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryDirectory {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under its radio address.
    pub fn register(&self, dev_addr: DevAddr, dev_eui: DevEui) {
        self.state
            .lock()
            .entries
            .entry(dev_addr)
            .or_default()
            .push(DirectoryEntry {
                dev_addr,
                dev_eui,
                extra: serde_json::Value::Null,
            });
    }

    /// Delay every search, to widen race windows in coalescing tests.
    pub fn set_search_delay(&self, delay: Duration) {
        *self.search_delay.lock() = Some(delay);
    }

    /// Make bundle responses carry a pre-resolved downlink counter.
    pub fn set_bundle_fcnt_down(&self, enabled: bool) {
        self.bundle_fcnt_down.store(enabled, Ordering::SeqCst);
    }

    /// Fail every call with `BackendError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// How many searches ran for `dev_addr`.
    #[must_use]
    pub fn search_calls(&self, dev_addr: DevAddr) -> usize {
        self.state
            .lock()
            .search_calls
            .get(&dev_addr)
            .copied()
            .unwrap_or(0)
    }

    /// How many standalone `next_fcnt_down` calls ran.
    #[must_use]
    pub fn next_fcnt_calls(&self) -> usize {
        self.state.lock().next_fcnt_calls
    }

    /// Counter resets recorded through `reset_abp_counter_cache`.
    #[must_use]
    pub fn resets(&self) -> Vec<(DevEui, u32)> {
        self.state.lock().resets.clone()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("scripted outage".into()));
        }
        Ok(())
    }

    fn bump_fcnt_down(state: &mut DirectoryState, dev_eui: DevEui, current: u32) -> u32 {
        let stored = state.fcnt_down.entry(dev_eui).or_insert(0);
        *stored = (*stored).max(current) + 1;
        *stored
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn search_devices(
        &self,
        _gateway_id: &GatewayId,
        dev_addr: DevAddr,
    ) -> Result<Vec<DirectoryEntry>, BackendError> {
        self.check_available()?;
        let delay = *self.search_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        *state.search_calls.entry(dev_addr).or_insert(0) += 1;
        Ok(state.entries.get(&dev_addr).cloned().unwrap_or_default())
    }

    async fn next_fcnt_down(
        &self,
        dev_eui: DevEui,
        current_fcnt_down: u32,
        _payload_fcnt: u32,
        _gateway_id: &GatewayId,
    ) -> Result<u32, BackendError> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.next_fcnt_calls += 1;
        Ok(Self::bump_fcnt_down(&mut state, dev_eui, current_fcnt_down))
    }

    async fn execute_dedup_bundle(
        &self,
        dev_eui: DevEui,
        request: &BundleRequest,
    ) -> Result<BundleResponse, BackendError> {
        self.check_available()?;
        let mut state = self.state.lock();
        let is_duplicate = !state.seen.insert((dev_eui, request.client_fcnt_up));
        let next_fcnt_down = self
            .bundle_fcnt_down
            .load(Ordering::SeqCst)
            .then(|| Self::bump_fcnt_down(&mut state, dev_eui, request.client_fcnt_down));
        Ok(BundleResponse {
            is_duplicate,
            next_fcnt_down,
            adr: None,
        })
    }

    async fn reset_abp_counter_cache(
        &self,
        dev_eui: DevEui,
        fcnt: u32,
        _gateway_id: &GatewayId,
    ) -> Result<bool, BackendError> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.fcnt_down.insert(dev_eui, fcnt);
        state.resets.push((dev_eui, fcnt));
        Ok(true)
    }
}

/// Everything the factory needs to build one device record.
#[derive(Clone)]
pub struct DeviceTemplate {
    /// Network session key the device signs with.
    pub nwk_s_key: AesKey,
    /// Application session key.
    pub app_s_key: AesKey,
    /// Deduplication mode.
    pub dedup: DeduplicationMode,
    /// Activation mode.
    pub activation: ActivationMode,
    /// Owning gateway, when single-gateway.
    pub gateway_affinity: Option<GatewayId>,
    /// Twin-recorded starting counters (up, down).
    pub counters: (u32, u32),
    /// The device's recording client.
    pub client: Arc<RecordingClient>,
}

impl DeviceTemplate {
    /// Template with fresh counters, no affinity, dedup off.
    #[must_use]
    pub fn new(nwk_s_key: AesKey, client: Arc<RecordingClient>) -> Self {
        Self {
            nwk_s_key,
            app_s_key: AesKey([0x22; 16]),
            dedup: DeduplicationMode::None,
            activation: ActivationMode::Otaa,
            gateway_affinity: None,
            counters: (0, 0),
            client,
        }
    }
}

/// Factory building records from registered templates.
#[derive(Default)]
pub struct TestFactory {
    templates: Mutex<HashMap<DevEui, DeviceTemplate>>,
}

impl TestFactory {
    /// Empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the template used when `dev_eui` shows up in a directory
    /// search.
    pub fn register(&self, dev_eui: DevEui, template: DeviceTemplate) {
        self.templates.lock().insert(dev_eui, template);
    }
}

#[async_trait]
impl DeviceFactory for TestFactory {
    async fn create(&self, entry: &DirectoryEntry) -> Result<DeviceRecord, BackendError> {
        let template = self
            .templates
            .lock()
            .get(&entry.dev_eui)
            .cloned()
            .ok_or_else(|| {
                BackendError::Rejected(format!("no template for {}", entry.dev_eui))
            })?;

        let mut device = DeviceRecord::new(
            entry.dev_eui,
            entry.dev_addr,
            template.nwk_s_key,
            template.app_s_key,
            template.client,
        )
        .with_counters(template.counters.0, template.counters.1)
        .with_deduplication(template.dedup)
        .with_activation(template.activation);
        if let Some(gateway) = template.gateway_affinity {
            device = device.with_gateway_affinity(gateway);
        }
        Ok(device)
    }
}
