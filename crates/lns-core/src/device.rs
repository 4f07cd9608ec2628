//! In-memory device session state.

use std::fmt;
use std::sync::Arc;

use lns_protocol::{AesKey, DevAddr, DevEui, GatewayId, UplinkFrame};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::DeviceClient;
use crate::tracked::{Tracked, TrackedCounter};

/// Uplink counters at or below this value are treated as a device restart
/// on relaxed ABP devices.
pub const ABP_RELAXED_FCNT_CEILING: u32 = 1;

/// Committed uplink counters at or above this value make a restart
/// plausible; below it a small counter is just a young session.
pub const ABP_RELAXED_FCNT_FLOOR: u32 = 10;

/// How the device joined the network. ABP devices keep their session keys
/// across power cycles, so their counters may legitimately restart at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationMode {
    /// Activation by personalization.
    Abp,
    /// Over-the-air activation.
    Otaa,
}

/// Cross-gateway deduplication behavior configured per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeduplicationMode {
    /// Every observing gateway processes the message independently.
    #[default]
    None,
    /// Only the first gateway processes; the rest drop.
    Drop,
    /// Every gateway processes; duplicates are annotated in telemetry.
    Mark,
}

/// Verdict on an uplink frame counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcntValidation {
    /// Strictly ahead of the committed counter; process normally.
    Accepted,
    /// Relaxed-ABP restart detected; reinitialize counters, then process.
    Reset,
    /// Stale or replayed; reject the frame.
    Rejected,
}

/// One LoRa end-device's session state as this server knows it.
///
/// Counters are change-tracked: the committed value is what the twin last
/// saw, the current value is provisional until a request persists or rolls
/// it back. Records are shared across concurrent requests behind `Arc`; all
/// mutable state is atomic or lock-guarded.
pub struct DeviceRecord {
    dev_eui: DevEui,
    dev_addr: DevAddr,
    nwk_s_key: AesKey,
    app_s_key: AesKey,
    fcnt_up: TrackedCounter,
    fcnt_down: TrackedCounter,
    /// Configured owning gateway. `None` means any gateway may serve the
    /// device and downlink counters must be resolved through the backend.
    gateway_affinity: Option<GatewayId>,
    /// Last gateway that processed an uplink, mirrored to the twin.
    last_processing_gateway: RwLock<Tracked<Option<GatewayId>>>,
    dedup: DeduplicationMode,
    activation: ActivationMode,
    decoder_id: Option<String>,
    client: Arc<dyn DeviceClient>,
}

impl DeviceRecord {
    /// Create a record with zeroed counters and default modes.
    pub fn new(
        dev_eui: DevEui,
        dev_addr: DevAddr,
        nwk_s_key: AesKey,
        app_s_key: AesKey,
        client: Arc<dyn DeviceClient>,
    ) -> Self {
        Self {
            dev_eui,
            dev_addr,
            nwk_s_key,
            app_s_key,
            fcnt_up: TrackedCounter::new(0),
            fcnt_down: TrackedCounter::new(0),
            gateway_affinity: None,
            last_processing_gateway: RwLock::new(Tracked::new(None)),
            dedup: DeduplicationMode::None,
            activation: ActivationMode::Otaa,
            decoder_id: None,
            client,
        }
    }

    /// Builder: start counters from twin-recorded values.
    #[must_use]
    pub fn with_counters(self, fcnt_up: u32, fcnt_down: u32) -> Self {
        Self {
            fcnt_up: TrackedCounter::new(fcnt_up),
            fcnt_down: TrackedCounter::new(fcnt_down),
            ..self
        }
    }

    /// Builder: pin the device to one owning gateway.
    #[must_use]
    pub fn with_gateway_affinity(mut self, gateway_id: GatewayId) -> Self {
        self.gateway_affinity = Some(gateway_id);
        self
    }

    /// Builder: set the deduplication mode.
    #[must_use]
    pub const fn with_deduplication(mut self, mode: DeduplicationMode) -> Self {
        self.dedup = mode;
        self
    }

    /// Builder: set the activation mode.
    #[must_use]
    pub const fn with_activation(mut self, mode: ActivationMode) -> Self {
        self.activation = mode;
        self
    }

    /// Builder: name the payload decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder_id: impl Into<String>) -> Self {
        self.decoder_id = Some(decoder_id.into());
        self
    }

    /// Durable device identifier.
    #[must_use]
    pub const fn dev_eui(&self) -> DevEui {
        self.dev_eui
    }

    /// Session radio address.
    #[must_use]
    pub const fn dev_addr(&self) -> DevAddr {
        self.dev_addr
    }

    /// Uplink frame counter.
    #[must_use]
    pub const fn fcnt_up(&self) -> &TrackedCounter {
        &self.fcnt_up
    }

    /// Downlink frame counter.
    #[must_use]
    pub const fn fcnt_down(&self) -> &TrackedCounter {
        &self.fcnt_down
    }

    /// Configured owning gateway, if any.
    #[must_use]
    pub const fn gateway_affinity(&self) -> Option<&GatewayId> {
        self.gateway_affinity.as_ref()
    }

    /// True when exactly one gateway serves this device and downlink
    /// counters can be advanced locally.
    #[must_use]
    pub const fn is_single_gateway(&self) -> bool {
        self.gateway_affinity.is_some()
    }

    /// Deduplication mode.
    #[must_use]
    pub const fn deduplication(&self) -> DeduplicationMode {
        self.dedup
    }

    /// Activation mode.
    #[must_use]
    pub const fn activation(&self) -> ActivationMode {
        self.activation
    }

    /// Application session key, for hosts whose codecs decrypt the
    /// application payload themselves.
    #[must_use]
    pub const fn app_s_key(&self) -> &AesKey {
        &self.app_s_key
    }

    /// Payload decoder identifier.
    #[must_use]
    pub fn decoder_id(&self) -> Option<&str> {
        self.decoder_id.as_deref()
    }

    /// Per-device backend client handle.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn DeviceClient> {
        &self.client
    }

    /// Verify a frame's MIC against this device's network session key.
    #[must_use]
    pub fn validate_mic(&self, frame: &UplinkFrame) -> bool {
        frame.verify_mic(&self.nwk_s_key)
    }

    /// Judge an uplink counter against the current one.
    ///
    /// Strictly-greater wins. The floor is the current (possibly
    /// uncommitted) counter: it advances as frames are processed, so a
    /// replayed or stale frame is rejected even between batched twin
    /// flushes. An ABP device reporting a counter at or below
    /// [`ABP_RELAXED_FCNT_CEILING`] while the current counter sits at or
    /// above [`ABP_RELAXED_FCNT_FLOOR`] has restarted: the caller should
    /// reinitialize counters rather than reject.
    #[must_use]
    pub fn validate_fcnt_up(&self, payload_fcnt: u32) -> FcntValidation {
        let current = self.fcnt_up.value();
        if payload_fcnt > current {
            return FcntValidation::Accepted;
        }
        if self.activation == ActivationMode::Abp
            && payload_fcnt <= ABP_RELAXED_FCNT_CEILING
            && current >= ABP_RELAXED_FCNT_FLOOR
        {
            return FcntValidation::Reset;
        }
        FcntValidation::Rejected
    }

    /// Remember which gateway processed the latest uplink. Dirties the
    /// tracked field only when the gateway actually changed.
    pub fn record_processing_gateway(&self, gateway_id: &GatewayId) {
        let mut tracked = self.last_processing_gateway.write();
        if tracked.get().as_ref() != Some(gateway_id) {
            tracked.set(Some(gateway_id.clone()));
        }
    }

    /// Last processing gateway, current (possibly uncommitted) value.
    #[must_use]
    pub fn last_processing_gateway(&self) -> Option<GatewayId> {
        self.last_processing_gateway.read().get().clone()
    }

    /// Whether the gateway-affinity tracked field is awaiting persistence.
    #[must_use]
    pub fn processing_gateway_dirty(&self) -> bool {
        self.last_processing_gateway.read().is_dirty()
    }

    /// Commit all provisional session state (after a successful persist).
    pub fn accept_session_changes(&self) {
        self.fcnt_up.accept_changes();
        self.fcnt_down.accept_changes();
        self.last_processing_gateway.write().accept_changes();
    }

    /// Discard all provisional session state (after a failed request).
    pub fn rollback_session_changes(&self) {
        self.fcnt_up.rollback();
        self.fcnt_down.rollback();
        self.last_processing_gateway.write().rollback();
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("dev_eui", &self.dev_eui.to_string())
            .field("dev_addr", &self.dev_addr.to_string())
            .field("fcnt_up", &self.fcnt_up.value())
            .field("fcnt_down", &self.fcnt_down.value())
            .field("gateway_affinity", &self.gateway_affinity)
            .field("dedup", &self.dedup)
            .field("activation", &self.activation)
            .finish_non_exhaustive()
    }
}
