//! Frame-counter update strategies and batched twin persistence.
//!
//! Single-gateway devices advance their downlink counter locally: this
//! gateway is the sole authority, so no round trip is needed. Multi-gateway
//! devices go through the backend's atomic next-value call, serialized per
//! device by a keyed lock so two in-flight requests can never observe
//! inconsistent values.
//!
//! Persistence is shared between both strategies and batched: counters are
//! flushed to the twin only once either direction has advanced
//! [`FCNT_PERSIST_DELTA`] past the last committed value, bounding write
//! amplification at the cost of at most nine messages of counter state on a
//! crash.

use std::sync::Arc;

use lns_protocol::{DevEui, GatewayId};
use serde_json::json;
use tracing::{debug, warn};

use crate::backend::DeviceDirectory;
use crate::device::DeviceRecord;
use crate::error::BackendError;
use crate::keyed_lock::KeyedLocks;

/// Counter advance, in either direction, that triggers a twin flush.
pub const FCNT_PERSIST_DELTA: u32 = 10;

/// Counter strategy dispatcher plus the shared persistence policy.
pub struct FrameCounterUpdater {
    directory: Arc<dyn DeviceDirectory>,
    gateway_id: GatewayId,
    locks: KeyedLocks<DevEui>,
}

impl FrameCounterUpdater {
    /// Create an updater for one gateway identity.
    pub fn new(directory: Arc<dyn DeviceDirectory>, gateway_id: GatewayId) -> Self {
        Self {
            directory,
            gateway_id,
            locks: KeyedLocks::new(),
        }
    }

    /// Next downlink counter for `device`.
    ///
    /// Single-gateway devices increment locally; multi-gateway devices call
    /// the backend's atomic next-value service under the per-device lock.
    ///
    /// # Errors
    /// Backend faults on the multi-gateway path only.
    pub async fn next_fcnt_down(
        &self,
        device: &DeviceRecord,
        payload_fcnt: u32,
    ) -> Result<u32, BackendError> {
        if device.is_single_gateway() {
            return Ok(device.fcnt_down().increment());
        }

        let _guard = self.locks.lock(&device.dev_eui()).await;
        let next = self
            .directory
            .next_fcnt_down(
                device.dev_eui(),
                device.fcnt_down().value(),
                payload_fcnt,
                &self.gateway_id,
            )
            .await?;
        device.fcnt_down().advance_to(next);
        debug!(dev_eui = %device.dev_eui(), next, "backend resolved downlink counter");
        Ok(next)
    }

    /// Flush counter changes to the twin when the batching threshold is met.
    ///
    /// Returns whether a write happened. No-op when both counters are
    /// clean, and below the [`FCNT_PERSIST_DELTA`] threshold dirty state is
    /// deliberately left pending for a later uplink.
    ///
    /// # Errors
    /// Backend faults; the device keeps its dirty state so the next uplink
    /// retries the flush.
    pub async fn save_changes(&self, device: &DeviceRecord) -> Result<bool, BackendError> {
        if !device.fcnt_up().is_dirty() && !device.fcnt_down().is_dirty() {
            return Ok(false);
        }
        let up_delta = device.fcnt_up().pending_delta();
        let down_delta = device.fcnt_down().pending_delta();
        if up_delta < FCNT_PERSIST_DELTA && down_delta < FCNT_PERSIST_DELTA {
            debug!(
                dev_eui = %device.dev_eui(),
                up_delta,
                down_delta,
                "deferring counter flush below batching threshold"
            );
            return Ok(false);
        }
        self.persist(device).await
    }

    /// Reinitialize counters after a detected device restart.
    ///
    /// Writes through to the backend counter cache and the twin only when
    /// the reset actually moved the counters off their committed baseline.
    ///
    /// # Errors
    /// Backend faults; counters keep their provisional reset values.
    pub async fn reset(&self, device: &DeviceRecord, start_fcnt: u32) -> Result<(), BackendError> {
        device.fcnt_up().set(start_fcnt);
        device.fcnt_down().set(start_fcnt);
        if !device.fcnt_up().is_dirty() && !device.fcnt_down().is_dirty() {
            // Reset landed on the committed baseline; nothing to write.
            return Ok(());
        }

        self.directory
            .reset_abp_counter_cache(device.dev_eui(), start_fcnt, &self.gateway_id)
            .await?;
        self.persist(device).await?;
        debug!(dev_eui = %device.dev_eui(), start_fcnt, "frame counters reset");
        Ok(())
    }

    /// Unconditional twin write of both counters (and the processing-gateway
    /// field when it changed), then commit.
    async fn persist(&self, device: &DeviceRecord) -> Result<bool, BackendError> {
        let mut properties = json!({
            "FCntUp": device.fcnt_up().value(),
            "FCntDown": device.fcnt_down().value(),
        });
        if device.processing_gateway_dirty() {
            if let Some(gateway) = device.last_processing_gateway() {
                properties["PreferredGateway"] = json!(gateway.as_str());
            }
        }

        let accepted = device
            .client()
            .update_reported_properties(properties)
            .await?;
        if accepted {
            device.accept_session_changes();
            debug!(
                dev_eui = %device.dev_eui(),
                fcnt_up = device.fcnt_up().committed(),
                fcnt_down = device.fcnt_down().committed(),
                "counter state persisted"
            );
        } else {
            warn!(
                dev_eui = %device.dev_eui(),
                "twin refused reported-property write; keeping state dirty"
            );
        }
        Ok(accepted)
    }
}
