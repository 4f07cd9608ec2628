//! Cross-gateway deduplication strategies.
//!
//! The same physical uplink can reach the backend through every gateway that
//! heard it. The device's configured mode decides what each pipeline
//! instance does about that: process regardless (`None`), let only the
//! first observer through (`Drop`), or process everywhere but annotate the
//! copies (`Mark`). Drop and Mark share one backend round trip, which may
//! also carry the next downlink counter as a best-effort bundle.

use std::sync::Arc;

use lns_protocol::GatewayId;
use tracing::debug;

use crate::backend::{BundleRequest, DeviceDirectory};
use crate::device::{DeduplicationMode, DeviceRecord};
use crate::error::BackendError;

/// Outcome of the deduplication decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeduplicationResult {
    /// Another gateway already delivered this logical message.
    pub is_duplicate: bool,
    /// Whether this pipeline instance may keep processing.
    pub can_process: bool,
}

impl DeduplicationResult {
    /// Result for a message nobody has seen before (or `None` mode).
    pub const FIRST: Self = Self {
        is_duplicate: false,
        can_process: true,
    };
}

/// Deduplication decision plus any piggy-backed bundle data.
#[derive(Debug, Clone, Copy)]
pub struct DedupOutcome {
    /// The actionable decision.
    pub result: DeduplicationResult,
    /// Downlink counter pre-resolved by the backend, when bundled.
    pub next_fcnt_down: Option<u32>,
}

/// Per-device-mode deduplication dispatcher.
pub struct Deduplicator {
    directory: Arc<dyn DeviceDirectory>,
    gateway_id: GatewayId,
}

impl Deduplicator {
    /// Create a deduplicator for one gateway identity.
    pub const fn new(directory: Arc<dyn DeviceDirectory>, gateway_id: GatewayId) -> Self {
        Self {
            directory,
            gateway_id,
        }
    }

    /// Decide whether this instance may process `payload_fcnt` for `device`.
    ///
    /// `None` mode never touches the backend. Drop and Mark issue the
    /// bundled decision call once per message; they differ only in what a
    /// duplicate means: Drop refuses processing, Mark annotates it.
    ///
    /// # Errors
    /// Backend faults on the Drop/Mark paths.
    pub async fn resolve(
        &self,
        device: &DeviceRecord,
        payload_fcnt: u32,
    ) -> Result<DedupOutcome, BackendError> {
        let mode = device.deduplication();
        if mode == DeduplicationMode::None {
            return Ok(DedupOutcome {
                result: DeduplicationResult::FIRST,
                next_fcnt_down: None,
            });
        }

        let request = BundleRequest {
            gateway_id: self.gateway_id.clone(),
            client_fcnt_up: payload_fcnt,
            client_fcnt_down: device.fcnt_down().value(),
        };
        let response = self
            .directory
            .execute_dedup_bundle(device.dev_eui(), &request)
            .await?;

        let result = if response.is_duplicate {
            debug!(
                dev_eui = %device.dev_eui(),
                fcnt = payload_fcnt,
                ?mode,
                "backend reports duplicate uplink"
            );
            DeduplicationResult {
                is_duplicate: true,
                // Mark processes duplicates, Drop does not.
                can_process: mode == DeduplicationMode::Mark,
            }
        } else {
            DeduplicationResult::FIRST
        };

        Ok(DedupOutcome {
            result,
            next_fcnt_down: response.next_fcnt_down,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn first_result_processes_without_annotation() {
        assert_eq!(
            DeduplicationResult::FIRST,
            DeduplicationResult {
                is_duplicate: false,
                can_process: true
            }
        );
    }
}
