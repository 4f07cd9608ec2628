//! Abstract contracts toward the shared backend and the host.
//!
//! The core never owns a socket or a wire format. Everything it needs from
//! the outside world arrives through these traits: the device directory
//! (search, atomic next-counter, dedup bundle), the per-device client
//! (telemetry, pending messages, twin updates), the device factory, the
//! packet-forwarding sink, and the payload codec.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lns_protocol::{DevAddr, DevEui, DownlinkFrame, GatewayId};
use serde::{Deserialize, Serialize};

use crate::device::DeviceRecord;
use crate::error::{BackendError, CodecError};

/// One row from a directory search: enough to instantiate a candidate
/// device record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Radio address the entry was found under.
    pub dev_addr: DevAddr,
    /// Durable device identifier.
    pub dev_eui: DevEui,
    /// Opaque backend-specific extras (primary key, twin etag, ...).
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Parameters for the bundled dedup / next-counter backend call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleRequest {
    /// Calling gateway.
    pub gateway_id: GatewayId,
    /// Uplink counter carried by the frame under consideration.
    pub client_fcnt_up: u32,
    /// Downlink counter as this gateway currently knows it.
    pub client_fcnt_down: u32,
}

/// Answer to the bundled call.
///
/// Only `is_duplicate` is load-bearing; `next_fcnt_down` and `adr` are
/// best-effort piggybacks that save a round trip when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleResponse {
    /// Whether the backend has already seen this (device, uplink counter)
    /// pair from another gateway.
    pub is_duplicate: bool,
    /// Pre-resolved downlink counter, when the backend bundled it in.
    #[serde(default)]
    pub next_fcnt_down: Option<u32>,
    /// Opaque ADR block; computed backend-side, unused by this core.
    #[serde(default)]
    pub adr: Option<serde_json::Value>,
}

/// Telemetry event delivered upstream for one processed uplink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Durable device identifier.
    pub dev_eui: DevEui,
    /// Session radio address.
    pub dev_addr: DevAddr,
    /// Uplink counter of the frame this event came from.
    pub fcnt_up: u32,
    /// Application port.
    pub f_port: Option<u8>,
    /// Gateway that processed the frame.
    pub gateway_id: GatewayId,
    /// Set when a Mark-mode device saw this logical message via another
    /// gateway first.
    pub is_duplicate: bool,
    /// Decoded payload, or `Value::Null` when decoding failed or no decoder
    /// is configured.
    pub payload: serde_json::Value,
    /// Raw payload, hex-encoded, always present.
    pub raw_payload: String,
}

/// A queued outbound message waiting for a downlink opportunity.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    /// Backend-side message identity, used to settle it.
    pub id: String,
    /// Application payload.
    pub payload: Bytes,
    /// Application port to send on.
    pub f_port: u8,
    /// Whether the device must acknowledge it.
    pub confirmed: bool,
}

/// The shared device-directory service.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// All devices registered under `dev_addr`, filtered by the calling
    /// gateway's identity.
    async fn search_devices(
        &self,
        gateway_id: &GatewayId,
        dev_addr: DevAddr,
    ) -> Result<Vec<DirectoryEntry>, BackendError>;

    /// Atomic next downlink counter for a device multiple gateways may race
    /// for.
    async fn next_fcnt_down(
        &self,
        dev_eui: DevEui,
        current_fcnt_down: u32,
        payload_fcnt: u32,
        gateway_id: &GatewayId,
    ) -> Result<u32, BackendError>;

    /// Bundled dedup decision, optionally carrying the next downlink counter
    /// and an ADR block in the same round trip.
    async fn execute_dedup_bundle(
        &self,
        dev_eui: DevEui,
        request: &BundleRequest,
    ) -> Result<BundleResponse, BackendError>;

    /// Reinitialize the backend's counter cache after an ABP device reset.
    async fn reset_abp_counter_cache(
        &self,
        dev_eui: DevEui,
        fcnt: u32,
        gateway_id: &GatewayId,
    ) -> Result<bool, BackendError>;
}

/// Per-device backend session: telemetry out, pending messages in, twin
/// reported-property writes.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Deliver one telemetry event upstream.
    async fn send_event(&self, event: TelemetryEvent) -> Result<(), BackendError>;

    /// Poll the device's outbound queue, waiting at most `timeout`.
    async fn receive_pending(
        &self,
        timeout: Duration,
    ) -> Result<Option<PendingMessage>, BackendError>;

    /// Write reported twin properties. `false` means the backend refused the
    /// write without faulting; the caller keeps its state dirty.
    async fn update_reported_properties(
        &self,
        properties: serde_json::Value,
    ) -> Result<bool, BackendError>;

    /// Settle a pending message as undeliverable (too large, malformed).
    async fn reject(&self, message: &PendingMessage) -> Result<(), BackendError>;

    /// Return a pending message to the queue for a later attempt.
    async fn abandon(&self, message: &PendingMessage) -> Result<(), BackendError>;

    /// Settle a pending message as delivered.
    async fn complete(&self, message: &PendingMessage) -> Result<(), BackendError>;
}

/// Builds device records from directory rows (twin fetch, key lookup).
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// Instantiate the record for one directory entry.
    async fn create(&self, entry: &DirectoryEntry) -> Result<DeviceRecord, BackendError>;
}

/// Downstream half of the packet-forwarding socket.
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Hand a downlink frame to the radio side.
    async fn send_downstream(&self, frame: DownlinkFrame) -> Result<(), BackendError>;
}

/// Payload decoder. Failure is non-fatal: telemetry still goes out with the
/// raw payload.
#[async_trait]
pub trait PayloadCodec: Send + Sync {
    /// Decode `payload` for `dev_eui` using the named decoder.
    async fn decode(
        &self,
        dev_eui: DevEui,
        payload: &[u8],
        f_port: Option<u8>,
        decoder_id: Option<&str>,
    ) -> Result<serde_json::Value, CodecError>;
}

/// Extension point invoked once per newly resolved device, before the record
/// becomes visible to other requests.
pub trait DeviceInitializer: Send + Sync {
    /// Attach per-device behavior to a freshly resolved record.
    fn device_resolved(&self, device: &Arc<DeviceRecord>);
}
