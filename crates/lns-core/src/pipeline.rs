//! The request pipeline: one state machine per received uplink.
//!
//! Sequencing per request: resolve the device, check integrity and replay,
//! run the deduplication decision, emit telemetry, optionally build a
//! downlink inside the receive-window budget, and flush counter state. The
//! request reaches exactly one terminal outcome, exactly once, observed
//! through a one-shot channel; a missed downlink window is never fatal for
//! telemetry that already went out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lns_protocol::{DownlinkFrame, GatewayId, Region, RxWindow, UplinkFrame};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::{PacketSink, PayloadCodec, PendingMessage, TelemetryEvent};
use crate::dedup::Deduplicator;
use crate::device::{DeviceRecord, FcntValidation};
use crate::fcnt::FrameCounterUpdater;
use crate::registry::DeviceRegistry;
use crate::timer::{OperationTimer, DEFAULT_PROCESSING_MARGIN};

/// Default cap on how long the pipeline polls the pending-message queue.
/// The effective wait is further bounded by the remaining window budget.
pub const DEFAULT_PENDING_POLL_BUDGET: Duration = Duration::from_millis(400);

/// Why a request terminated without full processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    /// No directory entry, or no candidate's MIC validated: foreign traffic.
    #[error("unknown device")]
    UnknownDevice,

    /// Stale or replayed frame counter (MIC mismatches surface as
    /// `UnknownDevice` during resolution).
    #[error("invalid frame counter or MIC")]
    InvalidFrameCounterOrMic,

    /// Another gateway already delivered this message and the device is in
    /// Drop mode.
    #[error("duplicate uplink dropped")]
    DeduplicationDrop,

    /// A backend call faulted before telemetry could be delivered. Cached
    /// counters were rolled back to their committed values.
    #[error("backend unavailable")]
    BackendUnavailable,
}

/// Terminal outcome of one request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// Telemetry was delivered; `downlink` is whatever made it onto the air.
    Succeeded {
        /// The resolved device.
        device: Arc<DeviceRecord>,
        /// The downlink sent, if any window could be met.
        downlink: Option<DownlinkFrame>,
    },
    /// The request terminated early.
    Failed {
        /// The resolved device, when resolution got that far.
        device: Option<Arc<DeviceRecord>>,
        /// Why processing stopped.
        reason: FailureReason,
    },
}

impl RequestOutcome {
    /// True for `Succeeded`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// The downlink frame, when one was sent.
    #[must_use]
    pub const fn downlink(&self) -> Option<&DownlinkFrame> {
        match self {
            Self::Succeeded { downlink, .. } => downlink.as_ref(),
            Self::Failed { .. } => None,
        }
    }

    /// The failure reason, when the request failed.
    #[must_use]
    pub const fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { reason, .. } => Some(*reason),
        }
    }

    /// The device the request resolved to, if any.
    #[must_use]
    pub const fn device(&self) -> Option<&Arc<DeviceRecord>> {
        match self {
            Self::Succeeded { device, .. } => Some(device),
            Self::Failed { device, .. } => device.as_ref(),
        }
    }
}

/// One processing attempt for one received radio frame.
pub struct Request {
    /// The parsed uplink.
    pub frame: UplinkFrame,
    /// When the radio side handed us the frame.
    pub received_at: Instant,
    /// Where a downlink for this frame would go.
    pub sink: Arc<dyn PacketSink>,
}

impl Request {
    /// Bundle a frame with its receipt time and forwarding sink.
    pub fn new(frame: UplinkFrame, sink: Arc<dyn PacketSink>, received_at: Instant) -> Self {
        Self {
            frame,
            received_at,
            sink,
        }
    }
}

/// What the pending-queue poll yielded.
enum PendingDecision {
    /// Nothing queued (or the poll faulted).
    Empty,
    /// A message that fits the regional payload limit.
    Fit(PendingMessage),
    /// An oversized message, already rejected back to its source.
    Rejected,
}

/// Awaitable completion of a dispatched request.
pub struct RequestHandle {
    receiver: oneshot::Receiver<RequestOutcome>,
}

impl RequestHandle {
    /// Wait for the request's terminal outcome.
    ///
    /// A dropped pipeline task (which should not happen) surfaces as a
    /// backend failure rather than a panic.
    pub async fn outcome(self) -> RequestOutcome {
        self.receiver.await.unwrap_or_else(|_| {
            warn!("pipeline task dropped before completing its request");
            RequestOutcome::Failed {
                device: None,
                reason: FailureReason::BackendUnavailable,
            }
        })
    }
}

/// Top-level per-gateway message dispatcher.
pub struct UplinkPipeline {
    registry: Arc<DeviceRegistry>,
    fcnt: Arc<FrameCounterUpdater>,
    dedup: Arc<Deduplicator>,
    codec: Arc<dyn PayloadCodec>,
    gateway_id: GatewayId,
    region: Region,
    processing_margin: Duration,
    pending_poll_budget: Duration,
}

impl UplinkPipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        fcnt: Arc<FrameCounterUpdater>,
        dedup: Arc<Deduplicator>,
        codec: Arc<dyn PayloadCodec>,
        gateway_id: GatewayId,
        region: Region,
    ) -> Self {
        Self {
            registry,
            fcnt,
            dedup,
            codec,
            gateway_id,
            region,
            processing_margin: DEFAULT_PROCESSING_MARGIN,
            pending_poll_budget: DEFAULT_PENDING_POLL_BUDGET,
        }
    }

    /// Builder: override the window-miss margin.
    #[must_use]
    pub const fn with_processing_margin(mut self, margin: Duration) -> Self {
        self.processing_margin = margin;
        self
    }

    /// Builder: override the pending-message poll cap.
    #[must_use]
    pub const fn with_pending_poll_budget(mut self, budget: Duration) -> Self {
        self.pending_poll_budget = budget;
        self
    }

    /// Fire-and-forget submission: the request runs on its own task and the
    /// handle resolves once, at the terminal transition.
    pub fn dispatch(
        self: &Arc<Self>,
        frame: UplinkFrame,
        sink: Arc<dyn PacketSink>,
        received_at: Instant,
    ) -> RequestHandle {
        let (tx, rx) = oneshot::channel();
        let pipeline = Arc::clone(self);
        let request = Request::new(frame, sink, received_at);
        tokio::spawn(async move {
            let outcome = pipeline.process(request).await;
            if tx.send(outcome).is_err() {
                debug!("request observer dropped before completion");
            }
        });
        RequestHandle { receiver: rx }
    }

    /// Run one request to its terminal outcome.
    pub async fn process(&self, request: Request) -> RequestOutcome {
        let Request {
            frame,
            received_at,
            sink,
        } = request;
        let timer = OperationTimer::new(received_at, self.region);

        // Resolve.
        let device = match self.registry.resolve_device(&frame).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!(dev_addr = %frame.dev_addr, "unknown or foreign frame");
                return RequestOutcome::Failed {
                    device: None,
                    reason: FailureReason::UnknownDevice,
                };
            }
            Err(error) => {
                warn!(dev_addr = %frame.dev_addr, %error, "device resolution failed");
                return RequestOutcome::Failed {
                    device: None,
                    reason: FailureReason::BackendUnavailable,
                };
            }
        };

        // Integrity & replay: the MIC already validated during resolution,
        // so only the counter needs judging here.
        match device.validate_fcnt_up(frame.fcnt) {
            FcntValidation::Accepted => {}
            FcntValidation::Reset => {
                if let Err(error) = self.fcnt.reset(&device, frame.fcnt).await {
                    warn!(dev_eui = %device.dev_eui(), %error, "counter reset failed");
                    device.rollback_session_changes();
                    return RequestOutcome::Failed {
                        device: Some(device),
                        reason: FailureReason::BackendUnavailable,
                    };
                }
            }
            FcntValidation::Rejected => {
                debug!(
                    dev_eui = %device.dev_eui(),
                    fcnt = frame.fcnt,
                    current = device.fcnt_up().value(),
                    "stale frame counter"
                );
                return RequestOutcome::Failed {
                    device: Some(device),
                    reason: FailureReason::InvalidFrameCounterOrMic,
                };
            }
        }

        // Counter/dedup resolution.
        let dedup_outcome = match self.dedup.resolve(&device, frame.fcnt).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(dev_eui = %device.dev_eui(), %error, "dedup decision failed");
                device.rollback_session_changes();
                return RequestOutcome::Failed {
                    device: Some(device),
                    reason: FailureReason::BackendUnavailable,
                };
            }
        };
        if !dedup_outcome.result.can_process {
            return RequestOutcome::Failed {
                device: Some(device),
                reason: FailureReason::DeduplicationDrop,
            };
        }

        device.fcnt_up().advance_to(frame.fcnt);
        device.record_processing_gateway(&self.gateway_id);

        // Emit telemetry. Decode failures are non-fatal; a failed delivery
        // fails the request and rolls the provisional counters back.
        let event = self
            .telemetry_event(&device, &frame, dedup_outcome.result.is_duplicate)
            .await;
        if let Err(error) = device.client().send_event(event).await {
            warn!(dev_eui = %device.dev_eui(), %error, "telemetry delivery failed");
            device.rollback_session_changes();
            return RequestOutcome::Failed {
                device: Some(device),
                reason: FailureReason::BackendUnavailable,
            };
        }

        // Downlink decision: best effort inside the window budget. Nothing
        // past this point may fail the request.
        let downlink = self
            .build_downlink(
                &device,
                &frame,
                &timer,
                dedup_outcome.next_fcnt_down,
                sink.as_ref(),
            )
            .await;

        // Persist per the batching policy; dirty state survives a fault and
        // is retried on the next uplink.
        if let Err(error) = self.fcnt.save_changes(&device).await {
            warn!(dev_eui = %device.dev_eui(), %error, "counter flush failed; left dirty");
        }

        RequestOutcome::Succeeded { device, downlink }
    }

    async fn telemetry_event(
        &self,
        device: &Arc<DeviceRecord>,
        frame: &UplinkFrame,
        is_duplicate: bool,
    ) -> TelemetryEvent {
        let payload = match self
            .codec
            .decode(
                device.dev_eui(),
                &frame.payload,
                frame.f_port,
                device.decoder_id(),
            )
            .await
        {
            Ok(decoded) => decoded,
            Err(error) => {
                debug!(dev_eui = %device.dev_eui(), %error, "decode failed; raw payload only");
                serde_json::Value::Null
            }
        };
        TelemetryEvent {
            dev_eui: device.dev_eui(),
            dev_addr: device.dev_addr(),
            fcnt_up: frame.fcnt,
            f_port: frame.f_port,
            gateway_id: self.gateway_id.clone(),
            is_duplicate,
            payload,
            raw_payload: hex::encode(&frame.payload),
        }
    }

    /// Build and forward a downlink when one is due and a window can still
    /// be met. Every failure in here degrades to "no downlink this cycle".
    async fn build_downlink(
        &self,
        device: &Arc<DeviceRecord>,
        frame: &UplinkFrame,
        timer: &OperationTimer,
        bundled_fcnt_down: Option<u32>,
        sink: &dyn PacketSink,
    ) -> Option<DownlinkFrame> {
        // Both windows already closed: not even an ACK can be sent.
        timer.resolve_window(self.processing_margin)?;

        let pending = match self.checked_pending_message(device, frame, timer).await {
            PendingDecision::Fit(message) => Some(message),
            PendingDecision::Empty => None,
            // An oversized message was rejected back to its source; this
            // cycle proceeds without any downlink.
            PendingDecision::Rejected => return None,
        };
        if !frame.confirmed && pending.is_none() {
            return None;
        }

        // Downlink counter: prefer the value bundled into the dedup round
        // trip, fall back to the strategy call.
        let fcnt_down = match bundled_fcnt_down {
            Some(value) => {
                device.fcnt_down().advance_to(value);
                value
            }
            None => match self.fcnt.next_fcnt_down(device, frame.fcnt).await {
                Ok(value) => value,
                Err(error) => {
                    warn!(dev_eui = %device.dev_eui(), %error, "no downlink this cycle");
                    self.abandon_quietly(device, pending.as_ref()).await;
                    return None;
                }
            },
        };

        // Re-check the budget after the I/O above.
        let Some(window) = timer.resolve_window(self.processing_margin) else {
            debug!(dev_eui = %device.dev_eui(), "missed both receive windows");
            self.abandon_quietly(device, pending.as_ref()).await;
            return None;
        };

        let downlink = pending.as_ref().map_or_else(
            || DownlinkFrame::ack(device.dev_addr(), fcnt_down, window),
            |message| DownlinkFrame {
                dev_addr: device.dev_addr(),
                fcnt_down,
                f_port: Some(message.f_port),
                payload: message.payload.clone(),
                ack: frame.confirmed,
                window,
            },
        );

        match sink.send_downstream(downlink.clone()).await {
            Ok(()) => {
                if let Some(message) = pending.as_ref() {
                    if let Err(error) = device.client().complete(message).await {
                        warn!(dev_eui = %device.dev_eui(), %error, "pending message completion failed");
                    }
                }
                debug!(
                    dev_eui = %device.dev_eui(),
                    fcnt_down,
                    window = ?downlink.window,
                    "downlink forwarded"
                );
                Some(downlink)
            }
            Err(error) => {
                warn!(dev_eui = %device.dev_eui(), %error, "downlink forwarding failed");
                self.abandon_quietly(device, pending.as_ref()).await;
                None
            }
        }
    }

    /// Poll the device's outbound queue inside the remaining window budget
    /// and judge the message against the regional payload limit.
    async fn checked_pending_message(
        &self,
        device: &Arc<DeviceRecord>,
        frame: &UplinkFrame,
        timer: &OperationTimer,
    ) -> PendingDecision {
        let Some(rx2_left) = timer.remaining(RxWindow::Rx2) else {
            return PendingDecision::Empty;
        };
        let budget = rx2_left
            .saturating_sub(self.processing_margin)
            .min(self.pending_poll_budget);
        let message = match device.client().receive_pending(budget).await {
            Ok(Some(message)) => message,
            Ok(None) => return PendingDecision::Empty,
            Err(error) => {
                warn!(dev_eui = %device.dev_eui(), %error, "pending-message poll failed");
                return PendingDecision::Empty;
            }
        };

        let max_app_payload = self
            .region
            .max_downlink_app_payload(frame.data_rate, frame.f_opts.len())
            .ok()
            .flatten();
        if max_app_payload.is_some_and(|max| message.payload.len() <= max) {
            return PendingDecision::Fit(message);
        }

        // Too large for this data rate: reject so the source can requeue or
        // drop it per its own policy.
        warn!(
            dev_eui = %device.dev_eui(),
            size = message.payload.len(),
            ?max_app_payload,
            "pending message exceeds regional payload limit"
        );
        if let Err(error) = device.client().reject(&message).await {
            warn!(dev_eui = %device.dev_eui(), %error, "pending message rejection failed");
        }
        PendingDecision::Rejected
    }

    async fn abandon_quietly(&self, device: &Arc<DeviceRecord>, pending: Option<&PendingMessage>) {
        if let Some(message) = pending {
            if let Err(error) = device.client().abandon(message).await {
                warn!(dev_eui = %device.dev_eui(), %error, "pending message abandon failed");
            }
        }
    }

    /// Registry this pipeline resolves against.
    #[must_use]
    pub const fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }
}
