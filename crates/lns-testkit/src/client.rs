//! Recording per-device client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lns_core::backend::{DeviceClient, PendingMessage, TelemetryEvent};
use lns_core::error::BackendError;
use parking_lot::Mutex;

/// Device client that records everything and replays a scripted pending
/// queue.
#[derive(Default)]
pub struct RecordingClient {
    events: Mutex<Vec<TelemetryEvent>>,
    reported: Mutex<Vec<serde_json::Value>>,
    pending: Mutex<VecDeque<PendingMessage>>,
    rejected: Mutex<Vec<String>>,
    abandoned: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    refuse_reported: AtomicBool,
    fail_send: AtomicBool,
}

impl RecordingClient {
    /// Fresh client with an empty pending queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outbound message for the next `receive_pending` poll.
    pub fn queue_pending(&self, message: PendingMessage) {
        self.pending.lock().push_back(message);
    }

    /// Telemetry events delivered so far.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Reported-property documents written so far.
    #[must_use]
    pub fn reported_writes(&self) -> Vec<serde_json::Value> {
        self.reported.lock().clone()
    }

    /// Ids of rejected pending messages.
    #[must_use]
    pub fn rejected(&self) -> Vec<String> {
        self.rejected.lock().clone()
    }

    /// Ids of abandoned pending messages.
    #[must_use]
    pub fn abandoned(&self) -> Vec<String> {
        self.abandoned.lock().clone()
    }

    /// Ids of completed pending messages.
    #[must_use]
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    /// Make `update_reported_properties` answer `false` without faulting.
    pub fn set_refuse_reported(&self, refuse: bool) {
        self.refuse_reported.store(refuse, Ordering::SeqCst);
    }

    /// Make `send_event` fault.
    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceClient for RecordingClient {
    async fn send_event(&self, event: TelemetryEvent) -> Result<(), BackendError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("scripted telemetry outage".into()));
        }
        self.events.lock().push(event);
        Ok(())
    }

    async fn receive_pending(
        &self,
        _timeout: Duration,
    ) -> Result<Option<PendingMessage>, BackendError> {
        Ok(self.pending.lock().pop_front())
    }

    async fn update_reported_properties(
        &self,
        properties: serde_json::Value,
    ) -> Result<bool, BackendError> {
        if self.refuse_reported.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.reported.lock().push(properties);
        Ok(true)
    }

    async fn reject(&self, message: &PendingMessage) -> Result<(), BackendError> {
        self.rejected.lock().push(message.id.clone());
        Ok(())
    }

    async fn abandon(&self, message: &PendingMessage) -> Result<(), BackendError> {
        self.abandoned.lock().push(message.id.clone());
        Ok(())
    }

    async fn complete(&self, message: &PendingMessage) -> Result<(), BackendError> {
        self.completed.lock().push(message.id.clone());
        Ok(())
    }
}
