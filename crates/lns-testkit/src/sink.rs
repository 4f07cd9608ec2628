//! Recording packet-forwarding sink.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use lns_core::backend::PacketSink;
use lns_core::error::BackendError;
use lns_protocol::DownlinkFrame;
use parking_lot::Mutex;

/// Sink that captures every forwarded downlink.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<DownlinkFrame>>,
    fail: AtomicBool,
}

impl RecordingSink {
    /// Fresh sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Downlinks forwarded so far.
    #[must_use]
    pub fn sent(&self) -> Vec<DownlinkFrame> {
        self.sent.lock().clone()
    }

    /// Make forwarding fault.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PacketSink for RecordingSink {
    async fn send_downstream(&self, frame: DownlinkFrame) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("scripted forwarder outage".into()));
        }
        self.sent.lock().push(frame);
        Ok(())
    }
}
