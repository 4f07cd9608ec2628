//! Test support for the network-server core.
//!
//! In-memory, scriptable stand-ins for every backend contract the core
//! consumes, plus uplink frame builders. Consumed as a dev-dependency; no
//! production code depends on this crate.

#![forbid(unsafe_code)]

pub mod client;
pub mod codec;
pub mod directory;
pub mod frames;
pub mod sink;

use std::sync::Once;

pub use client::RecordingClient;
pub use codec::{FailingCodec, HexCodec};
pub use directory::{DeviceTemplate, InMemoryDirectory, TestFactory};
pub use frames::{key, uplink, UplinkBuilder};
pub use sink::RecordingSink;

static TRACING: Once = Once::new();

/// Install a test tracing subscriber once per process, honoring
/// `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
