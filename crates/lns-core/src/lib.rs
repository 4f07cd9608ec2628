//! LoRaWAN network-server core.
//!
//! Turns a raw radio uplink, possibly observed by several independent
//! gateways, into a validated, deduplicated telemetry event delivered once
//! per logical message, plus an optional downlink that either makes one of
//! the region's receive windows or is not sent at all.
//!
//! The crate is the orchestration layer only. Radio transport, the backend
//! device directory, twin persistence, and payload codecs are consumed
//! through the abstract contracts in [`backend`]; hosts wire those up and
//! feed uplinks through [`pipeline::UplinkPipeline::dispatch`].

#![forbid(unsafe_code)]

pub mod backend;
pub mod dedup;
pub mod device;
pub mod error;
pub mod fcnt;
pub mod keyed_lock;
pub mod pipeline;
pub mod registry;
pub mod timer;
pub mod tracked;

pub use backend::{
    BundleRequest, BundleResponse, DeviceClient, DeviceDirectory, DeviceFactory,
    DeviceInitializer, DirectoryEntry, PacketSink, PayloadCodec, PendingMessage, TelemetryEvent,
};
pub use dedup::{DedupOutcome, DeduplicationResult, Deduplicator};
pub use device::{ActivationMode, DeduplicationMode, DeviceRecord, FcntValidation};
pub use error::{BackendError, CodecError};
pub use fcnt::{FrameCounterUpdater, FCNT_PERSIST_DELTA};
pub use keyed_lock::KeyedLocks;
pub use pipeline::{FailureReason, Request, RequestHandle, RequestOutcome, UplinkPipeline};
pub use registry::DeviceRegistry;
pub use timer::OperationTimer;
pub use tracked::{Tracked, TrackedCounter};
