//! Wire-adjacent types for the LoRaWAN network-server core.
//!
//! This crate carries everything the server core needs to reason about a
//! radio frame without owning any transport: device identifiers, session
//! keys, parsed uplink/downlink frames with message-integrity codes, and
//! the read-only regional parameter tables (receive-window delays, maximum
//! payload per data rate).
//!
//! No I/O happens here; the types are plain data with validation attached.

#![forbid(unsafe_code)]

pub mod error;
pub mod frame;
pub mod region;
pub mod types;

pub use error::ProtocolError;
pub use frame::{DownlinkFrame, Mic, UplinkFrame};
pub use region::{DataRate, Region, RegionParams, RxWindow, DOWNLINK_OVERHEAD_BYTES};
pub use types::{AesKey, DevAddr, DevEui, GatewayId};
