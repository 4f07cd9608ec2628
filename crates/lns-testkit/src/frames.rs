//! Uplink frame builders.

use bytes::Bytes;
use lns_protocol::{AesKey, DataRate, DevAddr, Mic, UplinkFrame};

/// Session key filled with one byte, for readable test setups.
#[must_use]
pub const fn key(byte: u8) -> AesKey {
    AesKey([byte; 16])
}

/// Start building an uplink for `dev_addr` carrying counter `fcnt`.
#[must_use]
pub fn uplink(dev_addr: DevAddr, fcnt: u32) -> UplinkBuilder {
    UplinkBuilder {
        frame: UplinkFrame {
            dev_addr,
            fcnt,
            f_port: Some(1),
            confirmed: false,
            f_opts: Bytes::new(),
            payload: Bytes::from_static(b"\x01\x02\x03"),
            data_rate: DataRate(5),
            mic: Mic([0; 4]),
        },
    }
}

/// Builder over [`UplinkFrame`] that signs last.
pub struct UplinkBuilder {
    frame: UplinkFrame,
}

impl UplinkBuilder {
    /// Mark the uplink confirmed (device expects an ACK).
    #[must_use]
    pub const fn confirmed(mut self) -> Self {
        self.frame.confirmed = true;
        self
    }

    /// Set the application payload.
    #[must_use]
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.frame.payload = Bytes::copy_from_slice(payload);
        self
    }

    /// Set piggy-backed MAC command bytes.
    #[must_use]
    pub fn f_opts(mut self, f_opts: &[u8]) -> Self {
        self.frame.f_opts = Bytes::copy_from_slice(f_opts);
        self
    }

    /// Set the data rate index.
    #[must_use]
    pub const fn data_rate(mut self, dr: u8) -> Self {
        self.frame.data_rate = DataRate(dr);
        self
    }

    /// Set the application port.
    #[must_use]
    pub const fn port(mut self, f_port: u8) -> Self {
        self.frame.f_port = Some(f_port);
        self
    }

    /// Sign with the device's network session key and finish.
    #[must_use]
    pub fn sign(mut self, key: &AesKey) -> UplinkFrame {
        self.frame.mic = self.frame.compute_mic(key);
        self.frame
    }

    /// Finish with a deliberately wrong MIC.
    #[must_use]
    pub fn badly_signed(mut self) -> UplinkFrame {
        self.frame.mic = Mic([0xDE, 0xAD, 0xBE, 0xEF]);
        self.frame
    }
}
