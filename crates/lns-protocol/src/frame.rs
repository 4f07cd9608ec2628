//! Parsed uplink and downlink frames with message-integrity codes.
//!
//! The MIC is a 4-byte truncated keyed MAC over the frame's canonical byte
//! form under the device's network session key. It authenticates the frame
//! and, because several devices can share one `DevAddr`, it is also what
//! disambiguates them during resolution: the frame belongs to whichever
//! candidate's key verifies.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::region::{DataRate, RxWindow};
use crate::types::{AesKey, DevAddr};

type HmacSha256 = Hmac<Sha256>;

/// 4-byte message integrity code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mic(pub [u8; 4]);

/// One radio uplink as seen by the server core: already stripped of PHY
/// framing, not yet attributed to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkFrame {
    /// Session radio address the frame claims.
    pub dev_addr: DevAddr,
    /// Uplink frame counter carried in the frame header.
    pub fcnt: u32,
    /// Application port; `None` for MAC-only frames.
    pub f_port: Option<u8>,
    /// Whether the device asked for an acknowledgement.
    pub confirmed: bool,
    /// Piggy-backed MAC commands from the frame header options field.
    pub f_opts: Bytes,
    /// Application payload (still encrypted; codecs are external).
    pub payload: Bytes,
    /// Data rate the uplink was received at.
    pub data_rate: DataRate,
    /// Integrity code as received.
    pub mic: Mic,
}

impl UplinkFrame {
    /// Compute the expected MIC for this frame under `key`.
    ///
    /// # Panics
    /// Never panics: HMAC accepts keys of any length.
    #[must_use]
    pub fn compute_mic(&self, key: &AesKey) -> Mic {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(&self.canonical_bytes());
        let tag = mac.finalize().into_bytes();
        let mut mic = [0u8; 4];
        mic.copy_from_slice(&tag[..4]);
        Mic(mic)
    }

    /// Verify the received MIC against `key`.
    #[must_use]
    pub fn verify_mic(&self, key: &AesKey) -> bool {
        self.compute_mic(key) == self.mic
    }

    /// Canonical byte form the MIC is computed over. Direction byte first so
    /// uplink and downlink MACs can never collide.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.f_opts.len() + self.payload.len());
        out.push(0x00); // uplink direction
        out.extend_from_slice(&self.dev_addr.0.to_le_bytes());
        out.extend_from_slice(&self.fcnt.to_le_bytes());
        out.push(u8::from(self.confirmed));
        out.push(self.f_port.unwrap_or(0));
        out.extend_from_slice(&self.f_opts);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// A downlink frame ready for the packet-forwarding sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownlinkFrame {
    /// Destination radio address.
    pub dev_addr: DevAddr,
    /// Downlink frame counter assigned by the counter strategy.
    pub fcnt_down: u32,
    /// Application port.
    pub f_port: Option<u8>,
    /// Application payload; empty for a bare acknowledgement.
    pub payload: Bytes,
    /// Whether this downlink acknowledges a confirmed uplink.
    pub ack: bool,
    /// Receive window the frame is scheduled into.
    pub window: RxWindow,
}

impl DownlinkFrame {
    /// Bare acknowledgement for a confirmed uplink.
    #[must_use]
    pub const fn ack(dev_addr: DevAddr, fcnt_down: u32, window: RxWindow) -> Self {
        Self {
            dev_addr,
            fcnt_down,
            f_port: None,
            payload: Bytes::new(),
            ack: true,
            window,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn key(byte: u8) -> AesKey {
        AesKey([byte; 16])
    }

    fn frame(key: &AesKey) -> UplinkFrame {
        let mut frame = UplinkFrame {
            dev_addr: DevAddr(0x2601_0001),
            fcnt: 7,
            f_port: Some(2),
            confirmed: false,
            f_opts: Bytes::new(),
            payload: Bytes::from_static(b"\x01\x02\x03"),
            data_rate: DataRate(5),
            mic: Mic([0; 4]),
        };
        frame.mic = frame.compute_mic(key);
        frame
    }

    #[test]
    fn mic_verifies_under_signing_key_only() {
        let frame = frame(&key(0xAA));
        assert!(frame.verify_mic(&key(0xAA)));
        assert!(!frame.verify_mic(&key(0xBB)));
    }

    #[test]
    fn mic_rejects_tampered_payload() {
        let mut frame = frame(&key(0xAA));
        frame.payload = Bytes::from_static(b"\x01\x02\x04");
        assert!(!frame.verify_mic(&key(0xAA)));
    }

    #[test]
    fn mic_rejects_replayed_counter_change() {
        let mut frame = frame(&key(0xAA));
        frame.fcnt += 1;
        assert!(!frame.verify_mic(&key(0xAA)));
    }

    #[test]
    fn mic_covers_confirmed_flag_and_port() {
        let base = frame(&key(0xAA));

        let mut confirmed = base.clone();
        confirmed.confirmed = true;
        assert!(!confirmed.verify_mic(&key(0xAA)));

        let mut reported = base;
        reported.f_port = Some(3);
        assert!(!reported.verify_mic(&key(0xAA)));
    }

    #[test]
    fn ack_downlink_is_empty_and_flagged() {
        let ack = DownlinkFrame::ack(DevAddr(1), 42, RxWindow::Rx1);
        assert!(ack.ack);
        assert!(ack.payload.is_empty());
        assert_eq!(ack.fcnt_down, 42);
    }
}
