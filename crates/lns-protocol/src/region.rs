//! Regional parameter tables.
//!
//! Read-only lookup of receive-window delays and maximum MACPayload size per
//! data rate. Only the two regions the server currently deploys in are
//! tabled; the enum is the extension point for more.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

/// Fixed downlink framing overhead in bytes: MHDR (1) + DevAddr (4) +
/// FCtrl (1) + FCnt (2) + FPort (1) + MIC (4).
pub const DOWNLINK_OVERHEAD_BYTES: usize = 13;

/// Data rate index (DR0..DR15) negotiated for an uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRate(pub u8);

/// The two receive windows following an uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RxWindow {
    /// First window, `rx1_delay` after uplink receipt.
    Rx1,
    /// Second window, `rx2_delay` after uplink receipt.
    Rx2,
}

/// Supported deployment regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// EU 863-870 MHz.
    Eu868,
    /// US 902-928 MHz.
    Us915,
}

impl Region {
    /// Regional parameters for this region.
    #[must_use]
    pub const fn params(self) -> RegionParams {
        match self {
            Self::Eu868 => RegionParams {
                rx1_delay: Duration::from_secs(1),
                rx2_delay: Duration::from_secs(2),
                // Max MACPayload per DR0..DR7 (repeater-compatible).
                max_payload: &[59, 59, 59, 123, 230, 230, 230, 230],
            },
            Self::Us915 => RegionParams {
                rx1_delay: Duration::from_secs(1),
                rx2_delay: Duration::from_secs(2),
                // DR0..DR4 uplink data rates.
                max_payload: &[19, 61, 133, 250, 250],
            },
        }
    }

    /// Maximum MACPayload size for a data rate in this region.
    ///
    /// # Errors
    /// Returns [`ProtocolError::UnknownDataRate`] when the index is outside
    /// the regional table.
    pub fn max_payload(self, dr: DataRate) -> ProtocolResult<usize> {
        self.params()
            .max_payload
            .get(dr.0 as usize)
            .copied()
            .ok_or(ProtocolError::UnknownDataRate(dr.0))
    }

    /// Largest application payload that fits a downlink at this data rate,
    /// after framing overhead and `piggyback_len` bytes of piggy-backed MAC
    /// commands. `None` when nothing fits.
    ///
    /// # Errors
    /// Returns [`ProtocolError::UnknownDataRate`] when the index is outside
    /// the regional table.
    pub fn max_downlink_app_payload(
        self,
        dr: DataRate,
        piggyback_len: usize,
    ) -> ProtocolResult<Option<usize>> {
        let max = self.max_payload(dr)?;
        Ok(max.checked_sub(DOWNLINK_OVERHEAD_BYTES + piggyback_len))
    }

    /// Receive-window offset from uplink receipt.
    #[must_use]
    pub const fn window_delay(self, window: RxWindow) -> Duration {
        let params = self.params();
        match window {
            RxWindow::Rx1 => params.rx1_delay,
            RxWindow::Rx2 => params.rx2_delay,
        }
    }
}

/// Per-region timing and size limits.
#[derive(Debug, Clone, Copy)]
pub struct RegionParams {
    /// RX1 offset from uplink receipt.
    pub rx1_delay: Duration,
    /// RX2 offset from uplink receipt.
    pub rx2_delay: Duration,
    /// Max MACPayload bytes indexed by data rate.
    pub max_payload: &'static [usize],
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn eu868_payload_table_matches_regional_parameters() {
        assert_eq!(Region::Eu868.max_payload(DataRate(0)).unwrap(), 59);
        assert_eq!(Region::Eu868.max_payload(DataRate(3)).unwrap(), 123);
        assert_eq!(Region::Eu868.max_payload(DataRate(5)).unwrap(), 230);
    }

    #[test]
    fn unknown_data_rate_is_an_error() {
        assert!(Region::Eu868.max_payload(DataRate(12)).is_err());
        assert!(Region::Us915.max_payload(DataRate(5)).is_err());
    }

    #[test]
    fn downlink_fit_subtracts_overhead_and_piggyback() {
        // DR0 EU868: 59 - 13 = 46 app bytes, minus piggy-backed MAC commands.
        assert_eq!(
            Region::Eu868
                .max_downlink_app_payload(DataRate(0), 0)
                .unwrap(),
            Some(46)
        );
        assert_eq!(
            Region::Eu868
                .max_downlink_app_payload(DataRate(0), 6)
                .unwrap(),
            Some(40)
        );
    }

    #[test]
    fn downlink_fit_is_none_when_overhead_exceeds_budget() {
        // US915 DR0: 19 bytes total, 13 overhead, 7 piggy-backed -> nothing fits.
        assert_eq!(
            Region::Us915
                .max_downlink_app_payload(DataRate(0), 7)
                .unwrap(),
            None
        );
    }

    #[test]
    fn rx2_opens_after_rx1() {
        for region in [Region::Eu868, Region::Us915] {
            assert!(region.window_delay(RxWindow::Rx2) > region.window_delay(RxWindow::Rx1));
        }
    }
}
