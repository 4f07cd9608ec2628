//! Operation time watcher.
//!
//! Tracks how long an uplink has been in flight and how much budget remains
//! before each regional receive window closes. Every downlink timing
//! decision in the pipeline is a synchronous comparison against this; no
//! component ever sleeps to "catch" a window.

use std::time::{Duration, Instant};

use lns_protocol::{Region, RxWindow};

/// Margin reserved for frame construction and the forwarding hop; a window
/// whose remaining budget is below this is treated as already missed.
pub const DEFAULT_PROCESSING_MARGIN: Duration = Duration::from_millis(100);

/// Elapsed-time and window-budget view over one request.
#[derive(Debug, Clone, Copy)]
pub struct OperationTimer {
    received_at: Instant,
    region: Region,
}

impl OperationTimer {
    /// Start a timer at uplink receipt, in the given region.
    #[must_use]
    pub const fn new(received_at: Instant, region: Region) -> Self {
        Self {
            received_at,
            region,
        }
    }

    /// Region this timer budgets against.
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Time since the uplink was received.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Budget left before `window` closes; `None` once it has passed.
    #[must_use]
    pub fn remaining(&self, window: RxWindow) -> Option<Duration> {
        self.region
            .window_delay(window)
            .checked_sub(self.elapsed())
    }

    /// Earliest window whose remaining budget still covers `margin`, RX1
    /// preferred. `None` means no downlink can be sent this cycle.
    #[must_use]
    pub fn resolve_window(&self, margin: Duration) -> Option<RxWindow> {
        for window in [RxWindow::Rx1, RxWindow::Rx2] {
            if self.remaining(window).is_some_and(|left| left >= margin) {
                return Some(window);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_with_elapsed(elapsed: Duration) -> OperationTimer {
        OperationTimer::new(Instant::now() - elapsed, Region::Eu868)
    }

    #[test]
    fn fresh_uplink_targets_rx1() {
        let timer = timer_with_elapsed(Duration::ZERO);
        assert_eq!(
            timer.resolve_window(DEFAULT_PROCESSING_MARGIN),
            Some(RxWindow::Rx1)
        );
    }

    #[test]
    fn slow_processing_falls_back_to_rx2() {
        // 950ms elapsed: RX1 (1s) leaves under the 100ms margin, RX2 (2s) fits.
        let timer = timer_with_elapsed(Duration::from_millis(950));
        assert_eq!(
            timer.resolve_window(DEFAULT_PROCESSING_MARGIN),
            Some(RxWindow::Rx2)
        );
    }

    #[test]
    fn both_windows_missed_means_no_downlink() {
        let timer = timer_with_elapsed(Duration::from_millis(1950));
        assert_eq!(timer.resolve_window(DEFAULT_PROCESSING_MARGIN), None);
    }

    #[test]
    fn remaining_shrinks_and_expires() {
        let timer = timer_with_elapsed(Duration::from_millis(500));
        let rx1 = timer.remaining(RxWindow::Rx1).expect("rx1 open");
        let rx2 = timer.remaining(RxWindow::Rx2).expect("rx2 open");
        assert!(rx1 < Duration::from_millis(500));
        assert!(rx2 > rx1);

        let late = timer_with_elapsed(Duration::from_secs(3));
        assert!(late.remaining(RxWindow::Rx1).is_none());
        assert!(late.remaining(RxWindow::Rx2).is_none());
    }
}
