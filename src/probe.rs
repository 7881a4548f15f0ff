//! Zero-window probing, RFC 9293 section 3.8.6.1.
//!
//! A zero window says nothing about packet loss, so this timer runs beside
//! the retransmission timer and never touches RTO or backoff state.

use std::{task::Poll, time::Duration};

use tokio::time::Instant;

use crate::{config::Config, timer::Timer};

/// Observable state of a [`ZeroWindowProbeTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Peer window is open, or there is nothing to send.
    Inactive,
    /// Peer window is zero while data is waiting.
    Probing,
}

/// Probes a peer that advertises a zero receive window.
#[derive(Debug, Clone)]
pub struct ZeroWindowProbeTimer {
    timer: Timer,
    lower_bound: Duration,
    upper_bound: Duration,
    interval: Duration,
    probes_sent: u32,
}

impl ZeroWindowProbeTimer {
    /// Creates an inactive probe timer.
    pub fn new(lower_bound: Duration, upper_bound: Duration) -> Self {
        Self {
            timer: Timer::default(),
            lower_bound,
            upper_bound,
            interval: lower_bound,
            probes_sent: 0,
        }
    }

    /// Updates the timer from a window advertised by the peer.
    ///
    /// A zero window with data pending starts probing if it is not already
    /// running; a zero window seen while probing leaves the interval as is.
    /// Any nonzero window stops probing and resets the interval.
    pub fn note_window(&mut self, now: Instant, window: u32, data_pending: bool) {
        if window != 0 {
            if self.timer.is_armed() {
                log::debug!("peer window reopened ({window}), probing stopped");
            }
            self.reset();
        } else if data_pending && !self.timer.is_armed() {
            self.interval = self.lower_bound;
            self.timer.set(now + self.interval);
            log::debug!("peer window is zero, probing in {:?}", self.interval);
        }
    }

    /// Checks the deadline against `now`.
    ///
    /// `Ready` tells the caller to send a one byte probe. The interval has
    /// already doubled (capped at the upper bound) and the timer re-armed.
    pub fn poll_expiration(&mut self, now: Instant) -> Poll<()> {
        if self.timer.poll_expiration(now).is_pending() {
            return Poll::Pending;
        }

        self.probes_sent = self.probes_sent.saturating_add(1);
        self.interval = self.interval.saturating_mul(2).min(self.upper_bound);
        self.timer.set(now + self.interval);
        log::debug!(
            "zero window probe #{}, next in {:?}",
            self.probes_sent,
            self.interval
        );
        Poll::Ready(())
    }

    /// Stops probing.
    pub fn reset(&mut self) {
        self.timer.cancel();
        self.interval = self.lower_bound;
        self.probes_sent = 0;
    }

    /// Current state.
    pub fn state(&self) -> ProbeState {
        if self.timer.is_armed() {
            ProbeState::Probing
        } else {
            ProbeState::Inactive
        }
    }

    /// Interval until the next probe.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probes sent since probing started.
    #[inline]
    pub fn probes_sent(&self) -> u32 {
        self.probes_sent
    }

    /// When the next probe is due.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }
}

impl From<&Config> for ZeroWindowProbeTimer {
    fn from(config: &Config) -> Self {
        Self::new(config.probe_lower_bound, config.probe_upper_bound)
    }
}
