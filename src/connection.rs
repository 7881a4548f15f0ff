//! Per-connection timing state.
//!
//! [`ConnectionTimers`] bundles the estimator, both timers and the timeout
//! guard of a single connection. It is owned by exactly one worker and is
//! never shared, so none of it needs locking. Time is always passed in,
//! which keeps every transition deterministic under test.

use std::{task::Poll, time::Duration};

use bytes::Bytes;
use tokio::time::Instant;

use crate::{
    config::Config,
    error::{Result, TcpError},
    guard::ConnectionTimeoutGuard,
    probe::ZeroWindowProbeTimer,
    retransmit::RetransmitTimer,
    rto::{RtoEstimator, RtoParams},
};

/// Outbound side of the stack, implemented by the segment transmission path.
pub trait Transmit: Send + 'static {
    /// Sends `segment` (again).
    fn send_segment(&mut self, segment: &Bytes);

    /// Sends a one byte zero-window probe.
    fn send_probe(&mut self);
}

/// An acknowledgment received from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Window advertised by the peer.
    pub window: u32,
    /// Whether the cumulative ACK covers the outstanding segment.
    pub covers_outstanding: bool,
    /// RTT measured by the receive path. When absent, the time since the
    /// segment was first sent is used instead.
    pub rtt: Option<Duration>,
}

impl Ack {
    /// ACK covering the outstanding segment.
    pub fn cumulative(window: u32) -> Self {
        Self {
            window,
            covers_outstanding: true,
            rtt: None,
        }
    }

    /// ACK that only updates the window.
    pub fn window_update(window: u32) -> Self {
        Self {
            window,
            covers_outstanding: false,
            rtt: None,
        }
    }

    /// Attaches a measured RTT.
    pub fn with_rtt(mut self, rtt: Duration) -> Self {
        self.rtt = Some(rtt);
        self
    }
}

/// Timing state of one connection.
#[derive(Debug, Clone)]
pub struct ConnectionTimers {
    estimator: RtoEstimator,
    retransmit: RetransmitTimer,
    probe: ZeroWindowProbeTimer,
    guard: ConnectionTimeoutGuard,
    outstanding: Option<Bytes>,
    peer_window: u32,
}

impl ConnectionTimers {
    /// Fresh state: no samples, nothing armed, window at the configured default.
    pub fn new(config: &Config) -> Self {
        Self {
            estimator: RtoEstimator::new(RtoParams::from(config)),
            retransmit: RetransmitTimer::new(config.rto_upper_bound),
            probe: ZeroWindowProbeTimer::from(config),
            guard: ConnectionTimeoutGuard::new(config.connection_timeout),
            outstanding: None,
            peer_window: config.default_window(),
        }
    }

    /// RTO for the next transmission.
    #[inline]
    pub fn current_rto(&self) -> Duration {
        self.estimator.current_rto()
    }

    /// Starts the retransmission timer for a freshly sent `segment`,
    /// replacing any previously outstanding one.
    pub fn arm_retransmit(&mut self, now: Instant, segment: Bytes) {
        self.outstanding = Some(segment);
        self.retransmit.arm(now, self.estimator.current_rto());
        self.guard.note_unacknowledged(now);
    }

    /// Stops the retransmission timer. Nothing is outstanding afterwards, so
    /// the timeout guard is cleared as well.
    pub fn cancel_retransmit(&mut self) {
        self.retransmit.cancel();
        self.outstanding = None;
        self.guard.clear();
    }

    /// Records the peer's advertised window.
    pub fn note_window(&mut self, now: Instant, window: u32, data_pending: bool) {
        self.peer_window = window;
        self.probe.note_window(now, window, data_pending);
    }

    /// Processes an acknowledgment.
    ///
    /// `data_pending` tells whether more data is waiting to be sent; it
    /// decides if a zero window starts probing.
    pub fn on_ack(&mut self, now: Instant, ack: &Ack, data_pending: bool) {
        self.guard.clear();

        if ack.covers_outstanding {
            // `RetransmitTimer::on_ack` withholds the sample after a retransmission
            if let Some(elapsed) = self.retransmit.on_ack(now) {
                self.estimator.sample(ack.rtt.unwrap_or(elapsed));
            }
            self.outstanding = None;
        }

        self.note_window(now, ack.window, data_pending);
    }

    /// Whether the peer has been unresponsive for the full connection timeout.
    #[inline]
    pub fn is_connection_expired(&self, now: Instant) -> bool {
        self.guard.is_expired(now)
    }

    /// Fires whatever has expired by `now`.
    ///
    /// Retransmissions and probes go out through `transmit`. Fails with
    /// [`TcpError::ConnectionTimedOut`] once the guard has expired, after
    /// which the connection must be torn down.
    pub fn poll<T: Transmit + ?Sized>(&mut self, now: Instant, transmit: &mut T) -> Result<()> {
        if self.guard.is_expired(now) {
            self.retransmit.cancel();
            self.probe.reset();
            return Err(TcpError::ConnectionTimedOut);
        }

        if let Poll::Ready(()) = self.retransmit.poll_expiration(now) {
            if let Some(segment) = &self.outstanding {
                transmit.send_segment(segment);
            }
            self.guard.note_unacknowledged(now);
        }

        if let Poll::Ready(()) = self.probe.poll_expiration(now) {
            transmit.send_probe();
        }

        Ok(())
    }

    /// Earliest instant at which [`ConnectionTimers::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.retransmit.deadline(),
            self.probe.deadline(),
            self.guard.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Last window advertised by the peer.
    #[inline]
    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    /// Segment awaiting acknowledgment.
    pub fn outstanding(&self) -> Option<&Bytes> {
        self.outstanding.as_ref()
    }

    /// RTT estimator.
    pub fn estimator(&self) -> &RtoEstimator {
        &self.estimator
    }

    /// Retransmission timer.
    pub fn retransmit(&self) -> &RetransmitTimer {
        &self.retransmit
    }

    /// Zero-window probe timer.
    pub fn probe(&self) -> &ZeroWindowProbeTimer {
        &self.probe
    }

    /// Connection timeout guard.
    pub fn guard(&self) -> &ConnectionTimeoutGuard {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{probe::ProbeState, retransmit::RetransmitState};

    #[derive(Debug, Default)]
    struct Recorder {
        segments: Vec<Bytes>,
        probes: usize,
    }

    impl Transmit for Recorder {
        fn send_segment(&mut self, segment: &Bytes) {
            self.segments.push(segment.clone());
        }

        fn send_probe(&mut self) {
            self.probes += 1;
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn fast_config() -> Config {
        Config {
            rto_lower_bound: ms(10),
            ..Config::default()
        }
    }

    #[test]
    fn ack_samples_rtt_and_disarms() {
        let now = Instant::now();
        let mut timers = ConnectionTimers::new(&fast_config());
        timers.arm_retransmit(now, Bytes::from_static(b"data"));

        timers.on_ack(now + ms(200), &Ack::cumulative(1220), false);
        assert_eq!(timers.current_rto(), ms(600));
        assert_eq!(timers.retransmit().state(), RetransmitState::Idle);
        assert!(timers.outstanding().is_none());
        assert_eq!(timers.guard().unresponsive_since(), None);
    }

    #[test]
    fn measured_rtt_preferred() {
        let now = Instant::now();
        let mut timers = ConnectionTimers::new(&fast_config());
        timers.arm_retransmit(now, Bytes::from_static(b"data"));

        let ack = Ack::cumulative(1220).with_rtt(ms(200));
        timers.on_ack(now + ms(900), &ack, false);
        assert_eq!(timers.estimator().smoothed_rtt(), Some(ms(200)));
    }

    #[test]
    fn fire_retransmits_outstanding_segment() {
        let now = Instant::now();
        let mut timers = ConnectionTimers::new(&fast_config());
        let mut tx = Recorder::default();

        timers.arm_retransmit(now, Bytes::from_static(b"hello"));
        timers.poll(now + ms(5), &mut tx).unwrap();
        assert!(tx.segments.is_empty());

        timers.poll(now + ms(10), &mut tx).unwrap();
        assert_eq!(tx.segments, [Bytes::from_static(b"hello")]);
        assert_eq!(timers.retransmit().backoff_rto(), ms(20));
    }

    #[test]
    fn learned_rto_drives_next_arm() {
        let start = Instant::now();
        let mut timers = ConnectionTimers::new(&fast_config());
        let mut tx = Recorder::default();

        timers.arm_retransmit(start, Bytes::from_static(b"one"));
        timers.on_ack(start + ms(200), &Ack::cumulative(1220), true);

        let now = start + ms(200);
        timers.arm_retransmit(now, Bytes::from_static(b"two"));
        assert_eq!(timers.retransmit().deadline(), Some(now + ms(600)));
        assert_eq!(timers.retransmit().backoff_rto(), ms(600));

        let first = now + ms(600);
        timers.poll(first, &mut tx).unwrap();
        assert_eq!(timers.retransmit().backoff_rto(), ms(1200));
        assert_eq!(timers.retransmit().deadline(), Some(first + ms(1200)));

        timers.poll(first + ms(1200), &mut tx).unwrap();
        assert_eq!(timers.retransmit().backoff_rto(), ms(2400));
        assert_eq!(tx.segments, [Bytes::from_static(b"two"), Bytes::from_static(b"two")]);
    }

    #[test]
    fn karn_no_sample_after_retransmission() {
        let now = Instant::now();
        let mut timers = ConnectionTimers::new(&fast_config());
        let mut tx = Recorder::default();

        timers.arm_retransmit(now, Bytes::from_static(b"x"));
        timers.poll(now + ms(10), &mut tx).unwrap();

        let ack = Ack::cumulative(1220).with_rtt(ms(3));
        timers.on_ack(now + ms(15), &ack, false);
        assert!(!timers.estimator().has_sample());
        assert_eq!(timers.current_rto(), ms(10));
    }

    #[test]
    fn zero_window_does_not_touch_rto() {
        let now = Instant::now();
        let mut timers = ConnectionTimers::new(&Config::default());
        let mut tx = Recorder::default();

        timers.note_window(now, 0, true);
        assert_eq!(timers.probe().state(), ProbeState::Probing);

        let mut t = now;
        for _ in 0..3 {
            let deadline = timers.next_deadline().unwrap();
            assert!(deadline > t);
            t = deadline;
            timers.poll(t, &mut tx).unwrap();
        }
        assert_eq!(tx.probes, 3);
        assert!(tx.segments.is_empty());
        assert_eq!(timers.retransmit().state(), RetransmitState::Idle);
        assert!(!timers.estimator().has_sample());
        assert!(!timers.is_connection_expired(t + Duration::from_secs(3600)));

        timers.on_ack(t, &Ack::window_update(100), true);
        assert_eq!(timers.probe().state(), ProbeState::Inactive);
        assert_eq!(timers.peer_window(), 100);
    }

    #[test]
    fn guard_aborts_after_timeout() {
        let start = Instant::now();
        let config = Config {
            connection_timeout: Duration::from_secs(10),
            ..Config::default()
        };
        let mut timers = ConnectionTimers::new(&config);
        let mut tx = Recorder::default();
        timers.arm_retransmit(start, Bytes::from_static(b"lost"));

        let now = loop {
            let now = timers.next_deadline().unwrap();
            if let Err(err) = timers.poll(now, &mut tx) {
                assert!(matches!(err, TcpError::ConnectionTimedOut));
                break now;
            }
        };
        assert_eq!(now, start + Duration::from_secs(10));
        assert!(timers.is_connection_expired(now));
        // fires at 1s, 3s, 7s
        assert_eq!(tx.segments.len(), 3);
        assert_eq!(timers.retransmit().state(), RetransmitState::Idle);
    }

    #[test]
    fn any_ack_resets_guard() {
        let start = Instant::now();
        let mut timers = ConnectionTimers::new(&Config::default());
        timers.arm_retransmit(start, Bytes::from_static(b"a"));
        timers.on_ack(start + Duration::from_secs(100), &Ack::window_update(1220), false);

        assert!(!timers.is_connection_expired(start + Duration::from_secs(120)));
        assert_eq!(timers.retransmit().state(), RetransmitState::Armed);
    }

    #[test]
    fn next_deadline_is_earliest() {
        let now = Instant::now();
        let mut timers = ConnectionTimers::new(&Config::default());
        assert_eq!(timers.next_deadline(), None);

        timers.note_window(now, 0, true);
        timers.arm_retransmit(now + ms(500), Bytes::from_static(b"z"));
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));

        timers.cancel_retransmit();
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
    }
}
