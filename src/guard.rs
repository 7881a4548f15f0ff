//! Hard ceiling on how long a connection may stay unresponsive.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks cumulative unresponsiveness of one connection.
///
/// The clock starts when an outstanding send first goes unacknowledged and
/// stops on any accepted ACK. Expiry is fatal for the connection.
#[derive(Debug, Clone)]
pub struct ConnectionTimeoutGuard {
    timeout: Duration,
    unresponsive_since: Option<Instant>,
}

impl ConnectionTimeoutGuard {
    /// Creates a cleared guard.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            unresponsive_since: None,
        }
    }

    /// Records that a send is outstanding. Only the first call after an ACK
    /// starts the clock.
    pub fn note_unacknowledged(&mut self, now: Instant) {
        self.unresponsive_since.get_or_insert(now);
    }

    /// Records an accepted ACK.
    pub fn clear(&mut self) {
        self.unresponsive_since = None;
    }

    /// True iff the connection has been unresponsive for at least the
    /// configured timeout.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.unresponsive_since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.timeout)
    }

    /// When the guard will expire unless an ACK arrives first.
    pub fn deadline(&self) -> Option<Instant> {
        self.unresponsive_since.map(|since| since + self.timeout)
    }

    /// Oldest unacknowledged activity, if any.
    pub fn unresponsive_since(&self) -> Option<Instant> {
        self.unresponsive_since
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(120);

    #[test]
    fn never_expires_while_idle() {
        let guard = ConnectionTimeoutGuard::new(TIMEOUT);
        assert!(!guard.is_expired(Instant::now() + Duration::from_secs(86_400)));
        assert_eq!(guard.deadline(), None);
    }

    #[test]
    fn expires_exactly_at_timeout() {
        let start = Instant::now();
        let mut guard = ConnectionTimeoutGuard::new(TIMEOUT);
        guard.note_unacknowledged(start);

        assert!(!guard.is_expired(start + TIMEOUT - Duration::from_nanos(1)));
        assert!(guard.is_expired(start + TIMEOUT));
        assert_eq!(guard.deadline(), Some(start + TIMEOUT));
    }

    #[test]
    fn later_sends_do_not_restart_clock() {
        let start = Instant::now();
        let mut guard = ConnectionTimeoutGuard::new(TIMEOUT);
        guard.note_unacknowledged(start);
        guard.note_unacknowledged(start + Duration::from_secs(100));

        assert_eq!(guard.unresponsive_since(), Some(start));
        assert!(guard.is_expired(start + TIMEOUT));
    }

    #[test]
    fn ack_clears() {
        let start = Instant::now();
        let mut guard = ConnectionTimeoutGuard::new(TIMEOUT);
        guard.note_unacknowledged(start);
        guard.clear();
        assert!(!guard.is_expired(start + TIMEOUT));

        let later = start + Duration::from_secs(200);
        guard.note_unacknowledged(later);
        assert!(!guard.is_expired(start + TIMEOUT * 2));
        assert!(guard.is_expired(later + TIMEOUT));
    }
}
