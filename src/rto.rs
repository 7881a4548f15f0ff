//! Retransmission timeout estimation, RFC 6298 section 2.
//!
//! ```text
//! RTTVAR <- (1 - beta) * RTTVAR + beta * |SRTT - R'|
//! SRTT   <- (1 - alpha) * SRTT + alpha * R'
//! RTO    <- SRTT + max(G, K * RTTVAR)
//! ```
//!
//! with alpha = 1 / `rto_a_div`, beta = 1 / `rto_b_div`. The result is
//! clamped to `[rto_lower_bound, rto_upper_bound]`.
//!
//! Samples must only come from segments that were acknowledged on their
//! first transmission (Karn's algorithm). [`RtoEstimator`] cannot tell the
//! difference, so enforcing this is up to the caller; see
//! [`RetransmitTimer::on_ack`](crate::retransmit::RetransmitTimer::on_ack).

use std::time::Duration;

use crate::config::Config;

/// Estimator parameters, copied out of [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtoParams {
    /// Lower clamp.
    pub lower_bound: Duration,
    /// Upper clamp.
    pub upper_bound: Duration,
    /// Clock granularity `G`.
    pub granularity: Duration,
    /// alpha = 1 / a_div
    pub a_div: u32,
    /// beta = 1 / b_div
    pub b_div: u32,
    /// Variance multiplier `K`.
    pub k: u32,
}

impl From<&Config> for RtoParams {
    fn from(config: &Config) -> Self {
        Self {
            lower_bound: config.rto_lower_bound,
            upper_bound: config.rto_upper_bound,
            granularity: config.rto_granularity,
            a_div: config.rto_a_div,
            b_div: config.rto_b_div,
            k: config.rto_k,
        }
    }
}

impl RtoParams {
    /// Clamps `rto` into `[lower_bound, upper_bound]`.
    #[inline]
    pub fn clamp(&self, rto: Duration) -> Duration {
        rto.clamp(self.lower_bound, self.upper_bound)
    }
}

/// Smoothed RTT and variance of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtoEstimator {
    params: RtoParams,
    smoothed_rtt: Duration,
    rttvar: Duration,
    rto: Duration,
    has_sample: bool,
}

impl RtoEstimator {
    /// Creates an estimator without samples. Until the first sample arrives
    /// the RTO is the lower bound (1 second by default, RFC 6298 section 2.1).
    pub fn new(params: RtoParams) -> Self {
        Self {
            params,
            smoothed_rtt: Duration::ZERO,
            rttvar: Duration::ZERO,
            rto: params.lower_bound,
            has_sample: false,
        }
    }

    /// Feeds one RTT measurement and returns the new RTO.
    pub fn sample(&mut self, rtt: Duration) -> Duration {
        let a_div = self.params.a_div.max(1);
        let b_div = self.params.b_div.max(1);

        if self.has_sample {
            let deviation = self.smoothed_rtt.abs_diff(rtt);
            self.rttvar = self
                .rttvar
                .saturating_mul(b_div - 1)
                .saturating_add(deviation)
                / b_div;
            self.smoothed_rtt = self
                .smoothed_rtt
                .saturating_mul(a_div - 1)
                .saturating_add(rtt)
                / a_div;
        } else {
            self.smoothed_rtt = rtt;
            self.rttvar = rtt / 2;
            self.has_sample = true;
        }

        let spread = self
            .params
            .granularity
            .max(self.rttvar.saturating_mul(self.params.k));
        self.rto = self.params.clamp(self.smoothed_rtt.saturating_add(spread));

        log::debug!(
            "rtt sample {rtt:?}: srtt={:?} rttvar={:?} rto={:?}",
            self.smoothed_rtt,
            self.rttvar,
            self.rto
        );
        self.rto
    }

    /// Current retransmission timeout, always within the configured bounds.
    #[inline]
    pub fn current_rto(&self) -> Duration {
        self.rto
    }

    /// Smoothed RTT, `None` before the first sample.
    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.has_sample.then_some(self.smoothed_rtt)
    }

    /// RTT variation, `None` before the first sample.
    pub fn rttvar(&self) -> Option<Duration> {
        self.has_sample.then_some(self.rttvar)
    }

    /// Whether at least one sample has been taken.
    #[inline]
    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    /// Parameters this estimator was built with.
    #[inline]
    pub fn params(&self) -> &RtoParams {
        &self.params
    }
}
