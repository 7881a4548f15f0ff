//! Startup-time configuration.
//!
//! Every value is fixed once [`Stack::start`](crate::stack::Stack::start)
//! has accepted it; receive buffers are preallocated from it, so changing
//! anything requires a restart.

use std::{str::FromStr, time::Duration};

use crate::{
    constants::*,
    error::{Result, TcpError},
};

/// Prefix of the environment variables read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "TCP_RTX_";

/// Network layer the stack runs on. Only influences the default MSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    /// IPv4 or any other network layer.
    V4,
    /// IPv6.
    #[default]
    V6,
}

impl IpVersion {
    /// Default maximum segment size for this network layer.
    pub const fn default_mss(self) -> u16 {
        match self {
            Self::V4 => MSS_DEFAULT,
            Self::V6 => MSS_IPV6,
        }
    }
}

/// All tunables of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Cumulative unresponsiveness after which a connection is aborted.
    pub connection_timeout: Duration,
    /// Maximum segment lifetime. Only consumed by connection teardown.
    pub msl: Duration,
    /// Maximum segment size the receive window is derived from.
    pub mss: u16,
    /// Number of MSS sized segments per receive buffer.
    pub mss_multiplier: u16,
    /// Number of preallocated receive buffers.
    pub rcv_buffers: usize,
    /// Lower RTO clamp.
    pub rto_lower_bound: Duration,
    /// Upper RTO clamp, also the retransmission backoff ceiling.
    pub rto_upper_bound: Duration,
    /// Clock granularity `G`.
    pub rto_granularity: Duration,
    /// alpha = 1 / rto_a_div
    pub rto_a_div: u32,
    /// beta = 1 / rto_b_div
    pub rto_b_div: u32,
    /// Variance multiplier `K`.
    pub rto_k: u32,
    /// Initial zero-window probe interval.
    pub probe_lower_bound: Duration,
    /// Zero-window probe interval ceiling.
    pub probe_upper_bound: Duration,
    /// log2 of the per-connection queue depth.
    pub msg_queue_size_exp: u8,
    /// log2 of the event loop queue depth.
    pub eventloop_msg_queue_size_exp: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_ip_version(IpVersion::default())
    }
}

impl Config {
    /// Default configuration with the MSS matching `ip_version`.
    pub fn for_ip_version(ip_version: IpVersion) -> Self {
        Self {
            connection_timeout: CONNECTION_TIMEOUT_DURATION,
            msl: MSL,
            mss: ip_version.default_mss(),
            mss_multiplier: MSS_MULTIPLIER,
            rcv_buffers: RCV_BUFFERS,
            rto_lower_bound: RTO_LOWER_BOUND,
            rto_upper_bound: RTO_UPPER_BOUND,
            rto_granularity: RTO_GRANULARITY,
            rto_a_div: RTO_A_DIV,
            rto_b_div: RTO_B_DIV,
            rto_k: RTO_K,
            probe_lower_bound: PROBE_LOWER_BOUND,
            probe_upper_bound: PROBE_UPPER_BOUND,
            msg_queue_size_exp: MSG_QUEUE_SIZE_EXP,
            eventloop_msg_queue_size_exp: EVENTLOOP_MSG_QUEUE_SIZE_EXP,
        }
    }

    /// Builds a validated configuration from the defaults overlaid with
    /// `TCP_RTX_*` environment variables.
    ///
    /// Durations are given in milliseconds, sizes in bytes, queue sizes as
    /// exponents. For example `TCP_RTX_RTO_LOWER_BOUND_MS=200` or
    /// `TCP_RTX_RCV_BUFFERS=4`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ip_version = match lookup(&format!("{ENV_PREFIX}IPV4")).as_deref() {
            Some("1" | "true") => IpVersion::V4,
            Some("0" | "false") | None => IpVersion::V6,
            Some(_) => return Err(TcpError::InvalidConfig("TCP_RTX_IPV4")),
        };
        let mut config = Self::for_ip_version(ip_version);

        let millis = |name: &'static str, into: &mut Duration| -> Result<()> {
            if let Some(ms) = parse::<u64, _>(&lookup, name)? {
                *into = Duration::from_millis(ms);
            }
            Ok(())
        };
        millis("CONNECTION_TIMEOUT_MS", &mut config.connection_timeout)?;
        millis("MSL_MS", &mut config.msl)?;
        millis("RTO_LOWER_BOUND_MS", &mut config.rto_lower_bound)?;
        millis("RTO_UPPER_BOUND_MS", &mut config.rto_upper_bound)?;
        millis("RTO_GRANULARITY_MS", &mut config.rto_granularity)?;
        millis("PROBE_LOWER_BOUND_MS", &mut config.probe_lower_bound)?;
        millis("PROBE_UPPER_BOUND_MS", &mut config.probe_upper_bound)?;

        if let Some(v) = parse(&lookup, "MSS")? {
            config.mss = v;
        }
        if let Some(v) = parse(&lookup, "MSS_MULTIPLIER")? {
            config.mss_multiplier = v;
        }
        if let Some(v) = parse(&lookup, "RCV_BUFFERS")? {
            config.rcv_buffers = v;
        }
        if let Some(v) = parse(&lookup, "RTO_A_DIV")? {
            config.rto_a_div = v;
        }
        if let Some(v) = parse(&lookup, "RTO_B_DIV")? {
            config.rto_b_div = v;
        }
        if let Some(v) = parse(&lookup, "RTO_K")? {
            config.rto_k = v;
        }
        if let Some(v) = parse(&lookup, "MSG_QUEUE_SIZE_EXP")? {
            config.msg_queue_size_exp = v;
        }
        if let Some(v) = parse(&lookup, "EVENTLOOP_MSG_QUEUE_SIZE_EXP")? {
            config.eventloop_msg_queue_size_exp = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the stack cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rto_lower_bound.is_zero() {
            return Err(TcpError::InvalidConfig("RTO lower bound must be nonzero"));
        }
        if self.rto_lower_bound > self.rto_upper_bound {
            return Err(TcpError::InvalidConfig(
                "RTO lower bound exceeds RTO upper bound",
            ));
        }
        if self.probe_lower_bound.is_zero() {
            return Err(TcpError::InvalidConfig("probe lower bound must be nonzero"));
        }
        if self.probe_lower_bound > self.probe_upper_bound {
            return Err(TcpError::InvalidConfig(
                "probe lower bound exceeds probe upper bound",
            ));
        }
        if self.rto_a_div == 0 || self.rto_b_div == 0 {
            return Err(TcpError::InvalidConfig("RTO divisors must be nonzero"));
        }
        if self.rto_k == 0 {
            return Err(TcpError::InvalidConfig("RTO K must be nonzero"));
        }
        if self.connection_timeout.is_zero() {
            return Err(TcpError::InvalidConfig("connection timeout must be nonzero"));
        }
        if self.mss == 0 || self.mss_multiplier == 0 {
            return Err(TcpError::InvalidConfig("MSS and MSS multiplier must be nonzero"));
        }
        if self.default_window() > u32::from(u16::MAX) {
            return Err(TcpError::InvalidConfig(
                "receive window does not fit the 16 bit window field",
            ));
        }
        if self.rcv_buffers == 0 {
            return Err(TcpError::InvalidConfig("at least one receive buffer is required"));
        }
        if self.msg_queue_size_exp > MAX_QUEUE_SIZE_EXP
            || self.eventloop_msg_queue_size_exp > MAX_QUEUE_SIZE_EXP
        {
            return Err(TcpError::InvalidConfig("queue size exponent too large"));
        }
        Ok(())
    }

    /// Receive window advertised to peers: MSS * multiplier.
    pub fn default_window(&self) -> u32 {
        u32::from(self.mss) * u32::from(self.mss_multiplier)
    }

    /// Duration of the TIME-WAIT state, 2 * MSL.
    pub fn time_wait(&self) -> Duration {
        self.msl * 2
    }

    /// Depth of each per-connection queue.
    pub fn msg_queue_size(&self) -> usize {
        1 << self.msg_queue_size_exp
    }

    /// Depth of the event loop queue.
    pub fn eventloop_queue_size(&self) -> usize {
        1 << self.eventloop_msg_queue_size_exp
    }
}

fn parse<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(&format!("{ENV_PREFIX}{name}")) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TcpError::InvalidConfig(name)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), (*v).to_owned()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.mss, 1220);
        assert_eq!(config.default_window(), 1220);
        assert_eq!(config.rcv_buffers, 1);
        assert_eq!(config.connection_timeout, Duration::from_secs(120));
        assert_eq!(config.msg_queue_size(), 4);
        assert_eq!(config.eventloop_queue_size(), 8);
    }

    #[test]
    fn ipv4_uses_small_mss() {
        let config = Config::for_ip_version(IpVersion::V4);
        assert_eq!(config.mss, 576);
        assert_eq!(config.default_window(), 576);
    }

    #[test]
    fn time_wait_is_twice_msl() {
        assert_eq!(Config::default().time_wait(), Duration::from_secs(60));
    }

    #[test]
    fn inverted_rto_bounds_rejected() {
        let config = Config {
            rto_lower_bound: Duration::from_secs(61),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TcpError::InvalidConfig(_))));
    }

    #[test]
    fn inverted_probe_bounds_rejected() {
        let config = Config {
            probe_upper_bound: Duration::from_millis(500),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TcpError::InvalidConfig(_))));
    }

    #[test]
    fn zero_divisor_rejected() {
        let config = Config {
            rto_b_div: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TcpError::InvalidConfig(_))));
    }

    #[test]
    fn oversized_window_rejected() {
        let config = Config {
            mss_multiplier: 64,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TcpError::InvalidConfig(_))));
    }

    #[test]
    fn zero_buffers_rejected() {
        let config = Config {
            rcv_buffers: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TcpError::InvalidConfig(_))));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("IPV4", "1"),
            ("RCV_BUFFERS", "4"),
            ("RTO_LOWER_BOUND_MS", "200"),
            ("MSG_QUEUE_SIZE_EXP", "5"),
        ]))
        .unwrap();

        assert_eq!(config.mss, 576);
        assert_eq!(config.rcv_buffers, 4);
        assert_eq!(config.rto_lower_bound, Duration::from_millis(200));
        assert_eq!(config.msg_queue_size(), 32);
        assert_eq!(config.rto_upper_bound, RTO_UPPER_BOUND);
    }

    #[test]
    fn lookup_rejects_garbage() {
        let err = Config::from_lookup(lookup_from(&[("MSS", "lots")])).unwrap_err();
        assert!(matches!(err, TcpError::InvalidConfig("MSS")));
    }

    #[test]
    fn lookup_validates_result() {
        let err = Config::from_lookup(lookup_from(&[
            ("RTO_LOWER_BOUND_MS", "5000"),
            ("RTO_UPPER_BOUND_MS", "1000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, TcpError::InvalidConfig(_)));
    }
}
