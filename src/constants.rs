//! Default values for every tunable of the stack.
//!
//! These are the values [`Config::default`](crate::config::Config) starts
//! from. All of them can be overridden at startup.

use std::time::Duration;

/// Cumulative unresponsiveness after which a connection is aborted.
pub const CONNECTION_TIMEOUT_DURATION: Duration = Duration::from_secs(120);

/// Maximum segment lifetime.
pub const MSL: Duration = Duration::from_secs(30);

/// MSS over IPv6: 1280 minimum link MTU - 40 IPv6 header - 20 TCP header.
pub const MSS_IPV6: u16 = 1220;
/// MSS for any other network layer.
pub const MSS_DEFAULT: u16 = 576;

/// Number of MSS sized segments held by one receive buffer.
pub const MSS_MULTIPLIER: u16 = 1;

/// Number of preallocated receive buffers, i.e. concurrently open connections.
pub const RCV_BUFFERS: usize = 1;

/// Lower RTO clamp, RFC 6298 section 2.4.
pub const RTO_LOWER_BOUND: Duration = Duration::from_secs(1);
/// Upper RTO clamp, RFC 6298 section 2.5.
pub const RTO_UPPER_BOUND: Duration = Duration::from_secs(60);

/// Clock granularity term `G` of the RTO formula.
pub const RTO_GRANULARITY: Duration = Duration::from_millis(10);

/// alpha = 1 / RTO_A_DIV
pub const RTO_A_DIV: u32 = 8;
/// beta = 1 / RTO_B_DIV
pub const RTO_B_DIV: u32 = 4;
/// Variance multiplier `K` of the RTO formula.
pub const RTO_K: u32 = 4;

/// Initial interval between zero-window probes.
pub const PROBE_LOWER_BOUND: Duration = Duration::from_secs(1);
/// Ceiling of the zero-window probe interval.
pub const PROBE_UPPER_BOUND: Duration = Duration::from_secs(60);

/// log2 of the per-connection message queue depth.
pub const MSG_QUEUE_SIZE_EXP: u8 = 2;
/// log2 of the event loop message queue depth.
pub const EVENTLOOP_MSG_QUEUE_SIZE_EXP: u8 = 3;

/// Largest accepted queue size exponent.
pub const MAX_QUEUE_SIZE_EXP: u8 = 16;
