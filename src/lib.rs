//! tcp-rtx: retransmission timing core for an embedded TCP stack
//!
//! Decides, per connection, how long to wait for an acknowledgment before
//! resending, how to back off under repeated loss, when to give up on an
//! unresponsive peer, and how to probe a peer advertising a zero window.
//! Receive buffers are sized from the MSS and preallocated from a fixed
//! pool at startup.
//!
//! - [`rto::RtoEstimator`]: smoothed RTT and variance, RFC 6298
//! - [`retransmit::RetransmitTimer`]: exponential backoff, capped
//! - [`probe::ZeroWindowProbeTimer`]: zero-window probing
//! - [`guard::ConnectionTimeoutGuard`]: aborts unresponsive connections
//! - [`sizing::BufferSizing`] and [`pool::RcvBufferPool`]: receive buffers
//! - [`stack::Stack`]: event loop and one worker task per connection
//!
//! Segment framing, the handshake state machine and the packet I/O path are
//! outside this crate; they plug in through [`connection::Transmit`] and
//! [`stack::Stack::deliver`].
#![warn(
    missing_debug_implementations,
    missing_docs,
    redundant_lifetimes,
    non_local_definitions,
    unsafe_code
)]

pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod guard;
pub mod pool;
pub mod probe;
pub mod queue;
pub mod retransmit;
pub mod rto;
pub mod sizing;
pub mod stack;
pub mod timer;

pub use config::Config;
pub use connection::{Ack, ConnectionTimers, Transmit};
pub use error::{Result, TcpError};
pub use stack::{ConnectionHandle, ConnectionId, Event, Stack};
