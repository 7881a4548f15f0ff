//! Receive window and buffer sizing derived from the MSS.

use crate::{
    config::Config,
    error::{Result, TcpError},
};

/// Receive window and buffer pool dimensions, computed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizing {
    /// Receive window advertised to peers, MSS * multiplier.
    pub window_size: u16,
    /// Bytes preallocated for each connection's receive buffer.
    pub buffer_capacity: usize,
    /// Number of receive buffers, bounding concurrently open connections.
    pub total_buffers: usize,
}

impl BufferSizing {
    /// Derives the sizing from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let window_size = u16::try_from(config.default_window()).map_err(|_| {
            TcpError::InvalidConfig("receive window does not fit the 16 bit window field")
        })?;
        if window_size == 0 {
            return Err(TcpError::InvalidConfig("receive window must be nonzero"));
        }
        if config.rcv_buffers == 0 {
            return Err(TcpError::InvalidConfig("at least one receive buffer is required"));
        }

        Ok(Self {
            window_size,
            buffer_capacity: usize::from(window_size),
            total_buffers: config.rcv_buffers,
        })
    }

    /// Total bytes reserved by the pool.
    pub fn reserved_bytes(&self) -> usize {
        self.buffer_capacity * self.total_buffers
    }
}
