//! Fixed pool of preallocated receive buffers.
//!
//! Every open connection holds exactly one [`RcvBuffer`]. The pool never
//! grows, so its size bounds the number of concurrently open connections.
//! Slots are claimed with a compare-and-swap and released when the lease is
//! dropped.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use bytes::BytesMut;

use crate::{
    error::{Result, TcpError},
    sizing::BufferSizing,
};

struct Slot {
    in_use: AtomicBool,
    buffer: Mutex<Option<BytesMut>>,
}

struct PoolInner {
    slots: Box<[Slot]>,
    buffer_capacity: usize,
}

/// Pool of `total_buffers` receive buffers of `buffer_capacity` bytes each.
#[derive(Clone)]
pub struct RcvBufferPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for RcvBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcvBufferPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("buffer_capacity", &self.inner.buffer_capacity)
            .finish()
    }
}

impl RcvBufferPool {
    /// Allocates every buffer up front.
    pub fn new(sizing: &BufferSizing) -> Self {
        let slots = (0..sizing.total_buffers)
            .map(|_| Slot {
                in_use: AtomicBool::new(false),
                buffer: Mutex::new(Some(BytesMut::with_capacity(sizing.buffer_capacity))),
            })
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                slots,
                buffer_capacity: sizing.buffer_capacity,
            }),
        }
    }

    /// Leases a free buffer, or fails with [`TcpError::PoolExhausted`].
    pub fn acquire(&self) -> Result<RcvBuffer> {
        for (index, slot) in self.inner.slots.iter().enumerate() {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            let buffer = slot
                .buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_capacity));

            log::debug!("receive buffer {index} acquired");
            return Ok(RcvBuffer {
                pool: self.inner.clone(),
                index,
                buffer,
            });
        }
        Err(TcpError::PoolExhausted)
    }

    /// Number of buffers, in use or not.
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| !slot.in_use.load(Ordering::Acquire))
            .count()
    }
}

/// A leased receive buffer. Dropping it returns the slot to the pool.
pub struct RcvBuffer {
    pool: Arc<PoolInner>,
    index: usize,
    buffer: BytesMut,
}

impl fmt::Debug for RcvBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcvBuffer")
            .field("index", &self.index)
            .field("len", &self.buffer.len())
            .field("capacity", &self.pool.buffer_capacity)
            .finish()
    }
}

impl RcvBuffer {
    /// Slot index inside the pool.
    pub fn handle(&self) -> usize {
        self.index
    }

    /// Receive window this buffer can back.
    pub fn window(&self) -> usize {
        self.pool.buffer_capacity
    }
}

impl Drop for RcvBuffer {
    fn drop(&mut self) {
        let slot = &self.pool.slots[self.index];
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        *slot.buffer.lock().unwrap_or_else(PoisonError::into_inner) = Some(buffer);
        slot.in_use.store(false, Ordering::Release);
        log::debug!("receive buffer {} released", self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn pool(rcv_buffers: usize) -> RcvBufferPool {
        let config = Config {
            rcv_buffers,
            ..Config::default()
        };
        RcvBufferPool::new(&BufferSizing::from_config(&config).unwrap())
    }

    #[test]
    fn single_buffer_pool() {
        let pool = pool(1);
        let first = pool.acquire().unwrap();
        assert_eq!(first.window(), 1220);
        assert!(matches!(pool.acquire(), Err(TcpError::PoolExhausted)));

        drop(first);
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn exhausts_after_capacity() {
        let pool = pool(3);
        let leases: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        let mut handles: Vec<_> = leases.iter().map(RcvBuffer::handle).collect();
        handles.sort_unstable();
        assert_eq!(handles, [0, 1, 2]);
        assert_eq!(pool.available(), 0);
        assert!(matches!(pool.acquire(), Err(TcpError::PoolExhausted)));
    }

    #[test]
    fn released_slot_is_reused() {
        let pool = pool(1);
        let buffer = pool.acquire().unwrap();
        assert_eq!(buffer.handle(), 0);
        drop(buffer);

        let buffer = pool.acquire().unwrap();
        assert_eq!(buffer.handle(), 0);
        assert_eq!(buffer.window(), 1220);
    }

    #[test]
    fn concurrent_acquire_never_oversubscribes() {
        let pool = pool(4);
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || pool.acquire().ok())
            })
            .collect();

        let leases: Vec<_> = threads
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .collect();
        assert_eq!(leases.len(), 4);
        assert_eq!(pool.available(), 0);
    }
}
