//! Bounded message queues between the event loop and connection workers.
//!
//! Depths are powers of two. A full queue never blocks the sender: the
//! event is dropped, counted, and [`TcpError::QueueFull`] is returned so the
//! network receive path keeps moving. Connections recover from dropped
//! events through their own timers.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Result, TcpError};

/// Creates a queue holding `1 << size_exp` events.
pub fn event_queue<T>(name: &'static str, size_exp: u8) -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = mpsc::channel(1 << size_exp);
    let sender = EventSender {
        tx,
        name,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, EventReceiver { rx })
}

/// Sending half of an event queue.
#[derive(Debug)]
pub struct EventSender<T> {
    tx: mpsc::Sender<T>,
    name: &'static str,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> EventSender<T> {
    /// Enqueues `event` without waiting.
    pub fn push(&self, event: T) -> Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("{} queue full, event dropped ({dropped} total)", self.name);
                Err(TcpError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TcpError::Closed),
        }
    }

    /// Enqueues `event`, waiting for space. Only for callers that are
    /// allowed to block, never for the network receive path.
    pub async fn send(&self, event: T) -> Result<()> {
        self.tx.send(event).await.map_err(|_| TcpError::Closed)
    }

    /// Events dropped on this queue so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue depth.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// True once the receiving half is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of an event queue. Events come out in the order they were
/// pushed.
#[derive(Debug)]
pub struct EventReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> EventReceiver<T> {
    /// Waits for the next event. `None` once every sender is gone.
    pub async fn pop(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Takes the next item without waiting.
    pub fn try_pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}
