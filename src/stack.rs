//! Stack startup, the event loop, and per-connection workers.
//!
//! ```text
//!  receive path ──deliver()──▶ event loop queue ──▶ event loop task
//!                                                      │ by ConnectionId
//!                                 ┌────────────────────┼──────────────────┐
//!                                 ▼                    ▼                  ▼
//!                          connection queue     connection queue        ...
//!                                 │                    │
//!                              worker               worker      (one task each,
//!                        ConnectionTimers     ConnectionTimers   owning its
//!                           + RcvBuffer          + RcvBuffer      state)
//! ```
//!
//! Workers only suspend on their queue or on their earliest timer deadline.
//! Events of one connection are handled strictly in the order they were
//! delivered.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use tokio::{
    sync::Mutex,
    task::{spawn, JoinHandle},
    time::Instant,
};

use crate::{
    config::Config,
    connection::{Ack, ConnectionTimers, Transmit},
    error::{Result, TcpError},
    pool::{RcvBuffer, RcvBufferPool},
    queue::{event_queue, EventReceiver, EventSender},
    sizing::BufferSizing,
};

/// Identifies an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A message for a connection worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transmit a segment once the peer window allows it.
    Send(Bytes),
    /// An acknowledgment arrived from the peer.
    Ack(Ack),
    /// Tear the connection down.
    Close,
}

#[derive(Debug)]
struct StackInner {
    config: Config,
    sizing: BufferSizing,
    pool: RcvBufferPool,
    connections: Mutex<HashMap<ConnectionId, EventSender<Event>>>,
    next_id: AtomicU32,
}

/// A running stack.
#[derive(Debug)]
pub struct Stack {
    inner: Arc<StackInner>,
    dispatch: EventSender<(ConnectionId, Event)>,
    event_loop: JoinHandle<()>,
}

impl Stack {
    /// Validates `config`, preallocates every receive buffer and spawns the
    /// event loop. Must be called from within a Tokio runtime.
    pub fn start(config: Config) -> Result<Self> {
        config.validate()?;
        let sizing = BufferSizing::from_config(&config)?;
        let pool = RcvBufferPool::new(&sizing);
        let (dispatch, events) = event_queue("event loop", config.eventloop_msg_queue_size_exp);

        log::info!(
            "stack started: window={} buffers={} reserved={}B",
            sizing.window_size,
            sizing.total_buffers,
            sizing.reserved_bytes()
        );

        let inner = Arc::new(StackInner {
            config,
            sizing,
            pool,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        });
        let event_loop = spawn(event_loop(inner.clone(), events));

        Ok(Self {
            inner,
            dispatch,
            event_loop,
        })
    }

    /// Opens a connection whose segments go out through `transmit`.
    ///
    /// Fails with [`TcpError::PoolExhausted`] while every receive buffer is
    /// held by another connection.
    pub async fn open<T: Transmit>(&self, transmit: T) -> Result<ConnectionHandle> {
        let buffer = self.inner.pool.acquire()?;
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (events_tx, events_rx) =
            event_queue("connection", self.inner.config.msg_queue_size_exp);

        self.inner
            .connections
            .lock()
            .await
            .insert(id, events_tx.clone());

        let worker = Worker {
            id,
            timers: ConnectionTimers::new(&self.inner.config),
            transmit,
            buffer,
            pending: VecDeque::new(),
            events: events_rx,
            stack: self.inner.clone(),
        };
        let receive_window = worker.buffer.window();
        log::info!(
            "connection {id} opened on receive buffer {} (window {receive_window})",
            worker.buffer.handle()
        );

        Ok(ConnectionHandle {
            id,
            receive_window,
            events: events_tx,
            task: spawn(worker.run()),
        })
    }

    /// Hands an event from the receive path to the event loop.
    ///
    /// Never suspends: if the event loop queue is full the event is dropped
    /// and [`TcpError::QueueFull`] returned. While the registry is locked
    /// elsewhere the id check is left to the event loop, which drops events
    /// for unknown connections.
    pub fn deliver(&self, id: ConnectionId, event: Event) -> Result<()> {
        if let Ok(connections) = self.inner.connections.try_lock() {
            if !connections.contains_key(&id) {
                return Err(TcpError::UnknownConnection(id));
            }
        }
        self.dispatch.push((id, event))
    }

    /// Number of connections currently open.
    pub async fn open_connections(&self) -> usize {
        self.inner.connections.lock().await.len()
    }

    /// Events dropped because the event loop queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dispatch.dropped()
    }

    /// Configuration the stack was started with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Buffer sizing derived at startup.
    pub fn sizing(&self) -> &BufferSizing {
        &self.inner.sizing
    }

    /// Receive buffer pool.
    pub fn pool(&self) -> &RcvBufferPool {
        &self.inner.pool
    }

    /// Stops the event loop. Open connections keep running until closed.
    pub fn shutdown(self) {
        self.event_loop.abort();
    }
}

async fn event_loop(stack: Arc<StackInner>, mut events: EventReceiver<(ConnectionId, Event)>) {
    while let Some((id, event)) = events.pop().await {
        let connections = stack.connections.lock().await;
        let Some(queue) = connections.get(&id) else {
            log::debug!("event for closed connection {id} dropped");
            continue;
        };
        if let Err(err) = queue.push(event) {
            log::debug!("connection {id}: {err}");
        }
    }
}

/// User-side handle of an open connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    receive_window: usize,
    events: EventSender<Event>,
    task: JoinHandle<Result<()>>,
}

impl ConnectionHandle {
    /// Identifier used with [`Stack::deliver`].
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Window advertised to the peer, backed by the leased receive buffer.
    pub fn receive_window(&self) -> usize {
        self.receive_window
    }

    /// Queues `segment` for transmission.
    pub fn send(&self, segment: Bytes) -> Result<()> {
        self.events.push(Event::Send(segment))
    }

    /// Closes the connection and waits for its worker to finish.
    pub async fn close(self) -> Result<()> {
        // fails only if the worker already exited; join reports why
        let _ = self.events.send(Event::Close).await;
        self.join().await
    }

    /// Waits for the worker to finish. Yields
    /// [`TcpError::ConnectionTimedOut`] if the peer stopped responding.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|_| TcpError::Closed)?
    }

    /// True once the worker has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Owns everything about one connection. Nothing in here is shared.
struct Worker<T> {
    id: ConnectionId,
    timers: ConnectionTimers,
    transmit: T,
    buffer: RcvBuffer,
    /// Segments waiting for the outstanding one to be acknowledged.
    pending: VecDeque<Bytes>,
    events: EventReceiver<Event>,
    stack: Arc<StackInner>,
}

impl<T: Transmit> Worker<T> {
    async fn run(mut self) -> Result<()> {
        let result = self.event_loop().await;
        match &result {
            Ok(()) => log::info!("connection {} closed", self.id),
            Err(err) => log::warn!("connection {} aborted: {err}", self.id),
        }

        self.stack.connections.lock().await.remove(&self.id);
        log::debug!(
            "connection {} releasing receive buffer {}",
            self.id,
            self.buffer.handle()
        );
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                biased;

                event = self.events.pop() => match event {
                    None | Some(Event::Close) => return Ok(()),
                    Some(Event::Send(segment)) => {
                        self.pending.push_back(segment);
                        self.flush(Instant::now());
                    }
                    Some(Event::Ack(ack)) => {
                        let now = Instant::now();
                        self.timers.on_ack(now, &ack, !self.pending.is_empty());
                        self.flush(now);
                    }
                },

                () = sleep_until(deadline) => {
                    self.timers.poll(Instant::now(), &mut self.transmit)?;
                }
            }
        }
    }

    /// Sends the next pending segment if nothing is outstanding and the
    /// peer window is open.
    fn flush(&mut self, now: Instant) {
        if self.pending.is_empty() || self.timers.outstanding().is_some() {
            return;
        }
        if self.timers.peer_window() == 0 {
            self.timers.note_window(now, 0, true);
            return;
        }
        if let Some(segment) = self.pending.pop_front() {
            self.transmit.send_segment(&segment);
            self.timers.arm_retransmit(now, segment);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
