//! Persistent connection manager
//!
//! Owns the single socket to the backend. Each `connect()` spawns one
//! background task that dials, pumps the socket and handles reconnection
//! with exponential backoff; a generation counter invalidates tasks
//! superseded by `disconnect()`/`force_reconnect()`. Inbound frames are
//! dispatched through the [`EventRouter`] from the task's read loop, so
//! handler invocations for different frames never overlap.

use crate::config::RealtimeConfig;
use crate::frame::Frame;
use crate::router::EventRouter;
use crate::session::FrameSender;
use crate::socket::SocketConnector;
use crate::RealtimeError;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Never connected
    Idle,
    /// Dialing, or waiting out a reconnect delay
    Connecting,
    /// Connected and ready
    Open,
    /// Manual teardown in progress
    Closing,
    /// Terminal: manual disconnect or reconnect attempts exhausted
    Closed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Open => "open",
            LinkState::Closing => "closing",
            LinkState::Closed => "closed",
        }
    }

    /// Numeric state matching the browser WebSocket constants the mobile
    /// screens were written against
    pub fn ready_state(&self) -> u8 {
        match self {
            LinkState::Connecting => 0,
            LinkState::Open => 1,
            LinkState::Closing => 2,
            LinkState::Idle | LinkState::Closed => 3,
        }
    }
}

/// Diagnostic snapshot exposed to consumers
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub status: String,
    pub ready_state: u8,
    pub url: String,
    pub attempts: u32,
}

type ChangeListener = Arc<dyn Fn(bool) + Send + Sync>;

struct ManagerShared {
    url: String,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    connector: Arc<dyn SocketConnector>,
    router: EventRouter,
    state: Mutex<LinkState>,
    /// Consecutive failed reconnect attempts; zeroed on every open
    attempts: AtomicU32,
    /// Bumped on connect/disconnect; a task whose epoch is stale must exit
    epoch: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<Vec<(u64, ChangeListener)>>,
    next_listener_id: AtomicU64,
}

impl ManagerShared {
    #[inline]
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Swap states; returns false if already there
    fn transition(&self, next: LinkState) -> bool {
        let mut state = self.state.lock();
        if *state == next {
            return false;
        }
        tracing::debug!(target: "ws", from = state.as_str(), to = next.as_str(), "state change");
        *state = next;
        true
    }

    /// Transition and, if the state actually changed, tell the world:
    /// registered change listeners get the boolean, the router gets a
    /// synthetic `connection` status frame.
    fn transition_and_notify(&self, next: LinkState) {
        if !self.transition(next) {
            return;
        }
        self.notify(next);
    }

    /// Announce a state that is already in effect
    fn notify(&self, state: LinkState) {
        let connected = state == LinkState::Open;
        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(connected))).is_err() {
                tracing::error!(target: "ws", "connection change listener panicked");
            }
        }
        self.router.dispatch(&Frame::connection_status(state.as_str()));
    }

    fn dispatch_text(&self, text: &str) {
        match Frame::parse(text) {
            Ok(frame) => {
                tracing::trace!(target: "ws", frame_kind = %frame.kind, "frame received");
                self.router.dispatch(&frame);
            }
            Err(e) => {
                tracing::warn!(target: "ws", error = %e, "dropping unparseable frame");
            }
        }
    }
}

/// Owns the persistent connection; constructed by the composition root and
/// injected into consumers (no global instance)
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
}

impl ConnectionManager {
    pub fn new(
        config: &RealtimeConfig,
        connector: Arc<dyn SocketConnector>,
        router: EventRouter,
    ) -> crate::Result<Self> {
        let url = config
            .socket_url()
            .map_err(|e| RealtimeError::Config(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(ManagerShared {
                url: url.to_string(),
                max_attempts: config.max_reconnect_attempts,
                backoff_base: config.reconnect_base(),
                backoff_cap: config.reconnect_cap(),
                connector,
                router,
                state: Mutex::new(LinkState::Idle),
                attempts: AtomicU32::new(0),
                epoch: AtomicU64::new(0),
                outbound: Mutex::new(None),
                task: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        })
    }

    /// Open the connection
    ///
    /// Idempotent: a no-op while `Connecting` or `Open`. From any other
    /// state this starts a fresh dial sequence with the attempt counter
    /// reset. Never blocks and never fails; dial errors surface as state
    /// transitions, not as return values.
    pub fn connect(&self) {
        {
            let mut state = self.shared.state.lock();
            match *state {
                LinkState::Connecting | LinkState::Open => return,
                from => {
                    tracing::debug!(target: "ws", from = from.as_str(), to = LinkState::Connecting.as_str(), "state change");
                    *state = LinkState::Connecting;
                }
            }
        }
        // Claimed the transition above; announce it outside the lock
        self.shared.notify(LinkState::Connecting);

        self.shared.attempts.store(0, Ordering::Release);
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let shared = self.shared.clone();
        let handle = tokio::spawn(run_link(shared, epoch));
        if let Some(old) = self.shared.task.lock().replace(handle) {
            old.abort();
        }

        tracing::info!(target: "ws", url = %self.shared.url, "connecting");
    }

    /// Tear the connection down
    ///
    /// Unconditionally reaches terminal `Closed`, cancels any pending
    /// reconnect delay and closes the socket. Always safe to call.
    pub fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        let already_closed = self.shared.state() == LinkState::Closed;
        if !already_closed {
            self.shared.transition_and_notify(LinkState::Closing);
        }

        if let Some(task) = self.shared.task.lock().take() {
            task.abort();
        }
        // Dropping the sender lets the writer half flush and close the socket
        *self.shared.outbound.lock() = None;

        if !already_closed {
            self.shared.transition_and_notify(LinkState::Closed);
            tracing::info!(target: "ws", "disconnected");
        }
    }

    /// Tear down and immediately redial, bypassing backoff once
    pub fn force_reconnect(&self) {
        tracing::info!(target: "ws", "forcing reconnect");
        self.disconnect();
        self.connect();
    }

    /// Send a frame if the connection is `Open`
    ///
    /// Returns false when not open or the frame cannot be serialized; the
    /// caller decides whether to retry. Never blocks.
    pub fn send(&self, frame: &Frame) -> bool {
        if self.state() != LinkState::Open {
            return false;
        }
        let Some(tx) = self.shared.outbound.lock().clone() else {
            return false;
        };
        match frame.to_wire() {
            Ok(text) => tx.send(text).is_ok(),
            Err(e) => {
                tracing::warn!(target: "ws", error = %e, "unserializable frame");
                false
            }
        }
    }

    /// Register a connected/disconnected listener
    ///
    /// Invoked on every state change with the simplified boolean. The
    /// returned guard removes the registration on `unsubscribe()`.
    pub fn on_connection_change<F>(&self, listener: F) -> ChangeGuard
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        ChangeGuard {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Diagnostic snapshot
    pub fn connection_info(&self) -> ConnectionInfo {
        let state = self.state();
        ConnectionInfo {
            status: state.as_str().to_string(),
            ready_state: state.ready_state(),
            url: self.shared.url.clone(),
            attempts: self.shared.attempts.load(Ordering::Acquire),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.shared.task.lock().take() {
            task.abort();
        }
    }
}

impl FrameSender for ConnectionManager {
    fn send_frame(&self, frame: &Frame) -> bool {
        self.send(frame)
    }

    fn is_open(&self) -> bool {
        self.is_connected()
    }
}

/// Guard removing one connection-change listener
pub struct ChangeGuard {
    shared: Weak<ManagerShared>,
    id: u64,
}

impl ChangeGuard {
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Reconnect delay for the given 1-based attempt number
pub(crate) fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(cap)
}

/// Background task driving one connect() call: dial, pump, back off, redial.
///
/// Exits when the epoch goes stale (superseded by disconnect/reconnect) or
/// when attempts are exhausted. Aborting the task cancels a pending backoff
/// sleep, which is exactly what `disconnect()` relies on.
async fn run_link(shared: Arc<ManagerShared>, epoch: u64) {
    loop {
        if shared.epoch() != epoch {
            return;
        }

        let dialed = shared.connector.connect(&shared.url).await;
        if shared.epoch() != epoch {
            return;
        }

        match dialed {
            Ok(socket) => {
                let (mut sink, mut stream) = socket.split();
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
                *shared.outbound.lock() = Some(out_tx);
                shared.attempts.store(0, Ordering::Release);
                shared.transition_and_notify(LinkState::Open);
                tracing::info!(target: "ws", "connection open");

                let writer = tokio::spawn(async move {
                    while let Some(text) = out_rx.recv().await {
                        if sink.send(text).await.is_err() {
                            break;
                        }
                    }
                    sink.close().await;
                });

                while let Some(item) = stream.next_text().await {
                    match item {
                        Ok(text) => shared.dispatch_text(&text),
                        Err(e) => {
                            tracing::warn!(target: "ws", error = %e, "socket read failed");
                            break;
                        }
                    }
                }

                writer.abort();
                *shared.outbound.lock() = None;
                if shared.epoch() != epoch {
                    return;
                }
                tracing::warn!(target: "ws", "connection lost");
            }
            Err(e) => {
                tracing::warn!(target: "ws", error = %e, "dial failed");
            }
        }

        // Unsolicited close (or failed dial): back off or give up. A manual
        // disconnect never reaches this point because the epoch is stale.
        let attempts = shared.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        if attempts >= shared.max_attempts {
            tracing::warn!(
                target: "ws",
                attempts,
                "reconnect attempts exhausted, giving up"
            );
            shared.transition_and_notify(LinkState::Closed);
            return;
        }

        let delay = backoff_delay(attempts, shared.backoff_base, shared.backoff_cap);
        tracing::info!(target: "ws", attempt = attempts, ?delay, "reconnecting after delay");
        shared.transition_and_notify(LinkState::Connecting);
        tokio::time::sleep(delay).await;
    }
}
