//! Shared test helpers
//!
//! A scripted in-memory transport standing in for the WebSocket: dials are
//! counted and can be held or failed, each accepted dial yields a socket
//! whose inbound side the test drives and whose outbound side is captured.

use crate::frame::Frame;
use crate::session::FrameSender;
use crate::socket::{Socket, SocketConnector, SocketError, SocketSink, SocketStream};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Scripted network shared by a test and its mock connector
pub struct MockNet {
    dials: AtomicUsize,
    fail_remaining: AtomicUsize,
    hold: AtomicBool,
    sent: Arc<Mutex<Vec<String>>>,
    sockets: Mutex<Vec<Arc<MockSocketHandle>>>,
}

impl MockNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dials: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            hold: AtomicBool::new(false),
            sent: Arc::new(Mutex::new(Vec::new())),
            sockets: Mutex::new(Vec::new()),
        })
    }

    /// Connector view of this net for the manager under test
    pub fn connector(self: &Arc<Self>) -> Arc<dyn SocketConnector> {
        Arc::new(MockConnector { net: self.clone() })
    }

    /// Fail the next `n` dials with a connection error
    pub fn fail_dials(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::Release);
    }

    /// When held, dials never complete (connection stays in progress)
    pub fn hold_dials(&self, hold: bool) {
        self.hold.store(hold, Ordering::Release);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Acquire)
    }

    /// Everything the manager wrote, parsed back into frames
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .map(|text| Frame::parse(text).expect("manager sent invalid frame"))
            .collect()
    }

    /// Handle to the most recently accepted socket
    pub fn last_socket(&self) -> Arc<MockSocketHandle> {
        self.sockets
            .lock()
            .last()
            .cloned()
            .expect("no socket accepted yet")
    }
}

/// Test-side control over one accepted socket
pub struct MockSocketHandle {
    inbound: Mutex<Option<mpsc::UnboundedSender<Result<String, SocketError>>>>,
}

impl MockSocketHandle {
    /// Deliver a frame to the manager's read loop
    pub fn push_frame(&self, frame: &Frame) {
        self.push_text(&frame.to_wire().expect("frame serialization"));
    }

    pub fn push_text(&self, text: &str) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(Ok(text.to_string()));
        }
    }

    /// Unsolicited close: the read loop sees end-of-stream
    pub fn close(&self) {
        self.inbound.lock().take();
    }

    /// Surface a read error; the manager treats it like a close
    pub fn fail(&self, message: &str) {
        if let Some(tx) = self.inbound.lock().take() {
            let _ = tx.send(Err(SocketError::ReceiveFailed(message.to_string())));
        }
    }
}

struct MockConnector {
    net: Arc<MockNet>,
}

impl SocketConnector for MockConnector {
    fn connect(&self, _url: &str) -> BoxFuture<'static, Result<Box<dyn Socket>, SocketError>> {
        let net = self.net.clone();
        Box::pin(async move {
            net.dials.fetch_add(1, Ordering::AcqRel);

            if net.hold.load(Ordering::Acquire) {
                std::future::pending::<()>().await;
            }

            let failing = net
                .fail_remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(SocketError::ConnectionFailed("scripted dial failure".into()));
            }

            let (in_tx, in_rx) = mpsc::unbounded_channel();
            net.sockets.lock().push(Arc::new(MockSocketHandle {
                inbound: Mutex::new(Some(in_tx)),
            }));

            Ok(Box::new(MockSocket {
                sent: net.sent.clone(),
                inbound: in_rx,
            }) as Box<dyn Socket>)
        })
    }
}

struct MockSocket {
    sent: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::UnboundedReceiver<Result<String, SocketError>>,
}

impl Socket for MockSocket {
    fn split(self: Box<Self>) -> (Box<dyn SocketSink>, Box<dyn SocketStream>) {
        (
            Box::new(MockSink { sent: self.sent }),
            Box::new(MockStream {
                inbound: self.inbound,
            }),
        )
    }
}

struct MockSink {
    sent: Arc<Mutex<Vec<String>>>,
}

impl SocketSink for MockSink {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), SocketError>> {
        Box::pin(async move {
            self.sent.lock().push(text);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<Result<String, SocketError>>,
}

impl SocketStream for MockStream {
    fn next_text(&mut self) -> BoxFuture<'_, Option<Result<String, SocketError>>> {
        Box::pin(async move { self.inbound.recv().await })
    }
}

/// Frame recorder implementing the session's outbound seam
pub struct MockSender {
    open: AtomicBool,
    sent: Mutex<Vec<Frame>>,
}

impl MockSender {
    pub fn open() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }
}

impl FrameSender for MockSender {
    fn send_frame(&self, frame: &Frame) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        self.sent.lock().push(frame.clone());
        true
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
