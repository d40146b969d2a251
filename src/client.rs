//! Composition root for the realtime layer
//!
//! Wires config, connector, manager, router, session and observer together
//! and exposes the operations the screens and REST services consume. Built
//! explicitly by the application (no global instance); tests construct
//! independent clients against a mock transport.

use crate::config::RealtimeConfig;
use crate::frame::{ChatMessage, Frame};
use crate::manager::{ChangeGuard, ConnectionInfo, ConnectionManager};
use crate::observer::ConnectionStateObserver;
use crate::router::{EventRouter, Subscription};
use crate::session::{ConversationSession, FrameSender};
use crate::socket::{SocketConnector, WsConnector};
use std::sync::Arc;

/// Facade over the realtime subsystem
///
/// Must be constructed inside a tokio runtime; the observer poll timer
/// starts immediately. The connection itself is not opened until
/// [`connect`] is called.
///
/// [`connect`]: RealtimeClient::connect
pub struct RealtimeClient {
    router: EventRouter,
    manager: Arc<ConnectionManager>,
    session: ConversationSession,
    observer: ConnectionStateObserver,
    _message_binding: Subscription,
    _teardown_guard: ChangeGuard,
}

impl RealtimeClient {
    /// Production client over tokio-tungstenite
    pub fn new(config: RealtimeConfig, local_user_id: &str) -> crate::Result<Self> {
        let connector = Arc::new(WsConnector::new(config.connect_timeout()));
        Self::with_connector(config, local_user_id, connector)
    }

    /// Client over a caller-supplied transport
    pub fn with_connector(
        config: RealtimeConfig,
        local_user_id: &str,
        connector: Arc<dyn SocketConnector>,
    ) -> crate::Result<Self> {
        let router = EventRouter::new();
        let manager = Arc::new(ConnectionManager::new(&config, connector, router.clone())?);

        let session = ConversationSession::new(
            manager.clone() as Arc<dyn FrameSender>,
            local_user_id,
            config.typing_timeout(),
        );
        let message_binding = session.bind(&router);

        // Memberships and typing timers die with the connection
        let teardown_session = session.clone();
        let teardown_guard = manager.on_connection_change(move |connected| {
            if !connected {
                teardown_session.reset();
            }
        });

        let observer = ConnectionStateObserver::new(manager.clone(), config.poll_interval());

        Ok(Self {
            router,
            manager,
            session,
            observer,
            _message_binding: message_binding,
            _teardown_guard: teardown_guard,
        })
    }

    // Connection lifecycle

    pub fn connect(&self) {
        self.manager.connect();
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn force_reconnect(&self) {
        self.manager.force_reconnect();
    }

    // Frames

    /// Register a handler for a frame type (`*` for all)
    pub fn subscribe<F>(&self, frame_kind: &str, handler: F) -> Subscription
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.router.subscribe(frame_kind, handler)
    }

    /// Send a raw frame; false when the connection is not open
    pub fn send(&self, frame: &Frame) -> bool {
        self.manager.send(frame)
    }

    // Conversations

    pub fn join_conversation(&self, conversation_id: &str) -> bool {
        self.session.join(conversation_id)
    }

    pub fn leave_conversation(&self, conversation_id: &str) -> bool {
        self.session.leave(conversation_id)
    }

    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) -> bool {
        self.session.send_typing(conversation_id, is_typing)
    }

    /// Optimistically insert a locally authored message
    pub fn record_local_message(&self, message: ChatMessage) {
        self.session.record_local(message);
    }

    /// Reconciled message list for a conversation
    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.session.messages(conversation_id)
    }

    // Connectivity

    pub fn is_connected(&self) -> bool {
        self.observer.is_connected()
    }

    pub fn on_connection_change<F>(&self, listener: F) -> ChangeGuard
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.manager.on_connection_change(listener)
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.manager.connection_info()
    }

    /// Disconnect and stop background timers
    ///
    /// The client stays usable: `connect` still works and connectivity
    /// reads are sampled live instead of cached.
    pub fn shutdown(&self) {
        self.manager.disconnect();
        self.observer.shutdown();
    }
}
