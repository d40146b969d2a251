//! Per-conversation protocol state
//!
//! Join/leave membership, typing-indicator timing and reconciliation of the
//! locally visible message lists against inbound `new_message` frames.
//! Messages the local user sends are inserted optimistically; the server's
//! echo of them is recognized by sender identity and not re-appended.

use crate::frame::{kind, ChatMessage, Frame};
use crate::router::{EventRouter, Subscription};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Outbound seam towards the connection manager
///
/// The session never touches the socket; everything goes through these two
/// operations, which tests satisfy with a recorder.
pub trait FrameSender: Send + Sync + 'static {
    /// Send a frame; false when the connection is not open
    fn send_frame(&self, frame: &Frame) -> bool;
    /// Whether the connection is currently open
    fn is_open(&self) -> bool;
}

/// A pending auto-stop timer; `generation` identifies the arming that
/// spawned it
struct TypingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct SessionShared {
    wire: Arc<dyn FrameSender>,
    local_user_id: String,
    typing_timeout: Duration,
    /// Conversations we have joined on this connection
    memberships: Mutex<HashSet<String>>,
    /// Pending auto-stop timers, one per conversation
    typing: Mutex<HashMap<String, TypingTimer>>,
    typing_generation: AtomicU64,
    /// Reconciled message lists per conversation
    messages: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl SessionShared {
    fn cancel_typing_timer(&self, conversation_id: &str) {
        if let Some(timer) = self.typing.lock().remove(conversation_id) {
            timer.handle.abort();
        }
    }

    /// Auto-stop deadline for one arming of the typing indicator
    ///
    /// `abort()` does not interrupt a timer task that already passed its
    /// sleep, so the task re-checks that its arming still owns the map
    /// entry. A stale generation means a re-arm or cancel won the race and
    /// no stop may be emitted.
    fn typing_deadline_fired(&self, conversation_id: &str, generation: u64) {
        {
            let mut typing = self.typing.lock();
            match typing.get(conversation_id) {
                Some(timer) if timer.generation == generation => {
                    typing.remove(conversation_id);
                }
                _ => return,
            }
        }
        self.wire
            .send_frame(&Frame::typing(conversation_id, false));
    }

    fn append_remote(&self, message: ChatMessage) {
        self.messages
            .lock()
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }
}

/// Conversation-level session over the persistent connection
#[derive(Clone)]
pub struct ConversationSession {
    shared: Arc<SessionShared>,
}

impl ConversationSession {
    pub fn new(
        wire: Arc<dyn FrameSender>,
        local_user_id: &str,
        typing_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                wire,
                local_user_id: local_user_id.to_string(),
                typing_timeout,
                memberships: Mutex::new(HashSet::new()),
                typing: Mutex::new(HashMap::new()),
                typing_generation: AtomicU64::new(0),
                messages: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Enter a conversation room
    ///
    /// Fire-and-forget: when the connection is not open this is a no-op
    /// returning false. The intent is not queued and not replayed on
    /// reconnect; screens re-join when they re-enter a conversation.
    pub fn join(&self, conversation_id: &str) -> bool {
        if !self.shared.wire.is_open() {
            tracing::debug!(target: "ws", conversation_id, "join dropped, connection not open");
            return false;
        }
        let sent = self.shared.wire.send_frame(&Frame::join(conversation_id));
        if sent {
            self.shared
                .memberships
                .lock()
                .insert(conversation_id.to_string());
        }
        sent
    }

    /// Leave a conversation room; same fire-and-forget contract as [`join`]
    ///
    /// [`join`]: ConversationSession::join
    pub fn leave(&self, conversation_id: &str) -> bool {
        if !self.shared.wire.is_open() {
            tracing::debug!(target: "ws", conversation_id, "leave dropped, connection not open");
            return false;
        }
        let sent = self.shared.wire.send_frame(&Frame::leave(conversation_id));
        if sent {
            self.shared.memberships.lock().remove(conversation_id);
            self.shared.cancel_typing_timer(conversation_id);
        }
        sent
    }

    pub fn is_joined(&self, conversation_id: &str) -> bool {
        self.shared.memberships.lock().contains(conversation_id)
    }

    /// Emit a typing indicator
    ///
    /// `true` arms (or re-arms) a single-shot timer; if no explicit stop
    /// follows within the window the session emits `isTyping:false` itself,
    /// so a start is always followed by a stop. An explicit `false` cancels
    /// the timer and emits immediately. Returns false when not open.
    pub fn send_typing(&self, conversation_id: &str, is_typing: bool) -> bool {
        if !is_typing {
            self.shared.cancel_typing_timer(conversation_id);
            if !self.shared.wire.is_open() {
                return false;
            }
            return self
                .shared
                .wire
                .send_frame(&Frame::typing(conversation_id, false));
        }

        if !self.shared.wire.is_open() {
            return false;
        }
        if !self
            .shared
            .wire
            .send_frame(&Frame::typing(conversation_id, true))
        {
            return false;
        }

        // Re-arm: repeated starts reset the window, they do not stack
        self.shared.cancel_typing_timer(conversation_id);
        let generation = self
            .shared
            .typing_generation
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        let shared = self.shared.clone();
        let conversation = conversation_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(shared.typing_timeout).await;
            shared.typing_deadline_fired(&conversation, generation);
        });
        self.shared.typing.lock().insert(
            conversation_id.to_string(),
            TypingTimer { generation, handle },
        );
        true
    }

    /// Optimistically insert a locally authored message
    ///
    /// Called right after the message is handed to the REST layer, before
    /// any acknowledgment. The later `new_message` echo is suppressed by
    /// sender identity.
    pub fn record_local(&self, message: ChatMessage) {
        self.shared.append_remote(message);
    }

    /// Snapshot of the reconciled message list for a conversation
    pub fn messages(&self, conversation_id: &str) -> Vec<ChatMessage> {
        self.shared
            .messages
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Route inbound `new_message` frames into this session
    pub fn bind(&self, router: &EventRouter) -> Subscription {
        let shared = self.shared.clone();
        router.subscribe(kind::NEW_MESSAGE, move |frame| {
            let Some(message) = ChatMessage::from_frame(frame) else {
                tracing::warn!(target: "ws", "new_message frame without message payload");
                return;
            };
            // Self-echo: our own message came back; the optimistic insert
            // already put it in the list
            if message.sender_id == shared.local_user_id {
                tracing::trace!(target: "ws", message_id = %message.id, "suppressing self-echo");
                return;
            }
            shared.append_remote(message);
        })
    }

    /// Clear connection-scoped state on teardown
    ///
    /// Memberships die with the connection and pending typing timers must
    /// not fire against it; the message lists survive, they belong to the
    /// screens.
    pub fn reset(&self) {
        let timers: Vec<TypingTimer> = {
            let mut typing = self.shared.typing.lock();
            typing.drain().map(|(_, t)| t).collect()
        };
        for timer in timers {
            timer.handle.abort();
        }
        self.shared.memberships.lock().clear();
    }
}
