//! Typed publish/subscribe frame router
//!
//! One registry for every inbound frame type instead of ad hoc listener
//! arrays per feature. Handlers are keyed by frame type; `*` is an explicit
//! wildcard key receiving every frame. Dispatch happens from the manager's
//! single read loop, so handler invocations for different frames never
//! overlap.

use crate::frame::{kind, Frame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Handler = Arc<dyn Fn(&Frame) + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

struct RouterShared {
    /// Handlers per frame type, in registration order. The wildcard lives
    /// under its own `*` key.
    buckets: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

/// Typed publish/subscribe dispatcher for inbound frames
#[derive(Clone)]
pub struct EventRouter {
    shared: Arc<RouterShared>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RouterShared {
                buckets: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler for a frame type (or `*` for every frame)
    ///
    /// Multiple handlers per type coexist and all run, in registration
    /// order. The returned [`Subscription`] removes exactly this
    /// registration; dropping it without calling
    /// [`Subscription::unsubscribe`] leaves the handler installed.
    pub fn subscribe<F>(&self, frame_kind: &str, handler: F) -> Subscription
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            id,
            handler: Arc::new(handler),
        };

        self.shared
            .buckets
            .lock()
            .entry(frame_kind.to_string())
            .or_default()
            .push(entry);

        Subscription {
            router: Arc::downgrade(&self.shared),
            frame_kind: frame_kind.to_string(),
            id,
        }
    }

    /// Deliver a frame to all matching handlers
    ///
    /// Concrete-type handlers run first, then wildcard handlers, each in
    /// registration order. A panicking handler is caught and logged and the
    /// remaining handlers still run; nothing propagates to the read loop.
    pub fn dispatch(&self, frame: &Frame) {
        let targets: Vec<Handler> = {
            let buckets = self.shared.buckets.lock();
            let concrete = buckets.get(&frame.kind).into_iter().flatten();
            let wildcard = buckets.get(kind::WILDCARD).into_iter().flatten();
            concrete.chain(wildcard).map(|e| e.handler.clone()).collect()
        };

        for handler in targets {
            if catch_unwind(AssertUnwindSafe(|| handler(frame))).is_err() {
                tracing::error!(target: "ws", frame_kind = %frame.kind, "frame handler panicked");
            }
        }
    }

    /// Number of live registrations for a frame type
    pub fn handler_count(&self, frame_kind: &str) -> usize {
        self.shared
            .buckets
            .lock()
            .get(frame_kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle removing one registration from the router
pub struct Subscription {
    router: Weak<RouterShared>,
    frame_kind: String,
    id: u64,
}

impl Subscription {
    /// Remove the registration. After this returns, the handler is never
    /// invoked for any later-arriving frame.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.router.upgrade() {
            let mut buckets = shared.buckets.lock();
            if let Some(entries) = buckets.get_mut(&self.frame_kind) {
                entries.retain(|e| e.id != self.id);
                if entries.is_empty() {
                    buckets.remove(&self.frame_kind);
                }
            }
        }
    }
}
