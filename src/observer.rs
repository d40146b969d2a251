//! Simplified connectivity signal
//!
//! Screens mostly want one boolean. The observer keeps `is_connected` and
//! the numeric ready-state updated synchronously from the manager's push
//! notifications, and re-samples on a periodic timer as a safety net
//! against a missed push. The poll task handle is retained and aborted on
//! shutdown.

use crate::manager::{ChangeGuard, ConnectionInfo, ConnectionManager, LinkState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

struct ObserverShared {
    manager: Arc<ConnectionManager>,
    connected: AtomicBool,
    ready_state: AtomicU8,
    /// Set once `shutdown` has torn down the update paths; reads fall back
    /// to sampling the manager directly
    stopped: AtomicBool,
}

impl ObserverShared {
    fn sample(&self) {
        let state = self.manager.state();
        self.connected
            .store(state == LinkState::Open, Ordering::Release);
        self.ready_state.store(state.ready_state(), Ordering::Release);
    }
}

/// Derived connected/disconnected view over the connection manager
pub struct ConnectionStateObserver {
    shared: Arc<ObserverShared>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    push_guard: Mutex<Option<ChangeGuard>>,
}

impl ConnectionStateObserver {
    pub fn new(manager: Arc<ConnectionManager>, poll_interval: Duration) -> Self {
        let observer = Self::without_push(manager, poll_interval);

        let weak: Weak<ObserverShared> = Arc::downgrade(&observer.shared);
        let guard = observer.shared.manager.on_connection_change(move |_| {
            if let Some(shared) = weak.upgrade() {
                shared.sample();
            }
        });
        *observer.push_guard.lock() = Some(guard);

        observer
    }

    /// Poll-only observer; the periodic re-sample is the only update path
    #[cfg(test)]
    pub(crate) fn poll_only(manager: Arc<ConnectionManager>, poll_interval: Duration) -> Self {
        Self::without_push(manager, poll_interval)
    }

    fn without_push(manager: Arc<ConnectionManager>, poll_interval: Duration) -> Self {
        let shared = Arc::new(ObserverShared {
            manager,
            connected: AtomicBool::new(false),
            ready_state: AtomicU8::new(LinkState::Idle.ready_state()),
            stopped: AtomicBool::new(false),
        });
        shared.sample();

        let poll_shared = shared.clone();
        let poll_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            // The immediate first tick duplicates the constructor sample
            ticker.tick().await;
            loop {
                ticker.tick().await;
                poll_shared.sample();
            }
        });

        Self {
            shared,
            poll_task: Mutex::new(Some(poll_task)),
            push_guard: Mutex::new(None),
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        if self.shared.stopped.load(Ordering::Acquire) {
            return self.shared.manager.state() == LinkState::Open;
        }
        self.shared.connected.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ready_state(&self) -> u8 {
        if self.shared.stopped.load(Ordering::Acquire) {
            return self.shared.manager.state().ready_state();
        }
        self.shared.ready_state.load(Ordering::Acquire)
    }

    /// Diagnostic snapshot, straight from the manager
    pub fn connection_info(&self) -> ConnectionInfo {
        self.shared.manager.connection_info()
    }

    /// Stop the poll timer and drop the push registration
    ///
    /// The observer stays usable: with no update paths left it answers
    /// every read with a fresh sample of the manager, so a reconnect after
    /// shutdown is still reported correctly.
    pub fn shutdown(&self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
        if let Some(guard) = self.push_guard.lock().take() {
            guard.unsubscribe();
        }
        self.shared.stopped.store(true, Ordering::Release);
    }
}

impl Drop for ConnectionStateObserver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimeConfig;
    use crate::router::EventRouter;
    use crate::test_utils::MockNet;

    fn manager_with(net: &Arc<MockNet>) -> Arc<ConnectionManager> {
        let config = RealtimeConfig::default();
        Arc::new(
            ConnectionManager::new(&config, net.connector(), EventRouter::new())
                .expect("manager construction"),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_updates_synchronously() {
        let net = MockNet::new();
        let manager = manager_with(&net);
        let observer = ConnectionStateObserver::new(manager.clone(), Duration::from_secs(5));

        assert!(!observer.is_connected());
        assert_eq!(observer.ready_state(), 3);

        manager.connect();
        settle().await;
        assert!(observer.is_connected());
        assert_eq!(observer.ready_state(), 1);

        manager.disconnect();
        assert!(!observer.is_connected());
        assert_eq!(observer.ready_state(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_is_a_safety_net() {
        let net = MockNet::new();
        let manager = manager_with(&net);
        // No push registration: only the 5s poll can catch the change
        let observer = ConnectionStateObserver::poll_only(manager.clone(), Duration::from_secs(5));

        manager.connect();
        settle().await;
        assert!(manager.is_connected());
        assert!(!observer.is_connected());

        tokio::time::sleep(Duration::from_millis(5_010)).await;
        assert!(observer.is_connected());

        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_falls_back_to_live_sampling() {
        let net = MockNet::new();
        let manager = manager_with(&net);
        let observer = ConnectionStateObserver::poll_only(manager.clone(), Duration::from_secs(5));

        manager.connect();
        settle().await;
        // The 5s poll has not ticked, the cached value is stale
        assert!(!observer.is_connected());

        observer.shutdown();
        // No poll and no push left; reads sample the manager directly
        assert!(observer.is_connected());
        assert_eq!(observer.ready_state(), 1);

        manager.disconnect();
        assert!(!observer.is_connected());
        assert_eq!(observer.ready_state(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_info_passthrough() {
        let net = MockNet::new();
        let manager = manager_with(&net);
        let observer = ConnectionStateObserver::new(manager.clone(), Duration::from_secs(5));

        manager.connect();
        settle().await;
        let info = observer.connection_info();
        assert_eq!(info.status, "open");
        assert_eq!(info.ready_state, 1);

        manager.disconnect();
    }
}
