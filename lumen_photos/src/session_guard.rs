//! Lumen Photos - Session Guard
//!
//! Locks the key session after a period of inactivity or when the app
//! loses visibility. Activity only postpones the lock; it never unlocks.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::info;

use crate::master::MasterKeyManager;

type LockHook = Box<dyn Fn() + Send + Sync>;

/// Inactivity and visibility watchdog
pub struct SessionGuard {
    master: Arc<MasterKeyManager>,
    idle_timeout: Duration,
    last_activity: Mutex<Instant>,
    /// Extra cleanup run after every lock
    on_lock: Option<LockHook>,
}

impl SessionGuard {
    pub fn new(master: Arc<MasterKeyManager>, idle_timeout: Duration) -> Self {
        Self {
            master,
            idle_timeout,
            last_activity: Mutex::new(Instant::now()),
            on_lock: None,
        }
    }

    /// Run `hook` whenever the guard locks the session
    pub fn with_lock_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_lock = Some(Box::new(hook));
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// User interacted with the app
    pub fn record_activity(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// App went to background (`false`) or came back (`true`)
    pub fn visibility_changed(&self, visible: bool) {
        if visible {
            self.record_activity();
        } else {
            self.lock("hidden");
        }
    }

    /// Lock if idle for longer than the timeout at `now`. Returns whether
    /// a lock happened.
    pub fn check_idle_at(&self, now: Instant) -> bool {
        if self.master.session().is_empty() {
            return false;
        }
        let idle = now.saturating_duration_since(self.last_activity());
        if idle < self.idle_timeout {
            return false;
        }
        self.lock("idle timeout");
        true
    }

    pub fn check_idle(&self) -> bool {
        self.check_idle_at(Instant::now())
    }

    fn lock(&self, reason: &str) {
        self.master.lock();
        if let Some(hook) = &self.on_lock {
            hook();
        }
        info!(reason, "session guard locked the session");
    }

    /// Poll for inactivity every `poll_interval` until the guard is dropped
    pub fn spawn(self: &Arc<Self>, poll_interval: Duration) -> JoinHandle<()> {
        let guard: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match guard.upgrade() {
                    Some(guard) => {
                        guard.check_idle();
                    }
                    None => break,
                }
            }
        })
    }
}
