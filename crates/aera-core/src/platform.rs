//! Platform capabilities injected into the sync engine

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

/// Source of timestamps for records and queued operations
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reports whether the device currently has connectivity
pub trait ConnectivityObserver {
    /// A receiver holding the current reachability; changes wake it
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state fed by whoever can observe the network (an OS
/// callback, a reachability probe, a test).
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish the current state. Repeating the same value does not notify.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }
}

impl ConnectivityObserver for ConnectivitySignal {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
