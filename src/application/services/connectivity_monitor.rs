use crate::application::ports::connectivity::ConnectivitySignal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Reachable,
    Unreachable,
}

impl ConnectivityState {
    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Reachable
        } else {
            Self::Unreachable
        }
    }

    pub fn is_reachable(self) -> bool {
        self == Self::Reachable
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => write!(f, "reachable"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

/// Tracks whether the remote service is believed reachable and announces transitions.
///
/// Notifications are edge-triggered: observing the current state again notifies nobody.
pub struct ConnectivityMonitor {
    reachable: AtomicBool,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    events: broadcast::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            reachable: AtomicBool::new(initially_online),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            events,
        }
    }

    /// Seeds the state from the signal's current value without following it.
    pub fn from_signal(signal: &dyn ConnectivitySignal) -> Self {
        Self::new(signal.is_online())
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectivityState {
        ConnectivityState::from_online(self.is_reachable())
    }

    pub fn on_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityState> {
        self.events.subscribe()
    }

    /// Feeds a platform reading into the monitor. Returns whether the state changed.
    pub fn observe(&self, online: bool) -> bool {
        let previous = self.reachable.swap(online, Ordering::AcqRel);
        if previous == online {
            return false;
        }

        let state = ConnectivityState::from_online(online);
        tracing::info!(target: "offline::connectivity", %state, "connectivity changed");

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(state);
        }

        // no receivers is fine
        let _ = self.events.send(state);
        true
    }

    /// Follows `signal` until its sender goes away.
    pub fn attach(self: &Arc<Self>, signal: &dyn ConnectivitySignal) -> JoinHandle<()> {
        let mut receiver = signal.watch();
        let initial = *receiver.borrow_and_update();
        self.observe(initial);

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let online = *receiver.borrow_and_update();
                monitor.observe(online);
            }
            tracing::debug!(target: "offline::connectivity", "connectivity signal closed");
        })
    }
}
