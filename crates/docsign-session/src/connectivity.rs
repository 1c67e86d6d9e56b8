//! Online/offline observation
//!
//! The controller never reads ambient network state directly. It subscribes
//! to a [`ConnectivityMonitor`] and reacts to transitions, so cancellation on
//! connection loss is testable without a network stack.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::HttpSigningApi;

/// Buffered transitions per subscriber before it lags
const TRANSITION_CAPACITY: usize = 16;

/// Lower bound for the polling interval
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// Source of online/offline state and transitions.
///
/// `subscribe` observes the latest state only. `transitions` delivers every
/// change, so a short offline blip is seen even if the state is back online
/// by the time the receiver is polled.
pub trait ConnectivityMonitor: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<Connectivity>;

    fn transitions(&self) -> broadcast::Receiver<Connectivity>;

    fn current(&self) -> Connectivity {
        let rx = self.subscribe();
        let state = *rx.borrow();
        state
    }
}

/// Connectivity set by the host, e.g. from platform network events
#[derive(Debug, Clone)]
pub struct ManualConnectivity {
    tx: Arc<watch::Sender<Connectivity>>,
    transitions: broadcast::Sender<Connectivity>,
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

impl ManualConnectivity {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            tx: Arc::new(tx),
            transitions,
        }
    }

    pub fn set(&self, state: Connectivity) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("Connectivity changed: {:?} -> {:?}", current, state);
                *current = state;
                true
            }
        });
        if changed {
            // No subscribers is fine
            let _ = self.transitions.send(state);
        }
    }

    pub fn go_offline(&self) {
        self.set(Connectivity::Offline);
    }

    pub fn go_online(&self) {
        self.set(Connectivity::Online);
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }

    fn transitions(&self) -> broadcast::Receiver<Connectivity> {
        self.transitions.subscribe()
    }
}

/// Polls the backend health endpoint on an interval.
///
/// Only transport failures (refused connection, DNS, timeout) count as
/// offline. Any HTTP response, including 404 from a backend without a
/// health route, proves the backend is reachable.
pub struct PollingConnectivity {
    state: ManualConnectivity,
    task: JoinHandle<()>,
}

impl PollingConnectivity {
    /// Start probing `api` every `interval` (at least 1 ms).
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(api: HttpSigningApi, interval: Duration) -> Self {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let state = ManualConnectivity::default();
        let poll_state = state.clone();

        let task = tokio::spawn(async move {
            info!(
                "Health polling started against {} (interval: {:?})",
                api.base_url(),
                interval
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match api.ping().await {
                    Ok(()) => poll_state.go_online(),
                    Err(e) if e.is_connectivity() => {
                        warn!("Health check failed: {}", e);
                        poll_state.go_offline();
                    }
                    Err(e) => {
                        debug!("Backend reachable, health check answered: {}", e);
                        poll_state.go_online();
                    }
                }
            }
        });

        Self { state, task }
    }
}

impl ConnectivityMonitor for PollingConnectivity {
    fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    fn transitions(&self) -> broadcast::Receiver<Connectivity> {
        self.state.transitions()
    }
}

impl Drop for PollingConnectivity {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Resolve on the first offline transition seen by `rx`.
///
/// A lagged receiver missed alternating transitions, at least one of them
/// offline. Never resolves if the monitor goes away.
pub(crate) async fn wait_offline(mut rx: broadcast::Receiver<Connectivity>) {
    loop {
        match rx.recv().await {
            Ok(Connectivity::Offline) | Err(RecvError::Lagged(_)) => return,
            Ok(Connectivity::Online) => {}
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
