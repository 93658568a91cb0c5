//! Online/offline signal and the auto-sync driver.

use crate::error::{SyncError, SyncResult};
use crate::outbox::SyncOutbox;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Shared online/offline signal.
///
/// Cloning is cheap; all clones observe the same signal. Setting and
/// reading do not require a tokio runtime.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Creates a signal with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates the state. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Background task that drains the outbox when connectivity returns and,
/// optionally, on a fixed interval.
pub struct AutoSync {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl AutoSync {
    /// Spawns the driver on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(outbox: Arc<SyncOutbox>) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        // Subscribe before spawning so a transition made right after this
        // call is not missed.
        let mut online_rx = outbox.connectivity().subscribe();
        let online = *online_rx.borrow_and_update();
        let task = tokio::spawn(run(outbox, online, online_rx, shutdown_rx));
        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Stops the driver and waits for it to exit.
    pub async fn shutdown(mut self) -> SyncResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| SyncError::Task(e.to_string()))
    }
}

async fn run(
    outbox: Arc<SyncOutbox>,
    mut was_online: bool,
    mut online_rx: watch::Receiver<bool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = outbox.config().sync_interval.map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    debug!(online = was_online, "auto-sync started");
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                if online && !was_online {
                    debug!("connectivity restored, draining outbox");
                    drain(&outbox).await;
                }
                was_online = online;
            }
            () = tick(&mut ticker) => {
                if outbox.connectivity().is_online() {
                    drain(&outbox).await;
                }
            }
        }
    }
    debug!("auto-sync stopped");
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn drain(outbox: &Arc<SyncOutbox>) {
    let outbox = Arc::clone(outbox);
    match tokio::task::spawn_blocking(move || outbox.drain()).await {
        Ok(Ok(report)) => debug!(?report, "auto-sync drain finished"),
        Ok(Err(e)) => warn!(error = %e, "auto-sync drain failed"),
        Err(e) => warn!(error = %e, "auto-sync drain task panicked"),
    }
}
