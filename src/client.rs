//! Refresh client - fixed-interval polling with retained last-good state
//!
//! One background task polls the read API and publishes its view over a watch
//! channel. The loop awaits each fetch before the next tick, so at most one
//! call is ever in flight; a failed poll keeps the previously displayed
//! snapshot and flags the error instead of blanking the view.

use crate::error::{RateWatchError, Result};
use crate::service::{RatesBody, Snapshot};
use log::{debug, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What the consumer currently shows
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    /// No response yet - distinct from both error and empty-but-valid
    Loading,
    /// A snapshot is displayed; `error` is set when the most recent poll
    /// failed and the snapshot is the retained last-good one
    Ready {
        snapshot: Snapshot,
        error: Option<String>,
    },
    /// Every poll so far has failed; there is no snapshot to retain
    Failed(String),
}

impl ViewState {
    fn apply_failure(&mut self, message: String) {
        match self {
            ViewState::Ready { error, .. } => *error = Some(message),
            _ => *self = ViewState::Failed(message),
        }
    }
}

/// Source of snapshots for the refresh loop. The seam exists so the loop can
/// be driven by a scripted fetcher in tests.
pub trait SnapshotFetcher: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Snapshot>> + Send;
}

/// Fetches snapshots from the read API over HTTP
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RateWatchError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl SnapshotFetcher for HttpFetcher {
    async fn fetch(&self) -> Result<Snapshot> {
        let response = self.client.get(&self.url).send().await?;
        let body: RatesBody = response.json().await?;
        match body {
            RatesBody::Ok(ok) => Ok(Snapshot {
                entries: ok.data,
                last_update: ok.last_update,
            }),
            RatesBody::Err(err) => Err(RateWatchError::Provider(err.error)),
        }
    }
}

/// Handle to a running refresh loop; dropping it without `stop` leaves the
/// task to be aborted by the runtime shutdown
pub struct RefreshHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RefreshHandle {
    /// Cancel the polling loop and wait for it to wind down
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

/// Fixed-interval polling loop over a [`SnapshotFetcher`]
pub struct RefreshClient<F> {
    fetcher: F,
    interval: Duration,
}

impl<F: SnapshotFetcher> RefreshClient<F> {
    pub fn new(fetcher: F, interval: Duration) -> Self {
        Self { fetcher, interval }
    }

    /// Spawn the polling task. Returns the state receiver (initially
    /// [`ViewState::Loading`]) and a handle for cancellation.
    pub fn spawn(self) -> (watch::Receiver<ViewState>, RefreshHandle) {
        let (state_tx, state_rx) = watch::channel(ViewState::Loading);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(state_tx, shutdown_rx));
        (
            state_rx,
            RefreshHandle {
                shutdown_tx,
                join,
            },
        )
    }

    /// The polling loop itself. Ticks immediately, then every `interval`;
    /// a tick that takes longer than the interval delays the next one rather
    /// than stacking calls.
    pub async fn run(
        self,
        state_tx: watch::Sender<ViewState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.fetcher.fetch().await {
                        Ok(snapshot) => {
                            debug!("refresh ok: {} entries", snapshot.entries.len());
                            let _ = state_tx.send(ViewState::Ready {
                                snapshot,
                                error: None,
                            });
                        }
                        Err(e) => {
                            warn!("refresh failed: {}", e);
                            state_tx.send_modify(|state| state.apply_failure(e.to_string()));
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("refresh loop shutting down");
                    break;
                }
            }
        }
    }
}
