//! Snapshot service - turns the store's latest-per-key result into the wire
//! contract and isolates store failures from clients
//!
//! Every request opens its own store handle inside a blocking task, bounded by
//! a timeout; the handle is dropped on every exit path. A store failure becomes
//! a structured `{"success":false,"error":...}` body with a 5xx status, never a
//! fault escaping the service boundary.

use crate::error::{RateWatchError, Result};
use crate::store::RateStore;
use crate::types::RateObservation;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, FixedOffset};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// One row of the wire contract. Field names are the external API, pinned
/// independently of the store's column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub base: String,
    pub target: String,
    pub rate: f64,
    pub timestamp: DateTime<FixedOffset>,
    #[serde(rename = "sourceHour")]
    pub source_hour: Option<DateTime<FixedOffset>>,
}

impl From<RateObservation> for SnapshotEntry {
    fn from(obs: RateObservation) -> Self {
        Self {
            base: obs.base.as_str().to_string(),
            target: obs.target.as_str().to_string(),
            rate: obs.rate,
            timestamp: obs.observed_at,
            source_hour: obs.source_hour,
        }
    }
}

/// Result of one latest-per-key query: the entries plus the newest observation
/// time among them (None when the store has no data yet - a valid state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entries: Vec<SnapshotEntry>,
    pub last_update: Option<DateTime<FixedOffset>>,
}

/// Success body: `{"success":true,"data":[...],"lastUpdate":<ts|null>}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesOk {
    pub success: bool,
    pub data: Vec<SnapshotEntry>,
    #[serde(rename = "lastUpdate")]
    pub last_update: Option<DateTime<FixedOffset>>,
}

/// Failure body: `{"success":false,"error":<message>}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesErr {
    pub success: bool,
    pub error: String,
}

/// Either wire body, as a client sees it
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RatesBody {
    Ok(RatesOk),
    Err(RatesErr),
}

impl From<Snapshot> for RatesOk {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            success: true,
            data: snapshot.entries,
            last_update: snapshot.last_update,
        }
    }
}

/// Read-side service over the observation log
#[derive(Debug, Clone)]
pub struct SnapshotService {
    db_path: PathBuf,
    query_timeout: Duration,
}

impl SnapshotService {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Compute the current snapshot.
    ///
    /// Opens a fresh store handle for this request only; the handle lives
    /// inside the blocking task and is released on success and failure alike.
    pub async fn get_snapshot(&self) -> Result<Snapshot> {
        let db_path = self.db_path.clone();
        let query = tokio::task::spawn_blocking(move || -> Result<Vec<RateObservation>> {
            let store = RateStore::open(&db_path)?;
            store.latest_per_key()
        });

        let observations = tokio::time::timeout(self.query_timeout, query)
            .await
            .map_err(|_| {
                RateWatchError::Timeout(format!("store query exceeded {:?}", self.query_timeout))
            })?
            .map_err(|e| RateWatchError::StoreUnavailable(format!("query task failed: {}", e)))??;

        let last_update = observations.iter().map(|o| o.observed_at).max();
        let entries = observations.into_iter().map(SnapshotEntry::from).collect();

        Ok(Snapshot {
            entries,
            last_update,
        })
    }
}

/// Build the read API router: one endpoint, no input parameters
pub fn router(service: SnapshotService) -> Router {
    Router::new()
        .route("/api/rates", get(rates_handler))
        .with_state(Arc::new(service))
}

async fn rates_handler(State(service): State<Arc<SnapshotService>>) -> Response {
    match service.get_snapshot().await {
        Ok(snapshot) => Json(RatesOk::from(snapshot)).into_response(),
        Err(e) => {
            error!("snapshot query failed: {}", e);
            let status = match e {
                RateWatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = RatesErr {
                success: false,
                error: e.to_string(),
            };
            (status, Json(body)).into_response()
        }
    }
}

/// Bind and serve the read API until the process is stopped
pub async fn serve(addr: SocketAddr, service: SnapshotService) -> Result<()> {
    let app = router(service);
    let listener = TcpListener::bind(addr).await?;
    info!("snapshot service listening on {}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| RateWatchError::Transport(e.to_string()))
}
