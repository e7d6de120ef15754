//! Rate ingestion - periodically fetches a basket of rates from the upstream
//! provider and appends them to the observation log
//!
//! The provider publishes one cycle per hour; every cycle yields one
//! observation per target currency, all stamped with the provider's own
//! update time. The ingestion schedule is this process's concern only - the
//! store makes no assumption about it.

use crate::display::DISPLAY_TZ;
use crate::error::{RateWatchError, Result};
use crate::store::RateStore;
use crate::types::{CurrencyCode, RateObservation};
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://open.er-api.com/v6/latest";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// What to fetch and how often
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub base: CurrencyCode,
    pub targets: Vec<CurrencyCode>,
    pub api_url: String,
    pub interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        // XAU rides along: the provider quotes gold as a currency
        let targets = ["CNY", "EUR", "GBP", "JPY", "HKD", "AUD", "CAD", "CHF", "SGD", "XAU"];
        Self {
            base: CurrencyCode::parse("USD").expect("static code"),
            targets: targets
                .iter()
                .map(|c| CurrencyCode::parse(c).expect("static code"))
                .collect(),
            api_url: DEFAULT_API_URL.to_string(),
            interval: Duration::from_secs(3600),
        }
    }
}

/// Wire shape of the provider's latest-rates endpoint
#[derive(Debug, Deserialize)]
struct ProviderPayload {
    result: String,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    #[serde(default)]
    rates: HashMap<String, f64>,
    time_last_update_utc: Option<String>,
}

/// HTTP client for the upstream rate provider
pub struct ProviderClient {
    client: reqwest::Client,
    config: IngestConfig,
}

impl ProviderClient {
    pub fn new(config: IngestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| RateWatchError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Fetch one provider cycle: one observation per configured target
    pub async fn fetch_cycle(&self) -> Result<Vec<RateObservation>> {
        let url = format!("{}/{}", self.config.api_url, self.config.base);
        info!("fetching rates for base {}", self.config.base);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RateWatchError::Provider(format!(
                "provider returned status {}",
                response.status()
            )));
        }

        let payload: ProviderPayload = response.json().await?;
        observations_from_payload(payload, &self.config)
    }
}

fn observations_from_payload(
    payload: ProviderPayload,
    config: &IngestConfig,
) -> Result<Vec<RateObservation>> {
    if payload.result != "success" {
        return Err(RateWatchError::Provider(
            payload
                .error_type
                .unwrap_or_else(|| "unknown provider error".to_string()),
        ));
    }

    let observed_at = match payload.time_last_update_utc.as_deref() {
        Some(raw) => DateTime::parse_from_rfc2822(raw)
            .map_err(|e| RateWatchError::ParseError(format!("bad provider timestamp {:?}: {}", raw, e)))?,
        None => Utc::now().fixed_offset(),
    };
    let source_hour = provider_cycle_hour(observed_at)?;

    let mut observations = Vec::with_capacity(config.targets.len());
    for target in &config.targets {
        let Some(&rate) = payload.rates.get(target.as_str()) else {
            warn!("provider has no rate for {}, skipping", target);
            continue;
        };
        if !rate.is_finite() || rate <= 0.0 {
            warn!("provider returned unusable rate {} for {}, skipping", rate, target);
            continue;
        }
        observations.push(RateObservation::new(
            config.base.clone(),
            target.clone(),
            rate,
            observed_at,
            Some(source_hour),
        ));
    }

    info!(
        "provider cycle at {} yielded {} of {} targets",
        observed_at,
        observations.len(),
        config.targets.len()
    );
    Ok(observations)
}

/// The provider's cycle boundary: its update instant truncated to the hour in
/// the fixed display zone. Stored alongside the observation time, never
/// derived from it again.
pub fn provider_cycle_hour(at: DateTime<FixedOffset>) -> Result<DateTime<FixedOffset>> {
    at.with_timezone(&DISPLAY_TZ)
        .with_minute(0)
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_nanosecond(0))
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| {
            RateWatchError::ParseError(format!("cannot truncate {} to cycle hour", at))
        })
}

/// Owns the producer side: fetch cycles and append them to the log
pub struct Ingestor {
    provider: ProviderClient,
    db_path: PathBuf,
    interval: Duration,
}

impl Ingestor {
    pub fn new(db_path: impl Into<PathBuf>, config: IngestConfig) -> Result<Self> {
        let interval = config.interval;
        Ok(Self {
            provider: ProviderClient::new(config)?,
            db_path: db_path.into(),
            interval,
        })
    }

    /// One fetch-and-append cycle
    pub async fn run_once(&self) -> Result<usize> {
        let observations = self.provider.fetch_cycle().await?;
        if observations.is_empty() {
            warn!("provider cycle yielded no observations, nothing to append");
            return Ok(0);
        }

        let db_path = self.db_path.clone();
        let appended = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut store = RateStore::open(&db_path)?;
            store.append_batch(&observations)
        })
        .await
        .map_err(|e| RateWatchError::StoreUnavailable(format!("append task failed: {}", e)))??;

        info!("appended {} observations", appended);
        Ok(appended)
    }

    /// Fetch on a fixed interval until the process is stopped. A failed cycle
    /// logs and waits for the next one; the log is untouched.
    pub async fn run(&self) -> Result<()> {
        self.log_data_gap().await;

        loop {
            if let Err(e) = self.run_once().await {
                warn!("ingest cycle failed, retrying next cycle: {}", e);
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    // The free provider tier only serves "now", so gaps cannot be backfilled;
    // we surface how stale the log is and carry on.
    async fn log_data_gap(&self) {
        let db_path = self.db_path.clone();
        let last = tokio::task::spawn_blocking(move || -> Result<_> {
            RateStore::open(&db_path)?.last_update_time()
        })
        .await;

        match last {
            Ok(Ok(Some(last))) => {
                let age = Utc::now().signed_duration_since(last);
                if age.num_hours() >= 2 {
                    warn!(
                        "log is {} hours behind (last observation {}), hourly history has gaps",
                        age.num_hours(),
                        last
                    );
                } else {
                    info!("last observation at {}", last);
                }
            }
            Ok(Ok(None)) => info!("log is empty, starting fresh"),
            Ok(Err(e)) => warn!("could not determine last update time: {}", e),
            Err(e) => warn!("could not determine last update time: {}", e),
        }
    }
}
