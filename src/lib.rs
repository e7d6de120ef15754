//! # ratewatch
//!
//! Tracks timestamped exchange-rate observations for a basket of currency
//! pairs and serves the single most-recent observation per pair.
//!
//! The store is an append-only SQLite log; the read API computes the
//! latest-per-pair snapshot on every request; the refresh client polls that
//! API and never blanks a previously good view on a transient failure.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ratewatch::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let mut store = RateStore::open_in_memory()?;
//! let obs = RateObservation::new(
//!     CurrencyCode::parse("USD")?,
//!     CurrencyCode::parse("EUR")?,
//!     0.92,
//!     chrono::Utc::now().fixed_offset(),
//!     None,
//! );
//! store.append(&obs)?;
//! assert_eq!(store.latest_per_key()?.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod display;
pub mod error;
pub mod ingest;
pub mod service;
pub mod store;
pub mod types;

pub mod prelude {
    //! Commonly used types and traits
    pub use crate::client::{HttpFetcher, RefreshClient, SnapshotFetcher, ViewState};
    pub use crate::error::{RateWatchError, Result};
    pub use crate::ingest::{IngestConfig, Ingestor};
    pub use crate::service::{Snapshot, SnapshotEntry, SnapshotService};
    pub use crate::store::RateStore;
    pub use crate::types::{CurrencyCode, PairKey, RateObservation};
}
