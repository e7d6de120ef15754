//! Core observation types - currency codes, pair keys, rate observations

use crate::error::{RateWatchError, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated currency code: 3+ uppercase ASCII letters.
///
/// Covers ISO 4217 plus commodity codes like XAU (gold). The set of codes is
/// open - the basket is whatever the store has observations for, so this is a
/// validated string rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse and validate a currency code
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() < 3 || !s.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(RateWatchError::InvalidObservation(format!(
                "invalid currency code: {:?}",
                s
            )));
        }
        Ok(CurrencyCode(s.to_string()))
    }

    /// Get the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (base, target) pair identifying one logical series of observations
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    pub base: CurrencyCode,
    pub target: CurrencyCode,
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.target)
    }
}

/// One immutable timestamped rate record for a currency pair.
///
/// `rate` is units of `target` per 1 `base`. `observed_at` carries the
/// provider's offset as published; `source_hour` is the provider's own cycle
/// boundary, an independent field never derived from `observed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateObservation {
    pub base: CurrencyCode,
    pub target: CurrencyCode,
    pub rate: f64,
    pub observed_at: DateTime<FixedOffset>,
    pub source_hour: Option<DateTime<FixedOffset>>,
}

impl RateObservation {
    pub fn new(
        base: CurrencyCode,
        target: CurrencyCode,
        rate: f64,
        observed_at: DateTime<FixedOffset>,
        source_hour: Option<DateTime<FixedOffset>>,
    ) -> Self {
        Self {
            base,
            target,
            rate,
            observed_at,
            source_hour,
        }
    }

    /// Key identifying the series this observation belongs to
    pub fn key(&self) -> PairKey {
        PairKey {
            base: self.base.clone(),
            target: self.target.clone(),
        }
    }

    /// Check the observation is storable: positive finite rate, non-empty codes.
    ///
    /// Runs before any write; a rejected observation leaves the store untouched.
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(RateWatchError::InvalidObservation(format!(
                "rate must be positive and finite, got {} for {}",
                self.rate,
                self.key()
            )));
        }
        if self.base.as_str().is_empty() || self.target.as_str().is_empty() {
            return Err(RateWatchError::InvalidObservation(
                "currency codes must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(rate: f64) -> RateObservation {
        RateObservation::new(
            CurrencyCode::parse("USD").unwrap(),
            CurrencyCode::parse("EUR").unwrap(),
            rate,
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2025, 5, 27, 0, 0, 0)
                .unwrap(),
            None,
        )
    }

    #[test]
    fn test_currency_code_parse() {
        assert_eq!(CurrencyCode::parse("USD").unwrap().as_str(), "USD");
        assert_eq!(CurrencyCode::parse("XAU").unwrap().as_str(), "XAU");
        assert!(CurrencyCode::parse("usd").is_err());
        assert!(CurrencyCode::parse("US").is_err());
        assert!(CurrencyCode::parse("").is_err());
        assert!(CurrencyCode::parse("U$D").is_err());
    }

    #[test]
    fn test_pair_key_display() {
        let key = obs(1.0).key();
        assert_eq!(key.to_string(), "USD/EUR");
    }

    #[test]
    fn test_validate_rejects_bad_rates() {
        assert!(obs(0.92).validate().is_ok());
        assert!(obs(0.0).validate().is_err());
        assert!(obs(-1.5).validate().is_err());
        assert!(obs(f64::NAN).validate().is_err());
        assert!(obs(f64::INFINITY).validate().is_err());
    }
}
