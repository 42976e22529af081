//! Environment-driven settings
//!
//! Values come from the process environment (optionally seeded from a
//! `.env` file). Every field has a default so a bare environment works.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tax parameters consumed by the calculation service.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxRates {
    pub minimum_gross_salary: f64,
    pub cas_rate: f64,
    pub cass_rate: f64,
    pub rental_tax_rate: f64,
    pub property_tax_rate_short: f64,
    pub property_tax_rate_long: f64,
    /// Ownership duration (years, inclusive) from which the long rate applies
    pub long_ownership_years: u32,
}

impl Default for TaxRates {
    fn default() -> Self {
        Self {
            minimum_gross_salary: 3300.0,
            cas_rate: 0.25,
            cass_rate: 0.10,
            rental_tax_rate: 0.10,
            property_tax_rate_short: 0.03,
            property_tax_rate_long: 0.01,
            long_ownership_years: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub intent_confidence_threshold: f64,
    pub oracle_timeout: Duration,
    /// Prior messages forwarded to the oracle
    pub history_window: usize,
    pub tax_rates: TaxRates,
    pub database_url: Option<String>,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            intent_confidence_threshold: 0.7,
            oracle_timeout: Duration::from_millis(15_000),
            history_window: 10,
            tax_rates: TaxRates::default(),
            database_url: None,
            port: 8080,
        }
    }
}

impl Settings {
    /// Load settings from `.env` and the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Settings::default();
        let rates = defaults.tax_rates.clone();

        let threshold = parse_var("INTENT_CONFIDENCE_THRESHOLD", defaults.intent_confidence_threshold)?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(OrchestrationError::Config(format!(
                "INTENT_CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
                threshold
            )));
        }

        let timeout_ms: u64 = parse_var("ORACLE_TIMEOUT_MS", 15_000)?;

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                OrchestrationError::Config(format!("PORT is not a valid port: {}", raw))
            })?,
            Err(_) => defaults.port,
        };

        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("POSTGRES_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        Ok(Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            intent_confidence_threshold: threshold,
            oracle_timeout: Duration::from_millis(timeout_ms),
            history_window: parse_var("HISTORY_WINDOW", defaults.history_window)?,
            tax_rates: TaxRates {
                minimum_gross_salary: parse_var("MINIMUM_GROSS_SALARY", rates.minimum_gross_salary)?,
                cas_rate: parse_var("CAS_RATE", rates.cas_rate)?,
                cass_rate: parse_var("CASS_RATE", rates.cass_rate)?,
                rental_tax_rate: parse_var("RENTAL_TAX_RATE", rates.rental_tax_rate)?,
                property_tax_rate_short: parse_var("PROPERTY_TAX_RATE_SHORT", rates.property_tax_rate_short)?,
                property_tax_rate_long: parse_var("PROPERTY_TAX_RATE_LONG", rates.property_tax_rate_long)?,
                long_ownership_years: parse_var("LONG_OWNERSHIP_YEARS", rates.long_ownership_years)?,
            },
            database_url,
            port,
        })
    }

    /// True when a usable Gemini key is configured
    pub fn has_oracle_key(&self) -> bool {
        !self.gemini_api_key.is_empty() && self.gemini_api_key != "your_gemini_api_key_here"
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|_| {
            OrchestrationError::Config(format!("{} has an invalid value: {}", name, raw))
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_published_rates() {
        let settings = Settings::default();
        assert_eq!(settings.intent_confidence_threshold, 0.7);
        assert_eq!(settings.tax_rates.minimum_gross_salary, 3300.0);
        assert_eq!(settings.tax_rates.long_ownership_years, 3);
        assert!(!settings.has_oracle_key());
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("RO_TAX_TEST_GARBAGE_RATE", "not-a-number");
        let parsed: Result<f64> = parse_var("RO_TAX_TEST_GARBAGE_RATE", 0.1);
        env::remove_var("RO_TAX_TEST_GARBAGE_RATE");

        match parsed {
            Err(OrchestrationError::Config(msg)) => assert!(msg.contains("RO_TAX_TEST_GARBAGE_RATE")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_var_falls_back_when_unset() {
        let parsed: usize = parse_var("RO_TAX_TEST_UNSET_WINDOW", 7).unwrap();
        assert_eq!(parsed, 7);
    }
}
