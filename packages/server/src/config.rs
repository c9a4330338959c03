use anyhow::{ensure, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use harvester::HarvestConfig;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_bearer_token: String,
    pub batch_size: u32,
    pub max_heal_depth: u32,
    pub session_max_age_secs: u64,
    /// 0 means wait indefinitely for a manual challenge resolution.
    pub challenge_timeout_secs: u64,
    pub dev_items_per_category: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            api_bearer_token: env::var("API_BEARER_TOKEN")
                .context("API_BEARER_TOKEN must be set")?,
            batch_size: parse_positive(
                "HARVEST_BATCH_SIZE",
                env::var("HARVEST_BATCH_SIZE").unwrap_or_else(|_| "100".to_string()),
            )?,
            max_heal_depth: env::var("HARVEST_MAX_HEAL_DEPTH")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("HARVEST_MAX_HEAL_DEPTH must be a valid number")?,
            session_max_age_secs: env::var("SESSION_MAX_AGE_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .context("SESSION_MAX_AGE_SECS must be a valid number")?,
            challenge_timeout_secs: env::var("CHALLENGE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("CHALLENGE_TIMEOUT_SECS must be a valid number")?,
            dev_items_per_category: env::var("DEV_ITEMS_PER_CATEGORY")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .context("DEV_ITEMS_PER_CATEGORY must be a valid number")?,
        })
    }

    pub fn harvest_config(&self) -> HarvestConfig {
        HarvestConfig::default()
            .with_batch_size(self.batch_size)
            .with_max_heal_depth(self.max_heal_depth)
            .with_session_max_age(Duration::from_secs(self.session_max_age_secs))
            .with_challenge_timeout(Duration::from_secs(self.challenge_timeout_secs))
    }
}

/// A zero here would make batch partitioning meaningless, so it is
/// rejected at load time rather than deep in the engine.
fn parse_positive(name: &str, raw: String) -> Result<u32> {
    let value: u32 = raw
        .parse()
        .with_context(|| format!("{name} must be a valid number"))?;
    ensure!(value > 0, "{name} must be positive");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = parse_positive("HARVEST_BATCH_SIZE", "0".to_string()).err().unwrap();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn non_numeric_batch_size_is_rejected() {
        assert!(parse_positive("HARVEST_BATCH_SIZE", "many".to_string()).is_err());
    }

    #[test]
    fn positive_batch_size_passes_through() {
        assert_eq!(
            parse_positive("HARVEST_BATCH_SIZE", "100".to_string()).unwrap(),
            100
        );
    }
}
