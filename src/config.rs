use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub db_path: PathBuf,
    pub min_dispute_reason_chars: usize,
    pub dispute_preview_chars: usize,
    pub log_filter: String,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("skill_booking.db"),
            min_dispute_reason_chars: 10,
            dispute_preview_chars: 50,
            log_filter: "info,skill_booking=debug".to_string(),
        }
    }
}

impl BookingConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        let defaults = Self::default();

        Ok(Self {
            db_path: env::var("SKILL_BOOKING_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            min_dispute_reason_chars: match env::var("SKILL_BOOKING_MIN_DISPUTE_REASON") {
                Ok(raw) => raw
                    .parse()
                    .context("SKILL_BOOKING_MIN_DISPUTE_REASON must be a valid number")?,
                Err(_) => defaults.min_dispute_reason_chars,
            },
            dispute_preview_chars: match env::var("SKILL_BOOKING_DISPUTE_PREVIEW") {
                Ok(raw) => raw
                    .parse()
                    .context("SKILL_BOOKING_DISPUTE_PREVIEW must be a valid number")?,
                Err(_) => defaults.dispute_preview_chars,
            },
            log_filter: env::var("RUST_LOG").unwrap_or(defaults.log_filter),
        })
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }
}
