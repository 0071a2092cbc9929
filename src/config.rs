use crate::recurrence::RECURRENCE_HORIZON_WEEKS;
use chrono::{FixedOffset, Offset, Utc};
use config::{ConfigError, Environment, File};
use log::warn;
use rust_decimal::Decimal;
use serde::Deserialize;

const CONFIG_FILE: &str = "config/tutor_ledger.toml";
const ENV_PREFIX: &str = "TUTOR_LEDGER";

/// Runtime settings for the ledger and schedule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// What a lesson taken without a subscription costs. Zero disables debt billing.
    #[serde(default)]
    pub default_lesson_price: Decimal,
    /// The local zone, in minutes east of UTC, used to read stored instants as wall-clock time.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_horizon")]
    pub recurrence_horizon_weeks: u32,
    /// How many upcoming lessons the dashboard lists.
    #[serde(default = "default_upcoming_limit")]
    pub upcoming_events_limit: usize,
}

fn default_horizon() -> u32 {
    RECURRENCE_HORIZON_WEEKS
}

fn default_upcoming_limit() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_lesson_price: Decimal::ZERO,
            utc_offset_minutes: 0,
            recurrence_horizon_weeks: default_horizon(),
            upcoming_events_limit: default_upcoming_limit(),
        }
    }
}

impl Config {
    /// Load settings from `config/tutor_ledger.toml` (optional), then from `TUTOR_LEDGER__*`
    /// environment variables. Anything left unset takes its default.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Set the price billed for a lesson taken without credit.
    pub fn with_default_lesson_price(mut self, price: Decimal) -> Self {
        self.default_lesson_price = price;
        self
    }

    pub fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    /// The configured local zone. An offset outside +-24h falls back to UTC.
    pub fn local_offset(&self) -> FixedOffset {
        match FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)) {
            Some(offset) => offset,
            None => {
                warn!(
                    "utc_offset_minutes = {} is out of range, using UTC",
                    self.utc_offset_minutes
                );
                Utc.fix()
            }
        }
    }
}
