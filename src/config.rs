use serde::{Deserialize, Serialize};
use std::path::Path;

// Timer intervals (seconds)
const GLUCOSE_READING_INTERVAL_S: u64 = 10;
const PUMP_STATUS_INTERVAL_S: u64 = 30;

// Insulin action model
const INSULIN_ACTION_DURATION_S: u64 = 3600;
const MAX_EFFECT_PER_INTERVAL_MGDL: f64 = 30.0;

// Safety limits
const SAFETY_MAX_BOLUS_U: f64 = 15.0;
const SAFETY_MAX_BASAL_RATE_U_PER_H: f64 = 5.0;
const SAFETY_MIN_CORRECTION_INTERVAL_S: u64 = 180;

// Pump alarm thresholds
const PUMP_LOW_INSULIN_PERCENT: f64 = 20.0;
const PUMP_LOW_BATTERY_PERCENT: f64 = 15.0;
const PUMP_CRITICAL_BATTERY_PERCENT: f64 = 5.0;
const PUMP_BATTERY_DRAIN_PER_TICK_PERCENT: f64 = 0.1;

// Simulated command delivery (1 s/U, capped so timers are never starved)
const DELIVERY_SECONDS_PER_UNIT: f64 = 1.0;
const DELIVERY_DELAY_CAP_MS: u64 = 3000;

/// System-wide configuration shared by every component.
///
/// Loaded once at startup; a load failure is fatal because no component may
/// run with undefined safety limits. `Default` carries the values the
/// simulator ships with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub glucose_reading_interval_s: u64,
    pub pump_status_interval_s: u64,

    pub insulin_action_duration_s: u64,
    pub max_effect_per_interval_mgdl: f64,

    pub max_bolus_u: f64,
    pub max_basal_rate_u_per_h: f64,
    pub min_correction_interval_s: u64,

    pub low_insulin_percent: f64,
    pub low_battery_percent: f64,
    pub critical_battery_percent: f64,
    pub battery_drain_per_tick_percent: f64,

    pub delivery_seconds_per_unit: f64,
    pub delivery_delay_cap_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            glucose_reading_interval_s: GLUCOSE_READING_INTERVAL_S,
            pump_status_interval_s: PUMP_STATUS_INTERVAL_S,
            insulin_action_duration_s: INSULIN_ACTION_DURATION_S,
            max_effect_per_interval_mgdl: MAX_EFFECT_PER_INTERVAL_MGDL,
            max_bolus_u: SAFETY_MAX_BOLUS_U,
            max_basal_rate_u_per_h: SAFETY_MAX_BASAL_RATE_U_PER_H,
            min_correction_interval_s: SAFETY_MIN_CORRECTION_INTERVAL_S,
            low_insulin_percent: PUMP_LOW_INSULIN_PERCENT,
            low_battery_percent: PUMP_LOW_BATTERY_PERCENT,
            critical_battery_percent: PUMP_CRITICAL_BATTERY_PERCENT,
            battery_drain_per_tick_percent: PUMP_BATTERY_DRAIN_PER_TICK_PERCENT,
            delivery_seconds_per_unit: DELIVERY_SECONDS_PER_UNIT,
            delivery_delay_cap_ms: DELIVERY_DELAY_CAP_MS,
        }
    }
}

impl SystemConfig {
    /// Load configuration from a JSON file, filling absent fields from the
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bolus_u <= 0.0 {
            return Err(ConfigError::Invalid("max_bolus_u must be positive"));
        }
        if self.max_basal_rate_u_per_h <= 0.0 {
            return Err(ConfigError::Invalid("max_basal_rate_u_per_h must be positive"));
        }
        if self.insulin_action_duration_s == 0 {
            return Err(ConfigError::Invalid("insulin_action_duration_s must be non-zero"));
        }
        if self.critical_battery_percent > self.low_battery_percent {
            return Err(ConfigError::Invalid(
                "critical_battery_percent must not exceed low_battery_percent",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, #[source] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
