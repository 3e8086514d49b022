//! Glucose sensor simulation model.
//!
//! Generates a mode-driven random walk over realistic glucose values and
//! couples delivered insulin back into the walk through an insulin-on-board
//! body model, so corrections issued on the bus actually lower subsequent
//! readings.

use crate::config::SystemConfig;
use crate::iob::{ActiveDose, IobTracker};
use crate::profile::PatientProfile;
use crate::protocol::{GlucoseReading, TrendDirection};
use rand::Rng;

const GLUCOSE_FLOOR_MGDL: f64 = 30.0;
const GLUCOSE_CEILING_MGDL: f64 = 500.0;
const TREND_THRESHOLD_MGDL: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    Normal,
    Hypoglycemia,
    Hyperglycemia,
    Fluctuating,
}

impl SimulationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SimulationMode::Normal => "normal",
            SimulationMode::Hypoglycemia => "hypoglycemia",
            SimulationMode::Hyperglycemia => "hyperglycemia",
            SimulationMode::Fluctuating => "fluctuating",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(SimulationMode::Normal),
            "hypoglycemia" => Some(SimulationMode::Hypoglycemia),
            "hyperglycemia" => Some(SimulationMode::Hyperglycemia),
            "fluctuating" => Some(SimulationMode::Fluctuating),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct GlucoseSensor {
    profile: PatientProfile,
    mode: SimulationMode,

    glucose_mgdl: f64,
    trend: TrendDirection,
    trend_rate_mgdl_min: f64,
    battery_percent: f64,
    signal_dbm: f64,
    reading_count: u32,
    reading_interval_s: u64,

    /// Body model: insulin absorbed from executed commands still lowering
    /// glucose.
    body: IobTracker,
}

impl GlucoseSensor {
    pub fn new(
        profile: PatientProfile,
        config: &SystemConfig,
        initial_glucose_mgdl: f64,
        mode: SimulationMode,
    ) -> Self {
        let body = IobTracker::new(
            profile.insulin_sensitivity_factor,
            config.insulin_action_duration_s,
            config.max_effect_per_interval_mgdl,
        );
        Self {
            profile,
            mode,
            glucose_mgdl: initial_glucose_mgdl.clamp(GLUCOSE_FLOOR_MGDL, GLUCOSE_CEILING_MGDL),
            trend: TrendDirection::Stable,
            trend_rate_mgdl_min: 0.0,
            battery_percent: 100.0,
            signal_dbm: -45.0,
            reading_count: 0,
            reading_interval_s: config.glucose_reading_interval_s,
            body,
        }
    }

    pub fn mode(&self) -> SimulationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SimulationMode) {
        self.mode = mode;
    }

    pub fn glucose(&self) -> f64 {
        self.glucose_mgdl
    }

    pub fn reading_count(&self) -> u32 {
        self.reading_count
    }

    /// Insulin absorbed by the body model and still active.
    pub fn body_iob(&self, now_s: u64) -> f64 {
        self.body.iob(now_s)
    }

    /// Register an executed dose with the body model.
    pub fn absorb_dose(&mut self, amount_u: f64, now_s: u64) {
        self.body.record(ActiveDose {
            amount_u,
            start_time_s: now_s,
        });
    }

    /// Produce the next reading: mode-driven variation plus the glucose
    /// effect of absorbed insulin, clamped to physiologic bounds.
    pub fn sample(&mut self, now_s: u64) -> GlucoseReading {
        let mut rng = rand::thread_rng();
        let variation = self.mode_variation(&mut rng);
        let insulin_effect = self.body.current_effect(now_s, self.reading_interval_s);

        self.glucose_mgdl = (self.glucose_mgdl + variation + insulin_effect)
            .clamp(GLUCOSE_FLOOR_MGDL, GLUCOSE_CEILING_MGDL);

        let net_change = variation + insulin_effect;
        let minutes = self.reading_interval_s as f64 / 60.0;
        if net_change > TREND_THRESHOLD_MGDL {
            self.trend = TrendDirection::Rising;
            self.trend_rate_mgdl_min = net_change.abs() / minutes;
        } else if net_change < -TREND_THRESHOLD_MGDL {
            self.trend = TrendDirection::Falling;
            self.trend_rate_mgdl_min = net_change.abs() / minutes;
        } else {
            self.trend = TrendDirection::Stable;
            self.trend_rate_mgdl_min = 0.0;
        }

        self.battery_percent = (self.battery_percent - rng.gen_range(0.01..0.05)).max(0.0);
        self.signal_dbm = f64::from(rng.gen_range(-60..=-40));
        self.reading_count = self.reading_count.wrapping_add(1);

        GlucoseReading {
            patient_id: self.profile.patient_id.clone(),
            glucose_mgdl: self.glucose_mgdl,
            status: self.profile.classify(self.glucose_mgdl),
            trend: self.trend,
            trend_rate_mgdl_min: self.trend_rate_mgdl_min,
            sensor_battery_percent: self.battery_percent,
            signal_dbm: self.signal_dbm,
            timestamp_s: now_s,
        }
    }

    fn mode_variation<R: Rng>(&self, rng: &mut R) -> f64 {
        match self.mode {
            SimulationMode::Normal => {
                // Slow drift back toward the middle of the band
                let target = rng.gen_range(90.0..130.0);
                (target - self.glucose_mgdl) * 0.1 + rng.gen_range(-5.0..5.0)
            }
            SimulationMode::Hypoglycemia => {
                if rng.gen_bool(0.1) {
                    rng.gen_range(2.0..8.0)
                } else {
                    rng.gen_range(-8.0..-2.0)
                }
            }
            SimulationMode::Hyperglycemia => {
                if rng.gen_bool(0.1) {
                    rng.gen_range(-8.0..-2.0)
                } else {
                    rng.gen_range(2.0..10.0)
                }
            }
            SimulationMode::Fluctuating => rng.gen_range(-15.0..15.0),
        }
    }
}
