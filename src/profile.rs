use serde::{Deserialize, Serialize};
use std::path::Path;

/// Glucose classification tiers, derived from profile thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlucoseStatus {
    CriticalLow,
    Low,
    Normal,
    High,
    CriticalHigh,
}

impl GlucoseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GlucoseStatus::CriticalLow => "critical_low",
            GlucoseStatus::Low => "low",
            GlucoseStatus::Normal => "normal",
            GlucoseStatus::High => "high",
            GlucoseStatus::CriticalHigh => "critical_high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical_low" => Some(GlucoseStatus::CriticalLow),
            "low" => Some(GlucoseStatus::Low),
            "normal" => Some(GlucoseStatus::Normal),
            "high" => Some(GlucoseStatus::High),
            "critical_high" => Some(GlucoseStatus::CriticalHigh),
            _ => None,
        }
    }
}

/// Immutable per-session patient descriptor.
///
/// The profile is the single source of truth for every glycemic threshold:
/// both reading classification and alert-severity tiers consult the same
/// `critical_low`/`critical_high` pair, so no global constant can disagree
/// with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    pub patient_id: String,
    pub name: String,
    pub age: u8,
    pub weight_kg: f64,

    // Glycemic targets (mg/dL)
    pub target_glucose_min: f64,
    pub target_glucose_max: f64,
    pub hypoglycemia_threshold: f64,
    pub critical_low: f64,
    pub critical_high: f64,

    // Insulin parameters
    pub insulin_sensitivity_factor: f64,
    pub carb_ratio: f64,
    pub basal_rate_u_per_h: f64,
}

impl PatientProfile {
    /// Load a profile from a JSON file. A failure here is fatal at process
    /// startup: no component may run with undefined thresholds.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProfileError::Io(path.display().to_string(), e))?;
        let profile: Self = serde_json::from_str(&raw)
            .map_err(|e| ProfileError::Parse(path.display().to_string(), e))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.patient_id.is_empty() {
            return Err(ProfileError::Invalid("patient_id must not be empty"));
        }
        if self.insulin_sensitivity_factor <= 0.0 {
            return Err(ProfileError::Invalid(
                "insulin_sensitivity_factor must be positive",
            ));
        }
        let ordered = self.critical_low < self.hypoglycemia_threshold
            && self.hypoglycemia_threshold < self.target_glucose_min
            && self.target_glucose_min < self.target_glucose_max
            && self.target_glucose_max < self.critical_high;
        if !ordered {
            return Err(ProfileError::Invalid(
                "thresholds must satisfy critical_low < hypo < target_min < target_max < critical_high",
            ));
        }
        Ok(())
    }

    /// Midpoint of the target band; corrections aim here.
    pub fn target_glucose(&self) -> f64 {
        (self.target_glucose_min + self.target_glucose_max) / 2.0
    }

    pub fn is_hypoglycemic(&self, glucose: f64) -> bool {
        glucose < self.hypoglycemia_threshold
    }

    pub fn is_above_target(&self, glucose: f64) -> bool {
        glucose > self.target_glucose_max
    }

    /// Classify a glucose value against this profile's thresholds.
    pub fn classify(&self, glucose: f64) -> GlucoseStatus {
        if glucose < self.critical_low {
            GlucoseStatus::CriticalLow
        } else if glucose < self.hypoglycemia_threshold {
            GlucoseStatus::Low
        } else if glucose > self.critical_high {
            GlucoseStatus::CriticalHigh
        } else if glucose > self.target_glucose_max {
            GlucoseStatus::High
        } else {
            GlucoseStatus::Normal
        }
    }

    /// Correction dose (U) needed to bring `glucose` down to the target
    /// midpoint, before insulin-on-board compensation. Never negative.
    pub fn correction_dose(&self, glucose: f64) -> f64 {
        let difference = glucose - self.target_glucose();
        if difference <= 0.0 {
            0.0
        } else {
            difference / self.insulin_sensitivity_factor
        }
    }

    /// Profile used by doc examples and tests.
    pub fn example() -> Self {
        Self {
            patient_id: "patient_001".into(),
            name: "Mario Rossi".into(),
            age: 45,
            weight_kg: 75.0,
            target_glucose_min: 70.0,
            target_glucose_max: 140.0,
            hypoglycemia_threshold: 60.0,
            critical_low: 50.0,
            critical_high: 250.0,
            insulin_sensitivity_factor: 50.0,
            carb_ratio: 12.0,
            basal_rate_u_per_h: 1.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read profile {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("failed to parse profile {0}: {1}")]
    Parse(String, #[source] serde_json::Error),
    #[error("invalid profile: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_profile_thresholds() {
        let profile = PatientProfile::example();
        assert_eq!(profile.classify(45.0), GlucoseStatus::CriticalLow);
        assert_eq!(profile.classify(55.0), GlucoseStatus::Low);
        assert_eq!(profile.classify(100.0), GlucoseStatus::Normal);
        assert_eq!(profile.classify(180.0), GlucoseStatus::High);
        assert_eq!(profile.classify(300.0), GlucoseStatus::CriticalHigh);
    }

    #[test]
    fn correction_dose_targets_band_midpoint() {
        let profile = PatientProfile::example();
        // target = 105, (260 - 105) / 50 = 3.1
        assert!((profile.correction_dose(260.0) - 3.1).abs() < 1e-9);
        assert!((profile.correction_dose(100.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn unordered_thresholds_rejected() {
        let mut profile = PatientProfile::example();
        profile.critical_high = 120.0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn status_round_trips_through_names() {
        for status in [
            GlucoseStatus::CriticalLow,
            GlucoseStatus::Low,
            GlucoseStatus::Normal,
            GlucoseStatus::High,
            GlucoseStatus::CriticalHigh,
        ] {
            assert_eq!(GlucoseStatus::parse(status.as_str()), Some(status));
        }
    }
}
