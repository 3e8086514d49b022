//! Dosing decision engine: turns one glucose reading plus the patient
//! profile and insulin-on-board into a go/no-go/alert decision.
//!
//! The rules are evaluated in order, first match wins:
//!
//! 1. Hypoglycemia always alerts and never doses, regardless of IOB or
//!    timers.
//! 2. Above the target band, the needed correction is computed against the
//!    band midpoint, netted against IOB, clamped to the max bolus, and
//!    gated by a hard minimum interval between corrections.
//! 3. Inside the band nothing happens.

use crate::config::SystemConfig;
use crate::iob::{ActiveDose, IobTracker};
use crate::profile::PatientProfile;
use crate::protocol::{
    Alert, AlertLevel, DeliveryMode, GlucoseReading, InsulinCommand, Priority, ProtocolHandler,
    PumpStatusReport,
};

/// Outcome of one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Glucose inside the target band.
    NoAction,
    /// Hypoglycemia: alert only, never insulin.
    Hypoglycemia { alert: Alert },
    /// Above target but active insulin already covers the needed dose.
    IobSufficient { alert: Alert },
    /// Above target but the correction interval has not elapsed.
    Waiting { alert: Alert },
    /// Correction issued.
    Correction {
        command: InsulinCommand,
        alert: Alert,
    },
}

#[derive(Debug)]
pub struct DecisionEngine {
    profile: PatientProfile,
    iob: IobTracker,
    protocol: ProtocolHandler,

    max_bolus_u: f64,
    min_correction_interval_s: u64,
    last_correction_time_s: Option<u64>,
}

impl DecisionEngine {
    pub fn new(profile: PatientProfile) -> Self {
        Self::with_config(profile, &SystemConfig::default())
    }

    pub fn with_config(profile: PatientProfile, config: &SystemConfig) -> Self {
        let iob = IobTracker::new(
            profile.insulin_sensitivity_factor,
            config.insulin_action_duration_s,
            config.max_effect_per_interval_mgdl,
        );
        Self {
            profile,
            iob,
            protocol: ProtocolHandler::new(),
            max_bolus_u: config.max_bolus_u,
            min_correction_interval_s: config.min_correction_interval_s,
            last_correction_time_s: None,
        }
    }

    pub fn profile(&self) -> &PatientProfile {
        &self.profile
    }

    /// Insulin still active from previously issued corrections.
    pub fn iob(&self, now_s: u64) -> f64 {
        self.iob.iob(now_s)
    }

    /// Evaluate one glucose reading.
    pub fn decide(&mut self, reading: &GlucoseReading, now_s: u64) -> Decision {
        let glucose = reading.glucose_mgdl;

        if self.profile.is_hypoglycemic(glucose) {
            let (level, message) = if glucose < self.profile.critical_low {
                (
                    AlertLevel::EmergencyLow,
                    format!(
                        "critical hypoglycemia: {glucose:.1} mg/dL - administer glucose immediately"
                    ),
                )
            } else {
                (
                    AlertLevel::WarningLow,
                    format!("hypoglycemia: {glucose:.1} mg/dL - take 15g of carbohydrates"),
                )
            };
            return Decision::Hypoglycemia {
                alert: Alert::new(&self.profile.patient_id, level, message, now_s),
            };
        }

        if self.profile.is_above_target(glucose) {
            return self.decide_hyperglycemia(glucose, now_s);
        }

        Decision::NoAction
    }

    fn decide_hyperglycemia(&mut self, glucose: f64, now_s: u64) -> Decision {
        let needed_dose = self.profile.correction_dose(glucose);
        let iob = self.iob.iob(now_s);
        let net_dose = (needed_dose - iob).max(0.0);

        if net_dose <= 0.0 {
            let message = format!(
                "hyperglycemia {glucose:.1} mg/dL but {iob:.2}U already on board - no correction"
            );
            return Decision::IobSufficient {
                alert: Alert::new(&self.profile.patient_id, AlertLevel::Info, message, now_s),
            };
        }

        if !self.correction_interval_elapsed(now_s) {
            let remaining = self.correction_wait_remaining(now_s);
            let message = format!(
                "hyperglycemia {glucose:.1} mg/dL detected, waiting {remaining}s before next correction"
            );
            return Decision::Waiting {
                alert: Alert::new(&self.profile.patient_id, AlertLevel::Info, message, now_s),
            };
        }

        let dose = net_dose.min(self.max_bolus_u);
        let emergency = glucose > self.profile.critical_high;
        let (level, priority) = if emergency {
            (AlertLevel::EmergencyHigh, Priority::Emergency)
        } else {
            (AlertLevel::WarningHigh, Priority::High)
        };

        let command = InsulinCommand {
            patient_id: self.profile.patient_id.clone(),
            command_id: self.protocol.next_command_id(),
            delivery_mode: DeliveryMode::Correction,
            amount_u: dose,
            priority,
            reason: format!("hyperglycemia correction - glucose {glucose:.1} mg/dL"),
            timestamp_s: now_s,
        };

        // The engine's own bookkeeping: the dose enters the ledger when the
        // command is issued, not when the pump confirms it.
        self.iob.record(ActiveDose {
            amount_u: dose,
            start_time_s: now_s,
        });
        self.last_correction_time_s = Some(now_s);

        let message = if emergency {
            format!("critical hyperglycemia: {glucose:.1} mg/dL - delivering {dose:.2}U insulin")
        } else {
            format!("hyperglycemia: {glucose:.1} mg/dL - correcting with {dose:.2}U insulin")
        };

        Decision::Correction {
            command,
            alert: Alert::new(&self.profile.patient_id, level, message, now_s),
        }
    }

    fn correction_interval_elapsed(&self, now_s: u64) -> bool {
        match self.last_correction_time_s {
            None => true,
            Some(last) => now_s.saturating_sub(last) > self.min_correction_interval_s,
        }
    }

    fn correction_wait_remaining(&self, now_s: u64) -> u64 {
        self.last_correction_time_s.map_or(0, |last| {
            (last + self.min_correction_interval_s).saturating_sub(now_s)
        })
    }

    /// Inspect a pump status report and raise notifications for active
    /// alarms. The engine consumes the status channel; the pump never
    /// consumes its own output.
    pub fn review_pump_status(&self, status: &PumpStatusReport, now_s: u64) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let patient_id = &self.profile.patient_id;

        for alarm in &status.alarms {
            match alarm.as_str() {
                "low_insulin" => {
                    let percent = if status.reservoir_capacity_u > 0.0 {
                        status.reservoir_u / status.reservoir_capacity_u * 100.0
                    } else {
                        0.0
                    };
                    alerts.push(Alert::new(
                        patient_id,
                        AlertLevel::Warning,
                        format!(
                            "insulin running low: {percent:.0}% remaining ({:.0}U)",
                            status.reservoir_u
                        ),
                        now_s,
                    ));
                }
                "low_battery" => alerts.push(Alert::new(
                    patient_id,
                    AlertLevel::Warning,
                    format!("pump battery low: {:.0}%", status.battery_percent),
                    now_s,
                )),
                "insulin_empty" => alerts.push(Alert::new(
                    patient_id,
                    AlertLevel::Emergency,
                    "insulin reservoir empty - refill immediately".to_string(),
                    now_s,
                )),
                "battery_critical" => alerts.push(Alert::new(
                    patient_id,
                    AlertLevel::Emergency,
                    format!("pump battery critical: {:.0}%", status.battery_percent),
                    now_s,
                )),
                _ => {}
            }
        }

        alerts
    }
}
