//! Insulin pump state machine: reservoir/battery decay, alarm evaluation
//! and command execution with explicit rejection reasons.

use crate::config::SystemConfig;
use crate::protocol::{DeliveryMode, InsulinCommand, LastBolus, PumpStatusReport};
use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const MAX_ALARMS: usize = 4;
const COMMAND_DEDUP_WINDOW: usize = 16;

const DEFAULT_RESERVOIR_CAPACITY_U: f64 = 300.0;
const DEFAULT_BATTERY_PERCENT: f64 = 100.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpStatus {
    Active,
    Inactive,
    Error,
    /// No transition into this state is defined; kept so the wire format
    /// can represent externally serviced pumps.
    Maintenance,
}

impl PumpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PumpStatus::Active => "active",
            PumpStatus::Inactive => "inactive",
            PumpStatus::Error => "error",
            PumpStatus::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PumpStatus::Active),
            "inactive" => Some(PumpStatus::Inactive),
            "error" => Some(PumpStatus::Error),
            "maintenance" => Some(PumpStatus::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmCondition {
    LowInsulin,
    LowBattery,
    BatteryCritical,
    InsulinEmpty,
}

impl AlarmCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            AlarmCondition::LowInsulin => "low_insulin",
            AlarmCondition::LowBattery => "low_battery",
            AlarmCondition::BatteryCritical => "battery_critical",
            AlarmCondition::InsulinEmpty => "insulin_empty",
        }
    }

    pub fn is_critical(self) -> bool {
        matches!(
            self,
            AlarmCondition::BatteryCritical | AlarmCondition::InsulinEmpty
        )
    }
}

pub type AlarmSet = Vec<AlarmCondition, MAX_ALARMS>;

/// Mutable pump state, owned exclusively by the pump component.
#[derive(Debug, Clone)]
pub struct PumpState {
    pub reservoir_level_u: f64,
    pub reservoir_capacity_u: f64,
    pub battery_percent: f64,
    pub basal_rate_u_per_h: f64,
    pub status: PumpStatus,
    pub active_alarms: AlarmSet,
    pub total_daily_insulin_u: f64,
    pub last_bolus: Option<LastBolus>,
}

/// Outcome of an accepted command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Applied {
    Delivered { mode: DeliveryMode, amount_u: f64 },
    BasalUpdated { rate_u_per_h: f64 },
    Stopped,
}

/// A command the pump refused. The state is untouched; the caller publishes
/// an alert naming the reason — silent rejection is forbidden.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("pump not active (status: {0:?})")]
    PumpNotActive(PumpStatus),
    #[error("insufficient reservoir: requested {requested_u:.2}U, available {available_u:.2}U")]
    InsufficientReservoir { requested_u: f64, available_u: f64 },
    #[error("dose {requested_u:.2}U exceeds max single bolus {limit_u:.2}U")]
    ExceedsMaxBolus { requested_u: f64, limit_u: f64 },
    #[error("basal rate {requested_u_per_h:.2}U/h exceeds limit {limit_u_per_h:.2}U/h")]
    ExceedsMaxBasalRate {
        requested_u_per_h: f64,
        limit_u_per_h: f64,
    },
    #[error("duplicate command {0} ignored")]
    DuplicateCommand(u32),
}

#[derive(Debug)]
pub struct PumpController {
    state: PumpState,

    // Safety limits and alarm thresholds, fixed at construction
    max_single_bolus_u: f64,
    max_basal_rate_u_per_h: f64,
    low_insulin_percent: f64,
    low_battery_percent: f64,
    critical_battery_percent: f64,
    battery_drain_per_tick_percent: f64,

    // Exactly-once guard: recently applied command ids
    applied_command_ids: Vec<u32, COMMAND_DEDUP_WINDOW>,
}

impl PumpController {
    pub fn new(
        config: &SystemConfig,
        initial_insulin_u: f64,
        reservoir_capacity_u: f64,
        initial_battery_percent: f64,
        initial_basal_rate_u_per_h: f64,
    ) -> Self {
        let mut controller = Self {
            state: PumpState {
                reservoir_level_u: initial_insulin_u.clamp(0.0, reservoir_capacity_u),
                reservoir_capacity_u,
                battery_percent: initial_battery_percent.clamp(0.0, 100.0),
                basal_rate_u_per_h: initial_basal_rate_u_per_h,
                status: PumpStatus::Active,
                active_alarms: Vec::new(),
                total_daily_insulin_u: 0.0,
                last_bolus: None,
            },
            max_single_bolus_u: config.max_bolus_u,
            max_basal_rate_u_per_h: config.max_basal_rate_u_per_h,
            low_insulin_percent: config.low_insulin_percent,
            low_battery_percent: config.low_battery_percent,
            critical_battery_percent: config.critical_battery_percent,
            battery_drain_per_tick_percent: config.battery_drain_per_tick_percent,
            applied_command_ids: Vec::new(),
        };
        controller.evaluate_alarms();
        controller
    }

    pub fn with_defaults(config: &SystemConfig) -> Self {
        Self::new(
            config,
            DEFAULT_RESERVOIR_CAPACITY_U,
            DEFAULT_RESERVOIR_CAPACITY_U,
            DEFAULT_BATTERY_PERCENT,
            1.0,
        )
    }

    pub fn state(&self) -> &PumpState {
        &self.state
    }

    pub fn insulin_percent(&self) -> f64 {
        if self.state.reservoir_capacity_u <= 0.0 {
            return 0.0;
        }
        (self.state.reservoir_level_u / self.state.reservoir_capacity_u) * 100.0
    }

    pub fn has_critical_alarms(&self) -> bool {
        self.state
            .active_alarms
            .iter()
            .any(|alarm| alarm.is_critical())
    }

    /// Periodic decay: basal consumption over `elapsed_s` plus a constant
    /// per-tick battery drain, both floored at zero, then alarm
    /// re-evaluation.
    pub fn tick(&mut self, elapsed_s: f64) {
        let basal_consumed = self.state.basal_rate_u_per_h * elapsed_s / SECONDS_PER_HOUR;
        self.state.reservoir_level_u = (self.state.reservoir_level_u - basal_consumed).max(0.0);
        self.state.battery_percent =
            (self.state.battery_percent - self.battery_drain_per_tick_percent).max(0.0);

        self.evaluate_alarms();
        self.assert_invariants();
    }

    /// Recompute the alarm set from current levels. Alarms have no
    /// stickiness beyond the underlying measurement; an empty reservoir
    /// additionally forces the pump inactive.
    pub fn evaluate_alarms(&mut self) {
        self.state.active_alarms.clear();

        if self.insulin_percent() < self.low_insulin_percent {
            let _ = self.state.active_alarms.push(AlarmCondition::LowInsulin);
        }
        if self.state.battery_percent < self.low_battery_percent {
            let _ = self.state.active_alarms.push(AlarmCondition::LowBattery);
        }
        if self.state.battery_percent <= self.critical_battery_percent {
            let _ = self
                .state
                .active_alarms
                .push(AlarmCondition::BatteryCritical);
        }
        if self.state.reservoir_level_u <= 0.0 {
            let _ = self.state.active_alarms.push(AlarmCondition::InsulinEmpty);
            self.state.status = PumpStatus::Inactive;
        }
    }

    /// Validate and apply one command. Rejections leave the state untouched;
    /// duplicates of an already applied command id are refused so redelivery
    /// on the command channel can never double-dose.
    pub fn execute(
        &mut self,
        command: &InsulinCommand,
        now_s: u64,
    ) -> Result<Applied, RejectReason> {
        if self.applied_command_ids.contains(&command.command_id) {
            return Err(RejectReason::DuplicateCommand(command.command_id));
        }

        if self.state.status != PumpStatus::Active {
            return Err(RejectReason::PumpNotActive(self.state.status));
        }

        if command.delivery_mode.is_bolus_like() {
            if self.state.reservoir_level_u < command.amount_u {
                return Err(RejectReason::InsufficientReservoir {
                    requested_u: command.amount_u,
                    available_u: self.state.reservoir_level_u,
                });
            }
            if command.amount_u > self.max_single_bolus_u {
                return Err(RejectReason::ExceedsMaxBolus {
                    requested_u: command.amount_u,
                    limit_u: self.max_single_bolus_u,
                });
            }
        }

        let applied = match command.delivery_mode {
            DeliveryMode::Bolus | DeliveryMode::Correction => {
                self.state.reservoir_level_u -= command.amount_u;
                self.state.last_bolus = Some(LastBolus {
                    amount_u: command.amount_u,
                    timestamp_s: now_s,
                });
                self.state.total_daily_insulin_u += command.amount_u;
                Applied::Delivered {
                    mode: command.delivery_mode,
                    amount_u: command.amount_u,
                }
            }
            DeliveryMode::Basal => {
                if command.amount_u > self.max_basal_rate_u_per_h {
                    return Err(RejectReason::ExceedsMaxBasalRate {
                        requested_u_per_h: command.amount_u,
                        limit_u_per_h: self.max_basal_rate_u_per_h,
                    });
                }
                self.state.basal_rate_u_per_h = command.amount_u;
                Applied::BasalUpdated {
                    rate_u_per_h: command.amount_u,
                }
            }
            DeliveryMode::EmergencyStop => {
                self.state.basal_rate_u_per_h = 0.0;
                Applied::Stopped
            }
        };

        self.remember_command(command.command_id);
        self.evaluate_alarms();
        self.assert_invariants();

        Ok(applied)
    }

    /// Force the pump into the error state, as an execution fault would.
    pub fn inject_fault(&mut self) {
        self.state.status = PumpStatus::Error;
    }

    /// Clear an error state. The pump only returns to active while insulin
    /// remains; an empty reservoir keeps it inactive.
    pub fn clear_fault(&mut self) {
        if self.state.status == PumpStatus::Error && self.state.reservoir_level_u > 0.0 {
            self.state.status = PumpStatus::Active;
        }
        self.evaluate_alarms();
    }

    pub fn status_report(&self, patient_id: &str, now_s: u64) -> PumpStatusReport {
        PumpStatusReport {
            patient_id: patient_id.to_string(),
            reservoir_u: self.state.reservoir_level_u,
            reservoir_capacity_u: self.state.reservoir_capacity_u,
            battery_percent: self.state.battery_percent,
            status: self.state.status,
            basal_rate_u_per_h: self.state.basal_rate_u_per_h,
            alarms: self
                .state
                .active_alarms
                .iter()
                .map(|alarm| alarm.as_str().to_string())
                .collect(),
            total_daily_insulin_u: self.state.total_daily_insulin_u,
            last_bolus: self.state.last_bolus,
            timestamp_s: now_s,
        }
    }

    fn remember_command(&mut self, command_id: u32) {
        if self.applied_command_ids.is_full() {
            self.applied_command_ids.remove(0);
        }
        let _ = self.applied_command_ids.push(command_id);
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.state.reservoir_level_u >= 0.0
                && self.state.reservoir_level_u <= self.state.reservoir_capacity_u,
            "reservoir {} outside [0, {}]",
            self.state.reservoir_level_u,
            self.state.reservoir_capacity_u
        );
        debug_assert!(
            self.state.reservoir_level_u > 0.0 || self.state.status != PumpStatus::Active,
            "pump active with empty reservoir"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Priority;

    fn command(id: u32, mode: DeliveryMode, amount: f64) -> InsulinCommand {
        InsulinCommand {
            patient_id: "patient_001".into(),
            command_id: id,
            delivery_mode: mode,
            amount_u: amount,
            priority: Priority::High,
            reason: "test".into(),
            timestamp_s: 0,
        }
    }

    #[test]
    fn duplicate_command_is_refused() {
        let config = SystemConfig::default();
        let mut pump = PumpController::with_defaults(&config);

        let cmd = command(7, DeliveryMode::Correction, 2.0);
        assert!(pump.execute(&cmd, 100).is_ok());
        let before = pump.state().reservoir_level_u;

        assert_eq!(
            pump.execute(&cmd, 110),
            Err(RejectReason::DuplicateCommand(7))
        );
        assert!((pump.state().reservoir_level_u - before).abs() < f64::EPSILON);
    }

    #[test]
    fn emergency_stop_zeroes_basal_only() {
        let config = SystemConfig::default();
        let mut pump = PumpController::with_defaults(&config);
        let before = pump.state().reservoir_level_u;

        let outcome = pump.execute(&command(1, DeliveryMode::EmergencyStop, 0.0), 10);
        assert_eq!(outcome, Ok(Applied::Stopped));
        assert!(pump.state().basal_rate_u_per_h.abs() < f64::EPSILON);
        assert!((pump.state().reservoir_level_u - before).abs() < f64::EPSILON);
    }
}
