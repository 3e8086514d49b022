//! Typed message schemas over the SenML wire codec.
//!
//! Each channel carries exactly one message kind, and each kind is a closed
//! schema: decoding rejects messages with missing required fields instead of
//! defaulting them, so upstream protocol errors surface at the boundary
//! rather than deep inside a consumer.

use crate::profile::{GlucoseStatus, PatientProfile};
use crate::pump::PumpStatus;
use crate::senml::{self, CodecError, SenmlEncoder, SenmlMessage};
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};

pub const MAX_WIRE_MESSAGE_SIZE: usize = 1024;

pub type WireBuffer = ArrayString<MAX_WIRE_MESSAGE_SIZE>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for field `{0}`")]
    InvalidField(&'static str),
    #[error("message base name `{0}` does not match expected kind")]
    WrongKind(String),
    #[error("message exceeds wire buffer size")]
    MessageTooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    Basal,
    Bolus,
    Correction,
    EmergencyStop,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::Basal => "basal",
            DeliveryMode::Bolus => "bolus",
            DeliveryMode::Correction => "correction",
            DeliveryMode::EmergencyStop => "emergency_stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basal" => Some(DeliveryMode::Basal),
            "bolus" => Some(DeliveryMode::Bolus),
            "correction" => Some(DeliveryMode::Correction),
            "emergency_stop" => Some(DeliveryMode::EmergencyStop),
            _ => None,
        }
    }

    /// Bolus-like modes debit the reservoir at execution time; basal is
    /// debited progressively by the pump tick.
    pub fn is_bolus_like(self) -> bool {
        matches!(self, DeliveryMode::Bolus | DeliveryMode::Correction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Emergency,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Emergency => "emergency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "emergency" => Some(Priority::Emergency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    EmergencyLow,
    WarningLow,
    EmergencyHigh,
    WarningHigh,
    Warning,
    Info,
    Error,
    Emergency,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::EmergencyLow => "EMERGENCY_LOW",
            AlertLevel::WarningLow => "WARNING_LOW",
            AlertLevel::EmergencyHigh => "EMERGENCY_HIGH",
            AlertLevel::WarningHigh => "WARNING_HIGH",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Info => "INFO",
            AlertLevel::Error => "ERROR",
            AlertLevel::Emergency => "EMERGENCY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EMERGENCY_LOW" => Some(AlertLevel::EmergencyLow),
            "WARNING_LOW" => Some(AlertLevel::WarningLow),
            "EMERGENCY_HIGH" => Some(AlertLevel::EmergencyHigh),
            "WARNING_HIGH" => Some(AlertLevel::WarningHigh),
            "WARNING" => Some(AlertLevel::Warning),
            "INFO" => Some(AlertLevel::Info),
            "ERROR" => Some(AlertLevel::Error),
            "EMERGENCY" => Some(AlertLevel::Emergency),
            _ => None,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            AlertLevel::Info => Severity::Low,
            AlertLevel::Warning | AlertLevel::WarningLow | AlertLevel::WarningHigh => {
                Severity::Medium
            }
            AlertLevel::Error => Severity::High,
            AlertLevel::Emergency | AlertLevel::EmergencyLow | AlertLevel::EmergencyHigh => {
                Severity::Critical
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

impl TrendDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendDirection::Rising => "rising",
            TrendDirection::Falling => "falling",
            TrendDirection::Stable => "stable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rising" => Some(TrendDirection::Rising),
            "falling" => Some(TrendDirection::Falling),
            "stable" => Some(TrendDirection::Stable),
            _ => None,
        }
    }
}

fn base_name(patient_id: &str, kind: &str) -> String {
    format!("urn:patient:{patient_id}:{kind}:")
}

fn patient_id_from_base(base: &str, kind: &str) -> Result<String, ProtocolError> {
    let parts: Vec<&str> = base.split(':').collect();
    match parts.as_slice() {
        ["urn", "patient", id, k, ""] if *k == kind && !id.is_empty() => Ok((*id).to_string()),
        _ => Err(ProtocolError::WrongKind(base.to_string())),
    }
}

fn require_number(msg: &SenmlMessage, name: &'static str) -> Result<f64, ProtocolError> {
    msg.number(name).ok_or(ProtocolError::MissingField(name))
}

fn require_text<'a>(
    msg: &'a SenmlMessage,
    name: &'static str,
) -> Result<&'a str, ProtocolError> {
    msg.text(name).ok_or(ProtocolError::MissingField(name))
}

/// One glucose sensor sample, classified against the patient profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReading {
    pub patient_id: String,
    pub glucose_mgdl: f64,
    pub status: GlucoseStatus,
    pub trend: TrendDirection,
    pub trend_rate_mgdl_min: f64,
    pub sensor_battery_percent: f64,
    pub signal_dbm: f64,
    pub timestamp_s: u64,
}

impl GlucoseReading {
    /// A stable reading with nominal sensor health; the simulation model
    /// fills the remaining fields from its own state.
    pub fn new(patient_id: &str, glucose_mgdl: f64, timestamp_s: u64) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            glucose_mgdl,
            status: GlucoseStatus::Normal,
            trend: TrendDirection::Stable,
            trend_rate_mgdl_min: 0.0,
            sensor_battery_percent: 100.0,
            signal_dbm: -50.0,
            timestamp_s,
        }
    }

    /// Same, but with the status tier derived from `profile`.
    pub fn classified(profile: &PatientProfile, glucose_mgdl: f64, timestamp_s: u64) -> Self {
        let mut reading = Self::new(&profile.patient_id, glucose_mgdl, timestamp_s);
        reading.status = profile.classify(glucose_mgdl);
        reading
    }

    pub fn to_senml(&self) -> Result<String, ProtocolError> {
        let encoder = SenmlEncoder::new(
            &base_name(&self.patient_id, "glucose"),
            self.timestamp_s as f64,
        )
        .base_unit("mg/dL")
        .number("level", self.glucose_mgdl)
        .string("status", self.status.as_str())
        .string("trend", self.trend.as_str())
        .number_with_unit("trend_rate", self.trend_rate_mgdl_min, "mg/dL/min")
        .number_with_unit("battery", self.sensor_battery_percent, "%")
        .number_with_unit("signal", self.signal_dbm, "dBm");
        Ok(encoder.encode()?)
    }

    pub fn from_senml(payload: &str) -> Result<Self, ProtocolError> {
        let msg = senml::decode(payload)?;
        let patient_id = patient_id_from_base(&msg.base_name, "glucose")?;

        let glucose_mgdl = require_number(&msg, "level")?;
        let status = GlucoseStatus::parse(require_text(&msg, "status")?)
            .ok_or(ProtocolError::InvalidField("status"))?;
        // Sensor health fields are optional on the wire.
        let trend = msg
            .text("trend")
            .map_or(Some(TrendDirection::Stable), TrendDirection::parse)
            .ok_or(ProtocolError::InvalidField("trend"))?;

        Ok(Self {
            patient_id,
            glucose_mgdl,
            status,
            trend,
            trend_rate_mgdl_min: msg.number("trend_rate").unwrap_or(0.0),
            sensor_battery_percent: msg.number("battery").unwrap_or(100.0),
            signal_dbm: msg.number("signal").unwrap_or(-50.0),
            timestamp_s: msg.base_time as u64,
        })
    }
}

/// A dosing command issued by the decision engine. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsulinCommand {
    pub patient_id: String,
    pub command_id: u32,
    pub delivery_mode: DeliveryMode,
    /// Units for bolus/correction; U/h for basal; ignored for emergency stop.
    pub amount_u: f64,
    pub priority: Priority,
    pub reason: String,
    pub timestamp_s: u64,
}

impl InsulinCommand {
    pub fn to_senml(&self) -> Result<String, ProtocolError> {
        let encoder = SenmlEncoder::new(
            &base_name(&self.patient_id, "insulin"),
            self.timestamp_s as f64,
        )
        .base_unit("U")
        .number("dose", self.amount_u)
        .string("type", self.delivery_mode.as_str())
        .number("command_id", f64::from(self.command_id))
        .string("priority", self.priority.as_str())
        .string("reason", &self.reason);
        Ok(encoder.encode()?)
    }

    pub fn from_senml(payload: &str) -> Result<Self, ProtocolError> {
        let msg = senml::decode(payload)?;
        let patient_id = patient_id_from_base(&msg.base_name, "insulin")?;

        let amount_u = require_number(&msg, "dose")?;
        if !amount_u.is_finite() || amount_u < 0.0 {
            return Err(ProtocolError::InvalidField("dose"));
        }
        let delivery_mode = DeliveryMode::parse(require_text(&msg, "type")?)
            .ok_or(ProtocolError::InvalidField("type"))?;
        let raw_id = require_number(&msg, "command_id")?;
        if raw_id < 0.0 || raw_id > f64::from(u32::MAX) || raw_id.fract() > 0.0 {
            return Err(ProtocolError::InvalidField("command_id"));
        }
        let priority = Priority::parse(require_text(&msg, "priority")?)
            .ok_or(ProtocolError::InvalidField("priority"))?;
        let reason = require_text(&msg, "reason")?.to_string();

        Ok(Self {
            patient_id,
            command_id: raw_id as u32,
            delivery_mode,
            amount_u,
            priority,
            reason,
            timestamp_s: msg.base_time as u64,
        })
    }
}

/// Periodic pump state snapshot, retained on the status channel so late
/// subscribers immediately see the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpStatusReport {
    pub patient_id: String,
    pub reservoir_u: f64,
    pub reservoir_capacity_u: f64,
    pub battery_percent: f64,
    pub status: PumpStatus,
    pub basal_rate_u_per_h: f64,
    pub alarms: Vec<String>,
    pub total_daily_insulin_u: f64,
    pub last_bolus: Option<LastBolus>,
    pub timestamp_s: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastBolus {
    pub amount_u: f64,
    pub timestamp_s: u64,
}

impl PumpStatusReport {
    pub fn to_senml(&self) -> Result<String, ProtocolError> {
        let mut encoder = SenmlEncoder::new(
            &base_name(&self.patient_id, "pump"),
            self.timestamp_s as f64,
        )
        .number_with_unit("reservoir", self.reservoir_u, "U")
        .number_with_unit("reservoir_capacity", self.reservoir_capacity_u, "U")
        .number_with_unit("battery", self.battery_percent, "%")
        .string("status", self.status.as_str())
        .number_with_unit("basal_rate", self.basal_rate_u_per_h, "U/h")
        .number("alarms_count", self.alarms.len() as f64)
        .number_with_unit("total_daily", self.total_daily_insulin_u, "U");
        if !self.alarms.is_empty() {
            encoder = encoder.string("alarms", &self.alarms.join(","));
        }
        if let Some(bolus) = self.last_bolus {
            // Carried at its own absolute time via the record time offset.
            let offset = bolus.timestamp_s as f64 - self.timestamp_s as f64;
            encoder = encoder.number_at_offset("last_bolus", bolus.amount_u, offset);
        }
        Ok(encoder.encode()?)
    }

    pub fn from_senml(payload: &str) -> Result<Self, ProtocolError> {
        let msg = senml::decode(payload)?;
        let patient_id = patient_id_from_base(&msg.base_name, "pump")?;

        let status = PumpStatus::parse(require_text(&msg, "status")?)
            .ok_or(ProtocolError::InvalidField("status"))?;
        let alarms_count = require_number(&msg, "alarms_count")?;
        if alarms_count < 0.0 || alarms_count.fract() > 0.0 {
            return Err(ProtocolError::InvalidField("alarms_count"));
        }
        let alarms: Vec<String> = match msg.text("alarms") {
            Some(joined) if !joined.is_empty() => {
                joined.split(',').map(ToString::to_string).collect()
            }
            _ => Vec::new(),
        };
        if alarms.len() != alarms_count as usize {
            return Err(ProtocolError::InvalidField("alarms_count"));
        }
        let last_bolus = match (msg.number("last_bolus"), msg.timestamp("last_bolus")) {
            (Some(amount_u), Some(ts)) => Some(LastBolus {
                amount_u,
                timestamp_s: ts as u64,
            }),
            _ => None,
        };

        Ok(Self {
            patient_id,
            reservoir_u: require_number(&msg, "reservoir")?,
            reservoir_capacity_u: require_number(&msg, "reservoir_capacity")?,
            battery_percent: require_number(&msg, "battery")?,
            status,
            basal_rate_u_per_h: require_number(&msg, "basal_rate")?,
            alarms,
            total_daily_insulin_u: msg.number("total_daily").unwrap_or(0.0),
            last_bolus,
            timestamp_s: msg.base_time as u64,
        })
    }
}

/// Fire-and-forget notification. Write-once; no further lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub patient_id: String,
    pub level: AlertLevel,
    pub message: String,
    pub severity: Severity,
    pub timestamp_s: u64,
}

impl Alert {
    pub fn new(patient_id: &str, level: AlertLevel, message: String, timestamp_s: u64) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            level,
            message,
            severity: level.severity(),
            timestamp_s,
        }
    }

    pub fn to_senml(&self) -> Result<String, ProtocolError> {
        let encoder = SenmlEncoder::new(
            &base_name(&self.patient_id, "alert"),
            self.timestamp_s as f64,
        )
        .string("type", self.level.as_str())
        .string("message", &self.message)
        .string("severity", self.severity.as_str());
        Ok(encoder.encode()?)
    }

    pub fn from_senml(payload: &str) -> Result<Self, ProtocolError> {
        let msg = senml::decode(payload)?;
        let patient_id = patient_id_from_base(&msg.base_name, "alert")?;

        let level = AlertLevel::parse(require_text(&msg, "type")?)
            .ok_or(ProtocolError::InvalidField("type"))?;
        let message = require_text(&msg, "message")?.to_string();
        let severity = Severity::parse(require_text(&msg, "severity")?)
            .ok_or(ProtocolError::InvalidField("severity"))?;

        Ok(Self {
            patient_id,
            level,
            message,
            severity,
            timestamp_s: msg.base_time as u64,
        })
    }
}

/// Retained patient descriptor published once at startup on the info
/// channel for dashboards.
pub fn patient_info_to_senml(
    profile: &PatientProfile,
    timestamp_s: u64,
) -> Result<String, ProtocolError> {
    let encoder = SenmlEncoder::new(&base_name(&profile.patient_id, "info"), timestamp_s as f64)
        .string("name", &profile.name)
        .number("age", f64::from(profile.age))
        .number_with_unit("weight", profile.weight_kg, "kg")
        .number_with_unit("target_min", profile.target_glucose_min, "mg/dL")
        .number_with_unit("target_max", profile.target_glucose_max, "mg/dL")
        .number_with_unit("isf", profile.insulin_sensitivity_factor, "mg/dL/U")
        .number_with_unit("basal_rate", profile.basal_rate_u_per_h, "U/h");
    Ok(encoder.encode()?)
}

/// Per-component wire state: a command-id counter and a preallocated encode
/// buffer sized to the largest message the system produces.
#[derive(Debug)]
pub struct ProtocolHandler {
    command_counter: u32,
    encode_buffer: WireBuffer,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self {
            command_counter: 0,
            encode_buffer: ArrayString::new(),
        }
    }

    pub fn next_command_id(&mut self) -> u32 {
        self.command_counter = self.command_counter.wrapping_add(1);
        self.command_counter
    }

    fn fill_buffer(&mut self, encoded: &str) -> Result<&str, ProtocolError> {
        if encoded.len() > MAX_WIRE_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        self.encode_buffer.clear();
        self.encode_buffer.push_str(encoded);
        Ok(&self.encode_buffer)
    }

    pub fn encode_reading(&mut self, reading: &GlucoseReading) -> Result<&str, ProtocolError> {
        let encoded = reading.to_senml()?;
        self.fill_buffer(&encoded)
    }

    pub fn encode_command(&mut self, command: &InsulinCommand) -> Result<&str, ProtocolError> {
        let encoded = command.to_senml()?;
        self.fill_buffer(&encoded)
    }

    pub fn encode_status(&mut self, status: &PumpStatusReport) -> Result<&str, ProtocolError> {
        let encoded = status.to_senml()?;
        self.fill_buffer(&encoded)
    }

    pub fn encode_alert(&mut self, alert: &Alert) -> Result<&str, ProtocolError> {
        let encoded = alert.to_senml()?;
        self.fill_buffer(&encoded)
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}
