use glucobus::profile::{GlucoseStatus, PatientProfile};
use glucobus::protocol::{
    Alert, AlertLevel, DeliveryMode, GlucoseReading, InsulinCommand, LastBolus, Priority,
    ProtocolError, PumpStatusReport, TrendDirection,
};
use glucobus::pump::PumpStatus;
use glucobus::senml::{self, SenmlEncoder};

#[test]
fn codec_round_trips_values_units_and_timestamps() {
    let payload = SenmlEncoder::new("urn:patient:p1:pump:", 1_700_000_000.0)
        .base_unit("U")
        .number("reservoir", 123.456_789)
        .number_with_unit("battery", 87.5, "%")
        .string("status", "active")
        .number_at_offset("last_bolus", 2.1, -900.0)
        .encode()
        .unwrap();

    let decoded = senml::decode(&payload).unwrap();
    assert_eq!(decoded.base_name, "urn:patient:p1:pump:");
    assert!((decoded.base_time - 1_700_000_000.0).abs() < f64::EPSILON);
    assert_eq!(decoded.base_unit.as_deref(), Some("U"));

    // Numeric values reproduced to source precision
    assert!((decoded.number("reservoir").unwrap() - 123.456_789).abs() < f64::EPSILON);
    assert!((decoded.number("battery").unwrap() - 87.5).abs() < f64::EPSILON);
    assert_eq!(decoded.text("status"), Some("active"));

    // Units: explicit override vs base-unit fallback
    assert_eq!(decoded.fields["battery"].unit.as_deref(), Some("%"));
    assert_eq!(decoded.fields["reservoir"].unit.as_deref(), Some("U"));

    // Absolute timestamps are base_time + offset
    assert!((decoded.timestamp("last_bolus").unwrap() - 1_699_999_100.0).abs() < f64::EPSILON);
    assert!((decoded.timestamp("status").unwrap() - 1_700_000_000.0).abs() < f64::EPSILON);
}

#[test]
fn malformed_payloads_are_rejected() {
    for payload in [
        "",
        "not json",
        "{}",
        "[]",
        r#"[{"n":"orphan","v":1.0}]"#,
        r#"[{"bn":"urn:x:","bt":0.0},{"v":3.0}]"#,
        r#"[{"bn":"urn:x:","bt":0.0},{"n":"empty"}]"#,
    ] {
        assert!(
            senml::decode(payload).is_err(),
            "payload {payload:?} should not decode"
        );
    }
}

#[test]
fn decode_tolerates_missing_optional_fields() {
    let msg = senml::decode(r#"[{"bn":"urn:x:","bt":42.0},{"n":"bare","v":7.0}]"#).unwrap();
    assert_eq!(msg.base_unit, None);
    assert_eq!(msg.fields["bare"].unit, None);
    assert!((msg.fields["bare"].timestamp - 42.0).abs() < f64::EPSILON);
}

#[test]
fn glucose_reading_round_trips() {
    let profile = PatientProfile::example();
    let mut reading = GlucoseReading::classified(&profile, 182.5, 1_700_000_123);
    reading.trend = TrendDirection::Rising;
    reading.trend_rate_mgdl_min = 1.25;
    reading.sensor_battery_percent = 93.0;
    reading.signal_dbm = -48.0;

    let decoded = GlucoseReading::from_senml(&reading.to_senml().unwrap()).unwrap();
    assert_eq!(decoded, reading);
    assert_eq!(decoded.status, GlucoseStatus::High);
}

#[test]
fn insulin_command_round_trips() {
    let command = InsulinCommand {
        patient_id: "patient_001".into(),
        command_id: 42,
        delivery_mode: DeliveryMode::Correction,
        amount_u: 2.1,
        priority: Priority::High,
        reason: "hyperglycemia correction - glucose 260.0 mg/dL".into(),
        timestamp_s: 1_700_000_200,
    };

    let decoded = InsulinCommand::from_senml(&command.to_senml().unwrap()).unwrap();
    assert_eq!(decoded, command);
}

#[test]
fn command_missing_required_field_fails() {
    // A command without its id must not decode to a defaulted value.
    let payload = SenmlEncoder::new("urn:patient:p1:insulin:", 0.0)
        .base_unit("U")
        .number("dose", 1.0)
        .string("type", "bolus")
        .string("priority", "normal")
        .string("reason", "meal")
        .encode()
        .unwrap();

    match InsulinCommand::from_senml(&payload) {
        Err(ProtocolError::MissingField("command_id")) => {}
        other => panic!("expected MissingField(command_id), got {other:?}"),
    }
}

#[test]
fn command_for_wrong_channel_kind_fails() {
    let profile = PatientProfile::example();
    let reading = GlucoseReading::classified(&profile, 120.0, 0);
    let payload = reading.to_senml().unwrap();

    assert!(matches!(
        InsulinCommand::from_senml(&payload),
        Err(ProtocolError::WrongKind(_))
    ));
}

#[test]
fn pump_status_round_trips_with_alarms_and_last_bolus() {
    let report = PumpStatusReport {
        patient_id: "patient_001".into(),
        reservoir_u: 55.25,
        reservoir_capacity_u: 300.0,
        battery_percent: 12.0,
        status: PumpStatus::Active,
        basal_rate_u_per_h: 1.0,
        alarms: vec!["low_insulin".into(), "low_battery".into()],
        total_daily_insulin_u: 18.5,
        last_bolus: Some(LastBolus {
            amount_u: 2.1,
            timestamp_s: 1_699_999_100,
        }),
        timestamp_s: 1_700_000_000,
    };

    let decoded = PumpStatusReport::from_senml(&report.to_senml().unwrap()).unwrap();
    assert_eq!(decoded, report);
}

#[test]
fn pump_status_without_optional_fields_round_trips() {
    let report = PumpStatusReport {
        patient_id: "patient_001".into(),
        reservoir_u: 300.0,
        reservoir_capacity_u: 300.0,
        battery_percent: 100.0,
        status: PumpStatus::Active,
        basal_rate_u_per_h: 1.0,
        alarms: Vec::new(),
        total_daily_insulin_u: 0.0,
        last_bolus: None,
        timestamp_s: 10,
    };

    let decoded = PumpStatusReport::from_senml(&report.to_senml().unwrap()).unwrap();
    assert_eq!(decoded, report);
}

#[test]
fn alert_round_trips() {
    let alert = Alert::new(
        "patient_001",
        AlertLevel::EmergencyLow,
        "critical hypoglycemia: 42.0 mg/dL - administer glucose immediately".into(),
        1_700_000_500,
    );

    let decoded = Alert::from_senml(&alert.to_senml().unwrap()).unwrap();
    assert_eq!(decoded, alert);
    assert_eq!(decoded.severity, glucobus::protocol::Severity::Critical);
}
