use glucobus::config::SystemConfig;
use glucobus::engine::{Decision, DecisionEngine};
use glucobus::iob::{ActiveDose, IobTracker};
use glucobus::profile::PatientProfile;
use glucobus::protocol::{AlertLevel, DeliveryMode, GlucoseReading, Priority};

fn reading(profile: &PatientProfile, glucose: f64, at: u64) -> GlucoseReading {
    GlucoseReading::classified(profile, glucose, at)
}

/// Profile from the reference scenario: target 70-140, ISF 50.
fn scenario_profile() -> PatientProfile {
    let mut profile = PatientProfile::example();
    profile.critical_high = 300.0;
    profile
}

#[test]
fn correction_nets_out_insulin_on_board() {
    // glucose 260 => target 105, needed (260-105)/50 = 3.1; with 1.0U on
    // board the issued dose is 2.1U at high priority.
    let profile = scenario_profile();
    let config = SystemConfig::default();
    let mut engine = DecisionEngine::with_config(profile.clone(), &config);

    // Seed exactly 1.0U of IOB: a 2.0U dose at its half-life
    let half_life = config.insulin_action_duration_s / 2;
    let first = reading(&profile, 205.0, 0);
    match engine.decide(&first, 0) {
        Decision::Correction { command, .. } => {
            assert!((command.amount_u - 2.0).abs() < 1e-9);
        }
        other => panic!("expected correction, got {other:?}"),
    }
    assert!((engine.iob(half_life) - 1.0).abs() < 1e-9);

    let second = reading(&profile, 260.0, half_life);
    match engine.decide(&second, half_life) {
        Decision::Correction { command, alert } => {
            assert!((command.amount_u - 2.1).abs() < 1e-9);
            assert_eq!(command.delivery_mode, DeliveryMode::Correction);
            assert_eq!(command.priority, Priority::High);
            assert_eq!(alert.level, AlertLevel::WarningHigh);
        }
        other => panic!("expected correction, got {other:?}"),
    }
}

#[test]
fn repeat_reading_within_interval_yields_waiting_alert() {
    let profile = scenario_profile();
    let mut engine = DecisionEngine::new(profile.clone());

    let first = reading(&profile, 260.0, 1_000);
    assert!(matches!(
        engine.decide(&first, 1_000),
        Decision::Correction { .. }
    ));

    // Same reading 10 seconds later: the 180s gate has not elapsed
    let second = reading(&profile, 260.0, 1_010);
    match engine.decide(&second, 1_010) {
        Decision::Waiting { alert } => {
            assert_eq!(alert.level, AlertLevel::Info);
            assert!(alert.message.contains("waiting"));
        }
        other => panic!("expected waiting alert, got {other:?}"),
    }
}

#[test]
fn hypoglycemia_never_issues_insulin() {
    let profile = PatientProfile::example();
    let mut engine = DecisionEngine::new(profile.clone());

    // Even with zero IOB and no rate-limit pressure, across the whole
    // hypoglycemic range no command is ever produced.
    let mut t = 0;
    for glucose in [59.9, 55.0, 50.0, 45.0, 40.0, 32.0] {
        t += 1_000;
        let decision = engine.decide(&reading(&profile, glucose, t), t);
        match decision {
            Decision::Hypoglycemia { alert } => {
                if glucose < profile.critical_low {
                    assert_eq!(alert.level, AlertLevel::EmergencyLow);
                } else {
                    assert_eq!(alert.level, AlertLevel::WarningLow);
                }
            }
            other => panic!("glucose {glucose} produced {other:?}"),
        }
    }
    assert!(engine.iob(t).abs() < f64::EPSILON);
}

#[test]
fn rate_limit_is_a_hard_gate() {
    let profile = scenario_profile();
    let config = SystemConfig::default();
    let interval = config.min_correction_interval_s;
    let mut engine = DecisionEngine::with_config(profile.clone(), &config);

    let mut correction_times = Vec::new();
    // Persistent severe hyperglycemia sampled every 10 seconds
    for i in 0..((interval * 4) / 10) {
        let now = i * 10;
        let r = reading(&profile, 400.0, now);
        if let Decision::Correction { .. } = engine.decide(&r, now) {
            correction_times.push(now);
        }
    }

    assert!(correction_times.len() >= 2, "expected repeated corrections");
    for pair in correction_times.windows(2) {
        assert!(
            pair[1] - pair[0] >= interval,
            "corrections at {} and {} violate the {}s gate",
            pair[0],
            pair[1],
            interval
        );
    }
}

#[test]
fn issued_dose_never_exceeds_max_bolus() {
    let profile = scenario_profile();
    let config = SystemConfig::default();
    let mut engine = DecisionEngine::with_config(profile.clone(), &config);

    // needed = (500 - 105) / 50 = 7.9U with default ISF; use a sharper ISF
    // to overshoot the clamp instead
    let mut sharp = scenario_profile();
    sharp.insulin_sensitivity_factor = 10.0;
    let mut sharp_engine = DecisionEngine::with_config(sharp.clone(), &config);

    match sharp_engine.decide(&reading(&sharp, 400.0, 0), 0) {
        Decision::Correction { command, .. } => {
            // (400 - 105) / 10 = 29.5 computed, clamped to 15
            assert!((command.amount_u - config.max_bolus_u).abs() < f64::EPSILON);
        }
        other => panic!("expected correction, got {other:?}"),
    }

    match engine.decide(&reading(&profile, 400.0, 0), 0) {
        Decision::Correction { command, .. } => {
            assert!(command.amount_u <= config.max_bolus_u);
        }
        other => panic!("expected correction, got {other:?}"),
    }
}

#[test]
fn sufficient_iob_suppresses_correction() {
    let profile = scenario_profile();
    let config = SystemConfig::default();
    let mut engine = DecisionEngine::with_config(profile.clone(), &config);

    // First correction covers the excursion entirely
    let first = reading(&profile, 260.0, 0);
    let issued = match engine.decide(&first, 0) {
        Decision::Correction { command, .. } => command.amount_u,
        other => panic!("expected correction, got {other:?}"),
    };
    assert!((issued - 3.1).abs() < 1e-9);

    // Shortly after the gate expires, glucose has barely moved: IOB still
    // covers the needed dose, so only an informational alert is raised.
    let later = config.min_correction_interval_s + 10;
    match engine.decide(&reading(&profile, 250.0, later), later) {
        Decision::IobSufficient { alert } => {
            assert_eq!(alert.level, AlertLevel::Info);
            assert!(alert.message.contains("on board"));
        }
        other => panic!("expected IOB-sufficient alert, got {other:?}"),
    }
}

#[test]
fn severity_escalates_above_critical_high() {
    let profile = scenario_profile();
    let mut engine = DecisionEngine::new(profile.clone());

    match engine.decide(&reading(&profile, 320.0, 0), 0) {
        Decision::Correction { command, alert } => {
            assert_eq!(alert.level, AlertLevel::EmergencyHigh);
            assert_eq!(command.priority, Priority::Emergency);
        }
        other => panic!("expected correction, got {other:?}"),
    }
}

#[test]
fn in_range_reading_produces_no_action() {
    let profile = PatientProfile::example();
    let mut engine = DecisionEngine::new(profile.clone());

    for glucose in [70.0, 100.0, 125.0, 140.0] {
        assert_eq!(
            engine.decide(&reading(&profile, glucose, 0), 0),
            Decision::NoAction
        );
    }
}

#[test]
fn iob_decays_monotonically_for_single_dose() {
    let tracker = {
        let mut t = IobTracker::new(50.0, 3600, 30.0);
        t.record(ActiveDose {
            amount_u: 5.0,
            start_time_s: 0,
        });
        t
    };

    let mut previous = f64::INFINITY;
    for now in (0..=3600).step_by(300) {
        let iob = tracker.iob(now);
        assert!(iob <= previous, "iob increased at t={now}");
        assert!(iob >= 0.0);
        previous = iob;
    }
    assert!(tracker.iob(3600).abs() < f64::EPSILON);
    assert!((tracker.iob(0) - 5.0).abs() < f64::EPSILON);
}

#[test]
fn pump_status_review_raises_alarm_notifications() {
    use glucobus::protocol::PumpStatusReport;
    use glucobus::pump::PumpStatus;

    let profile = PatientProfile::example();
    let engine = DecisionEngine::new(profile);

    let report = PumpStatusReport {
        patient_id: "patient_001".into(),
        reservoir_u: 30.0,
        reservoir_capacity_u: 300.0,
        battery_percent: 12.0,
        status: PumpStatus::Active,
        basal_rate_u_per_h: 1.0,
        alarms: vec!["low_insulin".into(), "low_battery".into()],
        total_daily_insulin_u: 0.0,
        last_bolus: None,
        timestamp_s: 50,
    };

    let alerts = engine.review_pump_status(&report, 50);
    assert_eq!(alerts.len(), 2);
    assert!(alerts.iter().all(|a| a.level == AlertLevel::Warning));
    assert!(alerts.iter().any(|a| a.message.contains("insulin")));
    assert!(alerts.iter().any(|a| a.message.contains("battery")));
}
