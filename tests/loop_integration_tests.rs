use glucobus::agent::{unix_now_s, System};
use glucobus::config::SystemConfig;
use glucobus::profile::PatientProfile;
use glucobus::protocol::{
    Alert, AlertLevel, DeliveryMode, InsulinCommand, Priority, PumpStatusReport,
};
use glucobus::sensor::SimulationMode;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Tight timers so the loop closes within test time; zero mechanical
/// delivery delay.
fn fast_config() -> SystemConfig {
    SystemConfig {
        glucose_reading_interval_s: 1,
        pump_status_interval_s: 1,
        delivery_seconds_per_unit: 0.0,
        ..SystemConfig::default()
    }
}

fn command(id: u32, mode: DeliveryMode, amount_u: f64) -> InsulinCommand {
    InsulinCommand {
        patient_id: "patient_001".into(),
        command_id: id,
        delivery_mode: mode,
        amount_u,
        priority: Priority::High,
        reason: "integration test".into(),
        timestamp_s: unix_now_s(),
    }
}

#[tokio::test]
async fn closed_loop_corrects_hyperglycemia() {
    let system = System::spawn(
        PatientProfile::example(),
        fast_config(),
        320.0,
        SimulationMode::Hyperglycemia,
    )
    .await;

    // Within a few sampling periods the engine must have dosed the pump
    let mut delivered = 0.0;
    for _ in 0..8 {
        sleep(Duration::from_millis(500)).await;
        delivered = system.pump.lock().await.state().total_daily_insulin_u;
        if delivered > 0.0 {
            break;
        }
    }
    assert!(delivered > 0.0, "no insulin delivered for glucose 320");

    // The engine's own ledger reflects the issued correction
    let iob = system.engine.lock().await.iob(unix_now_s());
    assert!(iob > 0.0);

    // And the body model saw the bolus through the status channel
    let mut absorbed = 0.0;
    for _ in 0..8 {
        absorbed = system.sensor.lock().await.body_iob(unix_now_s());
        if absorbed > 0.0 {
            break;
        }
        sleep(Duration::from_millis(500)).await;
    }
    assert!(absorbed > 0.0, "bolus never reached the body model");

    timeout(Duration::from_secs(5), system.stop())
        .await
        .expect("shutdown timed out");
}

#[tokio::test]
async fn hypoglycemia_alerts_but_never_doses() {
    let system = System::spawn(
        PatientProfile::example(),
        fast_config(),
        40.0,
        SimulationMode::Hypoglycemia,
    )
    .await;

    let mut alerts = system.bus.subscribe(&system.topics.alert).await;
    let hypo_alert = timeout(Duration::from_secs(5), async {
        loop {
            let message = alerts.recv().await.expect("alert channel closed");
            if let Ok(alert) = Alert::from_senml(&message.payload) {
                if matches!(
                    alert.level,
                    AlertLevel::EmergencyLow | AlertLevel::WarningLow
                ) {
                    return alert;
                }
            }
        }
    })
    .await
    .expect("no hypoglycemia alert observed");

    assert!(hypo_alert.message.contains("hypoglycemia"));

    // Rule 1 is absolute: nothing was ever delivered
    let delivered = system.pump.lock().await.state().total_daily_insulin_u;
    assert!(delivered.abs() < f64::EPSILON);

    timeout(Duration::from_secs(5), system.stop())
        .await
        .expect("shutdown timed out");
}

#[tokio::test]
async fn duplicate_command_applies_once_and_alerts() {
    let system = System::spawn(
        PatientProfile::example(),
        fast_config(),
        100.0,
        SimulationMode::Normal,
    )
    .await;

    // Let the pump's command loop attach before publishing
    sleep(Duration::from_millis(500)).await;

    let cmd = command(99, DeliveryMode::Correction, 2.0);
    let payload = cmd.to_senml().unwrap();

    system
        .bus
        .publish(&system.topics.pump_command, payload.clone())
        .await;

    // Wait for the first application to land
    let mut delivered = 0.0;
    for _ in 0..10 {
        sleep(Duration::from_millis(300)).await;
        delivered = system.pump.lock().await.state().total_daily_insulin_u;
        if delivered > 0.0 {
            break;
        }
    }
    assert!((delivered - 2.0).abs() < 1e-9, "first delivery missing");

    // Redeliver the identical command; the pump must refuse it
    let mut alerts = system.bus.subscribe(&system.topics.alert).await;
    system
        .bus
        .publish(&system.topics.pump_command, payload)
        .await;

    let rejection = timeout(Duration::from_secs(5), async {
        loop {
            let message = alerts.recv().await.expect("alert channel closed");
            if let Ok(alert) = Alert::from_senml(&message.payload) {
                if alert.message.contains("rejected") {
                    return alert;
                }
            }
        }
    })
    .await
    .expect("no rejection alert observed");

    assert!(rejection.message.contains("duplicate"));
    let delivered = system.pump.lock().await.state().total_daily_insulin_u;
    assert!((delivered - 2.0).abs() < 1e-9, "duplicate was applied");

    timeout(Duration::from_secs(5), system.stop())
        .await
        .expect("shutdown timed out");
}

#[tokio::test]
async fn oversized_dose_is_rejected_with_alert() {
    let system = System::spawn(
        PatientProfile::example(),
        fast_config(),
        100.0,
        SimulationMode::Normal,
    )
    .await;

    sleep(Duration::from_millis(500)).await;
    let mut alerts = system.bus.subscribe(&system.topics.alert).await;

    let cmd = command(500, DeliveryMode::Bolus, 50.0);
    system
        .bus
        .publish(&system.topics.pump_command, cmd.to_senml().unwrap())
        .await;

    let rejection = timeout(Duration::from_secs(5), async {
        loop {
            let message = alerts.recv().await.expect("alert channel closed");
            if let Ok(alert) = Alert::from_senml(&message.payload) {
                if alert.message.contains("rejected") {
                    return alert;
                }
            }
        }
    })
    .await
    .expect("no rejection alert observed");

    assert_eq!(rejection.level, AlertLevel::Error);
    assert!(rejection.message.contains("exceeds"));

    let delivered = system.pump.lock().await.state().total_daily_insulin_u;
    assert!(delivered.abs() < f64::EPSILON);

    timeout(Duration::from_secs(5), system.stop())
        .await
        .expect("shutdown timed out");
}

#[tokio::test]
async fn late_subscriber_sees_retained_pump_status() {
    let system = System::spawn(
        PatientProfile::example(),
        fast_config(),
        100.0,
        SimulationMode::Normal,
    )
    .await;

    // Let at least one status cycle publish
    sleep(Duration::from_millis(2500)).await;

    let mut late = system.bus.subscribe(&system.topics.pump_status).await;
    let message = timeout(Duration::from_secs(2), late.recv())
        .await
        .expect("no retained status delivered")
        .unwrap();

    let report = PumpStatusReport::from_senml(&message.payload).unwrap();
    assert_eq!(report.patient_id, "patient_001");
    assert!(report.reservoir_u > 0.0);

    timeout(Duration::from_secs(5), system.stop())
        .await
        .expect("shutdown timed out");
}

#[tokio::test]
async fn malformed_wire_messages_do_not_kill_subscribers() {
    let system = System::spawn(
        PatientProfile::example(),
        fast_config(),
        100.0,
        SimulationMode::Normal,
    )
    .await;

    sleep(Duration::from_millis(500)).await;

    // Garbage on both inbound channels
    system
        .bus
        .publish(&system.topics.pump_command, "not senml".to_string())
        .await;
    system
        .bus
        .publish(&system.topics.glucose_data, "[]".to_string())
        .await;

    sleep(Duration::from_millis(500)).await;

    // The pump still executes a well-formed command afterwards
    let cmd = command(7, DeliveryMode::Correction, 1.0);
    system
        .bus
        .publish(&system.topics.pump_command, cmd.to_senml().unwrap())
        .await;

    let mut delivered = 0.0;
    for _ in 0..10 {
        sleep(Duration::from_millis(300)).await;
        delivered = system.pump.lock().await.state().total_daily_insulin_u;
        if delivered > 0.0 {
            break;
        }
    }
    assert!((delivered - 1.0).abs() < 1e-9);

    timeout(Duration::from_secs(5), system.stop())
        .await
        .expect("shutdown timed out");
}

#[tokio::test]
async fn patient_info_is_retained_at_startup() {
    let system = System::spawn(
        PatientProfile::example(),
        fast_config(),
        100.0,
        SimulationMode::Normal,
    )
    .await;

    let retained = system.bus.retained(&system.topics.patient_info).await;
    let message = retained.expect("patient info not retained");
    assert!(message.payload.contains("urn:patient:patient_001:info:"));

    timeout(Duration::from_secs(5), system.stop())
        .await
        .expect("shutdown timed out");
}
