//! Async component tasks wired over the bus.
//!
//! Each active component runs as a pair of tokio tasks: one inbound
//! subscription loop and one periodic timer, sharing the component's
//! mutable state through a mutex held only for the smallest read-modify-
//! write sequence (tick-and-evaluate, execute-and-evaluate, record/evict).
//! Malformed wire messages are logged and dropped; a subscriber loop never
//! crashes. Shutdown is cooperative through a watch channel: timers stop
//! firing, in-flight publishes complete, tasks return.

use crate::bus::{MessageBus, PatientTopics, SubscriptionError};
use crate::config::SystemConfig;
use crate::engine::{Decision, DecisionEngine};
use crate::profile::PatientProfile;
use crate::protocol::{
    self, Alert, AlertLevel, GlucoseReading, InsulinCommand, ProtocolHandler, PumpStatusReport,
    Severity,
};
use crate::pump::PumpController;
use crate::sensor::{GlucoseSensor, SimulationMode};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Wall-clock seconds since the UNIX epoch.
pub fn unix_now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sender half of the cooperative shutdown signal.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half, cloned into every task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolve once shutdown has been triggered.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// The insulin pump component: executes commands from the engine and
/// reports state periodically on the retained status channel.
pub struct PumpAgent {
    bus: MessageBus,
    topics: PatientTopics,
    config: SystemConfig,
    patient_id: String,
    pump: Arc<Mutex<PumpController>>,
}

impl PumpAgent {
    pub fn new(
        bus: MessageBus,
        topics: PatientTopics,
        config: SystemConfig,
        profile: &PatientProfile,
    ) -> Self {
        let pump = PumpController::new(
            &config,
            300.0,
            300.0,
            100.0,
            profile.basal_rate_u_per_h,
        );
        Self {
            bus,
            topics,
            config,
            patient_id: profile.patient_id.clone(),
            pump: Arc::new(Mutex::new(pump)),
        }
    }

    pub fn controller(&self) -> Arc<Mutex<PumpController>> {
        Arc::clone(&self.pump)
    }

    pub fn spawn(self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let command_task = tokio::spawn(Self::command_loop(
            self.bus.clone(),
            self.topics.clone(),
            self.config.clone(),
            self.patient_id.clone(),
            Arc::clone(&self.pump),
            shutdown.clone(),
        ));
        let status_task = tokio::spawn(Self::status_loop(
            self.bus,
            self.topics,
            self.config,
            self.patient_id,
            self.pump,
            shutdown.clone(),
        ));
        vec![command_task, status_task]
    }

    async fn command_loop(
        bus: MessageBus,
        topics: PatientTopics,
        config: SystemConfig,
        patient_id: String,
        pump: Arc<Mutex<PumpController>>,
        mut shutdown: Shutdown,
    ) {
        let mut subscription = bus.subscribe(&topics.pump_command).await;
        let mut wire = ProtocolHandler::new();

        loop {
            let message = tokio::select! {
                _ = shutdown.wait() => break,
                received = subscription.recv() => match received {
                    Ok(message) => message,
                    Err(SubscriptionError::Lagged(n)) => {
                        warn!(dropped = n, "pump command subscriber lagged");
                        continue;
                    }
                    Err(SubscriptionError::Closed) => break,
                },
            };

            let command = match InsulinCommand::from_senml(&message.payload) {
                Ok(command) => command,
                Err(e) => {
                    warn!("dropping malformed command message: {e}");
                    continue;
                }
            };

            info!(
                command_id = command.command_id,
                mode = command.delivery_mode.as_str(),
                amount_u = command.amount_u,
                "command received"
            );

            // Simulated mechanical delivery time, capped so the status
            // timer is never starved.
            let delay_ms = (command.amount_u * config.delivery_seconds_per_unit * 1000.0) as u64;
            let delay_ms = delay_ms.min(config.delivery_delay_cap_ms);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let now = unix_now_s();
            let outcome = {
                let mut pump = pump.lock().await;
                let outcome = pump.execute(&command, now);
                match outcome {
                    Ok(_) => Ok(pump.status_report(&patient_id, now)),
                    Err(reason) => Err(reason),
                }
            };

            match outcome {
                Ok(report) => {
                    info!(command_id = command.command_id, "command executed");
                    publish_status(&bus, &topics, &mut wire, &report).await;
                }
                Err(reason) => {
                    warn!(command_id = command.command_id, "command rejected: {reason}");
                    let alert = Alert::new(
                        &patient_id,
                        AlertLevel::Error,
                        format!("command {} rejected: {reason}", command.command_id),
                        now,
                    );
                    publish_alert(&bus, &topics, &mut wire, &alert).await;
                }
            }
        }
    }

    async fn status_loop(
        bus: MessageBus,
        topics: PatientTopics,
        config: SystemConfig,
        patient_id: String,
        pump: Arc<Mutex<PumpController>>,
        mut shutdown: Shutdown,
    ) {
        let mut wire = ProtocolHandler::new();
        let period = Duration::from_secs(config.pump_status_interval_s);
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {}
            }

            let now = unix_now_s();
            let (report, critical_alarms) = {
                let mut pump = pump.lock().await;
                pump.tick(config.pump_status_interval_s as f64);
                let report = pump.status_report(&patient_id, now);
                (report, pump.has_critical_alarms())
            };

            if critical_alarms {
                for alarm in &report.alarms {
                    let alert = Alert::new(
                        &patient_id,
                        AlertLevel::Emergency,
                        format!("critical pump alarm: {alarm}"),
                        now,
                    );
                    publish_alert(&bus, &topics, &mut wire, &alert).await;
                }
            }

            publish_status(&bus, &topics, &mut wire, &report).await;
        }
    }
}

/// The decision engine component: consumes glucose readings and pump
/// status, issues commands and notifications.
pub struct EngineAgent {
    bus: MessageBus,
    topics: PatientTopics,
    engine: Arc<Mutex<DecisionEngine>>,
}

impl EngineAgent {
    pub fn new(
        bus: MessageBus,
        topics: PatientTopics,
        config: SystemConfig,
        profile: PatientProfile,
    ) -> Self {
        let engine = DecisionEngine::with_config(profile, &config);
        Self {
            bus,
            topics,
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn engine(&self) -> Arc<Mutex<DecisionEngine>> {
        Arc::clone(&self.engine)
    }

    pub fn spawn(self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let glucose_task = tokio::spawn(Self::glucose_loop(
            self.bus.clone(),
            self.topics.clone(),
            Arc::clone(&self.engine),
            shutdown.clone(),
        ));
        let status_task = tokio::spawn(Self::status_loop(
            self.bus,
            self.topics,
            self.engine,
            shutdown.clone(),
        ));
        vec![glucose_task, status_task]
    }

    async fn glucose_loop(
        bus: MessageBus,
        topics: PatientTopics,
        engine: Arc<Mutex<DecisionEngine>>,
        mut shutdown: Shutdown,
    ) {
        let mut subscription = bus.subscribe(&topics.glucose_data).await;
        let mut wire = ProtocolHandler::new();

        loop {
            let message = tokio::select! {
                _ = shutdown.wait() => break,
                received = subscription.recv() => match received {
                    Ok(message) => message,
                    Err(SubscriptionError::Lagged(n)) => {
                        warn!(dropped = n, "glucose subscriber lagged");
                        continue;
                    }
                    Err(SubscriptionError::Closed) => break,
                },
            };

            let reading = match GlucoseReading::from_senml(&message.payload) {
                Ok(reading) => reading,
                Err(e) => {
                    warn!("dropping malformed glucose message: {e}");
                    continue;
                }
            };

            let now = unix_now_s();
            let decision = {
                let mut engine = engine.lock().await;
                engine.decide(&reading, now)
            };

            match decision {
                Decision::NoAction => {
                    info!(
                        glucose = reading.glucose_mgdl,
                        "glucose in target range, no action"
                    );
                }
                Decision::Hypoglycemia { alert }
                | Decision::IobSufficient { alert }
                | Decision::Waiting { alert } => {
                    info!(glucose = reading.glucose_mgdl, "{}", alert.message);
                    publish_alert(&bus, &topics, &mut wire, &alert).await;
                }
                Decision::Correction { command, alert } => {
                    info!(
                        command_id = command.command_id,
                        dose_u = command.amount_u,
                        "issuing correction"
                    );
                    match wire.encode_command(&command) {
                        Ok(payload) => {
                            let payload = payload.to_string();
                            bus.publish(&topics.pump_command, payload).await;
                        }
                        Err(e) => error!("failed to encode command: {e}"),
                    }
                    publish_alert(&bus, &topics, &mut wire, &alert).await;
                }
            }
        }
    }

    async fn status_loop(
        bus: MessageBus,
        topics: PatientTopics,
        engine: Arc<Mutex<DecisionEngine>>,
        mut shutdown: Shutdown,
    ) {
        let mut subscription = bus.subscribe(&topics.pump_status).await;
        let mut wire = ProtocolHandler::new();

        loop {
            let message = tokio::select! {
                _ = shutdown.wait() => break,
                received = subscription.recv() => match received {
                    Ok(message) => message,
                    Err(SubscriptionError::Lagged(n)) => {
                        warn!(dropped = n, "pump status subscriber lagged");
                        continue;
                    }
                    Err(SubscriptionError::Closed) => break,
                },
            };

            let report = match PumpStatusReport::from_senml(&message.payload) {
                Ok(report) => report,
                Err(e) => {
                    warn!("dropping malformed status message: {e}");
                    continue;
                }
            };

            let now = unix_now_s();
            let alerts = {
                let engine = engine.lock().await;
                engine.review_pump_status(&report, now)
            };
            for alert in alerts {
                publish_alert(&bus, &topics, &mut wire, &alert).await;
            }
        }
    }
}

/// The glucose sensor component: publishes readings on a timer and couples
/// executed boluses back into its body model.
pub struct SensorAgent {
    bus: MessageBus,
    topics: PatientTopics,
    config: SystemConfig,
    sensor: Arc<Mutex<GlucoseSensor>>,
}

impl SensorAgent {
    pub fn new(
        bus: MessageBus,
        topics: PatientTopics,
        config: SystemConfig,
        profile: PatientProfile,
        initial_glucose_mgdl: f64,
        mode: SimulationMode,
    ) -> Self {
        let sensor = GlucoseSensor::new(profile, &config, initial_glucose_mgdl, mode);
        Self {
            bus,
            topics,
            config,
            sensor: Arc::new(Mutex::new(sensor)),
        }
    }

    pub fn sensor(&self) -> Arc<Mutex<GlucoseSensor>> {
        Arc::clone(&self.sensor)
    }

    pub fn spawn(self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let sampling_task = tokio::spawn(Self::sampling_loop(
            self.bus.clone(),
            self.topics.clone(),
            self.config,
            Arc::clone(&self.sensor),
            shutdown.clone(),
        ));
        let absorption_task = tokio::spawn(Self::absorption_loop(
            self.bus,
            self.topics,
            self.sensor,
            shutdown.clone(),
        ));
        vec![sampling_task, absorption_task]
    }

    async fn sampling_loop(
        bus: MessageBus,
        topics: PatientTopics,
        config: SystemConfig,
        sensor: Arc<Mutex<GlucoseSensor>>,
        mut shutdown: Shutdown,
    ) {
        let mut wire = ProtocolHandler::new();
        let period = Duration::from_secs(config.glucose_reading_interval_s);
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {}
            }

            let now = unix_now_s();
            let reading = {
                let mut sensor = sensor.lock().await;
                sensor.sample(now)
            };

            info!(
                glucose = reading.glucose_mgdl,
                status = reading.status.as_str(),
                trend = reading.trend.as_str(),
                "glucose reading"
            );

            match wire.encode_reading(&reading) {
                Ok(payload) => {
                    let payload = payload.to_string();
                    bus.publish(&topics.glucose_data, payload).await;
                }
                Err(e) => error!("failed to encode reading: {e}"),
            }
        }
    }

    /// Watch the pump status channel for newly delivered boluses and feed
    /// them into the body model. The sensor models the body, so it reacts
    /// to what the pump actually delivered, not to what was commanded.
    async fn absorption_loop(
        bus: MessageBus,
        topics: PatientTopics,
        sensor: Arc<Mutex<GlucoseSensor>>,
        mut shutdown: Shutdown,
    ) {
        let mut subscription = bus.subscribe(&topics.pump_status).await;
        let mut last_seen_bolus_s: Option<u64> = None;

        loop {
            let message = tokio::select! {
                _ = shutdown.wait() => break,
                received = subscription.recv() => match received {
                    Ok(message) => message,
                    Err(SubscriptionError::Lagged(n)) => {
                        warn!(dropped = n, "absorption subscriber lagged");
                        continue;
                    }
                    Err(SubscriptionError::Closed) => break,
                },
            };

            let report = match PumpStatusReport::from_senml(&message.payload) {
                Ok(report) => report,
                Err(e) => {
                    warn!("dropping malformed status message: {e}");
                    continue;
                }
            };

            if let Some(bolus) = report.last_bolus {
                if last_seen_bolus_s != Some(bolus.timestamp_s) {
                    last_seen_bolus_s = Some(bolus.timestamp_s);
                    let mut sensor = sensor.lock().await;
                    sensor.absorb_dose(bolus.amount_u, bolus.timestamp_s);
                }
            }
        }
    }
}

/// Passive subscriber that logs every alert on the notification channel.
pub struct NotificationAgent {
    bus: MessageBus,
    topics: PatientTopics,
}

impl NotificationAgent {
    pub fn new(bus: MessageBus, topics: PatientTopics) -> Self {
        Self { bus, topics }
    }

    pub fn spawn(self, shutdown: &Shutdown) -> JoinHandle<()> {
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut subscription = self.bus.subscribe(&self.topics.alert).await;
            loop {
                let message = tokio::select! {
                    _ = shutdown.wait() => break,
                    received = subscription.recv() => match received {
                        Ok(message) => message,
                        Err(SubscriptionError::Lagged(n)) => {
                            warn!(dropped = n, "alert subscriber lagged");
                            continue;
                        }
                        Err(SubscriptionError::Closed) => break,
                    },
                };

                match Alert::from_senml(&message.payload) {
                    Ok(alert) => match alert.severity {
                        Severity::Low => info!(
                            level = alert.level.as_str(),
                            "notification: {}", alert.message
                        ),
                        Severity::Medium => warn!(
                            level = alert.level.as_str(),
                            "notification: {}", alert.message
                        ),
                        Severity::High | Severity::Critical => error!(
                            level = alert.level.as_str(),
                            "notification: {}", alert.message
                        ),
                    },
                    Err(e) => warn!("dropping malformed alert message: {e}"),
                }
            }
        })
    }
}

async fn publish_status(
    bus: &MessageBus,
    topics: &PatientTopics,
    wire: &mut ProtocolHandler,
    report: &PumpStatusReport,
) {
    match wire.encode_status(report) {
        Ok(payload) => {
            let payload = payload.to_string();
            bus.publish(&topics.pump_status, payload).await;
        }
        Err(e) => error!("failed to encode pump status: {e}"),
    }
}

async fn publish_alert(
    bus: &MessageBus,
    topics: &PatientTopics,
    wire: &mut ProtocolHandler,
    alert: &Alert,
) {
    match wire.encode_alert(alert) {
        Ok(payload) => {
            let payload = payload.to_string();
            bus.publish(&topics.alert, payload).await;
        }
        Err(e) => error!("failed to encode alert: {e}"),
    }
}

/// A fully wired closed loop: sensor, engine, pump and notification logger
/// over one bus, with shared handles for inspection.
pub struct System {
    pub bus: MessageBus,
    pub topics: PatientTopics,
    pub pump: Arc<Mutex<PumpController>>,
    pub engine: Arc<Mutex<DecisionEngine>>,
    pub sensor: Arc<Mutex<GlucoseSensor>>,
    pub shutdown: ShutdownHandle,
    pub tasks: Vec<JoinHandle<()>>,
}

impl System {
    /// Wire and start every component; publishes the retained patient info
    /// before any task runs.
    pub async fn spawn(
        profile: PatientProfile,
        config: SystemConfig,
        initial_glucose_mgdl: f64,
        mode: SimulationMode,
    ) -> Self {
        let bus = MessageBus::new();
        let topics = PatientTopics::new(&profile.patient_id);
        let (shutdown_handle, shutdown) = shutdown_channel();

        if let Ok(info) = protocol::patient_info_to_senml(&profile, unix_now_s()) {
            bus.publish(&topics.patient_info, info).await;
        }

        let pump_agent = PumpAgent::new(bus.clone(), topics.clone(), config.clone(), &profile);
        let engine_agent = EngineAgent::new(
            bus.clone(),
            topics.clone(),
            config.clone(),
            profile.clone(),
        );
        let sensor_agent = SensorAgent::new(
            bus.clone(),
            topics.clone(),
            config.clone(),
            profile,
            initial_glucose_mgdl,
            mode,
        );
        let notification_agent = NotificationAgent::new(bus.clone(), topics.clone());

        let pump = pump_agent.controller();
        let engine = engine_agent.engine();
        let sensor = sensor_agent.sensor();

        let mut tasks = Vec::new();
        tasks.extend(pump_agent.spawn(&shutdown));
        tasks.extend(engine_agent.spawn(&shutdown));
        tasks.extend(sensor_agent.spawn(&shutdown));
        tasks.push(notification_agent.spawn(&shutdown));

        Self {
            bus,
            topics,
            pump,
            engine,
            sensor,
            shutdown: shutdown_handle,
            tasks,
        }
    }

    /// Cooperative shutdown: stop timers, let in-flight publishes finish,
    /// wait for every task to return.
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
