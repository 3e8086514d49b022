use glucobus::agent::System;
use glucobus::profile::PatientProfile;
use glucobus::sensor::SimulationMode;
use glucobus::SystemConfig;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Positional arguments, all optional:
/// `glucobus-simulator [profile-path|-] [mode] [initial-glucose] [duration-s]`
///
/// A `-` profile path (or none) uses the built-in example patient; an
/// explicit path that fails to load is fatal. Duration `0` runs until
/// Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();

    let profile = match args.get(1).map(String::as_str) {
        None | Some("-") => PatientProfile::example(),
        Some(path) => match PatientProfile::load(Path::new(path)) {
            Ok(profile) => profile,
            Err(e) => {
                // No component may run with undefined thresholds.
                eprintln!("❌ failed to load patient profile: {e}");
                std::process::exit(1);
            }
        },
    };

    let mode = match args.get(2).map(String::as_str) {
        None => SimulationMode::Normal,
        Some(raw) => match SimulationMode::parse(raw) {
            Some(mode) => mode,
            None => {
                eprintln!("❌ unknown simulation mode: {raw}");
                std::process::exit(1);
            }
        },
    };

    let initial_glucose: f64 = match args.get(3) {
        None => 120.0,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("❌ invalid initial glucose: {raw}");
            std::process::exit(1);
        }),
    };

    let duration_s: u64 = match args.get(4) {
        None => 0,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("❌ invalid duration: {raw}");
            std::process::exit(1);
        }),
    };

    let config = SystemConfig::default();

    println!("🩸 Glucobus Closed-Loop Simulator");
    println!("=================================");
    println!("   Patient: {} ({})", profile.name, profile.patient_id);
    println!(
        "   Target range: {:.0}-{:.0} mg/dL",
        profile.target_glucose_min, profile.target_glucose_max
    );
    println!(
        "   Insulin sensitivity: {:.0} mg/dL per unit",
        profile.insulin_sensitivity_factor
    );
    println!("   Simulation mode: {}", mode.as_str());
    println!("   Initial glucose: {initial_glucose:.1} mg/dL");
    println!(
        "   Sampling every {}s, pump status every {}s",
        config.glucose_reading_interval_s, config.pump_status_interval_s
    );
    println!();

    let system = System::spawn(profile, config, initial_glucose, mode).await;
    info!("all components running on {}", system.topics.base);

    if duration_s > 0 {
        tokio::time::sleep(Duration::from_secs(duration_s)).await;
    } else {
        tokio::signal::ctrl_c().await?;
        println!();
    }

    info!("shutting down");
    system.stop().await;
    println!("🛑 Simulator stopped");

    Ok(())
}
