use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use glucobus::agent::unix_now_s;
use glucobus::bus::{PatientTopics, QosLevel};
use glucobus::engine::{Decision, DecisionEngine};
use glucobus::profile::PatientProfile;
use glucobus::protocol::GlucoseReading;
use std::path::Path;
use std::process::Command;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("glucobus")
        .version("0.1.0")
        .author("Connected Health Engineering Team")
        .about("🩸 Glucobus - Closed-loop diabetes-management network simulator")
        .arg(
            Arg::with_name("profile")
                .short("p")
                .long("profile")
                .value_name("PATH")
                .help("Patient profile JSON (defaults to the built-in example patient)")
                .takes_value(true)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("🚀 Run the closed-loop simulator")
                .arg(
                    Arg::with_name("mode")
                        .short("m")
                        .long("mode")
                        .value_name("MODE")
                        .help("Glucose simulation mode")
                        .takes_value(true)
                        .possible_values(&["normal", "hypoglycemia", "hyperglycemia", "fluctuating"])
                        .default_value("normal"),
                )
                .arg(
                    Arg::with_name("glucose")
                        .short("g")
                        .long("glucose")
                        .value_name("MGDL")
                        .help("Initial glucose value in mg/dL")
                        .takes_value(true)
                        .default_value("120"),
                )
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Run duration in seconds (default: until Ctrl+C)")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("check-config")
                .about("✅ Validate a patient profile file")
                .arg(
                    Arg::with_name("path")
                        .help("Path to the profile JSON")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("decide")
                .about("💉 Evaluate one glucose value against the dosing rules")
                .arg(
                    Arg::with_name("glucose")
                        .help("Glucose value in mg/dL")
                        .required(true)
                        .validator(|v| {
                            v.parse::<f64>()
                                .map(|_| ())
                                .map_err(|_| "glucose must be a number".into())
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("topics")
                .about("📡 Print the per-patient topic contract")
                .arg(
                    Arg::with_name("patient-id")
                        .long("patient-id")
                        .value_name("ID")
                        .takes_value(true)
                        .default_value("patient_001"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("run", Some(sub_matches)) => handle_run(&matches, sub_matches)?,
        ("check-config", Some(sub_matches)) => handle_check_config(sub_matches),
        ("decide", Some(sub_matches)) => handle_decide(&matches, sub_matches),
        ("topics", Some(sub_matches)) => handle_topics(sub_matches),
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Run the closed loop", "glucobus run".bright_cyan());
            println!("  {} Try the dosing rules", "glucobus decide 260".bright_cyan());
            println!("  {} Show the topic map", "glucobus topics".bright_cyan());
        }
    }

    Ok(())
}

fn load_profile(matches: &ArgMatches<'_>) -> PatientProfile {
    match matches.value_of("profile") {
        None => PatientProfile::example(),
        Some(path) => match PatientProfile::load(Path::new(path)) {
            Ok(profile) => profile,
            Err(e) => {
                eprintln!("{} {}", "❌".red(), format!("profile load failed: {e}").bright_red());
                std::process::exit(1);
            }
        },
    }
}

fn handle_run(
    matches: &ArgMatches<'_>,
    sub_matches: &ArgMatches<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile_arg = matches.value_of("profile").unwrap_or("-").to_string();
    let mode = sub_matches.value_of("mode").unwrap();
    let glucose = sub_matches.value_of("glucose").unwrap();
    let duration = sub_matches.value_of("duration").unwrap_or("0");

    println!("{}", "🚀 Starting closed-loop simulator...".bright_green().bold());

    let status = Command::new("cargo")
        .args([
            "run",
            "--bin",
            "glucobus-simulator",
            "--",
            profile_arg.as_str(),
            mode,
            glucose,
            duration,
        ])
        .status()?;

    if !status.success() {
        eprintln!("{} Simulator exited with {status}", "❌".red());
        std::process::exit(status.code().unwrap_or(1));
    }

    Ok(())
}

fn handle_check_config(sub_matches: &ArgMatches<'_>) {
    let path = sub_matches.value_of("path").unwrap();
    match PatientProfile::load(Path::new(path)) {
        Ok(profile) => {
            println!("{} {}", "✅".green(), "Profile is valid".bright_green());
            println!("{} {} ({})", "Patient:".bright_white(), profile.name, profile.patient_id);
            println!(
                "{} {:.0}-{:.0} mg/dL",
                "Target range:".bright_white(),
                profile.target_glucose_min,
                profile.target_glucose_max
            );
            println!(
                "{} hypo < {:.0}, critical < {:.0} / > {:.0} mg/dL",
                "Thresholds:".bright_white(),
                profile.hypoglycemia_threshold,
                profile.critical_low,
                profile.critical_high
            );
            println!(
                "{} {:.0} mg/dL per unit, basal {:.1} U/h",
                "Insulin:".bright_white(),
                profile.insulin_sensitivity_factor,
                profile.basal_rate_u_per_h
            );
        }
        Err(e) => {
            eprintln!("{} {}", "❌".red(), format!("{e}").bright_red());
            std::process::exit(1);
        }
    }
}

fn handle_decide(matches: &ArgMatches<'_>, sub_matches: &ArgMatches<'_>) {
    let glucose: f64 = sub_matches.value_of("glucose").unwrap().parse().unwrap();
    let profile = load_profile(matches);
    let now = unix_now_s();

    let reading = GlucoseReading::classified(&profile, glucose, now);
    let mut engine = DecisionEngine::new(profile);

    println!(
        "{} {:.1} mg/dL ({})",
        "Reading:".bright_white(),
        glucose,
        reading.status.as_str().bright_cyan()
    );

    match engine.decide(&reading, now) {
        Decision::NoAction => {
            println!("{} {}", "✅".green(), "Glucose in target range - no action".bright_green());
        }
        Decision::Hypoglycemia { alert } => {
            println!("{} {}", "🚨".red(), alert.message.bright_red());
            println!("{}", "No insulin is ever issued while hypoglycemic".dimmed());
        }
        Decision::IobSufficient { alert } | Decision::Waiting { alert } => {
            println!("{} {}", "⏳".yellow(), alert.message.bright_yellow());
        }
        Decision::Correction { command, alert } => {
            println!("{} {}", "💉".bright_blue(), alert.message.bright_white());
            println!(
                "{} {:.2}U ({}, priority {})",
                "Command:".bright_white(),
                command.amount_u,
                command.delivery_mode.as_str().bright_cyan(),
                command.priority.as_str().bright_cyan()
            );
        }
    }
}

fn handle_topics(sub_matches: &ArgMatches<'_>) {
    let patient_id = sub_matches.value_of("patient-id").unwrap();
    let topics = PatientTopics::new(patient_id);

    let qos = |level: QosLevel| match level {
        QosLevel::AtMostOnce => "at-most-once",
        QosLevel::AtLeastOnce => "at-least-once",
        QosLevel::ExactlyOnce => "exactly-once",
    };

    println!("{}", "📡 Topic contract".bright_blue().bold());
    println!("{}", "═════════════════".bright_blue());
    for (name, spec) in [
        ("glucose reading", &topics.glucose_data),
        ("pump command", &topics.pump_command),
        ("pump status", &topics.pump_status),
        ("alert", &topics.alert),
        ("patient info", &topics.patient_info),
    ] {
        let retained = if spec.retained { "retained".bright_green() } else { "live-only".dimmed() };
        println!(
            "{:<16} {} ({}, {})",
            name.bright_white(),
            spec.topic,
            qos(spec.qos).bright_cyan(),
            retained
        );
    }
}
