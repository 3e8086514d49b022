//! # Glucobus
//!
//! A closed-loop diabetes-management network simulator: a glucose sensor
//! publishes readings, a decision engine turns them into insulin commands,
//! and a pump executes commands and reports state, all over an asynchronous
//! publish/subscribe bus speaking a compact SenML-style wire format.
//!
//! ## Features
//!
//! - **Safety-gated dosing**: target tracking, insulin-on-board
//!   compensation, hard rate limiting between corrections
//! - **Pump state machine**: reservoir/battery decay, alarm evaluation,
//!   command validation with explicit rejection reasons
//! - **SenML wire codec**: one record-list format shared by every channel
//! - **Topic contract**: per-patient namespaces with QoS and retained-message
//!   semantics
//! - **Bounded memory**: alarm sets, dedup windows and wire buffers are
//!   fixed-capacity
//!
//! ## Quick Start
//!
//! ```rust
//! use glucobus::profile::PatientProfile;
//! use glucobus::engine::{DecisionEngine, Decision};
//! use glucobus::protocol::GlucoseReading;
//!
//! let profile = PatientProfile::example();
//! let mut engine = DecisionEngine::new(profile);
//!
//! let reading = GlucoseReading::new("patient_001", 260.0, 1_000);
//! match engine.decide(&reading, 1_000) {
//!     Decision::Correction { command, .. } => println!("dose {} U", command.amount_u),
//!     other => println!("no dose: {:?}", other),
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`senml`] - SenML-style record-list wire codec
//! - [`protocol`] - typed message schemas and wire buffers
//! - [`profile`] - patient profile and glucose classification
//! - [`pump`] - insulin pump state machine and command execution
//! - [`iob`] - insulin-on-board ledger
//! - [`engine`] - dosing decision engine
//! - [`sensor`] - glucose sensor simulation model
//! - [`bus`] - topic contract and in-process pub/sub bus
//! - [`agent`] - async component tasks wired over the bus

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod agent;
pub mod bus;
pub mod config;
pub mod engine;
pub mod iob;
pub mod profile;
pub mod protocol;
pub mod pump;
pub mod senml;
pub mod sensor;

// Re-export main public types for convenience
pub use config::SystemConfig;
pub use engine::{Decision, DecisionEngine};
pub use profile::PatientProfile;
pub use protocol::{Alert, GlucoseReading, InsulinCommand, PumpStatusReport};
pub use pump::PumpController;
