//! NetPulse Backend Library
//!
//! Measurement-and-alerting core for endpoint reachability monitoring:
//! probe orchestration, latency/loss/jitter statistics, retransmission
//! flow detection, threshold evaluation, interval scheduling and the
//! SQLite result store. Presentation and report generation live outside
//! this crate and consume the event stream and query interfaces.

pub mod alerts;
pub mod capture;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod probe;
pub mod scheduler;
pub mod store;

// Re-export the types external consumers wire against.
pub use models::{AlertThresholds, MeasurementRecord, TargetEvent};
pub use orchestrator::{ProbeOrchestrator, RunMode, Target};
pub use scheduler::JobScheduler;
pub use store::ResultStore;
