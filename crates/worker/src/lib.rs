//! Background execution of scheduled action runs.
//!
//! - [`config::WorkerConfig`]: polling and failure settings from the
//!   environment.
//! - [`scheduler::ScheduledRunner`]: claims due runs, executes them and
//!   stores their completion summaries.

pub mod config;
pub mod scheduler;

pub use config::WorkerConfig;
pub use scheduler::ScheduledRunner;
