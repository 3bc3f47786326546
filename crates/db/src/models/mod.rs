//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` struct matching the
//! database row and, where the API creates rows directly, a `Deserialize`
//! create DTO. Aggregate parts convert to `ontask-core` types in
//! [`crate::store`].

pub mod action;
pub mod column;
pub mod run_log;
pub mod scheduled_run;
pub mod view;
pub mod workflow;
