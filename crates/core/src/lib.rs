//! OnTask personalization engine: typed tables, merges, formulas, actions
//! and their rendering. No I/O happens here apart from the pluggable
//! [`transport::ArtifactTransport`].

pub mod action;
pub mod cache;
pub mod column;
pub mod condition;
pub mod error;
pub mod export;
pub mod formula;
pub mod frame;
pub mod merge;
pub mod rubric;
pub mod run;
pub mod scheduling;
pub mod statistics;
pub mod survey;
pub mod template;
pub mod transport;
pub mod types;
pub mod value;
pub mod view;
pub mod workflow;
