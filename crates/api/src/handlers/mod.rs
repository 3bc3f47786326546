pub mod action;
pub mod column;
pub mod condition;
pub mod run_log;
pub mod scheduled_run;
pub mod survey;
pub mod table;
pub mod view;
pub mod workflow;

use ontask_core::error::CoreError;
use ontask_core::formula::Formula;
use ontask_core::frame::{FrameColumn, Record, TypedFrame};
use ontask_core::types::TimeZone;
use ontask_core::value::Value;
use ontask_core::workflow::Workflow;
use serde::{Deserialize, Deserializer, Serialize};

/// A table as returned by the API: typed column list plus JSON records.
#[derive(Debug, Serialize)]
pub struct FrameResponse {
    pub columns: Vec<FrameColumn>,
    pub rows: Vec<Record>,
}

impl From<&TypedFrame> for FrameResponse {
    fn from(frame: &TypedFrame) -> Self {
        Self {
            columns: frame.columns().to_vec(),
            rows: frame.to_records(),
        }
    }
}

/// Distinguish an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH-style bodies.
pub(crate) fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub(crate) fn parse_formula(json: &serde_json::Value, tz: &TimeZone) -> Result<Formula, CoreError> {
    Formula::from_json_in(json, tz)
}

/// Parse the text of a key value with the type of column `key`.
pub(crate) fn key_value(workflow: &Workflow, key: &str, raw: &str) -> Result<Value, CoreError> {
    let column = workflow.column(key)?;
    Value::parse_as(raw, column.data_type, &workflow.time_zone)
}

/// Value of the workflow's first key column.
pub(crate) fn primary_key_value(workflow: &Workflow, raw: &str) -> Result<Value, CoreError> {
    let key = workflow
        .key_columns()
        .min_by_key(|c| c.position)
        .ok_or_else(|| CoreError::KeyColumnConstraintViolation("The workflow has no key column".into()))?;
    Value::parse_as(raw, key.data_type, &workflow.time_zone)
}
