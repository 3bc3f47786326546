//! Column metadata.

use serde::Serialize;
use serde_json::json;

use crate::error::CoreError;
use crate::formula::Operator;
use crate::frame::FrameColumn;
use crate::types::{Timestamp, TimeZone};
use crate::value::{Cell, DataType, Value};

/// PostgreSQL identifier limit.
pub const MAX_COLUMN_NAME_BYTES: usize = 63;

/// Prefix reserved for internal columns of the backing table.
pub const RESERVED_PREFIX: &str = "__ontask";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub description_text: String,
    pub data_type: DataType,
    pub is_key: bool,
    /// 1-based, dense.
    pub position: i32,
    /// Admissible values; empty means unconstrained.
    pub categories: Vec<Value>,
    pub active_from: Option<Timestamp>,
    pub active_to: Option<Timestamp>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType, position: i32) -> Self {
        Self {
            name: name.into(),
            description_text: String::new(),
            data_type,
            is_key: false,
            position,
            categories: Vec::new(),
            active_from: None,
            active_to: None,
        }
    }

    pub fn frame_column(&self) -> FrameColumn {
        FrameColumn::new(self.name.clone(), self.data_type)
    }

    /// Whether the column is masked outside a time window.
    pub fn is_windowed(&self) -> bool {
        self.active_from.is_some() || self.active_to.is_some()
    }

    /// Whether values of this column are visible at `now`.
    pub fn is_active_at(&self, now: Timestamp) -> bool {
        self.active_from.map_or(true, |from| from <= now)
            && self.active_to.map_or(true, |to| now <= to)
    }

    pub fn validate_name(name: &str) -> Result<(), CoreError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation("Column name cannot be empty".into()));
        }
        if trimmed != name {
            return Err(CoreError::Validation(
                "Column name cannot start or end with spaces".into(),
            ));
        }
        if name.len() > MAX_COLUMN_NAME_BYTES {
            return Err(CoreError::Validation(format!(
                "Column name '{name}' is longer than {MAX_COLUMN_NAME_BYTES} bytes"
            )));
        }
        if name.to_ascii_lowercase().starts_with(RESERVED_PREFIX) {
            return Err(CoreError::Validation(format!(
                "Column names cannot start with '{RESERVED_PREFIX}'"
            )));
        }
        Ok(())
    }

    /// Replace the category set. Categories must be distinct values of the
    /// column's type.
    pub fn set_categories(&mut self, categories: Vec<Value>) -> Result<(), CoreError> {
        let mut converted: Vec<Value> = Vec::with_capacity(categories.len());
        for category in categories {
            let found = category.data_type();
            let value = category.coerce_to(self.data_type).ok_or_else(|| {
                CoreError::TypeMismatch(format!(
                    "Category of type {found} does not fit {} column '{}'",
                    self.data_type, self.name
                ))
            })?;
            if converted.iter().any(|c| c.same_as(&value)) {
                return Err(CoreError::Validation(format!(
                    "Repeated category {} in column '{}'",
                    value.to_json(),
                    self.name
                )));
            }
            converted.push(value);
        }
        self.categories = converted;
        Ok(())
    }

    /// Category membership of a non-null value.
    pub fn validate_value(&self, cell: &Cell) -> Result<(), CoreError> {
        let Some(value) = cell else {
            return Ok(());
        };
        if self.categories.is_empty() || self.categories.iter().any(|c| c.same_as(value)) {
            return Ok(());
        }
        Err(CoreError::CategoryViolation {
            column: self.name.clone(),
            value: value.render(&crate::types::utc()),
        })
    }

    /// QueryBuilder filter definition for this column.
    pub fn query_builder_operand(&self, tz: &TimeZone) -> serde_json::Value {
        let operators: Vec<String> = Operator::for_type(self.data_type)
            .into_iter()
            .flat_map(|op| {
                let mut names = vec![op.as_str().to_string()];
                if self.data_type == DataType::String && op.accepts_insensitive() {
                    names.push(format!("{}{}", op.as_str(), crate::formula::ast::INSENSITIVE_SUFFIX));
                }
                names
            })
            .collect();

        let mut operand = json!({
            "id": self.name,
            "field": self.name,
            "label": self.name,
            "type": self.data_type.as_str(),
            "input": self.data_type.input_widget(),
            "operators": operators,
        });
        if self.data_type == DataType::Boolean {
            operand["values"] = json!({"true": "True", "false": "False"});
        } else if !self.categories.is_empty() {
            operand["input"] = json!("select");
            operand["values"] = self
                .categories
                .iter()
                .map(|c| c.render(tz))
                .collect::<Vec<_>>()
                .into();
        }
        operand
    }
}

/// QueryBuilder operand list for a column set, in position order.
pub fn build_query_builder_ops(columns: &[Column], tz: &TimeZone) -> serde_json::Value {
    let mut sorted: Vec<&Column> = columns.iter().collect();
    sorted.sort_by_key(|c| c.position);
    serde_json::Value::Array(sorted.iter().map(|c| c.query_builder_operand(tz)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::utc;
    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};

    #[test]
    fn name_rules() {
        assert!(Column::validate_name("score").is_ok());
        assert!(Column::validate_name("first name").is_ok());
        assert_matches!(Column::validate_name(""), Err(CoreError::Validation(_)));
        assert_matches!(Column::validate_name(" x"), Err(CoreError::Validation(_)));
        assert_matches!(
            Column::validate_name("__ontask_row_id"),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            Column::validate_name(&"x".repeat(64)),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn active_window_bounds_are_inclusive() {
        let now = Utc::now();
        let mut column = Column::new("q1", DataType::String, 1);
        assert!(column.is_active_at(now));
        column.active_from = Some(now + Duration::hours(1));
        assert!(!column.is_active_at(now));
        column.active_from = Some(now);
        column.active_to = Some(now);
        assert!(column.is_active_at(now));
    }

    #[test]
    fn categories_constrain_values() {
        let mut column = Column::new("grade", DataType::String, 1);
        column
            .set_categories(vec![Value::String("A".into()), Value::String("B".into())])
            .unwrap();
        assert!(column.validate_value(&Some(Value::String("A".into()))).is_ok());
        assert!(column.validate_value(&None).is_ok());
        assert_matches!(
            column.validate_value(&Some(Value::String("C".into()))),
            Err(CoreError::CategoryViolation { .. })
        );
        assert_matches!(
            column.set_categories(vec![Value::Integer(1)]),
            Err(CoreError::TypeMismatch(_))
        );
        assert_matches!(
            column.set_categories(vec![Value::String("A".into()), Value::String("A".into())]),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn operand_lists_insensitive_variants_for_strings() {
        let column = Column::new("name", DataType::String, 1);
        let operand = column.query_builder_operand(&utc());
        let operators = operand["operators"].as_array().unwrap();
        assert!(operators.iter().any(|o| o == "contains_insensitive"));
        assert!(!operators.iter().any(|o| o == "is_null_insensitive"));
    }

    #[test]
    fn categorical_operand_uses_select() {
        let mut column = Column::new("level", DataType::Integer, 2);
        column.set_categories(vec![Value::Integer(1), Value::Integer(2)]).unwrap();
        let ops = build_query_builder_ops(&[column], &utc());
        assert_eq!(ops[0]["input"], "select");
        assert_eq!(ops[0]["values"], json!(["1", "2"]));
    }
}
