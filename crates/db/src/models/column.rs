use serde::Serialize;
use sqlx::FromRow;
use ontask_core::column::Column;
use ontask_core::error::CoreError;
use ontask_core::types::{DbId, TimeZone, Timestamp};
use ontask_core::value::{DataType, Value};

/// A row from the `workflow_columns` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ColumnRow {
    pub id: DbId,
    pub workflow_id: DbId,
    pub name: String,
    pub description_text: String,
    pub data_type: String,
    pub is_key: bool,
    pub position: i32,
    pub categories: serde_json::Value,
    pub active_from: Option<Timestamp>,
    pub active_to: Option<Timestamp>,
}

impl ColumnRow {
    pub fn into_column(self, tz: &TimeZone) -> Result<Column, CoreError> {
        let data_type: DataType = self.data_type.parse()?;
        let categories = match &self.categories {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| Value::operand_from_json(item, data_type, tz))
                .collect::<Result<Vec<_>, _>>()?,
            serde_json::Value::Null => Vec::new(),
            other => {
                return Err(CoreError::Internal(format!(
                    "Column '{}' has malformed categories: {other}",
                    self.name
                )))
            }
        };
        Ok(Column {
            name: self.name,
            description_text: self.description_text,
            data_type,
            is_key: self.is_key,
            position: self.position,
            categories,
            active_from: self.active_from,
            active_to: self.active_to,
        })
    }
}

/// JSON form of a column's categories.
pub fn categories_json(column: &Column) -> serde_json::Value {
    serde_json::Value::Array(column.categories.iter().map(Value::to_json).collect())
}
