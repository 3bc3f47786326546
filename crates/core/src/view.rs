//! Views: saved projections of the table with an optional filter.

use serde::Serialize;

use crate::cache::Cached;
use crate::error::CoreError;
use crate::formula::{self, Formula};
use crate::frame::TypedFrame;
use crate::types::DbId;
use crate::value::DataType;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct View {
    #[serde(skip)]
    pub id: Option<DbId>,
    pub name: String,
    pub description_text: String,
    /// Projected columns, in display order.
    pub columns: Vec<String>,
    pub filter: Option<Formula>,
    pub num_rows: Cached<usize>,
}

/// What a column delete did to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewFate {
    Untouched,
    Updated,
    /// The view lost its last column or its last key column.
    Deleted,
}

impl View {
    pub fn new(name: impl Into<String>, columns: Vec<String>, filter: Option<Formula>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description_text: String::new(),
            columns,
            filter,
            num_rows: Cached::stale(),
        }
    }

    pub fn validate(&self, typing: &dyn Fn(&str) -> Option<DataType>, is_key: &dyn Fn(&str) -> bool) -> Result<(), CoreError> {
        if self.columns.is_empty() {
            return Err(CoreError::Validation(format!("View '{}' has no columns", self.name)));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if typing(column).is_none() {
                return Err(CoreError::UnknownColumn(column.clone()));
            }
            if self.columns[..i].contains(column) {
                return Err(CoreError::Validation(format!(
                    "Column '{column}' appears twice in view '{}'",
                    self.name
                )));
            }
        }
        if !self.columns.iter().any(|c| is_key(c)) {
            return Err(CoreError::KeyColumnConstraintViolation(format!(
                "View '{}' must include a key column",
                self.name
            )));
        }
        if let Some(filter) = &self.filter {
            filter.validate(typing)?;
        }
        Ok(())
    }

    /// Indices of the frame rows the view shows.
    pub fn row_indices(&self, frame: &TypedFrame) -> Result<Vec<usize>, CoreError> {
        match &self.filter {
            Some(filter) => formula::select_rows(frame, filter),
            None => Ok((0..frame.nrows()).collect()),
        }
    }

    /// The projected, filtered table.
    pub fn data(&self, frame: &TypedFrame) -> Result<TypedFrame, CoreError> {
        let indices = self.row_indices(frame)?;
        frame.select(&indices).project(&self.columns)
    }

    pub fn refresh_count(&mut self, frame: &TypedFrame) -> Result<usize, CoreError> {
        if let Some(n) = self.num_rows.value() {
            return Ok(n);
        }
        let n = self.row_indices(frame)?.len();
        self.num_rows.set(n);
        Ok(n)
    }

    pub fn references(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
            || self.filter.as_ref().is_some_and(|f| f.references(column))
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for column in &mut self.columns {
            if column == old {
                *column = new.to_string();
                changed = true;
            }
        }
        if let Some(filter) = &mut self.filter {
            changed |= filter.rename_column(old, new);
        }
        changed
    }

    pub fn retype_column(&mut self, column: &str, data_type: DataType) -> Result<bool, CoreError> {
        let changed = match &mut self.filter {
            Some(filter) => filter.retype_column(column, data_type)?,
            None => false,
        };
        if changed {
            self.num_rows.invalidate();
        }
        Ok(changed)
    }

    /// Drop `column` from the view. A filter mentioning it is cleared.
    pub fn remove_column(&mut self, column: &str, is_key: &dyn Fn(&str) -> bool) -> ViewFate {
        if !self.references(column) {
            return ViewFate::Untouched;
        }
        self.columns.retain(|c| c != column);
        if self.filter.as_ref().is_some_and(|f| f.references(column)) {
            self.filter = None;
        }
        self.num_rows.invalidate();
        if self.columns.is_empty() || !self.columns.iter().any(|c| c != column && is_key(c)) {
            ViewFate::Deleted
        } else {
            ViewFate::Updated
        }
    }

    pub fn clone_detached(&self, name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            num_rows: Cached::stale(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Operand, Operator};
    use crate::frame::FrameColumn;
    use crate::value::Value;

    fn frame() -> TypedFrame {
        TypedFrame::from_rows(
            vec![
                FrameColumn::new("sid", DataType::Integer),
                FrameColumn::new("name", DataType::String),
                FrameColumn::new("score", DataType::Integer),
            ],
            vec![
                vec![Some(Value::Integer(1)), Some(Value::String("Ada".into())), Some(Value::Integer(65))],
                vec![Some(Value::Integer(2)), Some(Value::String("Bo".into())), Some(Value::Integer(30))],
            ],
        )
        .unwrap()
    }

    fn passed_view() -> View {
        View::new(
            "passed",
            vec!["sid".into(), "name".into()],
            Some(Formula::leaf(
                "score",
                Operator::GreaterOrEqual,
                DataType::Integer,
                Operand::Single(Value::Integer(50)),
            )),
        )
    }

    fn is_key(name: &str) -> bool {
        name == "sid"
    }

    #[test]
    fn data_projects_and_filters() {
        let frame = frame();
        let mut view = passed_view();
        let data = view.data(&frame).unwrap();
        assert_eq!(data.column_names(), vec!["sid", "name"]);
        assert_eq!(data.nrows(), 1);
        assert_eq!(view.refresh_count(&frame).unwrap(), 1);
        assert_eq!(view.num_rows.value(), Some(1));
    }

    #[test]
    fn validate_requires_key_column() {
        let frame = frame();
        let typing = |n: &str| frame.data_type(n);
        assert!(passed_view().validate(&typing, &is_key).is_ok());
        let keyless = View::new("names", vec!["name".into()], None);
        assert!(matches!(
            keyless.validate(&typing, &is_key),
            Err(CoreError::KeyColumnConstraintViolation(_))
        ));
    }

    #[test]
    fn removing_filter_column_clears_filter() {
        let mut view = passed_view();
        assert_eq!(view.remove_column("score", &is_key), ViewFate::Updated);
        assert!(view.filter.is_none());
        assert_eq!(view.remove_column("ghost", &is_key), ViewFate::Untouched);
    }

    #[test]
    fn losing_last_key_deletes_view() {
        let mut view = passed_view();
        assert_eq!(view.remove_column("sid", &is_key), ViewFate::Deleted);
    }

    #[test]
    fn rename_updates_columns_and_filter() {
        let mut view = passed_view();
        assert!(view.rename_column("score", "mark"));
        assert!(view.filter.as_ref().unwrap().references("mark"));
        assert!(view.rename_column("name", "first"));
        assert_eq!(view.columns, vec!["sid", "first"]);
    }
}
