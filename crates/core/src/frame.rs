//! In-memory typed data frame.
//!
//! A [`TypedFrame`] is the logical content of a workflow's backing table:
//! ordered named typed columns plus rows of nullable cells. The store
//! (`ontask-db`) persists it; everything else in the core reads and
//! transforms it in memory.

use std::cmp::Ordering;
use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::TimeZone;
use crate::value::{cell_to_json, infer_data_type, render_cell, Cell, DataType, Value};

/// One row addressed by column name, in column order.
pub type Row = IndexMap<String, Cell>;

/// JSON ingest record.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameColumn {
    pub name: String,
    pub data_type: DataType,
}

impl FrameColumn {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedFrame {
    columns: Vec<FrameColumn>,
    rows: Vec<Vec<Cell>>,
}

impl TypedFrame {
    pub fn new(columns: Vec<FrameColumn>) -> Result<Self, CoreError> {
        Self::from_rows(columns, Vec::new())
    }

    /// Build a frame from positional rows, checking widths and cell types.
    /// Integer cells in double columns are widened.
    pub fn from_rows(columns: Vec<FrameColumn>, rows: Vec<Vec<Cell>>) -> Result<Self, CoreError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate column name '{}'",
                    column.name
                )));
            }
        }

        let mut checked = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(CoreError::Validation(format!(
                    "Row {index} has {} cells, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            let row = row
                .into_iter()
                .zip(&columns)
                .map(|(cell, column)| conform_cell(cell, column))
                .collect::<Result<Vec<_>, _>>()?;
            checked.push(row);
        }

        Ok(Self {
            columns,
            rows: checked,
        })
    }

    /// Build a frame from JSON records, inferring column types.
    ///
    /// Columns appear in first-seen order. Missing keys and empty strings are
    /// null. Integer columns containing nulls are stored as doubles.
    pub fn from_records(records: &[Record], tz: &TimeZone) -> Result<Self, CoreError> {
        let mut names: Vec<String> = Vec::new();
        let mut known = HashSet::new();
        for record in records {
            for key in record.keys() {
                if known.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
        }

        let null = serde_json::Value::Null;
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let values = records.iter().map(|r| r.get(name).unwrap_or(&null));
            columns.push(FrameColumn::new(name.clone(), infer_data_type(values, tz)));
        }

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let row = columns
                .iter()
                .map(|c| Value::from_json(record.get(&c.name).unwrap_or(&null), c.data_type, tz))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
        }

        let mut frame = Self::from_rows(columns, rows)?;
        frame.promote_nullable_integers();
        Ok(frame)
    }

    // -- shape ---------------------------------------------------------------

    pub fn columns(&self) -> &[FrameColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn data_type(&self, name: &str) -> Option<DataType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.data_type)
    }

    fn require_column(&self, name: &str) -> Result<usize, CoreError> {
        self.column_index(name)
            .ok_or_else(|| CoreError::UnknownColumn(name.to_string()))
    }

    // -- row access ----------------------------------------------------------

    pub fn raw_rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<Row> {
        self.rows.get(index).map(|cells| {
            self.columns
                .iter()
                .zip(cells)
                .map(|(c, v)| (c.name.clone(), v.clone()))
                .collect()
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        (0..self.rows.len()).filter_map(|i| self.row(i))
    }

    pub fn cell(&self, index: usize, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.rows.get(index).map(|row| &row[col])
    }

    pub fn column_values(&self, name: &str) -> Result<Vec<Cell>, CoreError> {
        let col = self.require_column(name)?;
        Ok(self.rows.iter().map(|row| row[col].clone()).collect())
    }

    /// Index of the row whose `key` column equals `value`.
    pub fn find_row(&self, key: &str, value: &Value) -> Result<Option<usize>, CoreError> {
        let col = self.require_column(key)?;
        Ok(self.rows.iter().position(|row| {
            row[col]
                .as_ref()
                .map(|cell| cell.same_as(value))
                .unwrap_or(false)
        }))
    }

    /// Whether the column's values are all non-null and distinct.
    pub fn is_unique_non_null(&self, name: &str) -> bool {
        let Some(col) = self.column_index(name) else {
            return false;
        };
        let mut seen = HashSet::with_capacity(self.rows.len());
        self.rows.iter().all(|row| match &row[col] {
            Some(value) => seen.insert(value.key_of()),
            None => false,
        })
    }

    // -- column operations ---------------------------------------------------

    /// Append a column filled with `initial`. An integer column without an
    /// initial value is created as double. Returns the effective type.
    pub fn add_column(
        &mut self,
        name: &str,
        data_type: DataType,
        initial: Cell,
    ) -> Result<DataType, CoreError> {
        if self.has_column(name) {
            return Err(CoreError::Conflict(format!("Column '{name}' already exists")));
        }
        let effective = if data_type == DataType::Integer && initial.is_none() {
            DataType::Double
        } else {
            data_type
        };
        let column = FrameColumn::new(name, effective);
        let initial = conform_cell(initial, &column)?;
        for row in &mut self.rows {
            row.push(initial.clone());
        }
        self.columns.push(column);
        Ok(effective)
    }

    pub fn drop_column(&mut self, name: &str) -> Result<(), CoreError> {
        let col = self.require_column(name)?;
        self.columns.remove(col);
        for row in &mut self.rows {
            row.remove(col);
        }
        Ok(())
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<(), CoreError> {
        let col = self.require_column(old)?;
        if old != new && self.has_column(new) {
            return Err(CoreError::Conflict(format!("Column '{new}' already exists")));
        }
        self.columns[col].name = new.to_string();
        Ok(())
    }

    pub fn copy_column(&mut self, from: &str, to: &str) -> Result<(), CoreError> {
        let col = self.require_column(from)?;
        if self.has_column(to) {
            return Err(CoreError::Conflict(format!("Column '{to}' already exists")));
        }
        self.columns
            .push(FrameColumn::new(to, self.columns[col].data_type));
        for row in &mut self.rows {
            let value = row[col].clone();
            row.push(value);
        }
        Ok(())
    }

    /// Move a column to `position` (0-based).
    pub fn move_column(&mut self, name: &str, position: usize) -> Result<(), CoreError> {
        let col = self.require_column(name)?;
        let position = position.min(self.columns.len() - 1);
        let column = self.columns.remove(col);
        self.columns.insert(position, column);
        for row in &mut self.rows {
            let cell = row.remove(col);
            row.insert(position, cell);
        }
        Ok(())
    }

    /// Change a column's type, converting every cell. Fails without changes
    /// if any cell cannot be represented in the new type.
    pub fn retype_column(&mut self, name: &str, data_type: DataType) -> Result<(), CoreError> {
        let col = self.require_column(name)?;
        let converted = self
            .rows
            .iter()
            .map(|row| match row[col].clone() {
                None => Ok(None),
                Some(v) => v.clone().coerce_to(data_type).map(Some).ok_or_else(|| {
                    CoreError::TypeMismatch(format!(
                        "Value {} of column '{name}' cannot become {data_type}",
                        v.to_json()
                    ))
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.columns[col].data_type = data_type;
        for (row, cell) in self.rows.iter_mut().zip(converted) {
            row[col] = cell;
        }
        Ok(())
    }

    /// Integer columns holding nulls become doubles. Returns the promoted
    /// column names. Promotions are never reverted.
    pub fn promote_nullable_integers(&mut self) -> Vec<String> {
        let mut promoted = Vec::new();
        for col in 0..self.columns.len() {
            if self.columns[col].data_type != DataType::Integer {
                continue;
            }
            if self.rows.iter().any(|row| row[col].is_none()) {
                self.columns[col].data_type = DataType::Double;
                for row in &mut self.rows {
                    if let Some(Value::Integer(i)) = row[col] {
                        row[col] = Some(Value::Double(i as f64));
                    }
                }
                promoted.push(self.columns[col].name.clone());
            }
        }
        promoted
    }

    /// Express every datetime in `tz`. Instants are unchanged.
    pub fn normalize_time_zone(&mut self, tz: &TimeZone) {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if let Some(Value::Datetime(dt)) = cell {
                    *dt = dt.with_timezone(tz);
                }
            }
        }
    }

    /// Replace empty strings with null.
    pub fn blank_to_null(&mut self) {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if matches!(cell, Some(Value::String(s)) if s.is_empty()) {
                    *cell = None;
                }
            }
        }
    }

    // -- row operations ------------------------------------------------------

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), CoreError> {
        if row.len() != self.columns.len() {
            return Err(CoreError::Validation(format!(
                "Row has {} cells, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        let row = row
            .into_iter()
            .zip(&self.columns)
            .map(|(cell, column)| conform_cell(cell, column))
            .collect::<Result<Vec<_>, _>>()?;
        self.rows.push(row);
        Ok(())
    }

    pub fn delete_row(&mut self, index: usize) -> Result<(), CoreError> {
        if index >= self.rows.len() {
            return Err(CoreError::Validation(format!("Row {index} does not exist")));
        }
        self.rows.remove(index);
        Ok(())
    }

    pub fn set_cell(&mut self, index: usize, column: &str, cell: Cell) -> Result<(), CoreError> {
        let col = self.require_column(column)?;
        let cell = conform_cell(cell, &self.columns[col])?;
        let row = self
            .rows
            .get_mut(index)
            .ok_or_else(|| CoreError::Validation(format!("Row {index} does not exist")))?;
        row[col] = cell;
        Ok(())
    }

    // -- derived frames ------------------------------------------------------

    /// Frame restricted to `names`, in the given order.
    pub fn project(&self, names: &[String]) -> Result<TypedFrame, CoreError> {
        let indices = names
            .iter()
            .map(|n| self.require_column(n))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TypedFrame {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Frame with the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> TypedFrame {
        TypedFrame {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// Indices of rows where any of `columns` contains `text`,
    /// case-insensitively. An empty `text` matches every row.
    pub fn search(&self, text: &str, columns: &[String], tz: &TimeZone) -> Result<Vec<usize>, CoreError> {
        let indices = columns
            .iter()
            .map(|n| self.require_column(n))
            .collect::<Result<Vec<_>, _>>()?;
        let needle = text.to_lowercase();
        Ok((0..self.rows.len())
            .filter(|&r| {
                needle.is_empty()
                    || indices.iter().any(|&c| {
                        self.rows[r][c]
                            .as_ref()
                            .map(|v| v.render(tz).to_lowercase().contains(&needle))
                            .unwrap_or(false)
                    })
            })
            .collect())
    }

    /// Row indices ordered by `column`; nulls sort last. The sort is stable.
    pub fn sorted_indices(&self, column: &str, ascending: bool) -> Result<Vec<usize>, CoreError> {
        let col = self.require_column(column)?;
        let mut indices: Vec<usize> = (0..self.rows.len()).collect();
        indices.sort_by(|&a, &b| {
            match (&self.rows[a][col], &self.rows[b][col]) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(x), Some(y)) => {
                    let ord = x.compare(y).unwrap_or(Ordering::Equal);
                    if ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
            }
        });
        Ok(indices)
    }

    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.name.clone(), cell_to_json(v)))
                    .collect()
            })
            .collect()
    }

    /// Rows rendered as text, for display tables.
    pub fn render_rows(&self, tz: &TimeZone) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|c| render_cell(c, tz)).collect())
            .collect()
    }

    /// Conform the frame to declared columns: the same names with the same
    /// types, in the declared order. Integer data may fill a double column.
    pub fn conform_to(&mut self, declared: &[FrameColumn]) -> Result<(), CoreError> {
        let mut expected: Vec<&str> = declared.iter().map(|c| c.name.as_str()).collect();
        let mut actual: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        expected.sort_unstable();
        actual.sort_unstable();
        if expected != actual {
            return Err(CoreError::SchemaMismatch(format!(
                "Expected columns [{}], got [{}]",
                expected.join(", "),
                actual.join(", ")
            )));
        }

        for column in declared {
            let current = self.data_type(&column.name).unwrap_or(column.data_type);
            if current == column.data_type {
                continue;
            }
            if current == DataType::Integer && column.data_type == DataType::Double {
                self.retype_column(&column.name, DataType::Double)?;
            } else {
                return Err(CoreError::SchemaMismatch(format!(
                    "Column '{}' is {}, got {current}",
                    column.name, column.data_type
                )));
            }
        }

        let order: Vec<String> = declared.iter().map(|c| c.name.clone()).collect();
        *self = self.project(&order)?;
        Ok(())
    }
}

fn conform_cell(cell: Cell, column: &FrameColumn) -> Result<Cell, CoreError> {
    match cell {
        None => Ok(None),
        Some(value) => {
            let found = value.data_type();
            value.coerce_to(column.data_type).map(Some).ok_or_else(|| {
                CoreError::TypeMismatch(format!(
                    "Column '{}' holds {} values, got {found}",
                    column.name, column.data_type
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::utc;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn records(value: serde_json::Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    fn sample() -> TypedFrame {
        TypedFrame::from_records(
            &records(json!([
                {"sid": 1, "email": "a@x", "score": 65},
                {"sid": 2, "email": "b@x", "score": 30},
                {"sid": 3, "email": "c@x", "score": 80},
            ])),
            &utc(),
        )
        .unwrap()
    }

    #[test]
    fn from_records_infers_and_orders_columns() {
        let frame = sample();
        assert_eq!(frame.column_names(), vec!["sid", "email", "score"]);
        assert_eq!(frame.data_type("sid"), Some(DataType::Integer));
        assert_eq!(frame.data_type("email"), Some(DataType::String));
        assert_eq!(frame.nrows(), 3);
    }

    #[test]
    fn nullable_integer_column_is_promoted() {
        let frame = TypedFrame::from_records(
            &records(json!([{"sid": 1, "n": 4}, {"sid": 2, "n": null}])),
            &utc(),
        )
        .unwrap();
        assert_eq!(frame.data_type("n"), Some(DataType::Double));
        assert_eq!(frame.cell(0, "n"), Some(&Some(Value::Double(4.0))));
    }

    #[test]
    fn add_integer_column_without_initial_becomes_double() {
        let mut frame = sample();
        let effective = frame.add_column("bonus", DataType::Integer, None).unwrap();
        assert_eq!(effective, DataType::Double);
        let effective = frame
            .add_column("credit", DataType::Integer, Some(Value::Integer(1)))
            .unwrap();
        assert_eq!(effective, DataType::Integer);
        assert_matches!(
            frame.add_column("sid", DataType::String, None),
            Err(CoreError::Conflict(_))
        );
    }

    #[test]
    fn key_uniqueness_detection() {
        let mut frame = sample();
        assert!(frame.is_unique_non_null("sid"));
        frame.set_cell(2, "sid", Some(Value::Integer(1))).unwrap();
        assert!(!frame.is_unique_non_null("sid"));
    }

    #[test]
    fn search_is_case_insensitive() {
        let frame = sample();
        let hits = frame.search("B@X", &["email".to_string()], &utc()).unwrap();
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn sorted_indices_put_nulls_last() {
        let mut frame = sample();
        frame.set_cell(0, "email", None).unwrap();
        let order = frame.sorted_indices("email", false).unwrap();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn conform_to_rejects_type_changes() {
        let mut frame = sample();
        let declared = vec![
            FrameColumn::new("sid", DataType::Integer),
            FrameColumn::new("email", DataType::Integer),
            FrameColumn::new("score", DataType::Integer),
        ];
        assert_matches!(frame.conform_to(&declared), Err(CoreError::SchemaMismatch(_)));
    }

    #[test]
    fn conform_to_widens_integers_into_double_columns() {
        let mut frame = sample();
        let declared = vec![
            FrameColumn::new("score", DataType::Double),
            FrameColumn::new("sid", DataType::Integer),
            FrameColumn::new("email", DataType::String),
        ];
        frame.conform_to(&declared).unwrap();
        assert_eq!(frame.column_names(), vec!["score", "sid", "email"]);
        assert_eq!(frame.cell(0, "score"), Some(&Some(Value::Double(65.0))));
    }

    #[test]
    fn rename_and_copy_columns() {
        let mut frame = sample();
        frame.rename_column("score", "mark").unwrap();
        frame.copy_column("mark", "mark_copy").unwrap();
        assert_eq!(frame.column_names(), vec!["sid", "email", "mark", "mark_copy"]);
        assert_matches!(
            frame.rename_column("mark", "sid"),
            Err(CoreError::Conflict(_))
        );
    }
}
