//! The workflow aggregate.
//!
//! A [`Workflow`] owns the table, its column metadata, the actions with
//! their conditions, the views and the attribute map. Every mutation goes
//! through a method here so cross-entity invariants hold after each call;
//! [`Workflow::check_invariants`] verifies them.

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionColumnConditionTuple};
use crate::cache::Cached;
use crate::column::{build_query_builder_ops, Column};
use crate::condition::Condition;
use crate::error::CoreError;
use crate::formula::{self, Formula};
use crate::frame::{Record, TypedFrame};
use crate::merge::{merge_frames, MergeOutcome, MergeSpec};
use crate::rubric::RubricCell;
use crate::run::{RunContext, RunSummary};
use crate::statistics::{get_column_statistics, ColumnStatistics};
use crate::survey::{parse_submission, SurveyForm};
use crate::transport::Artifact;
use crate::types::{utc, DbId, TimeZone, Timestamp};
use crate::value::{Cell, DataType, Value};
use crate::view::{View, ViewFate};

// ---------------------------------------------------------------------------
// Inputs and reports
// ---------------------------------------------------------------------------

/// A column to add.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
    pub description_text: String,
    pub is_key: bool,
    pub categories: Vec<Value>,
    pub active_from: Option<Timestamp>,
    pub active_to: Option<Timestamp>,
    pub initial: Cell,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            description_text: String::new(),
            is_key: false,
            categories: Vec::new(),
            active_from: None,
            active_to: None,
            initial: None,
        }
    }
}

/// Metadata changes to an existing column. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnUpdate {
    pub description_text: Option<String>,
    pub is_key: Option<bool>,
    pub categories: Option<Vec<Value>>,
    pub active_from: Option<Option<Timestamp>>,
    pub active_to: Option<Option<Timestamp>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionRef {
    pub action: String,
    pub condition: String,
}

/// Entities touched by deleting a column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub column: String,
    pub removed_conditions: Vec<ConditionRef>,
    pub updated_actions: Vec<String>,
    pub updated_views: Vec<String>,
    pub deleted_views: Vec<String>,
}

/// What a merge did to the workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub nrows: usize,
    pub ncols: usize,
    pub added_columns: Vec<String>,
    pub updated_columns: Vec<String>,
    pub demoted_keys: Vec<String>,
    pub promoted_columns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub id: Option<DbId>,
    pub owner_id: DbId,
    pub name: String,
    pub description_text: String,
    pub attributes: BTreeMap<String, String>,
    /// Zone datetimes are rendered and parsed in.
    pub time_zone: TimeZone,
    columns: Vec<Column>,
    frame: TypedFrame,
    actions: Vec<Action>,
    views: Vec<View>,
    query_builder_ops: Cached<serde_json::Value>,
    frame_dirty: bool,
}

impl Workflow {
    pub fn new(owner_id: DbId, name: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_id,
            name: name.into(),
            description_text: String::new(),
            attributes: BTreeMap::new(),
            time_zone: utc(),
            columns: Vec::new(),
            frame: TypedFrame::default(),
            actions: Vec::new(),
            views: Vec::new(),
            query_builder_ops: Cached::stale(),
            frame_dirty: false,
        }
    }

    /// Reassemble a workflow from stored parts. Nothing is validated here;
    /// call [`Workflow::check_invariants`] when the source is untrusted.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: DbId,
        owner_id: DbId,
        name: String,
        description_text: String,
        attributes: BTreeMap<String, String>,
        time_zone: TimeZone,
        mut columns: Vec<Column>,
        frame: TypedFrame,
        actions: Vec<Action>,
        views: Vec<View>,
        query_builder_ops: Option<serde_json::Value>,
    ) -> Self {
        columns.sort_by_key(|c| c.position);
        Self {
            id: Some(id),
            owner_id,
            name,
            description_text,
            attributes,
            time_zone,
            columns,
            frame,
            actions,
            views,
            query_builder_ops: Cached::from_option(query_builder_ops),
            frame_dirty: false,
        }
    }

    // -- accessors -----------------------------------------------------------

    pub fn nrows(&self) -> usize {
        self.frame.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn frame(&self) -> &TypedFrame {
        &self.frame
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// Whether the table changed since the last [`Workflow::mark_frame_persisted`].
    pub fn frame_changed(&self) -> bool {
        self.frame_dirty
    }

    pub fn mark_frame_persisted(&mut self) {
        self.frame_dirty = false;
    }

    pub fn column(&self, name: &str) -> Result<&Column, CoreError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CoreError::named_not_found("Column", name))
    }

    fn column_mut(&mut self, name: &str) -> Result<&mut Column, CoreError> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| CoreError::named_not_found("Column", name))
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_key)
    }

    fn key_names(&self) -> BTreeSet<String> {
        self.key_columns().map(|c| c.name.clone()).collect()
    }

    pub fn action(&self, name: &str) -> Result<&Action, CoreError> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| CoreError::named_not_found("Action", name))
    }

    fn action_mut(&mut self, name: &str) -> Result<&mut Action, CoreError> {
        self.actions
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| CoreError::named_not_found("Action", name))
    }

    pub fn view(&self, name: &str) -> Result<&View, CoreError> {
        self.views
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| CoreError::named_not_found("View", name))
    }

    fn view_mut(&mut self, name: &str) -> Result<&mut View, CoreError> {
        self.views
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| CoreError::named_not_found("View", name))
    }

    fn typing(&self) -> impl Fn(&str) -> Option<DataType> + '_ {
        |name: &str| self.frame.data_type(name)
    }

    /// QueryBuilder operand list, rebuilt after column changes.
    pub fn query_builder_ops(&mut self) -> &serde_json::Value {
        let (columns, tz) = (&self.columns, &self.time_zone);
        match self
            .query_builder_ops
            .get_or_try_insert_with(|| Ok::<_, Infallible>(build_query_builder_ops(columns, tz)))
        {
            Ok(ops) => ops,
            Err(never) => match never {},
        }
    }

    /// Cached operand list without rebuilding.
    pub fn cached_query_builder_ops(&self) -> Option<&serde_json::Value> {
        self.query_builder_ops.get()
    }

    // -- cache invalidation --------------------------------------------------

    /// The table changed: every derived count is stale.
    fn frame_touched(&mut self) {
        self.frame_dirty = true;
        for action in &mut self.actions {
            action.invalidate_caches();
        }
        for view in &mut self.views {
            view.num_rows.invalidate();
        }
    }

    /// The column set or its metadata changed.
    fn columns_touched(&mut self) {
        self.query_builder_ops.invalidate();
        for (i, column) in self.columns.iter_mut().enumerate() {
            column.position = i as i32 + 1;
        }
        self.frame_touched();
    }

    /// Integer columns that gained nulls are now doubles everywhere.
    fn apply_promotions(&mut self, promoted: &[String]) -> Result<(), CoreError> {
        for name in promoted {
            self.column_mut(name)?.data_type = DataType::Double;
            for action in &mut self.actions {
                action.retype_column(name, DataType::Double)?;
            }
            for view in &mut self.views {
                view.retype_column(name, DataType::Double)?;
            }
            tracing::info!(workflow = ?self.id, column = %name, "Integer column with nulls promoted to double");
        }
        Ok(())
    }

    // -- table ---------------------------------------------------------------

    /// Replace the table. Without declared columns the metadata is derived
    /// from the frame and every unique, non-null column becomes a key.
    /// Otherwise the frame must match the declared columns.
    pub fn store_frame(&mut self, mut frame: TypedFrame) -> Result<(), CoreError> {
        frame.normalize_time_zone(&self.time_zone);
        let promoted = frame.promote_nullable_integers();

        if self.columns.is_empty() {
            let mut columns = Vec::with_capacity(frame.ncols());
            for (i, fc) in frame.columns().iter().enumerate() {
                Column::validate_name(&fc.name)?;
                let mut column = Column::new(fc.name.clone(), fc.data_type, i as i32 + 1);
                column.is_key = frame.is_unique_non_null(&fc.name);
                columns.push(column);
            }
            if !frame.is_empty() && !columns.iter().any(|c| c.is_key) {
                return Err(CoreError::KeyColumnConstraintViolation(
                    "The data has no column with unique, non-empty values".to_string(),
                ));
            }
            self.columns = columns;
            self.frame = frame;
        } else {
            let declared: Vec<_> = self
                .columns
                .iter()
                .map(|c| {
                    let mut fc = c.frame_column();
                    if promoted.contains(&c.name) && fc.data_type == DataType::Integer {
                        fc.data_type = DataType::Double;
                    }
                    fc
                })
                .collect();
            frame.conform_to(&declared)?;
            self.validate_frame(&frame)?;
            let newly_promoted: Vec<String> = promoted
                .into_iter()
                .filter(|n| self.frame.data_type(n) == Some(DataType::Integer))
                .collect();
            self.frame = frame;
            self.apply_promotions(&newly_promoted)?;
        }
        self.columns_touched();
        tracing::debug!(workflow = ?self.id, nrows = self.nrows(), ncols = self.ncols(), "Stored table");
        Ok(())
    }

    /// Type JSON records by inference and store them.
    pub fn store_records(&mut self, records: &[Record]) -> Result<(), CoreError> {
        let frame = TypedFrame::from_records(records, &self.time_zone)?;
        self.store_frame(frame)
    }

    /// Key and category constraints of `frame` under the current columns.
    fn validate_frame(&self, frame: &TypedFrame) -> Result<(), CoreError> {
        for column in &self.columns {
            if column.is_key && !frame.is_unique_non_null(&column.name) {
                return Err(CoreError::KeyColumnConstraintViolation(format!(
                    "Key column '{}' has empty or repeated values",
                    column.name
                )));
            }
            if !column.categories.is_empty() {
                for cell in frame.column_values(&column.name)? {
                    column.validate_value(&cell)?;
                }
            }
        }
        Ok(())
    }

    /// Merge `source` into the table. The workflow is unchanged on error.
    pub fn merge(
        &mut self,
        source: TypedFrame,
        spec: &MergeSpec,
        cancel: Option<&CancellationToken>,
    ) -> Result<MergeReport, CoreError> {
        if self.columns.is_empty() {
            self.store_frame(source)?;
            return Ok(MergeReport {
                nrows: self.nrows(),
                ncols: self.ncols(),
                added_columns: self.frame.column_names(),
                updated_columns: Vec::new(),
                demoted_keys: Vec::new(),
                promoted_columns: Vec::new(),
            });
        }

        let keys: Vec<String> = self.key_names().into_iter().collect();
        let MergeOutcome {
            frame,
            added_columns,
            updated_columns,
            demoted_keys,
            promoted_columns,
        } = merge_frames(&self.frame, &keys, &source, spec, &self.time_zone, cancel)?;

        for name in &updated_columns {
            let column = self.column(name)?;
            if !column.categories.is_empty() {
                for cell in frame.column_values(name)? {
                    column.validate_value(&cell)?;
                }
            }
        }

        let mut added = Vec::with_capacity(added_columns.len());
        for fc in &added_columns {
            Column::validate_name(&fc.name)?;
            let mut column = Column::new(fc.name.clone(), fc.data_type, 0);
            column.is_key = frame.is_unique_non_null(&fc.name);
            added.push(column);
        }

        self.frame = frame;
        self.columns.extend(added);
        for name in &demoted_keys {
            self.column_mut(name)?.is_key = false;
        }
        let existing_promotions: Vec<String> = promoted_columns
            .iter()
            .filter(|n| self.column(n).map(|c| c.data_type == DataType::Integer).unwrap_or(false))
            .cloned()
            .collect();
        self.apply_promotions(&existing_promotions)?;
        self.columns_touched();

        tracing::info!(
            workflow = ?self.id,
            nrows = self.nrows(),
            added = added_columns.len(),
            demoted = demoted_keys.len(),
            "Merged data into workflow"
        );
        Ok(MergeReport {
            nrows: self.nrows(),
            ncols: self.ncols(),
            added_columns: added_columns.into_iter().map(|c| c.name).collect(),
            updated_columns,
            demoted_keys,
            promoted_columns,
        })
    }

    /// Projection of the table, optionally filtered.
    pub fn load(&self, columns: Option<&[String]>, filter: Option<&Formula>) -> Result<TypedFrame, CoreError> {
        let indices = match filter {
            Some(filter) => formula::select_rows(&self.frame, filter)?,
            None => (0..self.frame.nrows()).collect(),
        };
        let selected = self.frame.select(&indices);
        match columns {
            Some(names) => selected.project(names),
            None => Ok(selected),
        }
    }

    /// Case-insensitive substring search over `columns` (all when empty).
    pub fn search(
        &self,
        text: &str,
        columns: &[String],
        filter: Option<&Formula>,
        order_by: Option<&str>,
        ascending: bool,
    ) -> Result<TypedFrame, CoreError> {
        let searched = if columns.is_empty() {
            self.frame.column_names()
        } else {
            columns.to_vec()
        };
        let mut hits: BTreeSet<usize> = self.frame.search(text, &searched, &self.time_zone)?.into_iter().collect();
        if let Some(filter) = filter {
            let allowed: BTreeSet<usize> = formula::select_rows(&self.frame, filter)?.into_iter().collect();
            hits.retain(|i| allowed.contains(i));
        }
        let ordered: Vec<usize> = match order_by {
            Some(column) => self
                .frame
                .sorted_indices(column, ascending)?
                .into_iter()
                .filter(|i| hits.contains(i))
                .collect(),
            None => hits.into_iter().collect(),
        };
        Ok(self.frame.select(&ordered))
    }

    fn row_index(&self, key: &str, value: &Value) -> Result<usize, CoreError> {
        if !self.column(key)?.is_key {
            return Err(CoreError::Validation(format!("'{key}' is not a key column")));
        }
        self.frame
            .find_row(key, value)?
            .ok_or_else(|| CoreError::named_not_found("Row", value.render(&self.time_zone)))
    }

    pub fn delete_row(&mut self, key: &str, value: &Value) -> Result<(), CoreError> {
        let index = self.row_index(key, value)?;
        self.frame.delete_row(index)?;
        self.frame_touched();
        Ok(())
    }

    /// Partial update of one row. Values are coerced to the column types and
    /// checked against keys and categories before anything changes.
    pub fn update_row(&mut self, key: &str, value: &Value, updates: &[(String, Cell)]) -> Result<(), CoreError> {
        let index = self.row_index(key, value)?;
        let mut frame = self.frame.clone();
        for (name, cell) in updates {
            let column = self.column(name)?;
            let cell = match cell.clone() {
                None => None,
                Some(v) => Some(v.clone().coerce_to(column.data_type).ok_or_else(|| {
                    CoreError::TypeMismatch(format!("Column '{name}' is {}, got {}", column.data_type, v.data_type()))
                })?),
            };
            column.validate_value(&cell)?;
            frame.set_cell(index, name, cell)?;
        }
        for key_column in self.key_columns() {
            if !frame.is_unique_non_null(&key_column.name) {
                return Err(CoreError::KeyColumnConstraintViolation(format!(
                    "Key column '{}' would have empty or repeated values",
                    key_column.name
                )));
            }
        }
        let promoted = frame.promote_nullable_integers();
        self.frame = frame;
        self.apply_promotions(&promoted)?;
        self.frame_touched();
        Ok(())
    }

    /// Statistics of one column, over a view's rows when given.
    pub fn column_statistics(&self, column: &str, view: Option<&str>) -> Result<ColumnStatistics, CoreError> {
        let values = match view {
            Some(name) => {
                let indices = self.view(name)?.row_indices(&self.frame)?;
                self.frame.select(&indices).column_values(column)?
            }
            None => self.frame.column_values(column)?,
        };
        Ok(get_column_statistics(&values, &self.time_zone))
    }

    // -- columns -------------------------------------------------------------

    fn check_new_column_name(&self, name: &str) -> Result<(), CoreError> {
        Column::validate_name(name)?;
        if self.frame.has_column(name) || self.columns.iter().any(|c| c.name == name) {
            return Err(CoreError::Conflict(format!("Column '{name}' already exists")));
        }
        if self.attributes.contains_key(name) {
            return Err(CoreError::Conflict(format!("'{name}' is already an attribute")));
        }
        Ok(())
    }

    /// Add a column filled with `spec.initial`.
    pub fn add_column(&mut self, spec: ColumnSpec) -> Result<&Column, CoreError> {
        self.check_new_column_name(&spec.name)?;
        if let (Some(from), Some(to)) = (spec.active_from, spec.active_to) {
            if from > to {
                return Err(CoreError::Validation("Column activation window ends before it starts".into()));
            }
        }

        let mut frame = self.frame.clone();
        let effective = frame.add_column(&spec.name, spec.data_type, spec.initial.clone())?;
        let mut column = Column::new(spec.name.clone(), effective, 0);
        column.description_text = spec.description_text;
        column.set_categories(spec.categories)?;
        column.validate_value(&spec.initial)?;
        column.active_from = spec.active_from;
        column.active_to = spec.active_to;
        if spec.is_key {
            if !frame.is_unique_non_null(&spec.name) {
                return Err(CoreError::KeyColumnConstraintViolation(format!(
                    "Column '{}' cannot be a key with repeated or empty values",
                    spec.name
                )));
            }
            column.is_key = true;
        }

        self.frame = frame;
        self.columns.push(column);
        self.columns_touched();
        self.column(&spec.name)
    }

    /// Rename a column everywhere it is used. Returns the actions that
    /// changed.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<Vec<String>, CoreError> {
        if old == new {
            return Ok(Vec::new());
        }
        self.column(old)?;
        self.check_new_column_name(new)?;

        self.frame.rename_column(old, new)?;
        self.column_mut(old)?.name = new.to_string();
        let mut updated = Vec::new();
        for action in &mut self.actions {
            if action.rename_column(old, new) {
                updated.push(action.name.clone());
            }
        }
        for view in &mut self.views {
            view.rename_column(old, new);
        }
        self.columns_touched();
        Ok(updated)
    }

    /// Copy a column's values and metadata. The copy is never a key.
    pub fn copy_column(&mut self, from: &str, to: &str) -> Result<&Column, CoreError> {
        let source = self.column(from)?.clone();
        self.check_new_column_name(to)?;
        self.frame.copy_column(from, to)?;
        self.columns.push(Column {
            name: to.to_string(),
            is_key: false,
            ..source
        });
        self.columns_touched();
        self.column(to)
    }

    pub fn update_column(&mut self, name: &str, update: ColumnUpdate) -> Result<&Column, CoreError> {
        let mut column = self.column(name)?.clone();
        if let Some(description) = update.description_text {
            column.description_text = description;
        }
        if let Some(categories) = update.categories {
            column.set_categories(categories)?;
            for cell in self.frame.column_values(name)? {
                column.validate_value(&cell)?;
            }
        }
        if let Some(from) = update.active_from {
            column.active_from = from;
        }
        if let Some(to) = update.active_to {
            column.active_to = to;
        }
        if let (Some(from), Some(to)) = (column.active_from, column.active_to) {
            if from > to {
                return Err(CoreError::Validation("Column activation window ends before it starts".into()));
            }
        }
        match update.is_key {
            Some(true) if !column.is_key => {
                if !self.frame.is_unique_non_null(name) {
                    return Err(CoreError::KeyColumnConstraintViolation(format!(
                        "Column '{name}' has empty or repeated values"
                    )));
                }
                column.is_key = true;
            }
            Some(false) if column.is_key => {
                if !self.frame.is_empty() && self.key_columns().count() == 1 {
                    return Err(CoreError::KeyColumnConstraintViolation(
                        "The workflow needs at least one key column".into(),
                    ));
                }
                column.is_key = false;
            }
            _ => {}
        }
        *self.column_mut(name)? = column;
        self.columns_touched();
        self.column(name)
    }

    /// Move a column to a 1-based position.
    pub fn move_column(&mut self, name: &str, position: usize) -> Result<(), CoreError> {
        let from = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| CoreError::named_not_found("Column", name))?;
        let to = position.clamp(1, self.columns.len()) - 1;
        self.frame.move_column(name, to)?;
        let column = self.columns.remove(from);
        self.columns.insert(to, column);
        self.columns_touched();
        Ok(())
    }

    /// Entities a delete of `name` would touch, without changing anything.
    pub fn column_delete_closure(&self, name: &str) -> Result<CascadeReport, CoreError> {
        let column = self.column(name)?;
        if column.is_key && !self.frame.is_empty() && self.key_columns().count() == 1 {
            return Err(CoreError::KeyColumnConstraintViolation(format!(
                "'{name}' is the only key column"
            )));
        }

        let mut report = CascadeReport {
            column: name.to_string(),
            ..CascadeReport::default()
        };
        for action in &self.actions {
            for condition in action.conditions.iter().filter(|c| c.formula.references(name)) {
                report.removed_conditions.push(ConditionRef {
                    action: action.name.clone(),
                    condition: condition.name.clone(),
                });
            }
            if action.references_column(name) {
                report.updated_actions.push(action.name.clone());
            }
        }
        let keys = self.key_names();
        let is_key = |c: &str| c != name && keys.contains(c);
        for view in &self.views {
            let mut trial = view.clone();
            match trial.remove_column(name, &is_key) {
                ViewFate::Untouched => {}
                ViewFate::Updated => report.updated_views.push(view.name.clone()),
                ViewFate::Deleted => report.deleted_views.push(view.name.clone()),
            }
        }
        Ok(report)
    }

    /// Delete a column and everything that depends on it.
    pub fn delete_column(&mut self, name: &str) -> Result<CascadeReport, CoreError> {
        let report = self.column_delete_closure(name)?;

        self.frame.drop_column(name)?;
        self.columns.retain(|c| c.name != name);
        for action in &mut self.actions {
            if report.updated_actions.contains(&action.name) {
                action.remove_column(name);
            }
        }
        let keys = self.key_names();
        let is_key = |c: &str| keys.contains(c);
        for view in &mut self.views {
            view.remove_column(name, &is_key);
        }
        self.views.retain(|v| !report.deleted_views.contains(&v.name));
        self.columns_touched();

        tracing::info!(
            workflow = ?self.id,
            column = %name,
            conditions = report.removed_conditions.len(),
            views = report.deleted_views.len(),
            "Deleted column"
        );
        Ok(report)
    }

    // -- attributes ----------------------------------------------------------

    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) -> Result<(), CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::Validation("Attribute name cannot be empty".into()));
        }
        if self.columns.iter().any(|c| c.name == name) {
            return Err(CoreError::Conflict(format!("'{name}' is already a column")));
        }
        self.attributes.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn remove_attribute(&mut self, name: &str) -> Result<String, CoreError> {
        self.attributes
            .remove(name)
            .ok_or_else(|| CoreError::named_not_found("Attribute", name))
    }

    // -- actions -------------------------------------------------------------

    fn check_action(&self, action: &Action) -> Result<(), CoreError> {
        action.validate(&self.typing())?;
        for cell in &action.rubric_cells {
            cell.validate(self.column(&cell.column)?)?;
        }
        Ok(())
    }

    pub fn add_action(&mut self, action: Action) -> Result<&Action, CoreError> {
        if self.actions.iter().any(|a| a.name == action.name) {
            return Err(CoreError::Conflict(format!("Action '{}' already exists", action.name)));
        }
        self.check_action(&action)?;
        let name = action.name.clone();
        self.actions.push(action);
        self.action(&name)
    }

    /// Apply `edit` to an action and keep the result only if it is valid.
    pub fn edit_action(&mut self, name: &str, edit: impl FnOnce(&mut Action) -> Result<(), CoreError>) -> Result<&Action, CoreError> {
        let mut action = self.action(name)?.clone();
        edit(&mut action)?;
        if action.name != name && self.actions.iter().any(|a| a.name == action.name) {
            return Err(CoreError::Conflict(format!("Action '{}' already exists", action.name)));
        }
        self.check_action(&action)?;
        let new_name = action.name.clone();
        *self.action_mut(name)? = action;
        self.action(&new_name)
    }

    pub fn delete_action(&mut self, name: &str) -> Result<Action, CoreError> {
        let index = self
            .actions
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| CoreError::named_not_found("Action", name))?;
        Ok(self.actions.remove(index))
    }

    pub fn clone_action(&mut self, name: &str, new_name: &str) -> Result<&Action, CoreError> {
        let copy = self.action(name)?.clone_detached(new_name);
        self.add_action(copy)
    }

    pub fn set_text_content(&mut self, action: &str, text: &str) -> Result<&Action, CoreError> {
        self.edit_action(action, |a| a.set_text_content(text))
    }

    pub fn set_column_condition_tuples(
        &mut self,
        action: &str,
        tuples: Vec<ActionColumnConditionTuple>,
    ) -> Result<&Action, CoreError> {
        self.edit_action(action, |a| {
            a.column_condition_tuples = tuples;
            Ok(())
        })
    }

    pub fn set_rubric_cells(&mut self, action: &str, cells: Vec<RubricCell>) -> Result<&Action, CoreError> {
        self.edit_action(action, |a| {
            a.rubric_cells = cells;
            Ok(())
        })
    }

    // -- conditions ----------------------------------------------------------

    pub fn add_condition(&mut self, action: &str, condition: Condition) -> Result<&Action, CoreError> {
        condition.formula.validate(&self.typing())?;
        self.edit_action(action, |a| a.add_condition(condition))
    }

    pub fn set_filter(&mut self, action: &str, formula: Option<Formula>) -> Result<&Action, CoreError> {
        if let Some(formula) = &formula {
            formula.validate(&self.typing())?;
        }
        self.edit_action(action, |a| {
            a.set_filter(formula);
            Ok(())
        })
    }

    pub fn update_condition(
        &mut self,
        action: &str,
        name: &str,
        formula: Formula,
        description: Option<String>,
    ) -> Result<&Action, CoreError> {
        formula.validate(&self.typing())?;
        self.edit_action(action, |a| a.update_condition(name, formula, description))
    }

    pub fn rename_condition(&mut self, action: &str, old: &str, new: &str) -> Result<&Action, CoreError> {
        self.edit_action(action, |a| a.rename_condition(old, new))
    }

    /// Delete a condition. Text branches naming it are dropped, as when a
    /// column delete removes it.
    pub fn delete_condition(&mut self, action: &str, name: &str) -> Result<Condition, CoreError> {
        let mut removed = None;
        self.edit_action(action, |a| {
            removed = Some(a.remove_condition(name)?);
            Ok(())
        })?;
        removed.ok_or_else(|| CoreError::named_not_found("Condition", name))
    }

    /// Copy a condition, into `target` when given, else into the same action.
    pub fn clone_condition(
        &mut self,
        action: &str,
        name: &str,
        new_name: &str,
        target: Option<&str>,
    ) -> Result<&Action, CoreError> {
        let copy = self
            .action(action)?
            .condition(name)
            .ok_or_else(|| CoreError::named_not_found("Condition", name))?
            .clone_detached(new_name);
        self.add_condition(target.unwrap_or(action), copy)
    }

    /// Fill every stale `n_rows_selected` of an action.
    pub fn refresh_condition_counts(&mut self, action: &str) -> Result<Vec<(String, usize)>, CoreError> {
        let frame = &self.frame;
        let action = self
            .actions
            .iter_mut()
            .find(|a| a.name == action)
            .ok_or_else(|| CoreError::named_not_found("Action", action))?;
        let filter = action.filter_formula().cloned();
        let mut counts = Vec::with_capacity(action.conditions.len());
        for condition in &mut action.conditions {
            let n = condition.refresh_count(frame, filter.as_ref())?;
            counts.push((condition.name.clone(), n));
        }
        Ok(counts)
    }

    // -- views ---------------------------------------------------------------

    fn check_view(&self, view: &View) -> Result<(), CoreError> {
        let keys = self.key_names();
        view.validate(&self.typing(), &|c: &str| keys.contains(c))
    }

    pub fn add_view(&mut self, view: View) -> Result<&View, CoreError> {
        if self.views.iter().any(|v| v.name == view.name) {
            return Err(CoreError::Conflict(format!("View '{}' already exists", view.name)));
        }
        self.check_view(&view)?;
        let name = view.name.clone();
        self.views.push(view);
        self.view(&name)
    }

    pub fn update_view(
        &mut self,
        name: &str,
        new_name: Option<String>,
        columns: Option<Vec<String>>,
        filter: Option<Option<Formula>>,
        description: Option<String>,
    ) -> Result<&View, CoreError> {
        let mut view = self.view(name)?.clone();
        if let Some(new_name) = new_name {
            if new_name != name && self.views.iter().any(|v| v.name == new_name) {
                return Err(CoreError::Conflict(format!("View '{new_name}' already exists")));
            }
            view.name = new_name;
        }
        if let Some(columns) = columns {
            view.columns = columns;
        }
        if let Some(filter) = filter {
            view.filter = filter;
            view.num_rows.invalidate();
        }
        if let Some(description) = description {
            view.description_text = description;
        }
        self.check_view(&view)?;
        let new_name = view.name.clone();
        *self.view_mut(name)? = view;
        self.view(&new_name)
    }

    pub fn delete_view(&mut self, name: &str) -> Result<View, CoreError> {
        let index = self
            .views
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| CoreError::named_not_found("View", name))?;
        Ok(self.views.remove(index))
    }

    pub fn clone_view(&mut self, name: &str, new_name: &str) -> Result<&View, CoreError> {
        let copy = self.view(name)?.clone_detached(new_name);
        self.add_view(copy)
    }

    pub fn view_data(&mut self, name: &str) -> Result<TypedFrame, CoreError> {
        let frame = &self.frame;
        let view = self
            .views
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| CoreError::named_not_found("View", name))?;
        let data = view.data(frame)?;
        view.num_rows.set(data.nrows());
        Ok(data)
    }

    // -- runs ----------------------------------------------------------------

    /// Read-only snapshot for running or previewing an action.
    pub fn run_context(&self, action: &str, now: Timestamp) -> Result<RunContext<'_>, CoreError> {
        Ok(RunContext::new(
            self.action(action)?,
            &self.columns,
            &self.frame,
            &self.attributes,
            self.time_zone,
            now,
        ))
    }

    /// Keep what a finished run learned about its conditions.
    pub fn record_run(&mut self, action: &str, summary: &RunSummary) -> Result<(), CoreError> {
        let action = self.action_mut(action)?;
        match summary.rows_all_false {
            Some(flag) => action.rows_all_false.set(flag),
            None => action.rows_all_false.invalidate(),
        }
        Ok(())
    }

    fn survey_row(
        &self,
        action: &str,
        key_value: &Value,
        now: Timestamp,
    ) -> Result<(crate::frame::Row, BTreeMap<String, bool>, Artifact), CoreError> {
        let ctx = self.run_context(action, now)?;
        if !ctx.action.action_type.is_form() {
            return Err(CoreError::Validation(format!("Action '{action}' is not a survey")));
        }
        let key = ctx
            .key_column()
            .ok_or_else(|| CoreError::KeyColumnConstraintViolation("The workflow has no key column".into()))?;
        let expansion = ctx.expand(None)?;
        let index = expansion
            .rows()
            .iter()
            .position(|r| matches!(r.get(&key.name), Some(Some(v)) if v.same_as(key_value)))
            .ok_or_else(|| CoreError::named_not_found("Row", key_value.render(&self.time_zone)))?;
        let row = expansion.rows()[index].clone();
        let outcome = expansion.outcome_at(index);
        let artifact = outcome
            .artifact
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        Ok((row, outcome.conditions, artifact))
    }

    /// The form a learner sees for the row with key `key_value`.
    pub fn survey_form(&self, action: &str, key_value: &Value, now: Timestamp) -> Result<SurveyForm, CoreError> {
        match self.survey_row(action, key_value, now)?.2 {
            Artifact::Form(form) => Ok(form),
            _ => Err(CoreError::Internal("Survey action produced no form".into())),
        }
    }

    /// Validate a submitted form and write it to the row. Returns the
    /// updated columns.
    pub fn submit_survey(
        &mut self,
        action: &str,
        key_value: &Value,
        submitted: &BTreeMap<String, String>,
        now: Timestamp,
    ) -> Result<Vec<String>, CoreError> {
        let (row, conditions, _) = self.survey_row(action, key_value, now)?;
        let updates = parse_submission(
            self.action(action)?,
            &self.columns,
            &row,
            &conditions,
            submitted,
            now,
            &self.time_zone,
        )?;
        let key = self
            .key_columns()
            .min_by_key(|c| c.position)
            .map(|c| c.name.clone())
            .ok_or_else(|| CoreError::KeyColumnConstraintViolation("The workflow has no key column".into()))?;
        self.update_row(&key, key_value, &updates)?;
        Ok(updates.into_iter().map(|(name, _)| name).collect())
    }

    // -- cloning -------------------------------------------------------------

    /// Deep copy with no identities and stale caches.
    pub fn clone_detached(&self, name: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.id = None;
        copy.name = name.into();
        copy.actions = self
            .actions
            .iter()
            .map(|a| a.clone_detached(a.name.clone()))
            .collect();
        copy.views = self
            .views
            .iter()
            .map(|v| v.clone_detached(v.name.clone()))
            .collect();
        copy.query_builder_ops.invalidate();
        copy.frame_dirty = true;
        copy
    }

    // -- invariants ----------------------------------------------------------

    /// Verify every cross-entity invariant, reporting the first violation.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        let broken = |msg: String| Err(CoreError::Internal(format!("Invariant violated: {msg}")));

        if self.columns.len() != self.frame.ncols() {
            return broken(format!("{} columns for {} table columns", self.columns.len(), self.frame.ncols()));
        }
        for (i, (column, fc)) in self.columns.iter().zip(self.frame.columns()).enumerate() {
            if column.name != fc.name || column.data_type != fc.data_type {
                return broken(format!("column '{}' does not match the table", column.name));
            }
            if column.position != i as i32 + 1 {
                return broken(format!("column '{}' has position {}", column.name, column.position));
            }
        }
        if !self.frame.is_empty() && self.key_columns().next().is_none() {
            return broken("no key column".into());
        }
        if let Err(e) = self.validate_frame(&self.frame) {
            return broken(e.to_string());
        }

        let typing = self.typing();
        let mut names = BTreeSet::new();
        for action in &self.actions {
            if !names.insert(&action.name) {
                return broken(format!("action '{}' appears twice", action.name));
            }
            if let Err(e) = action.validate(&typing) {
                return broken(e.to_string());
            }
            let mut conditions = BTreeSet::new();
            for condition in action.row_conditions() {
                if !conditions.insert(&condition.name) {
                    return broken(format!("condition '{}' appears twice", condition.name));
                }
            }
            for condition in &action.conditions {
                if let Some(n) = condition.n_rows_selected.value() {
                    let filter = action.filter_formula();
                    if condition.count_selected(&self.frame, filter)? != n {
                        return broken(format!("stale count on condition '{}'", condition.name));
                    }
                }
            }
            // A windowed column makes the cached flag depend on the run time.
            let time_dependent = self.columns.iter().any(Column::is_windowed);
            if action.rows_all_false.value() == Some(true) && !time_dependent {
                let ctx = RunContext::new(action, &self.columns, &self.frame, &self.attributes, self.time_zone, chrono::Utc::now());
                if !ctx.expand(None)?.rows_all_false()? {
                    return broken(format!("action '{}' has a row satisfying a condition", action.name));
                }
            }
        }

        let keys = self.key_names();
        let mut names = BTreeSet::new();
        for view in &self.views {
            if !names.insert(&view.name) {
                return broken(format!("view '{}' appears twice", view.name));
            }
            if let Err(e) = view.validate(&typing, &|c: &str| keys.contains(c)) {
                return broken(e.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::formula::{Operand, Operator};
    use crate::merge::{CollisionPolicy, MergeHow};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use serde_json::json;

    fn records(value: serde_json::Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    fn workflow() -> Workflow {
        let mut wf = Workflow::new(1, "course");
        wf.store_records(&records(json!([
            {"sid": 1, "name": "Ada", "score": 65},
            {"sid": 2, "name": "Bo", "score": 30},
            {"sid": 3, "name": "Cy", "score": 80},
        ])))
        .unwrap();
        wf
    }

    fn score_at_least(n: i64) -> Formula {
        Formula::leaf("score", Operator::GreaterOrEqual, DataType::Integer, Operand::Single(Value::Integer(n)))
    }

    fn with_action(wf: &mut Workflow) {
        let mut action = Action::new("feedback", ActionType::PersonalizedText);
        action.add_condition(Condition::new("passed", score_at_least(50))).unwrap();
        action.set_text_content("{% if passed %}yes{% endif %}").unwrap();
        wf.add_action(action).unwrap();
    }

    #[test]
    fn store_derives_columns_and_keys() {
        let wf = workflow();
        assert_eq!(wf.nrows(), 3);
        assert_eq!(wf.ncols(), 3);
        let keys: Vec<&str> = wf.key_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(keys, vec!["sid", "name", "score"]);
        wf.check_invariants().unwrap();
    }

    #[test]
    fn store_rejects_schema_mismatch() {
        let mut wf = workflow();
        let err = wf.store_records(&records(json!([{"sid": 1, "nickname": "A"}])));
        assert_matches!(err, Err(CoreError::SchemaMismatch(_)));
        assert_eq!(wf.nrows(), 3);
    }

    #[test]
    fn merge_outer_adds_column_and_rows() {
        let mut wf = Workflow::new(1, "course");
        wf.store_records(&records(json!([
            {"sid": 1, "email": "a"},
            {"sid": 2, "email": "b"},
            {"sid": 3, "email": "c"},
        ])))
        .unwrap();
        let source = TypedFrame::from_records(
            &records(json!([{"sid": 1, "new": "x"}, {"sid": 2, "new": "y"}, {"sid": 4, "new": "z"}])),
            &utc(),
        )
        .unwrap();
        let spec = MergeSpec {
            how: MergeHow::Outer,
            left_on: "sid".into(),
            right_on: "sid".into(),
            column_select: Vec::new(),
            rename_map: BTreeMap::new(),
            collision_policy: CollisionPolicy::Override,
            manual_suffixes: BTreeMap::new(),
        };
        let report = wf.merge(source, &spec, None).unwrap();
        assert_eq!((report.nrows, report.ncols), (4, 3));
        assert_eq!(report.added_columns, vec!["new"]);
        assert_eq!(report.demoted_keys, vec!["email"]);
        assert!(!wf.column("email").unwrap().is_key);
        wf.check_invariants().unwrap();
    }

    #[test]
    fn formula_row_evaluation_scenario() {
        let f = Formula::And(vec![
            score_at_least(50),
            Formula::leaf("score", Operator::Less, DataType::Integer, Operand::Single(Value::Integer(80))),
        ]);
        let hit: crate::frame::Row = [("score".to_string(), Some(Value::Integer(65)))].into_iter().collect();
        let null: crate::frame::Row = [("score".to_string(), None)].into_iter().collect();
        assert!(formula::evaluate_row(&f, &hit).unwrap());
        assert!(!formula::evaluate_row(&f, &null).unwrap());
    }

    #[test]
    fn json_action_flags_null_score() {
        let mut wf = Workflow::new(1, "course");
        wf.store_records(&records(json!([
            {"sid": 1, "email": "a@x", "score": 65},
            {"sid": 2, "email": "a@x", "score": null},
        ])))
        .unwrap();
        let mut action = Action::new("push", ActionType::PersonalizedJson);
        action.set_text_content("{\"u\":\"{{ email }}\",\"v\":{{ score }}}").unwrap();
        wf.add_action(action).unwrap();
        let ctx = wf.run_context("push", Utc::now()).unwrap();
        let outcomes: Vec<_> = ctx.expand(None).unwrap().collect();
        assert_eq!(outcomes[0].artifact, Ok(Artifact::Json(json!({"u": "a@x", "v": 65.0}))));
        assert_matches!(outcomes[1].artifact, Ok(Artifact::IncorrectJson(_)));
    }

    #[test]
    fn column_delete_cascades() {
        let mut wf = workflow();
        wf.update_column(
            "name",
            ColumnUpdate {
                is_key: Some(false),
                ..ColumnUpdate::default()
            },
        )
        .unwrap();
        with_action(&mut wf);
        wf.add_view(View::new("scores", vec!["score".into(), "name".into()], None)).unwrap();
        wf.add_view(View::new("roster", vec!["sid".into(), "name".into()], Some(score_at_least(0)))).unwrap();
        wf.edit_action("feedback", |a| {
            a.rows_all_false.set(false);
            Ok(())
        })
        .unwrap();

        let report = wf.delete_column("score").unwrap();
        assert_eq!(
            report.removed_conditions,
            vec![ConditionRef {
                action: "feedback".into(),
                condition: "passed".into()
            }]
        );
        assert_eq!(report.deleted_views, vec!["scores"]);
        assert_eq!(report.updated_views, vec!["roster"]);
        let action = wf.action("feedback").unwrap();
        assert!(action.conditions.is_empty());
        assert!(action.rows_all_false.is_stale());
        assert!(wf.view("roster").unwrap().filter.is_none());
        assert_eq!(wf.ncols(), 2);
        assert_eq!(wf.column("name").unwrap().position, 2);
    }

    #[test]
    fn action_still_renders_after_its_condition_column_is_deleted() {
        let mut wf = workflow();
        wf.update_column("name", ColumnUpdate { is_key: Some(false), ..ColumnUpdate::default() })
            .unwrap();
        with_action(&mut wf);
        wf.edit_action("feedback", |a| {
            a.set_text_content("Hi {{ name }}{% if passed %}, well done{% else %}.{% endif %}")
        })
        .unwrap();

        wf.delete_column("score").unwrap();
        let action = wf.action("feedback").unwrap();
        assert_eq!(action.text_content, "Hi {{ name }}.");

        let ctx = wf.run_context("feedback", Utc::now()).unwrap();
        let preview = ctx.preview(0).unwrap();
        assert_eq!(preview.outcome.artifact, Ok(Artifact::Html("Hi Ada.".into())));
        wf.check_invariants().unwrap();
    }

    #[test]
    fn all_false_recorded_before_a_window_opens_stays_consistent() {
        let mut wf = workflow();
        with_action(&mut wf);
        let opened = Utc::now() - chrono::Duration::hours(1);
        wf.update_column(
            "score",
            ColumnUpdate {
                active_from: Some(Some(opened)),
                ..ColumnUpdate::default()
            },
        )
        .unwrap();

        let earlier = opened - chrono::Duration::hours(1);
        let all_false = wf
            .run_context("feedback", earlier)
            .unwrap()
            .expand(None)
            .unwrap()
            .rows_all_false()
            .unwrap();
        assert!(all_false);
        wf.edit_action("feedback", |a| {
            a.rows_all_false.set(all_false);
            Ok(())
        })
        .unwrap();
        // score is visible now and Ada passes, yet the recorded flag is valid
        wf.check_invariants().unwrap();
    }

    #[test]
    fn deleting_a_condition_drops_its_text_branches() {
        let mut wf = workflow();
        with_action(&mut wf);
        let removed = wf.delete_condition("feedback", "passed").unwrap();
        assert_eq!(removed.name, "passed");
        assert_eq!(wf.action("feedback").unwrap().text_content, "");
        assert_matches!(
            wf.delete_condition("feedback", "passed"),
            Err(CoreError::NamedNotFound { entity: "Condition", .. })
        );
    }

    #[test]
    fn last_key_column_cannot_be_deleted() {
        let mut wf = workflow();
        for name in ["name", "score"] {
            wf.update_column(name, ColumnUpdate { is_key: Some(false), ..ColumnUpdate::default() })
                .unwrap();
        }
        assert_matches!(wf.delete_column("sid"), Err(CoreError::KeyColumnConstraintViolation(_)));
        assert_matches!(
            wf.update_column("sid", ColumnUpdate { is_key: Some(false), ..ColumnUpdate::default() }),
            Err(CoreError::KeyColumnConstraintViolation(_))
        );
    }

    #[test]
    fn rename_column_propagates() {
        let mut wf = workflow();
        with_action(&mut wf);
        wf.set_text_content("feedback", "{{ score }} {% if passed %}yes{% endif %}").unwrap();
        wf.add_view(View::new("v", vec!["sid".into(), "score".into()], None)).unwrap();
        let updated = wf.rename_column("score", "mark").unwrap();
        assert_eq!(updated, vec!["feedback"]);
        let action = wf.action("feedback").unwrap();
        assert!(action.text_content.starts_with("{{ mark }}"));
        assert!(action.conditions[0].formula.references("mark"));
        assert_eq!(wf.view("v").unwrap().columns, vec!["sid", "mark"]);
        wf.check_invariants().unwrap();
    }

    #[test]
    fn update_row_checks_keys_and_promotes() {
        let mut wf = workflow();
        assert_matches!(
            wf.update_row("sid", &Value::Integer(1), &[("sid".into(), Some(Value::Integer(2)))]),
            Err(CoreError::KeyColumnConstraintViolation(_))
        );
        wf.update_column("score", ColumnUpdate { is_key: Some(false), ..ColumnUpdate::default() })
            .unwrap();
        with_action(&mut wf);
        wf.update_row("sid", &Value::Integer(2), &[("score".into(), None)]).unwrap();
        assert_eq!(wf.column("score").unwrap().data_type, DataType::Double);
        let input_type = wf.action("feedback").unwrap().conditions[0].formula.leaves()[0].input_type;
        assert_eq!(input_type, DataType::Double);
        wf.check_invariants().unwrap();
    }

    #[test]
    fn condition_counts_respect_filter() {
        let mut wf = workflow();
        with_action(&mut wf);
        wf.set_filter("feedback", Some(score_at_least(70))).unwrap();
        let counts = wf.refresh_condition_counts("feedback").unwrap();
        assert!(counts.contains(&("passed".to_string(), 1)));
        assert!(counts.contains(&("filter".to_string(), 1)));
        wf.check_invariants().unwrap();

        wf.delete_row("sid", &Value::Integer(3)).unwrap();
        assert!(wf.action("feedback").unwrap().conditions[0].n_rows_selected.is_stale());
    }

    #[test]
    fn condition_formulas_are_checked_on_save() {
        let mut wf = workflow();
        with_action(&mut wf);
        let bad = Formula::leaf("ghost", Operator::IsNull, DataType::String, Operand::None);
        assert_matches!(
            wf.add_condition("feedback", Condition::new("ghostly", bad)),
            Err(CoreError::UnknownColumn(_))
        );
        let wrong_type = Formula::leaf("name", Operator::Less, DataType::Integer, Operand::Single(Value::Integer(1)));
        assert!(wf.add_condition("feedback", Condition::new("odd", wrong_type)).is_err());
    }

    #[test]
    fn clones_are_detached() {
        let mut wf = workflow();
        with_action(&mut wf);
        wf.refresh_condition_counts("feedback").unwrap();
        wf.clone_condition("feedback", "passed", "passed again", None).unwrap();
        let action = wf.action("feedback").unwrap();
        assert!(action.condition("passed again").unwrap().n_rows_selected.is_stale());

        wf.clone_action("feedback", "feedback 2").unwrap();
        let copy = wf.clone_detached("course copy");
        assert_eq!(copy.id, None);
        assert_eq!(copy.actions().len(), 2);
        assert!(copy.frame_changed());
        copy.check_invariants().unwrap();
    }

    #[test]
    fn survey_round_trip() {
        let mut wf = workflow();
        wf.add_column(ColumnSpec {
            categories: vec![Value::String("good".into()), Value::String("bad".into())],
            ..ColumnSpec::new("mood", DataType::String)
        })
        .unwrap();
        let mut action = Action::new("check-in", ActionType::Survey);
        action.column_condition_tuples.push(ActionColumnConditionTuple::new("mood"));
        action.set_text_content("How are you?").unwrap();
        wf.add_action(action).unwrap();

        let form = wf.survey_form("check-in", &Value::Integer(2), Utc::now()).unwrap();
        assert_eq!(form.fields.len(), 1);
        assert_eq!(form.description_html, "How are you?");

        let answer = BTreeMap::from([("mood".to_string(), "good".to_string())]);
        let updated = wf.submit_survey("check-in", &Value::Integer(2), &answer, Utc::now()).unwrap();
        assert_eq!(updated, vec!["mood"]);
        let index = wf.frame().find_row("sid", &Value::Integer(2)).unwrap().unwrap();
        assert_eq!(wf.frame().cell(index, "mood"), Some(&Some(Value::String("good".into()))));
    }

    #[test]
    fn query_builder_ops_follow_columns() {
        let mut wf = workflow();
        assert_eq!(wf.query_builder_ops().as_array().unwrap().len(), 3);
        wf.add_column(ColumnSpec::new("extra", DataType::Boolean)).unwrap();
        assert!(wf.cached_query_builder_ops().is_none());
        assert_eq!(wf.query_builder_ops().as_array().unwrap().len(), 4);
    }

    #[test]
    fn attributes_cannot_shadow_columns() {
        let mut wf = workflow();
        assert_matches!(wf.set_attribute("name", "x"), Err(CoreError::Conflict(_)));
        wf.set_attribute("course", "Intro").unwrap();
        assert_matches!(
            wf.add_column(ColumnSpec::new("course", DataType::String)),
            Err(CoreError::Conflict(_))
        );
    }
}
