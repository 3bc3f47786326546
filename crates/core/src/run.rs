//! Action execution.
//!
//! [`RunContext::expand`] is the pure half: it selects the participating rows
//! and yields one [`RowOutcome`] per row (one in total for `json_report`).
//! [`execute_run`] is the effectful half: it walks the expansion, hands
//! artifacts to an [`ArtifactTransport`] and builds a [`RunReport`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::action::{Action, ActionType};
use crate::column::Column;
use crate::error::CoreError;
use crate::formula::{FormulaEvaluator, Predicate, PredicateBuilder};
use crate::frame::{Row, TypedFrame};
use crate::rubric::rubric_feedback_html;
use crate::statistics::{get_column_statistics, ColumnStatistics};
use crate::survey::build_form;
use crate::template::visualization::histogram_html;
use crate::template::{escape_html, EvaluationContext, RenderOptions, TagSource, Template, TemplateError};
use crate::transport::{Artifact, ArtifactTransport, Delivery};
use crate::types::{TimeZone, Timestamp};
use crate::value::{cell_to_json, Cell, Value};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Snapshot an action run reads from. Nothing here is mutated by a run.
#[derive(Debug, Clone)]
pub struct RunContext<'a> {
    pub action: &'a Action,
    pub columns: &'a [Column],
    pub frame: &'a TypedFrame,
    pub attributes: &'a BTreeMap<String, String>,
    pub time_zone: TimeZone,
    pub now: Timestamp,
}

impl<'a> RunContext<'a> {
    pub fn new(
        action: &'a Action,
        columns: &'a [Column],
        frame: &'a TypedFrame,
        attributes: &'a BTreeMap<String, String>,
        time_zone: TimeZone,
        now: Timestamp,
    ) -> Self {
        Self {
            action,
            columns,
            frame,
            attributes,
            time_zone,
            now,
        }
    }

    /// First key column by position.
    pub fn key_column(&self) -> Option<&'a Column> {
        self.columns
            .iter()
            .filter(|c| c.is_key)
            .min_by_key(|c| c.position)
    }

    fn compile(&self, formula: &crate::formula::Formula) -> Result<Predicate, CoreError> {
        let typing = |name: &str| self.frame.data_type(name);
        PredicateBuilder::new(&typing).evaluate(formula)
    }

    /// Rows passing the action's filter, with inactive columns masked to
    /// null, in key-ascending order.
    pub fn selected_rows(&self) -> Result<Vec<Row>, CoreError> {
        let inactive: BTreeSet<&str> = self
            .columns
            .iter()
            .filter(|c| !c.is_active_at(self.now))
            .map(|c| c.name.as_str())
            .collect();
        let filter = self
            .action
            .filter_formula()
            .map(|f| self.compile(f))
            .transpose()?;

        let mut rows = Vec::new();
        for mut row in self.frame.rows() {
            for name in &inactive {
                if let Some(cell) = row.get_mut(*name) {
                    *cell = None;
                }
            }
            let keep = match &filter {
                Some(predicate) => predicate.matches(&row)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }
        if let Some(key) = self.key_column() {
            rows.sort_by(|a, b| compare_cells(a.get(&key.name), b.get(&key.name)));
        }
        Ok(rows)
    }

    /// Prepare the expansion. `recipient_column` names the column holding
    /// each row's address, if any.
    pub fn expand(&self, recipient_column: Option<&str>) -> Result<Expansion<'_>, CoreError> {
        if let Some(column) = recipient_column {
            if !self.frame.has_column(column) {
                return Err(CoreError::UnknownColumn(column.to_string()));
            }
        }
        let template = self.action.template()?;
        let conditions = self
            .action
            .row_conditions()
            .map(|c| Ok((c.name.clone(), self.compile(&c.formula)?)))
            .collect::<Result<Vec<_>, CoreError>>()?;
        let rows = self.selected_rows()?;

        let mut statistics = BTreeMap::new();
        for column in template.tag_columns() {
            if !self.frame.has_column(&column) {
                return Err(TemplateError::UndefinedVariable(column).into());
            }
            let values: Vec<Cell> = rows.iter().map(|r| r.get(&column).cloned().flatten()).collect();
            let stats = get_column_statistics(&values, &self.time_zone);
            statistics.insert(column, stats);
        }

        Ok(Expansion {
            ctx: self,
            template,
            conditions,
            rows,
            statistics,
            key_column: self.key_column().map(|c| c.name.clone()),
            recipient_column: recipient_column.map(str::to_string),
            next: 0,
        })
    }

    /// Render row `index` of the selection, wrapping around at both ends.
    pub fn preview(&self, index: usize) -> Result<Preview, CoreError> {
        let expansion = self.expand(None)?;
        let total = expansion.total();
        if total == 0 {
            return Err(CoreError::Validation(format!(
                "Action '{}' selects no rows",
                self.action.name
            )));
        }
        let index = index % total;
        Ok(Preview {
            index,
            total,
            prev: (index + total - 1) % total,
            next: (index + 1) % total,
            outcome: expansion.outcome_at(index),
        })
    }
}

fn compare_cells(a: Option<&Cell>, b: Option<&Cell>) -> Ordering {
    match (a.cloned().flatten(), b.cloned().flatten()) {
        (Some(a), Some(b)) => a.compare(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Row {index}: {message}")]
pub struct RowError {
    pub index: usize,
    pub message: String,
}

/// Result of expanding one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    pub index: usize,
    pub row_key: Cell,
    pub recipient: Option<String>,
    pub conditions: BTreeMap<String, bool>,
    pub artifact: Result<Artifact, RowError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub index: usize,
    pub total: usize,
    pub prev: usize,
    pub next: usize,
    pub outcome: RowOutcome,
}

/// Iterator over the artifacts of a run.
#[derive(Debug)]
pub struct Expansion<'c> {
    ctx: &'c RunContext<'c>,
    template: Template,
    conditions: Vec<(String, Predicate)>,
    rows: Vec<Row>,
    statistics: BTreeMap<String, ColumnStatistics>,
    key_column: Option<String>,
    recipient_column: Option<String>,
    next: usize,
}

impl<'c> Expansion<'c> {
    /// Participating rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of outcomes the iterator yields.
    pub fn total(&self) -> usize {
        if self.ctx.action.action_type.is_report() {
            1
        } else {
            self.rows.len()
        }
    }

    fn options(&self) -> RenderOptions {
        let action_type = self.ctx.action.action_type;
        RenderOptions {
            time_zone: self.ctx.time_zone,
            escape_html: action_type.is_html(),
            column_list_as_json: action_type.is_report(),
        }
    }

    fn condition_map(&self, row: &Row) -> Result<BTreeMap<String, bool>, CoreError> {
        self.conditions
            .iter()
            .map(|(name, predicate)| Ok((name.clone(), predicate.matches(row)?)))
            .collect()
    }

    /// Whether every non-filter condition is false on every selected row.
    /// Actions without conditions report false.
    pub fn rows_all_false(&self) -> Result<bool, CoreError> {
        if self.conditions.is_empty() {
            return Ok(false);
        }
        for row in &self.rows {
            if self.condition_map(row)?.values().any(|v| *v) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Expand the outcome at `index` without advancing the iterator.
    pub fn outcome_at(&self, index: usize) -> RowOutcome {
        if self.ctx.action.action_type.is_report() {
            let empty = Row::new();
            let artifact = self
                .render(&empty, &BTreeMap::new())
                .map(|text| self.finish(text, &empty, &BTreeMap::new()))
                .map_err(|e| RowError {
                    index,
                    message: e.to_string(),
                });
            return RowOutcome {
                index,
                row_key: None,
                recipient: None,
                conditions: BTreeMap::new(),
                artifact,
            };
        }

        let row = &self.rows[index];
        let row_key = self
            .key_column
            .as_ref()
            .and_then(|k| row.get(k).cloned().flatten());
        let recipient = self
            .recipient_column
            .as_ref()
            .and_then(|c| row.get(c))
            .and_then(|c| c.as_ref())
            .map(|v| v.render(&self.ctx.time_zone));

        let (conditions, artifact) = match self.condition_map(row) {
            Ok(conditions) => {
                let artifact = self
                    .render(row, &conditions)
                    .map(|text| self.finish(text, row, &conditions))
                    .map_err(|e| RowError {
                        index,
                        message: e.to_string(),
                    });
                (conditions, artifact)
            }
            Err(e) => (
                BTreeMap::new(),
                Err(RowError {
                    index,
                    message: e.to_string(),
                }),
            ),
        };
        RowOutcome {
            index,
            row_key,
            recipient,
            conditions,
            artifact,
        }
    }

    fn render(&self, row: &Row, conditions: &BTreeMap<String, bool>) -> Result<String, TemplateError> {
        let ctx = EvaluationContext {
            columns: row,
            attributes: self.ctx.attributes,
            conditions,
        };
        self.template.render(&ctx, &self.options(), self)
    }

    fn finish(&self, text: String, row: &Row, conditions: &BTreeMap<String, bool>) -> Artifact {
        let ctx = self.ctx;
        match ctx.action.action_type {
            ActionType::PersonalizedText | ActionType::RubricText => Artifact::Html(text),
            ActionType::PersonalizedCanvasEmail => Artifact::CanvasHtml(escape_html(&text)),
            ActionType::PersonalizedJson | ActionType::JsonReport => match serde_json::from_str(&text) {
                Ok(json) => Artifact::Json(json),
                Err(_) => Artifact::IncorrectJson(text),
            },
            ActionType::Survey | ActionType::TodoList => Artifact::Form(build_form(
                ctx.action,
                ctx.columns,
                self.key_column.as_deref().unwrap_or_default(),
                row,
                conditions,
                text,
                ctx.now,
                &ctx.time_zone,
            )),
        }
    }
}

impl TagSource for Expansion<'_> {
    fn visualization(&self, column: &str, current: Option<&Value>) -> Result<String, TemplateError> {
        let stats = self
            .statistics
            .get(column)
            .ok_or_else(|| TemplateError::UndefinedVariable(column.to_string()))?;
        Ok(histogram_html(column, stats, current, &self.ctx.time_zone))
    }

    fn rubric_feedback(&self, row: &Row) -> Result<String, TemplateError> {
        let action = self.ctx.action;
        if action.action_type != ActionType::RubricText {
            return Err(TemplateError::UnsupportedTag("rubric_feedback"));
        }
        let criteria: Vec<&Column> = action
            .column_condition_tuples
            .iter()
            .filter_map(|t| self.ctx.columns.iter().find(|c| c.name == t.column))
            .collect();
        Ok(rubric_feedback_html(&action.rubric_cells, &criteria, row))
    }

    fn column_values(&self, column: &str) -> Result<Vec<Cell>, TemplateError> {
        if !self.ctx.frame.has_column(column) {
            return Err(TemplateError::UndefinedVariable(column.to_string()));
        }
        Ok(self.rows.iter().map(|r| r.get(column).cloned().flatten()).collect())
    }
}

impl Iterator for Expansion<'_> {
    type Item = RowOutcome;

    fn next(&mut self) -> Option<RowOutcome> {
        if self.next >= self.total() {
            return None;
        }
        let outcome = self.outcome_at(self.next);
        self.next += 1;
        Some(outcome)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total().saturating_sub(self.next);
        (left, Some(left))
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Per-run parameters, also stored as the payload of scheduled runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub recipient_column: Option<String>,
    pub subject: Option<String>,
    /// Overrides the action's target URL.
    pub target_url: Option<String>,
    /// Rendered key values to skip.
    pub exclude_keys: Vec<String>,
    pub abort_on_first_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
    Delivered,
    /// Produced but not transmitted (forms).
    Rendered,
    Excluded,
    IncorrectJson,
    RenderError { message: String },
    TransportError { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowRecord {
    pub index: usize,
    pub row_key: serde_json::Value,
    pub recipient: Option<String>,
    pub conditions: BTreeMap<String, bool>,
    #[serde(flatten)]
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub action: String,
    pub action_type: ActionType,
    pub total_rows: usize,
    pub delivered: usize,
    pub rendered: usize,
    pub excluded: usize,
    pub incorrect_json: usize,
    pub render_errors: usize,
    pub transport_errors: usize,
    /// Index of the first row not processed because of cancellation.
    pub cancelled_at: Option<usize>,
    /// Index of the row whose failure aborted the run.
    pub aborted_at: Option<usize>,
    /// None when the run stopped early.
    pub rows_all_false: Option<bool>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub rows: Vec<RowRecord>,
}

/// Expand the action and deliver every artifact.
pub async fn execute_run(
    ctx: &RunContext<'_>,
    options: &RunOptions,
    transport: &dyn ArtifactTransport,
    cancel: &CancellationToken,
) -> Result<RunReport, CoreError> {
    let started_at = chrono::Utc::now();
    let action = ctx.action;
    let expansion = ctx.expand(options.recipient_column.as_deref())?;
    let total_rows = expansion.total();
    let is_report = action.action_type.is_report();
    let report_all_false = if is_report {
        Some(expansion.rows_all_false()?)
    } else {
        None
    };
    let target_url = options.target_url.as_deref().or(action.target_url.as_deref());

    tracing::info!(
        action = %action.name,
        action_type = %action.action_type,
        rows = total_rows,
        transport = transport.name(),
        "Starting action run"
    );

    let mut summary = RunSummary {
        action: action.name.clone(),
        action_type: action.action_type,
        total_rows,
        delivered: 0,
        rendered: 0,
        excluded: 0,
        incorrect_json: 0,
        render_errors: 0,
        transport_errors: 0,
        cancelled_at: None,
        aborted_at: None,
        rows_all_false: None,
        started_at,
        finished_at: started_at,
    };
    let mut rows = Vec::with_capacity(total_rows);

    for outcome in expansion {
        if cancel.is_cancelled() {
            tracing::info!(action = %action.name, index = outcome.index, "Action run cancelled");
            summary.cancelled_at = Some(outcome.index);
            break;
        }

        let key_text = outcome
            .row_key
            .as_ref()
            .map(|v| v.render(&ctx.time_zone));
        let excluded = key_text
            .as_ref()
            .is_some_and(|k| options.exclude_keys.iter().any(|e| e == k));

        let (status, artifact) = if excluded {
            summary.excluded += 1;
            (RowStatus::Excluded, None)
        } else {
            match &outcome.artifact {
                Err(e) => {
                    summary.render_errors += 1;
                    (
                        RowStatus::RenderError {
                            message: e.to_string(),
                        },
                        None,
                    )
                }
                Ok(artifact @ Artifact::IncorrectJson(_)) => {
                    summary.incorrect_json += 1;
                    (RowStatus::IncorrectJson, Some(artifact.clone()))
                }
                Ok(artifact @ Artifact::Form(_)) => {
                    summary.rendered += 1;
                    (RowStatus::Rendered, Some(artifact.clone()))
                }
                Ok(artifact) => {
                    let delivery = Delivery {
                        action: &action.name,
                        action_type: action.action_type,
                        index: outcome.index,
                        row_key: &outcome.row_key,
                        recipient: outcome.recipient.as_deref(),
                        subject: options.subject.as_deref(),
                        target_url,
                        artifact,
                    };
                    match transport.deliver(&delivery).await {
                        Ok(()) => {
                            summary.delivered += 1;
                            (RowStatus::Delivered, Some(artifact.clone()))
                        }
                        Err(e) => {
                            tracing::warn!(action = %action.name, index = outcome.index, error = %e, "Delivery failed");
                            summary.transport_errors += 1;
                            (
                                RowStatus::TransportError {
                                    message: e.to_string(),
                                },
                                Some(artifact.clone()),
                            )
                        }
                    }
                }
            }
        };

        let failed = matches!(status, RowStatus::TransportError { .. });
        rows.push(RowRecord {
            index: outcome.index,
            row_key: cell_to_json(&outcome.row_key),
            recipient: outcome.recipient,
            conditions: outcome.conditions,
            status,
            artifact,
        });
        if failed && options.abort_on_first_failure {
            summary.aborted_at = Some(rows.len() - 1);
            break;
        }
    }

    let completed = summary.cancelled_at.is_none() && summary.aborted_at.is_none();
    summary.rows_all_false = match report_all_false {
        Some(flag) => Some(flag),
        None if !completed => None,
        None if !action.has_row_conditions() => Some(false),
        None => Some(rows.iter().all(|r| r.conditions.values().all(|v| !*v))),
    };
    if summary.rows_all_false == Some(true) {
        tracing::info!(action = %action.name, "No row satisfies any condition of the action");
    }
    summary.finished_at = chrono::Utc::now();

    tracing::info!(
        action = %action.name,
        delivered = summary.delivered,
        render_errors = summary.render_errors,
        transport_errors = summary.transport_errors,
        "Action run finished"
    );
    Ok(RunReport { summary, rows })
}
