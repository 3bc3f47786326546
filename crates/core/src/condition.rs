//! Conditions and filters.
//!
//! A condition is a named formula attached to an action. At most one
//! condition of an action is the filter, which narrows the rows taking part
//! in a run; the others are evaluated per row and drive `{% if %}` blocks and
//! column guards.

use serde::Serialize;

use crate::cache::Cached;
use crate::error::CoreError;
use crate::formula::{self, Formula};
use crate::frame::TypedFrame;
use crate::types::DbId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    #[serde(skip)]
    pub id: Option<DbId>,
    pub name: String,
    pub description_text: String,
    pub formula: Formula,
    pub is_filter: bool,
    pub n_rows_selected: Cached<usize>,
}

impl Condition {
    pub fn new(name: impl Into<String>, formula: Formula) -> Self {
        Self {
            id: None,
            name: name.into(),
            description_text: String::new(),
            formula,
            is_filter: false,
            n_rows_selected: Cached::stale(),
        }
    }

    pub fn filter(formula: Formula) -> Self {
        Self {
            is_filter: true,
            ..Self::new("filter", formula)
        }
    }

    /// Copy under a new name with no identity and a stale count.
    pub fn clone_detached(&self, name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            n_rows_selected: Cached::stale(),
            ..self.clone()
        }
    }

    /// Number of rows satisfying the formula and, when given, the action's
    /// filter.
    pub fn count_selected(&self, frame: &TypedFrame, filter: Option<&Formula>) -> Result<usize, CoreError> {
        let combined = match filter {
            Some(filter) if !self.is_filter => Formula::And(vec![filter.clone(), self.formula.clone()]),
            _ => self.formula.clone(),
        };
        Ok(formula::select_rows(frame, &combined)?.len())
    }

    /// Recompute the count if stale.
    pub fn refresh_count(&mut self, frame: &TypedFrame, filter: Option<&Formula>) -> Result<usize, CoreError> {
        if let Some(n) = self.n_rows_selected.value() {
            return Ok(n);
        }
        let n = self.count_selected(frame, filter)?;
        self.n_rows_selected.set(n);
        Ok(n)
    }
}
