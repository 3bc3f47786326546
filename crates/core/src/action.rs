//! Actions: named authoring units that produce one artifact per row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::Cached;
use crate::condition::Condition;
use crate::error::CoreError;
use crate::formula::Formula;
use crate::rubric::RubricCell;
use crate::template::{self, Template, TemplateError};
use crate::types::DbId;
use crate::value::DataType;

// ---------------------------------------------------------------------------
// Action type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    PersonalizedText,
    PersonalizedCanvasEmail,
    PersonalizedJson,
    JsonReport,
    RubricText,
    Survey,
    TodoList,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::PersonalizedText,
        ActionType::PersonalizedCanvasEmail,
        ActionType::PersonalizedJson,
        ActionType::JsonReport,
        ActionType::RubricText,
        ActionType::Survey,
        ActionType::TodoList,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::PersonalizedText => "personalized_text",
            ActionType::PersonalizedCanvasEmail => "personalized_canvas_email",
            ActionType::PersonalizedJson => "personalized_json",
            ActionType::JsonReport => "json_report",
            ActionType::RubricText => "rubric_text",
            ActionType::Survey => "survey",
            ActionType::TodoList => "todo_list",
        }
    }

    /// Produces HTML; substituted values are escaped.
    pub fn is_html(self) -> bool {
        matches!(
            self,
            ActionType::PersonalizedText
                | ActionType::PersonalizedCanvasEmail
                | ActionType::RubricText
                | ActionType::Survey
                | ActionType::TodoList
        )
    }

    /// Produces a JSON document that must parse.
    pub fn is_json(self) -> bool {
        matches!(self, ActionType::PersonalizedJson | ActionType::JsonReport)
    }

    /// Produces a form to be filled in rather than a message.
    pub fn is_form(self) -> bool {
        matches!(self, ActionType::Survey | ActionType::TodoList)
    }

    /// Renders once over the whole selection instead of once per row.
    pub fn is_report(self) -> bool {
        self == ActionType::JsonReport
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown action type '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A column used by an action, optionally guarded by a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionColumnConditionTuple {
    pub column: String,
    #[serde(default)]
    pub condition: Option<String>,
    /// Survey answers may be changed after submission.
    #[serde(default = "default_changes_allowed")]
    pub changes_allowed: bool,
}

fn default_changes_allowed() -> bool {
    true
}

impl ActionColumnConditionTuple {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            condition: None,
            changes_allowed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    #[serde(skip)]
    pub id: Option<DbId>,
    pub name: String,
    pub description_text: String,
    pub action_type: ActionType,
    pub text_content: String,
    pub target_url: Option<String>,
    /// Filter and ordinary conditions.
    pub conditions: Vec<Condition>,
    pub column_condition_tuples: Vec<ActionColumnConditionTuple>,
    pub rubric_cells: Vec<RubricCell>,
    pub rows_all_false: Cached<bool>,
}

impl Action {
    pub fn new(name: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            id: None,
            name: name.into(),
            description_text: String::new(),
            action_type,
            text_content: String::new(),
            target_url: None,
            conditions: Vec::new(),
            column_condition_tuples: Vec::new(),
            rubric_cells: Vec::new(),
            rows_all_false: Cached::stale(),
        }
    }

    // -- conditions ----------------------------------------------------------

    pub fn filter(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.is_filter)
    }

    pub fn filter_formula(&self) -> Option<&Formula> {
        self.filter().map(|c| &c.formula)
    }

    /// Conditions other than the filter, in definition order.
    pub fn row_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter().filter(|c| !c.is_filter)
    }

    pub fn has_row_conditions(&self) -> bool {
        self.row_conditions().next().is_some()
    }

    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.row_conditions().find(|c| c.name == name)
    }

    fn condition_mut(&mut self, name: &str) -> Result<&mut Condition, CoreError> {
        self.conditions
            .iter_mut()
            .find(|c| !c.is_filter && c.name == name)
            .ok_or_else(|| CoreError::named_not_found("Condition", name))
    }

    /// Replace the filter. Every count depends on it, so all are reset.
    pub fn set_filter(&mut self, formula: Option<Formula>) {
        self.conditions.retain(|c| !c.is_filter);
        if let Some(formula) = formula {
            self.conditions.insert(0, Condition::filter(formula));
        }
        self.invalidate_caches();
    }

    pub fn add_condition(&mut self, condition: Condition) -> Result<(), CoreError> {
        if condition.is_filter {
            self.set_filter(Some(condition.formula));
            return Ok(());
        }
        if self.condition(&condition.name).is_some() {
            return Err(CoreError::Conflict(format!(
                "Condition '{}' already exists in action '{}'",
                condition.name, self.name
            )));
        }
        self.conditions.push(condition);
        self.rows_all_false.invalidate();
        Ok(())
    }

    /// Replace a condition's formula.
    pub fn update_condition(&mut self, name: &str, formula: Formula, description: Option<String>) -> Result<(), CoreError> {
        let condition = self.condition_mut(name)?;
        condition.formula = formula;
        condition.n_rows_selected.invalidate();
        if let Some(description) = description {
            condition.description_text = description;
        }
        self.rows_all_false.invalidate();
        Ok(())
    }

    /// Remove a condition, unguard the tuples it guarded and drop the
    /// `{% if %}`/`{% elif %}` branches naming it from the text.
    pub fn remove_condition(&mut self, name: &str) -> Result<Condition, CoreError> {
        let index = self
            .conditions
            .iter()
            .position(|c| !c.is_filter && c.name == name)
            .ok_or_else(|| CoreError::named_not_found("Condition", name))?;
        let removed = self.conditions.remove(index);
        self.forget_condition(name);
        Ok(removed)
    }

    fn forget_condition(&mut self, name: &str) {
        for tuple in &mut self.column_condition_tuples {
            if tuple.condition.as_deref() == Some(name) {
                tuple.condition = None;
            }
        }
        match template::remove_condition(&self.text_content, name) {
            Ok(Some(text)) => self.text_content = text,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(action = %self.name, condition = %name, error = %e, "Text left unchanged");
            }
        }
        self.rows_all_false.invalidate();
    }

    pub fn rename_condition(&mut self, old: &str, new: &str) -> Result<(), CoreError> {
        if old == new {
            return Ok(());
        }
        if self.condition(new).is_some() {
            return Err(CoreError::Conflict(format!("Condition '{new}' already exists")));
        }
        self.condition_mut(old)?.name = new.to_string();
        self.text_content = template::rename_condition(&self.text_content, old, new);
        for tuple in &mut self.column_condition_tuples {
            if tuple.condition.as_deref() == Some(old) {
                tuple.condition = Some(new.to_string());
            }
        }
        Ok(())
    }

    // -- content -------------------------------------------------------------

    /// Parse the template and check its `{% if %}` names against the
    /// action's conditions.
    pub fn template(&self) -> Result<Template, CoreError> {
        let template = Template::parse(&self.text_content)?;
        for name in template.condition_names() {
            if self.condition(&name).is_none() {
                return Err(TemplateError::UndefinedCondition(name).into());
            }
        }
        Ok(template)
    }

    pub fn set_text_content(&mut self, text: impl Into<String>) -> Result<(), CoreError> {
        let previous = std::mem::replace(&mut self.text_content, text.into());
        if let Err(err) = self.template() {
            self.text_content = previous;
            return Err(err);
        }
        Ok(())
    }

    // -- columns -------------------------------------------------------------

    /// Whether anything in the action mentions `column`.
    pub fn references_column(&self, column: &str) -> bool {
        self.conditions.iter().any(|c| c.formula.references(column))
            || self.column_condition_tuples.iter().any(|t| t.column == column)
            || self.rubric_cells.iter().any(|c| c.column == column)
            || Template::parse(&self.text_content)
                .map(|t| t.variables().contains(column) || t.tag_columns().contains(column))
                .unwrap_or(false)
    }

    /// Propagate a column rename. Returns whether the action changed.
    pub fn rename_column(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for condition in &mut self.conditions {
            if condition.formula.rename_column(old, new) {
                condition.n_rows_selected.invalidate();
                changed = true;
            }
        }
        for tuple in &mut self.column_condition_tuples {
            if tuple.column == old {
                tuple.column = new.to_string();
                changed = true;
            }
        }
        for cell in &mut self.rubric_cells {
            if cell.column == old {
                cell.column = new.to_string();
                changed = true;
            }
        }
        let text = template::rename_variable(&self.text_content, old, new);
        if text != self.text_content {
            self.text_content = text;
            changed = true;
        }
        if changed {
            self.rows_all_false.invalidate();
        }
        changed
    }

    /// Propagate a column type change into formulas.
    pub fn retype_column(&mut self, column: &str, data_type: DataType) -> Result<bool, CoreError> {
        let mut changed = false;
        for condition in &mut self.conditions {
            if condition.formula.retype_column(column, data_type)? {
                condition.n_rows_selected.invalidate();
                changed = true;
            }
        }
        if changed {
            self.rows_all_false.invalidate();
        }
        Ok(changed)
    }

    /// Drop every reference to a deleted column: conditions whose formula
    /// uses it (the filter included) along with their text branches, tuples
    /// and rubric cells on it. Returns the names of removed conditions.
    pub fn remove_column(&mut self, column: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .conditions
            .iter()
            .filter(|c| c.formula.references(column))
            .map(|c| c.name.clone())
            .collect();
        let filter_removed = self
            .filter()
            .map(|f| f.formula.references(column))
            .unwrap_or(false);
        for name in &removed {
            if self.condition(name).is_some() {
                self.conditions.retain(|c| c.is_filter || &c.name != name);
                self.forget_condition(name);
            }
        }
        if filter_removed {
            self.set_filter(None);
        }
        self.column_condition_tuples.retain(|t| t.column != column);
        self.rubric_cells.retain(|c| c.column != column);
        self.rows_all_false.invalidate();
        removed
    }

    pub fn invalidate_caches(&mut self) {
        self.rows_all_false.invalidate();
        for condition in &mut self.conditions {
            condition.n_rows_selected.invalidate();
        }
    }

    /// Validate formulas, tuples and rubric cells against the column typing.
    pub fn validate(&self, typing: &dyn Fn(&str) -> Option<DataType>) -> Result<(), CoreError> {
        if self.conditions.iter().filter(|c| c.is_filter).count() > 1 {
            return Err(CoreError::Validation(format!(
                "Action '{}' has more than one filter",
                self.name
            )));
        }
        for condition in &self.conditions {
            condition.formula.validate(typing)?;
        }
        for tuple in &self.column_condition_tuples {
            if typing(&tuple.column).is_none() {
                return Err(CoreError::UnknownColumn(tuple.column.clone()));
            }
            if let Some(guard) = &tuple.condition {
                if self.condition(guard).is_none() {
                    return Err(CoreError::named_not_found("Condition", guard.clone()));
                }
            }
        }
        if self.action_type.is_json() && self.action_type != ActionType::JsonReport {
            if let Some(url) = &self.target_url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(CoreError::Validation(format!("Target URL '{url}' must be http(s)")));
                }
            }
        }
        Ok(())
    }

    /// Deep copy under a new name with no identity and stale caches.
    pub fn clone_detached(&self, name: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.id = None;
        copy.name = name.into();
        for condition in &mut copy.conditions {
            condition.id = None;
        }
        copy.invalidate_caches();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Operand, Operator};
    use crate::value::Value;
    use assert_matches::assert_matches;

    fn score_at_least(n: i64) -> Formula {
        Formula::leaf("score", Operator::GreaterOrEqual, DataType::Integer, Operand::Single(Value::Integer(n)))
    }

    fn action() -> Action {
        let mut action = Action::new("feedback", ActionType::PersonalizedText);
        action.add_condition(Condition::new("passed", score_at_least(50))).unwrap();
        action.set_text_content("Hi {{ name }} {% if passed %}well done{% endif %}").unwrap();
        action.column_condition_tuples.push(ActionColumnConditionTuple {
            column: "score".into(),
            condition: Some("passed".into()),
            changes_allowed: true,
        });
        action
    }

    #[test]
    fn action_type_names_round_trip() {
        for t in ActionType::ALL {
            assert_eq!(t.as_str().parse::<ActionType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert!(ActionType::JsonReport.is_report());
        assert!(!ActionType::PersonalizedJson.is_html());
    }

    #[test]
    fn template_must_use_known_conditions() {
        let mut a = action();
        assert_matches!(
            a.set_text_content("{% if ghost %}x{% endif %}"),
            Err(CoreError::TemplateRender(TemplateError::UndefinedCondition(_)))
        );
        assert!(a.text_content.contains("passed"));
    }

    #[test]
    fn single_filter_per_action() {
        let mut a = action();
        a.set_filter(Some(score_at_least(10)));
        a.add_condition(Condition::filter(score_at_least(20))).unwrap();
        assert_eq!(a.conditions.iter().filter(|c| c.is_filter).count(), 1);
        assert_eq!(a.filter_formula(), Some(&score_at_least(20)));
    }

    #[test]
    fn rename_condition_updates_template_and_guards() {
        let mut a = action();
        a.rename_condition("passed", "ok").unwrap();
        assert!(a.text_content.contains("{% if ok %}"));
        assert_eq!(a.column_condition_tuples[0].condition.as_deref(), Some("ok"));
    }

    #[test]
    fn rename_column_touches_formulas_tuples_and_text() {
        let mut a = action();
        a.rows_all_false.set(true);
        assert!(a.rename_column("score", "mark"));
        assert!(a.conditions[0].formula.references("mark"));
        assert_eq!(a.column_condition_tuples[0].column, "mark");
        assert!(a.rows_all_false.is_stale());
        assert!(a.rename_column("name", "first"));
        assert!(a.text_content.contains("{{ first }}"));
    }

    #[test]
    fn remove_column_drops_conditions_and_guards() {
        let mut a = action();
        a.set_filter(Some(score_at_least(0)));
        let removed = a.remove_column("score");
        assert!(removed.contains(&"passed".to_string()));
        assert!(a.conditions.is_empty());
        assert!(a.column_condition_tuples.is_empty());
    }

    #[test]
    fn clone_detached_resets_identity_and_caches() {
        let mut a = action();
        a.id = Some(3);
        a.rows_all_false.set(false);
        let copy = a.clone_detached("feedback copy");
        assert_eq!(copy.id, None);
        assert!(copy.rows_all_false.is_stale());
        assert_eq!(copy.conditions.len(), 1);
        assert_eq!(copy.text_content, a.text_content);
    }
}
