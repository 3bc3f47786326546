//! Survey and todo-list forms: building the per-row form and applying a
//! learner's submission back to the table.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::action::{Action, ActionType};
use crate::column::Column;
use crate::error::CoreError;
use crate::frame::Row;
use crate::template::escape_html;
use crate::types::{TimeZone, Timestamp};
use crate::value::{render_cell, Cell, DataType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldInput {
    Text,
    Number,
    Checkbox,
    Select,
    Datetime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub data_type: DataType,
    pub input: FieldInput,
    pub choices: Vec<String>,
    /// Current value, rendered.
    pub value: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyForm {
    pub action: String,
    pub action_type: ActionType,
    pub description_html: String,
    pub key_column: String,
    pub key_value: String,
    pub fields: Vec<FormField>,
}

/// Columns of the action a learner may see on their form: present, active
/// at `now`, not a key, and with a guard that holds for the row.
fn visible_columns<'a>(
    action: &'a Action,
    columns: &'a [Column],
    conditions: &'a BTreeMap<String, bool>,
    now: Timestamp,
) -> impl Iterator<Item = (&'a Column, bool)> + 'a {
    action.column_condition_tuples.iter().filter_map(move |tuple| {
        let column = columns.iter().find(|c| c.name == tuple.column)?;
        if column.is_key || !column.is_active_at(now) {
            return None;
        }
        let guarded = tuple
            .condition
            .as_ref()
            .map(|name| conditions.get(name).copied().unwrap_or(false))
            .unwrap_or(true);
        guarded.then_some((column, tuple.changes_allowed))
    })
}

fn input_for(action_type: ActionType, column: &Column) -> FieldInput {
    if !column.categories.is_empty() {
        return FieldInput::Select;
    }
    match column.data_type {
        DataType::Boolean => FieldInput::Checkbox,
        DataType::Integer | DataType::Double => FieldInput::Number,
        DataType::Datetime => FieldInput::Datetime,
        DataType::String if action_type == ActionType::TodoList => FieldInput::Checkbox,
        DataType::String => FieldInput::Text,
    }
}

/// Build the form for one row.
#[allow(clippy::too_many_arguments)]
pub fn build_form(
    action: &Action,
    columns: &[Column],
    key_column: &str,
    row: &Row,
    conditions: &BTreeMap<String, bool>,
    description_html: String,
    now: Timestamp,
    tz: &TimeZone,
) -> SurveyForm {
    let fields = visible_columns(action, columns, conditions, now)
        .map(|(column, changes_allowed)| {
            let current = row.get(&column.name).cloned().flatten();
            FormField {
                name: column.name.clone(),
                label: if column.description_text.is_empty() {
                    column.name.clone()
                } else {
                    column.description_text.clone()
                },
                data_type: column.data_type,
                input: input_for(action.action_type, column),
                choices: column.categories.iter().map(|c| c.render(tz)).collect(),
                read_only: !changes_allowed && current.is_some(),
                value: render_cell(&current, tz),
            }
        })
        .collect();
    SurveyForm {
        action: action.name.clone(),
        action_type: action.action_type,
        description_html,
        key_column: key_column.to_string(),
        key_value: row
            .get(key_column)
            .map(|c| render_cell(c, tz))
            .unwrap_or_default(),
        fields,
    }
}

/// Parse submitted form data into the cells to write back.
///
/// Fields the learner cannot see are rejected. Read-only fields are left
/// alone. Absent checkboxes count as unticked; other absent or empty fields
/// become null.
pub fn parse_submission(
    action: &Action,
    columns: &[Column],
    row: &Row,
    conditions: &BTreeMap<String, bool>,
    submitted: &BTreeMap<String, String>,
    now: Timestamp,
    tz: &TimeZone,
) -> Result<Vec<(String, Cell)>, CoreError> {
    let visible: Vec<(&Column, bool)> = visible_columns(action, columns, conditions, now).collect();
    if let Some(unknown) = submitted
        .keys()
        .find(|name| !visible.iter().any(|(c, _)| &c.name == *name))
    {
        return Err(CoreError::Validation(format!(
            "'{unknown}' is not a field of this form"
        )));
    }

    let mut updates = Vec::new();
    for (column, changes_allowed) in visible {
        let current = row.get(&column.name).cloned().flatten();
        if !changes_allowed && current.is_some() {
            continue;
        }
        let input = input_for(action.action_type, column);
        let raw = submitted.get(&column.name).map(|s| s.trim());
        let cell = match (input, raw) {
            (FieldInput::Checkbox, raw) => {
                let ticked = matches!(raw, Some(v) if v == "on" || v.eq_ignore_ascii_case("true") || v == "1");
                if column.data_type == DataType::Boolean {
                    Some(Value::Boolean(ticked))
                } else {
                    ticked.then(|| Value::String(column.name.clone()))
                }
            }
            (_, None) | (_, Some("")) => None,
            (_, Some(text)) => Some(Value::parse_as(text, column.data_type, tz)?),
        };
        column.validate_value(&cell)?;
        updates.push((column.name.clone(), cell));
    }
    Ok(updates)
}

/// Minimal HTML rendering of a form for learner-facing pages.
pub fn render_html(form: &SurveyForm) -> String {
    let mut html = String::from("<form method=\"post\" class=\"ontask-survey\">");
    html.push_str(&form.description_html);
    for field in &form.fields {
        let name = escape_html(&field.name);
        let disabled = if field.read_only { " disabled" } else { "" };
        html.push_str(&format!("<p><label for=\"{name}\">{}</label> ", escape_html(&field.label)));
        match field.input {
            FieldInput::Select => {
                html.push_str(&format!("<select id=\"{name}\" name=\"{name}\"{disabled}><option value=\"\"></option>"));
                for choice in &field.choices {
                    let selected = if *choice == field.value { " selected" } else { "" };
                    let choice = escape_html(choice);
                    html.push_str(&format!("<option value=\"{choice}\"{selected}>{choice}</option>"));
                }
                html.push_str("</select>");
            }
            FieldInput::Checkbox => {
                let checked = if field.value.is_empty() || field.value == "False" { "" } else { " checked" };
                html.push_str(&format!(
                    "<input type=\"checkbox\" id=\"{name}\" name=\"{name}\"{checked}{disabled}>"
                ));
            }
            input => {
                let kind = match input {
                    FieldInput::Number => "number",
                    FieldInput::Datetime => "datetime-local",
                    _ => "text",
                };
                html.push_str(&format!(
                    "<input type=\"{kind}\" id=\"{name}\" name=\"{name}\" value=\"{}\"{disabled}>",
                    escape_html(&field.value)
                ));
            }
        }
        html.push_str("</p>");
    }
    html.push_str("<button type=\"submit\">Submit</button></form>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionColumnConditionTuple;
    use crate::types::utc;
    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};

    fn columns() -> Vec<Column> {
        let mut sid = Column::new("sid", DataType::Integer, 1);
        sid.is_key = true;
        let mut mood = Column::new("mood", DataType::String, 2);
        mood.set_categories(vec![Value::String("good".into()), Value::String("bad".into())])
            .unwrap();
        let hours = Column::new("hours", DataType::Double, 3);
        let mut closed = Column::new("closed", DataType::String, 4);
        closed.active_to = Some(Utc::now() - Duration::days(1));
        vec![sid, mood, hours, closed]
    }

    fn survey() -> Action {
        let mut action = Action::new("check-in", ActionType::Survey);
        for name in ["sid", "mood", "hours", "closed"] {
            action.column_condition_tuples.push(ActionColumnConditionTuple::new(name));
        }
        action.column_condition_tuples[2].condition = Some("engaged".into());
        action
    }

    fn row() -> Row {
        [
            ("sid".to_string(), Some(Value::Integer(7))),
            ("mood".to_string(), Some(Value::String("good".into()))),
            ("hours".to_string(), None),
            ("closed".to_string(), None),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn form_hides_keys_inactive_and_guarded_fields() {
        let conditions = BTreeMap::from([("engaged".to_string(), false)]);
        let form = build_form(&survey(), &columns(), "sid", &row(), &conditions, String::new(), Utc::now(), &utc());
        let names: Vec<&str> = form.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["mood"]);
        assert_eq!(form.key_value, "7");
        assert_eq!(form.fields[0].input, FieldInput::Select);
        assert_eq!(form.fields[0].value, "good");
    }

    #[test]
    fn submission_is_typed_and_checked() {
        let conditions = BTreeMap::from([("engaged".to_string(), true)]);
        let submitted = BTreeMap::from([
            ("mood".to_string(), "bad".to_string()),
            ("hours".to_string(), "2.5".to_string()),
        ]);
        let updates =
            parse_submission(&survey(), &columns(), &row(), &conditions, &submitted, Utc::now(), &utc()).unwrap();
        assert_eq!(
            updates,
            vec![
                ("mood".to_string(), Some(Value::String("bad".into()))),
                ("hours".to_string(), Some(Value::Double(2.5))),
            ]
        );

        let bad = BTreeMap::from([("mood".to_string(), "meh".to_string())]);
        assert_matches!(
            parse_submission(&survey(), &columns(), &row(), &conditions, &bad, Utc::now(), &utc()),
            Err(CoreError::CategoryViolation { .. })
        );
        let hidden = BTreeMap::from([("closed".to_string(), "x".to_string())]);
        assert_matches!(
            parse_submission(&survey(), &columns(), &row(), &conditions, &hidden, Utc::now(), &utc()),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn read_only_answers_are_kept() {
        let mut action = survey();
        action.column_condition_tuples[1].changes_allowed = false;
        let submitted = BTreeMap::from([("mood".to_string(), "bad".to_string())]);
        let updates =
            parse_submission(&action, &columns(), &row(), &BTreeMap::new(), &submitted, Utc::now(), &utc()).unwrap();
        assert!(updates.is_empty());
    }

    #[test]
    fn todo_items_are_checkboxes() {
        let mut action = Action::new("todo", ActionType::TodoList);
        action.column_condition_tuples.push(ActionColumnConditionTuple::new("done"));
        let columns = vec![Column::new("done", DataType::Boolean, 1)];
        let row: Row = [("done".to_string(), Some(Value::Boolean(false)))].into_iter().collect();
        let updates =
            parse_submission(&action, &columns, &row, &BTreeMap::new(), &BTreeMap::new(), Utc::now(), &utc()).unwrap();
        assert_eq!(updates, vec![("done".to_string(), Some(Value::Boolean(false)))]);

        let form = build_form(&action, &columns, "sid", &row, &BTreeMap::new(), String::new(), Utc::now(), &utc());
        let html = render_html(&form);
        assert!(html.contains("type=\"checkbox\""));
        assert!(!html.contains(" checked"));
    }
}
