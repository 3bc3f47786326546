//! Rubric cells and feedback assembly for `rubric_text` actions.
//!
//! Each criterion is a categorical column; its categories are the levels of
//! attainment, in order. A [`RubricCell`] holds the description and the
//! feedback text for one (criterion, level) pair.

use serde::{Deserialize, Serialize};

use crate::column::Column;
use crate::error::CoreError;
use crate::frame::Row;
use crate::template::escape_html;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricCell {
    pub column: String,
    /// Index into the criterion column's categories.
    pub loa_position: usize,
    #[serde(default)]
    pub description_text: String,
    #[serde(default)]
    pub feedback_text: String,
}

impl RubricCell {
    /// Check the cell against its criterion column.
    pub fn validate(&self, column: &Column) -> Result<(), CoreError> {
        if column.categories.is_empty() {
            return Err(CoreError::Validation(format!(
                "Rubric criterion '{}' needs a column with categories",
                column.name
            )));
        }
        if self.loa_position >= column.categories.len() {
            return Err(CoreError::Validation(format!(
                "Column '{}' has {} levels, got level {}",
                column.name,
                column.categories.len(),
                self.loa_position
            )));
        }
        Ok(())
    }
}

/// Feedback for one row: for every criterion, the feedback of the level the
/// row attained. Criteria with no value, or no matching cell, are skipped.
pub fn rubric_feedback_html(cells: &[RubricCell], criteria: &[&Column], row: &Row) -> String {
    let mut html = String::new();
    for column in criteria {
        let Some(Some(value)) = row.get(&column.name) else {
            continue;
        };
        let Some(level) = column.categories.iter().position(|c| c.same_as(value)) else {
            continue;
        };
        let Some(cell) = cells
            .iter()
            .find(|c| c.column == column.name && c.loa_position == level)
        else {
            continue;
        };
        if cell.feedback_text.is_empty() {
            continue;
        }
        let title = if column.description_text.is_empty() {
            &column.name
        } else {
            &column.description_text
        };
        html.push_str(&format!(
            "<div class=\"ontask-rubric-criterion\"><h4>{}</h4><p>{}</p></div>",
            escape_html(title),
            escape_html(&cell.feedback_text)
        ));
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DataType, Value};

    fn criterion() -> Column {
        let mut column = Column::new("clarity", DataType::String, 2);
        column
            .set_categories(vec![Value::String("low".into()), Value::String("high".into())])
            .unwrap();
        column
    }

    fn cells() -> Vec<RubricCell> {
        vec![
            RubricCell {
                column: "clarity".into(),
                loa_position: 0,
                description_text: "Hard to follow".into(),
                feedback_text: "Structure your answer.".into(),
            },
            RubricCell {
                column: "clarity".into(),
                loa_position: 1,
                description_text: "Clear".into(),
                feedback_text: "Well explained & concise.".into(),
            },
        ]
    }

    #[test]
    fn picks_feedback_for_attained_level() {
        let column = criterion();
        let row: Row = [("clarity".to_string(), Some(Value::String("high".into())))]
            .into_iter()
            .collect();
        let html = rubric_feedback_html(&cells(), &[&column], &row);
        assert_eq!(
            html,
            "<div class=\"ontask-rubric-criterion\"><h4>clarity</h4><p>Well explained &amp; concise.</p></div>"
        );
    }

    #[test]
    fn skips_missing_values() {
        let column = criterion();
        let row: Row = [("clarity".to_string(), None)].into_iter().collect();
        assert_eq!(rubric_feedback_html(&cells(), &[&column], &row), "");
    }

    #[test]
    fn validates_level_range() {
        let column = criterion();
        let mut cell = cells().remove(0);
        assert!(cell.validate(&column).is_ok());
        cell.loa_position = 2;
        assert!(cell.validate(&column).is_err());
        assert!(cell.validate(&Column::new("plain", DataType::String, 1)).is_err());
    }
}
