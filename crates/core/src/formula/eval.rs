//! Row-mode evaluation.

use std::cmp::Ordering;

use super::ast::{Formula, Leaf, Operand, Operator};
use crate::error::CoreError;
use crate::frame::Row;
use crate::value::{Cell, Value};

/// A way of evaluating a formula tree.
pub trait FormulaEvaluator {
    type Output;

    fn evaluate(&self, formula: &Formula) -> Result<Self::Output, CoreError>;
}

/// Evaluates a formula against one row.
///
/// Null cells make every value operator false; only `is_null`,
/// `is_not_null`, `is_empty` and `is_not_empty` look at nulls.
pub struct RowEvaluator<'a> {
    row: &'a Row,
}

impl<'a> RowEvaluator<'a> {
    pub fn new(row: &'a Row) -> Self {
        Self { row }
    }
}

impl FormulaEvaluator for RowEvaluator<'_> {
    type Output = bool;

    fn evaluate(&self, formula: &Formula) -> Result<bool, CoreError> {
        match formula {
            Formula::Leaf(leaf) => {
                let cell = self
                    .row
                    .get(&leaf.column)
                    .ok_or_else(|| CoreError::UnknownColumn(leaf.column.clone()))?;
                leaf_holds(leaf, cell)
            }
            Formula::And(children) => {
                for child in children {
                    if !self.evaluate(child)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Formula::Or(children) => {
                for child in children {
                    if self.evaluate(child)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Formula::Not(inner) => Ok(!self.evaluate(inner)?),
        }
    }
}

/// Truth of a leaf for one cell. Shared with in-process predicate matching.
pub(crate) fn leaf_holds(leaf: &Leaf, cell: &Cell) -> Result<bool, CoreError> {
    match (leaf.operator, &leaf.operand) {
        (Operator::IsNull, Operand::None) => return Ok(cell.is_none()),
        (Operator::IsNotNull, Operand::None) => return Ok(cell.is_some()),
        (Operator::IsEmpty, Operand::None) => {
            return Ok(match cell {
                None => true,
                Some(v) => v.as_str() == Some(""),
            })
        }
        (Operator::IsNotEmpty, Operand::None) => {
            return Ok(match cell {
                None => false,
                Some(v) => v.as_str() != Some(""),
            })
        }
        _ => {}
    }

    let Some(value) = cell else {
        check_arity(leaf)?;
        return Ok(false);
    };

    match &leaf.operand {
        Operand::Single(constant) => single_holds(leaf, value, constant),
        Operand::Range(low, high) => {
            let inside = ordered(leaf, value, low)? != Ordering::Less
                && ordered(leaf, value, high)? != Ordering::Greater;
            match leaf.operator {
                Operator::Between => Ok(inside),
                Operator::NotBetween => Ok(!inside),
                _ => Err(arity_error(leaf)),
            }
        }
        Operand::None => Err(arity_error(leaf)),
    }
}

fn single_holds(leaf: &Leaf, value: &Value, constant: &Value) -> Result<bool, CoreError> {
    let ordering = || ordered(leaf, value, constant);
    let text = |test: fn(&str, &str) -> bool| -> Result<bool, CoreError> {
        let (v, c) = text_pair(leaf, value, constant)?;
        Ok(test(&v, &c))
    };
    Ok(match leaf.operator {
        Operator::Equal => ordering()? == Ordering::Equal,
        Operator::NotEqual => ordering()? != Ordering::Equal,
        Operator::Less => ordering()? == Ordering::Less,
        Operator::LessOrEqual => ordering()? != Ordering::Greater,
        Operator::Greater => ordering()? == Ordering::Greater,
        Operator::GreaterOrEqual => ordering()? != Ordering::Less,
        Operator::BeginsWith => text(|v, c| v.starts_with(c))?,
        Operator::NotBeginsWith => !text(|v, c| v.starts_with(c))?,
        Operator::Contains => text(|v, c| v.contains(c))?,
        Operator::NotContains => !text(|v, c| v.contains(c))?,
        Operator::EndsWith => text(|v, c| v.ends_with(c))?,
        Operator::NotEndsWith => !text(|v, c| v.ends_with(c))?,
        _ => return Err(arity_error(leaf)),
    })
}

/// Order `value` against `constant`, folding case for insensitive leaves.
fn ordered(leaf: &Leaf, value: &Value, constant: &Value) -> Result<Ordering, CoreError> {
    if leaf.case_insensitive {
        let (v, c) = text_pair(leaf, value, constant)?;
        return Ok(v.as_bytes().cmp(c.as_bytes()));
    }
    value.compare(constant).ok_or_else(|| {
        CoreError::TypeMismatch(format!(
            "Column '{}' holds {} values, the condition compares them with {}",
            leaf.column,
            value.data_type(),
            constant.data_type()
        ))
    })
}

fn text_pair(leaf: &Leaf, value: &Value, constant: &Value) -> Result<(String, String), CoreError> {
    match (value.as_str(), constant.as_str()) {
        (Some(v), Some(c)) if leaf.case_insensitive => Ok((v.to_lowercase(), c.to_lowercase())),
        (Some(v), Some(c)) => Ok((v.to_string(), c.to_string())),
        _ => Err(CoreError::TypeMismatch(format!(
            "Operator '{}' needs text, column '{}' holds {}",
            leaf.operator,
            leaf.column,
            value.data_type()
        ))),
    }
}

fn check_arity(leaf: &Leaf) -> Result<(), CoreError> {
    match (leaf.operator.arity(), &leaf.operand) {
        (super::ast::Arity::Unary, Operand::Single(_))
        | (super::ast::Arity::Binary, Operand::Range(_, _)) => Ok(()),
        _ => Err(arity_error(leaf)),
    }
}

fn arity_error(leaf: &Leaf) -> CoreError {
    CoreError::MalformedFormula(format!(
        "Operator '{}' on '{}' has the wrong number of values",
        leaf.operator, leaf.column
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn row(pairs: &[(&str, Cell)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval(formula: &Formula, row: &Row) -> bool {
        RowEvaluator::new(row).evaluate(formula).unwrap()
    }

    #[test]
    fn score_window_on_value_and_null() {
        let f = Formula::from_json(&json!({
            "condition": "AND",
            "rules": [
                {"field": "score", "type": "integer", "operator": "greater_or_equal", "value": 50},
                {"field": "score", "type": "integer", "operator": "less", "value": 80},
            ]
        }))
        .unwrap();
        assert!(eval(&f, &row(&[("score", Some(Value::Integer(65)))])));
        assert!(!eval(&f, &row(&[("score", None)])));
    }

    #[test]
    fn nulls_are_false_for_negated_operators() {
        let null_row = row(&[("name", None)]);
        for op in [
            Operator::NotEqual,
            Operator::NotBeginsWith,
            Operator::NotContains,
            Operator::NotEndsWith,
        ] {
            let f = Formula::leaf("name", op, DataType::String, Operand::Single(Value::String("a".into())));
            assert!(!eval(&f, &null_row), "{op} on null");
        }
        let f = Formula::leaf("name", Operator::IsEmpty, DataType::String, Operand::None);
        assert!(eval(&f, &null_row));
        let f = Formula::leaf("name", Operator::IsNull, DataType::String, Operand::None);
        assert!(eval(&f, &null_row));
    }

    #[test]
    fn empty_groups() {
        let r = row(&[]);
        assert!(eval(&Formula::And(vec![]), &r));
        assert!(!eval(&Formula::Or(vec![]), &r));
        assert!(eval(&Formula::Or(vec![]).negate(), &r));
    }

    #[test]
    fn case_insensitive_text_operators() {
        let r = row(&[("name", Some(Value::String("Ada Lovelace".into())))]);
        let mut leaf = Leaf::new("name", Operator::BeginsWith, DataType::String, Operand::Single(Value::String("ada".into())));
        assert!(!eval(&Formula::Leaf(leaf.clone()), &r));
        leaf.case_insensitive = true;
        assert!(eval(&Formula::Leaf(leaf.clone()), &r));
        leaf.operator = Operator::Equal;
        leaf.operand = Operand::Single(Value::String("ADA LOVELACE".into()));
        assert!(eval(&Formula::Leaf(leaf), &r));
    }

    #[test]
    fn between_is_inclusive() {
        let f = Formula::leaf(
            "score",
            Operator::Between,
            DataType::Double,
            Operand::Range(Value::Double(1.0), Value::Double(2.0)),
        );
        assert!(eval(&f, &row(&[("score", Some(Value::Double(2.0)))])));
        assert!(!eval(&f, &row(&[("score", Some(Value::Double(2.5)))])));
        let not = Formula::leaf(
            "score",
            Operator::NotBetween,
            DataType::Double,
            Operand::Range(Value::Double(1.0), Value::Double(2.0)),
        );
        assert!(eval(&not, &row(&[("score", Some(Value::Double(2.5)))])));
        assert!(!eval(&not, &row(&[("score", None)])));
    }

    #[test]
    fn missing_column_raises() {
        let f = Formula::leaf("ghost", Operator::IsNull, DataType::String, Operand::None);
        let r = row(&[]);
        assert_matches!(RowEvaluator::new(&r).evaluate(&f), Err(CoreError::UnknownColumn(_)));
    }

    #[test]
    fn malformed_leaf_raises_even_on_null() {
        let f = Formula::leaf("score", Operator::Between, DataType::Integer, Operand::Single(Value::Integer(1)));
        let r = row(&[("score", None)]);
        assert_matches!(RowEvaluator::new(&r).evaluate(&f), Err(CoreError::MalformedFormula(_)));
    }
}
