//! Predicate mode: compile a formula into a backend-agnostic [`Predicate`]
//! that renders to a parameterized PostgreSQL `WHERE` fragment and can also
//! be matched in-process.
//!
//! Every value test is guarded with `IS NOT NULL`, so SQL never sees a
//! three-valued result and `NOT` agrees with row mode on nulls.

use super::ast::{Formula, Leaf, Operand, Operator};
use super::eval::{leaf_holds, FormulaEvaluator};
use crate::error::CoreError;
use crate::frame::Row;
use crate::value::{DataType, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// A validated leaf test.
    Test(Leaf),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// SQL text plus positional parameters (`$n`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Compiles formulas against a column typing.
pub struct PredicateBuilder<'a> {
    typing: &'a dyn Fn(&str) -> Option<DataType>,
}

impl<'a> PredicateBuilder<'a> {
    pub fn new(typing: &'a dyn Fn(&str) -> Option<DataType>) -> Self {
        Self { typing }
    }
}

impl FormulaEvaluator for PredicateBuilder<'_> {
    type Output = Predicate;

    fn evaluate(&self, formula: &Formula) -> Result<Predicate, CoreError> {
        Ok(match formula {
            Formula::Leaf(leaf) => {
                let column_type = (self.typing)(&leaf.column)
                    .ok_or_else(|| CoreError::UnknownColumn(leaf.column.clone()))?;
                leaf.validate(column_type)?;
                Predicate::Test(leaf.clone())
            }
            Formula::And(children) => Predicate::And(
                children
                    .iter()
                    .map(|c| self.evaluate(c))
                    .collect::<Result<_, _>>()?,
            ),
            Formula::Or(children) => Predicate::Or(
                children
                    .iter()
                    .map(|c| self.evaluate(c))
                    .collect::<Result<_, _>>()?,
            ),
            Formula::Not(inner) => Predicate::Not(Box::new(self.evaluate(inner)?)),
        })
    }
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape `LIKE` metacharacters; pairs with `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

impl Predicate {
    /// Evaluate in-process with the same semantics as the SQL rendering.
    pub fn matches(&self, row: &Row) -> Result<bool, CoreError> {
        match self {
            Predicate::Test(leaf) => {
                let cell = row
                    .get(&leaf.column)
                    .ok_or_else(|| CoreError::UnknownColumn(leaf.column.clone()))?;
                leaf_holds(leaf, cell)
            }
            Predicate::And(children) => {
                for child in children {
                    if !child.matches(row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(children) => {
                for child in children {
                    if child.matches(row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(inner) => Ok(!inner.matches(row)?),
        }
    }

    pub fn to_sql(&self) -> SqlFragment {
        self.to_sql_from(1)
    }

    /// Render with parameters numbered from `$first`.
    pub fn to_sql_from(&self, first: usize) -> SqlFragment {
        let mut fragment = SqlFragment::default();
        self.write_sql(&mut fragment, first);
        fragment
    }

    fn write_sql(&self, out: &mut SqlFragment, first: usize) {
        match self {
            Predicate::Test(leaf) => write_leaf(leaf, out, first),
            Predicate::And(children) | Predicate::Or(children) if children.is_empty() => {
                out.sql
                    .push_str(if matches!(self, Predicate::And(_)) { "TRUE" } else { "FALSE" });
            }
            Predicate::And(children) | Predicate::Or(children) => {
                let joiner = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                out.sql.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        out.sql.push_str(joiner);
                    }
                    child.write_sql(out, first);
                }
                out.sql.push(')');
            }
            Predicate::Not(inner) => {
                out.sql.push_str("NOT (");
                inner.write_sql(out, first);
                out.sql.push(')');
            }
        }
    }
}

fn bind(out: &mut SqlFragment, first: usize, value: Value) -> String {
    out.params.push(value);
    format!("${}", first + out.params.len() - 1)
}

fn write_leaf(leaf: &Leaf, out: &mut SqlFragment, first: usize) {
    let column = quote_ident(&leaf.column);
    let folded = if leaf.case_insensitive {
        format!("LOWER({column})")
    } else {
        column.clone()
    };
    let fold = |value: &Value| -> Value {
        match value {
            Value::String(s) if leaf.case_insensitive => Value::String(s.to_lowercase()),
            other => other.clone(),
        }
    };
    let like = |value: &Value, prefix: &str, suffix: &str| -> Value {
        let text = match fold(value) {
            Value::String(s) => s,
            other => other.render(&crate::types::utc()),
        };
        Value::String(format!("{prefix}{}{suffix}", escape_like(&text)))
    };

    let guard = format!("{column} IS NOT NULL AND ");
    let sql = match (&leaf.operator, &leaf.operand) {
        (Operator::IsNull, _) => format!("{column} IS NULL"),
        (Operator::IsNotNull, _) => format!("{column} IS NOT NULL"),
        (Operator::IsEmpty, _) => format!("({column} IS NULL OR {column} = '')"),
        (Operator::IsNotEmpty, _) => format!("({column} IS NOT NULL AND {column} <> '')"),
        (Operator::Between, Operand::Range(low, high)) => {
            let low = bind(out, first, low.clone());
            let high = bind(out, first, high.clone());
            format!("({guard}{column} BETWEEN {low} AND {high})")
        }
        (Operator::NotBetween, Operand::Range(low, high)) => {
            let low = bind(out, first, low.clone());
            let high = bind(out, first, high.clone());
            format!("({guard}NOT ({column} BETWEEN {low} AND {high}))")
        }
        (op, Operand::Single(value)) => {
            let (symbol, param, negated) = match op {
                Operator::Equal => ("=", fold(value), false),
                Operator::NotEqual => ("<>", fold(value), false),
                Operator::Less => ("<", value.clone(), false),
                Operator::LessOrEqual => ("<=", value.clone(), false),
                Operator::Greater => (">", value.clone(), false),
                Operator::GreaterOrEqual => (">=", value.clone(), false),
                Operator::BeginsWith => ("LIKE", like(value, "", "%"), false),
                Operator::NotBeginsWith => ("LIKE", like(value, "", "%"), true),
                Operator::Contains => ("LIKE", like(value, "%", "%"), false),
                Operator::NotContains => ("LIKE", like(value, "%", "%"), true),
                Operator::EndsWith => ("LIKE", like(value, "%", ""), false),
                Operator::NotEndsWith => ("LIKE", like(value, "%", ""), true),
                _ => ("=", value.clone(), false),
            };
            let placeholder = bind(out, first, param);
            let mut test = format!("{folded} {symbol} {placeholder}");
            if symbol == "LIKE" {
                test.push_str(" ESCAPE '\\'");
            }
            if negated {
                test = format!("NOT ({test})");
            }
            format!("({guard}{test})")
        }
        // Validated leaves never reach here; render a false test.
        _ => "FALSE".to_string(),
    };
    out.sql.push_str(&sql);
}
