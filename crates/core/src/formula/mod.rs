//! Formula language: a tagged boolean tree over row columns, evaluated in
//! row mode ([`RowEvaluator`]) or compiled to a storage predicate
//! ([`PredicateBuilder`]).

pub mod ast;
pub mod eval;
pub mod predicate;
pub mod wire;

pub use ast::{Arity, Formula, Leaf, Operand, Operator};
pub use eval::{FormulaEvaluator, RowEvaluator};
pub use predicate::{quote_ident, Predicate, PredicateBuilder, SqlFragment};

use crate::error::CoreError;
use crate::frame::{Row, TypedFrame};

/// Evaluate a formula against one row.
pub fn evaluate_row(formula: &Formula, row: &Row) -> Result<bool, CoreError> {
    RowEvaluator::new(row).evaluate(formula)
}

/// Indices of the frame rows satisfying `formula`.
pub fn select_rows(frame: &TypedFrame, formula: &Formula) -> Result<Vec<usize>, CoreError> {
    let typing = |name: &str| frame.data_type(name);
    let predicate = PredicateBuilder::new(&typing).evaluate(formula)?;
    let mut selected = Vec::new();
    for (index, row) in frame.rows().enumerate() {
        if predicate.matches(&row)? {
            selected.push(index);
        }
    }
    Ok(selected)
}
