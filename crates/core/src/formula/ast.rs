//! Formula syntax tree.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::value::{DataType, Value};

/// Suffix that turns a string operator case-insensitive.
pub const INSENSITIVE_SUFFIX: &str = "_insensitive";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    BeginsWith,
    NotBeginsWith,
    Contains,
    NotContains,
    EndsWith,
    NotEndsWith,
    IsEmpty,
    IsNotEmpty,
    IsNull,
    IsNotNull,
    Between,
    NotBetween,
}

/// Number of constants an operator takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Nullary,
    Unary,
    Binary,
}

impl Operator {
    pub const ALL: [Operator; 18] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::Less,
        Operator::LessOrEqual,
        Operator::Greater,
        Operator::GreaterOrEqual,
        Operator::BeginsWith,
        Operator::NotBeginsWith,
        Operator::Contains,
        Operator::NotContains,
        Operator::EndsWith,
        Operator::NotEndsWith,
        Operator::IsEmpty,
        Operator::IsNotEmpty,
        Operator::IsNull,
        Operator::IsNotNull,
        Operator::Between,
        Operator::NotBetween,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equal => "equal",
            Operator::NotEqual => "not_equal",
            Operator::Less => "less",
            Operator::LessOrEqual => "less_or_equal",
            Operator::Greater => "greater",
            Operator::GreaterOrEqual => "greater_or_equal",
            Operator::BeginsWith => "begins_with",
            Operator::NotBeginsWith => "not_begins_with",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::EndsWith => "ends_with",
            Operator::NotEndsWith => "not_ends_with",
            Operator::IsEmpty => "is_empty",
            Operator::IsNotEmpty => "is_not_empty",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
            Operator::Between => "between",
            Operator::NotBetween => "not_between",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Operator::IsEmpty | Operator::IsNotEmpty | Operator::IsNull | Operator::IsNotNull => {
                Arity::Nullary
            }
            Operator::Between | Operator::NotBetween => Arity::Binary,
            _ => Arity::Unary,
        }
    }

    /// Operators that only apply to string columns.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            Operator::BeginsWith
                | Operator::NotBeginsWith
                | Operator::Contains
                | Operator::NotContains
                | Operator::EndsWith
                | Operator::NotEndsWith
                | Operator::IsEmpty
                | Operator::IsNotEmpty
        )
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Operator::Less
                | Operator::LessOrEqual
                | Operator::Greater
                | Operator::GreaterOrEqual
                | Operator::Between
                | Operator::NotBetween
        )
    }

    /// Whether the `_insensitive` suffix is meaningful.
    pub fn accepts_insensitive(self) -> bool {
        matches!(self, Operator::Equal | Operator::NotEqual)
            || (self.is_textual() && self.arity() == Arity::Unary)
    }

    /// Operators offered for a column of `data_type`.
    pub fn for_type(data_type: DataType) -> Vec<Operator> {
        Operator::ALL
            .into_iter()
            .filter(|op| op.applies_to(data_type))
            .collect()
    }

    pub fn applies_to(self, data_type: DataType) -> bool {
        match data_type {
            DataType::String => !self.is_ordering(),
            DataType::Integer | DataType::Double | DataType::Datetime => !self.is_textual(),
            DataType::Boolean => matches!(
                self,
                Operator::Equal | Operator::NotEqual | Operator::IsNull | Operator::IsNotNull
            ),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CoreError::MalformedFormula(format!("Unknown operator '{s}'")))
    }
}

/// Constants of a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Single(Value),
    Range(Value, Value),
}

impl Operand {
    fn values_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Operand::None => Vec::new(),
            Operand::Single(v) => vec![v],
            Operand::Range(a, b) => vec![a, b],
        }
    }

    fn values(&self) -> Vec<&Value> {
        match self {
            Operand::None => Vec::new(),
            Operand::Single(v) => vec![v],
            Operand::Range(a, b) => vec![a, b],
        }
    }

    fn arity(&self) -> Arity {
        match self {
            Operand::None => Arity::Nullary,
            Operand::Single(_) => Arity::Unary,
            Operand::Range(_, _) => Arity::Binary,
        }
    }
}

/// A single comparison against one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub column: String,
    pub operator: Operator,
    pub case_insensitive: bool,
    pub input_type: DataType,
    pub operand: Operand,
}

impl Leaf {
    pub fn new(column: impl Into<String>, operator: Operator, input_type: DataType, operand: Operand) -> Self {
        Self {
            column: column.into(),
            operator,
            case_insensitive: false,
            input_type,
            operand,
        }
    }

    /// Operator name as written on the wire, with the `_insensitive` suffix
    /// where set.
    pub fn operator_name(&self) -> String {
        if self.case_insensitive {
            format!("{}{INSENSITIVE_SUFFIX}", self.operator.as_str())
        } else {
            self.operator.as_str().to_string()
        }
    }

    /// Check operator, constants and input type against the column type.
    pub fn validate(&self, column_type: DataType) -> Result<(), CoreError> {
        if self.operator.arity() != self.operand.arity() {
            return Err(CoreError::MalformedFormula(format!(
                "Operator '{}' on '{}' has the wrong number of values",
                self.operator, self.column
            )));
        }
        if self.input_type != column_type {
            return Err(CoreError::TypeMismatch(format!(
                "Column '{}' is {column_type}, the condition compares it as {}",
                self.column, self.input_type
            )));
        }
        if !self.operator.applies_to(column_type) {
            return Err(CoreError::TypeMismatch(format!(
                "Operator '{}' does not apply to {column_type} column '{}'",
                self.operator, self.column
            )));
        }
        if self.case_insensitive
            && (column_type != DataType::String || !self.operator.accepts_insensitive())
        {
            return Err(CoreError::MalformedFormula(format!(
                "Operator '{}' cannot be case-insensitive",
                self.operator
            )));
        }
        for value in self.operand.values() {
            let value_type = value.data_type();
            let numeric_pair = value_type.is_numeric() && column_type.is_numeric();
            if value_type != column_type && !numeric_pair {
                return Err(CoreError::TypeMismatch(format!(
                    "Value {} is not a {column_type} for column '{}'",
                    value.to_json(),
                    self.column
                )));
            }
        }
        Ok(())
    }
}

/// Boolean formula over the columns of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    Leaf(Leaf),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Not(Box<Formula>),
}

impl Formula {
    pub fn leaf(column: impl Into<String>, operator: Operator, input_type: DataType, operand: Operand) -> Self {
        Formula::Leaf(Leaf::new(column, operator, input_type, operand))
    }

    pub fn negate(self) -> Self {
        Formula::Not(Box::new(self))
    }

    /// Every leaf of the tree, depth first.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        match self {
            Formula::Leaf(leaf) => out.push(leaf),
            Formula::And(children) | Formula::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Formula::Not(inner) => inner.collect_leaves(out),
        }
    }

    fn for_each_leaf_mut(&mut self, f: &mut impl FnMut(&mut Leaf)) {
        match self {
            Formula::Leaf(leaf) => f(leaf),
            Formula::And(children) | Formula::Or(children) => {
                for child in children {
                    child.for_each_leaf_mut(f);
                }
            }
            Formula::Not(inner) => inner.for_each_leaf_mut(f),
        }
    }

    /// Column names the formula references.
    pub fn columns_of(&self) -> BTreeSet<String> {
        self.leaves().into_iter().map(|l| l.column.clone()).collect()
    }

    pub fn references(&self, column: &str) -> bool {
        self.leaves().iter().any(|l| l.column == column)
    }

    /// Rename a column in every leaf. Returns whether anything changed.
    pub fn rename_column(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        self.for_each_leaf_mut(&mut |leaf| {
            if leaf.column == old {
                leaf.column = new.to_string();
                changed = true;
            }
        });
        changed
    }

    /// Propagate a column type change into every leaf on that column,
    /// converting constants. Returns whether anything changed.
    pub fn retype_column(&mut self, column: &str, data_type: DataType) -> Result<bool, CoreError> {
        let mut changed = false;
        let mut failure = None;
        self.for_each_leaf_mut(&mut |leaf| {
            if leaf.column != column || leaf.input_type == data_type {
                return;
            }
            leaf.input_type = data_type;
            for value in leaf.operand.values_mut() {
                match value.clone().coerce_to(data_type) {
                    Some(converted) => *value = converted,
                    None => {
                        failure = Some(CoreError::TypeMismatch(format!(
                            "Value {} cannot become {data_type}",
                            value.to_json()
                        )))
                    }
                }
            }
            changed = true;
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(changed),
        }
    }

    /// Validate against a column typing.
    pub fn validate(&self, typing: &dyn Fn(&str) -> Option<DataType>) -> Result<(), CoreError> {
        for leaf in self.leaves() {
            let column_type =
                typing(&leaf.column).ok_or_else(|| CoreError::UnknownColumn(leaf.column.clone()))?;
            leaf.validate(column_type)?;
        }
        Ok(())
    }
}
