//! QueryBuilder JSON wire form.
//!
//! Groups: `{"condition": "AND" | "OR" | "NOT", "rules": [...], "not": bool}`.
//! Leaves: `{"id", "field", "type", "input", "operator", "value"}`.
//!
//! A group with `"not": true` is read as a negation around the group. A
//! `NOT` group with several rules negates their conjunction. Output is
//! canonical: negated `AND`/`OR` groups are written with `"not": true`, any
//! other negation as a one-rule `NOT` group.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value as Json};

use super::ast::{Arity, Formula, Leaf, Operand, Operator, INSENSITIVE_SUFFIX};
use crate::error::CoreError;
use crate::types::{utc, TimeZone};
use crate::value::{DataType, Value};

impl Formula {
    /// Parse the wire form; naive datetime constants are read as UTC.
    pub fn from_json(json: &Json) -> Result<Formula, CoreError> {
        Formula::from_json_in(json, &utc())
    }

    /// Parse the wire form; naive datetime constants are read in `tz`.
    pub fn from_json_in(json: &Json, tz: &TimeZone) -> Result<Formula, CoreError> {
        let object = json
            .as_object()
            .ok_or_else(|| malformed("a formula node must be an object"))?;
        if object.contains_key("condition") {
            parse_group(object, tz)
        } else {
            parse_leaf(object, tz).map(Formula::Leaf)
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Formula::Leaf(leaf) => leaf_to_json(leaf),
            Formula::And(children) => group_json("AND", children, false),
            Formula::Or(children) => group_json("OR", children, false),
            Formula::Not(inner) => match inner.as_ref() {
                Formula::And(children) => group_json("AND", children, true),
                Formula::Or(children) => group_json("OR", children, true),
                other => json!({
                    "condition": "NOT",
                    "rules": [other.to_json()],
                    "not": false,
                    "valid": true,
                }),
            },
        }
    }
}

impl Serialize for Formula {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Formula {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Formula::from_json(&json).map_err(serde::de::Error::custom)
    }
}

fn malformed(message: impl Into<String>) -> CoreError {
    CoreError::MalformedFormula(message.into())
}

fn parse_group(object: &Map<String, Json>, tz: &TimeZone) -> Result<Formula, CoreError> {
    let condition = object
        .get("condition")
        .and_then(Json::as_str)
        .ok_or_else(|| malformed("'condition' must be a string"))?;
    let rules = object
        .get("rules")
        .and_then(Json::as_array)
        .ok_or_else(|| malformed("a group needs a 'rules' array"))?;
    let mut children = rules
        .iter()
        .map(|r| Formula::from_json_in(r, tz))
        .collect::<Result<Vec<_>, _>>()?;

    let group = match condition.to_ascii_uppercase().as_str() {
        "AND" => Formula::And(children),
        "OR" => Formula::Or(children),
        "NOT" if children.len() == 1 => children.remove(0).negate(),
        "NOT" if children.is_empty() => return Err(malformed("a NOT group needs a rule")),
        "NOT" => Formula::And(children).negate(),
        other => return Err(malformed(format!("Unknown group condition '{other}'"))),
    };

    let negated = object.get("not").and_then(Json::as_bool).unwrap_or(false);
    Ok(if negated { group.negate() } else { group })
}

fn parse_leaf(object: &Map<String, Json>, tz: &TimeZone) -> Result<Leaf, CoreError> {
    let column = object
        .get("field")
        .or_else(|| object.get("id"))
        .and_then(Json::as_str)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| malformed("a rule needs a 'field'"))?;

    let operator_name = object
        .get("operator")
        .and_then(Json::as_str)
        .ok_or_else(|| malformed(format!("rule on '{column}' has no operator")))?;
    let (operator, case_insensitive) = match operator_name.strip_suffix(INSENSITIVE_SUFFIX) {
        Some(base) => (base.parse::<Operator>()?, true),
        None => (operator_name.parse::<Operator>()?, false),
    };

    let input_type = object
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| malformed(format!("rule on '{column}' has no type")))?
        .parse::<DataType>()
        .map_err(|_| malformed(format!("rule on '{column}' has an unknown type")))?;

    let value = object.get("value").unwrap_or(&Json::Null);
    let operand = match operator.arity() {
        Arity::Nullary => Operand::None,
        Arity::Unary => Operand::Single(scalar(value, input_type, tz, column)?),
        Arity::Binary => match value.as_array().map(Vec::as_slice) {
            Some([low, high]) => Operand::Range(
                scalar(low, input_type, tz, column)?,
                scalar(high, input_type, tz, column)?,
            ),
            _ => {
                return Err(malformed(format!(
                    "'{operator}' on '{column}' needs two values"
                )))
            }
        },
    };

    Ok(Leaf {
        column: column.to_string(),
        operator,
        case_insensitive,
        input_type,
        operand,
    })
}

fn scalar(value: &Json, input_type: DataType, tz: &TimeZone, column: &str) -> Result<Value, CoreError> {
    if value.is_null() {
        return Err(malformed(format!("rule on '{column}' has no value")));
    }
    Value::operand_from_json(value, input_type, tz)
}

fn leaf_to_json(leaf: &Leaf) -> Json {
    let value = match &leaf.operand {
        Operand::None => Json::Null,
        Operand::Single(v) => v.to_json(),
        Operand::Range(low, high) => json!([low.to_json(), high.to_json()]),
    };
    json!({
        "id": leaf.column,
        "field": leaf.column,
        "type": leaf.input_type.as_str(),
        "input": leaf.input_type.input_widget(),
        "operator": leaf.operator_name(),
        "value": value,
    })
}

fn group_json(condition: &str, children: &[Formula], negated: bool) -> Json {
    json!({
        "condition": condition,
        "rules": children.iter().map(Formula::to_json).collect::<Vec<_>>(),
        "not": negated,
        "valid": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_time_zone;
    use assert_matches::assert_matches;

    fn leaf(field: &str, operator: &str, ty: &str, value: Json) -> Json {
        json!({"id": field, "field": field, "type": ty, "operator": operator, "value": value})
    }

    #[test]
    fn parses_nested_groups() {
        let wire = json!({
            "condition": "AND",
            "rules": [
                leaf("score", "greater_or_equal", "integer", json!(50)),
                {"condition": "OR", "rules": [
                    leaf("name", "begins_with_insensitive", "string", json!("a")),
                    leaf("name", "is_null", "string", Json::Null),
                ]},
            ],
        });
        let f = Formula::from_json(&wire).unwrap();
        let Formula::And(children) = &f else {
            panic!("expected AND, got {f:?}");
        };
        assert_eq!(children.len(), 2);
        let leaves = f.leaves();
        assert!(leaves[1].case_insensitive);
        assert_eq!(leaves[1].operator, Operator::BeginsWith);
        assert_eq!(leaves[2].operand, Operand::None);
    }

    #[test]
    fn group_not_flag_wraps_group() {
        let wire = json!({
            "condition": "OR",
            "not": true,
            "rules": [leaf("score", "less", "integer", json!(10))],
        });
        assert_matches!(Formula::from_json(&wire).unwrap(), Formula::Not(inner) if matches!(*inner, Formula::Or(_)));
    }

    #[test]
    fn not_group_with_several_rules_negates_conjunction() {
        let wire = json!({
            "condition": "NOT",
            "rules": [
                leaf("score", "less", "integer", json!(10)),
                leaf("score", "greater", "integer", json!(0)),
            ],
        });
        assert_matches!(Formula::from_json(&wire).unwrap(), Formula::Not(inner) if matches!(*inner, Formula::And(ref c) if c.len() == 2));
    }

    #[test]
    fn between_needs_two_values() {
        let wire = leaf("score", "between", "integer", json!([1]));
        assert_matches!(Formula::from_json(&wire), Err(CoreError::MalformedFormula(_)));
        let wire = leaf("score", "between", "integer", json!(["1", 5]));
        assert_matches!(
            Formula::from_json(&wire).unwrap(),
            Formula::Leaf(Leaf { operand: Operand::Range(Value::Integer(1), Value::Integer(5)), .. })
        );
    }

    #[test]
    fn rejects_unknown_operator_and_missing_rules() {
        let wire = leaf("score", "approximately", "integer", json!(1));
        assert_matches!(Formula::from_json(&wire), Err(CoreError::MalformedFormula(_)));
        assert_matches!(
            Formula::from_json(&json!({"condition": "AND"})),
            Err(CoreError::MalformedFormula(_))
        );
        assert_matches!(Formula::from_json(&json!([])), Err(CoreError::MalformedFormula(_)));
    }

    #[test]
    fn naive_datetime_constants_use_given_zone() {
        let tz = parse_time_zone("+02:00").unwrap();
        let wire = leaf("due", "less", "datetime", json!("2024-05-01 09:00:00"));
        let f = Formula::from_json_in(&wire, &tz).unwrap();
        let Formula::Leaf(Leaf { operand: Operand::Single(Value::Datetime(dt)), .. }) = f else {
            panic!("expected datetime leaf");
        };
        assert_eq!(dt.to_rfc3339(), "2024-05-01T09:00:00+02:00");
    }

    #[test]
    fn serialization_round_trips() {
        let f = Formula::Or(vec![
            Formula::leaf("a", Operator::Equal, DataType::Boolean, Operand::Single(Value::Boolean(true))),
            Formula::And(vec![
                Formula::leaf("b", Operator::NotBetween, DataType::Double, Operand::Range(Value::Double(1.0), Value::Double(2.5))),
                Formula::leaf("c", Operator::IsEmpty, DataType::String, Operand::None),
            ])
            .negate(),
            Formula::leaf("c", Operator::Contains, DataType::String, Operand::Single(Value::String(String::new())))
                .negate()
                .negate(),
            Formula::And(vec![]),
        ]);
        let wire = f.to_json();
        assert_eq!(Formula::from_json(&wire).unwrap(), f);

        let text = serde_json::to_string(&f).unwrap();
        let back: Formula = serde_json::from_str(&text).unwrap();
        assert_eq!(back, f);
        assert_eq!(back.to_json(), wire);
    }

    #[test]
    fn columns_of_matches_serialized_fields() {
        let f = Formula::And(vec![
            Formula::leaf("x", Operator::IsNull, DataType::String, Operand::None),
            Formula::leaf("y", Operator::IsNotNull, DataType::Integer, Operand::None).negate(),
        ]);
        let text = f.to_json().to_string();
        for column in f.columns_of() {
            assert!(text.contains(&format!("\"field\":\"{column}\"")));
        }
    }
}
