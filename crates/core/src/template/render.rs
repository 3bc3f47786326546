use std::collections::BTreeMap;

use super::parser::Node;
use super::{TagSource, TemplateError};
use crate::frame::Row;
use crate::types::{utc, TimeZone};
use crate::value::{cell_to_json, render_cell};

/// Everything a template can see for one row.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub columns: &'a Row,
    pub attributes: &'a BTreeMap<String, String>,
    pub conditions: &'a BTreeMap<String, bool>,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub time_zone: TimeZone,
    /// Escape substituted values for HTML output.
    pub escape_html: bool,
    /// Render `{% column_list %}` as a JSON array instead of a
    /// comma-separated string.
    pub column_list_as_json: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            time_zone: utc(),
            escape_html: true,
            column_list_as_json: false,
        }
    }
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(super) fn render_nodes(
    nodes: &[Node],
    ctx: &EvaluationContext<'_>,
    options: &RenderOptions,
    tags: &dyn TagSource,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable(name) => {
                let text = lookup(name, ctx, options)?;
                push_value(out, &text, options);
            }
            Node::If {
                branches,
                otherwise,
            } => {
                let mut chosen = None;
                for (condition, body) in branches {
                    let holds = ctx
                        .conditions
                        .get(condition)
                        .copied()
                        .ok_or_else(|| TemplateError::UndefinedCondition(condition.clone()))?;
                    if holds {
                        chosen = Some(body);
                        break;
                    }
                }
                render_nodes(chosen.unwrap_or(otherwise), ctx, options, tags, out)?;
            }
            Node::Visualization(column) => {
                let current = ctx.columns.get(column).and_then(|c| c.as_ref());
                out.push_str(&tags.visualization(column, current)?);
            }
            Node::RubricFeedback => out.push_str(&tags.rubric_feedback(ctx.columns)?),
            Node::ColumnList(column) => {
                let values = tags.column_values(column)?;
                if options.column_list_as_json {
                    let list = serde_json::Value::Array(values.iter().map(cell_to_json).collect());
                    out.push_str(&list.to_string());
                } else {
                    let text = values
                        .iter()
                        .filter(|v| v.is_some())
                        .map(|v| render_cell(v, &options.time_zone))
                        .collect::<Vec<_>>()
                        .join(", ");
                    push_value(out, &text, options);
                }
            }
        }
    }
    Ok(())
}

/// Column value first, then attribute.
fn lookup(name: &str, ctx: &EvaluationContext<'_>, options: &RenderOptions) -> Result<String, TemplateError> {
    if let Some(cell) = ctx.columns.get(name) {
        return Ok(render_cell(cell, &options.time_zone));
    }
    ctx.attributes
        .get(name)
        .cloned()
        .ok_or_else(|| TemplateError::UndefinedVariable(name.to_string()))
}

fn push_value(out: &mut String, text: &str, options: &RenderOptions) {
    if options.escape_html {
        out.push_str(&escape_html(text));
    } else {
        out.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{NoTags, Template};
    use super::*;
    use crate::value::Value;
    use assert_matches::assert_matches;

    fn row(pairs: &[(&str, Option<Value>)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn render(text: &str, row: &Row, conditions: &[(&str, bool)], options: &RenderOptions) -> Result<String, TemplateError> {
        let mut attributes = BTreeMap::new();
        attributes.insert("course".to_string(), "Intro".to_string());
        attributes.insert("name".to_string(), "shadowed".to_string());
        let conditions: BTreeMap<String, bool> =
            conditions.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let ctx = EvaluationContext {
            columns: row,
            attributes: &attributes,
            conditions: &conditions,
        };
        Template::parse(text)?.render(&ctx, options, &NoTags)
    }

    #[test]
    fn expands_greeting_with_condition() {
        let text = "Hi {{ name }}, score {{ score }}. {% if passed %}Congrats{% endif %}";
        let options = RenderOptions::default();
        let ada = row(&[("name", Some(Value::String("Ada".into()))), ("score", Some(Value::Integer(65)))]);
        assert_eq!(
            render(text, &ada, &[("passed", true)], &options).unwrap(),
            "Hi Ada, score 65. Congrats"
        );
        let bo = row(&[("name", Some(Value::String("Bo".into()))), ("score", Some(Value::Integer(30)))]);
        assert_eq!(
            render(text, &bo, &[("passed", false)], &options).unwrap(),
            "Hi Bo, score 30. "
        );
    }

    #[test]
    fn columns_shadow_attributes() {
        let r = row(&[("name", Some(Value::String("Ada".into())))]);
        let options = RenderOptions::default();
        assert_eq!(render("{{ name }} / {{ course }}", &r, &[], &options).unwrap(), "Ada / Intro");
    }

    #[test]
    fn escapes_only_html_output() {
        let r = row(&[("note", Some(Value::String("<b>\"hi\"</b>".into())))]);
        let html = RenderOptions::default();
        assert_eq!(
            render("{{ note }}", &r, &[], &html).unwrap(),
            "&lt;b&gt;&quot;hi&quot;&lt;/b&gt;"
        );
        let raw = RenderOptions {
            escape_html: false,
            ..RenderOptions::default()
        };
        assert_eq!(render("{{ note }}", &r, &[], &raw).unwrap(), "<b>\"hi\"</b>");
    }

    #[test]
    fn null_renders_empty_and_else_branch_runs() {
        let r = row(&[("score", None)]);
        let options = RenderOptions::default();
        assert_eq!(
            render("[{{ score }}]{% if a %}A{% elif b %}B{% else %}C{% endif %}", &r, &[("a", false), ("b", false)], &options).unwrap(),
            "[]C"
        );
    }

    #[test]
    fn undefined_names_fail() {
        let r = row(&[]);
        let options = RenderOptions::default();
        assert_matches!(render("{{ ghost }}", &r, &[], &options), Err(TemplateError::UndefinedVariable(_)));
        assert_matches!(render("{% if ghost %}x{% endif %}", &r, &[], &options), Err(TemplateError::UndefinedCondition(_)));
        assert_matches!(render("{% rubric_feedback %}", &r, &[], &options), Err(TemplateError::UnsupportedTag(_)));
    }
}
