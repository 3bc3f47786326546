//! Action template language.
//!
//! Templates are parsed once into a typed [`Template`] and rendered per row
//! against an [`EvaluationContext`]. Supported constructs:
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `{{ name }}` | column value, else attribute |
//! | `{% if c %}…{% elif c %}…{% else %}…{% endif %}` | conditional blocks |
//! | `{% visualization col %}` | HTML histogram over the selected rows |
//! | `{% rubric_feedback %}` | rubric feedback for the current row |
//! | `{% column_list col %}` | every selected value of a column |
//!
//! Names may be quoted (`{{ "first name" }}`).

mod parser;
mod render;
pub mod visualization;

use std::collections::{BTreeMap, BTreeSet};

pub use parser::{quote_if_needed, remove_condition, rename_condition, rename_variable, Node, TOKEN_PATTERN};
pub use render::{escape_html, EvaluationContext, RenderOptions};

use crate::frame::Row;
use crate::value::{Cell, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("Unknown tag '{{% {0} %}}'")]
    UnknownTag(String),

    #[error("Unexpected '{{% {0} %}}'")]
    UnexpectedTag(String),

    #[error("Missing '{{% endif %}}'")]
    UnclosedIf,

    #[error("Empty name in template")]
    EmptyName,

    #[error("'{0}' is neither a column nor an attribute")]
    UndefinedVariable(String),

    #[error("Condition '{0}' does not exist")]
    UndefinedCondition(String),

    #[error("'{0}' is not available for this action")]
    UnsupportedTag(&'static str),
}

/// Data behind the tags that look beyond the current row.
pub trait TagSource {
    /// HTML histogram of `column` with `current` highlighted.
    fn visualization(&self, column: &str, current: Option<&Value>) -> Result<String, TemplateError>;

    /// Rubric feedback for one row.
    fn rubric_feedback(&self, row: &Row) -> Result<String, TemplateError>;

    /// Every selected value of `column`.
    fn column_values(&self, column: &str) -> Result<Vec<Cell>, TemplateError>;
}

/// Tag source for contexts with no selection.
pub struct NoTags;

impl TagSource for NoTags {
    fn visualization(&self, _: &str, _: Option<&Value>) -> Result<String, TemplateError> {
        Err(TemplateError::UnsupportedTag("visualization"))
    }

    fn rubric_feedback(&self, _: &Row) -> Result<String, TemplateError> {
        Err(TemplateError::UnsupportedTag("rubric_feedback"))
    }

    fn column_values(&self, _: &str) -> Result<Vec<Cell>, TemplateError> {
        Err(TemplateError::UnsupportedTag("column_list"))
    }
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            nodes: parser::parse(text)?,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Names used in `{{ }}` placeholders.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        walk(&self.nodes, &mut |node| {
            if let Node::Variable(name) = node {
                out.insert(name.clone());
            }
        });
        out
    }

    /// Conditions used in `{% if %}`/`{% elif %}`.
    pub fn condition_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        walk(&self.nodes, &mut |node| {
            if let Node::If { branches, .. } = node {
                out.extend(branches.iter().map(|(c, _)| c.clone()));
            }
        });
        out
    }

    /// Columns named by visualization and column-list tags.
    pub fn tag_columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        walk(&self.nodes, &mut |node| match node {
            Node::Visualization(c) | Node::ColumnList(c) => {
                out.insert(c.clone());
            }
            _ => {}
        });
        out
    }

    pub fn render(
        &self,
        ctx: &EvaluationContext<'_>,
        options: &RenderOptions,
        tags: &dyn TagSource,
    ) -> Result<String, TemplateError> {
        let mut out = String::new();
        render::render_nodes(&self.nodes, ctx, options, tags, &mut out)?;
        Ok(out)
    }
}

fn walk(nodes: &[Node], visit: &mut impl FnMut(&Node)) {
    for node in nodes {
        visit(node);
        if let Node::If { branches, otherwise } = node {
            for (_, body) in branches {
                walk(body, visit);
            }
            walk(otherwise, visit);
        }
    }
}

/// Convenience for rendering with attributes and conditions only.
pub fn render_text(
    text: &str,
    columns: &Row,
    attributes: &BTreeMap<String, String>,
    conditions: &BTreeMap<String, bool>,
    options: &RenderOptions,
) -> Result<String, TemplateError> {
    let ctx = EvaluationContext {
        columns,
        attributes,
        conditions,
    };
    Template::parse(text)?.render(&ctx, options, &NoTags)
}
