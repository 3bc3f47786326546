//! Tokenizer and parser for action templates.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::TemplateError;

/// `{{ name }}` placeholders and `{% tag %}` blocks.
pub const TOKEN_PATTERN: &str = r"(?s)\{\{\s*(.*?)\s*\}\}|\{%\s*(.*?)\s*%\}";

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(TOKEN_PATTERN).expect("valid regex"));

/// Names that need quoting when written back into a tag.
static BARE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Variable(String),
    If {
        branches: Vec<(String, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Visualization(String),
    RubricFeedback,
    ColumnList(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Variable(String),
    Tag(String),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in TOKEN_RE.captures_iter(text) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        if whole.start > last {
            tokens.push(Token::Text(text[last..whole.start].to_string()));
        }
        if let Some(var) = caps.get(1) {
            tokens.push(Token::Variable(var.as_str().to_string()));
        } else if let Some(tag) = caps.get(2) {
            tokens.push(Token::Tag(tag.as_str().to_string()));
        }
        last = whole.end;
    }
    if last < text.len() {
        tokens.push(Token::Text(text[last..].to_string()));
    }
    tokens
}

/// Strip one level of matching quotes.
pub fn unquote(raw: &str) -> Result<String, TemplateError> {
    let trimmed = raw.trim();
    let inner = match trimmed.as_bytes() {
        [b'"', .., b'"'] | [b'\'', .., b'\''] if trimmed.len() >= 2 => &trimmed[1..trimmed.len() - 1],
        _ => trimmed,
    };
    if inner.is_empty() {
        return Err(TemplateError::EmptyName);
    }
    Ok(inner.to_string())
}

/// Write a name so that [`unquote`] reads it back.
pub fn quote_if_needed(name: &str) -> String {
    if BARE_NAME_RE.is_match(name) {
        name.to_string()
    } else {
        format!("\"{name}\"")
    }
}

/// Split `keyword rest` of a tag body.
fn split_tag(body: &str) -> (&str, &str) {
    match body.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (body, ""),
    }
}

pub fn parse(text: &str) -> Result<Vec<Node>, TemplateError> {
    let mut parser = Parser {
        tokens: tokenize(text),
        pos: 0,
    };
    let (nodes, stop) = parser.block(&[])?;
    match stop {
        Some(tag) => Err(TemplateError::UnexpectedTag(tag)),
        None => Ok(nodes),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse until end of input or a tag whose keyword is in `stops`.
    /// Returns the nodes and the stopping tag body.
    fn block(&mut self, stops: &[&str]) -> Result<(Vec<Node>, Option<String>), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.get(self.pos).cloned() {
            self.pos += 1;
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Variable(name) => nodes.push(Node::Variable(unquote(&name)?)),
                Token::Tag(body) => {
                    let (keyword, rest) = split_tag(&body);
                    if stops.contains(&keyword) {
                        return Ok((nodes, Some(body)));
                    }
                    match keyword {
                        "if" => nodes.push(self.if_block(rest)?),
                        "visualization" => nodes.push(Node::Visualization(unquote(rest)?)),
                        "column_list" => nodes.push(Node::ColumnList(unquote(rest)?)),
                        "rubric_feedback" => nodes.push(Node::RubricFeedback),
                        "elif" | "else" | "endif" => {
                            return Err(TemplateError::UnexpectedTag(body.clone()))
                        }
                        _ => return Err(TemplateError::UnknownTag(body.clone())),
                    }
                }
            }
        }
        Ok((nodes, None))
    }

    fn if_block(&mut self, first_condition: &str) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut condition = unquote(first_condition)?;
        loop {
            let (body, stop) = self.block(&["elif", "else", "endif"])?;
            branches.push((condition, body));
            let stop = stop.ok_or(TemplateError::UnclosedIf)?;
            let (keyword, rest) = split_tag(&stop);
            match keyword {
                "elif" => condition = unquote(rest)?,
                "else" => {
                    let (otherwise, end) = self.block(&["endif"])?;
                    end.ok_or(TemplateError::UnclosedIf)?;
                    return Ok(Node::If { branches, otherwise });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
            }
        }
    }
}

/// Rewrite every reference to a column in raw template text: placeholders
/// and the column arguments of visualization and column-list tags.
pub fn rename_variable(text: &str, old: &str, new: &str) -> String {
    TOKEN_RE
        .replace_all(text, |caps: &Captures| {
            let original = caps[0].to_string();
            if let Some(var) = caps.get(1) {
                return match unquote(var.as_str()) {
                    Ok(name) if name == old => format!("{{{{ {} }}}}", quote_if_needed(new)),
                    _ => original,
                };
            }
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            let (keyword, rest) = split_tag(body);
            match keyword {
                "visualization" | "column_list" if unquote(rest).ok().as_deref() == Some(old) => {
                    format!("{{% {keyword} {} %}}", quote_if_needed(new))
                }
                _ => original,
            }
        })
        .into_owned()
}

/// Rewrite `{% if %}` and `{% elif %}` references to a condition.
pub fn rename_condition(text: &str, old: &str, new: &str) -> String {
    TOKEN_RE
        .replace_all(text, |caps: &Captures| {
            let original = caps[0].to_string();
            let Some(body) = caps.get(2).map(|m| m.as_str()) else {
                return original;
            };
            let (keyword, rest) = split_tag(body);
            match keyword {
                "if" | "elif" if unquote(rest).ok().as_deref() == Some(old) => {
                    format!("{{% {keyword} {} %}}", quote_if_needed(new))
                }
                _ => original,
            }
        })
        .into_owned()
}

/// Drop every branch guarded by condition `name`, reading it as always
/// false: a following `elif` takes the branch's place, and an `if` left with
/// no branch is replaced by its `else` body. Returns `None` when the text
/// does not mention the condition.
pub fn remove_condition(text: &str, name: &str) -> Result<Option<String>, TemplateError> {
    let nodes = parse(text)?;
    let mut found = false;
    let stripped = strip_condition(nodes, name, &mut found);
    if !found {
        return Ok(None);
    }
    let mut out = String::with_capacity(text.len());
    write_nodes(&stripped, &mut out);
    Ok(Some(out))
}

fn strip_condition(nodes: Vec<Node>, name: &str, found: &mut bool) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            Node::If { branches, otherwise } => {
                let branches: Vec<(String, Vec<Node>)> = branches
                    .into_iter()
                    .filter(|(condition, _)| {
                        let keep = condition != name;
                        *found |= !keep;
                        keep
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(|(condition, body)| (condition, strip_condition(body, name, found)))
                    .collect();
                let otherwise = strip_condition(otherwise, name, found);
                if branches.is_empty() {
                    out.extend(otherwise);
                } else {
                    out.push(Node::If { branches, otherwise });
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn write_nodes(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable(name) => {
                out.push_str(&format!("{{{{ {} }}}}", quote_if_needed(name)));
            }
            Node::If { branches, otherwise } => {
                for (i, (condition, body)) in branches.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elif" };
                    out.push_str(&format!("{{% {keyword} {} %}}", quote_if_needed(condition)));
                    write_nodes(body, out);
                }
                if !otherwise.is_empty() {
                    out.push_str("{% else %}");
                    write_nodes(otherwise, out);
                }
                out.push_str("{% endif %}");
            }
            Node::Visualization(column) => {
                out.push_str(&format!("{{% visualization {} %}}", quote_if_needed(column)));
            }
            Node::RubricFeedback => out.push_str("{% rubric_feedback %}"),
            Node::ColumnList(column) => {
                out.push_str(&format!("{{% column_list {} %}}", quote_if_needed(column)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn removed_condition_reads_as_false() {
        let text = "Hi {{ name }}. {% if passed %}Yes{% elif close %}Almost{% else %}No{% endif %}!";
        assert_eq!(
            remove_condition(text, "passed").unwrap().as_deref(),
            Some("Hi {{ name }}. {% if close %}Almost{% else %}No{% endif %}!")
        );
        assert_eq!(
            remove_condition("A{% if passed %}Yes{% else %}No{% endif %}B", "passed").unwrap().as_deref(),
            Some("ANoB")
        );
        assert_eq!(
            remove_condition("{% if late %}x{% if passed %}y{% endif %}{% endif %}", "passed").unwrap().as_deref(),
            Some("{% if late %}x{% endif %}")
        );
        assert_eq!(remove_condition(text, "ghost").unwrap(), None);
    }

    #[test]
    fn parses_text_variables_and_blocks() {
        let nodes = parse("Hi {{ name }}. {% if passed %}Yes{% elif close %}Almost{% else %}No{% endif %}!").unwrap();
        assert_eq!(nodes.len(), 5);
        assert_eq!(nodes[1], Node::Variable("name".into()));
        let Node::If { branches, otherwise } = &nodes[3] else {
            panic!("expected if block");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[1].0, "close");
        assert_eq!(otherwise, &vec![Node::Text("No".into())]);
    }

    #[test]
    fn quoted_names() {
        let nodes = parse("{{ \"first name\" }}{% visualization 'final score' %}").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Variable("first name".into()),
                Node::Visualization("final score".into())
            ]
        );
    }

    #[test]
    fn nested_if_blocks() {
        let nodes = parse("{% if a %}{% if b %}x{% endif %}{% endif %}").unwrap();
        assert_matches!(&nodes[0], Node::If { branches, .. } if matches!(branches[0].1[0], Node::If { .. }));
    }

    #[test]
    fn structural_errors() {
        assert_matches!(parse("{% if a %}x"), Err(TemplateError::UnclosedIf));
        assert_matches!(parse("x{% endif %}"), Err(TemplateError::UnexpectedTag(_)));
        assert_matches!(parse("{% if a %}{% else %}{% else %}{% endif %}"), Err(TemplateError::UnexpectedTag(_)));
        assert_matches!(parse("{% for x in y %}"), Err(TemplateError::UnknownTag(_)));
        assert_matches!(parse("{{ }}"), Err(TemplateError::EmptyName));
    }

    #[test]
    fn rename_variable_rewrites_placeholders_and_tags() {
        let text = "{{ score }} {{score}} {{ scores }} {% visualization score %} {% if score %}";
        assert_eq!(
            rename_variable(text, "score", "final mark"),
            "{{ \"final mark\" }} {{ \"final mark\" }} {{ scores }} {% visualization \"final mark\" %} {% if score %}"
        );
    }

    #[test]
    fn rename_condition_rewrites_if_tags() {
        let text = "{% if passed %}a{% elif passed %}b{% endif %}{{ passed }}";
        assert_eq!(
            rename_condition(text, "passed", "ok"),
            "{% if ok %}a{% elif ok %}b{% endif %}{{ passed }}"
        );
    }
}
