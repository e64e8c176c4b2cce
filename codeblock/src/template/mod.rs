//! Placeholder substitution: `%%%dotted.path%%%` in a block body is replaced
//! with the value found at that path in the bindings.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

use crate::block::Codeblock;
use crate::document::Node;
use crate::freeze::freeze_to_value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unbound variable `{path}`: `{segment}` is not defined")]
    UnboundVariable { path: String, segment: String },

    #[error("substituting `{path}` never terminates: its value contains the placeholder")]
    RecursiveSubstitution { path: String },
}

/// Line prefix, opening quote, placeholder, path, closing quote.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^(.*?)(["']?)(%%%([^%]+)%%%)(["']?)"#).expect("placeholder pattern")
});

/// Producer calls are copied through untouched.
static RAW_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"__codeblock__\("(?:[^"\\]|\\.)*", \[[^\]]*\], "(?:[^"\\]|\\.)*", "__codeblock_end__"\)"#,
    )
    .expect("producer call pattern")
});

const MAX_SUBSTITUTIONS: usize = 4096;

/// Resolve every placeholder in `block` against `bindings`.
///
/// Returns a new, compiled block with the same format and parameters. A
/// compiled block is returned as is.
pub fn compile(block: &Codeblock, bindings: &Value) -> Result<Codeblock, TemplateError> {
    if block.is_compiled() {
        return Ok(block.clone());
    }

    let code = block.code();
    let mut segments = Vec::new();
    let mut text = RAW_SEGMENT
        .replace_all(&code, |caps: &Captures| {
            segments.push(caps[0].to_string());
            format!("__codeblock_segment_{}__", segments.len() - 1)
        })
        .into_owned();

    let mut passes = 0;
    loop {
        let found = PLACEHOLDER
            .captures(&text)
            .map(|caps| substitution(&caps, bindings));
        let Some(found) = found else {
            break;
        };
        let Substitution {
            path,
            search,
            replacement,
        } = found?;
        passes += 1;
        if passes > MAX_SUBSTITUTIONS || replacement.contains(&search) {
            return Err(TemplateError::RecursiveSubstitution { path });
        }
        tracing::trace!(%path, format = block.format(), "substituting placeholder");
        text = text.replace(&search, &replacement);
    }

    for (index, segment) in segments.iter().enumerate() {
        text = text.replacen(&format!("__codeblock_segment_{index}__"), segment, 1);
    }
    Ok(block.with_compiled_code(&text))
}

struct Substitution {
    path: String,
    /// Text replaced everywhere it occurs.
    search: String,
    replacement: String,
}

fn substitution(caps: &Captures, bindings: &Value) -> Result<Substitution, TemplateError> {
    let path = caps[4].trim().to_string();
    let prefix = &caps[1];
    let (open, close) = (&caps[2], &caps[5]);

    let mut value = stringify(lookup(bindings, &path)?);
    if value.contains('\n') {
        value = value.replace('\n', &format!("\n{prefix}"));
    }

    let (search, replacement) = if !open.is_empty() && open == close {
        let escaped = value.replace('\\', "\\\\").replace(open, &format!("\\{open}"));
        (
            format!("{open}{}{close}", &caps[3]),
            format!("{open}{escaped}{close}"),
        )
    } else {
        (caps[3].to_string(), value)
    };
    Ok(Substitution {
        path,
        search,
        replacement,
    })
}

/// Compile every block in a tree, using the map that holds it (frozen to
/// plain data) as its bindings. Producers are resolved first.
pub fn compile_all(node: &Node) -> Result<Node, TemplateError> {
    compile_node(node, &Value::Null)
}

fn compile_node(node: &Node, bindings: &Value) -> Result<Node, TemplateError> {
    match node {
        Node::Block(block) => Ok(Node::Block(compile(block, bindings)?)),
        Node::Producer(producer) => Ok(Node::Block(compile(&producer.produce(), bindings)?)),
        Node::Map(entries) => {
            let scope = freeze_to_value(node);
            entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), compile_node(value, &scope)?)))
                .collect::<Result<IndexMap<_, _>, _>>()
                .map(Node::Map)
        }
        Node::Sequence(items) => items
            .iter()
            .map(|item| compile_node(item, bindings))
            .collect::<Result<Vec<_>, _>>()
            .map(Node::Sequence),
        other => Ok(other.clone()),
    }
}

/// Follow a dotted path through object keys and array indices.
fn lookup<'a>(bindings: &'a Value, path: &str) -> Result<&'a Value, TemplateError> {
    let mut current = bindings;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(entries) => entries.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| TemplateError::UnboundVariable {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
    }
    Ok(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
