//! Freeze a document tree to plain JSON, thaw it back, and regenerate the
//! annotated source from it.

mod error;

pub use error::SerializationError;

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Map, Value};

use crate::block::canonical::{is_canonical_string, is_tagged_object};
use crate::block::Codeblock;
use crate::block::producer::PRODUCER_FN;
use crate::document::Node;
use crate::parser::program::parse_call;

/// Layout of [`freeze_to_source`] output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceOptions {
    /// Emit the surrounding JSON on one line instead of indenting it.
    pub oneline: bool,
}

/// Plain data: every block and producer becomes its canonical string.
pub fn freeze_to_value(node: &Node) -> Value {
    match node {
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(*b),
        Node::Number(n) => Value::Number(n.clone()),
        Node::String(s) => Value::String(s.clone()),
        Node::Sequence(items) => Value::Array(items.iter().map(freeze_to_value).collect()),
        Node::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), freeze_to_value(value)))
                .collect(),
        ),
        Node::Block(block) => Value::String(block.to_canonical_string()),
        Node::Producer(producer) => Value::String(producer.produce().to_canonical_string()),
    }
}

/// Compact JSON text of [`freeze_to_value`].
pub fn freeze_to_json(node: &Node) -> Result<String, SerializationError> {
    serde_json::to_string(&freeze_to_value(node))
        .map_err(|err| SerializationError::Encode(err.to_string()))
}

pub fn thaw_from_json(text: &str) -> Result<Node, SerializationError> {
    let value: Value = serde_json::from_str(text)?;
    thaw_value(value)
}

/// Rebuild a tree, turning every tagged string or tagged object into a block.
pub fn thaw_value(value: Value) -> Result<Node, SerializationError> {
    thaw_value_with(value, &mut |_| None)
}

/// Like [`thaw_value`], but string leaves are first offered to `leaf`; a
/// returned node is used in place of the string.
pub fn thaw_value_with<F>(value: Value, leaf: &mut F) -> Result<Node, SerializationError>
where
    F: FnMut(&str) -> Option<Node>,
{
    Ok(match value {
        Value::String(s) => {
            if let Some(node) = leaf(&s) {
                node
            } else if is_canonical_string(&s) {
                Node::Block(Codeblock::from_canonical_str(&s)?)
            } else {
                Node::String(s)
            }
        }
        Value::Object(entries) if is_tagged_object(&entries) => {
            Node::Block(Codeblock::from_canonical_value(Value::Object(entries))?)
        }
        Value::Object(entries) => Node::Map(
            entries
                .into_iter()
                .map(|(key, value)| Ok((key, thaw_value_with(value, leaf)?)))
                .collect::<Result<_, SerializationError>>()?,
        ),
        Value::Array(items) => Node::Sequence(
            items
                .into_iter()
                .map(|value| thaw_value_with(value, leaf))
                .collect::<Result<_, _>>()?,
        ),
        other => Node::from(other),
    })
}

/// The block a node stands for: a block itself, or what a producer yields.
pub fn block_from_node(node: &Node) -> Result<Codeblock, SerializationError> {
    match node {
        Node::Block(block) => Ok(block.clone()),
        Node::Producer(producer) => Ok(producer.produce()),
        other => Err(SerializationError::NotABlock {
            found: other.type_name(),
        }),
    }
}

const SOURCE_SLOT_PREFIX: &str = "__codeblock_source_";

/// Regenerate annotated source: the document as JSON with every block written
/// back in `format (params) >>>` … `<<<` notation.
pub fn freeze_to_source(node: &Node, options: &SourceOptions) -> Result<String, SerializationError> {
    let mut slots = Vec::new();
    let value = with_source_slots(node, &mut slots);

    let json =
        json_text(&value, options.oneline).map_err(|err| SerializationError::Encode(err.to_string()))?;

    // Slots appear in the text in the order they were allocated.
    let mut out = String::with_capacity(json.len());
    let mut cursor = 0;
    for (index, slot) in slots.iter().enumerate() {
        let needle = format!("\"{SOURCE_SLOT_PREFIX}{index}__\"");
        let Some(found) = json[cursor..].find(&needle).map(|at| cursor + at) else {
            return Err(SerializationError::Encode(format!(
                "lost the position of block {index}"
            )));
        };
        let line_start = json[..found].rfind('\n').map_or(0, |at| at + 1);
        let line = &json[line_start..found];
        let indent = &line[..line.len() - line.trim_start().len()];
        out.push_str(&json[cursor..found]);
        out.push_str(&slot.render(indent));
        cursor = found + needle.len();
    }
    out.push_str(&json[cursor..]);
    Ok(out)
}

fn json_text(value: &Value, oneline: bool) -> Result<String, serde_json::Error> {
    if oneline {
        return serde_json::to_string(value);
    }
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

enum SourceSlot {
    Block(Codeblock),
    Call(String),
}

impl SourceSlot {
    fn render(&self, indent: &str) -> String {
        match self {
            SourceSlot::Block(block) => block_source(block, indent),
            SourceSlot::Call(text) => format!("({text})"),
        }
    }
}

fn with_source_slots(node: &Node, slots: &mut Vec<SourceSlot>) -> Value {
    let slot = match node {
        Node::Block(block) => SourceSlot::Block(block.clone()),
        Node::Producer(producer) => match producer.source_text() {
            Some(text) => SourceSlot::Call(text),
            None => SourceSlot::Block(producer.produce()),
        },
        Node::Sequence(items) => {
            return Value::Array(items.iter().map(|item| with_source_slots(item, slots)).collect());
        }
        Node::Map(entries) => {
            let mut object = Map::new();
            for (key, value) in entries {
                object.insert(key.clone(), with_source_slots(value, slots));
            }
            return Value::Object(object);
        }
        scalar => return freeze_to_value(scalar),
    };
    slots.push(slot);
    Value::String(format!("{SOURCE_SLOT_PREFIX}{}__", slots.len() - 1))
}

/// `(<format> (<params>) >>>`, the body indented one level past `indent`,
/// then `<indent><<<)`.
fn block_source(block: &Codeblock, indent: &str) -> String {
    format!("({})", block_notation(block, indent))
}

fn block_notation(block: &Codeblock, indent: &str) -> String {
    let mut out = format!("{} ({}) >>>\n", block.format(), block.parameters().join(", "));
    let body_indent = format!("{indent}    ");
    let code = block.code();
    if !code.is_empty() {
        for line in code.split('\n') {
            if !line.is_empty() {
                let own = &line[..line.len() - line.trim_start().len()];
                out.push_str(&body_indent);
                out.push_str(&expand_nested(line, &format!("{body_indent}{own}")));
            }
            out.push('\n');
        }
    }
    out.push_str(indent);
    out.push_str("<<<");
    out
}

/// Write the blocks nested in a body line back in block notation. They appear
/// as canonical string literals or as producer calls.
fn expand_nested(line: &str, indent: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let (mut cursor, mut i) = (0, 0);
    while i < line.len() {
        let rest = &line[i..];
        if rest.starts_with('"') {
            let Some((literal, len)) = string_literal(rest) else {
                i += 1;
                continue;
            };
            if is_canonical_string(&literal) {
                if let Ok(inner) = Codeblock::from_canonical_str(&literal) {
                    out.push_str(&line[cursor..i]);
                    out.push_str(&block_source(&inner, indent));
                    cursor = i + len;
                }
            }
            i += len;
        } else if rest.starts_with(PRODUCER_FN) && rest[PRODUCER_FN.len()..].starts_with('(') {
            match parse_call(line, i) {
                // the call keeps its surrounding parentheses in program text
                Ok((producer, end)) => {
                    out.push_str(&line[cursor..i]);
                    out.push_str(&block_notation(&producer.produce(), indent));
                    cursor = end;
                    i = end;
                }
                Err(_) => i += PRODUCER_FN.len(),
            }
        } else {
            i += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    out.push_str(&line[cursor..]);
    out
}

/// The JSON string literal at the start of `text` and its length in bytes.
fn string_literal(text: &str) -> Option<(String, usize)> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<String>();
    let literal = stream.next()?.ok()?;
    Some((literal, stream.byte_offset()))
}
