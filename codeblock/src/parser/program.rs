//! Read program-mode output back into a document tree.
//!
//! Program text is JSON in which every block was replaced by a
//! `__codeblock__(format, parameters, body, "__codeblock_end__")` call. Calls
//! become [`Producer`] leaves; the rest is parsed as JSON.

use serde_json::Value;

use crate::block::Producer;
use crate::block::producer::{PRODUCER_END, PRODUCER_FN, PRODUCER_PRELUDE};
use crate::document::Node;
use crate::freeze::{SerializationError, thaw_value_with};

const PRODUCER_SLOT_PREFIX: &str = "__codeblock_producer_";

pub fn load_program(text: &str) -> Result<Node, SerializationError> {
    let text = text.strip_prefix(PRODUCER_PRELUDE).unwrap_or(text);
    let bytes = text.as_bytes();
    let mut json = String::with_capacity(text.len());
    let mut producers = Vec::new();
    let mut cursor = 0;
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        if in_string {
            match bytes[i] {
                b'\\' => i += 2,
                b'"' => {
                    in_string = false;
                    i += 1;
                }
                _ => i += 1,
            }
            continue;
        }
        if bytes[i] == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        if !bytes[i..].starts_with(PRODUCER_FN.as_bytes())
            || bytes.get(i + PRODUCER_FN.len()) != Some(&b'(')
        {
            i += 1;
            continue;
        }

        let (producer, call_end) = parse_call(text, i)?;
        let (mut start, mut end) = (i, call_end);
        let before = text[cursor..start].trim_end();
        let after = text[end..].trim_start();
        if before.ends_with('(') && after.starts_with(')') {
            start = cursor + before.len() - 1;
            end = text.len() - after.len() + 1;
        }
        json.push_str(&text[cursor..start]);
        json.push_str(&format!("\"{PRODUCER_SLOT_PREFIX}{}__\"", producers.len()));
        producers.push(Some(producer));
        cursor = end;
        i = end;
    }
    json.push_str(&text[cursor..]);

    tracing::debug!(producers = producers.len(), "loading program text");
    let value: Value = serde_json::from_str(&json)?;
    thaw_value_with(value, &mut |leaf| {
        let index = leaf
            .strip_prefix(PRODUCER_SLOT_PREFIX)?
            .strip_suffix("__")?
            .parse::<usize>()
            .ok()?;
        producers.get_mut(index)?.take().map(Node::Producer)
    })
}

/// Parse the call starting at `at`; returns the producer and the offset just
/// past its closing parenthesis.
pub(crate) fn parse_call(text: &str, at: usize) -> Result<(Producer, usize), SerializationError> {
    let mut pos = at + PRODUCER_FN.len() + 1;

    let format = next_value(text, &mut pos)?;
    expect(text, &mut pos, b',')?;
    let parameters = next_value(text, &mut pos)?;
    expect(text, &mut pos, b',')?;
    let body = next_value(text, &mut pos)?;
    expect(text, &mut pos, b',')?;
    let end = next_value(text, &mut pos)?;
    expect(text, &mut pos, b')')?;

    let malformed = |message: &str| SerializationError::MalformedProducer {
        message: message.to_string(),
        offset: at,
    };
    if end.as_str() != Some(PRODUCER_END) {
        return Err(malformed("missing end sentinel"));
    }
    let format = format.as_str().ok_or_else(|| malformed("format is not a string"))?;
    let body = body.as_str().ok_or_else(|| malformed("body is not a string"))?;
    let parameters = parameters
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| malformed("parameters are not a list of names"))?;
    let producer = Producer::wrapped(format, parameters, body).map_err(|err| malformed(&err.to_string()))?;
    Ok((producer, pos))
}

fn skip_whitespace(text: &str, pos: &mut usize) {
    *pos += text[*pos..].len() - text[*pos..].trim_start().len();
}

fn next_value(text: &str, pos: &mut usize) -> Result<Value, SerializationError> {
    skip_whitespace(text, pos);
    let mut stream = serde_json::Deserializer::from_str(&text[*pos..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => {
            *pos += stream.byte_offset();
            Ok(value)
        }
        Some(Err(err)) => Err(SerializationError::MalformedProducer {
            message: err.to_string(),
            offset: *pos,
        }),
        None => Err(SerializationError::MalformedProducer {
            message: "missing argument".to_string(),
            offset: *pos,
        }),
    }
}

fn expect(text: &str, pos: &mut usize, byte: u8) -> Result<(), SerializationError> {
    skip_whitespace(text, pos);
    if text.as_bytes().get(*pos) == Some(&byte) {
        *pos += 1;
        Ok(())
    } else {
        Err(SerializationError::MalformedProducer {
            message: format!("expected `{}`", byte as char),
            offset: *pos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_call_becomes_producer() {
        let text = format!(
            "{PRODUCER_PRELUDE}{{\"run\": (__codeblock__(\"rhai\", [\"x\"], \"x + 1\", \"__codeblock_end__\"))}}"
        );
        let node = load_program(&text).unwrap();
        let Some(Node::Producer(producer)) = node.get("run") else {
            panic!("expected a producer, got {node:?}");
        };
        let block = producer.produce();
        assert_eq!(block.format(), "rhai");
        assert_eq!(block.parameters(), ["x".to_string()]);
        assert_eq!(block.code(), "x + 1");
    }

    #[test]
    fn call_text_inside_strings_is_data() {
        let node = load_program(r#"{"doc": "__codeblock__(\"x\")"}"#).unwrap();
        assert_eq!(node.get("doc").and_then(Node::as_str), Some("__codeblock__(\"x\")"));
    }

    #[test]
    fn missing_sentinel_is_an_error() {
        let err = load_program(r#"[__codeblock__("rhai", [], "1", "nope")]"#).unwrap_err();
        assert!(matches!(err, SerializationError::MalformedProducer { offset: 1, .. }));
    }

    #[test]
    fn duplicate_parameters_in_a_call_are_rejected() {
        let err = load_program(r#"[__codeblock__("rhai", ["a", "a"], "a", "__codeblock_end__")]"#).unwrap_err();
        let SerializationError::MalformedProducer { message, .. } = err else {
            panic!("expected a malformed producer, got {err}");
        };
        assert!(message.contains("duplicate parameter `a`"), "{message}");
    }
}
