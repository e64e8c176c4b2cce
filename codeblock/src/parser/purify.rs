use std::ops::Range;

use serde_json::Value;

use crate::block::Codeblock;
use crate::block::producer::{PRODUCER_PRELUDE, call_text};
use crate::parser::error::ParseError;
use crate::parser::layers::{Layers, RawBlock};

/// What a resolved block is replaced with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// The JSON string literal of the block's canonical string. A `(`…`)`
    /// pair directly around the block is consumed.
    #[default]
    Json,
    /// A `__codeblock__(…)` producer call; surrounding text is kept.
    Program,
}

#[derive(Debug, Clone, Default)]
pub struct PurifyOptions {
    pub mode: OutputMode,
}

impl PurifyOptions {
    pub fn json() -> Self {
        PurifyOptions::default()
    }

    pub fn program() -> Self {
        PurifyOptions {
            mode: OutputMode::Program,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purified {
    pub text: String,
    pub found_blocks: bool,
}

pub(crate) fn render(
    source: &str,
    layers: &Layers,
    options: &PurifyOptions,
    file_id: usize,
) -> Result<Purified, ParseError> {
    if layers.blocks.is_empty() {
        return Ok(Purified {
            text: source.to_string(),
            found_blocks: false,
        });
    }
    let mut text = splice(source, 0..source.len(), &layers.blocks, options, file_id)?;
    if options.mode == OutputMode::Program {
        text.insert_str(0, PRODUCER_PRELUDE);
    }
    Ok(Purified {
        text,
        found_blocks: true,
    })
}

/// Copy `range` of the source with every block in `blocks` replaced.
fn splice(
    source: &str,
    range: Range<usize>,
    blocks: &[RawBlock],
    options: &PurifyOptions,
    file_id: usize,
) -> Result<String, ParseError> {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(range.len());
    let mut cursor = range.start;
    for block in blocks {
        let (mut start, mut end) = (block.span.start, block.span.end);
        if options.mode == OutputMode::Json
            && start > cursor
            && end < range.end
            && bytes[start - 1] == b'('
            && bytes[end] == b')'
        {
            start -= 1;
            end += 1;
        }
        out.push_str(&source[cursor..start]);
        out.push_str(&resolve(source, block, options, file_id)?);
        cursor = end;
    }
    out.push_str(&source[cursor..range.end]);
    Ok(out)
}

/// Resolve one block after its children.
fn resolve(
    source: &str,
    raw: &RawBlock,
    options: &PurifyOptions,
    file_id: usize,
) -> Result<String, ParseError> {
    let body = splice(source, raw.body.clone(), &raw.children, options, file_id)?;
    let lines = normalize_body(&body);
    let block = Codeblock::from_lines(&lines, raw.format.as_str(), raw.parameters.clone())
        .map_err(|err| ParseError::error(err.to_string(), raw.span.clone(), file_id))?;
    tracing::trace!(
        format = %raw.format,
        depth = raw.depth,
        lines = lines.len(),
        nested = raw.children.len(),
        "resolved code block"
    );
    Ok(match options.mode {
        OutputMode::Json => Value::String(block.to_canonical_string()).to_string(),
        OutputMode::Program => call_text(block.format(), block.parameters(), block.body()),
    })
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    (line.starts_with('#') && !line.starts_with("##") && !line.starts_with("#!"))
        || line.starts_with("//")
}

/// Normalize the lines of a block body.
///
/// Line endings may be `\n` or `\r\n`. Leading and trailing blank lines are
/// counted and restored as empty lines; comment lines are dropped (logged at
/// debug level); the indentation of the first remaining line is removed from
/// every line that carries it.
pub(crate) fn normalize_body(body: &str) -> Vec<String> {
    let lines: Vec<&str> = body
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    let leading = lines.iter().take_while(|l| is_blank(l)).count();
    let trailing = if leading == lines.len() {
        0
    } else {
        lines.iter().rev().take_while(|l| is_blank(l)).count()
    };

    let kept: Vec<&str> = lines[leading..lines.len() - trailing]
        .iter()
        .copied()
        .filter(|l| {
            let comment = is_comment(l);
            if comment {
                tracing::debug!(line = l.trim(), "dropping comment line from code block");
            }
            !comment
        })
        .collect();
    let prefix = kept
        .first()
        .map(|l| &l[..l.len() - l.trim_start().len()])
        .unwrap_or("");

    let mut out = Vec::with_capacity(leading + kept.len() + trailing);
    out.extend(std::iter::repeat_n(String::new(), leading));
    out.extend(
        kept.iter()
            .map(|l| l.strip_prefix(prefix).unwrap_or(l).to_string()),
    );
    out.extend(std::iter::repeat_n(String::new(), trailing));
    out
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn strips_shared_indentation() {
        assert_eq!(
            normalize_body("    if x {\n        y\n    }"),
            vec!["if x {", "    y", "}"]
        );
    }

    #[test]
    fn keeps_blank_padding() {
        assert_eq!(normalize_body("\n  a\n \n"), vec!["", "a", "", ""]);
        assert_eq!(normalize_body("  \n "), vec!["", ""]);
    }

    #[test]
    fn drops_comments_but_not_directives() {
        assert_eq!(
            normalize_body("  # note\n  // note\n  ## kept\n  #!kept\n  x"),
            vec!["## kept", "#!kept", "x"]
        );
    }

    #[test]
    fn blank_line_then_comment() {
        // the blank is counted before the comment goes; the indent comes from `x`
        assert_eq!(normalize_body("\n# heading\n    x\n      y"), vec!["", "x", "  y"]);
    }

    #[test]
    fn crlf_line_endings_are_removed() {
        assert_eq!(normalize_body("\r\n    a\r\n      b\r\n"), vec!["", "a", "  b", ""]);
    }

    #[test]
    fn dropped_lines_are_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let lines = tracing::subscriber::with_default(subscriber, || normalize_body("  #{ a: 1 }\n  x"));
        assert_eq!(lines, vec!["x"]);
        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("dropping comment line"), "{log}");
        assert!(log.contains("#{ a: 1 }"), "{log}");
    }
}
