use std::ops::Range;

use crate::parser::error::ParseError;

pub(crate) const OPEN: &str = ">>>";
pub(crate) const CLOSE: &str = "<<<";

/// A block located in the source, with its nested blocks.
#[derive(Debug, Clone)]
pub(crate) struct RawBlock {
    pub format: String,
    pub parameters: Vec<String>,
    /// From the start of the format word to the end of the closing marker.
    pub span: Range<usize>,
    /// From the line after the opener to the line break before the closer.
    pub body: Range<usize>,
    /// 1 for top-level blocks.
    pub depth: usize,
    pub children: Vec<RawBlock>,
}

/// All blocks of a document, outermost layer first.
#[derive(Debug, Default)]
pub(crate) struct Layers {
    pub blocks: Vec<RawBlock>,
    pub max_depth: usize,
}

impl Layers {
    pub fn count(&self) -> usize {
        fn count(blocks: &[RawBlock]) -> usize {
            blocks.iter().map(|b| 1 + count(&b.children)).sum()
        }
        count(&self.blocks)
    }
}

struct OpenBlock {
    format: String,
    parameters: Vec<String>,
    header_start: usize,
    body_start: usize,
    children: Vec<RawBlock>,
    line: String,
    line_span: Range<usize>,
}

/// The parts of an opener line: `<format> (<parameters>) >>>`.
struct Header<'a> {
    /// Offset of the format word within the scanned text.
    start: usize,
    format: &'a str,
    parameters: &'a str,
}

/// Locate every block with a single depth-tracking pass over the lines.
///
/// An opener is a line ending in `>>>` preceded by a block header; a closer is
/// a line whose first non-blank text is `<<<`. Markers anywhere else are
/// ordinary text.
pub(crate) fn scan(source: &str, file_id: usize) -> Result<Layers, ParseError> {
    let mut stack: Vec<OpenBlock> = Vec::new();
    let mut layers = Layers::default();
    let mut offset = 0;

    for line in source.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);
        let line_span = line_start..line_start + content.len();

        let mut header_from = 0;
        let indent = content.len() - content.trim_start().len();
        if content[indent..].starts_with(CLOSE) {
            let marker_end = line_start + indent + CLOSE.len();
            let Some(open) = stack.pop() else {
                return Err(ParseError::error(
                    "closing marker `<<<` without an open code block",
                    line_start + indent..marker_end,
                    file_id,
                )
                .with_line(content));
            };
            let body_end = if line_start > open.body_start {
                line_start - 1
            } else {
                open.body_start
            };
            let depth = stack.len() + 1;
            layers.max_depth = layers.max_depth.max(depth);
            let block = RawBlock {
                format: open.format,
                parameters: open.parameters,
                span: open.header_start..marker_end,
                body: open.body_start..body_end,
                depth,
                children: open.children,
            };
            match stack.last_mut() {
                Some(parent) => parent.children.push(block),
                None => layers.blocks.push(block),
            }
            header_from = indent + CLOSE.len();
        }

        if let Some(header) = match_opener(&content[header_from..]) {
            let parameters = parse_parameters(header.parameters).map_err(|message| {
                ParseError::error(message, line_span.clone(), file_id).with_line(content)
            })?;
            stack.push(OpenBlock {
                format: header.format.to_string(),
                parameters,
                header_start: line_start + header_from + header.start,
                body_start: offset,
                children: Vec::new(),
                line: content.to_string(),
                line_span,
            });
        }
    }

    if let Some(open) = stack.pop() {
        return Err(ParseError::error(
            format!("unterminated code block `{}`: no closing `<<<`", open.format),
            open.line_span,
            file_id,
        )
        .with_line(&open.line));
    }

    Ok(layers)
}

fn match_opener(text: &str) -> Option<Header<'_>> {
    let before = text.trim_end().strip_suffix(OPEN)?;
    let inner = before.trim_end_matches([' ', '\t']);
    if inner.len() == before.len() {
        // at least one blank between `)` and `>>>`
        return None;
    }
    let inner = inner.strip_suffix(')')?;
    let paren = inner.rfind('(')?;
    let parameters = &inner[paren + 1..];
    if parameters.contains(')') {
        return None;
    }
    let head = inner[..paren].trim_end_matches([' ', '\t']);
    let start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i)?;
    Some(Header {
        start,
        format: &head[start..],
        parameters,
    })
}

/// Comma-separated, whitespace-insensitive; the empty list is allowed.
fn parse_parameters(raw: &str) -> Result<Vec<String>, String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = Vec::new();
    for name in compact.split(',') {
        if name.is_empty() {
            return Err(format!("empty parameter name in `({})`", raw));
        }
        if names.iter().any(|n| n == name) {
            return Err(format!("duplicate parameter `{}`", name));
        }
        names.push(name.to_string());
    }
    Ok(names)
}
