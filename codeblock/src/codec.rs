//! Escaped-newline codec.
//!
//! Block bodies are kept on a single line: every line break is stored as the
//! two characters `\n`. A run of backslashes that sits in front of an `n` or
//! a line break is doubled on the way in, which keeps literal `\n` sequences
//! in the original text apart from encoded line breaks.

/// Encode multi-line text into its single-line form.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    let mut backslashes = 0usize;

    for ch in text.chars() {
        match ch {
            '\\' => backslashes += 1,
            'n' => {
                push_backslashes(&mut out, backslashes * 2);
                backslashes = 0;
                out.push('n');
            }
            '\n' => {
                push_backslashes(&mut out, backslashes * 2);
                backslashes = 0;
                out.push_str("\\n");
            }
            _ => {
                push_backslashes(&mut out, backslashes);
                backslashes = 0;
                out.push(ch);
            }
        }
    }
    push_backslashes(&mut out, backslashes);
    out
}

/// Decode the single-line form back into multi-line text.
///
/// A run of `m` backslashes followed by `n` decodes to `m / 2` backslashes,
/// then a line break when `m` is odd or a literal `n` when it is even.
pub fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut backslashes = 0usize;

    for ch in escaped.chars() {
        match ch {
            '\\' => backslashes += 1,
            'n' if backslashes > 0 => {
                push_backslashes(&mut out, backslashes / 2);
                out.push(if backslashes % 2 == 1 { '\n' } else { 'n' });
                backslashes = 0;
            }
            _ => {
                push_backslashes(&mut out, backslashes);
                backslashes = 0;
                out.push(ch);
            }
        }
    }
    push_backslashes(&mut out, backslashes);
    out
}

/// Split an encoded body into its lines.
pub fn lines(escaped: &str) -> Vec<String> {
    unescape(escaped).split('\n').map(str::to_string).collect()
}

/// Join lines and encode them.
pub fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let joined: Vec<&str> = lines.iter().map(AsRef::as_ref).collect();
    escape(&joined.join("\n"))
}

fn push_backslashes(out: &mut String, count: usize) {
    for _ in 0..count {
        out.push('\\');
    }
}
