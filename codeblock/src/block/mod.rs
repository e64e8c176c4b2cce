pub mod canonical;
pub mod producer;

use crate::codec;

pub use producer::Producer;

/// A parameterised, format-tagged fragment of executable text.
///
/// The body is stored in escaped single-line form (see [`crate::codec`]).
/// Compiling never mutates a block; it returns a new, compiled one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codeblock {
    /// Escaped body text.
    body: String,
    /// Tag naming the backend that interprets the body.
    format: String,
    /// Ordered, distinct parameter names: the calling convention.
    parameters: Vec<String>,
    /// True once every template placeholder has been resolved.
    compiled: bool,
}

/// Two parameters of one block share a name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate parameter `{0}`")]
pub struct DuplicateParameter(pub String);

impl Codeblock {
    /// Build a source block from multi-line code.
    pub fn new(
        code: &str,
        format: impl Into<String>,
        parameters: Vec<String>,
    ) -> Result<Self, DuplicateParameter> {
        Self::from_escaped(codec::escape(code), format, parameters)
    }

    /// Build a source block from a body that is already escaped.
    pub fn from_escaped(
        body: impl Into<String>,
        format: impl Into<String>,
        parameters: Vec<String>,
    ) -> Result<Self, DuplicateParameter> {
        check_parameters(&parameters)?;
        Ok(Codeblock {
            body: body.into(),
            format: format.into(),
            parameters,
            compiled: false,
        })
    }

    /// Build a source block from individual lines.
    pub fn from_lines<S: AsRef<str>>(
        lines: &[S],
        format: impl Into<String>,
        parameters: Vec<String>,
    ) -> Result<Self, DuplicateParameter> {
        Self::from_escaped(codec::join_lines(lines), format, parameters)
    }

    /// A compiled copy of this block carrying `code` as its final body.
    pub(crate) fn with_compiled_code(&self, code: &str) -> Self {
        Codeblock {
            body: codec::escape(code),
            format: self.format.clone(),
            parameters: self.parameters.clone(),
            compiled: true,
        }
    }

    pub(crate) fn set_compiled(mut self, compiled: bool) -> Self {
        self.compiled = compiled;
        self
    }

    /// The escaped single-line body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The body as multi-line text.
    pub fn code(&self) -> String {
        codec::unescape(&self.body)
    }

    pub fn lines(&self) -> Vec<String> {
        codec::lines(&self.body)
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }
}

fn check_parameters(parameters: &[String]) -> Result<(), DuplicateParameter> {
    for (i, name) in parameters.iter().enumerate() {
        if parameters[..i].contains(name) {
            return Err(DuplicateParameter(name.clone()));
        }
    }
    Ok(())
}
