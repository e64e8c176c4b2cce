use codeblock::{SerializationError, TemplateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("`{format}` block is not compiled")]
    NotCompiled { format: String },

    #[error("no backend registered for format `{format}`")]
    UnsupportedFormat { format: String },

    #[error("`{format}` block does not parse: {message}")]
    Syntax { format: String, message: String },

    #[error("`{format}` block ({}) failed: {message}", parameters.join(", "))]
    Execution {
        format: String,
        parameters: Vec<String>,
        message: String,
    },

    #[error("cannot convert value at the `{format}` boundary: {message}")]
    Conversion { format: String, message: String },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
