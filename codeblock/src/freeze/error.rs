use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("malformed JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("malformed code block: {message} in `{fragment}`")]
    MalformedBlock { message: String, fragment: String },

    #[error("expected a code block, found {found}")]
    NotABlock { found: &'static str },

    #[error("malformed producer call at byte {offset}: {message}")]
    MalformedProducer { message: String, offset: usize },

    #[error("could not encode document: {0}")]
    Encode(String),
}
