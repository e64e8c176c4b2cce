pub mod block;
pub mod codec;
pub mod document;
pub mod freeze;
pub mod loader;
pub mod parser;
pub mod template;

use std::path::PathBuf;

pub use crate::block::{Codeblock, DuplicateParameter, Producer};
pub use crate::document::Node;
pub use crate::freeze::{
    SerializationError, SourceOptions, block_from_node, freeze_to_json, freeze_to_source,
    freeze_to_value, thaw_from_json, thaw_value,
};
pub use crate::loader::{TransformHook, Transformed};
pub use crate::parser::{OutputMode, ParseError, Parser, PurifyOptions, Purified};
pub use crate::template::{TemplateError, compile, compile_all};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Block(#[from] DuplicateParameter),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Parse annotated source into a document tree with live blocks.
pub fn parse(source: &str) -> Result<Node, Error> {
    let purified = Parser::new(source.to_string(), 0).purify(&PurifyOptions::json())?;
    Ok(thaw_from_json(&purified.text)?)
}

/// Parse annotated source through program text: blocks become producers.
pub fn load(source: &str) -> Result<Node, Error> {
    let purified = Parser::new(source.to_string(), 0).purify(&PurifyOptions::program())?;
    Ok(parser::load_program(&purified.text)?)
}
