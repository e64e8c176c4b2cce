//! The canonical tagged form of a [`Codeblock`].
//!
//! A frozen block is one JSON string holding a compact tagged object:
//!
//! ```text
//! {".@":"github.com~0ink~codeblock/codeblock:Codeblock","body":"…","format":"rhai","parameters":["x"]}
//! ```
//!
//! `"compiled":true` is appended for compiled blocks only. Thawing also
//! accepts the tagged object itself and the older `_code` / `_format` /
//! `_args` / `_compiled` field names.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::block::Codeblock;
use crate::freeze::SerializationError;

/// Key of the type discriminator.
pub const TAG_KEY: &str = ".@";

/// Value of the type discriminator.
pub const BLOCK_TAG: &str = "github.com~0ink~codeblock/codeblock:Codeblock";

/// Every canonical string starts with this.
const CANONICAL_PREFIX: &str = "{\".@\":\"github.com~0ink~codeblock/codeblock:Codeblock\"";

#[derive(Debug, Deserialize)]
struct TaggedBlock {
    #[serde(rename = ".@")]
    tag: String,
    #[serde(alias = "_code")]
    body: String,
    #[serde(alias = "_format")]
    format: String,
    #[serde(alias = "_args", default)]
    parameters: Vec<String>,
    #[serde(alias = "_compiled", default)]
    compiled: bool,
}

impl Codeblock {
    /// The tagged object for this block.
    pub fn to_canonical_value(&self) -> Value {
        let mut object = Map::new();
        object.insert(TAG_KEY.to_string(), Value::from(BLOCK_TAG));
        object.insert("body".to_string(), Value::from(self.body()));
        object.insert("format".to_string(), Value::from(self.format()));
        object.insert(
            "parameters".to_string(),
            Value::Array(self.parameters().iter().cloned().map(Value::from).collect()),
        );
        if self.is_compiled() {
            object.insert("compiled".to_string(), Value::Bool(true));
        }
        Value::Object(object)
    }

    /// The canonical string: compact JSON text of the tagged object.
    pub fn to_canonical_string(&self) -> String {
        self.to_canonical_value().to_string()
    }

    /// Decode a canonical string.
    pub fn from_canonical_str(text: &str) -> Result<Self, SerializationError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| SerializationError::MalformedBlock {
                message: err.to_string(),
                fragment: excerpt(text),
            })?;
        Self::from_canonical_value(value)
    }

    /// Decode a tagged object.
    pub fn from_canonical_value(value: Value) -> Result<Self, SerializationError> {
        let fragment = excerpt(&value.to_string());
        let tagged: TaggedBlock =
            serde_json::from_value(value).map_err(|err| SerializationError::MalformedBlock {
                message: err.to_string(),
                fragment: fragment.clone(),
            })?;
        if tagged.tag != BLOCK_TAG {
            return Err(SerializationError::MalformedBlock {
                message: format!("unknown type tag `{}`", tagged.tag),
                fragment,
            });
        }
        let block = Codeblock::from_escaped(tagged.body, tagged.format, tagged.parameters)
            .map_err(|err| SerializationError::MalformedBlock {
                message: err.to_string(),
                fragment,
            })?;
        Ok(block.set_compiled(tagged.compiled))
    }
}

/// Whether a string leaf holds a frozen block.
pub fn is_canonical_string(text: &str) -> bool {
    text.starts_with(CANONICAL_PREFIX)
}

/// Whether an object carries the block discriminator.
pub fn is_tagged_object(object: &Map<String, Value>) -> bool {
    object.get(TAG_KEY).and_then(Value::as_str) == Some(BLOCK_TAG)
}

/// Shorten a fragment for error messages.
pub(crate) fn excerpt(text: &str) -> String {
    const LIMIT: usize = 120;
    match text.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
