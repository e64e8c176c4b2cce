use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::block::{Codeblock, DuplicateParameter};

/// Name of the producer call in program text.
pub const PRODUCER_FN: &str = "__codeblock__";

/// Sentinel closing every producer call.
pub const PRODUCER_END: &str = "__codeblock_end__";

/// Declaration line prepended once to program text that contains producers.
pub const PRODUCER_PRELUDE: &str =
    "//! __codeblock__(format, parameters, body, \"__codeblock_end__\") -> Codeblock\n";

/// A deferred block: a zero-argument unit that yields a [`Codeblock`].
#[derive(Clone)]
pub enum Producer {
    /// Parsed from a `__codeblock__(…)` call in program text.
    Wrapped(Codeblock),
    /// Supplied by the host.
    Native(Arc<dyn Fn() -> Codeblock + Send + Sync>),
}

impl Producer {
    /// The producer for a `__codeblock__(format, parameters, body, …)` call;
    /// `body` is escaped.
    pub fn wrapped(
        format: impl Into<String>,
        parameters: Vec<String>,
        body: impl Into<String>,
    ) -> Result<Self, DuplicateParameter> {
        Codeblock::from_escaped(body, format, parameters).map(Producer::Wrapped)
    }

    pub fn from_fn(f: impl Fn() -> Codeblock + Send + Sync + 'static) -> Self {
        Producer::Native(Arc::new(f))
    }

    /// Invoke the producer.
    pub fn produce(&self) -> Codeblock {
        match self {
            Producer::Wrapped(block) => block.clone(),
            Producer::Native(f) => f(),
        }
    }

    /// The producer call text, when the producer has one.
    pub fn source_text(&self) -> Option<String> {
        match self {
            Producer::Wrapped(block) => Some(call_text(block.format(), block.parameters(), block.body())),
            Producer::Native(_) => None,
        }
    }
}

/// Render `__codeblock__("<format>", [<parameters>], "<body>", "__codeblock_end__")`.
pub fn call_text(format: &str, parameters: &[String], body: &str) -> String {
    let parameters = Value::Array(parameters.iter().cloned().map(Value::from).collect());
    format!(
        "{PRODUCER_FN}({}, {}, {}, \"{PRODUCER_END}\")",
        Value::from(format),
        parameters,
        Value::from(body),
    )
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Wrapped(block) => f
                .debug_struct("Producer::Wrapped")
                .field("format", &block.format())
                .field("parameters", &block.parameters())
                .finish_non_exhaustive(),
            Producer::Native(_) => f.write_str("Producer::Native(..)"),
        }
    }
}

impl PartialEq for Producer {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Producer::Wrapped(a), Producer::Wrapped(b)) => a == b,
            (Producer::Native(a), Producer::Native(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
