use std::borrow::Cow;

use codeblock::{Codeblock, Node, block_from_node, compile, freeze_to_value};
use indexmap::IndexMap;
use serde_json::Value;

use crate::backend::{Backend, RhaiBackend};
use crate::environment::{Environment, RunOptions};
use crate::error::SandboxError;

/// Registry of backends by format tag.
pub struct Sandbox {
    backends: IndexMap<String, Box<dyn Backend>>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Sandbox::new()
    }
}

impl Sandbox {
    /// A sandbox with the embedded engine registered for `rhai`.
    pub fn new() -> Self {
        Sandbox::empty().with_backend("rhai", RhaiBackend::new())
    }

    pub fn empty() -> Self {
        Sandbox {
            backends: IndexMap::new(),
        }
    }

    pub fn with_backend(mut self, format: impl Into<String>, backend: impl Backend + 'static) -> Self {
        self.register(format, backend);
        self
    }

    pub fn register(&mut self, format: impl Into<String>, backend: impl Backend + 'static) {
        self.backends.insert(format.into(), Box::new(backend));
    }

    pub fn supports(&self, format: &str) -> bool {
        self.backends.contains_key(format)
    }

    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    fn backend(&self, format: &str) -> Result<&dyn Backend, SandboxError> {
        self.backends
            .get(format)
            .map(|backend| &**backend)
            .ok_or_else(|| SandboxError::UnsupportedFormat {
                format: format.to_string(),
            })
    }

    /// Run a block with `args` bound to its parameters by name.
    ///
    /// A source block is compiled first, with `args` as its bindings.
    pub fn run(&self, block: &Codeblock, args: &Value, options: &RunOptions) -> Result<Value, SandboxError> {
        let backend = self.backend(block.format())?;
        let block = if block.is_compiled() {
            Cow::Borrowed(block)
        } else {
            Cow::Owned(compile(block, args)?)
        };
        invoke(backend, &block, args, options)
    }

    /// Like [`Sandbox::run`], but a source block is an error.
    pub fn run_compiled(
        &self,
        block: &Codeblock,
        args: &Value,
        options: &RunOptions,
    ) -> Result<Value, SandboxError> {
        if !block.is_compiled() {
            return Err(SandboxError::NotCompiled {
                format: block.format().to_string(),
            });
        }
        invoke(self.backend(block.format())?, block, args, options)
    }

    /// Run the block a node stands for.
    pub fn run_node(&self, node: &Node, args: &Value, options: &RunOptions) -> Result<Value, SandboxError> {
        self.run(&block_from_node(node)?, args, options)
    }

    /// Replace every runnable block in the tree with its result.
    ///
    /// Each block is bound to the fields of the map holding it, overlaid with
    /// `args`. Producers are resolved; blocks of unknown formats stay as they are.
    pub fn run_all(&self, node: &Node, args: &Value, options: &RunOptions) -> Result<Node, SandboxError> {
        self.run_all_in(node, &Value::Null, args, options)
    }

    fn run_all_in(
        &self,
        node: &Node,
        scope: &Value,
        args: &Value,
        options: &RunOptions,
    ) -> Result<Node, SandboxError> {
        match node {
            Node::Block(_) | Node::Producer(_) => {
                let block = block_from_node(node)?;
                if !self.supports(block.format()) {
                    return Ok(Node::Block(block));
                }
                let result = self.run(&block, &overlay(scope, args), options)?;
                Ok(Node::from(result))
            }
            Node::Map(entries) => {
                let scope = freeze_to_value(node);
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.run_all_in(value, &scope, args, options)?)))
                    .collect::<Result<IndexMap<_, _>, SandboxError>>()
                    .map(Node::Map)
            }
            Node::Sequence(items) => items
                .iter()
                .map(|item| self.run_all_in(item, scope, args, options))
                .collect::<Result<Vec<_>, _>>()
                .map(Node::Sequence),
            other => Ok(other.clone()),
        }
    }
}

fn invoke(
    backend: &dyn Backend,
    block: &Codeblock,
    args: &Value,
    options: &RunOptions,
) -> Result<Value, SandboxError> {
    let env = Environment::new(block, args, options);
    tracing::debug!(
        format = block.format(),
        parameters = ?block.parameters(),
        "invoking code block"
    );
    let result = backend.invoke(block, &env)?;
    tracing::trace!(%result, "code block returned");
    Ok(result)
}

fn overlay(scope: &Value, args: &Value) -> Value {
    let mut bindings = match scope {
        Value::Object(fields) => fields.clone(),
        _ => serde_json::Map::new(),
    };
    if let Value::Object(extra) = args {
        for (key, value) in extra {
            bindings.insert(key.clone(), value.clone());
        }
    }
    Value::Object(bindings)
}
