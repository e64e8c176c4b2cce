mod rhai;

pub use self::rhai::{RhaiBackend, SandboxConfig};

use codeblock::Codeblock;
use serde_json::Value;

use crate::environment::Environment;
use crate::error::SandboxError;

/// Interprets the bodies of one block format.
///
/// The body is wrapped as an anonymous callable taking the block's parameters,
/// bound in order to the environment's arguments. The callable may reach
/// nothing but the environment.
pub trait Backend {
    fn invoke(&self, block: &Codeblock, env: &Environment) -> Result<Value, SandboxError>;
}
