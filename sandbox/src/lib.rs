pub mod backend;
pub mod environment;
pub mod error;
pub mod executor;

pub use backend::{Backend, RhaiBackend, SandboxConfig};
pub use environment::{ConsoleSink, Environment, RunOptions};
pub use error::SandboxError;
pub use executor::Sandbox;
