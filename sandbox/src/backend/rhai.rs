use std::collections::HashMap;

use codeblock::block::producer::{PRODUCER_END, PRODUCER_FN};
use codeblock::{Codeblock, Producer};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Array, CallFnOptions, Dynamic, Engine, EvalAltResult, ImmutableString, Scope};
use serde_json::Value;

use crate::backend::Backend;
use crate::environment::{ConsoleSink, Environment};
use crate::error::SandboxError;

const ENTRY: &str = "codeblock_entry";

/// Engine limits. `None` leaves the engine default in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxConfig {
    pub max_operations: Option<u64>,
    pub max_call_levels: Option<usize>,
}

/// Runs bodies with an embedded Rhai engine, one fresh engine per call.
#[derive(Debug, Clone, Default)]
pub struct RhaiBackend {
    config: SandboxConfig,
}

impl RhaiBackend {
    pub fn new() -> Self {
        RhaiBackend::default()
    }

    pub fn with_config(config: SandboxConfig) -> Self {
        RhaiBackend { config }
    }

    fn engine(&self, block: &Codeblock, env: &Environment) -> Result<Engine, SandboxError> {
        let mut engine = Engine::new();
        engine.set_module_resolver(DummyModuleResolver::new());
        if let Some(max) = self.config.max_operations {
            engine.set_max_operations(max);
        }
        if let Some(max) = self.config.max_call_levels {
            engine.set_max_call_levels(max);
        }

        engine
            .register_type_with_name::<ConsoleSink>("Console")
            .register_fn("log", |console: ConsoleSink, a: Dynamic| {
                console.log(&a.to_string())
            })
            .register_fn("log", |console: ConsoleSink, a: Dynamic, b: Dynamic| {
                console.log(&format!("{a} {b}"))
            })
            .register_fn(
                "log",
                |console: ConsoleSink, a: Dynamic, b: Dynamic, c: Dynamic| {
                    console.log(&format!("{a} {b} {c}"))
                },
            );
        engine.register_fn(PRODUCER_FN, produced_block);

        let console = env.console().clone();
        engine.on_print(move |text| console.log(text));
        let console = env.console().clone();
        engine.on_debug(move |text, _, _| console.log(text));

        let mut visible: HashMap<String, Dynamic> = HashMap::new();
        visible.insert("console".to_string(), Dynamic::from(env.console().clone()));
        for (name, value) in env.bindings() {
            visible.insert(name.to_string(), convert_in(block, value)?);
        }
        resolve_bindings(&mut engine, visible);

        Ok(engine)
    }
}

impl Backend for RhaiBackend {
    fn invoke(&self, block: &Codeblock, env: &Environment) -> Result<Value, SandboxError> {
        let engine = self.engine(block, env)?;
        let script = format!(
            "fn {ENTRY}({}) {{\n{}\n}}",
            block.parameters().join(", "),
            block.code()
        );
        let ast = engine.compile(&script).map_err(|err| SandboxError::Syntax {
            format: block.format().to_string(),
            message: err.to_string(),
        })?;

        let args = env
            .arguments()
            .map(|value| convert_in(block, value))
            .collect::<Result<Vec<Dynamic>, _>>()?;
        let mut this = convert_in(block, env.this())?;
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut this);

        let result: Dynamic = engine
            .call_fn_with_options(options, &mut Scope::new(), &ast, ENTRY, args)
            .map_err(|err| SandboxError::Execution {
                format: block.format().to_string(),
                parameters: block.parameters().to_vec(),
                message: err.to_string(),
            })?;
        from_dynamic(&result).map_err(|err| conversion(block, err.to_string()))
    }
}

/// Locals and parameters take precedence over the sandbox bindings.
// `on_var` is flagged as a volatile API in rhai 1.x.
#[allow(deprecated)]
fn resolve_bindings(engine: &mut Engine, visible: HashMap<String, Dynamic>) {
    engine.on_var(move |name, _, context| {
        if context.scope().contains(name) {
            Ok(None)
        } else {
            Ok(visible.get(name).cloned())
        }
    });
}

/// `__codeblock__(format, parameters, body, end)` in a nested program-mode
/// body: the inner block as its canonical tagged map.
fn produced_block(
    format: ImmutableString,
    parameters: Array,
    body: ImmutableString,
    end: ImmutableString,
) -> Result<Dynamic, Box<EvalAltResult>> {
    if end.as_str() != PRODUCER_END {
        return Err(format!("{PRODUCER_FN}: missing end sentinel").into());
    }
    let parameters = parameters
        .into_iter()
        .map(|name| {
            name.into_string()
                .map_err(|found| format!("{PRODUCER_FN}: parameter of type {found}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let producer = Producer::wrapped(format.as_str(), parameters, body.as_str())
        .map_err(|err| format!("{PRODUCER_FN}: {err}"))?;
    to_dynamic(producer.produce().to_canonical_value())
}

fn convert_in(block: &Codeblock, value: &Value) -> Result<Dynamic, SandboxError> {
    to_dynamic(value).map_err(|err| conversion(block, err.to_string()))
}

fn conversion(block: &Codeblock, message: String) -> SandboxError {
    SandboxError::Conversion {
        format: block.format().to_string(),
        message,
    }
}
