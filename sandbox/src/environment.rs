use std::fmt;
use std::rc::Rc;

use codeblock::Codeblock;
use indexmap::IndexMap;
use serde_json::Value;

/// Receives every line a fragment logs.
#[derive(Clone)]
pub struct ConsoleSink(Rc<dyn Fn(&str)>);

impl ConsoleSink {
    pub fn new(sink: impl Fn(&str) + 'static) -> Self {
        ConsoleSink(Rc::new(sink))
    }

    pub fn log(&self, line: &str) {
        (self.0)(line)
    }
}

/// Forwards to `tracing` under the `codeblock::console` target.
impl Default for ConsoleSink {
    fn default() -> Self {
        ConsoleSink::new(|line| tracing::info!(target: "codeblock::console", "{line}"))
    }
}

impl fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConsoleSink(..)")
    }
}

/// What the caller lets a fragment see besides its arguments.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Bound to `this` inside the fragment.
    pub this: Value,
    /// Extra names visible to the fragment.
    pub bindings: IndexMap<String, Value>,
    pub console: ConsoleSink,
}

impl RunOptions {
    pub fn with_this(mut self, this: Value) -> Self {
        self.this = this;
        self
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn with_console(mut self, console: ConsoleSink) -> Self {
        self.console = console;
        self
    }
}

/// Everything visible to one invocation of a block.
#[derive(Debug)]
pub struct Environment {
    /// Parameter name to argument, in parameter order. Missing arguments are null.
    arguments: IndexMap<String, Value>,
    this: Value,
    /// Sandbox bindings not shadowed by a parameter.
    bindings: IndexMap<String, Value>,
    console: ConsoleSink,
}

impl Environment {
    pub fn new(block: &Codeblock, args: &Value, options: &RunOptions) -> Self {
        let arguments: IndexMap<String, Value> = block
            .parameters()
            .iter()
            .map(|name| (name.clone(), args.get(name).cloned().unwrap_or(Value::Null)))
            .collect();
        let bindings = options
            .bindings
            .iter()
            .filter(|(name, _)| !arguments.contains_key(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Environment {
            arguments,
            this: options.this.clone(),
            bindings,
            console: options.console.clone(),
        }
    }

    pub fn arguments(&self) -> impl Iterator<Item = &Value> {
        self.arguments.values()
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn this(&self) -> &Value {
        &self.this
    }

    pub fn console(&self) -> &ConsoleSink {
        &self.console
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn arguments_follow_parameter_order() {
        let block = Codeblock::new("", "rhai", vec!["b".into(), "a".into(), "c".into()]).unwrap();
        let options = RunOptions::default()
            .with_binding("a", json!("shadowed"))
            .with_binding("limit", json!(3));
        let env = Environment::new(&block, &json!({"a": 1, "b": 2}), &options);

        let args: Vec<_> = env.arguments().cloned().collect();
        assert_eq!(args, vec![json!(2), json!(1), Value::Null]);
        assert_eq!(env.argument("a"), Some(&json!(1)));
        let bindings: Vec<_> = env.bindings().collect();
        assert_eq!(bindings, vec![("limit", &json!(3))]);
    }
}
