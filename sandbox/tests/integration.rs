use std::cell::RefCell;
use std::rc::Rc;

use codeblock::{
    Codeblock, Node, TemplateError, compile, freeze_to_json, thaw_from_json, thaw_value,
};
use pretty_assertions::assert_eq;
use sandbox::{ConsoleSink, RhaiBackend, RunOptions, Sandbox, SandboxConfig, SandboxError};
use serde_json::{Value, json};

fn rhai(code: &str, parameters: &[&str]) -> Codeblock {
    let parameters = parameters.iter().map(|p| p.to_string()).collect();
    Codeblock::new(code, "rhai", parameters).expect("invalid block")
}

fn run(code: &str, parameters: &[&str], args: Value) -> Result<Value, SandboxError> {
    Sandbox::new().run(&rhai(code, parameters), &args, &RunOptions::default())
}

fn first_block(doc: &Node, key: &str) -> Codeblock {
    doc.get(key)
        .and_then(Node::as_block)
        .cloned()
        .unwrap_or_else(|| panic!("no block at `{key}`"))
}

#[test]
fn javascript_alias_runs_compiled_block() {
    let doc = codeblock::parse("{\n    \"inc\": (javascript (x) >>>\n        return x + 1;\n    <<<)\n}")
        .expect("parse failed");
    let block = first_block(&doc, "inc");
    let compiled = compile(&block, &json!({"x": 5})).unwrap();

    let sandbox = Sandbox::new().with_backend("javascript", RhaiBackend::new());
    let result = sandbox
        .run_compiled(&compiled, &json!({"x": 5}), &RunOptions::default())
        .unwrap();
    assert_eq!(result, json!(6));
}

#[test]
fn bare_javascript_document_runs_under_an_alias() {
    let doc = codeblock::parse("javascript (x) >>>\n    return x + 1;\n<<<").expect("parse failed");
    let block = doc.as_block().expect("document is not a block");
    let compiled = compile(block, &json!({"x": 5})).unwrap();

    let sandbox = Sandbox::new().with_backend("javascript", RhaiBackend::new());
    let result = sandbox
        .run_compiled(&compiled, &json!({"x": 5}), &RunOptions::default())
        .unwrap();
    assert_eq!(result, json!(6));
}

#[test]
fn arguments_bind_by_parameter_name() {
    assert_eq!(
        run("a - b", &["a", "b"], json!({"b": 2, "a": 10})).unwrap(),
        json!(8)
    );
    assert_eq!(run("type_of(x)", &["x"], json!({})).unwrap(), json!("()"));
}

#[test]
fn structured_values_cross_the_boundary() {
    let result = run(
        "#{ total: items.len(), first: items[0].name, ok: true }",
        &["items"],
        json!({"items": [{"name": "a"}, {"name": "b"}]}),
    )
    .unwrap();
    assert_eq!(result, json!({"total": 2, "first": "a", "ok": true}));
}

#[test]
fn no_return_value_is_null() {
    assert_eq!(run("let a = 1;", &[], json!({})).unwrap(), Value::Null);
}

#[test]
fn source_blocks_are_compiled_with_the_arguments() {
    let result = run("let n = %%%n%%%;\nn * n", &[], json!({"n": 7})).unwrap();
    assert_eq!(result, json!(49));

    let err = run("%%%missing%%%", &[], json!({})).unwrap_err();
    assert!(matches!(
        err,
        SandboxError::Template(TemplateError::UnboundVariable { .. })
    ));
}

#[test]
fn frozen_and_thawed_block_gives_the_same_result() {
    let block = rhai("let total = 0;\nfor i in 1..=n { total += i; }\ntotal", &["n"]);
    let args = json!({"n": 10});
    let frozen = freeze_to_json(&Node::from(block.clone())).unwrap();
    let thawed = thaw_from_json(&frozen).unwrap();

    let sandbox = Sandbox::new();
    let direct = sandbox.run(&block, &args, &RunOptions::default()).unwrap();
    let revived = sandbox.run_node(&thawed, &args, &RunOptions::default()).unwrap();
    assert_eq!(direct, json!(55));
    assert_eq!(revived, direct);
}

#[test]
fn console_output_goes_to_the_sink() {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let captured = lines.clone();
    let options = RunOptions::default()
        .with_console(ConsoleSink::new(move |line| captured.borrow_mut().push(line.to_string())));

    let block = rhai("console.log(\"start\");\nprint(\"printed\");\nconsole.log(\"n =\", n);\nn", &["n"]);
    let result = Sandbox::new().run(&block, &json!({"n": 3}), &options).unwrap();
    assert_eq!(result, json!(3));
    assert_eq!(*lines.borrow(), vec!["start", "printed", "n = 3"]);
}

#[test]
fn this_and_sandbox_bindings_are_visible() {
    let options = RunOptions::default()
        .with_this(json!({"name": "Ada"}))
        .with_binding("greeting", json!("Hello"))
        .with_binding("x", json!("hidden by the parameter"));
    let block = rhai("greeting + \", \" + this.name + \" \" + x", &["x"]);
    let result = Sandbox::new().run(&block, &json!({"x": 1}), &options).unwrap();
    assert_eq!(result, json!("Hello, Ada 1"));
}

#[test]
fn locals_shadow_sandbox_bindings() {
    let options = RunOptions::default().with_binding("limit", json!(10));
    let block = rhai("let limit = 2;\nlimit", &[]);
    let result = Sandbox::new().run(&block, &json!({}), &options).unwrap();
    assert_eq!(result, json!(2));
}

#[test]
fn host_state_is_not_reachable() {
    let err = run("undeclared_name", &[], json!({})).unwrap_err();
    assert!(matches!(err, SandboxError::Execution { .. }), "{err}");
}

#[test]
fn syntax_errors_name_the_format() {
    let err = run("let = ;", &[], json!({})).unwrap_err();
    let SandboxError::Syntax { format, .. } = err else {
        panic!("expected a syntax error, got {err}");
    };
    assert_eq!(format, "rhai");
}

#[test]
fn thrown_errors_are_wrapped() {
    let err = run("throw \"boom\";", &["a"], json!({"a": 1})).unwrap_err();
    let SandboxError::Execution {
        format,
        parameters,
        message,
    } = err
    else {
        panic!("expected an execution error, got {err}");
    };
    assert_eq!(format, "rhai");
    assert_eq!(parameters, vec!["a".to_string()]);
    assert!(message.contains("boom"), "{message}");
}

#[test]
fn operation_limit_stops_runaway_loops() {
    let sandbox = Sandbox::empty().with_backend(
        "rhai",
        RhaiBackend::with_config(SandboxConfig {
            max_operations: Some(10_000),
            max_call_levels: None,
        }),
    );
    let err = sandbox
        .run(&rhai("loop { }", &[]), &json!({}), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, SandboxError::Execution { .. }), "{err}");
}

#[test]
fn strict_run_requires_compiled_blocks() {
    let err = Sandbox::new()
        .run_compiled(&rhai("1", &[]), &json!({}), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, SandboxError::NotCompiled { .. }));
}

#[test]
fn unknown_format_is_rejected() {
    let block = Codeblock::new("1", "python", vec![]).unwrap();
    let err = Sandbox::new().run(&block, &json!({}), &RunOptions::default()).unwrap_err();
    assert!(matches!(err, SandboxError::UnsupportedFormat { format } if format == "python"));
    assert!(!Sandbox::empty().supports("rhai"));
    assert_eq!(Sandbox::new().formats().collect::<Vec<_>>(), vec!["rhai"]);
}

#[test]
fn run_node_rejects_plain_values() {
    let err = Sandbox::new()
        .run_node(&Node::from("text"), &json!({}), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, SandboxError::Serialization(_)));
}

#[test]
fn run_all_replaces_blocks_with_results() {
    let doc = codeblock::load(
        r#"{
    "base": 2,
    "double": (rhai () >>>
        %%%base%%% * 2
    <<<),
    "nested": {
        "base": 40,
        "add": (rhai (a) >>>
            a + %%%base%%%
        <<<)
    },
    "other": (python () >>>
        print(1)
    <<<)
}"#,
    )
    .expect("load failed");

    let result = Sandbox::new()
        .run_all(&doc, &json!({"a": 2}), &RunOptions::default())
        .unwrap();
    assert_eq!(result.get("double"), Some(&Node::from(json!(4))));
    assert_eq!(result.pointer("nested.add"), Some(&Node::from(json!(42))));
    let other = result.get("other").and_then(Node::as_block).unwrap();
    assert_eq!(other.format(), "python");
    assert_eq!(other.code(), "print(1)");
}

#[test]
fn nested_program_block_returns_its_inner_block() {
    let doc = codeblock::load(
        r#"{
    "outer": (rhai (n) >>>
        let inner = (rhai (x) >>>
            x * %%%n%%%
        <<<);
        inner
    <<<)
}"#,
    )
    .expect("load failed");
    let sandbox = Sandbox::new();
    let options = RunOptions::default();

    let outer = doc.get("outer").expect("no outer block");
    let produced = sandbox.run_node(outer, &json!({"n": 3}), &options).unwrap();
    let inner = thaw_value(produced).unwrap();
    let block = inner.as_block().expect("result is not a block");
    assert_eq!(block.parameters(), ["x".to_string()]);
    assert_eq!(block.code(), "x * %%%n%%%");

    let result = sandbox.run_node(&inner, &json!({"x": 4, "n": 2}), &options).unwrap();
    assert_eq!(result, json!(8));
}

#[test]
fn producer_call_with_bad_sentinel_fails() {
    let block = rhai(r#"__codeblock__("rhai", [], "1", "end")"#, &[]);
    let err = Sandbox::new().run(&block, &json!({}), &RunOptions::default()).unwrap_err();
    let SandboxError::Execution { message, .. } = err else {
        panic!("expected an execution error, got {err}");
    };
    assert!(message.contains("missing end sentinel"), "{message}");
}
