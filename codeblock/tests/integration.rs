use codeblock::{
    Codeblock, Error, Node, OutputMode, PurifyOptions, SerializationError, SourceOptions,
    TemplateError, TransformHook, compile, compile_all, freeze_to_json, freeze_to_source,
    thaw_from_json,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const GREETER: &str = r#"{
    "greet": (rhai (name) >>>
        let who = name;
        "Hello, " + who
    <<<),
    "count": 3
}"#;

fn parse(source: &str) -> Node {
    codeblock::parse(source).expect("parse failed")
}

fn block<'a>(node: &'a Node, path: &str) -> &'a Codeblock {
    node.pointer(path)
        .and_then(Node::as_block)
        .unwrap_or_else(|| panic!("no block at `{path}`"))
}

fn source(node: &Node) -> String {
    freeze_to_source(node, &SourceOptions::default()).expect("freeze to source failed")
}

#[test]
fn parses_blocks_into_entities() {
    let doc = parse(GREETER);
    let greet = block(&doc, "greet");
    assert_eq!(greet.format(), "rhai");
    assert_eq!(greet.parameters(), ["name".to_string()]);
    assert_eq!(greet.code(), "let who = name;\n\"Hello, \" + who");
    assert!(!greet.is_compiled());
    assert_eq!(doc.get("count"), Some(&Node::from(json!(3))));
}

#[test]
fn source_round_trip_is_exact() {
    assert_eq!(source(&parse(GREETER)), GREETER);
}

#[test]
fn source_round_trip_keeps_blank_padding_and_literal_escapes() {
    let text = r#"{
    "a": (rhai () >>>

        print("a\nb");

    <<<),
    "b": (rhai () >>>
    <<<)
}"#;
    let doc = parse(text);
    assert_eq!(block(&doc, "a").code(), "\nprint(\"a\\nb\");\n");
    assert_eq!(block(&doc, "b").code(), "");
    assert_eq!(source(&doc), text);
}

#[test]
fn comment_lines_are_not_restored() {
    let text = r#"{
    "a": (rhai () >>>
        // explain
        # explain
        ## keep
        1
    <<<)
}"#;
    let expected = r#"{
    "a": (rhai () >>>
        ## keep
        1
    <<<)
}"#;
    assert_eq!(source(&parse(text)), expected);
}

#[test]
fn blank_line_before_comment_keeps_indent_of_code() {
    let text = "[\n    (rhai () >>>\n\n        # heading\n        if true {\n            1\n        }\n    <<<)\n]";
    let doc = parse(text);
    assert_eq!(block(&doc, "0").code(), "\nif true {\n    1\n}");
}

#[test]
fn nested_blocks_resolve_inner_first() {
    let text = r#"{
    "outer": (rhai () >>>
        let inner = (rhai (x) >>>
            x * 2
        <<<);
        inner
    <<<)
}"#;
    let doc = parse(text);
    let outer = block(&doc, "outer").code();
    assert!(!outer.contains(">>>") && !outer.contains("<<<"), "{outer}");

    let (first, rest) = outer.split_once('\n').unwrap();
    assert_eq!(rest, "inner");
    let literal = first
        .strip_prefix("let inner = ")
        .and_then(|l| l.strip_suffix(';'))
        .unwrap();
    let canonical: String = serde_json::from_str(literal).unwrap();
    let inner = Codeblock::from_canonical_str(&canonical).unwrap();
    assert_eq!(inner.code(), "x * 2");
    assert_eq!(inner.parameters(), ["x".to_string()]);
}

#[test]
fn nested_source_round_trip_is_exact() {
    let text = r#"{
    "outer": (rhai () >>>
        let inner = (rhai (x) >>>
            let y = (rhai () >>>
                2
            <<<);
            x * 2
        <<<);
        inner
    <<<)
}"#;
    let doc = parse(text);
    assert_eq!(source(&doc), text);

    let thawed = thaw_from_json(&freeze_to_json(&doc).unwrap()).unwrap();
    assert_eq!(source(&thawed), text);
}

#[test]
fn crlf_source_parses_like_lf() {
    let crlf = GREETER.replace('\n', "\r\n");
    let doc = parse(&crlf);
    assert_eq!(block(&doc, "greet").code(), "let who = name;\n\"Hello, \" + who");
    assert_eq!(source(&doc), GREETER);
}

#[test]
fn bare_block_is_a_whole_document() {
    let doc = parse("javascript (x) >>>\n    return x + 1;\n<<<");
    let Node::Block(block) = &doc else {
        panic!("expected a block, got {doc:?}");
    };
    assert_eq!(block.format(), "javascript");
    assert_eq!(block.parameters(), ["x".to_string()]);
    assert_eq!(block.code(), "return x + 1;");
}

#[test]
fn document_without_blocks_is_unchanged() {
    let text = "{\"plain\": \"a >>> b <<< c\"}";
    let purified = codeblock::Parser::new(text.to_string(), 0)
        .purify(&PurifyOptions::program())
        .unwrap();
    assert!(!purified.found_blocks);
    assert_eq!(purified.text, text);
}

#[test]
fn program_mode_yields_producers() {
    let purified = codeblock::Parser::new(GREETER.to_string(), 0)
        .purify(&PurifyOptions::program())
        .unwrap();
    assert!(purified.found_blocks);
    assert!(purified.text.starts_with("//! __codeblock__("));
    assert_eq!(purified.text.matches("//!").count(), 1);
    assert!(purified.text.contains(r#"(__codeblock__("rhai", ["name"], "#));

    let loaded = codeblock::load(GREETER).unwrap();
    let Some(Node::Producer(producer)) = loaded.get("greet") else {
        panic!("expected a producer: {loaded:?}");
    };
    assert_eq!(&producer.produce(), block(&parse(GREETER), "greet"));
    assert_eq!(
        freeze_to_json(&loaded).unwrap(),
        freeze_to_json(&parse(GREETER)).unwrap()
    );
}

#[test]
fn freeze_thaw_round_trip() {
    let doc = parse(GREETER);
    let frozen = freeze_to_json(&doc).unwrap();
    assert!(frozen.contains(r#""{\".@\":\"github.com~0ink~codeblock/codeblock:Codeblock\""#));
    let thawed = thaw_from_json(&frozen).unwrap();
    assert_eq!(thawed, doc);
    assert_eq!(freeze_to_json(&thawed).unwrap(), frozen);
}

#[test]
fn compiled_flag_survives_freezing() {
    let compiled = compile(block(&parse(GREETER), "greet"), &json!({})).unwrap();
    let node = Node::from(compiled.clone());
    let frozen = freeze_to_json(&node).unwrap();
    assert!(frozen.contains(r#"\"compiled\":true"#));
    assert_eq!(thaw_from_json(&frozen).unwrap(), node);
}

#[test]
fn thaw_accepts_tagged_objects_and_legacy_fields() {
    let node = thaw_from_json(
        r#"{"f": {".@": "github.com~0ink~codeblock/codeblock:Codeblock",
                  "_code": "return a;", "_format": "rhai", "_args": ["a"], "_compiled": true}}"#,
    )
    .unwrap();
    let f = block(&node, "f");
    assert_eq!(f.code(), "return a;");
    assert_eq!(f.parameters(), ["a".to_string()]);
    assert!(f.is_compiled());
}

#[test]
fn thaw_reports_bad_input() {
    assert!(matches!(thaw_from_json("{"), Err(SerializationError::Syntax(_))));
    let broken = json!({
        "f": "{\".@\":\"github.com~0ink~codeblock/codeblock:Codeblock\",\"format\":1}"
    });
    assert!(matches!(
        thaw_from_json(&broken.to_string()),
        Err(SerializationError::MalformedBlock { .. })
    ));
}

#[test]
fn template_substitutes_dotted_paths() {
    let block = Codeblock::new("\"Hello, %%%user.name%%%!\"", "rhai", vec![]).unwrap();
    let compiled = compile(&block, &json!({"user": {"name": "Ada"}})).unwrap();
    assert_eq!(compiled.code(), "\"Hello, Ada!\"");
    assert!(compiled.is_compiled());
    assert_eq!(compiled.format(), block.format());
    assert_eq!(compiled.parameters(), block.parameters());
    assert_eq!(compile(&compiled, &json!({})).unwrap(), compiled);
}

#[test]
fn template_reports_unbound_path() {
    let block = Codeblock::new("%%%user.name%%%", "rhai", vec![]).unwrap();
    let err = compile(&block, &json!({"account": {}})).unwrap_err();
    assert_eq!(
        err,
        TemplateError::UnboundVariable {
            path: "user.name".into(),
            segment: "user".into()
        }
    );
}

#[test]
fn compile_all_binds_sibling_fields() {
    let doc = parse(
        r#"{
    "name": "Ada",
    "greet": (rhai () >>>
        "Hello, %%%name%%%"
    <<<)
}"#,
    );
    let compiled = compile_all(&doc).unwrap();
    let greet = block(&compiled, "greet");
    assert!(greet.is_compiled());
    assert_eq!(greet.code(), "\"Hello, Ada\"");
}

#[test]
fn unterminated_block_is_reported() {
    let text = "{\n    \"a\": (rhai () >>>\n        1\n}";
    let Err(Error::Parse(err)) = codeblock::parse(text) else {
        panic!("expected a parse error");
    };
    assert!(err.message.contains("unterminated"), "{}", err.message);
    assert_eq!(err.line_number(text), 2);
    assert_eq!(err.notes, vec!["in line: \"a\": (rhai () >>>".to_string()]);
}

#[test]
fn stray_closer_is_reported() {
    let text = "[\n    1\n    <<<\n]";
    let Err(Error::Parse(err)) = codeblock::parse(text) else {
        panic!("expected a parse error");
    };
    assert!(err.message.contains("without an open"), "{}", err.message);
    assert_eq!(err.line_number(text), 3);
}

#[test]
fn duplicate_parameters_are_rejected() {
    let text = "[(rhai (a, a) >>>\n<<<)]";
    assert!(matches!(codeblock::parse(text), Err(Error::Parse(_))));
    assert!(Codeblock::new("", "rhai", vec!["a".into(), "a".into()]).is_err());
}

#[test]
fn transform_hook_writes_sibling_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("greeter.cb");
    std::fs::write(&path, GREETER).unwrap();

    let hook = TransformHook::new(PurifyOptions::json());
    let result = hook.load(&path).unwrap();
    assert!(result.transformed);
    let artifact = result.artifact.clone().unwrap();
    assert!(artifact.to_string_lossy().ends_with("greeter.cb~.pure.json"));
    assert_eq!(std::fs::read_to_string(&artifact).unwrap(), result.text);
    assert_eq!(thaw_from_json(&result.text).unwrap(), parse(GREETER));

    let plain = dir.path().join("plain.json");
    std::fs::write(&plain, "[1, 2]").unwrap();
    let result = TransformHook::new(PurifyOptions::program()).load(&plain).unwrap();
    assert!(!result.transformed);
    assert_eq!(result.artifact, None);
    assert!(!codeblock::loader::artifact_path(&plain, OutputMode::Program).exists());
}

#[test]
fn transform_hook_reports_missing_file() {
    let err = TransformHook::default().load("/nonexistent/file.cb").unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}
