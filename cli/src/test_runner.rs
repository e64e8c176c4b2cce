use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use codeblock::{Node, SourceOptions, freeze_to_json, freeze_to_source, thaw_from_json};
use sandbox::{RunOptions, Sandbox};

const FIXTURE_SUFFIX: &str = ".test.cb";

#[derive(Debug, Deserialize)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Arguments and bindings for the block under test.
    #[serde(default)]
    pub bindings: toml::Table,

    /// Dotted path of a block to run.
    #[serde(default)]
    pub run: Option<String>,

    /// Expected result of the block, compared as JSON.
    #[serde(default)]
    pub expect_result: Option<toml::Value>,

    /// Expected error: its Display string must contain this substring.
    #[serde(default)]
    pub expect_error: Option<String>,

    /// If true, the fixture expects parsing to fail.
    #[serde(default)]
    pub expect_parse_error: bool,

    /// Check that regenerating the source reproduces the fixture.
    #[serde(default = "default_roundtrip")]
    pub roundtrip: bool,
}

fn default_roundtrip() -> bool {
    true
}

/// Split a fixture into its TOML frontmatter and annotated source.
fn parse_fixture(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}');
    let after_open = content
        .strip_prefix("---")
        .ok_or("missing opening --- frontmatter delimiter")?;
    let after_open = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    let close = after_open
        .find("\n---")
        .ok_or("missing closing --- frontmatter delimiter")?;
    let rest = &after_open[close + 4..];
    let source = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);

    let config: TestConfig = toml::from_str(after_open[..close].trim_end_matches('\r'))
        .map_err(|e| format!("TOML parse error: {}", e))?;
    Ok((config, source))
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

impl TestResult {
    fn label(&self) -> &str {
        self.description.as_deref().unwrap_or_else(|| {
            self.path
                .file_name()
                .and_then(|s| s.to_str())
                .map(|name| name.trim_end_matches(FIXTURE_SUFFIX))
                .unwrap_or("?")
        })
    }
}

fn run_fixture(path: &Path) -> TestResult {
    let (description, outcome) = match std::fs::read_to_string(path) {
        Err(e) => (None, Err(format!("cannot read file: {}", e))),
        Ok(content) => match parse_fixture(&content) {
            Err(e) => (None, Err(format!("frontmatter error: {}", e))),
            Ok((config, source)) => (config.description.clone(), check_fixture(&config, source)),
        },
    };
    TestResult {
        path: path.to_path_buf(),
        description,
        outcome: match outcome {
            Ok(()) => TestOutcome::Pass,
            Err(reason) => TestOutcome::Fail(reason),
        },
    }
}

fn check_fixture(config: &TestConfig, source: &str) -> Result<(), String> {
    let parsed = codeblock::parse(source);
    if config.expect_parse_error {
        return match parsed {
            Err(codeblock::Error::Parse(_)) => Ok(()),
            Err(e) => Err(format!("expected a parse error, got: {}", e)),
            Ok(_) => Err("expected parse error, but parsing succeeded".into()),
        };
    }
    let doc = parsed.map_err(|e| format!("unexpected parse error: {}", e))?;

    if config.roundtrip {
        let regenerated = freeze_to_source(&doc, &SourceOptions::default())
            .map_err(|e| format!("freeze to source failed: {}", e))?;
        let expected = source.trim_end();
        if regenerated != expected {
            return Err(format!(
                "source round trip mismatch\n  expected:\n{}\n  actual:\n{}",
                expected, regenerated
            ));
        }
    }

    check_freeze_idempotent(&doc)?;

    let Some(path) = &config.run else {
        return Ok(());
    };
    let node = doc
        .pointer(path)
        .ok_or_else(|| format!("no value at `{}`", path))?;
    let bindings = serde_json::to_value(&config.bindings)
        .map_err(|e| format!("bindings are not JSON: {}", e))?;
    let result = Sandbox::new().run_node(node, &bindings, &RunOptions::default());

    match (&config.expect_error, &config.expect_result, result) {
        (Some(expected), _, Err(e)) if e.to_string().contains(expected.as_str()) => Ok(()),
        (Some(expected), _, Err(e)) => Err(format!(
            "expected error containing \"{}\", got: {}",
            expected, e
        )),
        (Some(expected), _, Ok(value)) => Err(format!(
            "expected error containing \"{}\", but the block returned {}",
            expected, value
        )),
        (None, _, Err(e)) => Err(format!("unexpected error: {}", e)),
        (None, Some(expected), Ok(value)) => {
            let expected = serde_json::to_value(expected)
                .map_err(|e| format!("expect_result is not JSON: {}", e))?;
            if value == expected {
                Ok(())
            } else {
                Err(format!(
                    "result mismatch\n  expected: {}\n  actual:   {}",
                    expected, value
                ))
            }
        }
        (None, None, Ok(_)) => Ok(()),
    }
}

/// freeze → thaw must give back the tree, and freezing again the same text.
fn check_freeze_idempotent(doc: &Node) -> Result<(), String> {
    let frozen = freeze_to_json(doc).map_err(|e| format!("freeze failed: {}", e))?;
    let thawed = thaw_from_json(&frozen).map_err(|e| format!("thaw failed: {}", e))?;
    if &thawed != doc {
        return Err("thawed tree differs from the parsed tree".into());
    }
    let refrozen = freeze_to_json(&thawed).map_err(|e| format!("freeze failed: {}", e))?;
    if refrozen != frozen {
        return Err(format!(
            "freezing is not idempotent\n  first:  {}\n  second: {}",
            frozen, refrozen
        ));
    }
    Ok(())
}

/// Discover fixtures grouped by category (subfolder relative to root).
/// Files directly in `root` get category "" (uncategorized).
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_fixtures(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_fixtures(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_fixtures(&path, root, out);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.ends_with(FIXTURE_SUFFIX))
        {
            let category = path
                .parent()
                .and_then(|p| p.strip_prefix(root).ok())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            out.entry(category).or_default().push(path);
        }
    }
}

fn category_label(category: &str) -> &str {
    if category.is_empty() { "(root)" } else { category }
}

/// List available categories for the given fixture path.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }

    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no {} files found in {}", FIXTURE_SUFFIX, path.display());
        return;
    }

    eprintln!("available categories:");
    for (category, files) in &categories {
        eprintln!("  {} ({} fixtures)", category_label(category), files.len());
    }
}

struct Style {
    no_color: bool,
}

impl Style {
    fn paint(&self, text: &str, code: &str) -> String {
        if self.no_color {
            text.to_string()
        } else {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        }
    }

    fn pass(&self) -> String {
        self.paint("PASS", "32")
    }

    fn fail(&self) -> String {
        self.paint("FAIL", "31")
    }

    fn bold(&self, text: &str) -> String {
        self.paint(text, "1")
    }
}

/// Select the categories to run; unknown requests are warned about.
fn select<'a>(
    all: &'a BTreeMap<String, Vec<PathBuf>>,
    requested: &[String],
) -> BTreeMap<&'a str, &'a Vec<PathBuf>> {
    if requested.is_empty() {
        return all.iter().map(|(k, v)| (k.as_str(), v)).collect();
    }
    let mut selected = BTreeMap::new();
    for request in requested {
        let request = request.trim_matches('/');
        let prefix = format!("{}/", request);
        let mut found = false;
        for (category, files) in all {
            if category == request || category.starts_with(&prefix) {
                selected.insert(category.as_str(), files);
                found = true;
            }
        }
        if !found {
            eprintln!(
                "warning: category '{}' not found (available: {})",
                request,
                all.keys()
                    .map(|k| category_label(k))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
    selected
}

/// Run every fixture under `path` (or a single file).
/// If `categories` is non-empty, only fixtures in those categories run.
/// Returns exit code: 0 = all pass, 1 = any failure.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    let style = Style { no_color };
    let groups: Vec<(String, Vec<PathBuf>)> = if path.is_file() {
        vec![(String::new(), vec![path.to_path_buf()])]
    } else {
        let all = discover_categorized(path);
        if all.is_empty() {
            eprintln!("no {} files found in {}", FIXTURE_SUFFIX, path.display());
            return 1;
        }
        let selected = select(&all, categories);
        if selected.is_empty() {
            eprintln!("no matching categories found");
            return 1;
        }
        selected
            .into_iter()
            .map(|(category, files)| (category.to_string(), files.clone()))
            .collect()
    };

    let single = path.is_file();
    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (category, files) in &groups {
        if !single {
            eprintln!();
            eprintln!("{}", style.bold(category_label(category)));
        }
        for file in files {
            let result = run_fixture(file);
            match &result.outcome {
                TestOutcome::Pass => {
                    passed += 1;
                    eprintln!("  {}  {}", style.pass(), result.label());
                }
                TestOutcome::Fail(_) => {
                    eprintln!("  {}  {}", style.fail(), result.label());
                    failures.push(result);
                }
            }
        }
    }

    if !failures.is_empty() {
        eprintln!();
        eprintln!("failures:");
        for failure in &failures {
            eprintln!();
            eprintln!("  --- {} ---", failure.path.display());
            if let TestOutcome::Fail(reason) = &failure.outcome {
                for line in reason.lines() {
                    eprintln!("  {}", line);
                }
            }
        }
    }

    eprintln!();
    if failures.is_empty() {
        eprintln!("test result: {}. {} passed, 0 failed", style.paint("ok", "32"), passed);
        0
    } else {
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            style.paint("FAILED", "31"),
            passed,
            failures.len(),
            passed + failures.len()
        );
        1
    }
}
