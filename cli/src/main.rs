mod test_runner;

use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use codeblock::{
    Node, ParseError, PurifyOptions, SourceOptions, TransformHook, freeze_to_source,
    freeze_to_value,
};
use sandbox::{RunOptions, Sandbox};

#[derive(Parser)]
#[command(name = "codeblock", version, about = "Annotated code block toolkit")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the purified text of an annotated file
    Purify(PurifyArgs),

    /// Print the frozen JSON of an annotated file
    Freeze(FileArgs),

    /// Regenerate annotated source from a file
    Source(SourceArgs),

    /// Run one block, or every block, of an annotated file
    Run(RunArgs),

    /// Run .test.cb fixture files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct FileArgs {
    /// Annotated source file
    file: String,
}

#[derive(clap::Args)]
struct PurifyArgs {
    /// Annotated source file
    file: String,

    /// Emit producer calls instead of canonical strings
    #[arg(long)]
    program: bool,

    /// Also write the purified text next to the source file
    #[arg(long)]
    write: bool,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Annotated source or frozen JSON file
    file: String,

    /// Keep the surrounding JSON on one line
    #[arg(long)]
    oneline: bool,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Annotated source file
    file: String,

    /// Dotted path of the block to run; without it every block is run
    #[arg(short, long)]
    block: Option<String>,

    /// Arguments as key=value pairs (after --)
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.cb file or directory containing them
    path: String,

    /// Run only fixtures in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,codeblock::console=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let color_choice = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    match cli.command {
        Command::Purify(args) => do_purify(args, color_choice),
        Command::Freeze(args) => {
            let doc = parse_file(&args.file, color_choice);
            print_json(&freeze_to_value(&doc));
        }
        Command::Source(args) => {
            let doc = parse_file(&args.file, color_choice);
            let options = SourceOptions {
                oneline: args.oneline,
            };
            match freeze_to_source(&doc, &options) {
                Ok(text) => println!("{text}"),
                Err(e) => fail(e),
            }
        }
        Command::Run(args) => do_run(args, color_choice),
        Command::Test(args) => {
            let path = Path::new(&args.path);
            if args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            process::exit(test_runner::run_tests(path, cli.no_color, &args.category));
        }
    }
}

fn do_purify(args: PurifyArgs, color_choice: ColorChoice) {
    let options = if args.program {
        PurifyOptions::program()
    } else {
        PurifyOptions::json()
    };
    let hook = TransformHook::new(options);
    let source = read_source(&args.file);
    let result = if args.write {
        hook.load(&args.file)
    } else {
        hook.transform(&source)
    };
    match result {
        Ok(transformed) => {
            if let Some(artifact) = &transformed.artifact {
                tracing::info!(artifact = %artifact.display(), "wrote purified text");
            }
            print!("{}", transformed.text);
        }
        Err(codeblock::Error::Parse(e)) => report_parse_error(&args.file, &source, &e, color_choice),
        Err(e) => fail(e),
    }
}

fn do_run(args: RunArgs, color_choice: ColorChoice) {
    let doc = parse_file(&args.file, color_choice);
    let arguments = Value::Object(
        args.args
            .iter()
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), parse_arg(value)),
                None => (pair.clone(), Value::Bool(true)),
            })
            .collect::<Map<_, _>>(),
    );

    let sandbox = Sandbox::new();
    let options = RunOptions::default();
    match &args.block {
        Some(path) => {
            let Some(node) = doc.pointer(path) else {
                fail(format!("no value at `{path}` in {}", args.file));
            };
            match sandbox.run_node(node, &arguments, &options) {
                Ok(value) => print_json(&value),
                Err(e) => fail(e),
            }
        }
        None => match sandbox.run_all(&doc, &arguments, &options) {
            Ok(result) => print_json(&freeze_to_value(&result)),
            Err(e) => fail(e),
        },
    }
}

fn read_source(file: &str) -> String {
    match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => fail(format!("cannot read '{file}': {e}")),
    }
}

/// Parse an annotated file, reporting parse errors against its source.
fn parse_file(file: &str, color_choice: ColorChoice) -> Node {
    let source = read_source(file);
    match codeblock::parse(&source) {
        Ok(doc) => doc,
        Err(codeblock::Error::Parse(e)) => report_parse_error(file, &source, &e, color_choice),
        Err(e) => fail(e),
    }
}

fn report_parse_error(file: &str, source: &str, error: &ParseError, color_choice: ColorChoice) -> ! {
    let mut files = SimpleFiles::new();
    let file_id = files.add(file.to_string(), source.to_string());
    let mut error = error.clone();
    error.file_id = file_id;

    let writer = StandardStream::stderr(color_choice);
    let config = term::Config::default();
    let _ = term::emit_to_write_style(&mut writer.lock(), &config, &files, &error.to_diagnostic());
    process::exit(1);
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => fail(e),
    }
}

fn fail(error: impl std::fmt::Display) -> ! {
    eprintln!("error: {error}");
    process::exit(1);
}

/// Parse a CLI argument value.
/// Integers and floats become numbers, "true"/"false" booleans, "null" null;
/// everything else is a string.
fn parse_arg(s: &str) -> Value {
    if let Ok(n) = s.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = s.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(n) {
            return Value::Number(number);
        }
    }
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::String(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_values() {
        assert_eq!(parse_arg("5"), Value::from(5));
        assert_eq!(parse_arg("2.5"), Value::from(2.5));
        assert_eq!(parse_arg("true"), Value::Bool(true));
        assert_eq!(parse_arg("null"), Value::Null);
        assert_eq!(parse_arg("Ada"), Value::from("Ada"));
    }
}
