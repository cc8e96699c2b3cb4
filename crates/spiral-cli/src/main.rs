//! spiral-cli: a thin driver around `spiral-engine`'s orchestrator.
//!
//! Reads a document (JSON) from a file or stdin, wires in the seed `core`/
//! `demo` registries from `spiral-engine::stdlib`, runs it, and prints the
//! resulting value. No CLI concern lives in the engine itself (spec.md §6:
//! "no CLI ... belong to the core") — this crate is purely the host.

use std::io::Read as _;
use std::path::PathBuf;
use std::process;

use clap::{Parser as ClapParser, Subcommand};
use spiral_engine::{stdlib, EvalConfig};
use spiral_value::Value;

#[derive(ClapParser)]
#[command(name = "spiral")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate a SPIRAL IR document", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a document and print its result value
    Run {
        /// Input document (JSON). Pass `-` to read from stdin.
        input: PathBuf,

        /// Initial environment bindings (spec.md §6), each `name=jsonValue`.
        #[arg(long = "input", value_name = "NAME=JSON")]
        inputs: Vec<String>,

        /// Upper bound on expression-evaluation steps.
        #[arg(long)]
        max_steps: Option<u64>,

        /// Emit a step-wise evaluation trace on stderr via `tracing`.
        #[arg(long)]
        trace: bool,

        /// Use the async-document step default (1,000,000) instead of the
        /// synchronous default (10,000) when `--max-steps` is not given.
        #[arg(long = "async")]
        asynchronous: bool,

        /// Print the document's canonical-form SHA-256 digest instead of
        /// evaluating it.
        #[arg(long)]
        digest: bool,

        /// After evaluating, print the effect log to stderr.
        #[arg(long)]
        effect_log: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("spiral_cli=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            input,
            inputs,
            max_steps,
            trace,
            asynchronous,
            digest,
            effect_log,
        } => run(&input, &inputs, max_steps, trace, asynchronous, digest, effect_log).await,
    }
}

fn read_document_json(path: &PathBuf) -> serde_json::Value {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("Error reading stdin: {e}");
            process::exit(1);
        }
        buf
    } else {
        match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading {}: {e}", path.display());
                process::exit(1);
            }
        }
    };
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error parsing {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn parse_inputs(raw: &[String]) -> std::collections::HashMap<String, Value> {
    let mut out = std::collections::HashMap::new();
    for entry in raw {
        let Some((name, json)) = entry.split_once('=') else {
            eprintln!("Error: --input expects NAME=JSON, found `{entry}`");
            process::exit(1);
        };
        let parsed: serde_json::Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Error parsing --input {name}: {e}");
                process::exit(1);
            }
        };
        out.insert(name.to_string(), json_to_value(&parsed));
    }
    out
}

/// Converts a plain JSON literal supplied on the command line into a
/// `Value`. Only the literal shapes `--input` needs (booleans, numbers,
/// strings, lists, null) are handled; anything requiring `Type` context
/// (sets, options, closures) belongs in the document itself.
fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Void,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(_) => {
            eprintln!("Error: --input does not support object literals");
            process::exit(1);
        }
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Void => "void".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::List(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Set(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Map(entries) => {
            let inner: Vec<String> = entries.iter().map(|(k, v)| format!("{k:?}: {}", format_value(v))).collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Option(None) => "none".to_string(),
        Value::Option(Some(v)) => format!("some({})", format_value(v)),
        Value::Closure(_) => "<closure>".to_string(),
        Value::RefCell(key) => format!("<ref-cell {key}>"),
        Value::Future { task_id, status } => format!("<future task={} status={:?}>", task_id.0, status),
        Value::Opaque { tag, .. } => format!("<opaque {tag}>"),
        Value::Error(e) => format!("error({}: {})", e.kind, e.message),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    input: &PathBuf,
    raw_inputs: &[String],
    max_steps: Option<u64>,
    trace: bool,
    asynchronous: bool,
    digest: bool,
    effect_log: bool,
) {
    let json = read_document_json(input);

    if digest {
        match spiral_engine::canon::digest(&json) {
            Ok(hex) => {
                println!("{hex}");
                return;
            }
            Err(e) => {
                eprintln!("Error computing digest: {e}");
                process::exit(1);
            }
        }
    }

    let document = match spiral_engine::Document::from_json(json) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error validating document: {e}");
            process::exit(1);
        }
    };

    let default_max_steps = if asynchronous { EvalConfig::for_async().max_steps } else { EvalConfig::default().max_steps };
    let config = EvalConfig {
        max_steps: max_steps.unwrap_or(default_max_steps),
        trace,
        inputs: parse_inputs(raw_inputs),
        operators: Some(stdlib::operators()),
        effects: Some(stdlib::effects()),
        ..EvalConfig::default()
    };

    let orchestrator = spiral_engine::Orchestrator::new(document, config);

    let result = run_with_inputs(orchestrator).await;

    match result {
        Ok((value, ctx)) => {
            println!("{}", format_value(&value));
            if effect_log {
                let entries = ctx.effect_log.query_ordered();
                for entry in entries {
                    eprintln!(
                        "[task {} #{}] {} {:?}",
                        entry.task_id.0, entry.seq, entry.op, entry.args
                    );
                }
            }
            if value.is_error() {
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error evaluating document: {e}");
            process::exit(1);
        }
    }
}

async fn run_with_inputs(
    orchestrator: spiral_engine::Orchestrator,
) -> Result<(Value, spiral_engine::Ctx), spiral_value::SpiralError> {
    let value = orchestrator.run().await?;
    Ok((value, orchestrator.ctx().clone()))
}
