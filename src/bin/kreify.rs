/// KoruReify CLI - inspect and edit JSON state through a reified store
///
/// Every command loads a JSON file, reifies it, and works through the
/// tracked view, so strictness, derivations and watches behave exactly as
/// they do in the library.
///
/// Usage:
///   kreify show <file>                         - Print the state
///   kreify get <file> <path>                   - Print one value
///   kreify keys <file> [path]                  - List keys
///   kreify apply <file> --op <op>...           - Apply writes in order
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use koru_reify::{
    Access, Derivation, Derivations, JsonValue, Mode, ReifyConfig, Store, View, reify_json,
};
use similar::{Algorithm, DiffOp, capture_diff_slices};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kreify")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Cell backend: static or reactive (default: $KORU_REIFY_MODE or static)
    #[arg(short, long, global = true)]
    mode: Option<String>,

    /// Allow writes to introduce new keys (default: $KORU_REIFY_PERMISSIVE)
    #[arg(short, long, global = true)]
    permissive: bool,

    /// Log at debug level to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the whole state
    ///
    /// Examples:
    ///   kreify show state.json
    ///   kreify show state.json --snapshot --derive total=sum:prices
    Show {
        /// JSON file holding the initial state
        file: PathBuf,

        /// Include derived values
        #[arg(short, long)]
        snapshot: bool,

        /// Root derivation in the form name=op:path (ops: len, sum, min, max, count)
        #[arg(short, long = "derive")]
        derive: Vec<String>,
    },

    /// Print the value at a dotted path
    ///
    /// Examples:
    ///   kreify get state.json user.name
    ///   kreify get state.json total --derive total=sum:prices
    Get {
        /// JSON file holding the initial state
        file: PathBuf,

        /// Dotted path, e.g. todos.0.text
        path: String,

        /// Root derivation in the form name=op:path
        #[arg(short, long = "derive")]
        derive: Vec<String>,
    },

    /// List the keys of the root or of a nested container
    Keys {
        /// JSON file holding the initial state
        file: PathBuf,

        /// Dotted path to a container
        path: Option<String>,
    },

    /// Apply write operations in order
    ///
    /// Operations:
    ///   set:<path>=<json>     write a value
    ///   push:<path>=<json>    append to an array
    ///   delete:<path>         delete a key or array element
    ///
    /// Examples:
    ///   kreify apply state.json --op 'set:count=3' --diff
    ///   kreify --mode reactive apply state.json --op 'push:todos="x"' --watch todos.length
    Apply {
        /// JSON file holding the initial state
        file: PathBuf,

        /// Operation to apply (repeatable)
        #[arg(short, long = "op", required = true)]
        ops: Vec<String>,

        /// Root derivation in the form name=op:path
        #[arg(short, long = "derive")]
        derive: Vec<String>,

        /// Print every change of this path (reactive mode only)
        #[arg(short, long)]
        watch: Vec<String>,

        /// List the changed paths instead of the resulting state
        #[arg(long)]
        diff: bool,

        /// Write the resulting state back to the file
        #[arg(long)]
        write: bool,
    },
}

/// Aggregate over an array, usable as a root derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeriveOp {
    Len,
    Sum,
    Min,
    Max,
    Count,
}

impl FromStr for DeriveOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "len" => Ok(DeriveOp::Len),
            "sum" => Ok(DeriveOp::Sum),
            "min" => Ok(DeriveOp::Min),
            "max" => Ok(DeriveOp::Max),
            "count" => Ok(DeriveOp::Count),
            other => anyhow::bail!("Unknown derivation op '{}' (expected len, sum, min, max or count)", other),
        }
    }
}

impl DeriveOp {
    fn apply(self, items: &[JsonValue]) -> JsonValue {
        match self {
            DeriveOp::Len => JsonValue::from(items.len()),
            DeriveOp::Count => JsonValue::from(items.iter().filter(|v| is_truthy(v)).count()),
            DeriveOp::Sum => {
                let exact = items
                    .iter()
                    .try_fold(0i64, |acc, v| v.as_i64().and_then(|n| acc.checked_add(n)));
                match exact {
                    Some(total) => JsonValue::from(total),
                    // Non-integers or i64 overflow
                    None => JsonValue::from(items.iter().filter_map(JsonValue::as_f64).sum::<f64>()),
                }
            }
            DeriveOp::Min | DeriveOp::Max => {
                let numbers = items.iter().filter(|v| v.is_number());
                let pick = |a: &&JsonValue, b: &&JsonValue| {
                    let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                    a.total_cmp(&b)
                };
                let chosen = if self == DeriveOp::Min {
                    numbers.min_by(pick)
                } else {
                    numbers.max_by(pick)
                };
                chosen.cloned().unwrap_or(JsonValue::Null)
            }
        }
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Parse `name=op:path` into a root derivation.
fn parse_derive(spec: &str) -> Result<(String, Derivation)> {
    let (name, rest) = spec
        .split_once('=')
        .with_context(|| format!("Invalid derivation '{}': expected name=op:path", spec))?;
    let (op, path) = rest
        .split_once(':')
        .with_context(|| format!("Invalid derivation '{}': expected name=op:path", spec))?;
    let op: DeriveOp = op.parse()?;
    let path = path.to_string();
    let derivation = Derivation::new(move |_, root| match root.get_path(&path) {
        Access::View(list) if list.is_array() => {
            let items: Vec<JsonValue> = list.items().iter().map(Access::to_json).collect();
            op.apply(&items)
        }
        _ => JsonValue::Null,
    });
    Ok((name.to_string(), derivation))
}

fn build_derivations(specs: &[String]) -> Result<Derivations> {
    specs
        .iter()
        .map(|spec| parse_derive(spec))
        .collect::<Result<Vec<_>>>()
        .map(Derivations::from_iter)
}

/// A single write operation from `--op`.
#[derive(Debug, Clone, PartialEq)]
enum Op {
    Set { path: String, value: JsonValue },
    Push { path: String, value: JsonValue },
    Delete { path: String },
}

impl FromStr for Op {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = s
            .split_once(':')
            .with_context(|| format!("Invalid operation '{}': expected kind:path[=json]", s))?;
        let with_value = |rest: &str| -> Result<(String, JsonValue)> {
            let (path, raw) = rest
                .split_once('=')
                .with_context(|| format!("Invalid operation '{}': missing '=<json>'", s))?;
            let value = serde_json::from_str(raw)
                .with_context(|| format!("Invalid JSON value: {}", raw))?;
            Ok((path.to_string(), value))
        };
        match kind {
            "set" => {
                let (path, value) = with_value(rest)?;
                Ok(Op::Set { path, value })
            }
            "push" => {
                let (path, value) = with_value(rest)?;
                Ok(Op::Push { path, value })
            }
            "delete" => Ok(Op::Delete {
                path: rest.to_string(),
            }),
            other => anyhow::bail!("Unknown operation '{}' (expected set, push or delete)", other),
        }
    }
}

impl Op {
    fn apply(&self, state: &View) -> Result<()> {
        match self {
            Op::Set { path, value } => state
                .set_path(path, value.clone())
                .with_context(|| format!("Failed to set '{}'", path)),
            Op::Push { path, value } => {
                let list = state
                    .get_path(path)
                    .into_view()
                    .with_context(|| format!("'{}' is not a container", path))?;
                list.push(value.clone())
                    .with_context(|| format!("Failed to push to '{}'", path))?;
                Ok(())
            }
            Op::Delete { path } => {
                let removed = state
                    .delete_path(path)
                    .with_context(|| format!("Failed to delete '{}'", path))?;
                if !removed {
                    tracing::warn!(path = %path, "nothing to delete");
                }
                Ok(())
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(cli: &Cli) -> Result<ReifyConfig> {
    let mut config = ReifyConfig::from_env().context("Invalid environment configuration")?;
    if let Some(mode) = &cli.mode {
        config.mode = mode.parse().context("Invalid --mode")?;
    }
    if cli.permissive {
        config.permissive = true;
    }
    Ok(config)
}

/// Load a JSON file into a store
fn load_store(path: &Path, derive: &[String], config: ReifyConfig) -> Result<Store> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let derivations = build_derivations(derive)?;
    reify_json(&text, derivations, config)
        .with_context(|| format!("Failed to reify {}", path.display()))
}

/// Format JSON for pretty printing
fn format_json(value: &JsonValue) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// One difference between two states, addressed by dotted path.
#[derive(Debug, Clone, PartialEq)]
enum Change {
    Added { path: String, value: JsonValue },
    Removed { path: String, value: JsonValue },
    Changed { path: String, old: JsonValue, new: JsonValue },
}

impl Change {
    fn print(&self) {
        match self {
            Change::Added { path, value } => println!("{}", format!("  + {} = {}", path, value).green()),
            Change::Removed { path, value } => println!("{}", format!("  - {} = {}", path, value).red()),
            Change::Changed { path, old, new } => {
                println!("{}", format!("  ~ {}: {} -> {}", path, old, new).yellow())
            }
        }
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Collect the changes turning `old` into `new`.
///
/// Arrays are aligned with a Myers diff over the elements' JSON text, so a
/// shift or an insertion shows up as one added or removed element rather
/// than a change at every later index.
fn collect_changes(path: &str, old: &JsonValue, new: &JsonValue, out: &mut Vec<Change>) {
    match (old, new) {
        (JsonValue::Object(before), JsonValue::Object(after)) => {
            for (key, old_value) in before {
                match after.get(key) {
                    Some(new_value) => collect_changes(&child_path(path, key), old_value, new_value, out),
                    None => out.push(Change::Removed {
                        path: child_path(path, key),
                        value: old_value.clone(),
                    }),
                }
            }
            for (key, new_value) in after {
                if !before.contains_key(key) {
                    out.push(Change::Added {
                        path: child_path(path, key),
                        value: new_value.clone(),
                    });
                }
            }
        }
        (JsonValue::Array(before), JsonValue::Array(after)) => {
            let old_text: Vec<String> = before.iter().map(JsonValue::to_string).collect();
            let new_text: Vec<String> = after.iter().map(JsonValue::to_string).collect();
            let removed = |index: usize, out: &mut Vec<Change>| {
                out.push(Change::Removed {
                    path: child_path(path, &index.to_string()),
                    value: before[index].clone(),
                })
            };
            let added = |index: usize, out: &mut Vec<Change>| {
                out.push(Change::Added {
                    path: child_path(path, &index.to_string()),
                    value: after[index].clone(),
                })
            };
            for op in capture_diff_slices(Algorithm::Myers, &old_text, &new_text) {
                match op {
                    DiffOp::Equal { .. } => {}
                    DiffOp::Delete { old_index, old_len, .. } => {
                        (old_index..old_index + old_len).for_each(|i| removed(i, out))
                    }
                    DiffOp::Insert { new_index, new_len, .. } => {
                        (new_index..new_index + new_len).for_each(|i| added(i, out))
                    }
                    DiffOp::Replace {
                        old_index,
                        old_len,
                        new_index,
                        new_len,
                    } => {
                        let paired = old_len.min(new_len);
                        for offset in 0..paired {
                            collect_changes(
                                &child_path(path, &(new_index + offset).to_string()),
                                &before[old_index + offset],
                                &after[new_index + offset],
                                out,
                            );
                        }
                        (old_index + paired..old_index + old_len).for_each(|i| removed(i, out));
                        (new_index + paired..new_index + new_len).for_each(|i| added(i, out));
                    }
                }
            }
        }
        _ if old != new => out.push(Change::Changed {
            path: if path.is_empty() { "(root)".to_string() } else { path.to_string() },
            old: old.clone(),
            new: new.clone(),
        }),
        _ => {}
    }
}

/// Print the changes between two states
fn show_changes(before: &JsonValue, after: &JsonValue) {
    let mut changes = Vec::new();
    collect_changes("", before, after, &mut changes);

    println!("{}", "Changes:".bold());
    if changes.is_empty() {
        println!("  {}", "(none)".bright_black());
    }
    for change in &changes {
        change.print();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Show {
            file,
            snapshot,
            derive,
        } => {
            let store = load_store(&file, &derive, config)?;
            let value = if snapshot {
                store.snapshot()
            } else {
                store.to_json()
            };
            println!("{}", format_json(&value));
        }

        Commands::Get { file, path, derive } => {
            let store = load_store(&file, &derive, config)?;
            let access = store.state().get_path(&path);
            if access.is_undefined() {
                anyhow::bail!("Path not found: {}", path);
            }
            println!("{}", format_json(&access.to_json()));
        }

        Commands::Keys { file, path } => {
            let store = load_store(&file, &[], config)?;
            let view = match &path {
                Some(path) => store
                    .state()
                    .get_path(path)
                    .into_view()
                    .with_context(|| format!("'{}' is not a container", path))?,
                None => store.state(),
            };
            for key in view.keys() {
                println!("{}", key.cyan());
            }
        }

        Commands::Apply {
            file,
            ops,
            derive,
            watch,
            diff,
            write,
        } => {
            let ops = ops
                .iter()
                .map(|op| op.parse::<Op>())
                .collect::<Result<Vec<_>>>()?;
            let store = load_store(&file, &derive, config)?;
            let state = store.state();

            let mut watchers = Vec::new();
            if !watch.is_empty() {
                let rt = match (store.mode(), store.runtime()) {
                    (Mode::Reactive, Some(rt)) => rt,
                    _ => anyhow::bail!("--watch requires --mode reactive"),
                };
                for path in watch {
                    let source = state.clone();
                    let watched = path.clone();
                    watchers.push(rt.watch(
                        move || source.get_path(&watched).to_json(),
                        move |value| {
                            println!("{} {} = {}", "watch".cyan().bold(), path, value);
                        },
                    ));
                }
            }

            let before = store.snapshot();
            for op in &ops {
                op.apply(&state)?;
            }
            let after = store.snapshot();
            drop(watchers);

            if diff {
                show_changes(&before, &after);
            } else {
                println!("{}", format_json(&after));
            }

            if write {
                let text = format_json(&store.to_json());
                std::fs::write(&file, text + "\n")
                    .with_context(|| format!("Failed to write {}", file.display()))?;
                println!("{}", "OK".green().bold());
                println!("  Wrote: {}", file.display().to_string().cyan());
            }
        }
    }

    Ok(())
}
