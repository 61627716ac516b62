//! Replay a JSON-lines event log through the invalidation pipeline.
//!
//! Prints the classification of every resource change and the query
//! predicates significant changes invalidate, to check transition policies
//! against recorded traffic.
//!
//! ```text
//! ripple-replay [--config <path>] [--json] <events.jsonl>
//! ```
//!
//! Without `--config`, `RIPPLE_CONFIG` is used if set, otherwise the built-in
//! location policy.

use ripple_core::{ConfigError, EngineConfig, QueryPredicate, ScopeId, SourceEvent};
use ripple_engine::{EventOutcome, InvalidationPipeline, TransitionRecords};
use ripple_storage::ResourceStore;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

struct Args {
    config: Option<PathBuf>,
    json: bool,
    log: PathBuf,
}

fn parse_args() -> Result<Args, String> {
    let mut config = None;
    let mut json = false;
    let mut log = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().ok_or("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "--json" => json = true,
            "-h" | "--help" => return Err(usage()),
            other if other.starts_with("--") => {
                return Err(format!("unknown option '{}'\n{}", other, usage()));
            }
            other => {
                if log.replace(PathBuf::from(other)).is_some() {
                    return Err(format!("more than one event log given\n{}", usage()));
                }
            }
        }
    }

    let log = log.ok_or_else(usage)?;
    Ok(Args { config, json, log })
}

fn usage() -> String {
    "usage: ripple-replay [--config <path>] [--json] <events.jsonl>".to_string()
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match EngineConfig::load(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::MissingConfigPath) => Ok(EngineConfig::with_default_policies()),
        Err(err) => Err(err.to_string()),
    }
}

fn run(args: Args) -> Result<(), String> {
    let config = load_config(args.config.as_deref())?;
    let contents = std::fs::read_to_string(&args.log)
        .map_err(|e| format!("Failed to read {}: {}", args.log.display(), e))?;

    let store = Arc::new(ResourceStore::from_config(&config));
    let pipeline = InvalidationPipeline::from_config(&config, store);
    let mut records: HashMap<ScopeId, TransitionRecords> = HashMap::new();
    let mut undecodable = 0usize;

    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event = match SourceEvent::from_json(line) {
            Ok(event) => event,
            Err(err) => {
                undecodable += 1;
                eprintln!("line {}: {}", line_no, err);
                continue;
            }
        };

        let scope = event.scope();
        if !config.tracks(event.resource_type()) {
            continue;
        }
        let scope_records = records.entry(scope).or_default();
        let outcomes = pipeline
            .process(scope_records, scope, event)
            .map_err(|e| format!("line {}: {}", line_no, e))?;

        for outcome in outcomes {
            let predicates = match outcome.classification() {
                Some(classification) if classification.is_significant() => pipeline
                    .dispatcher()
                    .predicates_for(scope, outcome.identity()),
                _ => Vec::new(),
            };
            print_outcome(line_no, &outcome, &predicates, args.json);
        }
    }

    let stats = pipeline.stats().snapshot();
    if args.json {
        let summary = json!({ "summary": stats, "undecodable": undecodable });
        println!("{}", summary);
    } else {
        println!(
            "processed {} changes: {} significant, {} noise ({} malformed), {} deletions, {} undecodable lines",
            stats.events_processed,
            stats.significant,
            stats.noise,
            stats.malformed,
            stats.deletions,
            undecodable
        );
    }
    Ok(())
}

fn print_outcome(
    line_no: usize,
    outcome: &EventOutcome,
    predicates: &[QueryPredicate],
    as_json: bool,
) {
    if as_json {
        let record = json!({
            "line": line_no,
            "result": outcome,
            "predicates": predicates,
        });
        println!("{}", record);
        return;
    }

    match outcome {
        EventOutcome::Changed {
            identity,
            classification,
            malformed,
            ..
        } => {
            let note = if *malformed { " (malformed)" } else { "" };
            println!("{:>5}  {}  {}{}", line_no, identity, classification, note);
        }
        EventOutcome::Deleted { identity } => {
            println!("{:>5}  {}  deleted", line_no, identity);
        }
    }
    for predicate in predicates {
        println!("       -> {}", predicate);
    }
}

fn main() -> ExitCode {
    let _ = ripple_engine::init_tracing();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}
