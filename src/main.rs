//! Haven Cache CLI
//!
//! Inspects and edits a durable cache store from the command line. The
//! store directory backs the `localStorage` tier; every command opens it,
//! acts, and prints JSON.
//!
//! ```text
//! haven-cache --store-dir ./store set greeting '"hello"' --ttl 60000 --tag demo
//! haven-cache --store-dir ./store get greeting
//! haven-cache --store-dir ./store stats --prometheus
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use haven_cache::{CacheConfig, CacheContext, SetOptions, TierKind};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Haven Cache - inspect and edit a persisted cache store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory backing the localStorage tier
    #[arg(long, env = "HAVEN_CACHE_DIR", default_value = ".haven-cache")]
    store_dir: PathBuf,

    /// YAML or JSON cache configuration
    #[arg(long, env = "HAVEN_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under KEY
    Get { key: String },

    /// Store a JSON VALUE under KEY
    Set {
        key: String,
        /// JSON document; bare words are stored as strings
        value: String,
        /// Time-to-live in milliseconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Tag to attach (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        priority: Option<i32>,
    },

    /// Remove KEY
    Remove { key: String },

    /// Remove every item carrying any of TAGS
    Invalidate {
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Remove every item
    Clear,

    /// Rankings, expiring items and tuning advice
    Analyze,

    /// Sweep expired and least-used items
    Optimize,

    /// Current metrics
    Stats {
        /// Prometheus text format instead of JSON
        #[arg(long)]
        prometheus: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    // Only the durable tier survives between invocations
    let config = CacheConfig {
        tiers: vec![TierKind::Local],
        enable_metrics: false,
        ..config
    };
    debug!(?config, store = %args.store_dir.display(), "Opening cache");

    let cache = CacheContext::with_store_dir(config, &args.store_dir)
        .with_context(|| format!("opening store {}", args.store_dir.display()))?;

    match args.command {
        Command::Get { key } => {
            let value: Option<Value> = cache.get(&key).await;
            print_json(&value)?;
        }
        Command::Set {
            key,
            value,
            ttl,
            tags,
            priority,
        } => {
            let value = parse_value(&value);
            let options = SetOptions {
                ttl,
                priority,
                tags: (!tags.is_empty()).then_some(tags),
                ..Default::default()
            };
            let stored = cache.set(&key, &value, options).await;
            print_json(&json!({ "stored": stored }))?;
        }
        Command::Remove { key } => {
            let removed = cache.remove(&key).await;
            print_json(&json!({ "removed": removed }))?;
        }
        Command::Invalidate { tags } => {
            let removed = cache.invalidate(tags.as_slice()).await;
            print_json(&json!({ "removed": removed }))?;
        }
        Command::Clear => {
            let cleared = cache.clear().await;
            print_json(&json!({ "cleared": cleared }))?;
        }
        Command::Analyze => print_json(&cache.analyze().await)?,
        Command::Optimize => print_json(&cache.optimize().await)?,
        Command::Stats { prometheus } => {
            cache.refresh_metrics().await;
            if prometheus {
                print!("{}", cache.render_prometheus()?);
            } else {
                print_json(&cache.metrics())?;
            }
        }
    }

    cache.shutdown();
    Ok(())
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so stdout stays machine-readable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
