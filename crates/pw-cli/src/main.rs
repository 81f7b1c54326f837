//! CLI entry point for pollwatch.
//!
//! This binary watches one or more directories with the polling watch
//! service and prints every change it reports.
//!
//! # Usage
//!
//! ```bash
//! pollwatch [OPTIONS] <COMMAND>
//!
//! # Watch two directories, scanning every 2 seconds
//! pollwatch watch ./incoming ./outgoing --sensitivity high
//!
//! # Only deletions, one JSON object per line, stop after a minute
//! pollwatch watch ./incoming --events delete --json --timeout-secs 60
//!
//! # Show the effective configuration
//! pollwatch --config pollwatch.json config
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use pw_core::{Config, FxHashSet, Sensitivity, fx_hash_set};
use pw_watcher::{EventKind, EventKinds, WatchEvent, WatchKey, WatchModifier, WatchService};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watch directories for created, modified, and deleted entries.
///
/// Changes are detected by rescanning each directory periodically, so this
/// works on any filesystem, including network mounts.
#[derive(Parser)]
#[command(name = "pollwatch", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON configuration file.
    ///
    /// Defaults are used for anything the file leaves out.
    #[arg(short, long, global = true, env = "POLLWATCH_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Watch directories and print events as they are detected.
    Watch(WatchArgs),

    /// Print the effective configuration as JSON.
    Config,
}

/// Arguments for `pollwatch watch`.
#[derive(clap::Args)]
struct WatchArgs {
    /// Directories to watch.
    #[arg(required = true)]
    dirs: Vec<Utf8PathBuf>,

    /// Scan interval level (defaults to the configured level).
    #[arg(short, long, value_enum)]
    sensitivity: Option<SensitivityArg>,

    /// Comma-separated event kinds: create, modify, delete, or all.
    #[arg(short, long, default_value = "all", value_parser = parse_events)]
    events: EventKinds,

    /// Print one JSON object per event instead of text.
    #[arg(long)]
    json: bool,

    /// Stop after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

/// Scan interval level.
#[derive(Clone, Copy, ValueEnum)]
enum SensitivityArg {
    /// Shortest interval.
    High,
    /// Default interval.
    Medium,
    /// Longest interval.
    Low,
}

impl From<SensitivityArg> for Sensitivity {
    fn from(arg: SensitivityArg) -> Self {
        match arg {
            SensitivityArg::High => Self::High,
            SensitivityArg::Medium => Self::Medium,
            SensitivityArg::Low => Self::Low,
        }
    }
}

fn parse_events(list: &str) -> Result<EventKinds, String> {
    let kinds = EventKinds::parse_list(list)
        .ok_or_else(|| format!("unknown event kind in '{list}' (expected create, modify, delete, all)"))?;
    if kinds.difference(EventKinds::OVERFLOW).is_empty() {
        return Err("at least one of create, modify, delete is required".to_owned());
    }
    Ok(kinds)
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},tokio=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Loads the configuration file if one was given.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let Some(path) = &cli.config else {
        return Ok(Config::default());
    };

    let config = Config::load(path)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to load config {}: {}", path, e))?;
    info!(path = %path, "Configuration loaded");
    Ok(config)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Watches the requested directories until none remain valid or the
/// timeout expires.
///
/// # Errors
///
/// Returns an error if the service cannot start, a directory cannot be
/// registered, or output cannot be written.
fn run_watch(config: &Config, args: &WatchArgs) -> color_eyre::Result<()> {
    let service = WatchService::polling(config)?;

    let modifiers: Vec<WatchModifier> = args
        .sensitivity
        .map(|level| WatchModifier::Sensitivity(level.into()))
        .into_iter()
        .collect();

    let mut active: FxHashSet<WatchKey> = fx_hash_set();
    for dir in &args.dirs {
        let key = service
            .register(dir, args.events, &modifiers)
            .map_err(|e| color_eyre::eyre::eyre!("Cannot watch {}: {}", dir, e))?;
        active.insert(key);
    }
    info!(directories = active.len(), "Watching; press Ctrl-C to stop");

    let deadline = args
        .timeout_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    while !active.is_empty() {
        let key = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    info!("Timeout reached");
                    break;
                }
                match service.poll_timeout(remaining)? {
                    Some(key) => key,
                    None => continue,
                }
            }
            None => service.take()?,
        };

        for event in key.poll_events() {
            if args.json {
                write_json_event(&mut handle, key.watchable(), &event)?;
            } else {
                write_text_event(&mut handle, key.watchable(), &event)?;
            }
        }
        handle.flush()?;

        if !key.reset() {
            warn!(dir = %key.watchable(), "Directory is no longer watched");
            active.remove(&key);
        }
    }

    service.close()?;
    info!(stats = ?service.stats(), "Stopped");
    Ok(())
}

/// Prints the effective configuration.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
fn run_config(config: &Config) -> color_eyre::Result<()> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize JSON: {}", e))?;
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{json}")?;
    Ok(())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Formats an event as `KIND dir/name (xCOUNT)`.
fn format_event(dir: &Utf8Path, event: &WatchEvent) -> String {
    let kind = event.kind().label().to_uppercase();
    let target = event
        .context()
        .map_or_else(|| dir.to_owned(), |name| dir.join(name));
    format!("{kind} {target} (x{})", event.count())
}

fn write_text_event(
    out: &mut impl Write,
    dir: &Utf8Path,
    event: &WatchEvent,
) -> std::io::Result<()> {
    writeln!(out, "{}", format_event(dir, event))
}

fn write_json_event(
    out: &mut impl Write,
    dir: &Utf8Path,
    event: &WatchEvent,
) -> color_eyre::Result<()> {
    #[derive(serde::Serialize)]
    struct EventLine<'a> {
        dir: &'a Utf8Path,
        kind: EventKind,
        context: Option<&'a Utf8Path>,
        count: u32,
    }

    let line = EventLine {
        dir,
        kind: event.kind(),
        context: event.context(),
        count: event.count(),
    };
    serde_json::to_writer(&mut *out, &line)?;
    writeln!(out)?;
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Route to appropriate command
    let config = build_config(&cli)?;
    match &cli.command {
        Commands::Watch(args) => run_watch(&config, args),
        Commands::Config => run_config(&config),
    }
}
