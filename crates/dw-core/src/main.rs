use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dw_core::config::{BackendKind, Config, OutputFormat, SuggestErrorPolicy};
use dw_core::present::{JsonPresenter, Presenter, TerminalPresenter};
use dw_core::record::SuggestionRecord;
use dw_core::Monitor;

/// Watch the audit log for access denials and ask an LLM for the allow rule.
#[derive(Debug, Parser)]
#[command(name = "denialwatch", version)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/denialwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file to follow
    #[arg(long)]
    path: Option<PathBuf>,

    /// Substring that marks a denial line
    #[arg(long)]
    marker: Option<String>,

    /// Suggestion backend
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Model for the selected backend
    #[arg(long)]
    model: Option<String>,

    /// Print one JSON object per denial instead of text blocks
    #[arg(long)]
    json: bool,

    /// Sleep between end-of-file polls, in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// What to do when a suggestion request fails
    #[arg(long, value_enum)]
    on_suggest_error: Option<SuggestErrorPolicy>,

    /// Append every suggestion to the JSONL record
    #[arg(long)]
    record: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Flags win over the config file.
    fn apply(&self, config: &mut Config) {
        if let Some(ref path) = self.path {
            config.watch.path = path.clone();
        }
        if let Some(ref marker) = self.marker {
            config.watch.marker = marker.clone();
        }
        if let Some(backend) = self.backend {
            config.backend.default = backend;
        }
        if let Some(ref model) = self.model {
            config.set_model(model.clone());
        }
        if self.json {
            config.output.format = OutputFormat::Json;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.watch.poll_interval_ms = ms;
        }
        if let Some(policy) = self.on_suggest_error {
            config.backend.on_suggest_error = policy;
        }
        if self.record {
            config.output.record_enabled = true;
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // Logs go to stderr so stdout stays clean for --json.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match cli.config {
        Some(ref path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        None => Config::load_or_default(),
    };
    cli.apply(&mut config);

    let watcher = match config.watcher() {
        Ok(w) => w,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    // Credentials are checked before the watch starts.
    let suggester = match config.build_suggester() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    info!(backend = suggester.name(), model = config.model(), "backend ready");

    let presenter: Box<dyn Presenter> = match config.output.format {
        OutputFormat::Text => Box::new(TerminalPresenter::stdout()),
        OutputFormat::Json => Box::new(JsonPresenter::stdout()),
    };

    let mut monitor =
        Monitor::new(suggester, presenter).with_error_policy(config.backend.on_suggest_error);

    if config.output.record_enabled {
        let path = config.output.resolve_record_path();
        match SuggestionRecord::new(&path) {
            Ok(record) => {
                info!(path = %path.display(), "recording suggestions");
                monitor = monitor.with_record(record);
            }
            Err(e) => {
                eprintln!("error: cannot open record {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create async runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        tokio::select! {
            result = monitor.run(&watcher) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping watch");
                Ok(())
            }
        }
    });

    if let Err(e) = result {
        error!(error = %e, "watch stopped");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
