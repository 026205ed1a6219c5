use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use shasta_cache::SnapshotStore;
use shasta_cli::roundtrip::RoundtripOptions;
use shasta_cli::{cleanup, inspect, roundtrip, Backend};
use shasta_core::config::load_tuning;
use shasta_core::{Config, Instrumentation, ObjectIdentifier, TuningConfig};

#[derive(Parser)]
#[command(name = "shasta", about = "Snapshot+delta distribution tooling")]
#[command(version)]
struct Cli {
    /// Path to a tuning TOML file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// Use the in-process store instead of Redis.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish, commit and subscribe through the whole pipeline and verify the
    /// subscriber sees the snapshot and then every update in order.
    Roundtrip {
        #[arg(long, default_value_t = 3)]
        values: usize,
        #[arg(long, default_value_t = 10)]
        deltas: usize,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
        /// Write per-object phase timings here.
        #[arg(long)]
        instrumentation_out: Option<PathBuf>,
        /// Keep the generated scope in the store for `inspect`.
        #[arg(long)]
        keep: bool,
    },
    /// Print the snapshot table of one scope.
    Inspect {
        /// Defaults to SHASTA_APP_ID.
        #[arg(long)]
        app_id: Option<String>,
        #[arg(long)]
        tag: String,
        #[arg(long)]
        scope: String,
    },
    /// Delete the snapshot tables and delta logs of one or more scopes.
    Cleanup {
        /// Defaults to SHASTA_APP_ID.
        #[arg(long)]
        app_id: Option<String>,
        #[arg(long)]
        tag: String,
        #[arg(long = "scope", required = true)]
        scopes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::from_default_env().add_directive("shasta=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load config
    let config = Config::from_env()?;
    config.log_redacted();

    let tuning = match &cli.config {
        Some(path) => {
            info!(config = %path.display(), "Loading tuning config");
            load_tuning(path)?
        }
        None => TuningConfig::default(),
    };
    let backend = Backend::from_config(&config, cli.memory);

    match cli.command {
        Command::Roundtrip {
            values,
            deltas,
            timeout_secs,
            instrumentation_out,
            keep,
        } => {
            let instrumentation = if tuning.instrumentation || instrumentation_out.is_some() {
                Instrumentation::enabled()
            } else {
                Instrumentation::disabled()
            };
            let options = RoundtripOptions {
                values,
                deltas,
                timeout: Duration::from_secs(timeout_secs),
                keep,
            };
            let report =
                roundtrip::run(&backend, &config, &tuning, &options, instrumentation.clone())
                    .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if let Some(path) = instrumentation_out {
                instrumentation.write_json(&path)?;
                info!(path = %path.display(), "Wrote instrumentation dump");
            }
        }
        Command::Inspect { app_id, tag, scope } => {
            let app_id = app_id.unwrap_or_else(|| config.app_id.clone());
            let identifier = ObjectIdentifier::new(app_id, tag, scope, "");
            let store = backend.open().await?;
            let view = inspect::run(&*store, &identifier).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            store.close().await?;
        }
        Command::Cleanup {
            app_id,
            tag,
            scopes,
        } => {
            let app_id = app_id.unwrap_or_else(|| config.app_id.clone());
            let identifiers: Vec<ObjectIdentifier> = scopes
                .into_iter()
                .map(|scope| ObjectIdentifier::new(app_id.clone(), tag.clone(), scope, ""))
                .collect();
            let store = backend.open().await?;
            let reports = cleanup::run(&*store, &identifiers).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            store.close().await?;
        }
    }

    Ok(())
}
