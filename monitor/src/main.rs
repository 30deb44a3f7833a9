//! Nightly promotion monitor.
//!
//! `monitor tick` advances today's record once; `monitor run` keeps ticking on
//! the configured interval.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use monitor::engine::{Engine, TickOutcome};
use monitor::exit_codes;
use monitor::io::blob::BlobRecordStore;
use monitor::io::config::{MonitorConfig, StorageConfig, load_config};
use monitor::io::devops::AzureDevOpsClient;
use monitor::io::secrets::{EnvSecret, SecretProvider};
use monitor::io::store::{ConfiguredStore, FsRecordStore};
use monitor::logging;
use monitor::looping::{LoopConfig, SystemClock, run_loop};

type LiveEngine =
    Engine<AzureDevOpsClient<EnvSecret>, AzureDevOpsClient<EnvSecret>, ConfiguredStore>;

#[derive(Parser)]
#[command(
    name = "monitor",
    version,
    about = "Nightly build and release promotion monitor"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tick on the configured interval until interrupted.
    Run {
        /// Path to the monitor TOML config.
        #[arg(short, long)]
        config: PathBuf,
        /// Stop after this many ticks.
        #[arg(long)]
        max_ticks: Option<u32>,
        /// Tick once right away instead of waiting a full interval first.
        #[arg(long)]
        immediate: bool,
    },
    /// Run a single tick for the current UTC date.
    Tick {
        /// Path to the monitor TOML config.
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() {
    logging::init();
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            config,
            max_ticks,
            immediate,
        } => cmd_run(&config, max_ticks, immediate),
        Command::Tick { config } => cmd_tick(&config),
    }
}

fn cmd_run(config_path: &Path, max_ticks: Option<u32>, immediate: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let loop_config = LoopConfig {
        interval: config.tick_interval(),
        max_ticks,
        immediate,
    };
    let engine = build_engine(config)?;
    let outcome = run_loop(&engine, &loop_config, &SystemClock, |result| {
        if let Ok(tick) = result {
            print_tick(tick);
        }
    });
    tracing::info!(
        ticks = outcome.ticks,
        failed_ticks = outcome.failed_ticks,
        "loop finished"
    );
    Ok(exit_codes::OK)
}

fn cmd_tick(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let engine = build_engine(config)?;
    match engine.tick(Utc::now()) {
        Ok(tick) => {
            print_tick(&tick);
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("tick failed: {err:#}");
            Ok(exit_codes::TICK_FAILED)
        }
    }
}

/// Wire the live clients. Secrets are read once here so a missing credential
/// fails at startup instead of on the first remote call.
fn build_engine(config: MonitorConfig) -> Result<LiveEngine> {
    let pat = EnvSecret::new(&config.credentials.pat_env);
    pat.secret().context("personal access token")?;
    let client = AzureDevOpsClient::new(
        &config.organization,
        &config.project,
        pat,
        config.http_timeout(),
    )?;

    let store = match &config.storage {
        StorageConfig::Fs { dir } => ConfiguredStore::Fs(FsRecordStore::new(dir)),
        StorageConfig::Blob { account, container } => {
            let key = EnvSecret::new(&config.credentials.storage_key_env);
            key.secret().context("storage account key")?;
            ConfiguredStore::Blob(BlobRecordStore::new(
                account,
                container,
                key,
                config.http_timeout(),
            )?)
        }
    };

    Ok(Engine::new(config, client.clone(), client, store))
}

fn print_tick(tick: &TickOutcome) {
    println!(
        "{} {} {} -> {}",
        tick.date, tick.action, tick.previous, tick.state
    );
    for failure in &tick.target_failures {
        eprintln!(
            "release definition {} ({}): {}",
            failure.definition_id, failure.source_alias, failure.error
        );
    }
}
