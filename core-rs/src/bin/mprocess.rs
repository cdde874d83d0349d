//! mprocess - command-line front end for the port pool and process supervisor

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mprocess::config::{write_config, ProcessConfig, Settings};
use mprocess::errors::MprocessError;
use mprocess::port::PortChecker;
use mprocess::process::{stop_pid, StopSignal};
use mprocess::{cleanup_process, is_alive, TcpPortChecker};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

#[derive(Parser)]
#[command(name = "mprocess")]
#[command(version)]
#[command(about = "Spawn server processes on pooled ports", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./mprocess.yaml when present)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a port can be bound on the local host
    Check {
        port: u16,
    },
    /// Lease a verified free port from the configured range and print it
    Acquire,
    /// Start a process and print its handle as JSON
    Start {
        #[command(flatten)]
        spawn: SpawnArgs,
    },
    /// Start a process, wait for Ctrl-C, then terminate it
    Run {
        #[command(flatten)]
        spawn: SpawnArgs,
        /// Remove the config file and the paths it references on exit
        #[arg(long)]
        cleanup: bool,
    },
    /// Terminate a process by pid
    Stop {
        pid: u32,
        /// Seconds to wait for the process to exit
        #[arg(long)]
        timeout: Option<u64>,
        /// Send SIGKILL if the process survives SIGTERM
        #[arg(long)]
        force: bool,
    },
    /// Report whether a pid is alive
    Alive {
        pid: u32,
    },
    /// Write an option file and print its path and options as JSON
    WriteConfig {
        /// Option as key=value (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
        /// Authentication key written to a keyFile
        #[arg(long)]
        auth_key: Option<String>,
        /// Add a logPath option inside the data directory
        #[arg(long)]
        log: bool,
    },
    /// Delete an option file and everything it references
    Cleanup {
        config: PathBuf,
    },
}

#[derive(clap::Args)]
struct SpawnArgs {
    /// Executable to launch
    executable: PathBuf,
    /// Option file passed as --config
    #[arg(long)]
    config: PathBuf,
    /// Port the process listens on (read from the option file, else leased)
    #[arg(long)]
    port: Option<u16>,
    /// Seconds to wait for the port to open; 0 or less returns immediately
    #[arg(long, allow_negative_numbers = true)]
    timeout: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load_or_default(cli.settings.as_deref())
        .context("Failed to load settings")?;

    match cli.command {
        Commands::Check { port } => {
            let checker = TcpPortChecker::new(settings.host());
            if checker.is_free(port) {
                println!("{} {} is free", "✓".green(), port);
            } else {
                println!("{} {} is in use", "✗".red(), port);
            }
        }

        Commands::Acquire => {
            let pool = settings.build_pool()?;
            let port = pool.acquire(true)?;
            println!("{}", port);
        }

        Commands::Start { spawn } => {
            let pool = Arc::new(settings.build_pool()?);
            let supervisor = settings.build_supervisor(pool);
            let handle = spawn_from_args(&supervisor, &settings, &spawn).await?;
            println!("{}", serde_json::to_string_pretty(&handle.info())?);
        }

        Commands::Run { spawn, cleanup } => {
            let pool = Arc::new(settings.build_pool()?);
            let supervisor = settings.build_supervisor(pool);
            let mut handle = spawn_from_args(&supervisor, &settings, &spawn).await?;

            println!(
                "{} pid {} on {} (output: {})",
                "✓ Running".green(),
                handle.pid(),
                handle.address(),
                handle.output_path().display()
            );

            let shutdown = Arc::new(AtomicBool::new(false));
            let shutdown_clone = shutdown.clone();
            ctrlc::set_handler(move || {
                eprintln!("Received SIGTERM/SIGINT, stopping process...");
                shutdown_clone.store(true, Ordering::SeqCst);
            })?;

            while !shutdown.load(Ordering::SeqCst) && is_alive(handle.pid()) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }

            let mut stopped = supervisor
                .terminate(&mut handle, settings.terminate_timeout())
                .await;
            if !stopped {
                stopped = supervisor.kill(&mut handle).await;
            }

            if cleanup {
                let config = ProcessConfig::load(&spawn.config)?;
                cleanup_process(&config)?;
            }

            if !stopped {
                return Err(MprocessError::TerminationIncomplete(handle.pid()).into());
            }
            println!("{} pid {}", "✓ Stopped".green(), handle.pid());
        }

        Commands::Stop { pid, timeout, force } => {
            let options = settings.supervisor_options();
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| settings.terminate_timeout());

            let mut stopped =
                stop_pid(pid, StopSignal::Terminate, timeout, options.terminate_poll_interval).await;
            if !stopped && force {
                stopped = stop_pid(
                    pid,
                    StopSignal::Kill,
                    options.startup_grace,
                    options.terminate_poll_interval,
                )
                .await;
            }

            if !stopped {
                return Err(MprocessError::TerminationIncomplete(pid).into());
            }
            println!("{} pid {}", "✓ Stopped".green(), pid);
        }

        Commands::Alive { pid } => {
            if is_alive(pid) {
                println!("{} pid {} is alive", "●".green(), pid);
            } else {
                println!("{} pid {} is not running", "○".red(), pid);
                std::process::exit(1);
            }
        }

        Commands::WriteConfig { set, auth_key, log } => {
            let params = parse_options(&set)?;
            let pool = settings.build_pool()?;
            let config = write_config(&params, auth_key.as_deref(), log, &pool)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Cleanup { config } => {
            let config = ProcessConfig::load(&config)
                .with_context(|| format!("Failed to read {}", config.display()))?;
            cleanup_process(&config)?;
            println!("{} Removed {}", "✓".green(), config.path.display());
        }
    }

    Ok(())
}

async fn spawn_from_args(
    supervisor: &mprocess::ProcessSupervisor,
    settings: &Settings,
    args: &SpawnArgs,
) -> anyhow::Result<mprocess::ProcessHandle> {
    // An explicit --port wins; otherwise use the port the option file names
    let port = match args.port {
        Some(port) => Some(port),
        None if args.config.exists() => ProcessConfig::load(&args.config)?.port(),
        None => None,
    };

    let timeout = match args.timeout {
        Some(secs) if secs <= 0 => Duration::ZERO,
        Some(secs) => Duration::from_secs(secs as u64),
        None => settings.startup_timeout(),
    };

    let handle = supervisor
        .spawn(&args.executable, &args.config, port, timeout)
        .await?;
    Ok(handle)
}

/// Parse repeated `key=value` arguments; values that parse as JSON scalars
/// (numbers, booleans) keep their type
fn parse_options(pairs: &[String]) -> anyhow::Result<BTreeMap<String, Value>> {
    let mut options = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Expected KEY=VALUE, got '{}'", pair);
        };
        let value = match serde_json::from_str::<Value>(value) {
            Ok(parsed @ (Value::Bool(_) | Value::Number(_))) => parsed,
            _ => Value::String(value.to_string()),
        };
        options.insert(key.trim().to_string(), value);
    }
    Ok(options)
}
