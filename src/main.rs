// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;

use filelink::config::{self, to_file_uri, to_local_path, ClientConfig};
use filelink::server::{FileServer, DEFAULT_PORT};
use filelink::transfer::{StartOutcome, TransferManager};
use filelink::types::{SessionEvent, TransferDirection, TransferSnapshot, TransferState};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes reported to calling scripts
mod exit_codes {
    /// Transfer finished
    pub const SUCCESS: i32 = 0;
    /// Transfer failed or was aborted
    pub const ERROR: i32 = 1;
    /// Invalid or incomplete configuration
    pub const CONFIG: i32 = 2;
}

use exit_codes::*;

/// filelink - move a single file to or from an HTTP file service.
#[derive(Parser)]
#[command(name = "filelink")]
#[command(version = VERSION)]
#[command(about = "Move a single file to or from an HTTP file service.")]
#[command(long_about = "filelink - single-file HTTP transfers\n\n\
    Upload a file:       filelink upload report.pdf --service http://host:8080 --remote-base /srv/files\n\
    Download a file:     filelink download sub/report.pdf --output .\n\
    Serve a directory:   filelink serve ./files --port 8080\n\
    Show settings:       filelink config show\n\n\
    Press Ctrl+C during a transfer to abort it.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: errors only, no progress bar
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file into the remote base directory
    ///
    /// Examples:
    ///   filelink upload notes.txt
    ///   filelink upload notes.txt --service http://host:8080 --remote-base /srv/files
    Upload {
        /// Local file to send
        file: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Download a remote file
    ///
    /// The remote path is absolute (or a file:// URI) under the remote base,
    /// or relative to it.
    ///
    /// Examples:
    ///   filelink download sub/notes.txt
    ///   filelink download /srv/files/notes.txt --output ~/Downloads
    Download {
        /// Remote file to fetch
        remote_path: String,
        #[command(flatten)]
        target: TargetArgs,
        /// Directory to place the file in (defaults to the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Serve a directory as a file service
    Serve {
        /// Directory to expose
        dir: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Address to bind to (use 0.0.0.0 for network access)
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

/// Service location, overriding the configuration file.
#[derive(clap::Args)]
struct TargetArgs {
    /// Base URI of the file service
    #[arg(long)]
    service: Option<String>,
    /// Remote directory the service exposes
    #[arg(long)]
    remote_base: Option<String>,
}

impl TargetArgs {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(service) = &self.service {
            config.service_uri = Some(service.clone());
        }
        if let Some(base) = &self.remote_base {
            config.remote_base_path = Some(base.clone());
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_error(message: impl std::fmt::Display) {
    eprintln!("{} {}", "[X]".red(), message);
}

/// Check that the session can start, reporting what is missing.
fn check_target(config: &ClientConfig) -> std::result::Result<(), String> {
    match config.service_uri.as_deref() {
        Some(uri) if uri.starts_with("http://") || uri.starts_with("https://") => {}
        Some(uri) => return Err(format!("Service URI must be http(s): {}", uri)),
        None => return Err("No service URI configured (use --service)".to_string()),
    }
    match config.remote_base_path.as_deref().and_then(to_local_path) {
        Some(_) => Ok(()),
        None => Err("No remote base path configured (use --remote-base)".to_string()),
    }
}

/// Resolve a remote path given on the command line against the remote base.
fn resolve_remote_path(base: &Path, requested: &str) -> String {
    if requested.starts_with("file://") || Path::new(requested).is_absolute() {
        return requested.to_string();
    }
    to_file_uri(&base.join(requested))
}

fn progress_bar(quiet: bool, label: &str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
    pb.set_style(style);
    pb.set_message(label.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Start a transfer and follow it until the session is idle again.
///
/// Returns the final snapshot and whether the user aborted.
async fn follow_transfer(
    manager: &TransferManager,
    direction: TransferDirection,
    quiet: bool,
    label: &str,
) -> Result<Option<(TransferSnapshot, bool)>> {
    let events = manager.events();
    tokio::pin!(events);

    let outcome = match direction {
        TransferDirection::Upload => manager.start_upload().await?,
        TransferDirection::Download => manager.start_download().await?,
    };
    match outcome {
        StartOutcome::Started => {}
        StartOutcome::Failed => return Ok(Some((manager.snapshot(), false))),
        StartOutcome::Rejected => return Ok(None),
    }

    let pb = progress_bar(quiet, label);
    let idle = manager.wait_idle();
    tokio::pin!(idle);
    let mut aborted = false;
    let mut interrupts = 0u32;
    let mut listen_for_signal = true;

    let snapshot = loop {
        tokio::select! {
            snapshot = &mut idle => break snapshot,
            Some(event) = events.next() => {
                if let SessionEvent::ProgressChanged { progress } = event {
                    pb.set_position((progress * 100.0).round() as u64);
                }
            }
            signal = tokio::signal::ctrl_c(), if listen_for_signal => match signal {
                Ok(()) => {
                    interrupts += 1;
                    match on_interrupt(interrupts) {
                        Interrupt::Abort => {
                            aborted = manager.abort().await?;
                            pb.set_message("Aborting... (Ctrl+C again to quit)");
                        }
                        Interrupt::ForceExit => {
                            pb.finish_and_clear();
                            eprintln!("{} Interrupted before the transfer wound down", "[!]".yellow());
                            std::process::exit(ERROR);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                    listen_for_signal = false;
                }
            },
        }
    };

    pb.finish_and_clear();
    Ok(Some((snapshot, aborted)))
}

/// What a Ctrl+C press does while a transfer is being followed.
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Request cancellation and wait for the session to settle
    Abort,
    /// The abort is taking too long; leave immediately
    ForceExit,
}

fn on_interrupt(presses: u32) -> Interrupt {
    if presses <= 1 {
        Interrupt::Abort
    } else {
        Interrupt::ForceExit
    }
}

/// Print the outcome of a transfer and map it to an exit code.
fn report(snapshot: &TransferSnapshot, aborted: bool, done: &str) -> i32 {
    if aborted {
        eprintln!("{} Transfer aborted", "[!]".yellow());
        ERROR
    } else if snapshot.state == TransferState::Error || !snapshot.error.is_none() {
        print_error(format!("{}: {}", snapshot.error, snapshot.error_message));
        ERROR
    } else {
        println!("{} {}", "[OK]".green(), done);
        SUCCESS
    }
}

async fn handle_upload(file: PathBuf, config: ClientConfig, quiet: bool) -> Result<i32> {
    if let Err(message) = check_target(&config) {
        print_error(message);
        return Ok(CONFIG);
    }
    let local = std::path::absolute(&file)
        .with_context(|| format!("Invalid path {}", file.display()))?;

    let manager = TransferManager::start(&config)?;
    manager.set_local_file_path(to_file_uri(&local)).await?;

    let label = local
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let code = match follow_transfer(&manager, TransferDirection::Upload, quiet, &label).await? {
        Some((snapshot, aborted)) => {
            let done = format!("Uploaded {}", snapshot.remote_file_path);
            report(&snapshot, aborted, &done)
        }
        None => {
            print_error("Upload could not be started");
            ERROR
        }
    };

    manager.shutdown().await?;
    Ok(code)
}

async fn handle_download(
    remote_path: String,
    output: Option<PathBuf>,
    config: ClientConfig,
    quiet: bool,
) -> Result<i32> {
    if let Err(message) = check_target(&config) {
        print_error(message);
        return Ok(CONFIG);
    }
    let Some(base) = config.remote_base_path.as_deref().and_then(to_local_path) else {
        return Ok(CONFIG);
    };
    let output = match output {
        Some(dir) => dir,
        None => std::env::current_dir().context("Could not determine current directory")?,
    };

    let manager = TransferManager::start(&config)?;
    manager
        .set_remote_file_path(resolve_remote_path(&base, &remote_path))
        .await?;

    let code = match follow_transfer(&manager, TransferDirection::Download, quiet, &remote_path)
        .await?
    {
        Some((snapshot, aborted)) => {
            let code = report(&snapshot, aborted, "Download complete");
            if code == SUCCESS {
                // The staging area goes away with the session
                let saved = keep_download(&snapshot, &output).await?;
                println!("     Saved to {}", saved.display());
            }
            code
        }
        None => {
            print_error("Download could not be started");
            ERROR
        }
    };

    manager.shutdown().await?;
    Ok(code)
}

/// Copy the staged download into `output`.
async fn keep_download(snapshot: &TransferSnapshot, output: &Path) -> Result<PathBuf> {
    let staged = to_local_path(&snapshot.local_file_path)
        .context("Download finished without a local file")?;
    let name = staged
        .file_name()
        .context("Download finished without a file name")?;

    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let target = output.join(name);
    tokio::fs::copy(&staged, &target)
        .await
        .with_context(|| format!("Failed to copy download to {}", target.display()))?;
    Ok(target)
}

fn show_config() -> Result<i32> {
    let config = match config::load_config() {
        Ok(config) => config,
        Err(e) => {
            print_error(format!("{:#}", e));
            return Ok(CONFIG);
        }
    };

    println!("{}", "filelink configuration".bold());
    println!("  File:            {}", config::config_path()?.display());
    println!(
        "  Service URI:     {}",
        config.service_uri.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  Remote base:     {}",
        config.remote_base_path.as_deref().unwrap_or("(not set)")
    );
    println!("  Connect timeout: {}s", config.connect_timeout_secs);
    match config.request_timeout_secs {
        0 => println!("  Request timeout: none"),
        secs => println!("  Request timeout: {}s", secs),
    }
    println!("  Staging prefix:  {}", config.staging_prefix);
    Ok(SUCCESS)
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Upload { file, target } => {
            let mut config = match config::load_config() {
                Ok(config) => config,
                Err(e) => {
                    print_error(format!("{:#}", e));
                    return Ok(CONFIG);
                }
            };
            target.apply(&mut config);
            handle_upload(file, config, cli.quiet).await
        }
        Commands::Download {
            remote_path,
            target,
            output,
        } => {
            let mut config = match config::load_config() {
                Ok(config) => config,
                Err(e) => {
                    print_error(format!("{:#}", e));
                    return Ok(CONFIG);
                }
            };
            target.apply(&mut config);
            handle_download(remote_path, output, config, cli.quiet).await
        }
        Commands::Serve { dir, port, bind } => {
            if !cli.quiet {
                println!(
                    "{} Serving {} on http://{}:{}",
                    "[OK]".green(),
                    dir.display(),
                    bind,
                    port
                );
            }
            FileServer::new(dir)
                .with_port(port)
                .with_bind_address(bind)
                .start()
                .await?;
            Ok(SUCCESS)
        }
        Commands::Config {
            command: ConfigCommands::Show,
        } => show_config(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            print_error(format!("{:#}", e));
            ERROR
        }
    };
    drop(runtime);
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_upload() {
        let cli = Cli::try_parse_from([
            "filelink",
            "upload",
            "a.txt",
            "--service",
            "http://host:8080",
            "--remote-base",
            "/srv",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload { file, target } => {
                assert_eq!(file, PathBuf::from("a.txt"));
                assert_eq!(target.service.as_deref(), Some("http://host:8080"));
                assert_eq!(target.remote_base.as_deref(), Some("/srv"));
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["filelink", "serve", "/srv", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(!cli.quiet);
        match cli.command {
            Commands::Serve { port, bind, .. } => {
                assert_eq!(port, DEFAULT_PORT);
                assert_eq!(bind, "127.0.0.1");
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_check_target() {
        let mut config = ClientConfig::default();
        assert!(check_target(&config).is_err());

        config.service_uri = Some("ftp://host".to_string());
        config.remote_base_path = Some("/srv".to_string());
        assert!(check_target(&config).is_err());

        config.service_uri = Some("http://host".to_string());
        assert!(check_target(&config).is_ok());
    }

    #[test]
    fn test_second_interrupt_forces_exit() {
        assert_eq!(on_interrupt(1), Interrupt::Abort);
        assert_eq!(on_interrupt(2), Interrupt::ForceExit);
        assert_eq!(on_interrupt(5), Interrupt::ForceExit);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_remote_path() {
        let base = Path::new("/srv/files");
        assert_eq!(resolve_remote_path(base, "sub/a.txt"), "file:///srv/files/sub/a.txt");
        assert_eq!(resolve_remote_path(base, "/srv/files/a.txt"), "/srv/files/a.txt");
        assert_eq!(
            resolve_remote_path(base, "file:///srv/files/a.txt"),
            "file:///srv/files/a.txt"
        );
    }
}
