use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use launcher_core::{ApiError, LauncherConfig, ServerInfo, ServerRegistry};
use launcher_sync::progress::{format_bytes, ProgressChannel, ProgressEvent};
use launcher_sync::{plan_blocking, DiffPlanner, DownloadScheduler, SyncSession};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod logging;

#[derive(Parser)]
#[command(name = "launcher")]
#[command(about = "Keep game clients in sync with their launcher servers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered servers
    Servers {
        #[command(subcommand)]
        action: ServerActions,
    },
    /// Show which client files would be downloaded
    Plan {
        /// Server name
        server: String,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Verify the client files of a server and download what is missing or damaged
    Verify {
        /// Server name
        server: String,

        /// Download one file at a time
        #[arg(long)]
        sequential: bool,

        /// Parallel downloads (clamped to 2..=10)
        #[arg(long, conflicts_with = "sequential")]
        threads: Option<usize>,
    },
    /// Verify the client files, then log in to the server
    Login {
        /// Server name
        server: String,

        /// Account name, prompted for when omitted
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ServerActions {
    /// Register a server by URL
    Add {
        url: String,
    },
    /// List registered servers
    List {
        #[arg(long)]
        json: bool,
    },
    /// Forget a server
    Remove {
        name: String,

        /// Also delete the server's client files
        #[arg(long)]
        delete_files: bool,
    },
    /// Re-read a server's manifest
    Refresh {
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Generate default configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show current configuration
    Show,
    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => LauncherConfig::default_path()?,
    };

    // Generating must work even when the existing file is broken
    if let Commands::Config {
        action: ConfigActions::Generate { output, force },
    } = &cli.command
    {
        let _log_guard = logging::init_logging(cli.log_level.as_deref().unwrap_or("info"), None)?;
        generate_config(output.as_deref().unwrap_or(&config_path), *force).await?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = LauncherConfig::load_or_default(&config_path).await?;

    let level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let _log_guard = logging::init_logging(&level, config.logging.file.as_deref())?;

    // Exit codes are returned rather than exited with so the log guard
    // flushes the file writer
    match cli.command {
        Commands::Servers { action } => {
            run_server_action(action, config, &config_path).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan { server, json } => {
            show_plan(&config, &server, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify {
            server,
            sequential,
            threads,
        } => Ok(verify(&config, &server, sequential, threads).await?.exit_code()),
        Commands::Login { server, username } => login(&config, &server, username).await,
        Commands::Config { action } => match action {
            ConfigActions::Generate { .. } => Ok(ExitCode::SUCCESS),
            ConfigActions::Show => {
                show_config(&config, &config_path)?;
                Ok(ExitCode::SUCCESS)
            }
            ConfigActions::Validate => {
                if validate_config(&config, &config_path) {
                    Ok(ExitCode::SUCCESS)
                } else {
                    Ok(ExitCode::from(1))
                }
            }
        },
    }
}

fn registry(config: &LauncherConfig) -> Result<ServerRegistry> {
    Ok(ServerRegistry::with_http_client(
        config.data_dir()?,
        config.servers.clone(),
        config.download.manifest_http_client()?,
    ))
}

fn find_server<'a>(config: &'a LauncherConfig, name: &str) -> Result<&'a ServerInfo> {
    config
        .servers
        .iter()
        .find(|server| server.name.eq_ignore_ascii_case(name.trim()))
        .with_context(|| format!("No server named '{}'. Use `launcher servers list` to see registered servers.", name))
}

async fn run_server_action(action: ServerActions, mut config: LauncherConfig, config_path: &Path) -> Result<()> {
    let mut registry = registry(&config)?;

    match action {
        ServerActions::Add { url } => {
            let server = registry.add(&url).await?;
            println!("✅ Added server '{}'", server.name);
            println!("   Files: {}", server.client_root().display());
        }
        ServerActions::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(registry.servers())?);
            } else if registry.servers().is_empty() {
                println!("No servers registered. Add one with `launcher servers add <url>`.");
            } else {
                for server in registry.servers() {
                    println!("{}", server.name);
                    println!("   URL:   {}", server.url);
                    if !server.description.is_empty() {
                        println!("   About: {}", server.description);
                    }
                    println!("   Files: {}", server.client_root().display());
                }
            }
            return Ok(());
        }
        ServerActions::Remove { name, delete_files } => {
            let server = registry.remove(&name, delete_files).await?;
            if delete_files {
                println!("🗑️  Removed server '{}' and deleted {}", server.name, server.save_path.display());
            } else {
                println!("🗑️  Removed server '{}', files kept in {}", server.name, server.save_path.display());
            }
        }
        ServerActions::Refresh { name } => {
            let server = registry.refresh(&name).await?;
            println!("✅ Refreshed server '{}'", server.name);
        }
    }

    config.servers = registry.into_servers();
    config.save(config_path).await?;
    info!(path = %config_path.display(), "Configuration saved");
    Ok(())
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    server: &'a str,
    local_root: PathBuf,
    #[serde(flatten)]
    plan: launcher_sync::DownloadPlan,
}

async fn show_plan(config: &LauncherConfig, name: &str, json: bool) -> Result<()> {
    let server = find_server(config, name)?;
    let registry = registry(config)?;
    let manifest = registry.client(server)?.client_manifest().await?.into_manifest()?;
    let local_root = server.client_root();

    if json {
        let plan = plan_blocking(Arc::new(manifest), local_root.clone(), CancellationToken::new()).await?;
        let output = PlanOutput {
            server: &server.name,
            local_root,
            plan,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Checking {} files in {}", manifest.file_count(), local_root.display());

    // Print tasks as the planner finds them
    let (count, bytes) = tokio::task::spawn_blocking(move || {
        let planner = DiffPlanner::new();
        let mut count = 0usize;
        let mut bytes = 0u64;
        for task in planner.tasks(&manifest, &local_root) {
            println!("  {} ({})", task.display_path(), format_bytes(task.size));
            count += 1;
            bytes += task.size;
        }
        (count, bytes)
    })
    .await?;

    if count == 0 {
        println!("✅ All client files are up to date");
    } else {
        println!("{} file(s) to download, {}", count, format_bytes(bytes));
    }
    Ok(())
}

/// How a verify run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerifyOutcome {
    Complete,
    Failed,
    Cancelled,
}

impl VerifyOutcome {
    fn code(self) -> u8 {
        match self {
            VerifyOutcome::Complete => 0,
            VerifyOutcome::Failed => 1,
            VerifyOutcome::Cancelled => 130,
        }
    }

    fn exit_code(self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

async fn verify(
    config: &LauncherConfig,
    name: &str,
    sequential: bool,
    threads: Option<usize>,
) -> Result<VerifyOutcome> {
    let server = find_server(config, name)?;
    let registry = registry(config)?;

    let mut download = config.download.download_config(server)?;
    if sequential {
        download.parallel = false;
    }
    if let Some(threads) = threads {
        download = download.with_parallelism(threads);
    }
    info!(
        server = %server.name,
        workers = download.effective_parallelism(),
        "Verifying client files"
    );

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling downloads");
            on_ctrl_c.cancel();
        }
    });

    let (reporter, channel) = ProgressChannel::new();
    let scheduler = DownloadScheduler::new(Arc::new(config.download.transport()?), download).with_reporter(reporter);
    let session = SyncSession::new(Arc::new(registry.client(server)?), scheduler);
    let printer = tokio::spawn(print_progress(channel));

    let report = session.run(&cancel).await;
    // Closes the progress channel
    drop(session);
    printer.await.ok();
    let report = report?;

    if report.result.cancelled {
        println!("⏹️  Verification cancelled");
        return Ok(VerifyOutcome::Cancelled);
    }

    match &report.failures {
        None if !report.result.success => {
            println!(
                "❌ Only {} of {} file(s) were downloaded",
                report.result.files_completed, report.result.files_planned
            );
            Ok(VerifyOutcome::Failed)
        }
        None => {
            if report.result.files_planned == 0 {
                println!("✅ All {} client files are up to date", report.plan.files_checked);
            } else {
                println!(
                    "✅ Downloaded {} file(s), {} in {:.1}s",
                    report.result.files_completed,
                    format_bytes(report.result.bytes_downloaded),
                    report.result.duration.as_secs_f64()
                );
            }
            Ok(VerifyOutcome::Complete)
        }
        Some(failures) => {
            println!("❌ {}", failures);
            Ok(VerifyOutcome::Failed)
        }
    }
}

/// Login is only offered once the client files are complete
async fn login(config: &LauncherConfig, name: &str, username: Option<String>) -> Result<ExitCode> {
    let outcome = verify(config, name, false, None).await?;
    if outcome != VerifyOutcome::Complete {
        println!("❌ Client files are incomplete, not logging in");
        return Ok(outcome.exit_code());
    }

    let server = find_server(config, name)?;
    if server.login_api_url.trim().is_empty() {
        bail!("Server '{}' does not publish a login API", server.name);
    }

    let username = match username {
        Some(username) => username,
        None => prompt_line("Username: ")?,
    };
    let username = username.trim();
    if username.is_empty() {
        bail!("A username is required");
    }
    let password = rpassword::prompt_password("Password: ")?;

    let client = registry(config)?.client(server)?;
    match client.login(&server.login_api_url, username, &password).await {
        Ok(session) => {
            println!("✅ Logged in to '{}'", server.name);
            println!("   Client:    {}", server.client_root().display());
            println!("   Arguments: {}", session.client_arguments(&server.login_server).join(" "));
            Ok(ExitCode::SUCCESS)
        }
        Err(ApiError::Unauthorized) => {
            println!("❌ Invalid username or password");
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to login")),
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn print_progress(mut channel: ProgressChannel) {
    let mut stderr = std::io::stderr();

    while let Some(event) = channel.recv().await {
        match event {
            ProgressEvent::SyncStarted {
                total_files,
                total_bytes,
                ..
            } => {
                eprintln!("Downloading {} file(s), {}", total_files, format_bytes(total_bytes));
            }
            ProgressEvent::ProgressUpdate {
                files_completed,
                files_total,
                bytes_downloaded,
                transfer_rate,
                ..
            } => {
                let percent = if files_total == 0 {
                    100.0
                } else {
                    files_completed as f64 * 100.0 / files_total as f64
                };
                eprint!(
                    "\r[{}/{}] {:5.1}%  {}  {}/s   ",
                    files_completed,
                    files_total,
                    percent,
                    format_bytes(bytes_downloaded),
                    format_bytes(transfer_rate as u64)
                );
                stderr.flush().ok();
            }
            ProgressEvent::SyncCompleted { .. } | ProgressEvent::SyncCancelled { .. } => {
                eprintln!();
            }
            _ => {}
        }
    }
}

async fn generate_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists, pass --force to overwrite it", output.display());
    }

    let config = LauncherConfig::default();
    config.save(output).await?;

    println!("✅ Generated default configuration at: {}", output.display());
    Ok(())
}

fn show_config(config: &LauncherConfig, config_path: &Path) -> Result<()> {
    println!("# {}", config_path.display());
    println!("{}", config.to_toml()?);
    Ok(())
}

fn validate_config(config: &LauncherConfig, config_path: &Path) -> bool {
    match config.validate() {
        Ok(()) => {
            println!("✅ Configuration is valid: {}", config_path.display());
            true
        }
        Err(e) => {
            println!("❌ Configuration is invalid: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_verify() {
        let cli = Cli::parse_from(["launcher", "--log-level", "debug", "verify", "Test Server", "--threads", "6"]);

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Verify {
                server,
                sequential,
                threads,
            } => {
                assert_eq!(server, "Test Server");
                assert!(!sequential);
                assert_eq!(threads, Some(6));
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn test_sequential_conflicts_with_threads() {
        let result = Cli::try_parse_from(["launcher", "verify", "Test", "--sequential", "--threads", "4"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_login() {
        let cli = Cli::parse_from(["launcher", "login", "Test Server", "-u", "player"]);

        match cli.command {
            Commands::Login { server, username } => {
                assert_eq!(server, "Test Server");
                assert_eq!(username.as_deref(), Some("player"));
            }
            _ => panic!("expected login"),
        }
    }

    #[test]
    fn test_verify_outcome_exit_codes() {
        assert_eq!(VerifyOutcome::Complete.code(), 0);
        assert_eq!(VerifyOutcome::Failed.code(), 1);
        assert_eq!(VerifyOutcome::Cancelled.code(), 130);
    }

    #[test]
    fn test_invalid_config_fails_without_exiting() {
        let mut config = LauncherConfig::default();
        config.download.threads = 0;

        assert!(!validate_config(&config, Path::new("launcher.toml")));
    }

    #[test]
    fn test_find_server_ignores_case() {
        let mut config = LauncherConfig::default();
        config.servers.push(ServerInfo {
            url: "http://localhost:8080".to_string(),
            name: "Test Server".to_string(),
            description: String::new(),
            login_server: String::new(),
            login_api_url: String::new(),
            save_path: PathBuf::from("/tmp/Test Server"),
        });

        assert!(find_server(&config, "test server").is_ok());
        assert!(find_server(&config, "other").is_err());
    }
}
