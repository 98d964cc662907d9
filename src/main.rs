use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ghbackup::config::{BACKUP_FOLDER_ENV, INTERVAL_ENV, TOKEN_ENV};
use ghbackup::github::list_all_repositories;
use ghbackup::{run_once, BackupSettings, Config, Daemon, GitHubClient, HealthCheck, SyncEngine, SyncResult};

#[derive(Parser)]
#[command(name = "ghbackup")]
#[command(about = "Mirror every GitHub repository your token can access")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// GitHub token
    #[arg(long, env = TOKEN_ENV, hide_env_values = true, global = true)]
    token: Option<String>,

    /// Root directory for mirrors (default /ghbackup)
    #[arg(long, env = BACKUP_FOLDER_ENV, global = true)]
    backup_folder: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backup pass (default)
    Run,

    /// Back up now and then on a fixed interval until stopped
    Daemon {
        /// Interval between runs, e.g. 30m, 6h, 1d
        #[arg(long, env = INTERVAL_ENV)]
        interval: Option<String>,
    },

    /// List repositories that would be backed up
    List {
        /// Print JSON instead of one name per line
        #[arg(long)]
        json: bool,
    },

    /// System health check and diagnostics
    Doctor,

    /// Write a configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let is_init = matches!(cli.command, Some(Commands::Init { .. }));
    let mut config = load_config(cli.config.as_deref(), is_init)?;
    config.override_backup_folder(cli.backup_folder.as_deref())?;

    init_logging(cli.verbose, &config);
    info!("Starting ghbackup v{}", env!("CARGO_PKG_VERSION"));

    let token = cli.token.unwrap_or_default().trim().to_string();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&config, &token).await,
        Commands::Daemon { interval } => {
            config.override_interval(interval.as_deref());
            cmd_daemon(&config, &token).await
        }
        Commands::List { json } => cmd_list(json, &config, &token).await,
        Commands::Doctor => cmd_doctor(&config, &token).await,
        Commands::Init { force } => cmd_init(cli.config, force, &config),
    }
}

/// Initialize logging from config, with `--verbose` and `RUST_LOG` taking precedence
fn init_logging(verbose: bool, config: &Config) {
    let default_level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let format_layer = match config.logging.format.as_str() {
        "json" => fmt::layer().json().boxed(),
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(format_layer)
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location.
/// `init` may name a file that does not exist yet.
fn load_config(config_path: Option<&std::path::Path>, allow_missing: bool) -> Result<Config> {
    match config_path {
        Some(path) if allow_missing && !path.exists() => Ok(Config::default()),
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Run one backup pass
async fn cmd_run(config: &Config, token: &str) -> Result<()> {
    let engine = SyncEngine::from_config(config, token)?;
    info!("Backing up into {}", engine.settings().backup_root().display());

    if let Some(summary) = run_once(&engine, config.lock_path().as_deref()).await? {
        for result in &summary.results {
            if let SyncResult::Failed { repo, error, .. } = result {
                warn!("Not backed up this run: {}: {}", repo, error);
            }
        }
    }

    Ok(())
}

/// Run backups on a schedule
async fn cmd_daemon(config: &Config, token: &str) -> Result<()> {
    let interval = config
        .interval()
        .with_context(|| format!("Invalid backup interval: {}", config.daemon.interval))?;
    let engine = SyncEngine::from_config(config, token)?;

    Daemon::new(engine, interval, config.lock_path()).run().await
}

/// List repositories visible to the token
async fn cmd_list(json: bool, config: &Config, token: &str) -> Result<()> {
    let settings = BackupSettings::from_config(config, token);
    settings.require_token()?;
    let client = GitHubClient::new(token, config.github.api_url.as_deref())?;

    let repositories = list_all_repositories(&client, config.github.per_page.clamp(1, 100))
        .await
        .context("Failed to list repositories")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&repositories).context("Failed to serialize repositories")?
        );
        return Ok(());
    }

    println!("Repositories ({}):", repositories.len());
    for repo in &repositories {
        match settings.mirror_path(repo) {
            Some(path) => println!("  📁 {} -> {}", repo.full_name, path.display()),
            None => println!("  ⚠️  {} (unsupported name, skipped)", repo.full_name),
        }
    }

    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config, token: &str) -> Result<()> {
    let health = HealthCheck::run(config, Some(token)).await;

    println!("🔍 ghbackup System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
        println!();
    }

    if health.all_passed() {
        match health.warnings().len() {
            0 => println!("✅ All checks passed"),
            n => println!("✅ All checks passed with {} warning(s)", n),
        }
        Ok(())
    } else {
        anyhow::bail!("Some checks failed")
    }
}

/// Write the effective configuration to disk
fn cmd_init(config_path: Option<PathBuf>, force: bool, config: &Config) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        anyhow::bail!(
            "Configuration already exists at {:?}, use --force to overwrite",
            config_path
        );
    }

    config.save(&config_path)?;

    println!("✅ Configuration written to {:?}", config_path);
    println!("   Backup folder: {}", config.backup_root().display());
    println!("   Next: export {}=<token> and run 'ghbackup run'", TOKEN_ENV);

    Ok(())
}
