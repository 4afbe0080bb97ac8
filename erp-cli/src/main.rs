//! ERP Session CLI - drive the session manager from a terminal
//!
//! Tokens persist in a file between invocations, so `login` followed by
//! `whoami` or `can` behaves like a long-lived client session.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use erp_client::{ApiClientConfig, FileTokenStore, HttpApiClient};
use erp_core::{init_logging, AppConfig, LoginCredentials, RegisterData, SessionStatus};
use erp_session::{SessionManager, SessionOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "erp-session")]
#[command(about = "Authenticate against the ERP backend and inspect the session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        email: String,

        /// Password; read from stdin when omitted
        #[arg(short, long, env = "ERP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account and log in
    Register {
        email: String,

        username: String,

        #[arg(long)]
        first_name: Option<String>,

        #[arg(long)]
        last_name: Option<String>,

        /// Password; read from stdin when omitted
        #[arg(short, long, env = "ERP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// End the session locally and on the server
    Logout,

    /// Show the current user
    Whoami {
        /// Print the whole session snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rotate the token pair now
    Refresh,

    /// Check whether the current user may perform an action
    Can {
        module: String,
        action: String,
    },

    /// Keep the session alive, renewing tokens until interrupted
    Watch,

    /// Manage configuration
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,

        /// Show the effective configuration
        #[arg(long)]
        show: bool,

        /// Validate the effective configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    config.apply_env_overrides();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting ERP session CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config {
            init,
            force,
            show,
            validate,
        } => handle_config(&config, cli.config.as_deref(), init, force, show, validate),
        command => run_session_command(command, &config).await,
    }
}

async fn run_session_command(command: Commands, config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    let session = build_session(config)?;
    let status = session.initialize().await;
    info!(status = %status, "Session restored");

    match command {
        Commands::Login { email, password } => {
            let password = resolve_password(password).await?;
            let user = session
                .login(&LoginCredentials::new(email, password))
                .await?;
            println!("Logged in as {} <{}>", user.display_name(), user.email);
        }
        Commands::Register {
            email,
            username,
            first_name,
            last_name,
            password,
        } => {
            let password = resolve_password(password).await?;
            let data = RegisterData {
                email,
                username,
                password_confirm: password.clone(),
                password,
                first_name,
                last_name,
            };
            let user = session.register(&data).await?;
            println!("Registered and logged in as {} <{}>", user.display_name(), user.email);
        }
        Commands::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        Commands::Whoami { json } => handle_whoami(&session, json)?,
        Commands::Refresh => {
            let user = session.refresh_access_token().await?;
            let expires_at = session.expires_at_ms().unwrap_or_default();
            println!("Token renewed for {} (expires at {} ms)", user.display_name(), expires_at);
        }
        Commands::Can { module, action } => {
            let allowed = session.check_permission(&module, &action).await;
            report_permission(&module, &action, allowed)?;
        }
        Commands::Watch => handle_watch(&session).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn load_config(config_path: Option<&Path>) -> anyhow::Result<AppConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from {:?}", path);
        return Ok(AppConfig::from_file(path)?);
    }

    let default_paths = [
        AppConfig::default_path(),
        dirs::home_dir().map(|d| d.join(".erp-session").join("config.toml")),
        Some(PathBuf::from("erp-session.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            info!("Loading configuration from {:?}", path);
            return Ok(AppConfig::from_file(path)?);
        }
    }

    Ok(AppConfig::default())
}

fn build_session(config: &AppConfig) -> anyhow::Result<SessionManager> {
    let api = HttpApiClient::new(ApiClientConfig::from(&config.api))?;

    let store_path = config
        .session
        .resolved_token_store_path()
        .context("No token store path configured and no config directory available")?;
    info!(path = %store_path.display(), "Using token store");

    // A terminal has no routes; log where a UI would go
    let navigator = Arc::new(|route: &str| info!(route = route, "Navigation requested"));

    Ok(SessionManager::builder(Arc::new(api))
        .with_store(Arc::new(FileTokenStore::new(store_path)))
        .with_navigator(navigator)
        .with_options(SessionOptions::from(&config.session))
        .build())
}

async fn resolve_password(password: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    print!("Password: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read password from stdin")?;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

/// Print the verdict; a denial becomes an error so the exit code is non-zero
fn report_permission(module: &str, action: &str, allowed: bool) -> anyhow::Result<()> {
    if !allowed {
        bail!("{}:{} denied", module, action);
    }
    println!("{}:{} allowed", module, action);
    Ok(())
}

fn handle_whoami(session: &SessionManager, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
        return Ok(());
    }

    match session.current_user() {
        Some(user) => {
            println!("{} <{}>", user.display_name(), user.email);
            println!("  id:     {}", user.id);
            if !user.roles.is_empty() {
                println!("  roles:  {}", user.roles.join(", "));
            }
            if let Some(expires_at) = session.expires_at_ms() {
                println!("  expiry: {} ms", expires_at);
            }
        }
        None => println!("Not logged in"),
    }
    Ok(())
}

async fn handle_watch(session: &SessionManager) -> anyhow::Result<()> {
    if !session.is_authenticated() {
        bail!("Not logged in");
    }

    let mut status_rx = session.subscribe();
    println!(
        "Keeping session alive (checking every {:?}), press Ctrl-C to stop",
        session.options().renewal_check_interval
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                println!("Session status: {}", status);
                if status == SessionStatus::Anonymous {
                    warn!("Session ended while watching");
                    break;
                }
            }
        }
    }
    Ok(())
}

fn handle_config(
    config: &AppConfig,
    config_path: Option<&Path>,
    init: bool,
    force: bool,
    show: bool,
    validate: bool,
) -> anyhow::Result<()> {
    if init {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => AppConfig::default_path().context("No config directory available")?,
        };
        if path.exists() && !force {
            bail!("{} already exists, use --force to overwrite", path.display());
        }
        AppConfig::default().save_to_file(&path)?;
        println!("Configuration initialized at: {}", path.display());
    }

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    if validate {
        config.validate()?;
        println!("Configuration is valid");
    }

    Ok(())
}
