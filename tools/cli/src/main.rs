//! Airweave CLI - run connector syncs and manage their cursors.
//!
//! Entities are written to stdout as JSON lines; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use airweave_common::ConnectionId;
use airweave_sources::{create_default_registry, SourceContext};
use airweave_storage::{CursorKey, CursorStorage};
use airweave_sync::{
    CursorStore, FetchClient, OAuthConfig, OAuthTokenManager, StaticTokenProvider, SyncConfig, SyncJob,
    TokenProvider,
};

#[derive(Parser)]
#[command(name = "airweave")]
#[command(about = "Airweave - Incremental connector sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync and print entities as JSON lines.
    Sync {
        /// Connector short name, e.g. "asana".
        #[arg(short, long)]
        source: String,

        /// Connection identifier; one cursor is kept per connection.
        #[arg(short, long)]
        connection: String,

        /// Sync configuration file (JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Connector settings as a JSON object, e.g. '{"base_url": "..."}'.
        #[arg(long)]
        settings: Option<String>,

        /// Directory holding cursor files.
        #[arg(long)]
        cursor_dir: Option<PathBuf>,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Check the credentials with one cheap request.
    Validate {
        /// Connector short name.
        #[arg(short, long)]
        source: String,

        /// Connector settings as a JSON object.
        #[arg(long)]
        settings: Option<String>,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Inspect or reset stored cursors.
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// List registered connectors.
    Sources,

    /// Print shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CursorAction {
    /// Print the stored cursor.
    Show {
        #[arg(short, long)]
        source: String,

        #[arg(short, long)]
        connection: String,

        #[arg(long)]
        cursor_dir: Option<PathBuf>,
    },

    /// Delete the stored cursor; the next sync runs in full.
    Reset {
        #[arg(short, long)]
        source: String,

        #[arg(short, long)]
        connection: String,

        #[arg(long)]
        cursor_dir: Option<PathBuf>,
    },

    /// List stored cursors.
    List {
        #[arg(long)]
        cursor_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct AuthArgs {
    /// Bearer token used as is.
    #[arg(long, env = "AIRWEAVE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// OAuth refresh token; takes precedence over --access-token.
    #[arg(long, env = "AIRWEAVE_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// OAuth client ID.
    #[arg(long, env = "AIRWEAVE_CLIENT_ID")]
    client_id: Option<String>,

    /// OAuth client secret.
    #[arg(long, env = "AIRWEAVE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// OAuth token endpoint.
    #[arg(long, env = "AIRWEAVE_TOKEN_URL")]
    token_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Sync {
            source,
            connection,
            config,
            settings,
            cursor_dir,
            auth,
        } => cmd_sync(&source, &connection, config, settings.as_deref(), cursor_dir, &auth).await,
        Commands::Validate { source, settings, auth } => cmd_validate(&source, settings.as_deref(), &auth).await,
        Commands::Cursor { action } => match action {
            CursorAction::Show {
                source,
                connection,
                cursor_dir,
            } => cmd_cursor_show(&source, &connection, cursor_dir).await,
            CursorAction::Reset {
                source,
                connection,
                cursor_dir,
            } => cmd_cursor_reset(&source, &connection, cursor_dir).await,
            CursorAction::List { cursor_dir } => cmd_cursor_list(cursor_dir).await,
        },
        Commands::Sources => {
            for name in create_default_registry().sources() {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "airweave", &mut std::io::stdout());
            Ok(())
        }
    }
}

async fn cmd_sync(
    source: &str,
    connection: &str,
    config_path: Option<PathBuf>,
    settings: Option<&str>,
    cursor_dir: Option<PathBuf>,
    auth: &AuthArgs,
) -> Result<()> {
    let config = match config_path {
        Some(path) => SyncConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => SyncConfig::default(),
    };
    config.validate().context("Invalid sync configuration")?;

    let storage = open_storage(cursor_dir)?;
    let key = cursor_key(source, connection)?;
    let cursor = CursorStore::load(storage, key.clone(), None)
        .await
        .context("Failed to load cursor")?;

    let fetcher = FetchClient::new(token_provider(auth)?, &config).context("Failed to build HTTP client")?;
    let ctx = SourceContext::new(Arc::new(fetcher), cursor.clone(), config).with_settings(parse_settings(settings)?);
    let connector = create_default_registry()
        .create(source, ctx)
        .context("Failed to create connector")?;

    info!("Syncing {}", key);
    let entities = connector.generate_entities().context("Failed to start sync")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let job = SyncJob::new(cursor);
    let stats = job
        .run(entities, |entity| {
            serde_json::to_writer(&mut out, &entity)
                .map_err(|e| airweave_common::Error::Serialization(e.to_string()))?;
            out.write_all(b"\n")?;
            Ok(())
        })
        .await
        .context("Sync failed")?;
    out.flush()?;

    info!(
        "Done: {} entities, {} deletions in {:.1}s",
        stats.entities,
        stats.deletions,
        stats.duration.as_secs_f64()
    );
    Ok(())
}

async fn cmd_validate(source: &str, settings: Option<&str>, auth: &AuthArgs) -> Result<()> {
    let config = SyncConfig::default();
    let fetcher = FetchClient::new(token_provider(auth)?, &config).context("Failed to build HTTP client")?;
    let ctx = SourceContext::detached(Arc::new(fetcher)).with_settings(parse_settings(settings)?);
    let connector = create_default_registry()
        .create(source, ctx)
        .context("Failed to create connector")?;

    connector.validate().await.context("Credentials rejected")?;
    println!("Credentials for '{}' are valid.", source);
    Ok(())
}

async fn cmd_cursor_show(source: &str, connection: &str, cursor_dir: Option<PathBuf>) -> Result<()> {
    let storage = open_storage(cursor_dir)?;
    let key = cursor_key(source, connection)?;

    match storage.load(&key).await.context("Failed to read cursor")? {
        Some(cursor) => println!("{}", serde_json::to_string_pretty(&cursor)?),
        None => println!("No cursor stored for {}; the next sync runs in full.", key),
    }
    Ok(())
}

async fn cmd_cursor_reset(source: &str, connection: &str, cursor_dir: Option<PathBuf>) -> Result<()> {
    let storage = open_storage(cursor_dir)?;
    let key = cursor_key(source, connection)?;

    match storage.delete(&key).await {
        Ok(()) => println!("Cursor for {} removed.", key),
        Err(airweave_common::Error::NotFound(_)) => warn!("No cursor stored for {}", key),
        Err(e) => return Err(e).context("Failed to delete cursor"),
    }
    Ok(())
}

async fn cmd_cursor_list(cursor_dir: Option<PathBuf>) -> Result<()> {
    let storage = open_storage(cursor_dir)?;
    let keys = storage.list().await.context("Failed to list cursors")?;

    if keys.is_empty() {
        println!("No cursors stored.");
    }
    for key in keys {
        println!("{}", key);
    }
    Ok(())
}

fn open_storage(cursor_dir: Option<PathBuf>) -> Result<Arc<dyn CursorStorage>> {
    let root = match cursor_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("No data directory on this platform; pass --cursor-dir")?
            .join("airweave")
            .join("cursors"),
    };

    airweave_storage::create_default_registry()
        .resolve("local", json!({ "root": root.to_string_lossy() }))
        .with_context(|| format!("Failed to open cursor store at {}", root.display()))
}

fn cursor_key(source: &str, connection: &str) -> Result<CursorKey> {
    let connection = ConnectionId::new(connection).context("Invalid connection ID")?;
    Ok(CursorKey::new(source, connection))
}

fn parse_settings(settings: Option<&str>) -> Result<Value> {
    match settings {
        Some(raw) => serde_json::from_str(raw).context("--settings must be a JSON object"),
        None => Ok(Value::Null),
    }
}

fn token_provider(auth: &AuthArgs) -> Result<Arc<dyn TokenProvider>> {
    if let Some(refresh_token) = &auth.refresh_token {
        let config = OAuthConfig {
            client_id: auth
                .client_id
                .clone()
                .context("--client-id is required with a refresh token")?,
            client_secret: auth.client_secret.clone(),
            token_url: auth
                .token_url
                .clone()
                .context("--token-url is required with a refresh token")?,
        };
        return Ok(Arc::new(OAuthTokenManager::from_refresh_token(config, refresh_token.clone())));
    }

    let token = auth
        .access_token
        .clone()
        .context("Provide --access-token or --refresh-token")?;
    Ok(Arc::new(StaticTokenProvider::new(token)))
}
