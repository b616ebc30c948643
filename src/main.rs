//! Dropcache Gateway - cached HTTP access to Dropbox files
//!
//! Keeps a Dropbox access token fresh and serves file content from a
//! revision-checked in-memory cache.

mod auth;
mod cache;
mod config;
mod dropbox;
mod errors;
mod server;
mod singleflight;

use anyhow::{anyhow, Context, Result};
use std::env;
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use auth::{AccessCredential, CredentialManager, CredentialStore};
use cache::{FileReference, RemoteFileCache};
use config::GatewayConfig;
use dropbox::DropboxClient;
use server::AppState;

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run the HTTP gateway (default)
    Serve,
    /// Fetch one file through the cache and write it to stdout
    Fetch { reference: String },
    /// Store a credential obtained from the authorization handshake
    Seed {
        access_token: String,
        refresh_token: String,
        expires_in: u64,
    },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"Dropcache Gateway - Cached HTTP access to Dropbox files

USAGE:
    dropcache-gateway                    # Run HTTP gateway (default)
    dropcache-gateway fetch <path-or-sharing-link>
    dropcache-gateway seed <access_token> <refresh_token> <expires_in_secs>
    dropcache-gateway help

COMMANDS:
    (none)  Run the HTTP gateway
    fetch   Fetch one file and write its content to stdout
    seed    Store a credential from the initial authorization
    help    Show this help message

EXAMPLES:
    # Run the gateway on port 8080
    PORT=8080 dropcache-gateway

    # Fetch a file by path
    dropcache-gateway fetch /testing/report.json

ENVIRONMENT:
    DROPBOX_APP_KEY            Dropbox app key (required)
    DROPBOX_APP_SECRET         Dropbox app secret (required)
    DROPBOX_REFRESH_TOKEN      Refresh token (else read from the credential file)
    DROPBOX_ACCESS_TOKEN       Initial access token, refreshed on first use
    DROPBOX_CREDENTIAL_FILE    Where issued credentials are stored
    CACHE_TTL_SECS             Cache entry lifetime (default 480)
    CACHE_MAX_BYTES            Cache size bound (default 268435456)
    TOKEN_REFRESH_BUFFER_SECS  Refresh this long before expiry (default 300)
    UPSTREAM_TIMEOUT_SECS      Per-request upstream timeout (default 30)
    BIND_ADDR, PORT            Listen address (default 0.0.0.0:3000)
    RUST_LOG                   Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Serve);
    }

    match args[1].as_str() {
        "serve" => Ok(Command::Serve),
        "fetch" => {
            if args.len() < 3 {
                return Err(anyhow!("Usage: dropcache-gateway fetch <path-or-sharing-link>"));
            }
            Ok(Command::Fetch {
                reference: args[2].clone(),
            })
        }
        "seed" => {
            if args.len() < 5 {
                return Err(anyhow!(
                    "Usage: dropcache-gateway seed <access_token> <refresh_token> <expires_in_secs>"
                ));
            }
            let expires_in = args[4]
                .parse()
                .with_context(|| format!("Invalid expires_in_secs: {}", args[4]))?;
            Ok(Command::Seed {
                access_token: args[2].clone(),
                refresh_token: args[3].clone(),
                expires_in,
            })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

/// Environment credential first, then whatever a previous run stored
fn startup_credential(config: &GatewayConfig, store: &CredentialStore) -> AccessCredential {
    let from_env = config.initial_credential();
    if from_env.has_refresh_token() {
        return from_env;
    }

    match store.load() {
        Ok(Some(stored)) => {
            info!(path = %store.path().display(), "Loaded stored credential");
            stored.to_credential()
        }
        Ok(None) => {
            warn!("No refresh token configured; requests will fail until a credential is seeded");
            from_env
        }
        Err(e) => {
            warn!(error = %e, "Failed to load stored credential");
            from_env
        }
    }
}

/// Components shared by every command that talks to Dropbox
struct Gateway {
    config: GatewayConfig,
    store: CredentialStore,
    client: DropboxClient,
    credentials: CredentialManager,
}

impl Gateway {
    fn from_env() -> Result<Self> {
        let config = match GatewayConfig::from_env() {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Invalid configuration");
                return Err(e);
            }
        };

        let store = CredentialStore::new(config.credential_file.clone());
        let client = DropboxClient::new(config.endpoints.clone(), config.upstream_timeout)
            .context("Failed to build Dropbox client")?;
        let credentials = CredentialManager::new(
            client.clone(),
            config.credential_settings(),
            startup_credential(&config, &store),
        );

        Ok(Self {
            config,
            store,
            client,
            credentials,
        })
    }

    fn file_cache(&self) -> RemoteFileCache {
        RemoteFileCache::new(
            self.client.clone(),
            self.credentials.clone(),
            self.config.cache_ttl,
            self.config.max_cache_bytes,
        )
    }
}

async fn run_server(gateway: Gateway) -> Result<()> {
    info!(
        addr = %gateway.config.listen_addr,
        cache_ttl_secs = gateway.config.cache_ttl.as_secs(),
        "Starting Dropcache gateway"
    );

    let cache = gateway.file_cache();
    let persister = gateway
        .store
        .clone()
        .spawn_persister(gateway.credentials.subscribe_issued());

    let state = Arc::new(AppState {
        cache,
        credentials: gateway.credentials,
    });
    let result = server::serve(gateway.config.listen_addr, state).await;

    persister.abort();
    result
}

async fn run_fetch(gateway: Gateway, reference: String) -> Result<()> {
    let content = match gateway.file_cache().fetch(&FileReference::path(reference)).await {
        Ok(content) => content,
        Err(e) => {
            error!(error = %e, "Fetch failed");
            return Err(e.into());
        }
    };

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&content)
        .context("Failed to write file content")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

async fn run_seed(
    gateway: Gateway,
    access_token: String,
    refresh_token: String,
    expires_in: u64,
) -> Result<()> {
    let mut issued = gateway.credentials.subscribe_issued();
    gateway
        .credentials
        .set_credential(&access_token, &refresh_token, expires_in);

    let credential = issued
        .recv()
        .await
        .context("Seeded credential was not published")?;
    gateway.store.save(&credential)?;

    println!("Credential stored at {}", gateway.store.path().display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for fetched content
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Serve => run_server(Gateway::from_env()?).await,
        Command::Fetch { reference } => run_fetch(Gateway::from_env()?, reference).await,
        Command::Seed {
            access_token,
            refresh_token,
            expires_in,
        } => run_seed(Gateway::from_env()?, access_token, refresh_token, expires_in).await,
        Command::Help => {
            print_help();
            Ok(())
        }
    }
}
