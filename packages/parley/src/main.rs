use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use parley::auth::{Identity, TokenIdentity};
use parley::config::{FileConfig, ServerConfig, load_config};
use parley::metrics::ServerMetrics;
use parley::models::UserProfile;
use parley::store::MemoryStore;
use parley::ws::SyncService;
use parley::{AppState, build_router, cli};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Real-time chat synchronization server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.toml (defaults to the current directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground
    Serve(ServeArgs),

    /// Connect to a server as a terminal client
    Connect(ConnectArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Port for the web server (0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Dev mode: ephemeral credential issuer and seeded demo users, with
    /// their tokens printed at startup
    #[arg(long)]
    dev: bool,
}

#[derive(Parser)]
struct ConnectArgs {
    /// Server base URL
    #[arg(long, default_value = "http://127.0.0.1:4000")]
    url: String,

    /// Credential token issued by the login service
    #[arg(long)]
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_server(args, cli.config_dir).await,
        Commands::Connect(args) => {
            let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley=info,warn"));
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer())
                .with(env_filter)
                .init();
            cli::connect_command(args.url, args.token).await
        }
    }
}

async fn run_server(args: ServeArgs, config_dir: Option<PathBuf>) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "parley=debug,tower_http=debug,info"
    } else {
        "parley=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Parley - real-time chat server");

    let config_dir = config_dir.unwrap_or_else(|| PathBuf::from("."));
    let file_config: FileConfig = load_config(&config_dir)
        .extract()
        .context("loading configuration")?;
    let config = Arc::new(ServerConfig::from_file(&file_config, args.host, args.port));
    info!(
        "Server config: auth_grace={}s, outbound_queue={}",
        config.auth_grace.as_secs(),
        config.outbound_queue
    );

    let store = Arc::new(MemoryStore::new());

    // Resolve the credential issuer. Without a configured key this server
    // cannot accept real credentials, so fall back to an ephemeral dev issuer.
    let identity: Arc<dyn Identity> = match (&config.issuer_key, args.dev) {
        (Some(key_b64), false) => {
            let issuer = parley_auth::PublicKey::from_base64(key_b64)
                .context("invalid auth.issuer_key in configuration")?;
            info!("Credential issuer configured ({})", issuer);
            Arc::new(TokenIdentity::new(issuer, config.credential_max_age_secs))
        }
        _ => {
            if !args.dev {
                warn!("No auth.issuer_key configured; using an ephemeral dev issuer");
            }
            let mut rng = rand::rng();
            let signing = parley_auth::SigningKey::generate(&mut rng);
            seed_dev_data(&store, &signing).await;
            Arc::new(TokenIdentity::new(signing.public_key(), None))
        }
    };

    let metrics = Arc::new(ServerMetrics::new());
    let sync = SyncService::new(metrics.clone());

    let app_state = AppState {
        config: config.clone(),
        sync: sync.clone(),
        store,
        identity,
        metrics,
    };
    let app = build_router(app_state);

    let addr = format!("{}:{}", config.host, config.port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Parley listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET  /api/chat/conversations - Conversation snapshot");
    info!("  GET  /api/chat/users         - User directory");
    info!("  POST /api/chat/conversations/:id/messages - Send a message");
    info!("  POST /api/chat/avatar        - Update avatar");
    info!("  GET  /api/ws                 - Real-time WebSocket");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    // Drop every live connection before exiting
    sync.shutdown().await;
    info!("Shutdown complete");
    server_result
}

/// Seed demo users and conversations, printing a credential token for each
/// user so clients can connect straight away.
async fn seed_dev_data(store: &MemoryStore, signing: &parley_auth::SigningKey) {
    let now = chrono::Utc::now().timestamp();
    info!("Dev issuer active; demo credentials:");
    for (id, name) in [("u-alice", "alice"), ("u-bob", "bob"), ("u-carol", "carol")] {
        store.add_user(UserProfile::new(id, name)).await;
        let token = parley_auth::Credential::new(id, now).issue(signing);
        info!("  {name}: {token}");
    }
    store
        .add_conversation("demo-pair", None, vec!["u-alice".into(), "u-bob".into()])
        .await;
    store
        .add_conversation(
            "demo-group",
            Some("demo group".into()),
            vec!["u-alice".into(), "u-bob".into(), "u-carol".into()],
        )
        .await;
}
