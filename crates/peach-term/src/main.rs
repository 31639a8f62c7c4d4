use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod handlers;
mod sessions;

use sessions::{SessionManager, ShellConfig};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
}

#[derive(Parser, Debug)]
#[command(name = "peach-term")]
#[command(about = "Terminal service for coding environment pods")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PEACH_TERM_PORT", default_value = "4000")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "PEACH_TERM_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Shell to spawn for each terminal
    #[arg(short, long, env = "SHELL", default_value = "sh")]
    shell: String,

    /// Working directory for spawned shells
    #[arg(short, long, env = "PEACH_TERM_WORKDIR", default_value = "/root/data")]
    workdir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, env = "PEACH_TERM_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "peach_term=debug,tower_http=debug"
    } else {
        "peach_term=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Spawning '{}' in {}",
        cli.shell,
        cli.workdir.display()
    );

    let state = AppState {
        sessions: SessionManager::new(ShellConfig {
            shell: cli.shell,
            workdir: cli.workdir,
        }),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::routes()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    info!("Starting peach-term on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
