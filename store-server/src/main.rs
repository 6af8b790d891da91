mod handlers;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use handlers::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Standalone object-store/cache test harness implementing spec.md §6's
/// wire protocol over a plain directory tree.
#[derive(Parser, Debug)]
#[command(name = "store-server", about = "Object-store and cache-layer test harness")]
struct Cli {
    /// Directory backing both the store (`store/<namespace>/<hash>`) and
    /// cache (`<dedupe>/files/<hash>`, `<dedupe>/md/<id>.flist`) areas.
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Address to bind the HTTP listener to.
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "store_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = std::fs::create_dir_all(&cli.data_dir) {
        tracing::error!(error = %e, dir = %cli.data_dir.display(), "failed to create data directory");
        std::process::exit(1);
    }

    let state = AppState {
        data_dir: Arc::new(cli.data_dir),
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/store/:namespace/:hash",
            get(handlers::store_get).head(handlers::store_head),
        )
        .route("/:namespace", post(handlers::store_post))
        .route(
            "/:dedupe/files/:hash",
            get(handlers::cache_get_file).head(handlers::cache_head_file),
        )
        .route("/:dedupe/md/:filename", get(handlers::cache_get_meta))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(addr = %cli.listen, "listening");
    let listener = match tokio::net::TcpListener::bind(cli.listen).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server exited with error");
    }
}
