//! ModelGate entry point.
//!
//! Reads configuration from environment variables and starts the axum-based
//! gateway service. See `config.rs` for the full list of recognized keys.

use modelgate::server::build_app;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("modelgate=info".parse().unwrap()))
        .init();

    let config = modelgate::config::load_from_env();
    if let Err(e) = config.validate() {
        eprintln!("invalid gateway configuration: {e}");
        std::process::exit(1);
    }

    let port = config.listen_port;
    let (app, _background) = build_app(&config);

    let addr = format!("0.0.0.0:{port}");
    info!(addr = %addr, "ModelGate starting");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    axum::serve(listener, app).await.unwrap_or_else(|e| {
        eprintln!("server error: {e}");
        std::process::exit(1);
    });
}
