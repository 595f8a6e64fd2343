//! Compositing server binary
//!
//! Run with: cargo run -p composite-batch --bin composite-batch-server
//! Optional config file: COMPOSITE_CONFIG=/path/to/config.toml

use composite_batch::{config::CompositeConfig, server::CompositeServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "composite_batch=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                   Composite Batch Server                  ║
║         Foregrounds onto one background, in bulk          ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    // Load configuration
    let config_path = std::env::var_os("COMPOSITE_CONFIG").map(PathBuf::from);
    let config = CompositeConfig::load(config_path.as_deref())?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Remote compositor: {}", config.remote.base_url);
    tracing::info!(
        "  - Pixel budget: {} ({} x {:.0}%)",
        config.remote.pixel_budget(),
        config.remote.pixel_limit,
        config.remote.safety_margin * 100.0
    );
    tracing::info!(
        "  - Chunk size: {}, worker width: {}",
        config.processing.chunk_size,
        config.processing.worker_width
    );
    tracing::info!("  - Storage: {}", config.storage.root.display());

    if config.remote.require_api_key().is_err() {
        tracing::warn!("COMPOSITE_API_KEY is not set; batch submissions will be rejected");
    }

    // Create and start server
    let server = CompositeServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/batches              - Submit a batch");
    println!("  GET  /api/batches/:id          - Batch progress");
    println!("  GET  /api/batches/:id/download - Download results");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
