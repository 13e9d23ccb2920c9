//! frame_art_bridge: hybrid local/cloud controller for Frame-class smart
//! displays. The local art channel is always preferred; the vendor cloud API
//! covers for it when the display is unreachable.

mod config;
mod control;
mod store;
mod unsplash;
mod web;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};
use crate::control::HybridController;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("frame_art_bridge=info")),
        )
        .init();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let controller = Arc::new(HybridController::new(&config));
    info!(
        device = %config.device_addr,
        cloud_fallback = config.smartthings_token.is_some(),
        "controller ready"
    );

    // Release the direct session before the process dies.
    let shutdown_controller = controller.clone();
    ctrlc::set_handler(move || {
        info!("shutting down");
        shutdown_controller.close();
        std::process::exit(0);
    })
    .map_err(|e| std::io::Error::other(format!("install signal handler: {e}")))?;

    let result = web::serve(config, controller.clone()).await;
    controller.close();
    result
}
