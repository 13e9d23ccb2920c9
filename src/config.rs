//! Runtime configuration: environment variables first, CLI flags on top.
//! The sqlite path is resolved separately by the store module
//! (`DATABASE_URL`).

use std::env;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DEVICE_ADDR must be set to the display's network address (or pass --device)")]
    MissingDeviceAddr,
}

/// Command-line overrides for the environment-driven configuration.
#[derive(Debug, Parser)]
#[command(
    name = "frame_art_bridge",
    about = "Hybrid local/cloud controller for Frame-class smart displays"
)]
pub struct Args {
    /// Display network address (overrides DEVICE_ADDR)
    #[arg(long)]
    pub device: Option<String>,

    /// HTTP bind address (overrides BIND_ADDR)
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory holding local images (overrides IMAGE_DIR)
    #[arg(long)]
    pub images_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Address of the display on the local network.
    pub device_addr: String,
    /// Optional pairing token appended to the websocket URL.
    pub device_token: Option<String>,
    /// Bearer token for the cloud API; absent means cloud fallback is off.
    pub smartthings_token: Option<String>,
    /// Pre-known cloud device id; absent triggers discovery.
    pub smartthings_device_id: Option<String>,
    pub unsplash_access_key: Option<String>,
    pub image_dir: String,
    pub bind_addr: String,
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let device_addr = args
            .device
            .clone()
            .or_else(|| env_nonempty("DEVICE_ADDR"))
            .ok_or(ConfigError::MissingDeviceAddr)?;

        Ok(Self {
            device_addr,
            device_token: env_nonempty("DEVICE_TOKEN"),
            smartthings_token: env_nonempty("SMARTTHINGS_TOKEN"),
            smartthings_device_id: env_nonempty("SMARTTHINGS_DEVICE_ID"),
            unsplash_access_key: env_nonempty("UNSPLASH_ACCESS_KEY"),
            image_dir: args
                .images_dir
                .clone()
                .or_else(|| env_nonempty("IMAGE_DIR"))
                .unwrap_or_else(|| "images".to_string()),
            bind_addr: args
                .bind
                .clone()
                .or_else(|| env_nonempty("BIND_ADDR"))
                .unwrap_or_else(|| "127.0.0.1:8080".to_string()),
        })
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_overrides() {
        let args = Args::try_parse_from([
            "frame_art_bridge",
            "--device",
            "192.168.1.50",
            "--bind",
            "0.0.0.0:9000",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("192.168.1.50"));
        assert_eq!(args.bind.as_deref(), Some("0.0.0.0:9000"));
        assert!(args.images_dir.is_none());
    }

    #[test]
    fn test_args_parse_no_flags() {
        let args = Args::try_parse_from(["frame_art_bridge"]).unwrap();
        assert!(args.device.is_none());
        assert!(args.bind.is_none());
    }
}
