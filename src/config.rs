//! Configuration loading from `.env` files.

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for all storage.
    pub store_root: PathBuf,
    /// Bind address for the combined HTTP/WebSocket server, e.g. `127.0.0.1:7700`.
    pub bind: String,
    /// Hex-encoded secret key for the bridge's identity.
    pub secret: String,
    /// Optional Tor SOCKS proxy (host:port) for upstream connections.
    pub tor_socks: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &Path) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT")?);
        let bind = env::var("BIND")?;
        let secret = env::var("SECRET")?;
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        Ok(Self {
            store_root,
            bind,
            secret,
            tor_socks,
        })
    }
}
