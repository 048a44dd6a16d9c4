//! CLI subcommand implementations for push-dispatch.
//!
//! Each submodule wires [`Config`] to one engine operation and prints the
//! result. Commands are organized by domain:
//!
//! - [`tokens`] - Register, unregister, list and purge device tokens
//! - [`notify`] - Send a notification to one recipient
//! - [`maintenance`] - The scheduled purge + feedback job
//!
//! # Usage
//!
//! ```ignore
//! use push_dispatch::{commands, Config};
//!
//! let config = Config::load()?;
//! commands::tokens::register(&config, "0a1b...", 42, Mode::Production)?;
//! commands::maintenance::run(&config)?;
//! ```

pub mod maintenance;
pub mod notify;
pub mod tokens;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::registry::{FileTokenStore, TokenRegistry};
use crate::Config;

/// Open the file-backed registry configured by `config`.
pub fn open_registry(config: &Config) -> Result<TokenRegistry> {
    let path = config.token_store_path()?;
    let store = FileTokenStore::open(&path)
        .with_context(|| format!("Failed to open token store {}", path.display()))?;
    Ok(TokenRegistry::new(Arc::new(store)))
}
