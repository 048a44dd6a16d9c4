//! Device-token management commands.
//!
//! ```bash
//! push-dispatch register 0a1b2c3d... --owner 42
//! push-dispatch unregister 0a1b2c3d...
//! push-dispatch tokens 42
//! push-dispatch purge-stale
//! ```

use anyhow::Result;

use super::open_registry;
use crate::token::Mode;
use crate::Config;

/// Registers a device token for `owner_id`.
///
/// Unusable tokens (empty, or the malformed `{length = ...}` placeholder
/// some SDKs produce) are skipped, which is reported but not an error.
pub fn register(config: &Config, token: &str, owner_id: i64, mode: Mode) -> Result<()> {
    let registry = open_registry(config)?;
    if registry.register(token, owner_id, mode)? {
        println!("Registered token for owner {} ({})", owner_id, mode);
    } else {
        println!("Token skipped: not a usable device token");
    }
    Ok(())
}

/// Removes a token in any of its spellings.
pub fn unregister(config: &Config, token: &str, mode: Option<Mode>) -> Result<()> {
    let removed = open_registry(config)?.unregister(token, mode)?;
    println!("Removed {} token(s)", removed);
    Ok(())
}

/// Removes every token of `owner_id`.
pub fn unregister_owner(config: &Config, owner_id: i64, mode: Option<Mode>) -> Result<()> {
    let removed = open_registry(config)?.unregister_owner(owner_id, mode)?;
    println!("Removed {} token(s) for owner {}", removed, owner_id);
    Ok(())
}

/// Prints the tokens registered for `owner_id`.
///
/// # Output Format
///
/// ```text
/// Token                                                             Mode  Platform   Registered
/// ----------------------------------------------------------------------------------------------
/// 0a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9  P     Apple      2026-01-02 10:00
/// ```
pub fn list(config: &Config, owner_id: i64) -> Result<()> {
    let mut rows = open_registry(config)?.tokens_for(owner_id)?;
    if rows.is_empty() {
        println!("No tokens registered for owner {}", owner_id);
        return Ok(());
    }
    rows.sort_by(|a, b| a.token.cmp(&b.token));

    println!("{:<66}{:<6}{:<11}Registered", "Token", "Mode", "Platform");
    println!("{}", "-".repeat(94));
    for row in rows {
        let mode = if row.mode.is_production() { "P" } else { "D" };
        println!(
            "{:<66}{:<6}{:<11}{}",
            row.token,
            mode,
            format!("{:?}", row.platform()),
            row.registered_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Deletes tokens not re-registered in the last three months.
pub fn purge_stale(config: &Config) -> Result<()> {
    let removed = open_registry(config)?.purge_stale()?;
    println!("Purged {} stale token(s)", removed);
    Ok(())
}
