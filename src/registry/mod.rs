//! Device-token registry.
//!
//! Stores `(token, owner, mode)` rows keyed by canonical token. Every
//! registration passes through [`normalize`](crate::token::normalize);
//! tokens it rejects are skipped without failing the rest of the batch.
//!
//! # Lifecycle
//!
//! ```text
//! register ──► row (registered_at = now)
//!    │              │
//!    └─ re-register ┘   (same token: owner/mode replaced, timestamp refreshed)
//!
//! row ──► unregister            (explicit, or transport-reported invalid token)
//!     ──► unregister_batch      (feedback reconciliation)
//!     ──► purge_stale           (registered more than 3 months ago)
//! ```
//!
//! The registry holds no locks of its own. Concurrent writers for the same
//! token rely on the store's per-call atomicity; the last upsert wins.

pub mod file_store;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};

pub use file_store::FileTokenStore;
pub use store::{MemoryTokenStore, TokenFilter, TokenStore};

use crate::constants::STALE_TOKEN_MONTHS;
use crate::error::Result;
use crate::token::{self, DeviceToken, Mode};

/// Front door to the token table. Cheap to clone.
#[derive(Clone)]
pub struct TokenRegistry {
    store: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRegistry").finish_non_exhaustive()
    }
}

impl TokenRegistry {
    /// Wrap a store.
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Registry over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTokenStore::new()))
    }

    /// Register one device. Returns `false` when the token was unusable.
    pub fn register(&self, raw_token: &str, owner_id: i64, mode: Mode) -> Result<bool> {
        Ok(self.register_batch(&[(raw_token.to_string(), owner_id, mode)])? == 1)
    }

    /// Register many devices in one store call.
    ///
    /// Unusable tokens are dropped silently. Returns the number of rows written.
    pub fn register_batch(&self, entries: &[(String, i64, Mode)]) -> Result<usize> {
        let now = Utc::now();
        let rows: Vec<DeviceToken> = entries
            .iter()
            .filter_map(|(raw, owner_id, mode)| {
                let Some(canonical) = token::normalize(raw) else {
                    log::debug!("[Registry] Skipping unusable token {:?}", token::short(raw));
                    return None;
                };
                Some(DeviceToken {
                    token: canonical,
                    owner_id: *owner_id,
                    mode: *mode,
                    registered_at: now,
                })
            })
            .collect();

        if rows.is_empty() {
            return Ok(0);
        }

        self.store.replace(&rows)?;
        log::debug!("[Registry] Registered {} of {} tokens", rows.len(), entries.len());
        Ok(rows.len())
    }

    /// Remove a token in both its plain and chunked spellings.
    ///
    /// With `mode`, only rows of that environment are removed.
    pub fn unregister(&self, token: &str, mode: Option<Mode>) -> Result<usize> {
        self.unregister_batch(&[token.to_string()], mode)
    }

    /// Remove many tokens in one store call. Empty input is a no-op.
    pub fn unregister_batch(&self, tokens: &[String], mode: Option<Mode>) -> Result<usize> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let mut spellings: Vec<String> = Vec::with_capacity(tokens.len() * 2);
        for spelling in tokens.iter().flat_map(|t| token::spellings(t)) {
            if !spellings.contains(&spelling) {
                spellings.push(spelling);
            }
        }

        let removed = self
            .store
            .delete(&TokenFilter::tokens(spellings).in_mode(mode))?;
        if removed > 0 {
            log::info!("[Registry] Unregistered {} token(s)", removed);
        }
        Ok(removed)
    }

    /// Remove every token owned by `owner_id`, optionally for one mode only.
    pub fn unregister_owner(&self, owner_id: i64, mode: Option<Mode>) -> Result<usize> {
        self.store.delete(&TokenFilter::owner(owner_id).in_mode(mode))
    }

    /// Tokens registered for a recipient. An empty result is not an error.
    pub fn tokens_for(&self, owner_id: i64) -> Result<Vec<DeviceToken>> {
        self.store.select(&TokenFilter::owner(owner_id))
    }

    /// Number of rows, optionally for one mode only.
    pub fn count(&self, mode: Option<Mode>) -> Result<usize> {
        self.store.count(&TokenFilter::default().in_mode(mode))
    }

    /// Delete rows not refreshed in the last three months.
    pub fn purge_stale(&self) -> Result<usize> {
        let now = Utc::now();
        let cutoff = now
            .checked_sub_months(Months::new(STALE_TOKEN_MONTHS))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.purge_registered_before(cutoff)
    }

    /// Delete rows registered before `cutoff`.
    pub fn purge_registered_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.store.delete(&TokenFilter::registered_before(cutoff))?;
        log::info!("[Registry] Purged {} stale token(s) older than {}", removed, cutoff);
        Ok(removed)
    }
}
