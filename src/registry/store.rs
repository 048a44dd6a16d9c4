//! Storage boundary for the token registry.
//!
//! The registry only needs create/replace, delete-by-predicate and
//! select-by-predicate over a single table. [`TokenStore`] captures that;
//! each call is one atomic statement from the registry's point of view.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::error::{DispatchError, Result};
use crate::token::{DeviceToken, Mode};

/// Conjunction of optional predicates over token rows.
///
/// An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenFilter {
    /// Row token must be one of these.
    pub tokens: Option<Vec<String>>,
    /// Row owner must be one of these.
    pub owners: Option<Vec<i64>>,
    /// Row mode must equal this.
    pub mode: Option<Mode>,
    /// Row must have been registered strictly before this instant.
    pub registered_before: Option<DateTime<Utc>>,
}

impl TokenFilter {
    /// Match rows whose token is any of `tokens`.
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: Some(tokens.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Match rows owned by `owner_id`.
    pub fn owner(owner_id: i64) -> Self {
        Self {
            owners: Some(vec![owner_id]),
            ..Self::default()
        }
    }

    /// Match rows registered before `cutoff`.
    pub fn registered_before(cutoff: DateTime<Utc>) -> Self {
        Self {
            registered_before: Some(cutoff),
            ..Self::default()
        }
    }

    /// Further restrict to one mode, if given.
    pub fn in_mode(mut self, mode: Option<Mode>) -> Self {
        self.mode = mode;
        self
    }

    /// Whether `row` satisfies every predicate.
    pub fn matches(&self, row: &DeviceToken) -> bool {
        if let Some(tokens) = &self.tokens {
            if !tokens.iter().any(|t| t == &row.token) {
                return false;
            }
        }
        if let Some(owners) = &self.owners {
            if !owners.contains(&row.owner_id) {
                return false;
            }
        }
        if let Some(mode) = self.mode {
            if row.mode != mode {
                return false;
            }
        }
        if let Some(cutoff) = self.registered_before {
            if row.registered_at >= cutoff {
                return false;
            }
        }
        true
    }
}

/// Durable backing for the registry.
///
/// Implementations must apply each call atomically: either every row of a
/// `replace` batch lands or none does.
pub trait TokenStore: Send + Sync {
    /// Insert rows, replacing any existing row with the same token.
    fn replace(&self, rows: &[DeviceToken]) -> Result<()>;

    /// Delete matching rows, returning how many were removed.
    fn delete(&self, filter: &TokenFilter) -> Result<usize>;

    /// Return matching rows.
    fn select(&self, filter: &TokenFilter) -> Result<Vec<DeviceToken>>;

    /// Count matching rows.
    fn count(&self, filter: &TokenFilter) -> Result<usize> {
        Ok(self.select(filter)?.len())
    }
}

/// In-process store keyed by token. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    rows: RwLock<HashMap<String, DeviceToken>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, regardless of mode.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenStore for MemoryTokenStore {
    fn replace(&self, rows: &[DeviceToken]) -> Result<()> {
        let mut guard = self.rows.write().map_err(poisoned)?;
        for row in rows {
            guard.insert(row.token.clone(), row.clone());
        }
        Ok(())
    }

    fn delete(&self, filter: &TokenFilter) -> Result<usize> {
        let mut guard = self.rows.write().map_err(poisoned)?;
        let before = guard.len();
        guard.retain(|_, row| !filter.matches(row));
        Ok(before - guard.len())
    }

    fn select(&self, filter: &TokenFilter) -> Result<Vec<DeviceToken>> {
        let guard = self.rows.read().map_err(poisoned)?;
        let mut rows: Vec<DeviceToken> = guard
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.token.cmp(&b.token)));
        Ok(rows)
    }
}

pub(super) fn poisoned<T>(err: std::sync::PoisonError<T>) -> DispatchError {
    DispatchError::Storage(format!("token store lock poisoned: {err}"))
}
