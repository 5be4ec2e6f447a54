//! The small preference record that survives restarts.
//!
//! The record is stored as JSON under a single key. A value that does not
//! parse as a complete record is dropped and the key is cleared; fields are
//! never salvaged from a damaged record.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{Lang, SortOrder};
use crate::storage::Store;

pub const STORAGE_KEY: &str = "clawmic-reader-state-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderPreferences {
    pub lang: Lang,
    pub library_sort: SortOrder,
    pub issue_id: Option<i64>,
    /// Zero-based internal page of the last reader location.
    pub page: Option<u32>,
}

/// Reads the stored record, falling back to defaults when it is absent or
/// unreadable.
pub fn load(store: &Store) -> ReaderPreferences {
    let raw = match store.get_value(STORAGE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return ReaderPreferences::default(),
        Err(err) => {
            warn!("preferences: read failed, using defaults: {err:#}");
            return ReaderPreferences::default();
        }
    };

    match serde_json::from_str::<ReaderPreferences>(&raw) {
        Ok(prefs) => {
            debug!(?prefs, "preferences: loaded");
            prefs
        }
        Err(err) => {
            warn!("preferences: discarding corrupt record: {err}");
            if let Err(err) = store.delete_value(STORAGE_KEY) {
                warn!("preferences: failed to clear corrupt record: {err:#}");
            }
            ReaderPreferences::default()
        }
    }
}

pub fn save(store: &Store, prefs: &ReaderPreferences) -> Result<()> {
    let encoded = serde_json::to_string(prefs).context("preferences: encode")?;
    store
        .put_value(STORAGE_KEY, &encoded)
        .context("preferences: write")
}
