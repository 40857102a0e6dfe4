//! Who may use the bot, and under which email.
//!
//! Rosters are read-through: every query re-reads the backing store, so edits
//! to the roster file take effect on the next command without a restart.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use serde::Deserialize;

use crate::errors::RosterError;

pub trait Roster: Send + Sync {
    /// Every handle → email pair currently on the roster.
    fn all_entries(&self) -> Result<BTreeMap<String, String>, RosterError>;

    fn email_for(&self, handle: &str) -> Result<Option<String>, RosterError> {
        Ok(self.all_entries()?.remove(&normalize_handle(handle)))
    }

    fn is_authorized(&self, handle: &str) -> Result<bool, RosterError> {
        Ok(self.email_for(handle)?.is_some())
    }
}

/// Handles are stored with a leading `@`.
pub fn normalize_handle(handle: &str) -> String {
    let handle = handle.trim();
    if handle.starts_with('@') {
        handle.to_string()
    } else {
        format!("@{}", handle)
    }
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(default)]
    telegram_username: String,
    #[serde(default)]
    email: String,
}

/// Roster backed by a CSV file with `telegram_username,email` columns.
pub struct CsvRoster {
    path: PathBuf,
}

impl CsvRoster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Roster for CsvRoster {
    fn all_entries(&self) -> Result<BTreeMap<String, String>, RosterError> {
        let shown = self.path.display().to_string();
        let file = std::fs::File::open(&self.path).map_err(|source| RosterError::Io {
            path: shown.clone(),
            source,
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(file);

        let mut entries = BTreeMap::new();
        for row in reader.deserialize::<RosterRow>() {
            let row = row.map_err(|source| RosterError::Csv {
                path: shown.clone(),
                source,
            })?;
            if row.telegram_username.is_empty() || row.email.is_empty() {
                continue;
            }
            entries.insert(normalize_handle(&row.telegram_username), row.email);
        }

        tracing::debug!(path = %shown, entries = entries.len(), "loaded roster");
        Ok(entries)
    }
}

/// In-process roster, mainly for tests and embedding.
#[derive(Default)]
pub struct MemoryRoster {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: &str, email: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(normalize_handle(handle), email.trim().to_string());
    }

    pub fn remove(&self, handle: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&normalize_handle(handle));
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MemoryRoster {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let roster = MemoryRoster::new();
        for (handle, email) in pairs {
            roster.insert(handle, email);
        }
        roster
    }
}

impl Roster for MemoryRoster {
    fn all_entries(&self) -> Result<BTreeMap<String, String>, RosterError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
