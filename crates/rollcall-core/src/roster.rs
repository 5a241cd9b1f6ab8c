//! Identity lookup for corpus folder names.
//!
//! Corpus folders are named after people, not keyed by id, so a folder can
//! carry a last name, a first name, or any single part of a compound name.

use crate::types::IdentityRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid roster JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Resolves a free-form query (a corpus folder name) to identity records,
/// best match first.
pub trait IdentityStore: Send + Sync {
    fn lookup(&self, query: &str) -> Vec<IdentityRecord>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
}

impl RosterEntry {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    fn to_record(&self) -> IdentityRecord {
        IdentityRecord {
            id: self.id.clone(),
            display_name: self.full_name(),
            group: self.section.clone(),
            number: self.number.clone(),
        }
    }

    /// Lower is better; `None` when the query matches no part of the name.
    fn rank(&self, query: &str) -> Option<u8> {
        let same = |s: &str| s.trim().eq_ignore_ascii_case(query);
        if same(&self.last_name) {
            Some(0)
        } else if same(&self.full_name()) {
            Some(1)
        } else if same(&self.first_name) {
            Some(2)
        } else if self
            .first_name
            .split_whitespace()
            .chain(self.last_name.split_whitespace())
            .any(same)
        {
            Some(3)
        } else {
            None
        }
    }
}

/// In-memory roster, typically loaded from a JSON array of entries.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let entries: Vec<RosterEntry> = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), entries = entries.len(), "loaded roster");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IdentityStore for Roster {
    fn lookup(&self, query: &str) -> Vec<IdentityRecord> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let mut ranked: Vec<(u8, usize, &RosterEntry)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(pos, entry)| entry.rank(query).map(|rank| (rank, pos, entry)))
            .collect();
        ranked.sort_by_key(|(rank, pos, _)| (*rank, *pos));
        ranked.into_iter().map(|(_, _, entry)| entry.to_record()).collect()
    }
}
