//! Attendance deduplication: at most one "present" record per identity per
//! calendar day, with a short cooldown between emission attempts.

use chrono::{DateTime, Local, NaiveDate};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("attendance store unavailable: {0}")]
    Unavailable(String),
    /// The store already holds a row for this identity and day.
    #[error("attendance already recorded for {identity_id} on {day}")]
    Duplicate { identity_id: String, day: NaiveDate },
    #[error("attendance store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("attendance store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Downstream persistence of attendance rows.
pub trait AttendanceStore: Send {
    fn already_recorded(&self, identity_id: &str, day: NaiveDate) -> Result<bool, StoreError>;

    fn record_present(&mut self, identity_id: &str, at: DateTime<Local>) -> Result<(), StoreError>;
}

/// Store that keeps rows in memory.
#[derive(Debug, Default)]
pub struct MemoryAttendanceStore {
    rows: Vec<(String, DateTime<Local>)>,
}

impl MemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[(String, DateTime<Local>)] {
        &self.rows
    }
}

impl AttendanceStore for MemoryAttendanceStore {
    fn already_recorded(&self, identity_id: &str, day: NaiveDate) -> Result<bool, StoreError> {
        Ok(self
            .rows
            .iter()
            .any(|(id, at)| id == identity_id && at.date_naive() == day))
    }

    fn record_present(&mut self, identity_id: &str, at: DateTime<Local>) -> Result<(), StoreError> {
        self.rows.push((identity_id.to_string(), at));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Emitted,
    /// Same identity emitted less than the cooldown ago.
    Cooldown,
    /// Identity already has a row for that day.
    AlreadyRecorded,
    /// The store rejected the check or the write; nothing was updated.
    StoreFailed,
}

impl EmitOutcome {
    pub fn emitted(self) -> bool {
        matches!(self, EmitOutcome::Emitted)
    }
}

#[derive(Debug)]
pub struct AttendanceDeduper {
    cooldown: chrono::Duration,
    last_emitted: HashMap<String, DateTime<Local>>,
    recorded: HashSet<(String, NaiveDate)>,
}

impl AttendanceDeduper {
    pub fn new(cooldown: std::time::Duration) -> Self {
        Self {
            cooldown: chrono::Duration::from_std(cooldown)
                .unwrap_or_else(|_| chrono::Duration::weeks(52)),
            last_emitted: HashMap::new(),
            recorded: HashSet::new(),
        }
    }

    pub fn try_emit(
        &mut self,
        store: &mut dyn AttendanceStore,
        identity_id: &str,
        at: DateTime<Local>,
    ) -> bool {
        self.decide_emit(store, identity_id, at).emitted()
    }

    /// Cooldown first, then the day check, then the store write. State is
    /// only updated once the write succeeds.
    pub fn decide_emit(
        &mut self,
        store: &mut dyn AttendanceStore,
        identity_id: &str,
        at: DateTime<Local>,
    ) -> EmitOutcome {
        if let Some(last) = self.last_emitted.get(identity_id) {
            if at.signed_duration_since(*last) < self.cooldown {
                return EmitOutcome::Cooldown;
            }
        }

        let day = at.date_naive();
        let key = (identity_id.to_string(), day);
        if self.recorded.contains(&key) {
            return EmitOutcome::AlreadyRecorded;
        }
        match store.already_recorded(identity_id, day) {
            Ok(true) => {
                self.recorded.insert(key);
                return EmitOutcome::AlreadyRecorded;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(identity = identity_id, error = %e, "attendance lookup failed");
                return EmitOutcome::StoreFailed;
            }
        }

        match store.record_present(identity_id, at) {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                tracing::debug!(identity = identity_id, "row written elsewhere first");
                self.recorded.insert(key);
                return EmitOutcome::AlreadyRecorded;
            }
            Err(e) => {
                tracing::warn!(
                    identity = identity_id,
                    error = %e,
                    "attendance write failed; will retry"
                );
                return EmitOutcome::StoreFailed;
            }
        }

        self.last_emitted.insert(identity_id.to_string(), at);
        self.recorded.insert(key);
        EmitOutcome::Emitted
    }
}
