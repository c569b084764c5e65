//! Case and movement records shared between the store and the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process::ProcessNumber;

pub type CaseId = i64;
pub type MovementId = i64;

/// A tracked lawsuit, as seen by the reconciliation engine.
///
/// Cases are created by the surrounding application; the engine only reads
/// the process number and timestamps and writes `status`, `updated_at` and
/// `last_checked_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub process_number: Option<ProcessNumber>,
    pub status: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// `None` until the first DataJud check.
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Case {
    /// The process number, if present and not blank.
    pub fn process_number(&self) -> Option<&ProcessNumber> {
        self.process_number.as_ref().filter(|n| !n.is_blank())
    }
}

/// One procedural event recorded for a case. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub case_id: CaseId,
    /// Timestamp reported by DataJud (`dataHora`).
    pub occurred_at: DateTime<Utc>,
    pub description: String,
    /// The DataJud movement entry, verbatim.
    pub raw_payload: serde_json::Value,
    /// Local insertion time.
    pub recorded_at: DateTime<Utc>,
}

/// First `max` characters of `s` (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
