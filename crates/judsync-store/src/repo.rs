//! Read/write contracts the reconciliation engine needs from persistence.

use chrono::{DateTime, Utc};
use judsync_core::{Case, CaseId, Movement, ProcessNumber};

use crate::StoreError;

/// Case rows owned by the surrounding application.
pub trait CaseStore: Send + Sync {
    fn case(&self, id: CaseId) -> Result<Option<Case>, StoreError>;

    /// The lowest-id case tracking exactly `number` (surrounding whitespace ignored).
    fn case_by_number(&self, number: &ProcessNumber) -> Result<Option<Case>, StoreError>;

    /// Cases due for a DataJud check.
    ///
    /// Only cases with a non-blank process number whose `last_checked_at` is
    /// null or strictly older than `checked_before`. Never-checked cases come
    /// first, then oldest-checked first. At most `limit` rows.
    fn stale_cases(
        &self,
        checked_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Case>, StoreError>;

    /// Record a check attempt. `last_checked_at` never moves backward.
    fn touch_checked(&self, id: CaseId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Append-only movement history.
pub trait MovementStore: Send + Sync {
    /// A stored movement of `case_id` at exactly `occurred_at` whose
    /// description starts with `description_prefix`.
    fn find_movement(
        &self,
        case_id: CaseId,
        occurred_at: DateTime<Utc>,
        description_prefix: &str,
    ) -> Result<Option<Movement>, StoreError>;

    /// All movements of a case, newest first (ties broken by id, newest first).
    fn movements(&self, case_id: CaseId) -> Result<Vec<Movement>, StoreError>;
}

/// A store able to apply one case's reconciliation atomically.
pub trait ReconcileStore: CaseStore + MovementStore {
    /// Apply `changeset` in a single local transaction: either every movement
    /// is inserted and the case row updated, or nothing is written.
    ///
    /// Returns the inserted movements with their assigned ids.
    fn commit(&self, changeset: &CaseChangeset) -> Result<Vec<Movement>, StoreError>;
}

/// A movement not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMovement {
    pub occurred_at: DateTime<Utc>,
    pub description: String,
    pub raw_payload: serde_json::Value,
}

/// Everything one reconciliation pass writes for a case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseChangeset {
    pub case_id: CaseId,
    /// Inserted in order; `recorded_at` is set to `checked_at`.
    pub movements: Vec<NewMovement>,
    pub status: Option<String>,
    /// Applied only when later than the stored `updated_at`.
    pub updated_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
}

impl CaseChangeset {
    /// A changeset that only records the check attempt.
    pub fn checked(case_id: CaseId, checked_at: DateTime<Utc>) -> Self {
        Self {
            case_id,
            movements: Vec::new(),
            status: None,
            updated_at: None,
            checked_at,
        }
    }
}
