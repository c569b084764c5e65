//! In-memory store, used by tests and embedded callers without a database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use judsync_core::{Case, CaseId, Movement, ProcessNumber};

use crate::{CaseChangeset, CaseStore, MovementStore, ReconcileStore, StoreError};

#[derive(Default)]
struct Inner {
    cases: BTreeMap<CaseId, Case>,
    movements: Vec<Movement>,
    next_case_id: CaseId,
    next_movement_id: i64,
}

/// Mutex-guarded case and movement tables.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Register a never-checked case for `number`, stored trimmed; blank becomes `None`.
    pub fn insert_case(&self, number: Option<ProcessNumber>) -> Result<Case, StoreError> {
        let number = number.as_ref().and_then(ProcessNumber::trimmed);
        let mut inner = self.lock()?;
        inner.next_case_id += 1;
        let case = Case {
            id: inner.next_case_id,
            process_number: number,
            status: None,
            updated_at: Utc::now(),
            last_checked_at: None,
        };
        inner.cases.insert(case.id, case.clone());
        Ok(case)
    }

    /// Insert or replace a case row verbatim.
    pub fn put_case(&self, case: Case) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.next_case_id = inner.next_case_id.max(case.id);
        inner.cases.insert(case.id, case);
        Ok(())
    }

    pub fn movement_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.movements.len())
    }
}

impl CaseStore for MemoryStore {
    fn case(&self, id: CaseId) -> Result<Option<Case>, StoreError> {
        Ok(self.lock()?.cases.get(&id).cloned())
    }

    fn case_by_number(&self, number: &ProcessNumber) -> Result<Option<Case>, StoreError> {
        let wanted = number.as_str().trim();
        Ok(self
            .lock()?
            .cases
            .values()
            .find(|c| c.process_number().is_some_and(|n| n.as_str().trim() == wanted))
            .cloned())
    }

    fn stale_cases(
        &self,
        checked_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Case>, StoreError> {
        let inner = self.lock()?;
        let mut due: Vec<Case> = inner
            .cases
            .values()
            .filter(|c| c.process_number().is_some())
            .filter(|c| c.last_checked_at.is_none_or(|t| t < checked_before))
            .cloned()
            .collect();
        // `None` sorts before `Some`, so never-checked cases lead.
        due.sort_by_key(|c| (c.last_checked_at, c.id));
        due.truncate(limit);
        Ok(due)
    }

    fn touch_checked(&self, id: CaseId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let case = inner.cases.get_mut(&id).ok_or(StoreError::CaseNotFound(id))?;
        case.last_checked_at = Some(case.last_checked_at.map_or(at, |prev| prev.max(at)));
        Ok(())
    }
}

impl MovementStore for MemoryStore {
    fn find_movement(
        &self,
        case_id: CaseId,
        occurred_at: DateTime<Utc>,
        description_prefix: &str,
    ) -> Result<Option<Movement>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .movements
            .iter()
            .find(|m| {
                m.case_id == case_id
                    && m.occurred_at == occurred_at
                    && m.description.starts_with(description_prefix)
            })
            .cloned())
    }

    fn movements(&self, case_id: CaseId) -> Result<Vec<Movement>, StoreError> {
        let inner = self.lock()?;
        let mut out: Vec<Movement> = inner
            .movements
            .iter()
            .filter(|m| m.case_id == case_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}

impl ReconcileStore for MemoryStore {
    fn commit(&self, changeset: &CaseChangeset) -> Result<Vec<Movement>, StoreError> {
        let mut inner = self.lock()?;
        // Validate before touching anything so a failure leaves no partial writes.
        let mut case = inner
            .cases
            .get(&changeset.case_id)
            .cloned()
            .ok_or(StoreError::CaseNotFound(changeset.case_id))?;

        let mut inserted = Vec::with_capacity(changeset.movements.len());
        for new in &changeset.movements {
            inner.next_movement_id += 1;
            inserted.push(Movement {
                id: inner.next_movement_id,
                case_id: changeset.case_id,
                occurred_at: new.occurred_at,
                description: new.description.clone(),
                raw_payload: new.raw_payload.clone(),
                recorded_at: changeset.checked_at,
            });
        }

        if let Some(status) = &changeset.status {
            case.status = Some(status.clone());
        }
        if let Some(updated_at) = changeset.updated_at
            && updated_at > case.updated_at
        {
            case.updated_at = updated_at;
        }
        case.last_checked_at = Some(
            case.last_checked_at
                .map_or(changeset.checked_at, |prev| prev.max(changeset.checked_at)),
        );

        inner.movements.extend(inserted.iter().cloned());
        inner.cases.insert(case.id, case);
        Ok(inserted)
    }
}
