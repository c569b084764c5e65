//! Merge candidate movements into a case's stored history.

use chrono::{DateTime, Utc};
use judsync_core::{Case, truncate_chars};
use judsync_store::{CaseChangeset, NewMovement, ReconcileStore, StoreError};
use tracing::{debug, info};

use crate::normalize::CandidateMovement;

/// Characters of description compared when looking for an existing movement.
pub const DEDUP_PREFIX_CHARS: usize = 150;

/// Maximum length of the projected case status.
pub const STATUS_MAX_CHARS: usize = 255;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    pub new_movements: usize,
    /// Full description of the newest inserted movement.
    pub latest_description: Option<String>,
}

/// Work out what a pass over `candidates` (newest first) would write.
///
/// A candidate is a duplicate when a movement of the same case exists with
/// exactly the same `occurred_at` and a description starting with the
/// candidate's first 150 characters, either in the store or earlier in this
/// same pass.
pub fn plan<S>(
    store: &S,
    case: &Case,
    candidates: &[CandidateMovement],
    now: DateTime<Utc>,
) -> Result<CaseChangeset, StoreError>
where
    S: ReconcileStore + ?Sized,
{
    let mut changeset = CaseChangeset::checked(case.id, now);
    for candidate in candidates {
        let prefix = truncate_chars(&candidate.description, DEDUP_PREFIX_CHARS);
        let pending = changeset.movements.iter().any(|m| {
            m.occurred_at == candidate.occurred_at && m.description.starts_with(prefix)
        });
        if pending || store.find_movement(case.id, candidate.occurred_at, prefix)?.is_some() {
            debug!(case_id = case.id, occurred_at = %candidate.occurred_at, "movement already recorded");
            continue;
        }
        changeset.movements.push(NewMovement {
            occurred_at: candidate.occurred_at,
            description: candidate.description.clone(),
            raw_payload: candidate.raw.clone(),
        });
    }

    // The first new movement in newest-first order is the most recent one.
    if let Some(latest) = changeset.movements.first() {
        changeset.status = Some(truncate_chars(&latest.description, STATUS_MAX_CHARS).to_string());
        if latest.occurred_at > case.updated_at {
            changeset.updated_at = Some(latest.occurred_at);
        }
    }
    Ok(changeset)
}

/// Reconcile `candidates` into `case` and commit the result atomically.
///
/// `last_checked_at` is recorded whether or not anything new was found.
pub fn reconcile<S>(
    store: &S,
    case: &Case,
    candidates: &[CandidateMovement],
    now: DateTime<Utc>,
) -> Result<ReconcileSummary, StoreError>
where
    S: ReconcileStore + ?Sized,
{
    let changeset = plan(store, case, candidates, now)?;
    let inserted = store.commit(&changeset)?;
    let summary = ReconcileSummary {
        new_movements: inserted.len(),
        latest_description: inserted.first().map(|m| m.description.clone()),
    };
    info!(
        case_id = case.id,
        candidates = candidates.len(),
        new_movements = summary.new_movements,
        "case reconciled"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use judsync_core::ProcessNumber;
    use judsync_store::{CaseStore, MemoryStore, MovementStore};
    use serde_json::json;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap()
    }

    fn candidate(day: u32, description: &str) -> CandidateMovement {
        CandidateMovement {
            occurred_at: ts(day),
            description: description.into(),
            raw: json!({"dataHora": ts(day).to_rfc3339(), "descricao": description}),
        }
    }

    fn seeded() -> (MemoryStore, Case) {
        let store = MemoryStore::new();
        let mut case = store
            .insert_case(Some(ProcessNumber::new("0001234-56.2023.8.26.0100")))
            .unwrap();
        case.status = Some("Em andamento".into());
        case.updated_at = ts(1);
        store.put_case(case.clone()).unwrap();
        (store, case)
    }

    #[test]
    fn first_movement_projects_status() {
        let (store, case) = seeded();
        let summary = reconcile(&store, &case, &[candidate(10, "Distribuição")], ts(20)).unwrap();
        assert_eq!(summary.new_movements, 1);
        assert_eq!(summary.latest_description.as_deref(), Some("Distribuição"));

        let case = store.case(case.id).unwrap().unwrap();
        assert_eq!(case.status.as_deref(), Some("Distribuição"));
        assert_eq!(case.updated_at, ts(10));
        assert_eq!(case.last_checked_at, Some(ts(20)));
    }

    #[test]
    fn second_pass_is_idempotent() {
        let (store, case) = seeded();
        let batch = [candidate(12, "Sentença"), candidate(10, "Distribuição")];
        assert_eq!(reconcile(&store, &case, &batch, ts(20)).unwrap().new_movements, 2);

        let case = store.case(case.id).unwrap().unwrap();
        let again = reconcile(&store, &case, &batch, ts(21)).unwrap();
        assert_eq!(again, ReconcileSummary::default());
        assert_eq!(store.movement_count().unwrap(), 2);

        let case = store.case(case.id).unwrap().unwrap();
        assert_eq!(case.status.as_deref(), Some("Sentença"));
        assert_eq!(case.last_checked_at, Some(ts(21)));
    }

    #[test]
    fn newest_new_movement_wins_status() {
        let (store, case) = seeded();
        // Normalizer output order: T3, T2, T1.
        let batch = [candidate(3, "T3"), candidate(2, "T2"), candidate(1, "T1")];
        let summary = reconcile(&store, &case, &batch, ts(20)).unwrap();
        assert_eq!(summary.new_movements, 3);
        assert_eq!(summary.latest_description.as_deref(), Some("T3"));
        assert_eq!(store.case(case.id).unwrap().unwrap().status.as_deref(), Some("T3"));
    }

    #[test]
    fn only_new_movements_drive_status() {
        let (store, case) = seeded();
        reconcile(&store, &case, &[candidate(15, "Sentença")], ts(20)).unwrap();
        let case = store.case(case.id).unwrap().unwrap();

        let batch = [candidate(15, "Sentença"), candidate(5, "Citação")];
        let summary = reconcile(&store, &case, &batch, ts(21)).unwrap();
        assert_eq!(summary.new_movements, 1);
        assert_eq!(summary.latest_description.as_deref(), Some("Citação"));

        let case = store.case(case.id).unwrap().unwrap();
        assert_eq!(case.status.as_deref(), Some("Citação"));
        // Older than the stored value, so left alone.
        assert_eq!(case.updated_at, ts(15));
    }

    #[test]
    fn no_candidates_only_records_check() {
        let (store, case) = seeded();
        let summary = reconcile(&store, &case, &[], ts(20)).unwrap();
        assert_eq!(summary, ReconcileSummary::default());
        let after = store.case(case.id).unwrap().unwrap();
        assert_eq!(after.status, case.status);
        assert_eq!(after.updated_at, case.updated_at);
        assert_eq!(after.last_checked_at, Some(ts(20)));
    }

    #[test]
    fn duplicates_within_one_response_collapse() {
        let (store, case) = seeded();
        let batch = [candidate(10, "Juntada"), candidate(10, "Juntada")];
        assert_eq!(reconcile(&store, &case, &batch, ts(20)).unwrap().new_movements, 1);
    }

    #[test]
    fn same_text_different_time_is_distinct() {
        let (store, case) = seeded();
        let batch = [candidate(11, "Juntada"), candidate(10, "Juntada")];
        assert_eq!(reconcile(&store, &case, &batch, ts(20)).unwrap().new_movements, 2);
    }

    #[test]
    fn long_shared_prefix_is_treated_as_duplicate() {
        let (store, case) = seeded();
        let common = "x".repeat(DEDUP_PREFIX_CHARS);
        let first = format!("{common} first tail");
        let second = format!("{common} second tail");
        reconcile(&store, &case, &[candidate(10, &first)], ts(20)).unwrap();

        let case = store.case(case.id).unwrap().unwrap();
        let summary = reconcile(&store, &case, &[candidate(10, &second)], ts(21)).unwrap();
        assert_eq!(summary.new_movements, 0);
        assert_eq!(store.movements(case.id).unwrap()[0].description, first);
    }

    #[test]
    fn status_truncated_to_255_chars() {
        let (store, case) = seeded();
        let long = "é".repeat(400);
        let summary = reconcile(&store, &case, &[candidate(10, &long)], ts(20)).unwrap();
        assert_eq!(summary.latest_description.as_deref(), Some(long.as_str()));
        let status = store.case(case.id).unwrap().unwrap().status.unwrap();
        assert_eq!(status.chars().count(), STATUS_MAX_CHARS);
    }

    #[test]
    fn raw_payload_kept_verbatim() {
        let (store, case) = seeded();
        let c = candidate(10, "Distribuição");
        reconcile(&store, &case, std::slice::from_ref(&c), ts(20)).unwrap();
        assert_eq!(store.movements(case.id).unwrap()[0].raw_payload, c.raw);
    }
}
