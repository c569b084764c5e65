//! DuckDB storage for cases and their DataJud movement history.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use judsync_core::{Case, CaseId, Movement, ProcessNumber};
use tracing::{debug, info};

use crate::{CaseChangeset, CaseStore, MovementStore, ReconcileStore, StoreError};

const SCHEMA: &str = "
    CREATE SEQUENCE IF NOT EXISTS case_id_seq START 1;
    CREATE SEQUENCE IF NOT EXISTS movement_id_seq START 1;
    CREATE TABLE IF NOT EXISTS cases (
        id BIGINT PRIMARY KEY DEFAULT nextval('case_id_seq'),
        process_number VARCHAR,
        status VARCHAR,
        updated_at_us BIGINT NOT NULL,
        last_checked_at_us BIGINT
    );
    CREATE TABLE IF NOT EXISTS movements (
        id BIGINT PRIMARY KEY DEFAULT nextval('movement_id_seq'),
        case_id BIGINT NOT NULL,
        occurred_at_us BIGINT NOT NULL,
        description VARCHAR NOT NULL,
        raw_payload VARCHAR NOT NULL,
        recorded_at_us BIGINT NOT NULL
    );
";

const CASE_COLUMNS: &str = "id, process_number, status, updated_at_us, last_checked_at_us";
const MOVEMENT_COLUMNS: &str =
    "id, case_id, occurred_at_us, description, raw_payload, recorded_at_us";

type CaseRow = (i64, Option<String>, Option<String>, i64, Option<i64>);
type MovementRow = (i64, i64, i64, String, String, i64);

/// DuckDB-backed [`ReconcileStore`].
///
/// Timestamps are stored as UTC microseconds since the epoch so equality
/// lookups on `occurred_at` are exact. `raw_payload` is JSON text.
///
/// Tests run against [`open`](Self::open); the CLI keeps its case history in
/// a single database file through [`open_persistent`](Self::open_persistent).
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Open an in-memory DuckDB database with the schema created.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened case store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Register a never-checked case for `number`.
    ///
    /// The number is stored trimmed so SQL filters and [`ProcessNumber::is_blank`]
    /// agree; a blank number is stored as NULL.
    pub fn insert_case(&self, number: &ProcessNumber) -> Result<Case, StoreError> {
        let now = Utc::now();
        let number = number.trimmed();
        let conn = self.lock()?;
        let id: i64 = conn.query_row(
            "INSERT INTO cases (process_number, updated_at_us) VALUES (?, ?) RETURNING id",
            params![number.as_ref().map(ProcessNumber::as_str), now.timestamp_micros()],
            |row| row.get(0),
        )?;
        debug!(case_id = id, process_number = ?number, "registered case");
        Ok(Case {
            id,
            process_number: number,
            status: None,
            updated_at: from_micros(now.timestamp_micros())?,
            last_checked_at: None,
        })
    }

    /// Number of rows in the `movements` table.
    pub fn movement_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT count(*)::BIGINT FROM movements", [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }
}

impl CaseStore for DuckStore {
    fn case(&self, id: CaseId) -> Result<Option<Case>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?"))?;
        let rows = stmt
            .query_map(params![id], case_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().next().map(case_from_row).transpose()
    }

    fn case_by_number(&self, number: &ProcessNumber) -> Result<Option<Case>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CASE_COLUMNS} FROM cases WHERE process_number = ? ORDER BY id LIMIT 1"
        ))?;
        let rows = stmt
            .query_map(params![number.as_str().trim()], case_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().next().map(case_from_row).transpose()
    }

    fn stale_cases(
        &self,
        checked_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Case>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CASE_COLUMNS} FROM cases
             WHERE process_number IS NOT NULL AND process_number <> ''
               AND (last_checked_at_us IS NULL OR last_checked_at_us < ?)
             ORDER BY last_checked_at_us ASC NULLS FIRST, id ASC
             LIMIT ?"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    checked_before.timestamp_micros(),
                    i64::try_from(limit).unwrap_or(i64::MAX)
                ],
                case_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(case_from_row).collect()
    }

    fn touch_checked(&self, id: CaseId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let at = at.timestamp_micros();
        let updated = conn.execute(
            "UPDATE cases SET last_checked_at_us = greatest(coalesce(last_checked_at_us, ?), ?)
             WHERE id = ?",
            params![at, at, id],
        )?;
        if updated == 0 {
            return Err(StoreError::CaseNotFound(id));
        }
        Ok(())
    }
}

impl MovementStore for DuckStore {
    fn find_movement(
        &self,
        case_id: CaseId,
        occurred_at: DateTime<Utc>,
        description_prefix: &str,
    ) -> Result<Option<Movement>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements
             WHERE case_id = ? AND occurred_at_us = ? AND starts_with(description, ?)
             ORDER BY id
             LIMIT 1"
        ))?;
        let rows = stmt
            .query_map(
                params![case_id, occurred_at.timestamp_micros(), description_prefix],
                movement_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().next().map(movement_from_row).transpose()
    }

    fn movements(&self, case_id: CaseId) -> Result<Vec<Movement>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements
             WHERE case_id = ?
             ORDER BY occurred_at_us DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![case_id], movement_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(movement_from_row).collect()
    }
}

impl ReconcileStore for DuckStore {
    fn commit(&self, changeset: &CaseChangeset) -> Result<Vec<Movement>, StoreError> {
        let mut conn = self.lock()?;
        // Dropping `tx` without commit rolls everything back.
        let tx = conn.transaction()?;
        let case_id = changeset.case_id;
        let checked_at = changeset.checked_at.timestamp_micros();

        let exists: i64 = tx.query_row(
            "SELECT count(*)::BIGINT FROM cases WHERE id = ?",
            params![case_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::CaseNotFound(case_id));
        }

        let mut inserted = Vec::with_capacity(changeset.movements.len());
        for new in &changeset.movements {
            let payload = serde_json::to_string(&new.raw_payload)?;
            let id: i64 = tx.query_row(
                "INSERT INTO movements
                     (case_id, occurred_at_us, description, raw_payload, recorded_at_us)
                 VALUES (?, ?, ?, ?, ?)
                 RETURNING id",
                params![
                    case_id,
                    new.occurred_at.timestamp_micros(),
                    new.description.as_str(),
                    payload,
                    checked_at
                ],
                |row| row.get(0),
            )?;
            inserted.push(Movement {
                id,
                case_id,
                occurred_at: new.occurred_at,
                description: new.description.clone(),
                raw_payload: new.raw_payload.clone(),
                recorded_at: changeset.checked_at,
            });
        }

        if let Some(status) = &changeset.status {
            tx.execute(
                "UPDATE cases SET status = ? WHERE id = ?",
                params![status.as_str(), case_id],
            )?;
        }
        if let Some(updated_at) = changeset.updated_at {
            let us = updated_at.timestamp_micros();
            tx.execute(
                "UPDATE cases SET updated_at_us = ? WHERE id = ? AND updated_at_us < ?",
                params![us, case_id, us],
            )?;
        }
        tx.execute(
            "UPDATE cases SET last_checked_at_us = greatest(coalesce(last_checked_at_us, ?), ?)
             WHERE id = ?",
            params![checked_at, checked_at, case_id],
        )?;

        tx.commit()?;
        debug!(case_id, inserted = inserted.len(), "committed changeset");
        Ok(inserted)
    }
}

fn case_row(row: &duckdb::Row<'_>) -> duckdb::Result<CaseRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn movement_row(row: &duckdb::Row<'_>) -> duckdb::Result<MovementRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn case_from_row(
    (id, process_number, status, updated_at, last_checked_at): CaseRow,
) -> Result<Case, StoreError> {
    Ok(Case {
        id,
        process_number: process_number.map(ProcessNumber::new),
        status,
        updated_at: from_micros(updated_at)?,
        last_checked_at: last_checked_at.map(from_micros).transpose()?,
    })
}

fn movement_from_row(
    (id, case_id, occurred_at, description, raw_payload, recorded_at): MovementRow,
) -> Result<Movement, StoreError> {
    Ok(Movement {
        id,
        case_id,
        occurred_at: from_micros(occurred_at)?,
        description,
        raw_payload: serde_json::from_str(&raw_payload)?,
        recorded_at: from_micros(recorded_at)?,
    })
}

fn from_micros(us: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| StoreError::Other(format!("timestamp out of range: {us}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewMovement;
    use chrono::{Duration, TimeZone};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 10, 0, 0).unwrap()
    }

    fn number() -> ProcessNumber {
        ProcessNumber::new("0001234-56.2023.8.26.0100")
    }

    fn one_movement(case_id: CaseId, day: u32, desc: &str, checked: u32) -> CaseChangeset {
        CaseChangeset {
            case_id,
            movements: vec![NewMovement {
                occurred_at: ts(day),
                description: desc.into(),
                raw_payload: serde_json::json!({"dataHora": ts(day).to_rfc3339()}),
            }],
            status: Some(desc.into()),
            updated_at: Some(ts(day)),
            checked_at: ts(checked),
        }
    }

    #[test]
    fn open_in_memory_has_no_rows() {
        let store = DuckStore::open().unwrap();
        assert_eq!(store.movement_count().unwrap(), 0);
        assert!(store.case(1).unwrap().is_none());
    }

    #[test]
    fn insert_and_read_case() {
        let store = DuckStore::open().unwrap();
        let case = store.insert_case(&number()).unwrap();
        let read = store.case(case.id).unwrap().unwrap();
        assert_eq!(read, case);
        assert!(read.last_checked_at.is_none());
    }

    #[test]
    fn lookup_by_number() {
        let store = DuckStore::open().unwrap();
        assert!(store.case_by_number(&number()).unwrap().is_none());
        let first = store.insert_case(&number()).unwrap();
        store.insert_case(&number()).unwrap();
        let found = store
            .case_by_number(&ProcessNumber::new(" 0001234-56.2023.8.26.0100"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn stale_cases_nulls_first_then_oldest() {
        let store = DuckStore::open().unwrap();
        let now = ts(20);
        let a = store.insert_case(&number()).unwrap();
        let b = store.insert_case(&number()).unwrap();
        let c = store.insert_case(&number()).unwrap();
        let d = store.insert_case(&ProcessNumber::new("  ")).unwrap();
        store.touch_checked(a.id, now - Duration::days(2)).unwrap();
        store.touch_checked(b.id, now - Duration::days(4)).unwrap();

        let ids: Vec<CaseId> = store
            .stale_cases(now - Duration::days(1), 10)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
        assert!(!ids.contains(&d.id));
        assert_eq!(store.stale_cases(now, 1).unwrap().len(), 1);
    }

    #[test]
    fn whitespace_only_numbers_are_never_selected() {
        let store = DuckStore::open().unwrap();
        let tab = store.insert_case(&ProcessNumber::new("\t\u{a0}\n")).unwrap();
        assert!(tab.process_number.is_none());
        let padded = store
            .insert_case(&ProcessNumber::new("\t0001234-56.2023.8.26.0100\n"))
            .unwrap();

        let due = store.stale_cases(ts(20), 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, padded.id);
        assert_eq!(due[0].process_number, Some(number()));
        assert!(store.case(tab.id).unwrap().unwrap().process_number.is_none());
    }

    #[test]
    fn unbounded_limit_selects_everything() {
        let store = DuckStore::open().unwrap();
        store.insert_case(&number()).unwrap();
        store.insert_case(&number()).unwrap();
        assert_eq!(store.stale_cases(ts(20), usize::MAX).unwrap().len(), 2);
    }

    #[test]
    fn touch_checked_monotonic_and_missing() {
        let store = DuckStore::open().unwrap();
        let case = store.insert_case(&number()).unwrap();
        store.touch_checked(case.id, ts(10)).unwrap();
        store.touch_checked(case.id, ts(3)).unwrap();
        assert_eq!(
            store.case(case.id).unwrap().unwrap().last_checked_at,
            Some(ts(10))
        );
        assert!(matches!(
            store.touch_checked(999, ts(1)),
            Err(StoreError::CaseNotFound(999))
        ));
    }

    #[test]
    fn commit_and_prefix_lookup() {
        let store = DuckStore::open().unwrap();
        let case = store.insert_case(&number()).unwrap();
        let inserted = store
            .commit(&one_movement(case.id, 10, "Distribuição | por sorteio", 15))
            .unwrap();
        assert_eq!(inserted.len(), 1);

        let hit = store
            .find_movement(case.id, ts(10), "Distribuição")
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, inserted[0].id);
        assert_eq!(hit.raw_payload, inserted[0].raw_payload);
        assert!(store.find_movement(case.id, ts(11), "Distribuição").unwrap().is_none());
        assert!(store.find_movement(case.id + 1, ts(10), "Distribuição").unwrap().is_none());

        let row = store.case(case.id).unwrap().unwrap();
        assert_eq!(row.status.as_deref(), Some("Distribuição | por sorteio"));
        assert_eq!(row.updated_at, ts(10).max(case.updated_at));
        assert_eq!(row.last_checked_at, Some(ts(15)));
    }

    #[test]
    fn commit_missing_case_rolls_back() {
        let store = DuckStore::open().unwrap();
        assert!(matches!(
            store.commit(&one_movement(77, 1, "x", 2)),
            Err(StoreError::CaseNotFound(77))
        ));
        assert_eq!(store.movement_count().unwrap(), 0);
    }

    #[test]
    fn movements_listed_newest_first() {
        let store = DuckStore::open().unwrap();
        let case = store.insert_case(&number()).unwrap();
        store.commit(&one_movement(case.id, 3, "a", 20)).unwrap();
        store.commit(&one_movement(case.id, 9, "b", 20)).unwrap();
        store.commit(&one_movement(case.id, 9, "c", 20)).unwrap();
        let descs: Vec<String> = store
            .movements(case.id)
            .unwrap()
            .into_iter()
            .map(|m| m.description)
            .collect();
        assert_eq!(descs, vec!["c", "b", "a"]);
    }

    #[test]
    fn persistent_reopen_keeps_history() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("judsync.duckdb");

        let store = DuckStore::open_persistent(&db_path).unwrap();
        let case = store.insert_case(&number()).unwrap();
        store.commit(&one_movement(case.id, 10, "Distribuição", 11)).unwrap();
        drop(store);

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert_eq!(store.movement_count().unwrap(), 1);
        assert_eq!(
            store.case(case.id).unwrap().unwrap().status.as_deref(),
            Some("Distribuição")
        );
    }
}
