//! Batch runner and single-case entry point.
//!
//! The runner walks stale cases one at a time: query DataJud, normalise the
//! response, reconcile it into the store. Cases are processed sequentially
//! with a fixed pause between them to stay under the upstream rate limit.
//! A failure in one case never stops the batch.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use judsync_core::{BatchConfig, Case, CaseId, Movement, ProcessNumber};
use judsync_store::{CaseChangeset, ReconcileStore, StoreError};
use serde::Serialize;
use tracing::{Instrument, error, info, info_span, warn};

use crate::http::{ProcessSource, QueryError};
use crate::normalize::{Normalized, normalize};
use crate::reconcile::{ReconcileSummary, reconcile};

/// Counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// The run was skipped because the batch is disabled.
    pub disabled: bool,
    /// The run stopped before processing any case (configuration or store failure).
    pub aborted: bool,
    pub selected: usize,
    /// Cases handled to completion, including those DataJud answered with an error.
    pub processed: usize,
    /// Cases whose DataJud query failed (transport, upstream, resolution).
    pub query_errors: usize,
    /// Cases that hit an unexpected error and were rolled back.
    pub failed: usize,
    pub new_movements: usize,
    /// Throttling pauses taken between cases.
    pub pauses: usize,
}

/// Result of a user-triggered check of one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    CaseNotFound(CaseId),
    /// No case tracks this process number.
    NotTracked(ProcessNumber),
    NoProcessNumber,
    Unresolvable { reason: String },
    /// Connection failure or timeout.
    Unavailable { status: u16, reason: String },
    /// DataJud (or our own configuration) refused the query.
    Rejected {
        status: u16,
        reason: String,
        detail: Option<String>,
    },
    NoData,
    NoMovements,
    Updated(ReconcileSummary),
    Failed { reason: String },
}

impl CheckOutcome {
    pub fn status(&self) -> u16 {
        match self {
            Self::CaseNotFound(_) | Self::NotTracked(_) => 404,
            Self::NoProcessNumber | Self::Unresolvable { .. } => 400,
            Self::Unavailable { status, .. } | Self::Rejected { status, .. } => *status,
            Self::NoData | Self::NoMovements | Self::Updated(_) => 200,
            Self::Failed { .. } => 500,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::CaseNotFound(id) => format!("case {id} not found"),
            Self::NotTracked(number) => format!("no case tracks process {number}"),
            Self::NoProcessNumber => "case has no process number to look up".into(),
            Self::Unresolvable { reason } => {
                format!("could not identify the tribunal for this process number: {reason}")
            }
            Self::Unavailable { .. } => {
                "DataJud is unavailable or did not answer in time, try again later".into()
            }
            Self::Rejected { reason, .. } => format!("DataJud query failed: {reason}"),
            Self::NoData => "no process data found on DataJud for this number".into(),
            Self::NoMovements => "process found on DataJud, but without movement details".into(),
            Self::Updated(s) if s.new_movements > 0 => {
                format!("case updated, {} new movement(s) recorded", s.new_movements)
            }
            Self::Updated(_) => "no new movements found".into(),
            Self::Failed { reason } => {
                format!("internal error while recording DataJud data: {reason}")
            }
        }
    }

    pub fn new_movements(&self) -> usize {
        match self {
            Self::Updated(s) => s.new_movements,
            _ => 0,
        }
    }

    pub fn latest_description(&self) -> Option<&str> {
        match self {
            Self::Updated(s) => s.latest_description.as_deref(),
            _ => None,
        }
    }

    pub fn report(&self) -> CheckReport {
        CheckReport {
            message: self.message(),
            status: self.status(),
            new_movements: self.new_movements(),
            latest_description: self.latest_description().map(str::to_string),
            detail: match self {
                Self::Rejected { detail, .. } => detail.clone(),
                _ => None,
            },
        }
    }
}

/// Flat, serialisable view of a [`CheckOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub message: String,
    pub status: u16,
    pub new_movements: usize,
    pub latest_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

enum CaseSync {
    NoHits,
    NoMovements,
    Reconciled(ReconcileSummary),
}

/// Drives DataJud reconciliation over an injected store and process source.
pub struct SyncRunner<S: ?Sized, Q: ?Sized> {
    store: Arc<S>,
    source: Arc<Q>,
    config: BatchConfig,
}

impl<S, Q> SyncRunner<S, Q>
where
    S: ReconcileStore + ?Sized,
    Q: ProcessSource + ?Sized,
{
    pub fn new(store: Arc<S>, source: Arc<Q>, config: BatchConfig) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run one reconciliation batch over the stalest cases.
    ///
    /// Never panics or returns an error: every failure is logged and counted
    /// in the report.
    pub async fn run_batch(&self) -> BatchReport {
        let tz = self.config.timezone;
        let started = Utc::now();
        let mut report = BatchReport::default();

        if !self.config.enabled {
            info!(at = %started.with_timezone(&tz), "DataJud batch disabled, skipping run");
            report.disabled = true;
            return report;
        }
        if let Err(e) = self.source.ready() {
            error!(fatal = true, error = %e, "DataJud batch cannot start");
            report.aborted = true;
            return report;
        }

        let run = AssertUnwindSafe(self.run_selected(started, &mut report))
            .catch_unwind()
            .await;
        if report.aborted {
            return report;
        }
        if let Err(panic) = run {
            error!(
                fatal = true,
                error = %panic_message(panic.as_ref()),
                "DataJud batch crashed, run ended early"
            );
            report.aborted = true;
            return report;
        }

        info!(
            at = %Utc::now().with_timezone(&tz),
            selected = report.selected,
            processed = report.processed,
            query_errors = report.query_errors,
            failed = report.failed,
            new_movements = report.new_movements,
            "DataJud batch finished"
        );
        report
    }

    async fn run_selected(&self, started: DateTime<Utc>, report: &mut BatchReport) {
        info!(
            at = %started.with_timezone(&self.config.timezone),
            interval_secs = self.config.interval().as_secs(),
            staleness_days = self.config.staleness_days,
            max_cases = self.config.max_cases_per_run,
            "starting DataJud batch"
        );

        let cutoff = started - self.config.staleness();
        let cases = match self.store.stale_cases(cutoff, self.config.max_cases_per_run) {
            Ok(cases) => cases,
            Err(e) => {
                error!(fatal = true, error = %e, "could not select cases, batch aborted");
                report.aborted = true;
                return;
            }
        };
        report.selected = cases.len();
        info!(selected = cases.len(), "cases due for a DataJud check");

        for (i, case) in cases.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.delay()).await;
                report.pauses += 1;
            }
            self.run_one(case, report).await;
        }
    }

    async fn run_one(&self, case: &Case, report: &mut BatchReport) {
        let number = case
            .process_number
            .as_ref()
            .map(|n| n.as_str().to_string())
            .unwrap_or_default();
        let span = info_span!("case", case_id = case.id, process_number = %number);

        let result = AssertUnwindSafe(self.batch_case(case).instrument(span))
            .catch_unwind()
            .await;
        let failure = match result {
            Ok(Ok(None)) => {
                report.processed += 1;
                report.query_errors += 1;
                return;
            }
            Ok(Ok(Some(summary))) => {
                report.processed += 1;
                report.new_movements += summary.new_movements;
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        report.failed += 1;
        error!(
            case_id = case.id,
            process_number = %number,
            error = %failure,
            "case failed, its changes were rolled back"
        );
        // One extra attempt only; a case that keeps failing here is retried by the next run.
        if let Err(e) = self.store.touch_checked(case.id, Utc::now()) {
            error!(
                case_id = case.id,
                process_number = %number,
                error = %e,
                "could not record check attempt after failure"
            );
        }
    }

    /// `Ok(None)` when DataJud could not be queried; the attempt is still recorded.
    async fn batch_case(&self, case: &Case) -> Result<Option<ReconcileSummary>, StoreError> {
        info!("checking case");
        let Some(number) = case.process_number() else {
            self.store.touch_checked(case.id, Utc::now())?;
            return Ok(None);
        };

        let outcome = self.source.query(number).await;
        if let Some(e) = &outcome.error {
            error!(status = outcome.status, error = %e, "DataJud query failed");
            self.store.touch_checked(case.id, Utc::now())?;
            return Ok(None);
        }

        Ok(Some(match self.sync_payload(case, &outcome.payload)? {
            CaseSync::Reconciled(summary) => summary,
            CaseSync::NoHits | CaseSync::NoMovements => ReconcileSummary::default(),
        }))
    }

    /// Reconcile one case on demand.
    ///
    /// Unlike the batch, a failed query writes nothing.
    pub async fn check_case(&self, case_id: CaseId) -> CheckOutcome {
        match self.store.case(case_id) {
            Ok(Some(case)) => self.check(case).await,
            Ok(None) => {
                info!(case_id, "check requested for unknown case");
                CheckOutcome::CaseNotFound(case_id)
            }
            Err(e) => {
                error!(case_id, error = %e, "could not load case");
                CheckOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Reconcile the case tracking `number`, as [`check_case`](Self::check_case).
    pub async fn check_process(&self, number: &ProcessNumber) -> CheckOutcome {
        if number.is_blank() {
            return CheckOutcome::NoProcessNumber;
        }
        match self.store.case_by_number(number) {
            Ok(Some(case)) => self.check(case).await,
            Ok(None) => {
                info!(process_number = %number, "check requested for untracked process");
                CheckOutcome::NotTracked(number.clone())
            }
            Err(e) => {
                error!(process_number = %number, error = %e, "could not load case");
                CheckOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn check(&self, case: Case) -> CheckOutcome {
        let case_id = case.id;
        let Some(number) = case.process_number() else {
            info!(case_id, "case has no process number");
            return CheckOutcome::NoProcessNumber;
        };

        info!(case_id, process_number = %number, "checking case on demand");
        let outcome = self.source.query(number).await;
        if let Some(e) = outcome.error {
            error!(case_id, process_number = %number, status = outcome.status, error = %e, "DataJud query failed");
            return match e {
                QueryError::Resolution(r) => CheckOutcome::Unresolvable {
                    reason: r.to_string(),
                },
                e if e.is_transport() => CheckOutcome::Unavailable {
                    status: outcome.status,
                    reason: e.to_string(),
                },
                e => CheckOutcome::Rejected {
                    status: outcome.status,
                    reason: e.to_string(),
                    detail: outcome.payload.get("detail").and_then(|d| d.as_str()).map(str::to_string),
                },
            };
        }

        match self.sync_payload(&case, &outcome.payload) {
            Ok(CaseSync::NoHits) => CheckOutcome::NoData,
            Ok(CaseSync::NoMovements) => CheckOutcome::NoMovements,
            Ok(CaseSync::Reconciled(summary)) => {
                info!(case_id, new_movements = summary.new_movements, "case check complete");
                CheckOutcome::Updated(summary)
            }
            Err(e) => {
                error!(case_id, process_number = %number, error = %e, "could not record DataJud data");
                CheckOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Stored movements of a case, newest first.
    pub fn movements(&self, case_id: CaseId) -> Result<Vec<Movement>, StoreError> {
        if self.store.case(case_id)?.is_none() {
            return Err(StoreError::CaseNotFound(case_id));
        }
        self.store.movements(case_id)
    }

    fn sync_payload(
        &self,
        case: &Case,
        payload: &serde_json::Value,
    ) -> Result<CaseSync, StoreError> {
        let now = Utc::now();
        match normalize(payload) {
            Normalized::NoHits => {
                info!(case_id = case.id, "DataJud has no record of this process");
                self.store.commit(&CaseChangeset::checked(case.id, now))?;
                Ok(CaseSync::NoHits)
            }
            Normalized::NoMovements => {
                warn!(case_id = case.id, "DataJud record has no movement list");
                self.store.commit(&CaseChangeset::checked(case.id, now))?;
                Ok(CaseSync::NoMovements)
            }
            Normalized::Movements(candidates) => Ok(CaseSync::Reconciled(reconcile(
                &*self.store,
                case,
                &candidates,
                now,
            )?)),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
