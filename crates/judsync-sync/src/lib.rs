//! Sync layer: DataJud query client, movement normalisation, reconciliation, batch runner.

pub mod http;
pub mod normalize;
pub mod reconcile;
pub mod runner;

pub use http::{DataJudClient, ProcessSource, QueryError, QueryOutcome};
pub use normalize::{CandidateMovement, Normalized, ParseWarning, normalize};
pub use reconcile::{ReconcileSummary, reconcile};
pub use runner::{BatchReport, CheckOutcome, CheckReport, SyncRunner};
