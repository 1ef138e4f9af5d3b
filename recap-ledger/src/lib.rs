//! recap-ledger: ledger client, retry, and reconciliation of assembled
//! transactions against existing entries

pub mod client;
pub mod entry;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod ynab;

pub use client::{EntryUpdate, Ledger};
pub use entry::{ClearedState, LedgerEntry, RawEntry, TransactionDetail, normalize_entries, normalize_entry};
pub use error::{LedgerApiError, ProcessError, RetryCause, classify, classify_non_idempotent};
pub use pipeline::{
    Action, BatchReport, DocumentResult, FailedDelete, FixedSuffixes, MAX_REIMPORT_ATTEMPTS, Pipeline,
    PipelineSettings, Prepared, ProcessOutcome, RandomSuffix, SuffixSource, reimport_receipt_id,
};
pub use reconcile::{Decision, DedupKey, LedgerSnapshot, ReconcilePolicy, decide};
pub use retry::{RetryPolicy, with_retry};
pub use ynab::{YnabClient, YnabSettings};
