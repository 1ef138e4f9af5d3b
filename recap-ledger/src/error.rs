//! Ledger API failures, the retry classification over them, and per-document
//! processing errors.

use recap_core::{AllocationError, MappingError, ParseError, ValidationError};
use thiserror::Error;

/// A call to the remote ledger failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerApiError {
    #[error("{operation}: could not reach ledger: {message}")]
    Connectivity {
        operation: String,
        message: String,
        timeout: bool,
    },

    #[error("{operation}: ledger API returned {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation}: unexpected ledger response: {message}")]
    Decode { operation: String, message: String },

    #[error("{operation}: ledger response carried no transaction id")]
    MissingTransactionId { operation: String },
}

impl LedgerApiError {
    pub fn operation(&self) -> &str {
        match self {
            LedgerApiError::Connectivity { operation, .. }
            | LedgerApiError::Status { operation, .. }
            | LedgerApiError::Decode { operation, .. }
            | LedgerApiError::MissingTransactionId { operation } => operation,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            LedgerApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when a failed write may still have been applied by the server.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            LedgerApiError::Connectivity { .. } => true,
            LedgerApiError::Status { status, .. } => *status >= 500,
            LedgerApiError::Decode { .. } | LedgerApiError::MissingTransactionId { .. } => true,
        }
    }
}

/// The closed set of failures worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    Timeout,
    Connection,
    RequestTimeout,
    TooEarly,
    RateLimited,
    InternalError,
    BadGateway,
    Unavailable,
    GatewayTimeout,
}

impl RetryCause {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            408 => Some(RetryCause::RequestTimeout),
            425 => Some(RetryCause::TooEarly),
            429 => Some(RetryCause::RateLimited),
            500 => Some(RetryCause::InternalError),
            502 => Some(RetryCause::BadGateway),
            503 => Some(RetryCause::Unavailable),
            504 => Some(RetryCause::GatewayTimeout),
            _ => None,
        }
    }

    /// The server rejected the request before acting on it.
    pub fn request_not_processed(&self) -> bool {
        matches!(
            self,
            RetryCause::RequestTimeout | RetryCause::TooEarly | RetryCause::RateLimited
        )
    }
}

/// Map an error to its retry cause, or `None` when it must propagate as is.
pub fn classify(error: &LedgerApiError) -> Option<RetryCause> {
    match error {
        LedgerApiError::Connectivity { timeout: true, .. } => Some(RetryCause::Timeout),
        LedgerApiError::Connectivity { timeout: false, .. } => Some(RetryCause::Connection),
        LedgerApiError::Status { status, .. } => RetryCause::from_status(*status),
        LedgerApiError::Decode { .. } | LedgerApiError::MissingTransactionId { .. } => None,
    }
}

/// Like [`classify`], narrowed for calls that must not be repeated once the
/// server may have applied them.
pub fn classify_non_idempotent(error: &LedgerApiError) -> Option<RetryCause> {
    classify(error).filter(RetryCause::request_not_processed)
}

/// Why one document was not reconciled. Each variant names the document or
/// receipt so a batch report can be read line by line.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{document}: {source}")]
    Mapping {
        document: String,
        #[source]
        source: MappingError,
    },

    #[error("{document}: {source}")]
    Allocation {
        document: String,
        #[source]
        source: AllocationError,
    },

    #[error("{document}: {source}")]
    Validation {
        document: String,
        #[source]
        source: ValidationError,
    },

    #[error("{document}: ledger lookup failed, no actions were taken: {source}")]
    SnapshotUnavailable {
        document: String,
        #[source]
        source: LedgerApiError,
    },

    #[error("receipt {receipt_id}: create may or may not have been applied, check the ledger before re-running: {source}")]
    AmbiguousCreate {
        receipt_id: String,
        #[source]
        source: LedgerApiError,
    },

    #[error("receipt {receipt_id}: ledger rejected the transaction: {source}")]
    CreateRejected {
        receipt_id: String,
        #[source]
        source: LedgerApiError,
    },

    #[error("receipt {receipt_id}: {source}")]
    Ledger {
        receipt_id: String,
        #[source]
        source: LedgerApiError,
    },

    #[error("receipt {receipt_id}: still a duplicate after {attempts} re-import ids")]
    ReimportExhausted { receipt_id: String, attempts: u32 },
}

impl ProcessError {
    pub fn is_unmapped(&self) -> bool {
        matches!(
            self,
            ProcessError::Mapping {
                source: MappingError::UnmappedSubscription { .. },
                ..
            }
        )
    }
}
