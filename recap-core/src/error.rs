//! Error types for the receipt pipeline.
//!
//! All of these are permanent for the document that produced them: nothing in
//! this crate retries.

use thiserror::Error;

/// A document could not be turned into a `ParsedReceipt`.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{document}: unreadable document: {reason}")]
    UnreadableDocument { document: String, reason: String },

    #[error("{document}: unsupported receipt format '{extension}' (use .eml, .html, .txt or .pdf)")]
    UnsupportedFormat { document: String, extension: String },

    #[error("{document}: text extraction produced no usable lines")]
    EmptyDocument { document: String },

    #[error("{document}: could not parse receipt date")]
    DateNotFound { document: String },

    #[error("{document}: could not find tax total")]
    TaxNotFound { document: String },

    #[error("{document}: could not find grand total")]
    GrandTotalNotFound { document: String },

    #[error("{document}: could not identify subscription line items")]
    NoLineItemsFound { document: String },

    #[error("{document}: IO error: {source}")]
    Io {
        document: String,
        #[source]
        source: std::io::Error,
    },
}

impl ParseError {
    pub fn document(&self) -> &str {
        match self {
            ParseError::UnreadableDocument { document, .. }
            | ParseError::UnsupportedFormat { document, .. }
            | ParseError::EmptyDocument { document }
            | ParseError::DateNotFound { document }
            | ParseError::TaxNotFound { document }
            | ParseError::GrandTotalNotFound { document }
            | ParseError::NoLineItemsFound { document }
            | ParseError::Io { document, .. } => document,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MappingError {
    #[error("no mapping rule for: {}", .descriptions.join("; "))]
    UnmappedSubscription { descriptions: Vec<String> },

    #[error("fallback mapping is enabled but has no {missing} (and no default to use)")]
    FallbackMisconfigured { missing: &'static str },

    #[error("rule '{rule_id}' has an invalid regex pattern: {message}")]
    InvalidPattern { rule_id: String, message: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocationError {
    #[error("cannot allocate tax across zero line items")]
    NoLineItems,

    #[error("line item {index} has a negative base amount ({base_minor} milliunits)")]
    NegativeBaseAmount { index: usize, base_minor: i64 },

    #[error("cannot allocate non-zero tax ({tax_minor} milliunits) when the total base is zero")]
    CannotAllocateZeroBase { tax_minor: i64 },

    #[error("amount {amount} does not fit in milliunits")]
    AmountOutOfRange { amount: String },
}

/// Totals of an assembled transaction disagree with the source receipt.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("receipt {receipt_id}: split totals do not match grand total (split={split_total}, receipt={grand_total})")]
    SplitTotalMismatch {
        receipt_id: String,
        split_total: i64,
        grand_total: i64,
    },

    #[error("receipt {receipt_id}: parent amount mismatch (parent={parent_amount}, expected={expected})")]
    ParentAmountMismatch {
        receipt_id: String,
        parent_amount: i64,
        expected: i64,
    },

    #[error("receipt {receipt_id}: cannot build a transaction without split lines")]
    NoSplitLines { receipt_id: String },

    #[error("receipt {receipt_id}: grand total {amount} does not fit in milliunits")]
    GrandTotalOutOfRange { receipt_id: String, amount: String },
}
