//! Ledger transaction assembly and total validation.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ValidationError;
use crate::models::{MappingConfig, ParsedReceipt, SplitLine};
use crate::money::to_milliunits;

pub const CLEARED: &str = "cleared";
pub const RECEIPT_MEMO_PREFIX: &str = "Receipt: ";

/// One line of a split transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubTransaction {
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_name: Option<String>,
    pub category_id: String,
}

/// Assembled ledger transaction, serialized in the ledger's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionCandidate {
    pub account_id: String,
    pub date: NaiveDate,
    pub cleared: String,
    pub approved: bool,
    /// Signed milliunits; negative for an expense.
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_color: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtransactions: Vec<SubTransaction>,
}

impl TransactionCandidate {
    pub fn is_split(&self) -> bool {
        !self.subtransactions.is_empty()
    }

    /// Point the memo at a different receipt id (used for forced re-imports).
    pub fn relabel(&mut self, receipt_id: &str) {
        self.memo = Some(receipt_memo(receipt_id));
    }
}

pub fn receipt_memo(receipt_id: &str) -> String {
    format!("{}{}", RECEIPT_MEMO_PREFIX, receipt_id)
}

/// Fallback color when any line was resolved through the fallback, else the default color.
pub fn resolve_flag_color(config: &MappingConfig, split_lines: &[SplitLine]) -> Option<String> {
    let fallback_color = config
        .fallback
        .as_ref()
        .and_then(|f| f.flag_color.clone());
    if let Some(color) = fallback_color {
        if split_lines.iter().any(|l| l.used_fallback()) {
            return Some(color);
        }
    }
    config.defaults.flag_color.clone()
}

fn grand_total_minor(receipt: &ParsedReceipt) -> Result<i64, ValidationError> {
    to_milliunits(receipt.grand_total).ok_or_else(|| ValidationError::GrandTotalOutOfRange {
        receipt_id: receipt.receipt_id.clone(),
        amount: receipt.grand_total.to_string(),
    })
}

/// Build a flat transaction for one line, or a split parent for several.
pub fn assemble_transaction(
    receipt: &ParsedReceipt,
    split_lines: &[SplitLine],
    config: &MappingConfig,
) -> Result<TransactionCandidate, ValidationError> {
    if split_lines.is_empty() {
        return Err(ValidationError::NoSplitLines {
            receipt_id: receipt.receipt_id.clone(),
        });
    }

    let sign = if grand_total_minor(receipt)? >= 0 { -1 } else { 1 };
    let mut candidate = TransactionCandidate {
        account_id: config.defaults.account_id.clone(),
        date: receipt.receipt_date,
        cleared: CLEARED.to_string(),
        approved: false,
        amount: 0,
        payee_id: None,
        payee_name: None,
        category_id: None,
        memo: Some(receipt_memo(&receipt.receipt_id)),
        flag_color: resolve_flag_color(config, split_lines),
        subtransactions: Vec::new(),
    };

    if let [line] = split_lines {
        candidate.amount = sign * line.total_minor.abs();
        candidate.payee_id = line.payee_id.clone();
        candidate.payee_name = Some(line.payee_name.clone());
        candidate.category_id = Some(line.category_id.clone());
        return Ok(candidate);
    }

    candidate.subtransactions = split_lines
        .iter()
        .map(|line| SubTransaction {
            amount: sign * line.total_minor.abs(),
            payee_id: line.payee_id.clone(),
            payee_name: Some(line.payee_name.clone()),
            category_id: line.category_id.clone(),
        })
        .collect();
    candidate.amount = candidate.subtransactions.iter().map(|s| s.amount).sum();
    candidate.payee_name = Some(config.defaults.split_payee_name.clone());
    Ok(candidate)
}

/// Check split and parent totals against the receipt before anything is posted.
pub fn validate_totals(
    receipt: &ParsedReceipt,
    split_lines: &[SplitLine],
    candidate: &TransactionCandidate,
) -> Result<(), ValidationError> {
    let split_total: i64 = split_lines.iter().map(|l| l.total_minor).sum();
    let grand_total = grand_total_minor(receipt)?;

    if split_total != grand_total {
        return Err(ValidationError::SplitTotalMismatch {
            receipt_id: receipt.receipt_id.clone(),
            split_total,
            grand_total,
        });
    }

    let expected = if grand_total >= 0 {
        -split_total.abs()
    } else {
        split_total.abs()
    };
    if candidate.amount != expected {
        return Err(ValidationError::ParentAmountMismatch {
            receipt_id: receipt.receipt_id.clone(),
            parent_amount: candidate.amount,
            expected,
        });
    }
    Ok(())
}
