//! Receipt-level field lookups shared by the text and HTML paths.

use std::path::Path;

use chrono::NaiveDate;
use recap_core::{ParseError, SubscriptionLine};
use rust_decimal::Decimal;

use crate::amount::{has_currency_signal, last_amount, strip_last_amount};
use crate::patterns::{LineRole, classify_line, date_candidate_re, receipt_id_re};

/// Prefix of receipt ids synthesized from the document name.
pub const FALLBACK_RECEIPT_PREFIX: &str = "PDF-RECEIPT";

pub fn extract_receipt_id(lines: &[String], document: &str) -> String {
    lines
        .iter()
        .find_map(|line| receipt_id_re().captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| {
            let stem = Path::new(document)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| document.to_string());
            format!("{}-{}", FALLBACK_RECEIPT_PREFIX, stem)
        })
}

/// First date-shaped substring, in line order, that parses.
pub fn extract_date(lines: &[String], document: &str) -> Result<NaiveDate, ParseError> {
    lines
        .iter()
        .flat_map(|line| date_candidate_re().find_iter(line))
        .find_map(|m| parse_date(m.as_str()))
        .ok_or_else(|| ParseError::DateNotFound {
            document: document.to_string(),
        })
}

/// Parse `2026-02-12`, `2/12/2026`, `2/12/26`, `Feb 12, 2026` or `February 12, 2026`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Some((_, year)) = value.rsplit_once('/') {
        // chrono's %Y would also take a two-digit year, so pick the format by width.
        let format = match year.len() {
            2 => "%m/%d/%y",
            4 => "%m/%d/%Y",
            _ => return None,
        };
        return NaiveDate::parse_from_str(value, format).ok();
    }
    ["%b %d, %Y", "%B %d, %Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

pub fn extract_currency(lines: &[String], default_currency: &str) -> String {
    if lines.iter().any(|line| has_currency_signal(line)) {
        "USD".to_string()
    } else {
        default_currency.to_string()
    }
}

/// Last amount on the last line of the given role that carries one.
pub fn named_amount(lines: &[String], role: LineRole) -> Option<Decimal> {
    lines
        .iter()
        .rev()
        .filter(|line| classify_line(line) == role)
        .find_map(|line| last_amount(line))
}

/// Body lines that end in an amount, with the amount stripped off the description.
pub fn extract_line_items(lines: &[String]) -> Vec<SubscriptionLine> {
    lines
        .iter()
        .filter(|line| classify_line(line) == LineRole::Body)
        .filter_map(|line| {
            let amount = last_amount(line)?;
            let description = strip_last_amount(line).trim_matches(|c| c == ':' || c == '-' || c == ' ');
            if description.is_empty() {
                return None;
            }
            Some(SubscriptionLine::new(description, amount))
        })
        .collect()
}
