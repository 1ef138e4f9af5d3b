//! Plain-text receipt extraction (mail text parts and PDF text).
//!
//! Forwarded or printed receipts carry mail headers, quoted replies and print
//! footers around the actual receipt. Leading wrapper lines are dropped first,
//! then the lines are narrowed to the first window that looks like a receipt.

use recap_core::{ParseError, ParsedReceipt};
use tracing::debug;

use crate::amount::last_amount;
use crate::fields::{extract_currency, extract_date, extract_line_items, extract_receipt_id, named_amount};
use crate::normalize::clean_lines;
use crate::patterns::{LineRole, classify_line, is_leading_noise, is_section_start};

const MAX_LEADING_NOISE_LINES: usize = 80;
const MIN_LINES_FOR_FOCUS: usize = 6;
const SECTION_START_SCAN_LINES: usize = 240;
const SECTION_WINDOW_LINES: usize = 160;
const SECTION_FOOTER_BUFFER_LINES: usize = 12;

/// Drop the leading run of mail-wrapper lines.
pub fn strip_leading_noise(lines: &[String]) -> &[String] {
    let limit = lines.len().min(MAX_LEADING_NOISE_LINES);
    let skip = lines[..limit]
        .iter()
        .take_while(|line| is_leading_noise(line))
        .count();
    &lines[skip..]
}

fn is_total_line(line: &str) -> bool {
    classify_line(line) == LineRole::Total && last_amount(line).is_some()
}

fn window_looks_like_receipt(window: &[String]) -> bool {
    let amount_lines = window.iter().filter(|l| last_amount(l).is_some()).count();
    amount_lines >= 3
        && named_amount(window, LineRole::Tax).is_some()
        && named_amount(window, LineRole::Total).is_some()
}

/// Narrow `lines` to the first window that looks like a receipt, or return them all.
pub fn focus_receipt_section(lines: &[String]) -> &[String] {
    if lines.len() < MIN_LINES_FOR_FOCUS {
        return lines;
    }

    let scan = lines.len().min(SECTION_START_SCAN_LINES);
    for start in (0..scan).filter(|&i| is_section_start(&lines[i])) {
        let window_end = lines.len().min(start + SECTION_WINDOW_LINES);
        let window = &lines[start..window_end];
        if !window_looks_like_receipt(window) {
            continue;
        }

        let end = match window.iter().rposition(|l| is_total_line(l)) {
            Some(offset) => lines.len().min(start + offset + SECTION_FOOTER_BUFFER_LINES),
            None => window_end,
        };
        debug!(start, end, total = lines.len(), "focused receipt section");
        return &lines[start..end];
    }

    lines
}

/// Extract every receipt field from already-focused lines.
pub(crate) fn extract_from_lines(
    lines: &[String],
    raw_text: &str,
    document: &str,
    default_currency: &str,
) -> Result<ParsedReceipt, ParseError> {
    let receipt_id = extract_receipt_id(lines, document);
    let receipt_date = extract_date(lines, document)?;
    let currency = extract_currency(lines, default_currency);

    let tax_total = named_amount(lines, LineRole::Tax);
    let grand_total = named_amount(lines, LineRole::Total).ok_or_else(|| {
        ParseError::GrandTotalNotFound {
            document: document.to_string(),
        }
    })?;
    let tax_total = tax_total.ok_or_else(|| ParseError::TaxNotFound {
        document: document.to_string(),
    })?;

    let subscriptions = extract_line_items(lines);
    if subscriptions.is_empty() {
        return Err(ParseError::NoLineItemsFound {
            document: document.to_string(),
        });
    }

    Ok(ParsedReceipt {
        source_id: document.to_string(),
        receipt_id,
        receipt_date,
        currency,
        subscriptions,
        tax_total,
        grand_total,
        raw_text: raw_text.to_string(),
    })
}

pub fn parse_receipt_text(
    text: &str,
    document: &str,
    default_currency: &str,
) -> Result<ParsedReceipt, ParseError> {
    let lines = clean_lines(text);
    if lines.is_empty() {
        return Err(ParseError::EmptyDocument {
            document: document.to_string(),
        });
    }

    let lines = focus_receipt_section(strip_leading_noise(&lines));
    extract_from_lines(lines, text, document, default_currency)
}
