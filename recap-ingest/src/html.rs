//! HTML receipt extraction.
//!
//! Ids and dates come from `<p>` tokens and the flattened text. Items and
//! totals come from dedicated regions of the raw markup: subscription lockup
//! tables and the payment-information block. Receipts in the older table
//! layout (`td.item-cell` / `td.price-cell` rows) are read with a DOM walk.

use std::sync::OnceLock;

use recap_core::{ParseError, ParsedReceipt, SubscriptionLine};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::amount::last_amount;
use crate::fields::{extract_currency, extract_date, extract_receipt_id};
use crate::normalize::{clean_lines, clean_text, html_to_plain_text, p_text_tokens};
use crate::patterns::{is_subscription_noise, receipt_id_label_re};

const TAX_LABELS: &[&str] = &["tax"];
const SUBTOTAL_LABELS: &[&str] = &["subtotal"];
const GRAND_TOTAL_LABELS: &[&str] = &["total", "order total", "amount charged", "charged"];

fn lockup_table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<table[^>]*class="[^"]*subscription-lockup__container[^"]*"[^>]*>(.*?)</table>"#)
            .expect("invalid lockup table regex")
    })
}

fn payment_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<div[^>]*class="[^"]*payment-information[^"]*"[^>]*>"#)
            .expect("invalid payment section regex")
    })
}

fn footer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<div\s+id="footer_section""#).expect("invalid footer regex"))
}

fn selector(cell: &'static OnceLock<Selector>, css: &str) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("invalid selector"))
}

fn tr_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "tr")
}

fn cell_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "td, th")
}

fn item_cell_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "td.item-cell")
}

fn price_cell_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "td.price-cell")
}

fn title_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "span.title")
}

fn addon_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(&SEL, "span.addon-duration")
}

fn element_text(el: ElementRef) -> String {
    clean_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// Lines used for id, date and currency lookup.
///
/// A bare label token (`Order ID:`) is also emitted joined with its value token.
fn metadata_lines(body_html: &str) -> Vec<String> {
    let tokens = p_text_tokens(body_html);
    let mut lines = tokens.clone();
    for pair in tokens.windows(2) {
        if receipt_id_label_re().is_match(&pair[0]) {
            lines.push(format!("{} {}", pair[0], pair[1]));
        }
    }
    lines.extend(clean_lines(&html_to_plain_text(body_html)));
    lines
}

/// `"<product> - <plan>"`, where the plan is the first later token that is not noise.
pub fn compose_description<S: AsRef<str>>(tokens: &[S]) -> Option<String> {
    let (first, rest) = tokens.split_first()?;
    let product = first.as_ref();
    match rest.iter().map(|t| t.as_ref()).find(|t| !is_subscription_noise(t)) {
        Some(plan) => Some(format!("{} - {}", product, plan)),
        None => Some(product.to_string()),
    }
}

fn lockup_subscriptions(body_html: &str) -> Vec<SubscriptionLine> {
    lockup_table_re()
        .captures_iter(body_html)
        .filter_map(|caps| {
            let tokens = p_text_tokens(caps.get(1)?.as_str());
            let amount = tokens.iter().rev().find_map(|t| last_amount(t))?;
            let description_tokens: Vec<&String> =
                tokens.iter().filter(|t| last_amount(t).is_none()).collect();
            let description = compose_description(description_tokens.as_slice())?;
            Some(SubscriptionLine::new(description, amount))
        })
        .collect()
}

fn item_cell_subscriptions(doc: &Html) -> Vec<SubscriptionLine> {
    let mut items = Vec::new();
    for row in doc.select(tr_selector()) {
        let Some(item_cell) = row.select(item_cell_selector()).next() else {
            continue;
        };
        if item_cell.value().classes().any(|c| c == "aapl-mobile-cell") {
            continue;
        }
        let Some(amount) = row
            .select(price_cell_selector())
            .next()
            .and_then(|cell| last_amount(&element_text(cell)))
        else {
            continue;
        };
        let Some(title) = item_cell
            .select(title_selector())
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
        else {
            continue;
        };

        let mut tokens = vec![title];
        tokens.extend(item_cell.select(addon_selector()).map(element_text));
        if let Some(description) = compose_description(tokens.as_slice()) {
            items.push(SubscriptionLine::new(description, amount));
        }
    }
    items
}

/// The amount that follows a label token, stopping at the next `Label:` token.
pub fn find_amount_after_label(tokens: &[String], labels: &[&str]) -> Option<Decimal> {
    tokens.iter().enumerate().find_map(|(idx, token)| {
        let lowered = token.trim().to_lowercase();
        if !labels.contains(&lowered.trim_end_matches(':')) {
            return None;
        }
        for candidate in &tokens[idx + 1..] {
            if let Some(amount) = last_amount(candidate) {
                return Some(amount);
            }
            if candidate.trim().ends_with(':') {
                break;
            }
        }
        None
    })
}

/// `<p>` tokens of the payment-information block, up to the footer or the end of the document.
fn payment_section_tokens(body_html: &str) -> Option<Vec<String>> {
    let start = payment_section_re().find(body_html)?;
    let end = footer_re()
        .find_at(body_html, start.end())
        .map(|m| m.start())
        .unwrap_or(body_html.len());
    Some(p_text_tokens(&body_html[start.start()..end]))
}

/// Cell texts of every table row, in document order.
fn table_row_tokens(doc: &Html) -> Vec<String> {
    doc.select(tr_selector())
        .flat_map(|row| row.select(cell_selector()).map(element_text).collect::<Vec<_>>())
        .filter(|t| !t.is_empty())
        .collect()
}

fn totals_from_tokens(tokens: &[String]) -> (Option<Decimal>, Option<Decimal>) {
    let tax = find_amount_after_label(tokens, TAX_LABELS);
    let subtotal = find_amount_after_label(tokens, SUBTOTAL_LABELS);
    let grand = find_amount_after_label(tokens, GRAND_TOTAL_LABELS)
        .or_else(|| tokens.iter().rev().find_map(|t| last_amount(t)));

    let tax = match (tax, subtotal, grand) {
        (Some(tax), _, _) => Some(tax),
        (None, Some(subtotal), Some(grand)) => Some((grand - subtotal).round_dp(2)),
        _ => None,
    };
    (tax, grand)
}

pub fn parse_receipt_html(
    body_html: &str,
    document: &str,
    default_currency: &str,
) -> Result<ParsedReceipt, ParseError> {
    let lines = metadata_lines(body_html);
    let receipt_id = extract_receipt_id(&lines, document);
    let receipt_date = extract_date(&lines, document)?;

    let mut dom = None;
    let mut subscriptions = lockup_subscriptions(body_html);
    if subscriptions.is_empty() {
        let doc = dom.get_or_insert_with(|| Html::parse_document(body_html));
        subscriptions = item_cell_subscriptions(doc);
        debug!(document, items = subscriptions.len(), "no lockup tables, read item-cell rows");
    }
    if subscriptions.is_empty() {
        return Err(ParseError::NoLineItemsFound {
            document: document.to_string(),
        });
    }

    let (tax_total, grand_total) = match payment_section_tokens(body_html) {
        Some(tokens) => totals_from_tokens(&tokens),
        None => {
            let doc = dom.get_or_insert_with(|| Html::parse_document(body_html));
            totals_from_tokens(&table_row_tokens(doc))
        }
    };
    let tax_total = tax_total.ok_or_else(|| ParseError::TaxNotFound {
        document: document.to_string(),
    })?;
    let grand_total = grand_total.ok_or_else(|| ParseError::GrandTotalNotFound {
        document: document.to_string(),
    })?;

    Ok(ParsedReceipt {
        source_id: document.to_string(),
        receipt_id,
        receipt_date,
        currency: extract_currency(&lines, default_currency),
        subscriptions,
        tax_total,
        grand_total,
        raw_text: body_html.to_string(),
    })
}
