//! Line classification tables.
//!
//! Every heuristic pattern lives here, compiled once. Line roles are resolved
//! by walking [`line_roles`] in order: the first set that matches decides.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};

/// What a cleaned receipt line represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRole {
    /// Carries the tax total (`tax`, `vat`).
    Tax,
    /// Carries the grand total (`grand total`, `amount charged`, `total`).
    Total,
    /// Subtotals, ids, balances, mail headers, pagination and print footers.
    Excluded,
    /// Anything else; a candidate line item when it ends in an amount.
    Body,
}

pub(crate) fn receipt_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:Order\s*ID|Document\s*(?:No|Number)|Receipt\s*ID|Invoice\s*ID)\s*[:#]?\s*([A-Z0-9\-]+)",
        )
        .expect("invalid receipt id regex")
    })
}

/// A bare label token such as `Order ID:` whose value sits in the next token.
pub(crate) fn receipt_id_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(order\s*id|receipt\s*id|invoice\s*id|document\s*(?:no|number)|document)\s*:?$")
            .expect("invalid receipt id label regex")
    })
}

pub(crate) fn date_candidate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|[A-Za-z]{3,9}\s+\d{1,2},\s+\d{4})\b")
            .expect("invalid date regex")
    })
}

fn tax_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new([r"(?i)\btax\b", r"(?i)\bvat\b"]).expect("invalid tax patterns"))
}

fn total_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)\bgrand\s*total\b",
            r"(?i)\bamount\s*charged\b",
            r"(?i)\btotal\b",
        ])
        .expect("invalid total patterns")
    })
}

fn excluded_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)\bsubtotal\b",
            r"(?i)\border\s*id\b",
            r"(?i)\binvoice\b",
            r"(?i)\bbalance\b",
            r"(?i)^(from|to|subject|sent|date|cc|bcc)\s*:",
            r"(?i)^on .+ wrote:$",
            r"(?i)^page\s+\d+\s+of\s+\d+",
            r"(?i)\bprinted by\b",
        ])
        .expect("invalid exclusion patterns")
    })
}

/// Mail-wrapper lines dropped from the top of a forwarded or printed receipt.
fn leading_noise_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)^(from|to|subject|sent|date|cc|bcc)\s*:",
            r"(?i)^on .+ wrote:$",
            r"(?i)^page\s+\d+\s+of\s+\d+",
            r"(?i)^sent from my",
        ])
        .expect("invalid noise patterns")
    })
}

fn section_hint_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            receipt_id_re().as_str(),
            r"(?i)\b(receipt|invoice|document\s*(?:no|number))\b",
            r"(?i)\b(apple|app\s*store|itunes)\b",
        ])
        .expect("invalid section hint patterns")
    })
}

/// Ordered (pattern set, role) pairs; earlier entries win.
pub fn line_roles() -> [(&'static RegexSet, LineRole); 3] {
    [
        (tax_set(), LineRole::Tax),
        (total_set(), LineRole::Total),
        (excluded_set(), LineRole::Excluded),
    ]
}

pub fn classify_line(line: &str) -> LineRole {
    line_roles()
        .into_iter()
        .find(|(set, _)| set.is_match(line))
        .map(|(_, role)| role)
        .unwrap_or(LineRole::Body)
}

pub fn is_leading_noise(line: &str) -> bool {
    line.starts_with('>') || leading_noise_set().is_match(line)
}

/// Could a receipt start on this line?
pub fn is_section_start(line: &str) -> bool {
    section_hint_set().is_match(line) && !leading_noise_set().is_match(line)
}

/// Secondary lines on subscription items that never name a plan.
pub const NOISE_TOKENS: [&str; 7] = ["hp-cell", "iphone", "ipad", "mac", "watch", "apple tv", "vision"];

pub fn is_subscription_noise(token: &str) -> bool {
    let lowered = token.trim().to_lowercase();
    lowered.starts_with("renews ") || NOISE_TOKENS.contains(&lowered.as_str())
}
