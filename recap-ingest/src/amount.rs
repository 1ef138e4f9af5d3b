//! Currency amount tokens: `[-+]?$?1,234.56` or `[-+]?$?1234.56`.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

pub(crate) fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<amount>[-+]?\$?\d{1,3}(?:,\d{3})*(?:\.\d{2})|[-+]?\$?\d+\.\d{2})")
            .expect("invalid amount regex")
    })
}

fn currency_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\s?\d{1,3}(?:,\d{3})*(?:\.\d{2})").expect("invalid currency amount regex")
    })
}

/// Parse an amount token, dropping `$`, thousands separators and a leading `+`.
///
/// Malformed numerals yield `None` rather than an error.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.chars().filter(|c| *c != '$' && *c != ',').collect();
    let cleaned = cleaned.trim();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(cleaned);
    Decimal::from_str(cleaned).ok()
}

/// The last amount token on the line, if any.
pub fn last_amount(line: &str) -> Option<Decimal> {
    amount_re()
        .find_iter(line)
        .last()
        .and_then(|m| parse_amount(m.as_str()))
}

/// Line text up to the start of its last amount token.
pub fn strip_last_amount(line: &str) -> &str {
    match amount_re().find_iter(line).last() {
        Some(m) => &line[..m.start()],
        None => line,
    }
}

/// True when the line shows a dollar sign or a `$`-formatted amount.
pub fn has_currency_signal(line: &str) -> bool {
    line.contains('$') || currency_amount_re().is_match(line)
}
