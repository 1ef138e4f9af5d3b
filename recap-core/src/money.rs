//! Milliunit conversions.
//!
//! Every monetary value that leaves the extractor is an `i64` count of
//! milliunits (1/1000 of the major unit), the representation the ledger API
//! speaks natively.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

pub const MILLIUNITS_PER_UNIT: i64 = 1000;

/// Convert a decimal amount to milliunits, rounding half away from zero.
///
/// Returns `None` only when the value does not fit in an `i64`.
pub fn to_milliunits(amount: Decimal) -> Option<i64> {
    (amount * Decimal::from(MILLIUNITS_PER_UNIT))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Render milliunits as a fixed three-decimal string ("19.950").
pub fn format_milliunits(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let per = MILLIUNITS_PER_UNIT as u64;
    format!("{}{}.{:03}", sign, abs / per, abs % per)
}
