//! Largest-remainder tax apportionment.
//!
//! Each line gets `floor(|tax| * base / total_base)`; the leftover units go one
//! at a time to the lines with the largest fractional remainders, earlier lines
//! winning ties. The shares always sum to the tax exactly.

use rust_decimal::Decimal;

use crate::error::AllocationError;
use crate::models::{MatchedSubscription, SplitLine};
use crate::money::to_milliunits;

/// Split `tax_minor` across `bases_minor` in proportion to each base.
pub fn allocate_proportional(
    bases_minor: &[i64],
    tax_minor: i64,
) -> Result<Vec<i64>, AllocationError> {
    if bases_minor.is_empty() {
        return Err(AllocationError::NoLineItems);
    }
    if let Some((index, &base_minor)) = bases_minor.iter().enumerate().find(|(_, b)| **b < 0) {
        return Err(AllocationError::NegativeBaseAmount { index, base_minor });
    }

    let total_base: i128 = bases_minor.iter().map(|b| *b as i128).sum();
    if total_base == 0 {
        if tax_minor == 0 {
            return Ok(vec![0; bases_minor.len()]);
        }
        return Err(AllocationError::CannotAllocateZeroBase { tax_minor });
    }

    let sign: i128 = if tax_minor < 0 { -1 } else { 1 };
    let abs_tax = (tax_minor as i128).abs();

    let mut shares = Vec::with_capacity(bases_minor.len());
    let mut remainders = Vec::with_capacity(bases_minor.len());
    for (index, base) in bases_minor.iter().enumerate() {
        let numerator = abs_tax * (*base as i128);
        shares.push(numerator / total_base);
        remainders.push((index, numerator % total_base));
    }

    let allocated: i128 = shares.iter().sum();
    let leftover = (abs_tax - allocated) as usize;

    // sort_by is stable, so equal remainders keep their original order
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    for (index, _) in remainders.iter().take(leftover) {
        shares[*index] += 1;
    }

    // Each share is bounded by |tax_minor|, so the narrowing is lossless.
    Ok(shares.into_iter().map(|s| (s * sign) as i64).collect())
}

/// Convert matched subscriptions plus the receipt tax into split lines.
pub fn build_split_lines(
    matched: &[MatchedSubscription],
    tax_total: Decimal,
) -> Result<Vec<SplitLine>, AllocationError> {
    let bases = matched
        .iter()
        .map(|m| {
            to_milliunits(m.base_amount).ok_or_else(|| AllocationError::AmountOutOfRange {
                amount: m.base_amount.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let tax_minor = to_milliunits(tax_total).ok_or_else(|| AllocationError::AmountOutOfRange {
        amount: tax_total.to_string(),
    })?;

    let shares = allocate_proportional(&bases, tax_minor)?;

    Ok(matched
        .iter()
        .zip(bases)
        .zip(shares)
        .map(|((m, base_minor), tax_share)| SplitLine {
            description: m.description.clone(),
            base_minor,
            tax_minor: tax_share,
            total_minor: base_minor + tax_share,
            category_id: m.category_id.clone(),
            payee_id: m.payee_id.clone(),
            payee_name: m.payee_name.clone(),
            mapping_rule_id: m.mapping_rule_id.clone(),
        })
        .collect())
}
