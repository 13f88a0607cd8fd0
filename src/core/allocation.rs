use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::LineItem;

/// Tolerance accepted per line between allocated shares and the residual
/// they were computed from.
pub const ALLOCATION_EPSILON: Decimal = dec!(0.01);

/// Distribute the gap between the lines' gross sum and the declared net
/// total across lines, proportionally to each line's total.
///
/// Sets `allocated_discount` on every line and returns the residual that was
/// distributed. A declared total at or above the gross sum yields no
/// discount; a zero gross sum yields zero on every line.
///
/// Shares keep full decimal precision; accumulated drift is not corrected.
pub fn allocate_discount(lines: &mut [LineItem], declared_net_total: Decimal) -> Decimal {
    let gross = saturating_sum(lines.iter().map(|l| l.total));
    if gross.is_zero() {
        for line in lines.iter_mut() {
            line.allocated_discount = Decimal::ZERO;
        }
        return Decimal::ZERO;
    }

    let remainder = gross.saturating_sub(declared_net_total).max(Decimal::ZERO);
    for line in lines.iter_mut() {
        line.allocated_discount = share(line.total, gross, remainder);
    }
    remainder
}

/// Distribute `freight` across lines, weighted by net cost grossed up by
/// the entry tax rate (percent).
///
/// Sets `freight_share` on every line and returns the freight distributed.
/// Non-positive freight, or lines with no net cost, clear every share.
pub fn allocate_freight(lines: &mut [LineItem], freight: Decimal, entry_tax_rate: Decimal) -> Decimal {
    let factor = Decimal::ONE.saturating_add(entry_tax_rate / dec!(100));
    let weights: Vec<Decimal> = lines
        .iter()
        .map(|l| l.net_cost().saturating_mul(factor).max(Decimal::ZERO))
        .collect();
    let total_weight = saturating_sum(weights.iter().copied());

    if freight <= Decimal::ZERO || total_weight.is_zero() {
        for line in lines.iter_mut() {
            line.freight_share = Decimal::ZERO;
        }
        return Decimal::ZERO;
    }

    for (line, weight) in lines.iter_mut().zip(weights) {
        line.freight_share = share(weight, total_weight, freight);
    }
    freight
}

fn saturating_sum(values: impl Iterator<Item = Decimal>) -> Decimal {
    values.fold(Decimal::ZERO, Decimal::saturating_add)
}

fn share(weight: Decimal, total_weight: Decimal, amount: Decimal) -> Decimal {
    // multiply first; dividing first loses precision on small weights
    match weight.checked_mul(amount) {
        Some(product) => product / total_weight,
        None => weight / total_weight * amount,
    }
}
