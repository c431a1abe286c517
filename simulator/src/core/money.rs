//! Integer-cent money arithmetic.
//!
//! Every monetary field, parameter, and cost accumulator in the engine is
//! an i64 number of cents. Floating point never participates in
//! settlement, cost, or policy comparisons on money; ratio parameters are
//! converted to cents at the two functions in this module, which truncate
//! toward zero.

/// Signed 64-bit integer cents.
pub type Cents = i64;

/// Scale an amount by a basis-point rate, truncating toward zero.
///
/// `scale_by_bps(amount, bps) == amount * bps / 10_000` computed in
/// 128-bit to avoid intermediate overflow.
///
/// # Example
/// ```
/// use rtgs_sim_core::core::money::scale_by_bps;
///
/// assert_eq!(scale_by_bps(20_000, 500), 1_000); // 5% of 20_000c
/// assert_eq!(scale_by_bps(999, 1), 0);          // truncates
/// ```
pub fn scale_by_bps(amount: Cents, bps: i64) -> Cents {
    ((amount as i128) * (bps as i128) / 10_000) as Cents
}

/// Convert a ratio in `[0, 1]` applied to an integer-cent base into
/// cents, truncating toward zero.
///
/// This is the single conversion point for ratio parameters such as
/// `liquidity_allocation_fraction`.
///
/// # Example
/// ```
/// use rtgs_sim_core::core::money::allocate_fraction;
///
/// assert_eq!(allocate_fraction(0.5, 1_000_001), 500_000);
/// assert_eq!(allocate_fraction(0.0, 1_000_000), 0);
/// assert_eq!(allocate_fraction(1.0, 1_000_000), 1_000_000);
/// ```
pub fn allocate_fraction(fraction: f64, base: Cents) -> Cents {
    (fraction * base as f64).trunc() as Cents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_by_bps_truncates_toward_zero() {
        assert_eq!(scale_by_bps(10_000, 1), 1);
        assert_eq!(scale_by_bps(9_999, 1), 0);
        assert_eq!(scale_by_bps(-9_999, 1), 0);
        assert_eq!(scale_by_bps(-10_000, 1), -1);
    }

    #[test]
    fn test_scale_by_bps_no_overflow_on_large_amounts() {
        // i64::MAX cents at 10_000 bps would overflow a 64-bit intermediate
        let amount = i64::MAX / 2;
        assert_eq!(scale_by_bps(amount, 10_000), amount);
    }

    #[test]
    fn test_allocate_fraction_truncates() {
        assert_eq!(allocate_fraction(0.333, 100), 33);
        assert_eq!(allocate_fraction(0.999, 100), 99);
    }
}
