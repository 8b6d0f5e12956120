//! Fixed-Point Math
//!
//! 18-decimal fixed-point helpers over U256. Every ratio/price product goes
//! through `mul_div`, which widens to U512 before dividing so intermediate
//! products never overflow.
//!
//! Created: 2026-10-19

use alloy::primitives::{U256, U512};

/// 1e18, the fixed-point scale for ratios and prices
pub const ONE18: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Number of decimals of the fixed-point scale
pub const SCALE_DECIMALS: u8 = 18;

/// 10^exp as U256 (exp <= 77)
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// (a * b) / c computed in 512 bits. Saturates at U256::MAX, returns zero when c is zero.
pub fn mul_div(a: U256, b: U256, c: U256) -> U256 {
    if c.is_zero() {
        return U256::ZERO;
    }
    let wide = U512::from(a) * U512::from(b) / U512::from(c);
    if wide > U512::from(U256::MAX) {
        U256::MAX
    } else {
        wide.to::<U256>()
    }
}

/// a * b / 1e18
pub fn mul18(a: U256, b: U256) -> U256 {
    mul_div(a, b, ONE18)
}

/// a * 1e18 / b
pub fn div18(a: U256, b: U256) -> U256 {
    mul_div(a, ONE18, b)
}

/// Scale a token amount with `decimals` decimals to 18 decimals
pub fn scale_to_18(amount: U256, decimals: u8) -> U256 {
    match decimals.cmp(&SCALE_DECIMALS) {
        std::cmp::Ordering::Equal => amount,
        std::cmp::Ordering::Less => amount.saturating_mul(pow10(SCALE_DECIMALS - decimals)),
        std::cmp::Ordering::Greater => amount / pow10(decimals - SCALE_DECIMALS),
    }
}

/// Scale an 18-decimal amount down (or up) to a token's `decimals`
pub fn scale_from_18(amount: U256, decimals: u8) -> U256 {
    match decimals.cmp(&SCALE_DECIMALS) {
        std::cmp::Ordering::Equal => amount,
        std::cmp::Ordering::Less => amount / pow10(SCALE_DECIMALS - decimals),
        std::cmp::Ordering::Greater => amount.saturating_mul(pow10(decimals - SCALE_DECIMALS)),
    }
}

/// Render an 18-decimal fixed-point value as an exact decimal string.
///
/// No exponent notation, trailing fractional zeros stripped, no trailing dot:
/// `10e18 -> "10"`, `1.5e18 -> "1.5"`, `1 -> "0.000000000000000001"`.
/// The output is embedded in guard programs that are re-parsed remotely,
/// so this format is a fixed contract.
pub fn format_units_18(value: U256) -> String {
    let digits = value.to_string();
    let scale = SCALE_DECIMALS as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

/// Parse a decimal string ("1.5", "10", "0.003") into 18-decimal fixed point
pub fn parse_units_18(value: &str) -> Option<U256> {
    let value = value.trim();
    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, f),
        None => (value, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > SCALE_DECIMALS as usize
        || !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let int_value = if int_part.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(int_part, 10).ok()?
    };
    let frac_padded = format!("{:0<width$}", frac_part, width = SCALE_DECIMALS as usize);
    let frac_value = U256::from_str_radix(&frac_padded, 10).ok()?;
    int_value.checked_mul(ONE18)?.checked_add(frac_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_units_exact() {
        assert_eq!(format_units_18(ONE18 * U256::from(10)), "10");
        assert_eq!(format_units_18(U256::from(1_500_000_000_000_000_000u128)), "1.5");
        assert_eq!(format_units_18(U256::from(1)), "0.000000000000000001");
        assert_eq!(format_units_18(U256::ZERO), "0");
        assert_eq!(
            format_units_18(U256::from(123_456_789_000_000_000_000_000u128)),
            "123456.789"
        );
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units_18("10"), Some(ONE18 * U256::from(10)));
        assert_eq!(parse_units_18("0.5"), Some(ONE18 / U256::from(2)));
        assert_eq!(parse_units_18(".25"), Some(ONE18 / U256::from(4)));
        assert_eq!(parse_units_18("1e18"), None);
        assert_eq!(parse_units_18("0.0000000000000000001"), None);
        assert_eq!(parse_units_18(""), None);
    }

    #[test]
    fn test_mul_div_widens() {
        // product overflows 256 bits but the quotient fits
        let big = U256::MAX / U256::from(2);
        assert_eq!(mul_div(big, U256::from(4), U256::from(4)), big);
        assert_eq!(mul_div(U256::MAX, U256::from(2), U256::from(1)), U256::MAX);
        assert_eq!(mul_div(U256::from(5), U256::from(5), U256::ZERO), U256::ZERO);
    }

    #[test]
    fn test_decimal_scaling() {
        let usdc = U256::from(2_500_000u64); // 2.5 USDC
        let scaled = scale_to_18(usdc, 6);
        assert_eq!(scaled, U256::from(2_500_000_000_000_000_000u128));
        assert_eq!(scale_from_18(scaled, 6), usdc);
        assert_eq!(scale_to_18(U256::from(7), 18), U256::from(7));
        assert_eq!(scale_to_18(U256::from(1000), 20), U256::from(10));
    }

    #[test]
    fn test_fixed_point_products() {
        let two = ONE18 * U256::from(2);
        let half = ONE18 / U256::from(2);
        assert_eq!(mul18(two, half), ONE18);
        assert_eq!(div18(ONE18, two), half);
    }
}
