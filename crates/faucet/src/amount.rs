//! Exact conversion between human decimal amounts and smallest-unit integers.

use crate::error::{FaucetError, FaucetResult};
use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Maximum decimals accepted for a token. Anything larger cannot fit a
/// meaningful amount into 256 bits.
pub const MAX_DECIMALS: u32 = 77;

fn pow10(exp: u32) -> BigUint {
    let mut value = BigUint::one();
    let ten = BigUint::from(10u8);
    for _ in 0..exp {
        value *= &ten;
    }
    value
}

/// Scales a decimal string such as `"0.5"` or `"100"` by `10^decimals`.
///
/// Fails when the string carries more fractional digits than `decimals`
/// allows, or when the result does not fit in 256 bits.
pub fn parse_units(amount: &str, decimals: u32) -> FaucetResult<BigUint> {
    if decimals > MAX_DECIMALS {
        return Err(FaucetError::InvalidAmount(format!(
            "unsupported decimals: {}",
            decimals
        )));
    }

    let amount = amount.trim();
    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(FaucetError::InvalidAmount(format!("empty amount: '{}'", amount)));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FaucetError::InvalidAmount(format!("not a decimal number: '{}'", amount)));
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals as usize {
        return Err(FaucetError::InvalidAmount(format!(
            "'{}' has more than {} fractional digits",
            amount, decimals
        )));
    }

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    digits.push_str(fraction);
    for _ in fraction.len()..decimals as usize {
        digits.push('0');
    }

    let value = if digits.trim_start_matches('0').is_empty() {
        BigUint::zero()
    } else {
        BigUint::parse_bytes(digits.as_bytes(), 10)
            .ok_or_else(|| FaucetError::InvalidAmount(format!("not a decimal number: '{}'", amount)))?
    };

    if value.bits() > 256 {
        return Err(FaucetError::InvalidAmount(format!("'{}' overflows uint256", amount)));
    }
    Ok(value)
}

/// Renders a smallest-unit integer with `places` fractional digits,
/// truncating the rest.
pub fn format_units(value: &BigUint, decimals: u32, places: u32) -> String {
    let scale = pow10(decimals);
    let whole = value / &scale;
    let remainder = value % &scale;

    if places == 0 {
        return whole.to_string();
    }

    let mut fraction = format!("{:0>width$}", remainder.to_string(), width = decimals as usize);
    fraction.truncate(places as usize);
    while fraction.len() < places as usize {
        fraction.push('0');
    }
    format!("{}.{}", whole, fraction)
}

/// Big-endian 32-byte ABI word for a uint256 value.
pub fn to_word(value: &BigUint) -> FaucetResult<[u8; 32]> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return Err(FaucetError::InvalidAmount(format!("{} overflows uint256", value)));
    }
    let mut word = [0u8; 32];
    if !value.is_zero() {
        word[32 - bytes.len()..].copy_from_slice(&bytes);
    }
    Ok(word)
}

/// Minimal big-endian bytes, empty for zero, as RLP expects for integers.
pub fn to_quantity_bytes(value: &BigUint) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_bytes_be()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_amount_scaled_exactly() {
        assert_eq!(parse_units("100", 6).unwrap(), BigUint::from(100_000_000u64));
        assert_eq!(parse_units("100", 18).unwrap(), BigUint::from(100u32) * pow10(18));
    }

    #[test]
    fn test_fractional_amounts() {
        assert_eq!(parse_units("0.5", 18).unwrap(), BigUint::from(5u32) * pow10(17));
        assert_eq!(parse_units("1.000001", 6).unwrap(), BigUint::from(1_000_001u64));
        assert_eq!(parse_units("2.50", 1).unwrap(), BigUint::from(25u32));
        assert_eq!(parse_units(".25", 2).unwrap(), BigUint::from(25u32));
        assert_eq!(parse_units("0", 18).unwrap(), BigUint::zero());
    }

    #[test]
    fn test_large_amount_has_no_float_drift() {
        // 123456789.123456789123456789 has 27 significant digits, beyond f64
        let value = parse_units("123456789.123456789123456789", 18).unwrap();
        assert_eq!(value.to_string(), "123456789123456789123456789");
    }

    #[test]
    fn test_rejects_unrepresentable_amounts() {
        assert!(parse_units("0.0000001", 6).is_err());
        assert!(parse_units("-1", 6).is_err());
        assert!(parse_units("1e6", 6).is_err());
        assert!(parse_units("", 6).is_err());
        assert!(parse_units(".", 6).is_err());
        assert!(parse_units("1", 78).is_err());
    }

    #[test]
    fn test_rejects_uint256_overflow() {
        let huge = "1".repeat(80);
        assert!(parse_units(&huge, 0).is_err());
    }

    #[test]
    fn test_format_units() {
        let balance = parse_units("1234.56789", 18).unwrap();
        assert_eq!(format_units(&balance, 18, 6), "1234.567890");
        assert_eq!(format_units(&balance, 18, 2), "1234.56");
        assert_eq!(format_units(&BigUint::from(5u32), 6, 2), "0.00");
        assert_eq!(format_units(&BigUint::from(1_500_000u32), 6, 0), "1");
    }

    #[test]
    fn test_word_and_quantity_encoding() {
        let word = to_word(&BigUint::from(0x0102u32)).unwrap();
        assert_eq!(&word[..30], &[0u8; 30]);
        assert_eq!(&word[30..], &[0x01, 0x02]);
        assert_eq!(to_word(&BigUint::zero()).unwrap(), [0u8; 32]);

        assert!(to_quantity_bytes(&BigUint::zero()).is_empty());
        assert_eq!(to_quantity_bytes(&BigUint::from(256u32)), vec![0x01, 0x00]);
    }
}
