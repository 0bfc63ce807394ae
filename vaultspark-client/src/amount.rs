//! Decimal amount <-> base unit conversion
//!
//! The contract is always called in base units. Decimal strings entered by the
//! user are scaled by the token's precision; digits beyond that precision are
//! truncated toward zero.

use ethers::types::U256;

/// Scale a decimal string (e.g. "1.5") into base units for `decimals` precision
pub fn to_base_units(amount: &str, decimals: u8) -> Result<U256, String> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err("Amount is empty".to_string());
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(format!("Invalid decimal amount: {}", amount));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Invalid decimal amount: {}", amount));
    }

    let precision = decimals as usize;
    let mut frac: String = frac_part.chars().take(precision).collect();
    if frac_part.len() > precision {
        log::debug!(
            "[amount] Truncating {} to {} decimal places",
            amount,
            precision
        );
    }
    while frac.len() < precision {
        frac.push('0');
    }

    let digits = format!("{}{}", int_part, frac);
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }

    U256::from_dec_str(digits).map_err(|e| format!("Amount out of range: {} - {:?}", amount, e))
}

/// Render base units back to the shortest decimal string ("1500000000000000000", 18 -> "1.5")
pub fn from_base_units(value: U256, decimals: u8) -> String {
    let precision = decimals as usize;
    let raw = value.to_string();
    if precision == 0 {
        return raw;
    }

    let padded = if raw.len() <= precision {
        format!("{}{}", "0".repeat(precision - raw.len() + 1), raw)
    } else {
        raw
    };

    let (int_part, frac_part) = padded.split_at(padded.len() - precision);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

/// Parse decimal or hex strings to U256
/// Do NOT use str.parse::<U256>() - it treats strings as hex!
pub fn parse_u256(s: &str) -> Result<U256, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() {
            return Ok(U256::zero());
        }
        U256::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex: {} - {}", s, e))
    } else {
        U256::from_dec_str(s).map_err(|e| format!("Invalid decimal: {} - {:?}", s, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn test_to_base_units() {
        assert_eq!(
            to_base_units("1.5", 18).unwrap(),
            U256::from(1_500_000_000_000_000_000u64)
        );
        assert_eq!(to_base_units("10", 18).unwrap(), eth(10));
        assert_eq!(to_base_units("0.000001", 6).unwrap(), U256::from(1u64));
        assert_eq!(to_base_units(".5", 2).unwrap(), U256::from(50u64));
        assert_eq!(to_base_units("7.", 2).unwrap(), U256::from(700u64));
        assert_eq!(to_base_units("0", 18).unwrap(), U256::zero());
        assert_eq!(to_base_units("  2  ", 0).unwrap(), U256::from(2u64));
    }

    #[test]
    fn test_excess_precision_truncates_toward_zero() {
        assert_eq!(to_base_units("1.239", 2).unwrap(), U256::from(123u64));
        assert_eq!(to_base_units("0.0000009", 6).unwrap(), U256::zero());
    }

    #[test]
    fn test_to_base_units_rejects_garbage() {
        assert!(to_base_units("", 18).is_err());
        assert!(to_base_units(".", 18).is_err());
        assert!(to_base_units("-1", 18).is_err());
        assert!(to_base_units("1e18", 18).is_err());
        assert!(to_base_units("1.2.3", 18).is_err());
        assert!(to_base_units("abc", 18).is_err());
    }

    #[test]
    fn test_from_base_units() {
        assert_eq!(from_base_units(U256::from(1_500_000_000_000_000_000u64), 18), "1.5");
        assert_eq!(from_base_units(eth(150), 18), "150");
        assert_eq!(from_base_units(U256::from(1u64), 6), "0.000001");
        assert_eq!(from_base_units(U256::zero(), 18), "0");
        assert_eq!(from_base_units(U256::from(42u64), 0), "42");
    }

    #[test]
    fn test_round_trip_at_full_precision() {
        for input in ["1.5", "0.000000000000000001", "123456.789", "100"] {
            let base = to_base_units(input, 18).unwrap();
            assert_eq!(from_base_units(base, 18), input);
        }
    }

    #[test]
    fn test_parse_u256_decimal_not_hex() {
        // 0.001 ETH in wei must not be read as 0x1000000000000000
        let parsed = parse_u256("1000000000000000").unwrap();
        assert_eq!(parsed, U256::from(1_000_000_000_000_000u64));
        assert_ne!(parsed, U256::from(0x1000000000000000u64));
    }

    #[test]
    fn test_parse_u256_hex() {
        assert_eq!(parse_u256("0x50d95").unwrap(), U256::from(331157u64));
        assert_eq!(parse_u256("0X50D95").unwrap(), U256::from(331157u64));
        assert_eq!(parse_u256("0x0").unwrap(), U256::zero());
        assert!(parse_u256("0xGGG").is_err());
        assert!(parse_u256("-1").is_err());
    }
}
