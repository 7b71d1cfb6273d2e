//! Resource quantities
//!
//! Converts Kubernetes quantity strings (`"1G"`, `"10Gi"`, `"1.5Ti"`) to
//! byte counts and back.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parse a storage quantity into bytes.
///
/// Decimal suffixes are powers of 1000, binary suffixes powers of 1024.
/// Fractional byte counts round up, the same way the API server reports
/// a quantity's integer value.
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty quantity".into()));
    }

    // Find where the number ends and the suffix begins
    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num_str, suffix) = s.split_at(num_end);

    let multiplier: u64 = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "Ei" => 1 << 60,
        _ => return Err(Error::CapacityParse(format!("unknown suffix in {:?}", s))),
    };

    let (int_str, frac_str) = num_str.split_once('.').unwrap_or((num_str, ""));
    if int_str.is_empty() && frac_str.is_empty() {
        return Err(Error::CapacityParse(format!("invalid number in {:?}", s)));
    }
    if frac_str.contains('.') {
        return Err(Error::CapacityParse(format!("invalid number in {:?}", s)));
    }

    let overflow = || Error::CapacityParse(format!("quantity {:?} overflows", s));
    let invalid = || Error::CapacityParse(format!("invalid number in {:?}", s));

    let int_part: u64 = if int_str.is_empty() {
        0
    } else {
        int_str.parse().map_err(|_| invalid())?
    };
    let mut bytes = int_part.checked_mul(multiplier).ok_or_else(overflow)?;

    if !frac_str.is_empty() {
        let digits = u32::try_from(frac_str.len()).map_err(|_| invalid())?;
        let scale = 10u128.checked_pow(digits).ok_or_else(invalid)?;
        let frac: u128 = frac_str.parse().map_err(|_| invalid())?;
        let scaled = frac
            .checked_mul(u128::from(multiplier))
            .ok_or_else(overflow)?;
        let frac_bytes = u64::try_from(scaled.div_ceil(scale)).map_err(|_| overflow())?;
        bytes = bytes.checked_add(frac_bytes).ok_or_else(overflow)?;
    }

    Ok(bytes)
}

/// Quantity holding an exact byte count
pub fn quantity_from_bytes(bytes: u64) -> Quantity {
    Quantity(bytes.to_string())
}
