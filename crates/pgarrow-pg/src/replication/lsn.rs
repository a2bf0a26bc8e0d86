//! WAL positions in Postgres' `X/Y` notation.

use crate::error::{PgError, PgResult};

/// Parse an LSN from "X/Y" format to u64.
pub fn parse_lsn(lsn: &str) -> PgResult<u64> {
    let invalid = || PgError::InvalidLsn(lsn.to_string());

    let (high, low) = lsn.trim().split_once('/').ok_or_else(invalid)?;
    let high = u32::from_str_radix(high, 16).map_err(|_| invalid())?;
    let low = u32::from_str_radix(low, 16).map_err(|_| invalid())?;

    Ok((u64::from(high) << 32) | u64::from(low))
}

/// Format a u64 LSN in "X/Y" format.
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsn() {
        assert_eq!(parse_lsn("0/16B3748").unwrap(), 0x16B3748);
        assert_eq!(parse_lsn("1/16B3748").unwrap(), 0x100000000 + 0x16B3748);
        assert!(parse_lsn("invalid").is_err());
        assert!(parse_lsn("0/").is_err());
        assert!(parse_lsn("100000000/0").is_err());
    }

    #[test]
    fn test_format_lsn() {
        assert_eq!(format_lsn(0x16B3748), "0/16B3748");
        assert_eq!(format_lsn(0x100000000 + 0x16B3748), "1/16B3748");
    }

    #[test]
    fn test_lsn_roundtrip() {
        for val in [0u64, 100, 0x16B3748, 0x100000000 + 0x16B3748, u64::MAX] {
            assert_eq!(parse_lsn(&format_lsn(val)).unwrap(), val, "roundtrip failed for {}", val);
        }
    }
}
