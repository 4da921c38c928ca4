use crate::{DriverError, DriverResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Formats the permission bits of a mode as an `ls`-style string.
///
/// ## Examples
///
/// ```
/// use graphdriver::utils::format_mode;
///
/// assert_eq!(format_mode(0o644), "rw-r--r--");
/// assert_eq!(format_mode(0o40755), "rwxr-xr-x");
/// assert_eq!(format_mode(0o100), "--x------");
/// ```
pub fn format_mode(mode: u32) -> String {
    const FLAGS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];

    FLAGS
        .iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}

/// Parses a human readable size such as `10G`, `512m` or `1.5GiB` into bytes.
///
/// Units are binary (`k` = 1024). A bare number is a byte count.
///
/// ## Examples
///
/// ```
/// use graphdriver::utils::parse_size;
///
/// assert_eq!(parse_size("size", "10G").unwrap(), 10 * 1024 * 1024 * 1024);
/// assert_eq!(parse_size("size", "512").unwrap(), 512);
/// assert_eq!(parse_size("size", "1.5k").unwrap(), 1536);
/// assert!(parse_size("size", "ten gigs").is_err());
/// ```
pub fn parse_size(key: &str, value: &str) -> DriverResult<u64> {
    let invalid = |reason: &str| DriverError::InvalidOption {
        key: key.to_string(),
        reason: format!("{reason}: {value:?}"),
    };

    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    if number.is_empty() {
        return Err(invalid("missing number"));
    }

    let number: f64 = number.parse().map_err(|_| invalid("invalid number"))?;

    let unit = unit.trim_start().to_ascii_lowercase();
    let unit = unit
        .strip_suffix("ib")
        .or_else(|| unit.strip_suffix('b'))
        .unwrap_or(&unit);

    let multiplier: u64 = match unit {
        "" => 1,
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        "t" => 1 << 40,
        "p" => 1 << 50,
        _ => return Err(invalid("unknown unit")),
    };

    Ok((number * multiplier as f64) as u64)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() -> anyhow::Result<()> {
        assert_eq!(parse_size("size", "0")?, 0);
        assert_eq!(parse_size("size", "1b")?, 1);
        assert_eq!(parse_size("size", "2K")?, 2048);
        assert_eq!(parse_size("size", "2KiB")?, 2048);
        assert_eq!(parse_size("size", "3 MB")?, 3 << 20);
        assert_eq!(parse_size("size", "1T")?, 1 << 40);
        Ok(())
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        for bad in ["", "G", "10X", "1.2.3G", "-5"] {
            let err = parse_size("size", bad).unwrap_err();
            assert!(
                matches!(err, DriverError::InvalidOption { ref key, .. } if key == "size"),
                "{bad:?} gave {err}"
            );
        }
    }
}
