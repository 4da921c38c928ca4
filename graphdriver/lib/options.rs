//! Parsing of driver options and storage options.

use std::collections::BTreeMap;

use crate::{utils, DriverError, DriverResult, StorageOptions};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The storage option key that requests a size quota for a layer.
pub const SIZE_OPT: &str = "size";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses `key=value` driver options. Keys are trimmed and lowercased.
pub fn parse_driver_options(options: &[String]) -> DriverResult<BTreeMap<String, String>> {
    let mut parsed = BTreeMap::new();
    for option in options {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| DriverError::InvalidOption {
                key: option.clone(),
                reason: "expected key=value".to_string(),
            })?;

        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(DriverError::InvalidOption {
                key: option.clone(),
                reason: "empty key".to_string(),
            });
        }

        parsed.insert(key, value.trim().to_string());
    }

    Ok(parsed)
}

/// Rejects every driver option; for drivers that take none.
pub fn reject_driver_options(driver: &str, options: &[String]) -> DriverResult<()> {
    let parsed = parse_driver_options(options)?;
    if let Some(key) = parsed.into_keys().next() {
        return Err(DriverError::UnknownDriverOption {
            driver: driver.to_string(),
            key,
        });
    }

    Ok(())
}

/// Validates storage options for a driver that cannot enforce size quotas.
///
/// `size` is parsed so malformed values surface as invalid arguments, then refused as
/// unsupported. Any other key is unsupported.
pub fn validate_without_quota(driver: &str, storage_opt: &StorageOptions) -> DriverResult<()> {
    if let Some(value) = storage_opt
        .iter()
        .find_map(|(k, v)| k.eq_ignore_ascii_case(SIZE_OPT).then_some(v))
    {
        let bytes = utils::parse_size(SIZE_OPT, value)?;
        tracing::debug!("{driver}: refusing size quota of {bytes} bytes");
    }

    match storage_opt.keys().next() {
        Some(key) => Err(DriverError::UnsupportedStorageOption {
            driver: driver.to_string(),
            key: key.clone(),
        }),
        None => Ok(()),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_driver_options() -> anyhow::Result<()> {
        let parsed =
            parse_driver_options(&["Dfs.Mountopt = nodev".to_string(), "x=".to_string()])?;
        assert_eq!(parsed.get("dfs.mountopt").map(String::as_str), Some("nodev"));
        assert_eq!(parsed.get("x").map(String::as_str), Some(""));

        assert!(parse_driver_options(&["novalue".to_string()]).is_err());
        assert!(parse_driver_options(&["=value".to_string()]).is_err());
        Ok(())
    }

    #[test]
    fn test_reject_driver_options() {
        assert!(reject_driver_options("vfs", &[]).is_ok());
        let err = reject_driver_options("vfs", &["vfs.quota=on".to_string()]).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_validate_without_quota() {
        assert!(validate_without_quota("vfs", &StorageOptions::new()).is_ok());

        let size = StorageOptions::from([("size".to_string(), "10G".to_string())]);
        assert!(validate_without_quota("vfs", &size).unwrap_err().is_unsupported());

        let bad_size = StorageOptions::from([("size".to_string(), "lots".to_string())]);
        assert!(matches!(
            validate_without_quota("vfs", &bad_size),
            Err(DriverError::InvalidOption { .. })
        ));

        let unknown = StorageOptions::from([("inodes".to_string(), "100".to_string())]);
        assert!(validate_without_quota("vfs", &unknown).unwrap_err().is_unsupported());
    }
}
