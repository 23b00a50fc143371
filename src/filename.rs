//! File identity: which tier a file number belongs to and what it is called.
//!
//! Local tables and remote objects share one numeric space split at
//! [`REMOTE_NUMBER_START`]. Names are zero-padded decimals with a fixed width
//! per tier:
//!
//! ```text
//! local   000042.ldb        (6 digits, numbers below 1_000_000)
//! remote  1000042.ldb       (7 digits, numbers from 1_000_000 to 9_999_999)
//! bloom   bloom1000042.ldb  (filter side channel of a remote object)
//! ```

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// First number of the remote numbering space.
pub const REMOTE_NUMBER_START: u64 = 1_000_000;

/// Largest remote number that renders in seven digits.
pub const MAX_REMOTE_NUMBER: u64 = 9_999_999;

/// Extension shared by table files in both tiers.
pub const TABLE_EXTENSION: &str = "ldb";

/// Prefix of the bloom filter object stored next to a remote object.
pub const BLOOM_PREFIX: &str = "bloom";

/// The tier a file number lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Fast local disk.
    Local,
    /// Durable object storage.
    Remote,
}

impl Tier {
    /// Classifies a file number.
    pub fn of(number: u64) -> Self {
        if number >= REMOTE_NUMBER_START {
            Tier::Remote
        } else {
            Tier::Local
        }
    }
}

/// Classifies a file number.
pub fn classify(number: u64) -> Tier {
    Tier::of(number)
}

/// Canonical object name of a file number in its own tier.
///
/// Fails for remote numbers that would need more than seven digits.
pub fn object_name(number: u64) -> Result<String> {
    match classify(number) {
        Tier::Local => Ok(format!("{:06}.{}", number, TABLE_EXTENSION)),
        Tier::Remote => {
            check_remote_width(number)?;
            Ok(format!("{:07}.{}", number, TABLE_EXTENSION))
        }
    }
}

/// Object name of the bloom filter uploaded for a remote object.
pub fn bloom_object_name(number: u64) -> Result<String> {
    if classify(number) != Tier::Remote {
        return Err(Error::invalid_argument(format!(
            "bloom filters exist only for remote objects, got local number {}",
            number
        )));
    }
    Ok(format!("{}{}", BLOOM_PREFIX, object_name(number)?))
}

/// Path of a table file under a local directory.
pub fn table_file_path(dir: &Path, number: u64) -> Result<PathBuf> {
    Ok(dir.join(object_name(number)?))
}

/// Parses a table file name back into its number. Returns None for names
/// that are not canonical in either tier.
pub fn parse_object_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".ldb")?;
    if !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: u64 = stem.parse().ok()?;
    let canonical = match stem.len() {
        6 => classify(number) == Tier::Local,
        7 => classify(number) == Tier::Remote,
        _ => false,
    };
    canonical.then_some(number)
}

/// Rejects a number claimed to be remote that lies in the local space.
pub fn require_tier(number: u64, expected: Tier) -> Result<()> {
    let actual = classify(number);
    if actual != expected {
        return Err(Error::invalid_argument(format!(
            "file number {} is {:?}, expected {:?}",
            number, actual, expected
        )));
    }
    Ok(())
}

fn check_remote_width(number: u64) -> Result<()> {
    if number > MAX_REMOTE_NUMBER {
        return Err(Error::invalid_argument(format!(
            "remote object number {} does not fit in 7 digits",
            number
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify_boundary() {
        assert_eq!(classify(0), Tier::Local);
        assert_eq!(classify(999_999), Tier::Local);
        assert_eq!(classify(1_000_000), Tier::Remote);
    }

    #[test]
    fn test_object_names() {
        assert_eq!(object_name(4).unwrap(), "000004.ldb");
        assert_eq!(object_name(999_999).unwrap(), "999999.ldb");
        assert_eq!(object_name(1_000_000).unwrap(), "1000000.ldb");
        assert_eq!(object_name(1_000_042).unwrap(), "1000042.ldb");
    }

    #[test]
    fn test_object_name_overflow_fails() {
        assert!(matches!(object_name(10_000_000), Err(Error::InvalidArgument(_))));
        assert!(matches!(bloom_object_name(u64::MAX), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_bloom_object_name() {
        assert_eq!(bloom_object_name(1_000_042).unwrap(), "bloom1000042.ldb");
        assert!(bloom_object_name(42).is_err());
    }

    #[test]
    fn test_parse_object_name() {
        assert_eq!(parse_object_name("000004.ldb"), Some(4));
        assert_eq!(parse_object_name("1000042.ldb"), Some(1_000_042));
        // Wrong width for the tier
        assert_eq!(parse_object_name("0000004.ldb"), None);
        assert_eq!(parse_object_name("4.ldb"), None);
        assert_eq!(parse_object_name("bloom1000042.ldb"), None);
        assert_eq!(parse_object_name("000004.sst"), None);
    }

    #[test]
    fn test_require_tier() {
        assert!(require_tier(1_000_001, Tier::Remote).is_ok());
        assert!(matches!(require_tier(17, Tier::Remote), Err(Error::InvalidArgument(_))));
    }

    proptest! {
        #[test]
        fn prop_classify_threshold(number in any::<u64>()) {
            prop_assert_eq!(classify(number) == Tier::Remote, number >= 1_000_000);
        }

        #[test]
        fn prop_local_name_width(number in 0u64..REMOTE_NUMBER_START) {
            let name = object_name(number).unwrap();
            prop_assert_eq!(name.len(), 10);
            prop_assert_eq!(parse_object_name(&name), Some(number));
        }

        #[test]
        fn prop_remote_name_width(number in REMOTE_NUMBER_START..=MAX_REMOTE_NUMBER) {
            let name = object_name(number).unwrap();
            prop_assert_eq!(name.len(), 11);
            prop_assert_eq!(parse_object_name(&name), Some(number));
        }
    }
}
