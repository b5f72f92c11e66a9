use std::fmt;
use std::str::FromStr;

use itertools::Itertools;

use crate::error::{Error, Result};

/// Schema version of a scene document, ordered lexicographically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// The version the loader targets; older documents are upgraded.
    pub const CURRENT: Version = Version::new(2, 0, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let parse = |t: &str| t.parse::<u32>().ok();
        let Some((major, minor, patch)) = value
            .split([' ', '.'])
            .filter(|t| !t.is_empty())
            .collect_tuple()
        else {
            return Err(Error::msg(
                "Version number must consist of three period-separated parts!",
            ));
        };
        match (parse(major), parse(minor), parse(patch)) {
            (Some(major), Some(minor), Some(patch)) => Ok(Version::new(major, minor, patch)),
            _ => Err(Error::msg(format!(
                "could not parse version number \"{value}\""
            ))),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_versions() {
        let v: Version = "1.5.0".parse().unwrap();
        assert_eq!(v, Version::new(1, 5, 0));
        assert_eq!(v.to_string(), "1.5.0");
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!("1.5".parse::<Version>().is_err());
        assert!("1.5.0.2".parse::<Version>().is_err());
        assert!("a.b.c".parse::<Version>().is_err());
    }

    #[test]
    fn orders_lexicographically() {
        let old: Version = "1.9.9".parse().unwrap();
        assert!(old < Version::CURRENT);
        assert!(Version::new(2, 0, 1) > Version::CURRENT);
    }
}
