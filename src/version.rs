//! Cluster version identification. Every version-sensitive decision in the
//! crate - which manifest decoder to use (§4.1), which transform chain to
//! apply (§4.5) - is table-dispatched on a `Version` value rather than on a
//! type hierarchy (§9: avoid reflection / cyclic inheritance).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Flavor {
    Es,
    Os,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Es => write!(f, "es"),
            Flavor::Os => write!(f, "os"),
        }
    }
}

/// `{flavor, major, minor, patch}`, totally ordered by `(flavor, major,
/// minor, patch)` - flavor first, since an ES version and an OS version are
/// never comparable by number alone.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub flavor: Flavor,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(flavor: Flavor, major: u32, minor: u32, patch: u32) -> Self {
        Self { flavor, major, minor, patch }
    }

    /// Parses `"es-7.10.2"`, `"os-2.11"`, `"es-6.8"` and similar. A missing
    /// patch component defaults to 0.
    pub fn parse(s: &str) -> Result<Self, crate::error::Error> {
        let (flavor_str, rest) = s
            .split_once('-')
            .ok_or_else(|| invalid(s))?;
        let flavor = match flavor_str.to_ascii_lowercase().as_str() {
            "es" => Flavor::Es,
            "os" => Flavor::Os,
            _ => return Err(invalid(s)),
        };
        let mut parts = rest.split('.');
        let major = parts.next().ok_or_else(|| invalid(s))?.parse().map_err(|_| invalid(s))?;
        let minor = parts.next().unwrap_or("0").parse().map_err(|_| invalid(s))?;
        let patch = parts.next().unwrap_or("0").parse().map_err(|_| invalid(s))?;
        Ok(Version::new(flavor, major, minor, patch))
    }

    pub fn is_es_6_8(&self) -> bool {
        matches!(self.flavor, Flavor::Es) && self.major == 6 && self.minor == 8
    }

    pub fn is_es_7_x(&self) -> bool {
        matches!(self.flavor, Flavor::Es) && self.major == 7
    }

    pub fn is_os_1_x(&self) -> bool {
        matches!(self.flavor, Flavor::Os) && self.major == 1
    }

    pub fn is_os_2_x(&self) -> bool {
        matches!(self.flavor, Flavor::Os) && self.major == 2
    }

    /// The modern "versioned index-N" repository layout shared by ES 7.10+
    /// and every OpenSearch release (§4.1: "implementers target ES 6.8 and
    /// ES 7.10/7.17 which share the modern layout").
    pub fn uses_modern_repo_layout(&self) -> bool {
        match self.flavor {
            Flavor::Os => true,
            Flavor::Es => (self.major, self.minor) >= (7, 10),
        }
    }
}

fn invalid(s: &str) -> crate::error::Error {
    crate::error::Error::InvalidParameter(format!("not a valid version string: {s:?}"))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.flavor as u8, self.major, self.minor, self.patch).cmp(&(
            other.flavor as u8,
            other.major,
            other.minor,
            other.patch,
        ))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}.{}", self.flavor, self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let v = Version::parse("es-7.10.2").unwrap();
        assert_eq!(v, Version::new(Flavor::Es, 7, 10, 2));
        assert_eq!(v.to_string(), "es-7.10.2");

        let v = Version::parse("os-2.11").unwrap();
        assert_eq!(v, Version::new(Flavor::Os, 2, 11, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Version::parse("nope").is_err());
        assert!(Version::parse("es-x.y").is_err());
    }

    #[test]
    fn matchers() {
        assert!(Version::parse("es-6.8.0").unwrap().is_es_6_8());
        assert!(Version::parse("es-7.17.0").unwrap().is_es_7_x());
        assert!(Version::parse("os-1.3.0").unwrap().is_os_1_x());
        assert!(Version::parse("os-2.11.0").unwrap().is_os_2_x());
    }

    #[test]
    fn ordering_is_flavor_major_minor_patch() {
        let a = Version::parse("es-6.8.0").unwrap();
        let b = Version::parse("es-7.10.0").unwrap();
        assert!(a < b);
        let c = Version::parse("os-1.0.0").unwrap();
        assert!(b < c, "ES always sorts before OS by flavor discriminant");
    }

    #[test]
    fn modern_repo_layout() {
        assert!(!Version::parse("es-6.8.0").unwrap().uses_modern_repo_layout());
        assert!(Version::parse("es-7.10.0").unwrap().uses_modern_repo_layout());
        assert!(Version::parse("es-7.9.0").unwrap().uses_modern_repo_layout() == false);
        assert!(Version::parse("os-1.0.0").unwrap().uses_modern_repo_layout());
    }
}
