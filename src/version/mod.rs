// src/version/mod.rs

//! Version handling and selector satisfaction for package dependencies
//!
//! Layer versions follow the `[epoch:]number[-revision]` shape. Selectors
//! express ranges over them (">= 1.2", ">= 1.0, < 2.0", exact, or any)
//! and are what `requires`/`conflicts`/`provides` references carry.

use crate::error::{Error, Result};
use semver::Version as SemVersion;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed package version with epoch, number, and revision components
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version {
    pub epoch: u64,
    pub number: String,
    pub revision: Option<String>,
}

impl Version {
    /// Parse a version string
    ///
    /// Format: [epoch:]number[-revision]
    /// Examples:
    /// - "1.2.3" → epoch=0, number="1.2.3", revision=None
    /// - "2:1.2.3" → epoch=2, number="1.2.3", revision=None
    /// - "1.2.3-r4" → epoch=0, number="1.2.3", revision=Some("r4")
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch_str, rest) = if let Some(colon_pos) = s.find(':') {
            let (e, r) = s.split_at(colon_pos);
            (e, &r[1..])
        } else {
            ("0", s)
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str.parse::<u64>().map_err(|e| Error::Selector {
                selector: s.to_string(),
                reason: format!("invalid epoch: {}", e),
            })?
        };

        let (number, revision) = if let Some(dash_pos) = rest.find('-') {
            let (v, r) = rest.split_at(dash_pos);
            (v.to_string(), Some(r[1..].to_string()))
        } else {
            (rest.to_string(), None)
        };

        if number.is_empty() {
            return Err(Error::Selector {
                selector: s.to_string(),
                reason: "empty version number".to_string(),
            });
        }

        Ok(Self {
            epoch,
            number,
            revision,
        })
    }

    /// Normalize the number component to a semver value for comparison
    ///
    /// Layer versions are usually semver-compliant; when they are not,
    /// extract major.minor.patch from the leading numeric parts.
    fn to_semver(&self) -> SemVersion {
        if let Ok(v) = SemVersion::parse(&self.number) {
            return v;
        }

        let parts: Vec<&str> = self.number.split('.').collect();
        let major = parts
            .first()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        let minor = parts.get(1).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
        let patch = parts.get(2).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);

        SemVersion::new(major, minor, patch)
    }

    /// Compare two versions: epoch first, then normalized number, then revision
    pub fn compare(&self, other: &Version) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.to_semver().cmp(&other.to_semver()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Identical normalized numbers with different raw spellings fall
        // back to a string compare so ordering stays total.
        match self.number.cmp(&other.number) {
            Ordering::Equal => {}
            ord => return ord,
        }

        self.revision.cmp(&other.revision)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.number)?;
        if let Some(ref revision) = self.revision {
            write!(f, "-{}", revision)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

/// Version selector operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum VersionSelector {
    /// Any version is acceptable
    Any,
    /// Exact version match
    Exact(Version),
    /// Greater than
    GreaterThan(Version),
    /// Greater than or equal
    GreaterOrEqual(Version),
    /// Less than
    LessThan(Version),
    /// Less than or equal
    LessOrEqual(Version),
    /// Not equal
    NotEqual(Version),
    /// Both selectors must be satisfied (ranges like ">= 1.0, < 2.0")
    And(Box<VersionSelector>, Box<VersionSelector>),
}

impl VersionSelector {
    /// Parse a version selector string
    ///
    /// Examples:
    /// - ">= 1.2.3" → GreaterOrEqual(1.2.3)
    /// - "< 2.0.0" → LessThan(2.0.0)
    /// - "= 1.5.0" or "1.5.0" → Exact(1.5.0)
    /// - "*" or "" → Any
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionSelector::Any);
        }

        // Compound selectors: ">= 1.0, < 2.0"
        if s.contains(',') {
            let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
            if parts.len() == 2 {
                let left = Self::parse(parts[0])?;
                let right = Self::parse(parts[1])?;
                return Ok(VersionSelector::And(Box::new(left), Box::new(right)));
            }
            return Err(Error::Selector {
                selector: s.to_string(),
                reason: "compound selectors take exactly two parts".to_string(),
            });
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionSelector::GreaterOrEqual(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionSelector::LessOrEqual(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionSelector::NotEqual(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionSelector::GreaterThan(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionSelector::LessThan(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionSelector::Exact(Version::parse(rest.trim())?))
        } else {
            // No operator means exact match
            Ok(VersionSelector::Exact(Version::parse(s)?))
        }
    }

    /// Check if a version satisfies this selector
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionSelector::Any => true,
            VersionSelector::Exact(v) => version == v,
            VersionSelector::GreaterThan(v) => version > v,
            VersionSelector::GreaterOrEqual(v) => version >= v,
            VersionSelector::LessThan(v) => version < v,
            VersionSelector::LessOrEqual(v) => version <= v,
            VersionSelector::NotEqual(v) => version != v,
            VersionSelector::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }

    /// True for selectors that describe a range rather than one version.
    /// Range references are used only for matching, never persisted as
    /// an installed identity.
    pub fn is_range(&self) -> bool {
        !matches!(self, VersionSelector::Exact(_))
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Any => write!(f, "*"),
            VersionSelector::Exact(v) => write!(f, "={}", v),
            VersionSelector::GreaterThan(v) => write!(f, ">{}", v),
            VersionSelector::GreaterOrEqual(v) => write!(f, ">={}", v),
            VersionSelector::LessThan(v) => write!(f, "<{}", v),
            VersionSelector::LessOrEqual(v) => write!(f, "<={}", v),
            VersionSelector::NotEqual(v) => write!(f, "!={}", v),
            VersionSelector::And(left, right) => write!(f, "{}, {}", left, right),
        }
    }
}

impl FromStr for VersionSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<VersionSelector> for String {
    fn from(v: VersionSelector) -> String {
        v.to_string()
    }
}

impl TryFrom<String> for VersionSelector {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_simple() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.number, "1.2.3");
        assert_eq!(v.revision, None);
    }

    #[test]
    fn test_version_parse_with_epoch() {
        let v = Version::parse("2:1.2.3").unwrap();
        assert_eq!(v.epoch, 2);
        assert_eq!(v.number, "1.2.3");
    }

    #[test]
    fn test_version_parse_with_revision() {
        let v = Version::parse("1.2.3-r4").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.number, "1.2.3");
        assert_eq!(v.revision, Some("r4".to_string()));
    }

    #[test]
    fn test_version_parse_empty_number() {
        assert!(Version::parse(":").is_err());
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_version_compare_epochs() {
        let v1 = Version::parse("1:1.0.0").unwrap();
        let v2 = Version::parse("0:2.0.0").unwrap();
        assert!(v1 > v2); // Higher epoch wins even with lower number
    }

    #[test]
    fn test_version_compare_numbers() {
        let v1 = Version::parse("1.2.3").unwrap();
        let v2 = Version::parse("1.2.4").unwrap();
        assert!(v1 < v2);
        assert!(Version::parse("1.10.0").unwrap() > Version::parse("1.9.0").unwrap());
    }

    #[test]
    fn test_version_compare_revisions() {
        let v1 = Version::parse("1.2.3-r1").unwrap();
        let v2 = Version::parse("1.2.3-r2").unwrap();
        assert!(v1 < v2);
    }

    #[test]
    fn test_version_display_roundtrip() {
        for s in ["1.2.3", "2:1.2.3-r4", "0.9"] {
            let v = Version::parse(s).unwrap();
            assert_eq!(v.to_string(), s);
        }
    }

    #[test]
    fn test_selector_parse_exact() {
        let sel = VersionSelector::parse("1.2.3").unwrap();
        assert!(sel.satisfies(&Version::parse("1.2.3").unwrap()));
        assert!(!sel.satisfies(&Version::parse("1.2.4").unwrap()));
        assert!(!sel.is_range());
    }

    #[test]
    fn test_selector_parse_greater_or_equal() {
        let sel = VersionSelector::parse(">= 1.2.0").unwrap();
        assert!(sel.satisfies(&Version::parse("1.2.0").unwrap()));
        assert!(sel.satisfies(&Version::parse("1.3.0").unwrap()));
        assert!(!sel.satisfies(&Version::parse("1.1.0").unwrap()));
        assert!(sel.is_range());
    }

    #[test]
    fn test_selector_parse_range() {
        let sel = VersionSelector::parse(">= 1.0.0, < 2.0.0").unwrap();
        assert!(sel.satisfies(&Version::parse("1.5.0").unwrap()));
        assert!(!sel.satisfies(&Version::parse("2.0.0").unwrap()));
        assert!(!sel.satisfies(&Version::parse("0.9.0").unwrap()));
    }

    #[test]
    fn test_selector_parse_any() {
        let sel = VersionSelector::parse("*").unwrap();
        assert!(sel.satisfies(&Version::parse("99.99.99").unwrap()));
        assert!(sel.is_range());
    }

    #[test]
    fn test_selector_parse_malformed() {
        let err = VersionSelector::parse(">= not:a:version").unwrap_err();
        assert!(matches!(err, Error::Selector { .. }));

        let err = VersionSelector::parse(">= 1.0, < 2.0, != 1.5").unwrap_err();
        assert!(matches!(err, Error::Selector { .. }));
    }

    #[test]
    fn test_selector_display_roundtrip() {
        for s in ["*", "=1.2.3", ">=1.0.0", "<2.0.0", "!=1.5.0"] {
            let sel = VersionSelector::parse(s).unwrap();
            assert_eq!(sel.to_string(), s);
        }
    }
}
