// src/pkg/mod.rs

//! Package data model
//!
//! A package is identified by (category, name, version) and carries its
//! dependency edges (`requires`), mutual exclusions (`conflicts`), and
//! virtual substitutions (`provides`) as version-ranged references.
//! Free-form labels and annotations ride along for search and for
//! build-time directives such as config-protection paths.

use crate::error::{Error, Result};
use crate::version::{Version, VersionSelector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Annotation key listing config-protected path prefixes, space separated
pub const ANNOTATION_CONFIG_PROTECT: &str = "config-protect";

/// A reference to a package identity, possibly version-ranged
///
/// The string form is `category/name` or `category/name@<selector>`,
/// e.g. `web/nginx@>=1.21`. A reference with a range selector is used
/// only for matching and is never persisted as an installed identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PackageRef {
    pub category: String,
    pub name: String,
    pub selector: VersionSelector,
}

impl PackageRef {
    /// Create a reference matching any version of an identity
    pub fn new(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            selector: VersionSelector::Any,
        }
    }

    /// Create a reference with a version selector parsed from a string
    pub fn with_selector(category: &str, name: &str, selector: &str) -> Result<Self> {
        Ok(Self {
            category: category.to_string(),
            name: name.to_string(),
            selector: VersionSelector::parse(selector)?,
        })
    }

    /// Parse from the `category/name[@selector]` string form
    pub fn parse(s: &str) -> Result<Self> {
        let (ident, selector) = match s.find('@') {
            Some(pos) => {
                let (i, sel) = s.split_at(pos);
                (i, VersionSelector::parse(&sel[1..])?)
            }
            None => (s, VersionSelector::Any),
        };

        let (category, name) = ident.split_once('/').ok_or_else(|| Error::Parse(format!(
            "invalid package reference '{}': expected category/name",
            s
        )))?;

        if category.is_empty() || name.is_empty() {
            return Err(Error::Parse(format!(
                "invalid package reference '{}': empty category or name",
                s
            )));
        }

        Ok(Self {
            category: category.to_string(),
            name: name.to_string(),
            selector,
        })
    }

    /// The `category/name` identity without any version component
    pub fn ident(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// Check whether a package satisfies this reference directly
    /// (same identity, version inside the selector)
    pub fn matches(&self, pkg: &Package) -> bool {
        self.category == pkg.category
            && self.name == pkg.name
            && self.selector.satisfies(&pkg.version)
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.selector == VersionSelector::Any {
            write!(f, "{}/{}", self.category, self.name)
        } else {
            write!(f, "{}/{}@{}", self.category, self.name, self.selector)
        }
    }
}

impl FromStr for PackageRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<PackageRef> for String {
    fn from(r: PackageRef) -> String {
        r.to_string()
    }
}

impl TryFrom<String> for PackageRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

/// A package in the universe: one installable layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub category: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Package {
    /// Create a new package with the given identity
    pub fn new(category: &str, name: &str, version: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            category: category.to_string(),
            version: Version::parse(version)?,
            requires: Vec::new(),
            conflicts: Vec::new(),
            provides: Vec::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        })
    }

    /// Stable identity hash over (category, name, version)
    ///
    /// Used as the map key for assertions and database records. Two
    /// packages in one universe snapshot with the same fingerprint are
    /// a correctness bug, not a merge.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.category.as_bytes());
        hasher.update(b"/");
        hasher.update(self.name.as_bytes());
        hasher.update(b"@");
        hasher.update(self.version.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// The `category/name` identity without the version
    pub fn ident(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// An exact reference to this package
    pub fn to_ref(&self) -> PackageRef {
        PackageRef {
            category: self.category.clone(),
            name: self.name.clone(),
            selector: VersionSelector::Exact(self.version.clone()),
        }
    }

    /// Check whether this package satisfies a reference, either directly
    /// or through one of its `provides` entries
    pub fn satisfies(&self, reference: &PackageRef) -> bool {
        if reference.matches(self) {
            return true;
        }

        self.provides.iter().any(|provided| {
            provided.category == reference.category
                && provided.name == reference.name
                && match &provided.selector {
                    VersionSelector::Exact(v) => reference.selector.satisfies(v),
                    // A ranged or open provides entry stands in for the
                    // whole identity.
                    _ => true,
                }
        })
    }

    /// Replace the version (bumps the fingerprint)
    pub fn set_version(&mut self, version: &str) -> Result<()> {
        self.version = Version::parse(version)?;
        Ok(())
    }

    pub fn add_requires(&mut self, reference: PackageRef) {
        self.requires.push(reference);
    }

    pub fn add_conflicts(&mut self, reference: PackageRef) {
        self.conflicts.push(reference);
    }

    pub fn add_provides(&mut self, reference: PackageRef) {
        self.provides.push(reference);
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        self.labels.insert(key.to_string(), value.to_string());
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.annotations.insert(key.to_string(), value.to_string());
    }

    /// Config-protected path prefixes declared by this package
    pub fn config_protect_paths(&self) -> Vec<String> {
        self.annotations
            .get(ANNOTATION_CONFIG_PROTECT)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.category, self.name, self.version)
    }
}

/// Pick the highest-version package satisfying a reference
pub fn find_best<'a>(packages: &'a [Package], reference: &PackageRef) -> Option<&'a Package> {
    packages
        .iter()
        .filter(|p| p.satisfies(reference))
        .max_by(|a, b| a.version.cmp(&b.version))
}

/// Deduplicate a universe snapshot by fingerprint, keeping first occurrence
pub fn dedup_by_fingerprint(packages: Vec<Package>) -> Vec<Package> {
    let mut seen = std::collections::HashSet::new();
    packages
        .into_iter()
        .filter(|p| seen.insert(p.fingerprint()))
        .collect()
}
