// src/solver/assertions.rs

//! Resolved plans: per-package boolean assertions
//!
//! A `PackagesAssertions` set is the solver's output: for every package
//! in the considered closure, whether it must end up installed (`true`)
//! or absent (`false`). Insertion order is preserved so downstream
//! ordering is deterministic.

use crate::error::{Error, Result};
use crate::pkg::Package;
use std::collections::HashMap;
use std::fmt;

/// A boolean install/absent decision for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageAssertion {
    pub package: Package,
    pub value: bool,
}

impl fmt::Display for PackageAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value {
            write!(f, "install {}", self.package)
        } else {
            write!(f, "absent {}", self.package)
        }
    }
}

/// A fingerprint-keyed set of assertions with stable insertion order
#[derive(Debug, Clone, Default)]
pub struct PackagesAssertions {
    entries: Vec<PackageAssertion>,
    index: HashMap<String, usize>,
}

impl PackagesAssertions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an assertion. Re-asserting the same value is a no-op;
    /// asserting the opposite value for a fingerprint already present is
    /// an inconsistency in the producing strategy.
    pub fn insert(&mut self, package: Package, value: bool) -> Result<()> {
        let fingerprint = package.fingerprint();
        if let Some(&position) = self.index.get(&fingerprint) {
            let existing = &self.entries[position];
            if existing.value != value {
                return Err(Error::InvariantViolation(format!(
                    "conflicting assertions for {}: both install and absent",
                    package
                )));
            }
            return Ok(());
        }

        self.index.insert(fingerprint, self.entries.len());
        self.entries.push(PackageAssertion { package, value });
        Ok(())
    }

    pub fn get(&self, fingerprint: &str) -> Option<&PackageAssertion> {
        self.index.get(fingerprint).map(|&i| &self.entries[i])
    }

    pub fn value_of(&self, fingerprint: &str) -> Option<bool> {
        self.get(fingerprint).map(|a| a.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageAssertion> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Packages asserted `true`, in insertion order
    pub fn to_install(&self) -> Vec<&Package> {
        self.entries
            .iter()
            .filter(|a| a.value)
            .map(|a| &a.package)
            .collect()
    }

    /// Check the closure invariant: every requirement of a `true`
    /// package must be satisfied by some other `true` package in the
    /// same set (directly or through provides).
    pub fn validate(&self) -> Result<()> {
        for assertion in self.entries.iter().filter(|a| a.value) {
            for required in &assertion.package.requires {
                let satisfied = self.entries.iter().any(|other| {
                    other.value
                        && other.package.fingerprint() != assertion.package.fingerprint()
                        && other.package.satisfies(required)
                });
                if !satisfied {
                    return Err(Error::InvariantViolation(format!(
                        "{} is planned for install but its requirement {} is not",
                        assertion.package, required
                    )));
                }
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a PackagesAssertions {
    type Item = &'a PackageAssertion;
    type IntoIter = std::slice::Iter<'a, PackageAssertion>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
