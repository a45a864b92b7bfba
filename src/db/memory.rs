// src/db/memory.rs

//! In-memory implementation of the `Database` trait
//!
//! Used by tests and by operations against throwaway roots where no
//! persistent system database is wanted. Preserves insertion order so
//! `world()` snapshots are deterministic.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::pkg::{Package, PackageRef};
use std::collections::HashMap;

/// Ephemeral installed-package store
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    packages: Vec<Package>,
    index: HashMap<String, usize>,
    files: HashMap<String, Vec<String>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    fn find_package(&self, reference: &PackageRef) -> Result<Option<Package>> {
        Ok(self
            .packages
            .iter()
            .filter(|p| p.satisfies(reference))
            .max_by(|a, b| a.version.cmp(&b.version))
            .cloned())
    }

    fn find_packages(&self, reference: &PackageRef) -> Result<Vec<Package>> {
        Ok(self
            .packages
            .iter()
            .filter(|p| p.satisfies(reference))
            .cloned()
            .collect())
    }

    fn get_package(&self, fingerprint: &str) -> Result<Option<Package>> {
        Ok(self
            .index
            .get(fingerprint)
            .map(|&i| self.packages[i].clone()))
    }

    fn create_package(&mut self, package: &Package) -> Result<String> {
        let fingerprint = package.fingerprint();
        if self.index.contains_key(&fingerprint) {
            return Err(Error::Conflict(format!(
                "package {} is already recorded",
                package
            )));
        }

        self.index.insert(fingerprint.clone(), self.packages.len());
        self.packages.push(package.clone());
        Ok(fingerprint)
    }

    fn remove_package(&mut self, fingerprint: &str) -> Result<()> {
        let position = self
            .index
            .remove(fingerprint)
            .ok_or_else(|| Error::NotFound(format!("no package record for {}", fingerprint)))?;

        self.packages.remove(position);
        self.files.remove(fingerprint);

        // Positions after the removed entry shift down by one
        for idx in self.index.values_mut() {
            if *idx > position {
                *idx -= 1;
            }
        }
        Ok(())
    }

    fn get_package_files(&self, fingerprint: &str) -> Result<Vec<String>> {
        Ok(self.files.get(fingerprint).cloned().unwrap_or_default())
    }

    fn set_package_files(&mut self, fingerprint: &str, files: &[String]) -> Result<()> {
        if !self.index.contains_key(fingerprint) {
            return Err(Error::NotFound(format!(
                "no package record for {}",
                fingerprint
            )));
        }
        self.files.insert(fingerprint.to_string(), files.to_vec());
        Ok(())
    }

    fn world(&self) -> Result<Vec<Package>> {
        Ok(self.packages.clone())
    }
}
