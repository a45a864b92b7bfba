// src/db/mod.rs

//! Database layer for Strata
//!
//! The `Database` trait is the narrow interface the planner and the
//! installer consume: the installed-package store. Two implementations
//! live here:
//! - `MemoryDatabase`: ephemeral, for tests and throwaway roots
//! - `SqliteDatabase`: the persistent system database (WAL, migrations)

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryDatabase;
pub use sqlite::SqliteDatabase;

use crate::error::{Error, Result};
use crate::pkg::{Package, PackageRef};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Backing store abstraction for the installed-package set
///
/// Implementations persist package records and per-package file lists.
/// Only the installer's commit phase writes through this trait; the
/// solver and the orderer read value snapshots via `world`.
pub trait Database: Send {
    /// Highest-version installed package satisfying a reference
    fn find_package(&self, reference: &PackageRef) -> Result<Option<Package>>;

    /// Every installed package satisfying a reference
    fn find_packages(&self, reference: &PackageRef) -> Result<Vec<Package>>;

    /// Look up a package record by fingerprint
    fn get_package(&self, fingerprint: &str) -> Result<Option<Package>>;

    /// Record a package as installed; returns its fingerprint
    fn create_package(&mut self, package: &Package) -> Result<String>;

    /// Delete a package record and its file list
    fn remove_package(&mut self, fingerprint: &str) -> Result<()>;

    /// The file list recorded for a package
    fn get_package_files(&self, fingerprint: &str) -> Result<Vec<String>>;

    /// Replace the file list recorded for a package
    fn set_package_files(&mut self, fingerprint: &str, files: &[String]) -> Result<()>;

    /// Snapshot of every installed package
    fn world(&self) -> Result<Vec<Package>>;
}

/// A target system: its installed-package database plus the root path
/// artifacts are unpacked under
pub struct System {
    pub database: Box<dyn Database>,
    pub target: PathBuf,
}

impl System {
    pub fn new(database: Box<dyn Database>, target: &Path) -> Self {
        Self {
            database,
            target: target.to_path_buf(),
        }
    }
}

/// Initialize a new Strata database at the specified path
///
/// Creates the database file and sets up the initial schema.
/// This is idempotent - calling it on an existing database is safe.
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Init(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;

    // Set pragmas for better performance and reliability
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Open an existing Strata database
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    Ok(conn)
}
