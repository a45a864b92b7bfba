// src/db/sqlite.rs

//! SQLite-backed implementation of the `Database` trait
//!
//! The persistent system database. Package dependency edges and labels
//! are stored as JSON columns; file lists live in their own table so
//! removal and oscheck can query by path.

use crate::db::{self, Database, schema};
use crate::error::{Error, Result};
use crate::pkg::{Package, PackageRef};
use crate::repository::RepositoryConfig;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// Persistent installed-package store
pub struct SqliteDatabase {
    conn: Connection,
}

/// Raw row image before JSON fields are decoded
struct PackageRow {
    name: String,
    category: String,
    version: String,
    requires: String,
    conflicts: String,
    provides: String,
    labels: String,
    annotations: String,
}

const PACKAGE_COLUMNS: &str =
    "name, category, version, requires, conflicts, provides, labels, annotations";

impl SqliteDatabase {
    /// Open an existing database, running any pending migrations
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = db::open(db_path)?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Create (or open) a database at the given path
    pub fn create(db_path: &str) -> Result<Self> {
        db::init(db_path)?;
        Self::open(db_path)
    }

    /// Wrap an already-open connection (used by tests)
    pub fn from_connection(conn: Connection) -> Result<Self> {
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn row_to_package(row: PackageRow) -> Result<Package> {
        let mut pkg = Package::new(&row.category, &row.name, &row.version)?;
        pkg.requires = serde_json::from_str(&row.requires)
            .map_err(|e| Error::Parse(format!("stored requires: {}", e)))?;
        pkg.conflicts = serde_json::from_str(&row.conflicts)
            .map_err(|e| Error::Parse(format!("stored conflicts: {}", e)))?;
        pkg.provides = serde_json::from_str(&row.provides)
            .map_err(|e| Error::Parse(format!("stored provides: {}", e)))?;
        pkg.labels = serde_json::from_str(&row.labels)
            .map_err(|e| Error::Parse(format!("stored labels: {}", e)))?;
        pkg.annotations = serde_json::from_str(&row.annotations)
            .map_err(|e| Error::Parse(format!("stored annotations: {}", e)))?;
        Ok(pkg)
    }

    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<PackageRow> {
        Ok(PackageRow {
            name: row.get(0)?,
            category: row.get(1)?,
            version: row.get(2)?,
            requires: row.get(3)?,
            conflicts: row.get(4)?,
            provides: row.get(5)?,
            labels: row.get(6)?,
            annotations: row.get(7)?,
        })
    }

    fn packages_by_ident(&self, category: &str, name: &str) -> Result<Vec<Package>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM packages WHERE category = ?1 AND name = ?2",
            PACKAGE_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![category, name], Self::read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(Self::row_to_package).collect()
    }

    /// Add a configured repository
    pub fn add_repository(&mut self, config: &RepositoryConfig) -> Result<()> {
        if self.get_repository(&config.name)?.is_some() {
            return Err(Error::Conflict(format!(
                "Repository '{}' already exists",
                config.name
            )));
        }

        self.conn.execute(
            "INSERT INTO repositories (name, url, enabled, priority, index_expire, last_sync)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &config.name,
                &config.url,
                config.enabled as i32,
                config.priority,
                config.index_expire,
                &config.last_sync,
            ],
        )?;
        Ok(())
    }

    /// Remove a configured repository by name
    pub fn remove_repository(&mut self, name: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM repositories WHERE name = ?1", [name])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Repository '{}' not found", name)));
        }
        Ok(())
    }

    /// Look up one repository config
    pub fn get_repository(&self, name: &str) -> Result<Option<RepositoryConfig>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, url, enabled, priority, index_expire, last_sync
             FROM repositories WHERE name = ?1",
        )?;

        let config = stmt
            .query_row([name], |row| {
                Ok(RepositoryConfig {
                    name: row.get(0)?,
                    url: row.get(1)?,
                    enabled: row.get::<_, i32>(2)? != 0,
                    priority: row.get(3)?,
                    index_expire: row.get(4)?,
                    last_sync: row.get(5)?,
                })
            })
            .optional()?;

        Ok(config)
    }

    /// List configured repositories, highest priority first
    pub fn list_repositories(&self) -> Result<Vec<RepositoryConfig>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, url, enabled, priority, index_expire, last_sync
             FROM repositories ORDER BY priority DESC, name",
        )?;

        let configs = stmt
            .query_map([], |row| {
                Ok(RepositoryConfig {
                    name: row.get(0)?,
                    url: row.get(1)?,
                    enabled: row.get::<_, i32>(2)? != 0,
                    priority: row.get(3)?,
                    index_expire: row.get(4)?,
                    last_sync: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(configs)
    }

    /// Enable or disable a configured repository
    pub fn set_repository_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE repositories SET enabled = ?1 WHERE name = ?2",
            params![enabled as i32, name],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Repository '{}' not found", name)));
        }
        Ok(())
    }

    /// Record a repository sync timestamp
    pub fn touch_repository_sync(&mut self, name: &str, timestamp: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE repositories SET last_sync = ?1 WHERE name = ?2",
            params![timestamp, name],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Repository '{}' not found", name)));
        }
        Ok(())
    }
}

impl Database for SqliteDatabase {
    fn find_package(&self, reference: &PackageRef) -> Result<Option<Package>> {
        let matches = self.find_packages(reference)?;
        Ok(matches.into_iter().max_by(|a, b| a.version.cmp(&b.version)))
    }

    fn find_packages(&self, reference: &PackageRef) -> Result<Vec<Package>> {
        // Direct identity matches come from the indexed columns; provides
        // matches require scanning the world since they live in JSON.
        let direct = self.packages_by_ident(&reference.category, &reference.name)?;
        let mut matches: Vec<Package> = direct
            .into_iter()
            .filter(|p| reference.matches(p))
            .collect();

        for pkg in self.world()? {
            if pkg.ident() != reference.ident()
                && pkg.satisfies(reference)
                && !matches.iter().any(|m| m.fingerprint() == pkg.fingerprint())
            {
                matches.push(pkg);
            }
        }

        Ok(matches)
    }

    fn get_package(&self, fingerprint: &str) -> Result<Option<Package>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM packages WHERE fingerprint = ?1",
            PACKAGE_COLUMNS
        ))?;

        let row = stmt.query_row([fingerprint], Self::read_row).optional()?;

        row.map(Self::row_to_package).transpose()
    }

    fn create_package(&mut self, package: &Package) -> Result<String> {
        let fingerprint = package.fingerprint();
        debug!("Recording package {} ({})", package, fingerprint);

        let requires = serde_json::to_string(&package.requires)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let conflicts = serde_json::to_string(&package.conflicts)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let provides = serde_json::to_string(&package.provides)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let labels =
            serde_json::to_string(&package.labels).map_err(|e| Error::Parse(e.to_string()))?;
        let annotations = serde_json::to_string(&package.annotations)
            .map_err(|e| Error::Parse(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO packages (fingerprint, name, category, version, requires, conflicts, provides, labels, annotations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &fingerprint,
                &package.name,
                &package.category,
                package.version.to_string(),
                &requires,
                &conflicts,
                &provides,
                &labels,
                &annotations,
            ],
        )?;

        Ok(fingerprint)
    }

    fn remove_package(&mut self, fingerprint: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM packages WHERE fingerprint = ?1", [fingerprint])?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "no package record for {}",
                fingerprint
            )));
        }
        Ok(())
    }

    fn get_package_files(&self, fingerprint: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT path FROM package_files WHERE fingerprint = ?1 ORDER BY id",
        )?;

        let files = stmt
            .query_map([fingerprint], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(files)
    }

    fn set_package_files(&mut self, fingerprint: &str, files: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM package_files WHERE fingerprint = ?1",
            [fingerprint],
        )?;
        for path in files {
            tx.execute(
                "INSERT INTO package_files (fingerprint, path) VALUES (?1, ?2)",
                params![fingerprint, path],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn world(&self) -> Result<Vec<Package>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY category, name, version",
            PACKAGE_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], Self::read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(Self::row_to_package).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        SqliteDatabase::from_connection(conn).unwrap()
    }

    #[test]
    fn test_package_roundtrip() {
        let mut db = create_test_db();

        let mut pkg = Package::new("web", "nginx", "1.21.0").unwrap();
        pkg.add_requires(PackageRef::parse("lib/openssl@>=3.0").unwrap());
        pkg.add_conflicts(PackageRef::parse("web/apache").unwrap());
        pkg.add_provides(PackageRef::parse("virtual/httpd").unwrap());
        pkg.set_label("tier", "frontend");
        pkg.set_annotation("config-protect", "/etc/nginx");

        let fingerprint = db.create_package(&pkg).unwrap();
        let found = db.get_package(&fingerprint).unwrap().unwrap();

        assert_eq!(found.name, pkg.name);
        assert_eq!(found.version, pkg.version);
        assert_eq!(found.fingerprint(), fingerprint);
        assert_eq!(found.requires, pkg.requires);
        assert_eq!(found.conflicts, pkg.conflicts);
        assert_eq!(found.provides, pkg.provides);
        assert_eq!(found.labels, pkg.labels);
        assert_eq!(found.annotations, pkg.annotations);
    }

    #[test]
    fn test_find_packages_through_provides() {
        let mut db = create_test_db();

        let mut pkg = Package::new("web", "nginx", "1.21.0").unwrap();
        pkg.add_provides(PackageRef::parse("virtual/httpd").unwrap());
        db.create_package(&pkg).unwrap();

        let found = db
            .find_packages(&PackageRef::parse("virtual/httpd").unwrap())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "nginx");
    }

    #[test]
    fn test_remove_package_drops_files() {
        let mut db = create_test_db();

        let pkg = Package::new("web", "nginx", "1.21.0").unwrap();
        let fp = db.create_package(&pkg).unwrap();
        db.set_package_files(
            &fp,
            &[
                "/usr/bin/nginx".to_string(),
                "/etc/nginx/nginx.conf".to_string(),
            ],
        )
        .unwrap();

        db.remove_package(&fp).unwrap();

        assert!(db.get_package(&fp).unwrap().is_none());
        assert!(db.get_package_files(&fp).unwrap().is_empty());
    }

    #[test]
    fn test_world_snapshot_is_ordered() {
        let mut db = create_test_db();

        db.create_package(&Package::new("web", "nginx", "1.21.0").unwrap())
            .unwrap();
        db.create_package(&Package::new("db", "redis", "6.2.0").unwrap())
            .unwrap();

        let world = db.world().unwrap();
        assert_eq!(world.len(), 2);
        assert_eq!(world[0].name, "redis"); // db < web
        assert_eq!(world[1].name, "nginx");
    }

    #[test]
    fn test_repository_management() {
        let mut db = create_test_db();

        let config = RepositoryConfig::new("main", "https://layers.example.com/main");
        db.add_repository(&config).unwrap();

        // Duplicates are rejected
        assert!(matches!(
            db.add_repository(&config),
            Err(Error::Conflict(_))
        ));

        let mut extra = RepositoryConfig::new("extra", "https://layers.example.com/extra");
        extra.priority = 10;
        db.add_repository(&extra).unwrap();

        let repos = db.list_repositories().unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "extra"); // Higher priority first

        db.set_repository_enabled("main", false).unwrap();
        assert!(!db.get_repository("main").unwrap().unwrap().enabled);

        db.remove_repository("main").unwrap();
        assert!(db.get_repository("main").unwrap().is_none());
        assert!(matches!(
            db.remove_repository("main"),
            Err(Error::NotFound(_))
        ));
    }
}
