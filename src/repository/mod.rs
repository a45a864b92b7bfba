// src/repository/mod.rs

//! Package repositories
//!
//! A repository publishes a JSON index mapping compiled packages to
//! layer artifacts. The installer consults repositories in descending
//! priority order; the first one indexing a planned fingerprint wins.
//! Local-disk and HTTP-backed repositories implement the same trait.

pub mod client;

pub use client::{ArtifactClient, HttpClient, LocalClient, is_remote_location};

use crate::artifact::{Artifact, CompressionKind};
use crate::error::{Error, Result};
use crate::pkg::Package;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Name of the index file at a repository root
pub const INDEX_FILE: &str = "index.json";

/// Configured repository as persisted in the system database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub priority: i32,
    /// Seconds before a synced index is considered stale
    pub index_expire: i64,
    pub last_sync: Option<String>,
}

impl RepositoryConfig {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            enabled: true,
            priority: 0,
            index_expire: 3600,
            last_sync: None,
        }
    }
}

/// Check if a repository's synced index needs refresh
pub fn needs_sync(config: &RepositoryConfig) -> bool {
    match &config.last_sync {
        None => true,
        Some(last_sync) => match parse_timestamp(last_sync) {
            Ok(last_sync_time) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                now.saturating_sub(last_sync_time) > config.index_expire as u64
            }
            Err(_) => true, // Unparsable timestamp forces a sync
        },
    }
}

/// Get current timestamp as ISO 8601 string
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parse ISO 8601 timestamp to Unix seconds
fn parse_timestamp(timestamp: &str) -> Result<u64> {
    let dt = chrono::DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| Error::Parse(format!("Invalid timestamp: {}", e)))?;
    Ok(dt.timestamp() as u64)
}

/// One indexed artifact: a compiled package plus its layer file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub package: Package,
    pub file_name: String,
    pub checksum: String,
    #[serde(default)]
    pub compression: CompressionKind,
    #[serde(default)]
    pub files: Vec<String>,
}

/// The published index of a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub name: String,
    #[serde(default)]
    pub revision: u64,
    pub artifacts: Vec<ArtifactDescriptor>,
}

/// Abstraction over artifact sources
pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    /// The compiled packages this repository indexes
    fn index(&self) -> Result<Vec<Package>>;

    /// Locate the artifact whose compiled package fingerprint matches
    fn search_artifact(&self, package: &Package) -> Result<Artifact>;
}

fn descriptor_to_artifact(descriptor: &ArtifactDescriptor, location: String) -> Artifact {
    Artifact {
        file_name: descriptor.file_name.clone(),
        location,
        checksum: descriptor.checksum.clone(),
        compression: descriptor.compression,
        files: descriptor.files.clone(),
    }
}

/// A repository rooted in a local directory holding `index.json` plus
/// the artifact files it references
pub struct LocalRepository {
    name: String,
    priority: i32,
    root: PathBuf,
    index: RepositoryIndex,
}

impl LocalRepository {
    pub fn open(name: &str, priority: i32, root: &Path) -> Result<Self> {
        let index_path = root.join(INDEX_FILE);
        let content = std::fs::read_to_string(&index_path).map_err(|e| {
            Error::NotFound(format!(
                "repository index {}: {}",
                index_path.display(),
                e
            ))
        })?;
        let index: RepositoryIndex = serde_json::from_str(&content)
            .map_err(|e| Error::Parse(format!("repository index: {}", e)))?;

        debug!(
            "opened repository '{}' with {} artifacts",
            name,
            index.artifacts.len()
        );

        Ok(Self {
            name: name.to_string(),
            priority,
            root: root.to_path_buf(),
            index,
        })
    }
}

impl Repository for LocalRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn index(&self) -> Result<Vec<Package>> {
        Ok(self.index.artifacts.iter().map(|d| d.package.clone()).collect())
    }

    fn search_artifact(&self, package: &Package) -> Result<Artifact> {
        let fingerprint = package.fingerprint();
        self.index
            .artifacts
            .iter()
            .find(|d| d.package.fingerprint() == fingerprint)
            .map(|d| {
                let location = self.root.join(&d.file_name).display().to_string();
                descriptor_to_artifact(d, location)
            })
            .ok_or_else(|| Error::MatchNotFound(package.to_string()))
    }
}

/// A repository served over HTTP; the index is fetched once on open
pub struct HttpRepository {
    name: String,
    priority: i32,
    url: String,
    index: RepositoryIndex,
}

impl HttpRepository {
    pub fn fetch(name: &str, priority: i32, url: &str, http: &HttpClient) -> Result<Self> {
        let index = http.fetch_index(url)?;
        Ok(Self {
            name: name.to_string(),
            priority,
            url: url.trim_end_matches('/').to_string(),
            index,
        })
    }

    /// Build from a stored repository configuration
    pub fn from_config(config: &RepositoryConfig, http: &HttpClient) -> Result<Self> {
        Self::fetch(&config.name, config.priority, &config.url, http)
    }
}

impl Repository for HttpRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn index(&self) -> Result<Vec<Package>> {
        Ok(self.index.artifacts.iter().map(|d| d.package.clone()).collect())
    }

    fn search_artifact(&self, package: &Package) -> Result<Artifact> {
        let fingerprint = package.fingerprint();
        self.index
            .artifacts
            .iter()
            .find(|d| d.package.fingerprint() == fingerprint)
            .map(|d| {
                let location = format!("{}/{}", self.url, d.file_name);
                descriptor_to_artifact(d, location)
            })
            .ok_or_else(|| Error::MatchNotFound(package.to_string()))
    }
}

/// The available side of the universe: every indexed package across the
/// given repositories, highest priority first, deduplicated by
/// fingerprint so a low-priority copy never shadows a higher one
pub fn compile_universe(repositories: &[Box<dyn Repository>]) -> Result<Vec<Package>> {
    let mut ordered: Vec<&Box<dyn Repository>> = repositories.iter().collect();
    ordered.sort_by(|a, b| b.priority().cmp(&a.priority()).then_with(|| a.name().cmp(b.name())));

    let mut seen = std::collections::HashSet::new();
    let mut universe = Vec::new();
    for repository in ordered {
        for package in repository.index()? {
            if seen.insert(package.fingerprint()) {
                universe.push(package);
            }
        }
    }
    Ok(universe)
}

/// Search indexed packages by substring over `category/name` and labels
pub fn search(repositories: &[Box<dyn Repository>], pattern: &str) -> Result<Vec<Package>> {
    let pattern = pattern.to_lowercase();
    Ok(compile_universe(repositories)?
        .into_iter()
        .filter(|p| {
            p.ident().to_lowercase().contains(&pattern)
                || p.labels
                    .iter()
                    .any(|(k, v)| k.to_lowercase().contains(&pattern) || v.to_lowercase().contains(&pattern))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_index(root: &Path, name: &str, packages: &[(&str, &str, &str)]) {
        let artifacts = packages
            .iter()
            .map(|(category, pkg_name, version)| ArtifactDescriptor {
                package: Package::new(category, pkg_name, version).unwrap(),
                file_name: format!("{}-{}.tar.gz", pkg_name, version),
                checksum: "00".repeat(32),
                compression: CompressionKind::Gzip,
                files: vec![format!("/usr/bin/{}", pkg_name)],
            })
            .collect();

        let index = RepositoryIndex {
            name: name.to_string(),
            revision: 1,
            artifacts,
        };
        std::fs::write(
            root.join(INDEX_FILE),
            serde_json::to_string_pretty(&index).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_local_repository_roundtrip() {
        let dir = tempdir().unwrap();
        write_index(dir.path(), "main", &[("web", "nginx", "1.21.0")]);

        let repo = LocalRepository::open("main", 0, dir.path()).unwrap();
        let packages = repo.index().unwrap();
        assert_eq!(packages.len(), 1);

        let artifact = repo.search_artifact(&packages[0]).unwrap();
        assert_eq!(artifact.file_name, "nginx-1.21.0.tar.gz");
        assert!(artifact.location.starts_with(dir.path().to_str().unwrap()));
    }

    #[test]
    fn test_search_artifact_unknown_package() {
        let dir = tempdir().unwrap();
        write_index(dir.path(), "main", &[("web", "nginx", "1.21.0")]);

        let repo = LocalRepository::open("main", 0, dir.path()).unwrap();
        let stranger = Package::new("db", "redis", "6.2.0").unwrap();

        assert!(matches!(
            repo.search_artifact(&stranger),
            Err(Error::MatchNotFound(_))
        ));
    }

    #[test]
    fn test_missing_index_is_not_found() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            LocalRepository::open("main", 0, dir.path()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_compile_universe_respects_priority() {
        let high_dir = tempdir().unwrap();
        let low_dir = tempdir().unwrap();
        // Same identity in both; the high-priority copy must win
        write_index(high_dir.path(), "high", &[("web", "nginx", "1.21.0")]);
        write_index(low_dir.path(), "low", &[("web", "nginx", "1.21.0"), ("db", "redis", "6.2.0")]);

        let repositories: Vec<Box<dyn Repository>> = vec![
            Box::new(LocalRepository::open("low", 0, low_dir.path()).unwrap()),
            Box::new(LocalRepository::open("high", 10, high_dir.path()).unwrap()),
        ];

        let universe = compile_universe(&repositories).unwrap();
        assert_eq!(universe.len(), 2);
        // High-priority repo is consulted first
        assert_eq!(universe[0].name, "nginx");
    }

    #[test]
    fn test_search_by_name_and_label() {
        let dir = tempdir().unwrap();
        write_index(dir.path(), "main", &[("web", "nginx", "1.21.0"), ("db", "redis", "6.2.0")]);

        let repositories: Vec<Box<dyn Repository>> =
            vec![Box::new(LocalRepository::open("main", 0, dir.path()).unwrap())];

        let hits = search(&repositories, "ngin").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "nginx");

        let none = search(&repositories, "postgres").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_needs_sync() {
        let never_synced = RepositoryConfig::new("main", "https://example.com/main");
        assert!(needs_sync(&never_synced));

        let mut fresh = RepositoryConfig::new("main", "https://example.com/main");
        fresh.last_sync = Some(current_timestamp());
        assert!(!needs_sync(&fresh));

        let mut garbage = RepositoryConfig::new("main", "https://example.com/main");
        garbage.last_sync = Some("not-a-timestamp".to_string());
        assert!(needs_sync(&garbage));
    }
}
