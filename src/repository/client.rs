// src/repository/client.rs

//! Artifact transport clients
//!
//! The installer fetches artifacts through the `ArtifactClient` trait so
//! HTTP-backed and local-disk repositories look the same to the worker
//! pool. The HTTP client retries with backoff and downloads through a
//! temp file with an atomic rename.

use crate::artifact::Artifact;
use crate::error::{Error, Result};
use crate::repository::RepositoryIndex;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Transport abstraction for fetching artifacts and repository files
pub trait ArtifactClient: Send + Sync {
    /// Fetch an artifact into `dest_dir`, returning the local path
    fn download_artifact(&self, artifact: &Artifact, dest_dir: &Path) -> Result<PathBuf>;

    /// Fetch an arbitrary repository file to a destination path
    fn download_file(&self, location: &str, dest_path: &Path) -> Result<()>;
}

/// HTTP transport with retry support
pub struct HttpClient {
    client: Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Init(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Fetch and parse a repository index from its base URL
    pub fn fetch_index(&self, base_url: &str) -> Result<RepositoryIndex> {
        let index_url = if base_url.ends_with('/') {
            format!("{}index.json", base_url)
        } else {
            format!("{}/index.json", base_url)
        };

        info!("Fetching repository index from {}", index_url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(&index_url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::Download(format!(
                            "HTTP {} from {}",
                            response.status(),
                            index_url
                        )));
                    }

                    let index: RepositoryIndex = response.json().map_err(|e| {
                        Error::Download(format!("Failed to parse index JSON: {}", e))
                    })?;

                    info!(
                        "Fetched index with {} artifacts",
                        index.artifacts.len()
                    );
                    return Ok(index);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Download(format!(
                            "Failed to fetch index after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    warn!("Index fetch attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

impl ArtifactClient for HttpClient {
    fn download_artifact(&self, artifact: &Artifact, dest_dir: &Path) -> Result<PathBuf> {
        let dest_path = dest_dir.join(&artifact.file_name);
        self.download_file(&artifact.location, &dest_path)?;
        Ok(dest_path)
    }

    fn download_file(&self, location: &str, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", location, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(location).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::Download(format!(
                            "HTTP {} from {}",
                            response.status(),
                            location
                        )));
                    }

                    // Write to temporary file first
                    let temp_path = dest_path.with_extension("tmp");
                    let mut file = File::create(&temp_path)?;
                    io::copy(&mut response, &mut file)?;

                    // Atomic rename from temp to final destination
                    fs::rename(&temp_path, dest_path)?;

                    debug!("Downloaded to {}", dest_path.display());
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Download(format!(
                            "Failed to download after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

/// Local-disk transport for filesystem-backed repositories
#[derive(Debug, Default)]
pub struct LocalClient;

impl LocalClient {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactClient for LocalClient {
    fn download_artifact(&self, artifact: &Artifact, dest_dir: &Path) -> Result<PathBuf> {
        let dest_path = dest_dir.join(&artifact.file_name);
        self.download_file(&artifact.location, &dest_path)?;
        Ok(dest_path)
    }

    fn download_file(&self, location: &str, dest_path: &Path) -> Result<()> {
        let source = Path::new(location);
        if !source.exists() {
            return Err(Error::NotFound(format!(
                "artifact file missing: {}",
                location
            )));
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest_path)?;
        Ok(())
    }
}

/// Pick the transport matching an artifact location
pub fn is_remote_location(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::CompressionKind;
    use tempfile::tempdir;

    #[test]
    fn test_local_client_copies_artifact() {
        let source_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();

        let source = source_dir.path().join("layer.tar.gz");
        fs::write(&source, b"layer-bytes").unwrap();

        let artifact = Artifact {
            file_name: "layer.tar.gz".to_string(),
            location: source.display().to_string(),
            checksum: String::new(),
            compression: CompressionKind::Gzip,
            files: Vec::new(),
        };

        let fetched = LocalClient::new()
            .download_artifact(&artifact, dest_dir.path())
            .unwrap();
        assert_eq!(fs::read(&fetched).unwrap(), b"layer-bytes");
    }

    #[test]
    fn test_local_client_missing_source_fails() {
        let dest_dir = tempdir().unwrap();
        let artifact = Artifact {
            file_name: "layer.tar.gz".to_string(),
            location: "/nonexistent/layer.tar.gz".to_string(),
            checksum: String::new(),
            compression: CompressionKind::Gzip,
            files: Vec::new(),
        };

        assert!(matches!(
            LocalClient::new().download_artifact(&artifact, dest_dir.path()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_location_scheme_detection() {
        assert!(is_remote_location("https://layers.example.com/main/x.tar.zst"));
        assert!(is_remote_location("http://layers.example.com/main/x.tar.zst"));
        assert!(!is_remote_location("/var/cache/strata/x.tar.zst"));
    }
}
