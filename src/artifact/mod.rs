// src/artifact/mod.rs

//! Layer artifacts: verification and unpacking
//!
//! An artifact is one compressed tar layer holding a package's files.
//! Unpacking applies config-protection: a protected destination file
//! whose on-disk content differs from the shipped version is never
//! overwritten; the new version lands next to it under a numbered
//! `._cfg####_` name so local edits survive.

use crate::error::{Error, Result};
use crate::pkg::Package;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path prefixes protected by default, independent of package annotations
const DEFAULT_PROTECT_PREFIXES: &[&str] = &["/etc"];

/// How a layer artifact is compressed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    None,
    Gzip,
    #[default]
    Zstd,
}

/// A concrete, fetchable layer for one package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// File name within its repository
    pub file_name: String,
    /// Resolved location: an http(s) URL or a filesystem path
    pub location: String,
    /// Hex SHA-256 of the compressed artifact
    pub checksum: String,
    #[serde(default)]
    pub compression: CompressionKind,
    /// Shipped paths, absolute relative to the target root
    #[serde(default)]
    pub files: Vec<String>,
}

impl Artifact {
    /// Verify a downloaded artifact against its recorded checksum
    pub fn verify(&self, path: &Path) -> Result<()> {
        debug!("Verifying checksum for {}", path.display());
        let actual = hash_file(path)?;
        if actual != self.checksum {
            return Err(Error::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Unpack the downloaded archive under the target root
    ///
    /// Returns the absolute paths actually written (a protected, locally
    /// modified file is recorded under its `._cfg####_` name).
    pub fn unpack(
        &self,
        archive_path: &Path,
        root: &Path,
        protect: &ConfigProtect,
    ) -> Result<Vec<String>> {
        let file = File::open(archive_path)?;
        let reader: Box<dyn Read> = match self.compression {
            CompressionKind::None => Box::new(file),
            CompressionKind::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
            CompressionKind::Zstd => Box::new(zstd::stream::read::Decoder::new(file)?),
        };

        let mut archive = tar::Archive::new(reader);
        archive.set_preserve_permissions(true);

        let mut written = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let entry_path = entry.path()?.into_owned();
            let relative = entry_path
                .strip_prefix("./")
                .unwrap_or(&entry_path)
                .to_path_buf();
            if relative.as_os_str().is_empty() {
                continue;
            }

            let shipped = format!("/{}", relative.display());
            let dest = root.join(&relative);

            if entry.header().entry_type().is_dir() {
                fs::create_dir_all(&dest)?;
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }

            if entry.header().entry_type().is_file()
                && protect.is_protected(&shipped)
                && dest.exists()
            {
                let mut content = Vec::new();
                entry.read_to_end(&mut content)?;
                let existing = fs::read(&dest)?;

                if existing == content {
                    written.push(shipped);
                    continue;
                }

                let renamed = next_protected_name(&dest)?;
                fs::write(&renamed, &content)?;
                if let Ok(mode) = entry.header().mode() {
                    set_mode(&renamed, mode)?;
                }

                let recorded = format!(
                    "/{}",
                    renamed
                        .strip_prefix(root)
                        .unwrap_or(renamed.as_path())
                        .display()
                );
                warn!(
                    "preserving locally modified {}; new version saved as {}",
                    shipped, recorded
                );
                written.push(recorded);
            } else {
                entry.unpack(&dest)?;
                written.push(shipped);
            }
        }

        Ok(written)
    }
}

/// Hex SHA-256 of a file's content
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Next free `._cfg####_<name>` sibling for a protected destination
fn next_protected_name(dest: &Path) -> Result<PathBuf> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("/"));
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Parse(format!("unrepresentable path: {}", dest.display())))?;

    for counter in 1..10_000u32 {
        let candidate = dir.join(format!("._cfg{:04}_{}", counter, name));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(Error::Conflict(format!(
        "no free config-protect slot left for {}",
        dest.display()
    )))
}

/// The set of path prefixes whose destination files must not be
/// overwritten when locally modified
#[derive(Debug, Clone)]
pub struct ConfigProtect {
    prefixes: Vec<String>,
}

impl ConfigProtect {
    /// Combine the built-in prefixes with a package's declared ones
    pub fn for_package(package: &Package) -> Self {
        let mut prefixes: Vec<String> = DEFAULT_PROTECT_PREFIXES
            .iter()
            .map(|p| p.to_string())
            .collect();
        prefixes.extend(package.config_protect_paths());
        Self { prefixes }
    }

    /// A protection set with no prefixes (everything overwritable)
    pub fn disabled() -> Self {
        Self {
            prefixes: Vec::new(),
        }
    }

    pub fn is_protected(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::tempdir;

    /// Build a small gzip tar archive on disk from (path, content) pairs
    fn build_archive(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let archive_path = dir.join("layer.tar.gz");
        let file = File::create(&archive_path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path.trim_start_matches('/'), content.as_bytes())
                .unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
        archive_path
    }

    fn artifact_for(path: &Path, files: &[&str]) -> Artifact {
        Artifact {
            file_name: "layer.tar.gz".to_string(),
            location: path.display().to_string(),
            checksum: hash_file(path).unwrap(),
            compression: CompressionKind::Gzip,
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_verify_accepts_matching_checksum() {
        let scratch = tempdir().unwrap();
        let archive = build_archive(scratch.path(), &[("usr/bin/tool", "binary")]);
        let artifact = artifact_for(&archive, &["/usr/bin/tool"]);

        assert!(artifact.verify(&archive).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampered_file() {
        let scratch = tempdir().unwrap();
        let archive = build_archive(scratch.path(), &[("usr/bin/tool", "binary")]);
        let mut artifact = artifact_for(&archive, &["/usr/bin/tool"]);
        artifact.checksum = "0".repeat(64);

        assert!(matches!(
            artifact.verify(&archive),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unpack_writes_files_under_root() {
        let scratch = tempdir().unwrap();
        let root = tempdir().unwrap();
        let archive = build_archive(
            scratch.path(),
            &[("usr/bin/tool", "binary"), ("etc/tool/tool.conf", "port=80")],
        );
        let artifact = artifact_for(&archive, &["/usr/bin/tool", "/etc/tool/tool.conf"]);

        let written = artifact
            .unpack(&archive, root.path(), &ConfigProtect::disabled())
            .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(
            fs::read_to_string(root.path().join("usr/bin/tool")).unwrap(),
            "binary"
        );
        assert_eq!(
            fs::read_to_string(root.path().join("etc/tool/tool.conf")).unwrap(),
            "port=80"
        );
    }

    #[test]
    fn test_unpack_preserves_modified_protected_file() {
        let scratch = tempdir().unwrap();
        let root = tempdir().unwrap();

        // A locally edited config already on disk
        fs::create_dir_all(root.path().join("etc/tool")).unwrap();
        fs::write(root.path().join("etc/tool/tool.conf"), "port=9999").unwrap();

        let archive = build_archive(scratch.path(), &[("etc/tool/tool.conf", "port=80")]);
        let artifact = artifact_for(&archive, &["/etc/tool/tool.conf"]);
        let protect = ConfigProtect::for_package(
            &Package::new("app", "tool", "1.0.0").unwrap(),
        );

        let written = artifact.unpack(&archive, root.path(), &protect).unwrap();

        // Local edit untouched, shipped version parked next to it
        assert_eq!(
            fs::read_to_string(root.path().join("etc/tool/tool.conf")).unwrap(),
            "port=9999"
        );
        assert_eq!(written, vec!["/etc/tool/._cfg0001_tool.conf".to_string()]);
        assert_eq!(
            fs::read_to_string(root.path().join("etc/tool/._cfg0001_tool.conf")).unwrap(),
            "port=80"
        );
    }

    #[test]
    fn test_unpack_identical_protected_file_is_left_alone() {
        let scratch = tempdir().unwrap();
        let root = tempdir().unwrap();

        fs::create_dir_all(root.path().join("etc/tool")).unwrap();
        fs::write(root.path().join("etc/tool/tool.conf"), "port=80").unwrap();

        let archive = build_archive(scratch.path(), &[("etc/tool/tool.conf", "port=80")]);
        let artifact = artifact_for(&archive, &["/etc/tool/tool.conf"]);
        let protect = ConfigProtect::for_package(
            &Package::new("app", "tool", "1.0.0").unwrap(),
        );

        let written = artifact.unpack(&archive, root.path(), &protect).unwrap();

        assert_eq!(written, vec!["/etc/tool/tool.conf".to_string()]);
        assert!(!root.path().join("etc/tool/._cfg0001_tool.conf").exists());
    }

    #[test]
    fn test_unpack_rename_counter_advances() {
        let scratch = tempdir().unwrap();
        let root = tempdir().unwrap();

        fs::create_dir_all(root.path().join("etc/tool")).unwrap();
        fs::write(root.path().join("etc/tool/tool.conf"), "local").unwrap();
        fs::write(root.path().join("etc/tool/._cfg0001_tool.conf"), "older").unwrap();

        let archive = build_archive(scratch.path(), &[("etc/tool/tool.conf", "shipped")]);
        let artifact = artifact_for(&archive, &["/etc/tool/tool.conf"]);
        let protect = ConfigProtect::for_package(
            &Package::new("app", "tool", "1.0.0").unwrap(),
        );

        let written = artifact.unpack(&archive, root.path(), &protect).unwrap();
        assert_eq!(written, vec!["/etc/tool/._cfg0002_tool.conf".to_string()]);
    }

    #[test]
    fn test_protect_prefix_matching() {
        let protect = ConfigProtect::for_package(&{
            let mut p = Package::new("app", "tool", "1.0.0").unwrap();
            p.set_annotation(crate::pkg::ANNOTATION_CONFIG_PROTECT, "/var/lib/tool");
            p
        });

        assert!(protect.is_protected("/etc/anything"));
        assert!(protect.is_protected("/var/lib/tool/state"));
        assert!(!protect.is_protected("/var/lib/toolbox/state"));
        assert!(!protect.is_protected("/usr/bin/tool"));
        assert!(!ConfigProtect::disabled().is_protected("/etc/anything"));
    }
}
