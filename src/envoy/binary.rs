//! Envoy binary resolution and verification.
//!
//! # Responsibilities
//! - Prefer a bundled binary, fall back to `envoy` on `PATH`
//! - Verify the binary's SHA-256 against a trusted checksum when one is known
//!
//! # Design Decisions
//! - Fails closed: a configured checksum that does not match is fatal
//! - A missing checksum only warns; startup is never blocked by its absence

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::envoy::error::{EnvoyError, EnvoyResult};

/// Name of the system-provided binary searched for on `PATH`.
pub const ENVOY_BINARY_NAME: &str = "envoy";

/// Trusted checksum baked in at build time, if any.
pub const BUILD_CHECKSUM: Option<&str> = option_env!("ENVOY_SUPERVISOR_ENVOY_CHECKSUM");

/// An executable that passed resolution (and verification, if requested).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    /// Absolute path to the executable.
    pub path: PathBuf,
    /// The verified checksum, if verification ran.
    pub checksum: Option<String>,
}

/// Locate and verify the envoy binary.
///
/// `bundled` is the preferred location; when it does not exist the system
/// binary is used instead. `checksum` is the trusted lowercase hex SHA-256.
pub fn resolve_binary(bundled: Option<&Path>, checksum: Option<&str>) -> EnvoyResult<ResolvedBinary> {
    let candidate = match bundled {
        Some(path) if path.is_file() => path.to_path_buf(),
        Some(path) => {
            tracing::warn!(
                service = "envoy",
                path = ?path,
                "bundled envoy binary not available, falling back to system envoy"
            );
            PathBuf::from(ENVOY_BINARY_NAME)
        }
        None => PathBuf::from(ENVOY_BINARY_NAME),
    };

    let path = look_path(&candidate)
        .ok_or_else(|| EnvoyError::BinaryNotFound(candidate.display().to_string()))?;

    let checksum = match checksum.map(str::trim).filter(|c| !c.is_empty()) {
        Some(expected) => Some(verify_checksum(&path, expected)?),
        None => {
            tracing::warn!(
                service = "envoy",
                path = ?path,
                "no checksum defined, envoy binary will not be verified!"
            );
            None
        }
    };

    Ok(ResolvedBinary { path, checksum })
}

/// Resolve an executable the way a shell would.
///
/// Candidates containing a path separator are checked directly; bare names
/// are searched for in every `PATH` entry.
pub fn look_path(candidate: &Path) -> Option<PathBuf> {
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return is_executable(candidate).then(|| absolute(candidate));
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(candidate))
        .find(|path| is_executable(path))
        .map(|path| absolute(&path))
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Hex-encoded SHA-256 of a file's full contents.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Require the file's checksum to equal `expected`. Returns the checksum.
pub fn verify_checksum(path: &Path, expected: &str) -> EnvoyResult<String> {
    let actual = file_checksum(path).map_err(|source| EnvoyError::ChecksumRead {
        path: path.to_path_buf(),
        source,
    })?;

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(EnvoyError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(actual)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_executable(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_file_checksum_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_checksum(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_resolve_bundled_with_matching_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_executable(dir.path(), "envoy", b"#!/bin/sh\n");
        let expected = file_checksum(&path).unwrap().to_uppercase();

        let resolved = resolve_binary(Some(&path), Some(&expected)).unwrap();
        assert_eq!(resolved.path, path);
        assert_eq!(resolved.checksum.as_deref(), Some(expected.to_lowercase().as_str()));
    }

    #[test]
    fn test_checksum_mismatch_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_executable(dir.path(), "envoy", b"#!/bin/sh\n");

        let err = resolve_binary(Some(&path), Some("deadbeef")).unwrap_err();
        assert!(matches!(err, EnvoyError::ChecksumMismatch { ref expected, .. } if expected == "deadbeef"));
    }

    #[test]
    fn test_blank_checksum_skips_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_executable(dir.path(), "envoy", b"#!/bin/sh\n");

        let resolved = resolve_binary(Some(&path), Some("  ")).unwrap();
        assert!(resolved.checksum.is_none());
    }

    #[test]
    fn test_non_executable_path_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envoy");
        std::fs::write(&path, b"data").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(look_path(&path).is_none());
    }

    #[test]
    fn test_look_path_searches_path_for_bare_names() {
        assert!(look_path(Path::new("sh")).is_some());
        assert!(look_path(Path::new("definitely-not-a-real-binary-1234")).is_none());
    }
}
