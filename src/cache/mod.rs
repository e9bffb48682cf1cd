//! Host-side snapshot cache with cross-process populator election
//!
//! One fixed directory holds the lock file and at most one artifact per
//! role. "Cache present" means the directory contains at least one entry
//! other than the lock file; the lock file alone never counts. Population
//! is guarded by a non-blocking exclusive flock so that when parallel test
//! processes race an empty cache, exactly one of them does the copy-out.
//!
//! The lock file is created once and never deleted; holding it is what
//! designates the populator, not its existence. Losers of the race skip
//! population and proceed, assuming the winner finishes within the same
//! setup phase.

use crate::config::Config;
use crate::error::{RespawnError, RespawnResult};
use crate::service::{Role, ServiceHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lock file name inside the cache directory; never treated as an artifact
pub const LOCK_FILE_NAME: &str = "cache.lock";

/// Manifest written by the populator after all artifacts are in place
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "RESPAWN_CACHE_DIR";

/// Held populator lock; dropping it releases the flock
///
/// Whoever holds this is the one process responsible for copying artifacts
/// into the cache. The underlying file stays on disk after release.
pub struct PopulatorLock {
    _lock_file: File,
    path: PathBuf,
}

impl PopulatorLock {
    /// Path of the lock file backing this lock
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Record of one cached artifact in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// File name within the cache directory
    pub file: String,
    /// Hex SHA256 of the artifact contents
    pub sha256: String,
}

/// Metadata written after a successful population
///
/// Diagnostics and integrity data only: cache presence is still decided by
/// directory listing, not by this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManifest {
    pub created_at: DateTime<Utc>,
    pub artifacts: HashMap<Role, ArtifactRecord>,
}

/// Single-entry, host-filesystem-backed snapshot cache
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    /// Cache rooted at an explicit directory
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Cache at the default host location
    ///
    /// Resolution order: `RESPAWN_CACHE_DIR`, then the user cache directory
    /// under `respawn/snapshots`, then `./.respawn-cache`.
    pub fn at_default_location() -> Self {
        Self::new(Self::resolve_dir())
    }

    /// Cache at the configured directory, or the default location when no
    /// directory is configured
    pub fn from_config(config: &Config) -> Self {
        match &config.cache.dir {
            Some(dir) => Self::new(dir.clone()),
            None => Self::at_default_location(),
        }
    }

    /// Resolve the default cache directory
    pub fn resolve_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::cache_dir()
            .map(|d| d.join("respawn").join("snapshots"))
            .unwrap_or_else(|| PathBuf::from(".respawn-cache"))
    }

    /// The cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Host path of the artifact for a role
    pub fn artifact_path(&self, role: Role) -> PathBuf {
        self.dir.join(role.artifact_file_name())
    }

    /// Whether the cache holds any artifact
    ///
    /// True iff the directory contains at least one entry that is not the
    /// lock file. Safe to call without holding any lock; a missing or
    /// unreadable directory reports absent.
    pub fn is_present(&self) -> bool {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cache directory {} unreadable: {}", self.dir.display(), e);
                return false;
            }
        };

        for entry in entries.flatten() {
            if entry.file_name() != LOCK_FILE_NAME {
                return true;
            }
        }
        false
    }

    /// Try to become the one process that populates the cache
    ///
    /// Non-blocking: returns `Ok(None)` when another process already holds
    /// the lock, which is the expected outcome for all but one of a set of
    /// racing processes.
    pub fn try_become_populator(&self) -> RespawnResult<Option<PopulatorLock>> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            RespawnError::io(format!("creating cache directory {}", self.dir.display()), e)
        })?;

        let lock_path = self.dir.join(LOCK_FILE_NAME);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                RespawnError::io(format!("opening lock file {}", lock_path.display()), e)
            })?;

        match try_flock_exclusive(&lock_file) {
            Ok(true) => {
                debug!("Acquired populator lock at {}", lock_path.display());
                Ok(Some(PopulatorLock {
                    _lock_file: lock_file,
                    path: lock_path,
                }))
            }
            Ok(false) => {
                debug!("Populator lock held by another process, skipping population");
                Ok(None)
            }
            Err(e) => Err(RespawnError::LockFailed {
                path: lock_path,
                source: e,
            }),
        }
    }

    /// Copy one role's artifact out of its instance into the cache
    ///
    /// Only the lock holder may call this; taking the lock by reference
    /// makes that a compile-time obligation. Any I/O failure is fatal: a
    /// partial cache is worse than no cache.
    pub async fn populate(
        &self,
        role: Role,
        handle: &dyn ServiceHandle,
        instance_path: &str,
        _lock: &PopulatorLock,
    ) -> RespawnResult<ArtifactRecord> {
        let dest = self.artifact_path(role);
        info!(
            "Populating cache: {} {} -> {}",
            role,
            instance_path,
            dest.display()
        );

        handle.copy_file_out(instance_path, &dest).await?;

        let sha256 = hash_file(&dest)?;
        Ok(ArtifactRecord {
            file: role.artifact_file_name().to_string(),
            sha256,
        })
    }

    /// Write the manifest recording a completed population
    pub fn write_manifest(&self, manifest: &CacheManifest) -> RespawnResult<()> {
        let path = self.dir.join(MANIFEST_FILE_NAME);
        let content = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, content)
            .map_err(|e| RespawnError::io(format!("writing manifest {}", path.display()), e))?;
        debug!("Wrote cache manifest {}", path.display());
        Ok(())
    }

    /// Load the manifest, if one was ever written
    pub fn load_manifest(&self) -> RespawnResult<Option<CacheManifest>> {
        let path = self.dir.join(MANIFEST_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| RespawnError::io(format!("reading manifest {}", path.display()), e))?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// Hash a cached artifact's contents using SHA256, hex-encoded
fn hash_file(path: &Path) -> RespawnResult<String> {
    let contents = fs::read(path)
        .map_err(|e| RespawnError::io(format!("reading artifact {}", path.display()), e))?;

    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(hex::encode(hasher.finalize()))
}

/// Try to acquire an exclusive flock on a file (non-blocking)
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if it is
/// already held elsewhere.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: flock is a standard POSIX call and fd is a valid
        // descriptor owned by `file` for the duration of the call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}
