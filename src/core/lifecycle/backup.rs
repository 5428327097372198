// src/core/lifecycle/backup.rs
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{TestPathError, Result};

/// Pristine copy of a file taken before its first mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBackup {
    pub original: PathBuf,
    pub backup: PathBuf,
}

/// Unique per-run identifier used in backup extensions
pub fn new_run_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(chrono::Utc::now().to_rfc3339().as_bytes());
    hasher.update(format!("{:?}", std::time::Instant::now()).as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    hash[..8].to_string()
}

/// Backup extension for one run, e.g. `tpbak-1a2b3c4d`
pub fn backup_extension(tag: &str, run_id: &str) -> String {
    format!("{}-{}", tag, run_id)
}

impl FileBackup {
    /// Path the backup of `original` gets for a given extension
    pub fn backup_path(original: &Path, extension: &str) -> PathBuf {
        let mut name = original
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(extension);
        original.with_file_name(name)
    }

    /// Copy `original` aside. An existing backup is kept as is, so calling
    /// this again for the same file and extension is a no-op.
    pub fn create(original: &Path, extension: &str) -> Result<Self> {
        let backup = Self::backup_path(original, extension);

        if !backup.exists() {
            std::fs::copy(original, &backup).map_err(|e| TestPathError::BackupRestore {
                path: original.to_path_buf(),
                message: format!("could not create backup {}: {}", backup.display(), e),
            })?;
            debug!("Backed up {} to {}", original.display(), backup.display());
        }

        Ok(Self {
            original: original.to_path_buf(),
            backup,
        })
    }

    pub fn exists(&self) -> bool {
        self.backup.exists()
    }

    /// Pristine content of the original file
    pub fn read_original(&self) -> Result<String> {
        std::fs::read_to_string(&self.backup).map_err(|e| TestPathError::BackupRestore {
            path: self.original.clone(),
            message: format!("could not read backup {}: {}", self.backup.display(), e),
        })
    }

    /// Put the pristine file back and remove the backup
    pub fn restore(&self) -> Result<()> {
        if !self.backup.exists() {
            return Err(TestPathError::BackupRestore {
                path: self.original.clone(),
                message: format!("backup {} is missing", self.backup.display()),
            });
        }
        std::fs::rename(&self.backup, &self.original)
            .or_else(|_| {
                // rename fails across devices; fall back to copy + delete
                std::fs::copy(&self.backup, &self.original)?;
                std::fs::remove_file(&self.backup)
            })
            .map_err(|e| TestPathError::BackupRestore {
                path: self.original.clone(),
                message: e.to_string(),
            })?;
        debug!("Restored {}", self.original.display());
        Ok(())
    }
}

/// Find backups left behind by earlier runs under `root`
pub fn find_orphaned_backups(root: &Path, tag: &str) -> Vec<FileBackup> {
    let marker = format!(".{}-", tag);

    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let at = name.rfind(&marker)?;
            let original = entry.path().with_file_name(&name[..at]);
            Some(FileBackup {
                original,
                backup: entry.path().to_path_buf(),
            })
        })
        .collect()
}
