// src/core/lifecycle/checkpoint.rs
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use super::backup::FileBackup;

/// Persisted content of the checkpoint marker file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub enabled: bool,
    pub run_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    /// Backups that must be restored if this run never finishes
    pub backups: Vec<FileBackup>,
}

impl CheckpointState {
    /// Whether the process that wrote this checkpoint is still running
    pub fn owner_alive(&self) -> bool {
        process_alive(self.pid)
    }
}

/// Whether a process with this id exists
pub fn process_alive(pid: u32) -> bool {
    pid == std::process::id() || pid_running(pid)
}

#[cfg(target_os = "linux")]
fn pid_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn pid_running(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn pid_running(_pid: u32) -> bool {
    false
}

/// File-backed flag recording that a trace session is in flight
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join("checkpoint.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker file; a missing or unreadable file means disabled
    pub fn load(&self) -> Option<CheckpointState> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<CheckpointState>(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.load().map_or(false, |s| s.enabled)
    }

    /// Enabled checkpoint left by a run other than `run_id`
    pub fn stale(&self, run_id: &str) -> Option<CheckpointState> {
        self.load().filter(|s| s.enabled && s.run_id != run_id)
    }

    pub fn enable(&self, run_id: &str) -> Result<()> {
        let state = CheckpointState {
            enabled: true,
            run_id: run_id.to_string(),
            pid: std::process::id(),
            started_at: Utc::now(),
            backups: vec![],
        };
        self.write(&state)?;
        debug!("Checkpoint enabled at {}", self.path.display());
        Ok(())
    }

    pub fn record_backup(&self, backup: &FileBackup) -> Result<()> {
        let Some(mut state) = self.load() else {
            return Ok(());
        };
        if !state.backups.contains(backup) {
            state.backups.push(backup.clone());
            self.write(&state)?;
        }
        Ok(())
    }

    pub fn forget_backup(&self, backup: &FileBackup) -> Result<()> {
        let Some(mut state) = self.load() else {
            return Ok(());
        };
        state.backups.retain(|b| b != backup);
        self.write(&state)
    }

    pub fn disable(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            debug!("Checkpoint disabled");
        }
        Ok(())
    }

    fn write(&self, state: &CheckpointState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_and_disable() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("state"));

        assert!(!checkpoint.is_enabled());
        checkpoint.enable("run1").unwrap();
        assert!(checkpoint.is_enabled());
        assert!(checkpoint.stale("run1").is_none());
        assert!(checkpoint.stale("run2").is_some());

        checkpoint.disable().unwrap();
        assert!(!checkpoint.is_enabled());
        checkpoint.disable().unwrap();
    }

    #[test]
    fn test_backups_are_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path());
        let backup = FileBackup {
            original: PathBuf::from("A.java"),
            backup: PathBuf::from("A.java.tpbak-1"),
        };

        // recording without an enabled checkpoint is ignored
        checkpoint.record_backup(&backup).unwrap();
        assert!(checkpoint.load().is_none());

        checkpoint.enable("run1").unwrap();
        checkpoint.record_backup(&backup).unwrap();
        checkpoint.record_backup(&backup).unwrap();
        assert_eq!(checkpoint.load().unwrap().backups, vec![backup.clone()]);

        checkpoint.forget_backup(&backup).unwrap();
        assert!(checkpoint.load().unwrap().backups.is_empty());
    }

    #[test]
    fn test_owner_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path());
        checkpoint.enable("run1").unwrap();

        let mut state = checkpoint.load().unwrap();
        assert_eq!(state.pid, std::process::id());
        assert!(state.owner_alive());

        state.pid = u32::MAX;
        checkpoint.write(&state).unwrap();
        assert!(!checkpoint.stale("run2").unwrap().owner_alive());
    }

    #[test]
    fn test_garbage_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path());
        std::fs::write(checkpoint.path(), "not json").unwrap();
        assert!(!checkpoint.is_enabled());
    }
}
