// src/core/lifecycle/mod.rs
//! Backup, instrument, compile and restore of the files a trace touches.

pub mod annotations;
pub mod backup;
pub mod checkpoint;
pub mod compiler;

pub use annotations::MarkerAnnotation;
pub use backup::{backup_extension, find_orphaned_backups, new_run_id, FileBackup};
pub use checkpoint::Checkpoint;
pub use compiler::JavaCompiler;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::{Config, InstrumentationConfig};
use crate::error::{TestPathError, Result};
use super::instrumentor::{InstrumentationProfile, MarkerRegistry, SourceInstrumentor};
use super::model::LineMapping;

/// Snapshot of a file currently under instrumentation
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub path: PathBuf,
    pub profile: InstrumentationProfile,
    pub mapping: LineMapping,
    pub markers: MarkerRegistry,
    pub compiled: bool,
}

#[derive(Debug)]
struct TrackedFile {
    prepared: PreparedFile,
    source_backup: FileBackup,
    class_backups: Vec<FileBackup>,
}

/// Owns every mutation of user files during a session.
///
/// Files are keyed by canonical path, so a file that holds both the test
/// method and the invoked is backed up once, instrumented with the union of
/// both profiles and restored once.
pub struct FileLifecycleOrchestrator {
    instrumentation: InstrumentationConfig,
    compiler: JavaCompiler,
    extension: String,
    checkpoint: Checkpoint,
    files: Mutex<HashMap<PathBuf, TrackedFile>>,
    runtime_dir: PathBuf,
    marker_outputs: Mutex<HashSet<PathBuf>>,
    generated: Mutex<Vec<PathBuf>>,
}

impl FileLifecycleOrchestrator {
    pub fn new(config: &Config, run_id: &str) -> Self {
        Self {
            instrumentation: config.instrumentation.clone(),
            compiler: JavaCompiler::new(config.compiler.clone()),
            extension: backup_extension(&config.session.backup_tag, run_id),
            checkpoint: Checkpoint::new(&config.session.checkpoint_dir),
            files: Mutex::new(HashMap::new()),
            runtime_dir: config.session.checkpoint_dir.join(format!("runtime-{}", run_id)),
            marker_outputs: Mutex::new(HashSet::new()),
            generated: Mutex::new(vec![]),
        }
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn backup_extension(&self) -> &str {
        &self.extension
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, TrackedFile>> {
        // a panic while holding the lock must not block the restore path
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Back up and instrument `path` for `profile`.
    ///
    /// Calling this again for a profile the file already covers changes
    /// nothing. A new role re-instruments the pristine content with the
    /// union profile; the existing backup is reused.
    pub fn prepare(&self, path: &Path, profile: InstrumentationProfile) -> Result<PreparedFile> {
        let key = path.canonicalize()?;
        let mut files = self.lock();

        if let Some(tracked) = files.get_mut(&key) {
            if tracked.prepared.profile.covers(profile) {
                debug!("{} already instrumented as {:?}", key.display(), tracked.prepared.profile);
                return Ok(tracked.prepared.clone());
            }

            let union = tracked.prepared.profile.union(profile);
            info!("Re-instrumenting {} as {:?}", key.display(), union);
            let result = tracked
                .source_backup
                .read_original()
                .and_then(|original| self.instrument_into(&key, &original, union));

            return match result {
                Ok(prepared) => {
                    tracked.prepared = prepared.clone();
                    Ok(prepared)
                }
                Err(e) => {
                    if let Some(tracked) = files.remove(&key) {
                        self.restore_tracked(tracked);
                    }
                    Err(e)
                }
            };
        }

        let source_backup = FileBackup::create(&key, &self.extension)?;
        if let Err(e) = self.checkpoint.record_backup(&source_backup) {
            warn!("Could not record backup of {} in checkpoint: {}", key.display(), e);
        }

        let result = source_backup
            .read_original()
            .and_then(|original| self.instrument_into(&key, &original, profile));

        match result {
            Ok(prepared) => {
                info!("Instrumented {} as {:?}", key.display(), profile);
                files.insert(
                    key,
                    TrackedFile {
                        prepared: prepared.clone(),
                        source_backup,
                        class_backups: vec![],
                    },
                );
                Ok(prepared)
            }
            Err(e) => {
                self.restore_tracked(TrackedFile {
                    prepared: PreparedFile {
                        path: key,
                        profile,
                        mapping: LineMapping::new(),
                        markers: MarkerRegistry::default(),
                        compiled: false,
                    },
                    source_backup,
                    class_backups: vec![],
                });
                Err(e)
            }
        }
    }

    fn instrument_into(&self, path: &Path, original: &str, profile: InstrumentationProfile) -> Result<PreparedFile> {
        let mut instrumentor = SourceInstrumentor::new(profile, &self.instrumentation)?;
        let lines = original.lines().map(|l| l.to_string()).collect();
        let instrumented = instrumentor.instrument(path, lines)?;
        std::fs::write(path, instrumented.render())?;

        Ok(PreparedFile {
            path: path.to_path_buf(),
            profile,
            mapping: instrumented.mapping,
            markers: instrumented.markers,
            compiled: false,
        })
    }

    /// Current state of a prepared file
    pub fn prepared(&self, path: &Path) -> Option<PreparedFile> {
        let key = path.canonicalize().ok()?;
        self.lock().get(&key).map(|t| t.prepared.clone())
    }

    /// Compile a prepared file once; a failure restores it immediately.
    ///
    /// `class_file` is the compiled artifact the compiler will overwrite and
    /// gets backed up first when it exists.
    pub async fn compile(
        &self,
        path: &Path,
        output_dir: &Path,
        classpath: &[PathBuf],
        class_file: Option<&Path>,
    ) -> Result<()> {
        let key = path.canonicalize()?;
        {
            let mut files = self.lock();
            let tracked = files.get_mut(&key).ok_or_else(|| TestPathError::BackupRestore {
                path: key.clone(),
                message: "file is not under instrumentation".to_string(),
            })?;
            if tracked.prepared.compiled {
                return Ok(());
            }

            if let Some(class_file) = class_file.filter(|c| c.exists()) {
                if !tracked.class_backups.iter().any(|b| b.original == class_file) {
                    let backup = FileBackup::create(class_file, &self.extension)?;
                    if let Err(e) = self.checkpoint.record_backup(&backup) {
                        warn!("Could not record backup of {} in checkpoint: {}", class_file.display(), e);
                    }
                    tracked.class_backups.push(backup);
                }
            }
        }

        let compiled = match self.compile_marker_types(output_dir, classpath).await {
            Ok(()) => self.compiler.compile(&key, output_dir, classpath).await,
            Err(e) => Err(e),
        };

        match compiled {
            Ok(()) => {
                if let Some(tracked) = self.lock().get_mut(&key) {
                    tracked.prepared.compiled = true;
                }
                Ok(())
            }
            Err(e) => {
                warn!("Restoring {} after failed compilation", key.display());
                if let Err(restore_error) = self.restore(&key) {
                    error!("{}", restore_error);
                }
                Err(e)
            }
        }
    }

    /// Compile the marker annotation types into `output_dir` once per run.
    ///
    /// A failure here means no instrumented file can compile, so it is
    /// reported as a toolchain error.
    async fn compile_marker_types(&self, output_dir: &Path, classpath: &[PathBuf]) -> Result<()> {
        if !self.instrumentation.emit_markers {
            return Ok(());
        }
        let done = self
            .marker_outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(output_dir);
        if done {
            return Ok(());
        }

        for marker in MarkerAnnotation::from_config(&self.instrumentation)? {
            let source = self.runtime_dir.join(marker.source_path());
            if let Some(parent) = source.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&source, marker.source())?;

            let class_file = output_dir.join(marker.class_path());
            let existed = class_file.exists();
            self.compiler
                .compile(&source, output_dir, classpath)
                .await
                .map_err(|e| match e {
                    TestPathError::Compile { output, .. } => TestPathError::Toolchain(format!(
                        "could not compile marker annotation {}: {}",
                        marker.qualified_name(),
                        output
                    )),
                    other => other,
                })?;
            if !existed {
                self.generated
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(class_file);
            }
            debug!("Marker {} compiled into {}", marker.qualified_name(), output_dir.display());
        }

        self.marker_outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(output_dir.to_path_buf());
        Ok(())
    }

    /// Restore one file and its compiled artifacts
    pub fn restore(&self, path: &Path) -> Result<()> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let tracked = self.lock().remove(&key);
        match tracked {
            Some(tracked) => match self.restore_tracked(tracked).into_iter().next() {
                Some(e) => Err(e),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Restore everything still tracked. Failures are logged and returned,
    /// never raised, and a second call finds nothing left to do.
    pub fn restore_all(&self) -> Vec<TestPathError> {
        self.remove_marker_types();
        let tracked: Vec<TrackedFile> = self.lock().drain().map(|(_, t)| t).collect();
        if tracked.is_empty() {
            return vec![];
        }

        info!("Restoring {} instrumented file(s)", tracked.len());
        tracked
            .into_iter()
            .flat_map(|t| self.restore_tracked(t))
            .collect()
    }

    /// Best effort; leftover marker classes are harmless
    fn remove_marker_types(&self) {
        let generated: Vec<PathBuf> = self
            .generated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for class_file in generated {
            if let Err(e) = std::fs::remove_file(&class_file) {
                debug!("Could not remove {}: {}", class_file.display(), e);
            }
        }
        if self.runtime_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.runtime_dir) {
                debug!("Could not remove {}: {}", self.runtime_dir.display(), e);
            }
        }
    }

    fn restore_tracked(&self, tracked: TrackedFile) -> Vec<TestPathError> {
        let mut errors = vec![];
        let backups = std::iter::once(tracked.source_backup).chain(tracked.class_backups);

        for backup in backups {
            match backup.restore() {
                Ok(()) => {
                    if let Err(e) = self.checkpoint.forget_backup(&backup) {
                        warn!("Could not update checkpoint: {}", e);
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    errors.push(e);
                }
            }
        }

        errors
    }

    pub fn tracked_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.lock().keys().cloned().collect();
        files.sort();
        files
    }
}

/// Put back files listed by an interrupted run's checkpoint
pub fn recover_backups(backups: &[FileBackup]) -> Vec<TestPathError> {
    let mut errors = vec![];
    for backup in backups.iter().filter(|b| b.exists()) {
        match backup.restore() {
            Ok(()) => info!("Recovered {}", backup.original.display()),
            Err(e) => {
                error!("{}", e);
                errors.push(e);
            }
        }
    }
    errors
}
