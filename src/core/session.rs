// src/core/session.rs
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{TestPathError, Result};
use super::lifecycle::{new_run_id, recover_backups, FileLifecycleOrchestrator};
use super::tracer::{create_backend, TraceBackend};

/// State of one collection run, passed explicitly to everything that needs it.
///
/// Opening a session enables the checkpoint; closing it restores every
/// instrumented file and disables the checkpoint. Closing happens at most
/// once, whether triggered by the end of the run, a termination signal or
/// the session being dropped during a panic.
pub struct CollectionSession {
    run_id: String,
    config: Config,
    orchestrator: FileLifecycleOrchestrator,
    backend: Box<dyn TraceBackend>,
    closed: AtomicBool,
}

impl CollectionSession {
    pub fn open(config: Config) -> Result<Self> {
        let backend = create_backend(&config.tracer)?;
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: Config, backend: Box<dyn TraceBackend>) -> Result<Self> {
        let run_id = new_run_id();
        let orchestrator = FileLifecycleOrchestrator::new(&config, &run_id);

        if let Some(stale) = orchestrator.checkpoint().stale(&run_id) {
            if stale.owner_alive() {
                return Err(TestPathError::Config(format!(
                    "run {} (pid {}) started at {} is still in progress",
                    stale.run_id, stale.pid, stale.started_at
                )));
            }
            warn!(
                "Run {} (pid {}) started at {} did not finish; restoring {} file(s)",
                stale.run_id,
                stale.pid,
                stale.started_at,
                stale.backups.len()
            );
            let failures = recover_backups(&stale.backups);
            if !failures.is_empty() {
                warn!("{} file(s) could not be recovered and need manual attention", failures.len());
            }
        }

        orchestrator.checkpoint().enable(&run_id)?;
        info!("Session {} opened with {} backend", run_id, backend.name());

        Ok(Self {
            run_id,
            config,
            orchestrator,
            backend,
            closed: AtomicBool::new(false),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &FileLifecycleOrchestrator {
        &self.orchestrator
    }

    pub fn backend(&self) -> &dyn TraceBackend {
        self.backend.as_ref()
    }

    /// Restore all files and disable the checkpoint; later calls do nothing.
    /// Failures are logged and returned, never raised.
    pub fn close(&self) -> Vec<TestPathError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return vec![];
        }

        let mut failures = self.orchestrator.restore_all();
        if let Err(e) = self.orchestrator.checkpoint().disable() {
            error!("Could not disable checkpoint: {}", e);
            failures.push(e);
        }
        info!("Session {} closed", self.run_id);
        failures
    }
}

impl Drop for CollectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
