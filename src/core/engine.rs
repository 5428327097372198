// src/core/engine.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use super::{
    exporter_for, find_orphaned_backups, recover_backups, CallCollector, Checkpoint,
    CollectionSession, ExportFormat, InstrumentationProfile, SourceInstrumentor,
    TestPathParser, TestPathStore, TestedInvoked,
};

/// Top-level operations behind the command line
pub struct Engine {
    config: Config,
}

/// Outcome of tracing a batch of invocations
#[derive(Debug)]
pub struct RunSummary {
    pub store: TestPathStore,
    pub failed: usize,
}

impl Engine {
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Trace every invocation of a collector manifest and export the paths
    pub async fn run(&self, invocations: &Path, format: &str, output: Option<PathBuf>) -> Result<()> {
        let format: ExportFormat = format.parse()?;
        let tested = CallCollector::load(invocations)
            .with_context(|| format!("Failed to load invocations from {}", invocations.display()))?;

        if tested.is_empty() {
            warn!("No invocations listed in {}", invocations.display());
        }

        let session = Arc::new(CollectionSession::open(self.config.clone())?);
        let termination = spawn_termination_handler(session.clone());

        let outcome = trace_all(&session, &tested).await;

        termination.abort();
        let restore_failures = session.close();
        if !restore_failures.is_empty() {
            error!(
                "{} file(s) could not be restored; check for *.{}-{} backups",
                restore_failures.len(),
                self.config.session.backup_tag,
                session.run_id()
            );
        }

        let summary = outcome?;
        info!(
            "Traced {} of {} invocation(s), {} failed",
            tested.len() - summary.failed,
            tested.len(),
            summary.failed
        );

        let exporter = exporter_for(format);
        match output {
            Some(path) => {
                let mut file = std::fs::File::create(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                exporter.export(&summary.store, &mut file)?;
                info!("Test paths written to {}", path.display());
            }
            None => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                exporter.export(&summary.store, &mut lock)?;
            }
        }

        Ok(())
    }

    /// Print the instrumented form of a file without modifying it
    pub async fn instrument(&self, file: &Path, profile: &str, show_mapping: bool) -> Result<()> {
        let profile = parse_profile(profile)?;
        let mut instrumentor = SourceInstrumentor::new(profile, &self.config.instrumentation)?;
        let instrumented = instrumentor
            .instrument_file(file)
            .with_context(|| format!("Failed to instrument {}", file.display()))?;

        info!("Passes: {}", instrumentor.pass_names().join(", "));
        for class in &instrumented.markers.classes {
            info!("Marked class {} at line {}", class.name, class.line);
        }
        for test in &instrumented.markers.tests {
            info!(
                "Marked test {} at line {}",
                test.method.as_deref().unwrap_or("<unknown>"),
                test.line
            );
        }

        print!("{}", instrumented.render());
        if show_mapping {
            println!("-- line mapping (original -> instrumented) --");
            for (original, target) in instrumented.mapping.entries() {
                println!("{} -> {}", original, target);
            }
        }
        Ok(())
    }

    /// Restore files an interrupted run left instrumented
    pub async fn restore(&self, scan: Option<PathBuf>) -> Result<()> {
        let checkpoint = Checkpoint::new(&self.config.session.checkpoint_dir);
        let mut restored = 0;
        let mut failures = 0;

        match checkpoint.load() {
            Some(state) if state.enabled => {
                if state.owner_alive() {
                    anyhow::bail!(
                        "run {} (pid {}) is still in progress; nothing restored",
                        state.run_id,
                        state.pid
                    );
                }
                warn!(
                    "Found checkpoint of run {} (pid {}) started at {}",
                    state.run_id, state.pid, state.started_at
                );
                let errors = recover_backups(&state.backups);
                restored += state.backups.len() - errors.len();
                failures += errors.len();
                checkpoint.disable()?;
            }
            _ => info!("No interrupted session recorded"),
        }

        if let Some(root) = scan {
            let orphans = find_orphaned_backups(&root, &self.config.session.backup_tag);
            info!("Found {} orphaned backup(s) under {}", orphans.len(), root.display());
            let errors = recover_backups(&orphans);
            restored += orphans.len() - errors.len();
            failures += errors.len();
        }

        info!("Restored {} file(s)", restored);
        if failures > 0 {
            anyhow::bail!("{} file(s) could not be restored", failures);
        }
        Ok(())
    }

    /// Write a default configuration file
    pub async fn init(&self, path: Option<PathBuf>, force: bool) -> Result<()> {
        let target_dir = path.unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&target_dir)?;
        let config_path = target_dir.join("testpath.toml");

        if config_path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
        }

        Config::default().save(&config_path)?;
        info!("Wrote {}", config_path.display());
        Ok(())
    }
}

fn parse_profile(profile: &str) -> Result<InstrumentationProfile> {
    match profile.to_ascii_lowercase().as_str() {
        "invoked" => Ok(InstrumentationProfile::Invoked),
        "test" | "test-method" => Ok(InstrumentationProfile::TestMethod),
        "both" => Ok(InstrumentationProfile::Both),
        other => anyhow::bail!("unknown profile '{}' (expected invoked, test or both)", other),
    }
}

/// Trace invocations one after another; only toolchain failures stop the batch
async fn trace_all(session: &CollectionSession, tested: &[TestedInvoked]) -> Result<RunSummary> {
    let mut parser = TestPathParser::new(session)?;
    let mut failed = 0;

    for (index, pair) in tested.iter().enumerate() {
        info!("[{}/{}] {}", index + 1, tested.len(), pair);

        match parser.parse(pair).await {
            Ok(paths) => debug!("{} path(s) for {}", paths.len(), pair.invoked.signature),
            Err(e) if !e.source.is_recoverable() => {
                error!(
                    "{} (line {}): {} failed: {}",
                    pair.invoked.signature, pair.invoked.invocation_line, e.phase, e.source
                );
                return Err(e.into());
            }
            Err(e) => {
                failed += 1;
                error!(
                    "{} (line {}): {} failed: {}",
                    pair.invoked.signature, pair.invoked.invocation_line, e.phase, e.source
                );
            }
        }
    }

    Ok(RunSummary {
        store: parser.into_store(),
        failed,
    })
}

/// Restore everything when the process is asked to stop
fn spawn_termination_handler(session: Arc<CollectionSession>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_termination().await;
        warn!("Interrupted, restoring instrumented files");
        session.close();
        std::process::exit(130);
    })
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut terminate) = signal(SignalKind::terminate()) {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        // no Ctrl-C support; keep waiting for SIGTERM
                        terminate.recv().await;
                    }
                }
                _ = terminate.recv() => {}
            }
            return;
        }
    }

    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instrumentor::fixtures::AUX_CLASS;
    use crate::core::lifecycle::FileBackup;

    fn engine(dir: &Path) -> Engine {
        let mut config = Config::default();
        config.session.checkpoint_dir = dir.join("state");
        Engine::with_config(config)
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        engine.init(Some(dir.path().to_path_buf()), false).await.unwrap();
        let written = Config::load(dir.path().join("testpath.toml")).unwrap();
        assert_eq!(written.compiler.program, "javac");

        assert!(engine.init(Some(dir.path().to_path_buf()), false).await.is_err());
        engine.init(Some(dir.path().to_path_buf()), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_scans_for_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("AuxClass.java");
        std::fs::write(&file, AUX_CLASS).unwrap();
        FileBackup::create(&file, "tpbak-0badc0de").unwrap();
        std::fs::write(&file, "instrumented").unwrap();

        engine(dir.path()).restore(Some(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), AUX_CLASS);
    }

    #[tokio::test]
    async fn test_restore_leaves_a_live_run_alone() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let checkpoint = Checkpoint::new(dir.path().join("state"));
        checkpoint.enable("0badc0de").unwrap();

        assert!(engine.restore(None).await.is_err());
        assert!(checkpoint.is_enabled());
    }

    #[test]
    fn test_profile_names() {
        assert_eq!(parse_profile("test").unwrap(), InstrumentationProfile::TestMethod);
        assert_eq!(parse_profile("Both").unwrap(), InstrumentationProfile::Both);
        assert!(parse_profile("all").is_err());
    }

    #[tokio::test]
    async fn test_run_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let err = engine(dir.path())
            .run(&dir.path().join("invocations.json"), "xml", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown export format"));
    }
}
