use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TestPathError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External compiler settings
    pub compiler: CompilerConfig,

    /// Debugger / probe tracer settings
    pub tracer: TracerConfig,

    /// Source instrumentation settings
    pub instrumentation: InstrumentationConfig,

    /// Backup and checkpoint settings
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compiler executable (javac, ajc, ...)
    pub program: String,

    /// Extra classpath entries (libraries, test framework jars)
    pub classpath: Vec<PathBuf>,

    /// Output directory used when an invoked carries no compiled-artifact path
    pub output_dir: PathBuf,

    /// Source encoding
    pub encoding: String,

    /// Java release passed to the compiler (e.g. "11")
    pub release: Option<String>,

    /// Weaving inpath, only meaningful for aspect compilers
    pub inpath: Vec<PathBuf>,

    /// Substrings in compiler output that signal a failed compilation
    pub error_markers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Step through the invocation with an external line debugger
    Jdb,
    /// Collect lines reported by a bytecode probe agent
    Probe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Which tracing backend to use
    pub backend: BackendKind,

    /// Debugger executable
    pub debugger: String,

    /// JVM executable (probe backend)
    pub java: String,

    /// Runtime classpath entries added after the compiled class roots
    pub classpath: Vec<PathBuf>,

    /// Source roots handed to the debugger
    pub sourcepath: Vec<PathBuf>,

    /// Main class that runs a test class (receives the test class name)
    pub runner: String,

    /// Whether the watchdog is armed
    pub timeout_enabled: bool,

    /// Watchdog delay in milliseconds
    pub timeout_ms: u64,

    /// Probe agent jar (probe backend)
    pub probe_agent: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Insert marker annotations; their types are generated and compiled
    /// into every output directory of a run
    pub emit_markers: bool,

    /// Annotation prepended to class declarations
    pub class_marker: String,

    /// Annotation appended to test annotations
    pub test_marker: String,

    /// Annotations that identify a test method
    pub test_annotations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding the checkpoint marker file
    pub checkpoint_dir: PathBuf,

    /// Tag used to build the per-run backup extension
    pub backup_tag: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "javac".to_string(),
            classpath: vec![],
            output_dir: PathBuf::from("target/testpath-classes"),
            encoding: "UTF-8".to_string(),
            release: None,
            inpath: vec![],
            error_markers: vec!["error at".to_string(), ": error:".to_string()],
        }
    }
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Jdb,
            debugger: "jdb".to_string(),
            java: "java".to_string(),
            classpath: vec![],
            sourcepath: vec![],
            runner: "org.junit.runner.JUnitCore".to_string(),
            timeout_enabled: true,
            timeout_ms: 10 * 60 * 1000,
            probe_agent: None,
        }
    }
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            emit_markers: true,
            class_marker: "@testpath.runtime.CollectCalls".to_string(),
            test_marker: "@testpath.runtime.CollectInvocations".to_string(),
            test_annotations: vec![
                "@Test".to_string(),
                "@org.junit.Test".to_string(),
                "@org.junit.jupiter.api.Test".to_string(),
                "@ParameterizedTest".to_string(),
                "@RepeatedTest".to_string(),
            ],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: std::env::temp_dir().join("testpath"),
            backup_tag: "tpbak".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| TestPathError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TestPathError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Err(TestPathError::Config(format!(
                        "configuration file {} does not exist",
                        p.as_ref().display()
                    )))
                }
            }
            None => {
                // Try common config file locations
                let candidates = [
                    "testpath.toml",
                    "TestPath.toml",
                    ".testpath.toml",
                ];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.backup_tag.trim().is_empty() {
            return Err(TestPathError::Config("session.backup_tag must not be empty".to_string()));
        }
        if self.tracer.timeout_enabled && self.tracer.timeout_ms == 0 {
            return Err(TestPathError::Config(
                "tracer.timeout_ms must be positive when the timeout is enabled".to_string(),
            ));
        }
        if self.tracer.backend == BackendKind::Probe && self.tracer.probe_agent.is_none() {
            return Err(TestPathError::Config(
                "tracer.probe_agent is required by the probe backend".to_string(),
            ));
        }
        Ok(())
    }
}
