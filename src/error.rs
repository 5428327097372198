use std::path::PathBuf;
use thiserror::Error;

/// Main error type for test path computation
#[derive(Error, Debug)]
pub enum TestPathError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid signature '{0}'")]
    InvalidSignature(String),

    /// A hole-plugging pass found code that breaks one of its structural assumptions
    #[error("Instrumentation invariant violated in {} at line {line}: {message}", file.display())]
    InstrumentationInvariant {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Compilation of {} failed:\n{output}", file.display())]
    Compile { file: PathBuf, output: String },

    #[error("Debugger protocol error: {0}")]
    TracerProtocol(String),

    #[error("Backup/restore of {} failed: {message}", path.display())]
    BackupRestore { path: PathBuf, message: String },

    /// Missing compiler, debugger or other tool the whole run depends on
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    #[error("Source parse error: {0}")]
    Parser(String),
}

impl TestPathError {
    /// Whether this failure only affects the current invocation
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TestPathError::Toolchain(_) | TestPathError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, TestPathError>;
