// src/core/lifecycle/compiler.rs
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::CompilerConfig;
use crate::error::{TestPathError, Result};

/// Drives an external Java compiler over single source files
#[derive(Debug, Clone)]
pub struct JavaCompiler {
    config: CompilerConfig,
}

impl JavaCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Arguments for compiling `source` into `output_dir`
    pub fn arguments(&self, source: &Path, output_dir: &Path, classpath: &[PathBuf]) -> Result<Vec<String>> {
        let mut entries: Vec<PathBuf> = vec![output_dir.to_path_buf()];
        for entry in classpath.iter().chain(self.config.classpath.iter()) {
            if !entries.contains(entry) {
                entries.push(entry.clone());
            }
        }
        let joined = std::env::join_paths(&entries)
            .map_err(|e| TestPathError::Config(format!("invalid classpath entry: {}", e)))?;

        let mut args = vec![
            "-d".to_string(),
            output_dir.display().to_string(),
            "-cp".to_string(),
            joined.to_string_lossy().to_string(),
            "-encoding".to_string(),
            self.config.encoding.clone(),
        ];

        if let Some(release) = &self.config.release {
            args.push("--release".to_string());
            args.push(release.clone());
        }

        if !self.config.inpath.is_empty() {
            let inpath = std::env::join_paths(&self.config.inpath)
                .map_err(|e| TestPathError::Config(format!("invalid inpath entry: {}", e)))?;
            args.push("-inpath".to_string());
            args.push(inpath.to_string_lossy().to_string());
        }

        args.push(source.display().to_string());
        Ok(args)
    }

    /// Compile one file; fails on a non-zero exit or an error marker in the output
    pub async fn compile(&self, source: &Path, output_dir: &Path, classpath: &[PathBuf]) -> Result<()> {
        std::fs::create_dir_all(output_dir)?;
        let args = self.arguments(source, output_dir, classpath)?;
        debug!("{} {}", self.config.program, args.join(" "));

        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                TestPathError::Toolchain(format!("could not run compiler '{}': {}", self.config.program, e))
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() || self.has_error_marker(&text) {
            return Err(TestPathError::Compile {
                file: source.to_path_buf(),
                output: text.trim().to_string(),
            });
        }

        info!("Compiled {}", source.display());
        Ok(())
    }

    fn has_error_marker(&self, output: &str) -> bool {
        self.config
            .error_markers
            .iter()
            .any(|marker| !marker.is_empty() && output.contains(marker.as_str()))
    }
}
