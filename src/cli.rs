use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;

use crate::config::BackendKind;
use crate::core::Engine;

#[derive(Parser)]
#[command(name = "testpath")]
#[command(about = "Computes the lines a test method executes inside the methods it calls")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default testpath.toml
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Trace the invocations listed in a collector manifest
    Run {
        /// Manifest of (test method, invoked) pairs
        invocations: PathBuf,

        /// Output format (console, csv, json)
        #[arg(long, default_value = "console")]
        format: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Abort a trace after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Never abort a trace
        #[arg(long, conflicts_with = "timeout_ms")]
        no_timeout: bool,

        /// Tracer backend (jdb, probe)
        #[arg(long, value_enum)]
        backend: Option<BackendKind>,
    },

    /// Show the instrumented form of a source file
    Instrument {
        /// Java source file
        file: PathBuf,

        /// Which passes to run (invoked, test, both)
        #[arg(long, default_value = "both")]
        profile: String,

        /// Also print the line mapping
        #[arg(long)]
        mapping: bool,
    },

    /// Restore files left instrumented by an interrupted run
    Restore {
        /// Also scan this directory for orphaned backups
        #[arg(long)]
        scan: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn execute(self, mut engine: Engine) -> Result<()> {
        match self.command {
            Commands::Init { path, force } => {
                engine.init(path, force).await
            }
            Commands::Run { invocations, format, output, timeout_ms, no_timeout, backend } => {
                let tracer = &mut engine.config_mut().tracer;
                if let Some(ms) = timeout_ms {
                    tracer.timeout_enabled = true;
                    tracer.timeout_ms = ms;
                }
                if no_timeout {
                    tracer.timeout_enabled = false;
                }
                if let Some(backend) = backend {
                    tracer.backend = backend;
                }
                engine.config().validate()?;
                engine.run(&invocations, &format, output).await
            }
            Commands::Instrument { file, profile, mapping } => {
                engine.instrument(&file, &profile, mapping).await
            }
            Commands::Restore { scan } => {
                engine.restore(scan).await
            }
        }
    }
}
