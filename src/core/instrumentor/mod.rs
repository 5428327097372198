// src/core/instrumentor/mod.rs
//! Source instrumentation ("hole plugging").
//!
//! Rewrites Java source so every branch, label and loop header owns a line
//! the debugger can stop on. The instrumentor is a fixed chain of
//! independent passes over the lines of one file. Passes receive the lines
//! as a slice, so none of them can add or remove a line: line N of the
//! instrumented file always corresponds to line N of the original.

mod cleanup;
mod hole_plugging;
mod markers;
mod multiline;
mod scanner;

pub use cleanup::{InlineCommentRemover, PrintCallDeactivator};
pub use hole_plugging::{
    DoWhileProcessor, SwitchProcessor, TryCatchFinallyProcessor, UninitializedVariableProcessor,
    WhileProcessor,
};
pub use markers::{ClassDeclarationProcessor, MarkerRegistry, TestAnnotationProcessor};
pub use multiline::MultilineToInlineConverter;

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::InstrumentationConfig;
use crate::error::{TestPathError, Result};
use super::model::LineMapping;

/// Which instrumentation set a file receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentationProfile {
    /// File declaring the invoked member
    Invoked,
    /// File declaring the test method
    TestMethod,
    /// One file playing both roles
    Both,
}

impl InstrumentationProfile {
    /// Whether a file instrumented with `self` already satisfies `other`
    pub fn covers(self, other: InstrumentationProfile) -> bool {
        self == other || self == InstrumentationProfile::Both
    }

    pub fn union(self, other: InstrumentationProfile) -> InstrumentationProfile {
        if self.covers(other) {
            self
        } else if other.covers(self) {
            other
        } else {
            InstrumentationProfile::Both
        }
    }

    fn includes_invoked(self) -> bool {
        matches!(self, InstrumentationProfile::Invoked | InstrumentationProfile::Both)
    }

    fn includes_test(self) -> bool {
        matches!(self, InstrumentationProfile::TestMethod | InstrumentationProfile::Both)
    }
}

/// State shared by the passes of one instrumentation run
#[derive(Debug)]
pub struct PassContext {
    pub file: PathBuf,
    pub mapping: LineMapping,
    pub markers: MarkerRegistry,
}

impl PassContext {
    pub fn new(file: &Path) -> Self {
        Self {
            file: file.to_path_buf(),
            mapping: LineMapping::new(),
            markers: MarkerRegistry::default(),
        }
    }

    /// Build the error for a broken structural assumption at a 0-based line index
    pub fn invariant_violation(&self, index: usize, message: impl Into<String>) -> TestPathError {
        TestPathError::InstrumentationInvariant {
            file: self.file.clone(),
            line: index + 1,
            message: message.into(),
        }
    }
}

/// One rewriting pass of the instrumentation chain
pub trait SourcePass {
    fn name(&self) -> &'static str;

    /// Rewrite lines in place; the slice length is the line-count contract
    fn apply(&mut self, lines: &mut [String], ctx: &mut PassContext) -> Result<()>;
}

/// Result of instrumenting one file
#[derive(Debug, Clone)]
pub struct InstrumentedSource {
    pub lines: Vec<String>,
    pub mapping: LineMapping,
    pub markers: MarkerRegistry,
}

impl InstrumentedSource {
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Fixed, ordered chain of instrumentation passes
pub struct SourceInstrumentor {
    passes: Vec<Box<dyn SourcePass>>,
}

impl SourceInstrumentor {
    pub fn new(profile: InstrumentationProfile, config: &InstrumentationConfig) -> Result<Self> {
        let mut passes: Vec<Box<dyn SourcePass>> = vec![
            Box::new(InlineCommentRemover),
            Box::new(PrintCallDeactivator::new()),
            Box::new(MultilineToInlineConverter::new()?),
            Box::new(ClassDeclarationProcessor::new(config)?),
        ];

        if profile.includes_test() {
            passes.push(Box::new(TestAnnotationProcessor::new(config)?));
        }

        if profile.includes_invoked() {
            passes.push(Box::new(SwitchProcessor::new()?));
            passes.push(Box::new(WhileProcessor::new()?));
            passes.push(Box::new(DoWhileProcessor::new()?));
            passes.push(Box::new(TryCatchFinallyProcessor::new()?));
            passes.push(Box::new(UninitializedVariableProcessor::new()?));
        }

        Ok(Self { passes })
    }

    /// Names of the passes in execution order
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Instrument already-loaded source lines
    pub fn instrument(&mut self, file: &Path, lines: Vec<String>) -> Result<InstrumentedSource> {
        let mut lines = lines;
        let mut ctx = PassContext::new(file);
        let original_len = lines.len();

        for pass in self.passes.iter_mut() {
            debug!("Running {} on {}", pass.name(), file.display());
            pass.apply(&mut lines, &mut ctx)?;
        }

        if lines.len() != original_len {
            return Err(ctx.invariant_violation(
                original_len,
                format!("line count changed from {} to {}", original_len, lines.len()),
            ));
        }

        Ok(InstrumentedSource {
            lines,
            mapping: ctx.mapping,
            markers: ctx.markers,
        })
    }

    /// Read and instrument a file without writing it back
    pub fn instrument_file(&mut self, path: &Path) -> Result<InstrumentedSource> {
        let content = std::fs::read_to_string(path)?;
        let lines = content.lines().map(|l| l.to_string()).collect();
        self.instrument(path, lines)
    }
}
