// src/core/tracer/mod.rs
//! Collects the raw line sequence(s) one invocation executes.

pub mod channel;
pub mod jdb;
pub mod machine;
pub mod probe;
pub mod protocol;
pub mod watchdog;

pub use jdb::JdbBackend;
pub use machine::{RawSegment, RawTrace};
pub use probe::ProbeBackend;

use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;

use crate::config::{BackendKind, TracerConfig};
use crate::error::{TestPathError, Result};
use super::model::InvocationDescriptor;

/// One invocation to trace, in instrumented-file coordinates
#[derive(Debug, Clone)]
pub struct TraceRequest {
    /// Binary name of the test class
    pub test_class: String,
    pub test_method: String,
    /// Invocation line in the instrumented test file
    pub breakpoint_line: u32,
    pub invocation: InvocationDescriptor,
    pub returns_void: bool,
    /// Class roots and libraries needed at runtime
    pub classpath: Vec<PathBuf>,
    pub sourcepath: Vec<PathBuf>,
}

impl TraceRequest {
    pub fn invoked_class(&self) -> &str {
        self.invocation.signature.class_name()
    }

    pub fn invoked_method(&self) -> &str {
        self.invocation.signature.runtime_member_name()
    }
}

/// Strategy that turns a [`TraceRequest`] into a [`RawTrace`]
#[async_trait]
pub trait TraceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn trace(&self, request: &TraceRequest) -> Result<RawTrace>;
}

/// Watchdog delay configured for a backend
pub(crate) fn watchdog_delay(config: &TracerConfig) -> Option<Duration> {
    config
        .timeout_enabled
        .then(|| Duration::from_millis(config.timeout_ms))
}

pub(crate) fn join_classpath(entries: &[PathBuf]) -> Result<String> {
    let joined = std::env::join_paths(entries)
        .map_err(|e| TestPathError::Config(format!("invalid classpath entry: {}", e)))?;
    Ok(joined.to_string_lossy().to_string())
}

/// Build the backend selected in the configuration
pub fn create_backend(config: &TracerConfig) -> Result<Box<dyn TraceBackend>> {
    match config.backend {
        BackendKind::Jdb => Ok(Box::new(JdbBackend::new(config.clone())?)),
        BackendKind::Probe => Ok(Box::new(ProbeBackend::new(config.clone())?)),
    }
}

#[cfg(test)]
pub(crate) mod transcripts {
    //! Recorded `jdb` sessions against the instrumentor fixtures.

    use super::*;
    use crate::core::model::{InvokedKind, Signature};

    pub fn factorial_request(test_method: &str, breakpoint_line: u32, arg: &str) -> TraceRequest {
        TraceRequest {
            test_class: "examples.TestClass".to_string(),
            test_method: test_method.to_string(),
            breakpoint_line,
            invocation: InvocationDescriptor {
                signature: Signature::parse("examples.AuxClass.factorial(int)", InvokedKind::Method).unwrap(),
                arg_values: vec![arg.to_string()],
                arg_types: vec!["int".to_string()],
            },
            returns_void: false,
            classpath: vec![PathBuf::from("bin")],
            sourcepath: vec![PathBuf::from("src")],
        }
    }

    fn preamble(line: u32) -> Vec<String> {
        vec![
            "Initializing jdb ...".to_string(),
            format!("> Deferring breakpoint examples.TestClass:{}.", line),
            "It will be set after the class is loaded.".to_string(),
            "> run org.junit.runner.JUnitCore examples.TestClass".to_string(),
            "Set uncaught java.lang.Throwable".to_string(),
            "Set deferred uncaught java.lang.Throwable".to_string(),
            "> ".to_string(),
            format!("VM Started: Set deferred breakpoint examples.TestClass:{}", line),
            "JUnit version 4.13.2".to_string(),
        ]
    }

    fn hit(test_method: &str, line: u32) -> Vec<String> {
        vec![
            String::new(),
            format!(
                r#"Breakpoint hit: "thread=main", examples.TestClass.{}(), line={} bci=0"#,
                test_method, line
            ),
            format!("{}        long result = AuxClass.factorial(4);", line),
            String::new(),
        ]
    }

    fn step(class_method: &str, line: u32, bci: u32) -> Vec<String> {
        vec![
            "main[1] > ".to_string(),
            format!(r#"Step completed: "thread=main", {}(), line={} bci={}"#, class_method, line, bci),
            format!("{}            ...", line),
            String::new(),
        ]
    }

    fn invoked_steps(method: &str, lines: &[u32]) -> Vec<String> {
        let class_method = format!("examples.AuxClass.{}", method);
        lines
            .iter()
            .enumerate()
            .flat_map(|(i, &line)| step(&class_method, line, i as u32 * 3))
            .collect()
    }

    fn exited() -> Vec<String> {
        vec![
            "main[1] > ".to_string(),
            "Time: 0.012".to_string(),
            "OK (3 tests)".to_string(),
            String::new(),
            "The application exited".to_string(),
        ]
    }

    /// `testFactorial` calling `factorial(lines)` once
    pub fn single_call(test_method: &str, breakpoint_line: u32, lines: &[u32]) -> Vec<String> {
        call_into(test_method, breakpoint_line, "factorial", lines)
    }

    /// One call of `AuxClass.<invoked_method>` stepping through `lines`
    pub fn call_into(test_method: &str, breakpoint_line: u32, invoked_method: &str, lines: &[u32]) -> Vec<String> {
        let mut transcript = preamble(breakpoint_line);
        transcript.extend(hit(test_method, breakpoint_line));
        transcript.extend(invoked_steps(invoked_method, lines));
        transcript.extend(step(&format!("examples.TestClass.{}", test_method), breakpoint_line, 5));
        transcript.extend(exited());
        transcript
    }

    /// A test-method loop calling the invoked once per iteration
    pub fn looped_calls(test_method: &str, breakpoint_line: u32, iterations: &[&[u32]]) -> Vec<String> {
        let mut transcript = preamble(breakpoint_line);
        for lines in iterations {
            transcript.extend(hit(test_method, breakpoint_line));
            transcript.extend(invoked_steps("factorial", lines));
            transcript.extend(step(&format!("examples.TestClass.{}", test_method), breakpoint_line, 5));
        }
        transcript.extend(exited());
        transcript
    }

    pub fn three_paths_request(test_method: &str, breakpoint_line: u32, arg: &str) -> TraceRequest {
        let mut request = factorial_request(test_method, breakpoint_line, arg);
        request.invocation.signature =
            Signature::parse("examples.AuxClass.threePaths(int)", InvokedKind::Method).unwrap();
        request
    }

    /// `threePaths(1)`, `threePaths(2)` and `threePaths(3)`
    pub const THREE_PATHS: [&[u32]; 3] = [&[20, 21], &[20, 22, 23], &[20, 22, 25]];

    pub const FACTORIAL_4: &[u32] = &[35, 36, 37, 38, 39, 37, 38, 39, 37, 38, 39, 37, 38, 39, 37, 41];
    pub const FACTORIAL_0: &[u32] = &[35, 36, 37, 41];
    pub const FACTORIAL_1: &[u32] = &[35, 36, 37, 38, 39, 37, 41];
}
