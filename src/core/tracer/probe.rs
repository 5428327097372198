// src/core/tracer/probe.rs
//! Backend driven by a bytecode probe agent instead of a debugger.
//!
//! The agent rewrites the invoked's class at load time so every source
//! line reports itself on stdout:
//!
//! ```text
//! @testpath-probe enter
//! @testpath-probe line 35
//! @testpath-probe exit
//! ```

use std::path::PathBuf;
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::TracerConfig;
use crate::error::{TestPathError, Result};
use super::channel::{DebuggerChannel, ProcessChannel};
use super::machine::{RawSegment, RawTrace};
use super::watchdog::Watchdog;
use super::{join_classpath, watchdog_delay, TraceBackend, TraceRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeEvent {
    Enter,
    Line(u32),
    Exit,
}

pub struct ProbeBackend {
    config: TracerConfig,
    agent: PathBuf,
    event: Regex,
}

impl ProbeBackend {
    pub fn new(config: TracerConfig) -> Result<Self> {
        let agent = config.probe_agent.clone().ok_or_else(|| {
            TestPathError::Config("tracer.probe_agent is required by the probe backend".to_string())
        })?;
        Ok(Self {
            config,
            agent,
            event: Regex::new(r"@testpath-probe\s+(enter|exit|line\s+(\d+))")?,
        })
    }

    fn parse(&self, line: &str) -> Option<ProbeEvent> {
        let caps = self.event.captures(line)?;
        match &caps[1] {
            "enter" => Some(ProbeEvent::Enter),
            "exit" => Some(ProbeEvent::Exit),
            _ => caps.get(2)?.as_str().parse().ok().map(ProbeEvent::Line),
        }
    }

    /// Agent options naming the member to probe and the call site to watch
    pub fn agent_options(&self, request: &TraceRequest) -> String {
        let invocation = &request.invocation;
        format!(
            "target={}#{}#{};caller={}:{};args={}",
            request.invoked_class(),
            request.invoked_method(),
            invocation.signature.parameter_types().join(","),
            request.test_class,
            request.breakpoint_line,
            invocation.arg_values.join(","),
        )
    }

    pub fn arguments(&self, request: &TraceRequest) -> Result<Vec<String>> {
        let mut classpath = request.classpath.clone();
        classpath.extend(self.config.classpath.iter().cloned());

        Ok(vec![
            format!("-javaagent:{}={}", self.agent.display(), self.agent_options(request)),
            "-cp".to_string(),
            join_classpath(&classpath)?,
            self.config.runner.clone(),
            request.test_class.clone(),
        ])
    }

    /// Collect probe output from an already-started run
    pub async fn trace_with<C>(&self, channel: &mut C, request: &TraceRequest) -> Result<RawTrace>
    where
        C: DebuggerChannel + ?Sized,
    {
        let watchdog = Watchdog::arm(watchdog_delay(&self.config));
        let mut segments = vec![];
        let mut current: Option<Vec<u32>> = None;
        let mut timed_out = false;

        loop {
            if watchdog.is_expired() {
                timed_out = true;
                break;
            }

            let line = tokio::select! {
                _ = watchdog.expired() => {
                    timed_out = true;
                    break;
                }
                line = channel.next_line() => line?,
            };
            let Some(line) = line else { break };

            match self.parse(&line) {
                Some(ProbeEvent::Enter) => {
                    if current.replace(vec![]).is_some() {
                        warn!("Probe entered the invoked again before it exited");
                    }
                }
                Some(ProbeEvent::Line(number)) => {
                    if let Some(lines) = current.as_mut() {
                        lines.push(number);
                    }
                }
                Some(ProbeEvent::Exit) => {
                    if let Some(mut lines) = current.take() {
                        // the probe fires once more on a void method's implicit return
                        if request.returns_void {
                            lines.pop();
                        }
                        debug!("Probe segment of {} line(s)", lines.len());
                        segments.push(RawSegment { lines, complete: true });
                    }
                }
                None => {}
            }
        }

        if timed_out {
            if let Err(e) = channel.kill().await {
                warn!("Could not kill probe run: {}", e);
            }
        }
        if let Some(lines) = current {
            segments.push(RawSegment { lines, complete: false });
        }

        info!(
            "Probed {} from {}.{}: {} segment(s){}",
            request.invocation.signature,
            request.test_class,
            request.test_method,
            segments.len(),
            if timed_out { ", timed out" } else { "" }
        );
        Ok(RawTrace { segments, timed_out })
    }
}

#[async_trait]
impl TraceBackend for ProbeBackend {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn trace(&self, request: &TraceRequest) -> Result<RawTrace> {
        let args = self.arguments(request)?;
        let mut channel = ProcessChannel::spawn(&self.config.java, &args)?;
        self.trace_with(&mut channel, request).await
    }
}
