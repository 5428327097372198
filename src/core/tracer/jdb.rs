// src/core/tracer/jdb.rs
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::TracerConfig;
use crate::error::Result;
use super::channel::{DebuggerChannel, ProcessChannel};
use super::machine::{RawTrace, TraceMachine, TraceState, TraceTarget};
use super::protocol::JdbProtocol;
use super::watchdog::Watchdog;
use super::{join_classpath, watchdog_delay, TraceBackend, TraceRequest};

/// Traces by single-stepping the invocation under `jdb`
pub struct JdbBackend {
    config: TracerConfig,
    protocol: JdbProtocol,
}

impl JdbBackend {
    pub fn new(config: TracerConfig) -> Result<Self> {
        Ok(Self {
            config,
            protocol: JdbProtocol::new()?,
        })
    }

    /// Debugger command line for a request
    pub fn arguments(&self, request: &TraceRequest) -> Result<Vec<String>> {
        let mut classpath = request.classpath.clone();
        classpath.extend(self.config.classpath.iter().cloned());
        let mut sourcepath = request.sourcepath.clone();
        sourcepath.extend(self.config.sourcepath.iter().cloned());

        let mut args = vec!["-classpath".to_string(), join_classpath(&classpath)?];
        if !sourcepath.is_empty() {
            args.push("-sourcepath".to_string());
            args.push(join_classpath(&sourcepath)?);
        }
        Ok(args)
    }

    fn target(&self, request: &TraceRequest) -> TraceTarget {
        TraceTarget {
            test_class: request.test_class.clone(),
            test_method: request.test_method.clone(),
            breakpoint_line: request.breakpoint_line,
            invoked_class: request.invoked_class().to_string(),
            invoked_method: request.invoked_method().to_string(),
            runner: self.config.runner.clone(),
        }
    }

    /// Run one trace over an already-open channel
    pub async fn trace_with<C>(&self, channel: &mut C, request: &TraceRequest) -> Result<RawTrace>
    where
        C: DebuggerChannel + ?Sized,
    {
        let mut machine = TraceMachine::new(self.target(request));
        let watchdog = Watchdog::arm(watchdog_delay(&self.config));

        let outcome = self.drive(channel, &mut machine, &watchdog).await;

        match (&outcome, machine.state()) {
            (Ok(()), TraceState::Done) => {
                // the debuggee is gone, only jdb itself is left
                if let Err(e) = channel.send("quit").await {
                    debug!("quit not delivered: {}", e);
                }
            }
            _ => {
                if let Err(e) = channel.kill().await {
                    warn!("Could not kill debugger: {}", e);
                }
            }
        }
        outcome?;

        let trace = machine.finish();
        info!(
            "Traced {} from {}.{}: {} segment(s){}",
            request.invocation.signature,
            request.test_class,
            request.test_method,
            trace.segments.len(),
            if trace.timed_out { ", timed out" } else { "" }
        );
        Ok(trace)
    }

    async fn drive<C>(&self, channel: &mut C, machine: &mut TraceMachine, watchdog: &Watchdog) -> Result<()>
    where
        C: DebuggerChannel + ?Sized,
    {
        for command in machine.start() {
            channel.send(&command.to_string()).await?;
        }

        while !machine.state().is_terminal() {
            if watchdog.is_expired() {
                machine.time_out();
                break;
            }

            tokio::select! {
                _ = watchdog.expired() => machine.time_out(),
                line = channel.next_line() => match line? {
                    Some(line) => {
                        let event = self.protocol.parse(&line);
                        for command in machine.on_event(event)? {
                            channel.send(&command.to_string()).await?;
                        }
                    }
                    None => machine.disconnected()?,
                },
            }
        }

        Ok(())
    }
}

#[async_trait]
impl TraceBackend for JdbBackend {
    fn name(&self) -> &'static str {
        "jdb"
    }

    async fn trace(&self, request: &TraceRequest) -> Result<RawTrace> {
        let args = self.arguments(request)?;
        let mut channel = ProcessChannel::spawn(&self.config.debugger, &args)?;
        self.trace_with(&mut channel, request).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::tracer::channel::ScriptedChannel;
    use crate::core::tracer::machine::RawSegment;
    use crate::core::tracer::transcripts::*;
    use crate::error::TestPathError;

    fn backend(timeout_ms: Option<u64>) -> JdbBackend {
        JdbBackend::new(TracerConfig {
            timeout_enabled: timeout_ms.is_some(),
            timeout_ms: timeout_ms.unwrap_or(1),
            ..TracerConfig::default()
        })
        .unwrap()
    }

    fn lines_of(trace: &RawTrace) -> Vec<Vec<u32>> {
        trace.segments.iter().map(|s| s.lines.clone()).collect()
    }

    #[tokio::test]
    async fn test_factorial_of_four() {
        let request = factorial_request("testFactorial", 10, "4");
        let mut channel = ScriptedChannel::new(&single_call("testFactorial", 10, FACTORIAL_4));

        let trace = backend(None).trace_with(&mut channel, &request).await.unwrap();

        assert_eq!(lines_of(&trace), vec![FACTORIAL_4.to_vec()]);
        assert!(!trace.timed_out);
        assert!(trace.segments[0].complete);
        assert_eq!(
            channel.sent,
            vec![
                "clear",
                "stop at examples.TestClass:10",
                "run org.junit.runner.JUnitCore examples.TestClass",
                "step",
            ]
            .into_iter()
            .map(String::from)
            .chain(std::iter::repeat("next".to_string()).take(FACTORIAL_4.len()))
            .chain(["cont".to_string(), "quit".to_string()])
            .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_factorial_of_zero() {
        let request = factorial_request("testFactorialZero", 16, "0");
        let mut channel = ScriptedChannel::new(&single_call("testFactorialZero", 16, FACTORIAL_0));

        let trace = backend(None).trace_with(&mut channel, &request).await.unwrap();
        assert_eq!(lines_of(&trace), vec![vec![35, 36, 37, 41]]);
    }

    #[tokio::test]
    async fn test_three_paths_each_end_in_their_own_return() {
        for (arg, lines) in ["1", "2", "3"].into_iter().zip(THREE_PATHS) {
            let request = three_paths_request("testThreePaths", 12, arg);
            let mut channel = ScriptedChannel::new(&call_into("testThreePaths", 12, "threePaths", lines));

            let trace = backend(None).trace_with(&mut channel, &request).await.unwrap();
            assert_eq!(lines_of(&trace), vec![lines.to_vec()], "threePaths({})", arg);
        }
    }

    #[tokio::test]
    async fn test_loop_in_test_method_splits_paths() {
        let request = factorial_request("testLoop", 23, "i");
        let transcript = looped_calls("testLoop", 23, &[FACTORIAL_0, FACTORIAL_1]);
        let mut channel = ScriptedChannel::new(&transcript);

        let trace = backend(None).trace_with(&mut channel, &request).await.unwrap();
        assert_eq!(lines_of(&trace), vec![FACTORIAL_0.to_vec(), FACTORIAL_1.to_vec()]);
    }

    #[tokio::test]
    async fn test_short_timeout_returns_incomplete_prefix() {
        let request = factorial_request("testFactorial", 10, "4");
        let transcript = single_call("testFactorial", 10, FACTORIAL_4);

        let mut baseline_channel = ScriptedChannel::new(&transcript);
        let baseline = backend(None).trace_with(&mut baseline_channel, &request).await.unwrap();

        // 20 ms per line: the invoked is entered after ~300 ms, the trace
        // would end after ~1.7 s
        let mut slow = ScriptedChannel::new(&transcript).paced(Duration::from_millis(20));
        let cut = backend(Some(700)).trace_with(&mut slow, &request).await.unwrap();
        assert!(cut.timed_out);
        assert!(slow.killed);
        assert_eq!(cut.segments.len(), 1);
        let partial = &cut.segments[0];
        assert!(!partial.complete);
        assert!(!partial.lines.is_empty());
        assert!(partial.lines.len() < FACTORIAL_4.len());
        assert!(FACTORIAL_4.starts_with(&partial.lines));

        let mut early = ScriptedChannel::new(&transcript).paced(Duration::from_millis(20));
        let cut = backend(Some(100)).trace_with(&mut early, &request).await.unwrap();
        assert!(cut.timed_out);
        assert!(cut.segments.is_empty());

        let mut patient = ScriptedChannel::new(&transcript).paced(Duration::from_millis(1));
        let full = backend(Some(600_000)).trace_with(&mut patient, &request).await.unwrap();
        assert!(!full.timed_out);
        assert_eq!(full, baseline);
    }

    #[tokio::test]
    async fn test_rejected_breakpoint_fails_the_invocation() {
        let request = factorial_request("testFactorial", 99, "4");
        let mut channel = ScriptedChannel::new(&[
            "Initializing jdb ...",
            "> Unable to set breakpoint examples.TestClass:99 : No code at line 99 in examples.TestClass",
        ]);

        let err = backend(None).trace_with(&mut channel, &request).await.unwrap_err();
        assert!(matches!(err, TestPathError::TracerProtocol(_)));
        assert!(channel.killed);
    }

    #[tokio::test]
    async fn test_breakpoint_never_reached() {
        let request = factorial_request("testFactorial", 10, "4");
        let mut channel = ScriptedChannel::new(&["Initializing jdb ...", "The application exited"]);

        let trace = backend(None).trace_with(&mut channel, &request).await.unwrap();
        assert_eq!(trace, RawTrace { segments: Vec::<RawSegment>::new(), timed_out: false });
    }
}
