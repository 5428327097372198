// src/core/tracer/machine.rs
use std::fmt;
use tracing::{debug, trace, warn};

use crate::error::{TestPathError, Result};
use super::protocol::{JdbEvent, Location};

/// Command sent to the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Clear,
    StopAt { class_name: String, line: u32 },
    Run { runner: String, test_class: String },
    Step,
    StepUp,
    Next,
    Cont,
    Quit,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Clear => write!(f, "clear"),
            Command::StopAt { class_name, line } => write!(f, "stop at {}:{}", class_name, line),
            Command::Run { runner, test_class } => write!(f, "run {} {}", runner, test_class),
            Command::Step => write!(f, "step"),
            Command::StepUp => write!(f, "step up"),
            Command::Next => write!(f, "next"),
            Command::Cont => write!(f, "cont"),
            Command::Quit => write!(f, "quit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Idle,
    /// Test class is running, waiting for the invocation-line breakpoint
    AwaitingBreakpoint,
    /// Stopped on the invocation line, stepping into the invoked
    Entering,
    /// Inside the invoked's frame, collecting lines
    Stepping,
    Done,
    TimedOut,
    Error,
}

impl TraceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TraceState::Done | TraceState::TimedOut | TraceState::Error)
    }
}

/// What the machine needs to know about one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceTarget {
    /// Binary name of the test class
    pub test_class: String,
    pub test_method: String,
    /// Invocation line in instrumented coordinates
    pub breakpoint_line: u32,
    /// Binary name of the class declaring the invoked
    pub invoked_class: String,
    /// Runtime name of the invoked (`<init>` for constructors)
    pub invoked_method: String,
    /// Main class that runs the test class
    pub runner: String,
}

/// Lines collected during one entry into the invoked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSegment {
    pub lines: Vec<u32>,
    pub complete: bool,
}

/// Everything one trace produced, in instrumented-file line numbers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTrace {
    pub segments: Vec<RawSegment>,
    pub timed_out: bool,
}

/// Debugger-stepping state machine.
///
/// It never performs I/O: each event yields the commands to send next,
/// so a scripted line stream can drive it as well as a live `jdb`.
///
/// Every breakpoint hit on the invocation line opens a new segment. A
/// test method calling the invoked in a loop therefore produces one
/// segment per iteration, while loops inside the invoked accumulate in
/// the segment that is open.
#[derive(Debug)]
pub struct TraceMachine {
    target: TraceTarget,
    state: TraceState,
    segments: Vec<RawSegment>,
    current: Option<Vec<u32>>,
}

impl TraceMachine {
    pub fn new(target: TraceTarget) -> Self {
        Self {
            target,
            state: TraceState::Idle,
            segments: vec![],
            current: None,
        }
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    pub fn target(&self) -> &TraceTarget {
        &self.target
    }

    /// Commands that arm the breakpoint and launch the test class
    pub fn start(&mut self) -> Vec<Command> {
        self.state = TraceState::AwaitingBreakpoint;
        vec![
            Command::Clear,
            Command::StopAt {
                class_name: self.target.test_class.clone(),
                line: self.target.breakpoint_line,
            },
            Command::Run {
                runner: self.target.runner.clone(),
                test_class: self.target.test_class.clone(),
            },
        ]
    }

    fn is_invocation_site(&self, location: &Location) -> bool {
        location.class_name == self.target.test_class && location.line == Some(self.target.breakpoint_line)
    }

    fn is_invoked(&self, location: &Location) -> bool {
        location.is_in(&self.target.invoked_class, &self.target.invoked_method)
    }

    fn close_segment(&mut self, complete: bool) {
        if let Some(lines) = self.current.take() {
            debug!("Closing segment of {} line(s)", lines.len());
            self.segments.push(RawSegment { lines, complete });
        }
    }

    /// Advance on one debugger event
    pub fn on_event(&mut self, event: JdbEvent) -> Result<Vec<Command>> {
        trace!("{:?} <- {:?}", self.state, event);

        match (self.state, event) {
            (state, _) if state.is_terminal() => Ok(vec![]),

            (_, JdbEvent::ApplicationExited) => {
                self.close_segment(true);
                self.state = TraceState::Done;
                Ok(vec![])
            }

            (TraceState::Idle, _) => Ok(vec![]),

            (_, JdbEvent::CommandFailed(message)) => {
                self.state = TraceState::Error;
                Err(TestPathError::TracerProtocol(message))
            }

            (_, JdbEvent::BreakpointHit(location)) => {
                if !self.is_invocation_site(&location) {
                    warn!(
                        "Unexpected breakpoint at {}.{}:{:?}",
                        location.class_name, location.method, location.line
                    );
                    return Ok(vec![Command::Cont]);
                }
                // the invocation line was reached again: one segment per hit
                self.close_segment(true);
                self.state = TraceState::Entering;
                Ok(vec![Command::Step])
            }

            (TraceState::Entering, JdbEvent::StepCompleted(location)) => {
                if self.is_invoked(&location) {
                    self.current = Some(location.line.into_iter().collect());
                    self.state = TraceState::Stepping;
                    Ok(vec![Command::Next])
                } else if self.is_invocation_site(&location) {
                    // back from evaluating an argument; keep going into the call
                    Ok(vec![Command::Step])
                } else if location.class_name == self.target.test_class
                    && location.method == self.target.test_method
                {
                    debug!("Invocation line left without entering the invoked");
                    self.state = TraceState::AwaitingBreakpoint;
                    Ok(vec![Command::Cont])
                } else {
                    // some other callee on the invocation line
                    Ok(vec![Command::StepUp])
                }
            }

            (TraceState::Stepping, JdbEvent::StepCompleted(location)) => {
                if self.is_invoked(&location) {
                    if let (Some(current), Some(line)) = (self.current.as_mut(), location.line) {
                        current.push(line);
                    }
                    Ok(vec![Command::Next])
                } else {
                    // returned or unwound out of the invoked's frame
                    self.close_segment(true);
                    self.state = TraceState::AwaitingBreakpoint;
                    Ok(vec![Command::Cont])
                }
            }

            (TraceState::Stepping, JdbEvent::Exception(description)) => {
                debug!("Invoked threw {}", description);
                self.close_segment(true);
                self.state = TraceState::AwaitingBreakpoint;
                Ok(vec![Command::Cont])
            }

            (_, JdbEvent::Exception(_)) => Ok(vec![Command::Cont]),

            _ => Ok(vec![]),
        }
    }

    /// The watchdog fired; the open segment is kept but marked incomplete
    pub fn time_out(&mut self) {
        if !self.state.is_terminal() {
            self.close_segment(false);
            self.state = TraceState::TimedOut;
        }
    }

    /// The debugger's output ended without an exit notice
    pub fn disconnected(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if self.state == TraceState::AwaitingBreakpoint {
            // a debuggee can end without jdb printing its exit line
            self.state = TraceState::Done;
            return Ok(());
        }
        let state = std::mem::replace(&mut self.state, TraceState::Error);
        Err(TestPathError::TracerProtocol(format!(
            "debugger output ended while {:?}",
            state
        )))
    }

    pub fn finish(self) -> RawTrace {
        let timed_out = self.state == TraceState::TimedOut;
        let mut segments = self.segments;
        if let Some(lines) = self.current {
            segments.push(RawSegment { lines, complete: false });
        }
        RawTrace { segments, timed_out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TraceTarget {
        TraceTarget {
            test_class: "examples.TestClass".to_string(),
            test_method: "testFactorial".to_string(),
            breakpoint_line: 10,
            invoked_class: "examples.AuxClass".to_string(),
            invoked_method: "factorial".to_string(),
            runner: "org.junit.runner.JUnitCore".to_string(),
        }
    }

    fn at(class_name: &str, method: &str, line: u32) -> Location {
        Location {
            thread: "main".to_string(),
            class_name: class_name.to_string(),
            method: method.to_string(),
            line: Some(line),
        }
    }

    fn step(class_name: &str, method: &str, line: u32) -> JdbEvent {
        JdbEvent::StepCompleted(at(class_name, method, line))
    }

    #[test]
    fn test_start_commands() {
        let mut machine = TraceMachine::new(target());
        let commands: Vec<String> = machine.start().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            commands,
            vec![
                "clear",
                "stop at examples.TestClass:10",
                "run org.junit.runner.JUnitCore examples.TestClass",
            ]
        );
        assert_eq!(machine.state(), TraceState::AwaitingBreakpoint);
    }

    #[test]
    fn test_steps_over_argument_callees() {
        let mut machine = TraceMachine::new(target());
        machine.start();

        let hit = JdbEvent::BreakpointHit(at("examples.TestClass", "testFactorial", 10));
        assert_eq!(machine.on_event(hit).unwrap(), vec![Command::Step]);
        assert_eq!(
            machine.on_event(step("examples.Helper", "four", 3)).unwrap(),
            vec![Command::StepUp]
        );
        assert_eq!(
            machine.on_event(step("examples.TestClass", "testFactorial", 10)).unwrap(),
            vec![Command::Step]
        );
        assert_eq!(
            machine.on_event(step("examples.AuxClass", "factorial", 35)).unwrap(),
            vec![Command::Next]
        );
        assert_eq!(machine.state(), TraceState::Stepping);

        machine.on_event(step("examples.AuxClass", "factorial", 41)).unwrap();
        assert_eq!(
            machine.on_event(step("examples.TestClass", "testFactorial", 10)).unwrap(),
            vec![Command::Cont]
        );
        machine.on_event(JdbEvent::ApplicationExited).unwrap();

        let trace = machine.finish();
        assert_eq!(trace.segments, vec![RawSegment { lines: vec![35, 41], complete: true }]);
        assert!(!trace.timed_out);
    }

    #[test]
    fn test_invocation_line_left_without_entering() {
        let mut machine = TraceMachine::new(target());
        machine.start();
        machine
            .on_event(JdbEvent::BreakpointHit(at("examples.TestClass", "testFactorial", 10)))
            .unwrap();
        let commands = machine
            .on_event(step("examples.TestClass", "testFactorial", 11))
            .unwrap();
        assert_eq!(commands, vec![Command::Cont]);
        machine.on_event(JdbEvent::ApplicationExited).unwrap();
        assert!(machine.finish().segments.is_empty());
    }

    #[test]
    fn test_timeout_keeps_partial_segment() {
        let mut machine = TraceMachine::new(target());
        machine.start();
        machine
            .on_event(JdbEvent::BreakpointHit(at("examples.TestClass", "testFactorial", 10)))
            .unwrap();
        machine.on_event(step("examples.AuxClass", "factorial", 35)).unwrap();
        machine.on_event(step("examples.AuxClass", "factorial", 36)).unwrap();
        machine.time_out();

        assert_eq!(machine.state(), TraceState::TimedOut);
        // events after the watchdog fired are ignored
        assert!(machine.on_event(step("examples.AuxClass", "factorial", 37)).unwrap().is_empty());

        let trace = machine.finish();
        assert!(trace.timed_out);
        assert_eq!(trace.segments, vec![RawSegment { lines: vec![35, 36], complete: false }]);
    }

    #[test]
    fn test_command_failure_is_a_protocol_error() {
        let mut machine = TraceMachine::new(target());
        machine.start();
        let err = machine
            .on_event(JdbEvent::CommandFailed("Unable to set breakpoint".to_string()))
            .unwrap_err();
        assert!(matches!(err, TestPathError::TracerProtocol(_)));
        assert_eq!(machine.state(), TraceState::Error);
    }

    #[test]
    fn test_disconnect_mid_step_is_an_error() {
        let mut machine = TraceMachine::new(target());
        machine.start();
        machine
            .on_event(JdbEvent::BreakpointHit(at("examples.TestClass", "testFactorial", 10)))
            .unwrap();
        assert!(machine.disconnected().is_err());

        let mut idle = TraceMachine::new(target());
        idle.start();
        assert!(idle.disconnected().is_ok());
        assert_eq!(idle.state(), TraceState::Done);
    }
}
