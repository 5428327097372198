// src/core/tracer/protocol.rs
//! Line-oriented parser for the text the `jdb` debugger prints.

use regex::Regex;

use crate::error::Result;

/// Where the debugger stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub thread: String,
    /// Binary class name, e.g. `examples.AuxClass` or `examples.Outer$Inner`
    pub class_name: String,
    /// Runtime method name (`<init>` for constructors)
    pub method: String,
    /// Source line; `None` when the class has no line information
    pub line: Option<u32>,
}

impl Location {
    pub fn is_in(&self, class_name: &str, method: &str) -> bool {
        self.class_name == class_name && self.method == method
    }
}

/// One meaningful thing the debugger reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JdbEvent {
    BreakpointHit(Location),
    StepCompleted(Location),
    /// An exception the debugger stopped on
    Exception(String),
    /// The debuggee terminated or disconnected
    ApplicationExited,
    /// The debugger rejected a command
    CommandFailed(String),
    /// Anything else: prompts, source echo, program output
    Other,
}

/// Turns raw output lines into [`JdbEvent`]s
pub struct JdbProtocol {
    location: Regex,
    exception: Regex,
    exited: Regex,
    failure: Regex,
}

impl JdbProtocol {
    pub fn new() -> Result<Self> {
        Ok(Self {
            location: Regex::new(
                r#"(Breakpoint hit|Step completed):\s*"thread=([^"]*)",\s*([\w$.<>]+)\(\),\s*line=([\d,.]+|-1)"#,
            )?,
            exception: Regex::new(r"Exception occurred:\s*(.+)$")?,
            exited: Regex::new(r"The application (?:exited|has been disconnected)")?,
            failure: Regex::new(
                r"^(?:>\s*|\w+\[\d+\]\s*)*(Unable to set (?:deferred )?breakpoint.*|Not a valid line number.*|No class named .*|Command '.*' is not supported.*|Unrecognized command.*|Fatal error.*|Internal exception.*)",
            )?,
        })
    }

    pub fn parse(&self, line: &str) -> JdbEvent {
        if let Some(caps) = self.location.captures(line) {
            let qualified = &caps[3];
            let (class_name, method) = match qualified.rfind('.') {
                Some(dot) => (&qualified[..dot], &qualified[dot + 1..]),
                None => ("", qualified),
            };
            let digits: String = caps[4].chars().filter(|c| c.is_ascii_digit()).collect();
            let location = Location {
                thread: caps[2].to_string(),
                class_name: class_name.to_string(),
                method: method.to_string(),
                line: if &caps[4] == "-1" { None } else { digits.parse().ok() },
            };
            return match &caps[1] {
                "Breakpoint hit" => JdbEvent::BreakpointHit(location),
                _ => JdbEvent::StepCompleted(location),
            };
        }

        if self.exited.is_match(line) {
            return JdbEvent::ApplicationExited;
        }

        if let Some(caps) = self.exception.captures(line) {
            return JdbEvent::Exception(caps[1].trim().to_string());
        }

        if let Some(caps) = self.failure.captures(line) {
            return JdbEvent::CommandFailed(caps[1].trim().to_string());
        }

        JdbEvent::Other
    }
}
