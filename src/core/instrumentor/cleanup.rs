// src/core/instrumentor/cleanup.rs
use regex::Regex;

use crate::error::Result;
use super::scanner::mask_lines;
use super::{PassContext, SourcePass};

/// Blanks out `//` comments while keeping the line itself
pub struct InlineCommentRemover;

impl SourcePass for InlineCommentRemover {
    fn name(&self) -> &'static str {
        "InlineCommentRemover"
    }

    fn apply(&mut self, lines: &mut [String], _ctx: &mut PassContext) -> Result<()> {
        let masks = mask_lines(lines);

        for (line, mask) in lines.iter_mut().zip(masks.iter()) {
            if let Some(at) = mask.line_comment_at {
                line.truncate(at);
                let kept = line.trim_end().len();
                line.truncate(kept);
            }
        }

        Ok(())
    }
}

/// Output stream that swallows everything written to it
const NULL_SINK: &str = "new java.io.PrintStream(java.io.OutputStream.nullOutputStream())";

/// Redirects console prints to a discarding stream.
///
/// The call stays on its line, so the line remains steppable and the
/// arguments are still evaluated, but nothing reaches the stdout the
/// debugger protocol is read from.
pub struct PrintCallDeactivator {
    print_call: Regex,
}

impl PrintCallDeactivator {
    pub fn new() -> Self {
        Self {
            print_call: Regex::new(r"\bSystem\s*\.\s*(?:out|err)\s*\.\s*(?:print|println|printf|format|write)\s*\(")
                .expect("Invalid print call regex"),
        }
    }
}

impl Default for PrintCallDeactivator {
    fn default() -> Self {
        Self::new()
    }
}

impl SourcePass for PrintCallDeactivator {
    fn name(&self) -> &'static str {
        "PrintCallDeactivator"
    }

    fn apply(&mut self, lines: &mut [String], _ctx: &mut PassContext) -> Result<()> {
        let masks = mask_lines(lines);

        for (line, mask) in lines.iter_mut().zip(masks.iter()) {
            let calls: Vec<(usize, usize)> = self
                .print_call
                .find_iter(&mask.code)
                .filter_map(|m| {
                    // replace only the `System.out` receiver, keep `.println(`
                    let receiver_end = m.start() + m.as_str().rfind('.')?;
                    Some((m.start(), receiver_end))
                })
                .collect();

            for (start, end) in calls.into_iter().rev() {
                line.replace_range(start..end, NULL_SINK);
            }
        }

        Ok(())
    }
}
