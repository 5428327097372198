// src/core/instrumentor/multiline.rs
use regex::Regex;
use tracing::trace;

use crate::error::Result;
use super::scanner::{mask_lines, MaskedLine};
use super::{PassContext, SourcePass};

/// Merges a call whose argument list spans several lines onto its first line.
///
/// Continuation lines are left empty and recorded in the line mapping, so a
/// call-site line reported in original coordinates can be moved to the line
/// that now carries the whole call.
pub struct MultilineToInlineConverter {
    excluded: Regex,
}

impl MultilineToInlineConverter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            excluded: Regex::new(r"^\s*@|\b(?:class|interface|enum|record)\s|\bthrows\b")?,
        })
    }

    fn starts_region(&self, mask: &MaskedLine) -> bool {
        !mask.touches_block && mask.paren_balance() > 0 && !self.excluded.is_match(&mask.code)
    }

    /// Last line index of the region opened at `start`, if it can be merged
    fn region_end(&self, masks: &[MaskedLine], start: usize) -> Option<usize> {
        let mut balance = masks[start].paren_balance();

        for (offset, mask) in masks[start + 1..].iter().enumerate() {
            // blocks (lambdas, anonymous classes, declarations) must keep their lines
            if mask.touches_block || mask.has_braces() || self.excluded.is_match(&mask.code) {
                return None;
            }
            balance += mask.paren_balance();
            if balance <= 0 {
                return Some(start + 1 + offset);
            }
        }

        None
    }
}

/// Code part of a line, without its trailing `//` comment
fn code_part<'a>(line: &'a str, mask: &MaskedLine) -> &'a str {
    match mask.line_comment_at {
        Some(at) => &line[..at],
        None => line,
    }
}

impl SourcePass for MultilineToInlineConverter {
    fn name(&self) -> &'static str {
        "MultilineToInlineConverter"
    }

    fn apply(&mut self, lines: &mut [String], ctx: &mut PassContext) -> Result<()> {
        let masks = mask_lines(lines);
        let mut index = 0;

        while index < lines.len() {
            if !self.starts_region(&masks[index]) {
                index += 1;
                continue;
            }
            let Some(end) = self.region_end(&masks, index) else {
                index += 1;
                continue;
            };

            let mut merged = code_part(&lines[index], &masks[index]).trim_end().to_string();
            for continuation in index + 1..=end {
                let piece = code_part(&lines[continuation], &masks[continuation]).trim();
                if !piece.is_empty() {
                    if !merged.ends_with('(') && !piece.starts_with(')') && !piece.starts_with('.') {
                        merged.push(' ');
                    }
                    merged.push_str(piece);
                }
                lines[continuation].clear();
                ctx.mapping.record_move(continuation as u32 + 1, index as u32 + 1);
            }
            trace!("Merged lines {}-{} of {}", index + 1, end + 1, ctx.file.display());
            lines[index] = merged;

            index = end + 1;
        }

        Ok(())
    }
}
