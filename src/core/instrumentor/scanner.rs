// src/core/instrumentor/scanner.rs
//! Lexical helpers shared by the instrumentation passes.
//!
//! Passes match their patterns against a *masked* copy of every line, where
//! comment text and the contents of string/char literals are replaced by
//! spaces. Masking keeps byte offsets intact, so a position found in the mask
//! is a valid edit position in the original line.

use regex::Regex;
use sha2::{Digest, Sha256};

/// Masked view of one source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedLine {
    /// Same byte length as the original; comments and literal contents blanked
    pub code: String,
    /// Byte offset where a `//` comment starts, if any
    pub line_comment_at: Option<usize>,
    /// Whether any part of the line belongs to a block comment or text block
    pub touches_block: bool,
}

impl MaskedLine {
    /// True when the line holds no code at all (blank or commented out)
    pub fn is_blank(&self) -> bool {
        self.code.trim().is_empty()
    }

    /// Net parenthesis balance of the code on this line
    pub fn paren_balance(&self) -> i32 {
        self.code.chars().fold(0, |acc, c| match c {
            '(' => acc + 1,
            ')' => acc - 1,
            _ => acc,
        })
    }

    pub fn has_braces(&self) -> bool {
        self.code.contains('{') || self.code.contains('}')
    }

    /// Offset of the first non-whitespace character at or after `from`
    pub fn next_code_char(&self, from: usize) -> Option<(usize, char)> {
        self.code[from..]
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map(|(i, c)| (from + i, c))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    BlockComment,
    TextBlock,
}

/// Mask every line of a file, carrying block comment state across lines
pub fn mask_lines(lines: &[String]) -> Vec<MaskedLine> {
    let mut state = ScanState::Code;
    lines.iter().map(|line| mask_line(line, &mut state)).collect()
}

fn push_blank(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(' ');
    }
}

fn mask_line(line: &str, state: &mut ScanState) -> MaskedLine {
    let mut code = String::with_capacity(line.len());
    let mut line_comment_at = None;
    let mut touches_block = *state != ScanState::Code;
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        match *state {
            ScanState::BlockComment => {
                if c == '*' && next == Some('/') {
                    code.push_str("  ");
                    i += 2;
                    *state = ScanState::Code;
                } else {
                    push_blank(&mut code, c);
                    i += 1;
                }
            }
            ScanState::TextBlock => {
                if line[offset..].starts_with("\"\"\"") {
                    code.push_str("\"\"\"");
                    i += 3;
                    *state = ScanState::Code;
                } else {
                    push_blank(&mut code, c);
                    i += 1;
                }
            }
            ScanState::Code => {
                if c == '/' && next == Some('/') {
                    line_comment_at = Some(offset);
                    for &(_, rest) in &chars[i..] {
                        push_blank(&mut code, rest);
                    }
                    break;
                } else if c == '/' && next == Some('*') {
                    code.push_str("  ");
                    i += 2;
                    touches_block = true;
                    *state = ScanState::BlockComment;
                } else if line[offset..].starts_with("\"\"\"") {
                    code.push_str("\"\"\"");
                    i += 3;
                    touches_block = true;
                    *state = ScanState::TextBlock;
                } else if c == '"' || c == '\'' {
                    code.push(c);
                    i += 1;
                    let mut escaped = false;
                    while i < chars.len() {
                        let (_, lc) = chars[i];
                        i += 1;
                        if escaped {
                            escaped = false;
                            push_blank(&mut code, lc);
                        } else if lc == '\\' {
                            escaped = true;
                            push_blank(&mut code, lc);
                        } else if lc == c {
                            code.push(lc);
                            break;
                        } else {
                            push_blank(&mut code, lc);
                        }
                    }
                } else {
                    code.push(c);
                    i += 1;
                }
            }
        }
    }

    MaskedLine {
        code,
        line_comment_at,
        touches_block,
    }
}

/// Generated identifier for a plug inserted at a position.
///
/// Derived from the position only, so instrumenting the same file twice
/// yields the same names.
pub fn hole_identifier(kind: &str, line: usize, column: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", kind, line, column).as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("_{}", &hash[..12])
}

/// Side-effect free statement that gives a line its own instruction
pub fn plug_statement(kind: &str, line: usize, column: usize) -> String {
    format!("int {}=0;", hole_identifier(kind, line, column))
}

/// Matches a plug produced by [`plug_statement`]
pub fn plug_regex() -> Regex {
    Regex::new(r"^\s*int\s+_[0-9a-f]{12}\s*=\s*0\s*;").expect("Invalid plug regex")
}
