// src/core/instrumentor/hole_plugging.rs
//! Passes that give label and block-header lines an instruction of their own.
//!
//! A bare `case` label, `do {`, `try {`, `finally {` or `while(true){`
//! compiles to no instruction on its line, so a line debugger never stops
//! there. Each pass inserts a side-effect free `int _<hash>=0;` on the line.

use regex::Regex;

use crate::error::Result;
use super::scanner::{mask_lines, plug_regex, plug_statement, MaskedLine};
use super::{PassContext, SourcePass};

/// What follows a block keyword on its line
enum BlockOpening {
    /// `{` at this byte offset
    Brace(usize),
    /// Nothing: the brace is expected on this line but missing
    Missing,
    /// Anything else (single statement body, resources, do-while tail)
    Other,
}

fn opening_after(mask: &MaskedLine, from: usize) -> BlockOpening {
    match mask.next_code_char(from) {
        Some((offset, '{')) => BlockOpening::Brace(offset),
        None => BlockOpening::Missing,
        Some(_) => BlockOpening::Other,
    }
}

/// Insert a plug right after byte `offset`, unless one is already there
fn plug_after(line: &mut String, mask: &MaskedLine, plug: &Regex, kind: &str, index: usize, offset: usize) -> bool {
    let after = offset + 1;
    if plug.is_match(&mask.code[after..]) {
        return false;
    }
    line.insert_str(after, &plug_statement(kind, index, after));
    true
}

/// Plugs every keyword-introduced block on the line whose brace must follow
fn plug_blocks(
    lines: &mut [String],
    ctx: &PassContext,
    keyword: &Regex,
    kind: &str,
    plug: &Regex,
) -> Result<()> {
    let masks = mask_lines(lines);

    for (index, mask) in masks.iter().enumerate() {
        // right-to-left keeps earlier offsets valid after insertion
        let mut openings = Vec::new();
        for m in keyword.find_iter(&mask.code) {
            match opening_after(mask, m.end()) {
                BlockOpening::Brace(offset) => openings.push(offset),
                BlockOpening::Missing => {
                    return Err(ctx.invariant_violation(
                        index,
                        format!("expected '{{' after '{}'", m.as_str().trim()),
                    ));
                }
                BlockOpening::Other => {}
            }
        }
        for offset in openings.into_iter().rev() {
            plug_after(&mut lines[index], mask, plug, kind, index, offset);
        }
    }

    Ok(())
}

/// Plugs `case X:` and `default:` labels right after the colon
pub struct SwitchProcessor {
    label: Regex,
    plug: Regex,
}

impl SwitchProcessor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            label: Regex::new(r"^\s*(?:case\b[^:]*|default\s*):")?,
            plug: plug_regex(),
        })
    }
}

impl SourcePass for SwitchProcessor {
    fn name(&self) -> &'static str {
        "SwitchProcessor"
    }

    fn apply(&mut self, lines: &mut [String], _ctx: &mut PassContext) -> Result<()> {
        let masks = mask_lines(lines);

        for (index, mask) in masks.iter().enumerate() {
            let Some(m) = self.label.find(&mask.code) else {
                continue;
            };
            // arrow labels and `::` references are not statement-group labels
            if m.as_str().contains("->") || mask.code[m.end()..].starts_with(':') {
                continue;
            }
            plug_after(&mut lines[index], mask, &self.plug, "case", index, m.end() - 1);
        }

        Ok(())
    }
}

/// Plugs `while(true){` headers, which compile to a bare jump
pub struct WhileProcessor {
    header: Regex,
    plug: Regex,
}

impl WhileProcessor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            header: Regex::new(r"\bwhile\s*\(\s*true\s*\)")?,
            plug: plug_regex(),
        })
    }
}

impl SourcePass for WhileProcessor {
    fn name(&self) -> &'static str {
        "WhileProcessor"
    }

    fn apply(&mut self, lines: &mut [String], ctx: &mut PassContext) -> Result<()> {
        let masks = mask_lines(lines);

        for (index, mask) in masks.iter().enumerate() {
            let Some(m) = self.header.find(&mask.code) else {
                continue;
            };
            match opening_after(mask, m.end()) {
                BlockOpening::Brace(offset) => {
                    plug_after(&mut lines[index], mask, &self.plug, "while", index, offset);
                }
                BlockOpening::Missing => {
                    // `} while (true)` closing a do-while continues on the next line
                    if mask.code[..m.start()].trim_end().ends_with('}') {
                        continue;
                    }
                    return Err(ctx.invariant_violation(index, "expected '{' after 'while(true)'"));
                }
                // do-while tail or single statement body
                BlockOpening::Other => {}
            }
        }

        Ok(())
    }
}

/// Plugs `do {` headers
pub struct DoWhileProcessor {
    keyword: Regex,
    plug: Regex,
}

impl DoWhileProcessor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            keyword: Regex::new(r"\bdo\b")?,
            plug: plug_regex(),
        })
    }
}

impl SourcePass for DoWhileProcessor {
    fn name(&self) -> &'static str {
        "DoWhileProcessor"
    }

    fn apply(&mut self, lines: &mut [String], ctx: &mut PassContext) -> Result<()> {
        plug_blocks(lines, ctx, &self.keyword, "do", &self.plug)
    }
}

/// Plugs `try {` and `finally {` headers
pub struct TryCatchFinallyProcessor {
    keyword: Regex,
    plug: Regex,
}

impl TryCatchFinallyProcessor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            keyword: Regex::new(r"\b(?:try|finally)\b")?,
            plug: plug_regex(),
        })
    }
}

impl SourcePass for TryCatchFinallyProcessor {
    fn name(&self) -> &'static str {
        "TryCatchFinallyProcessor"
    }

    fn apply(&mut self, lines: &mut [String], ctx: &mut PassContext) -> Result<()> {
        plug_blocks(lines, ctx, &self.keyword, "try", &self.plug)
    }
}

/// Appends a plug to local declarations without initializer (`int x;`).
///
/// Field declarations are left alone: a plug there would become an
/// initializer every constructor executes.
pub struct UninitializedVariableProcessor {
    declaration: Regex,
    plug: Regex,
    type_header: Regex,
}

/// What a `{` opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Class, interface, enum, record or anonymous class body
    Type,
    /// Method, constructor, initializer or nested statement block
    Code,
}

/// For each line, whether it starts inside a code block
fn starts_in_code(masks: &[MaskedLine], type_header: &Regex) -> Vec<bool> {
    let mut scopes: Vec<Scope> = vec![];
    let mut header = String::new();
    let mut in_code = Vec::with_capacity(masks.len());

    for mask in masks {
        in_code.push(scopes.last() == Some(&Scope::Code));
        for c in mask.code.chars() {
            match c {
                '{' => {
                    let scope = if type_header.is_match(header.trim_end()) {
                        Scope::Type
                    } else {
                        Scope::Code
                    };
                    scopes.push(scope);
                    header.clear();
                }
                '}' => {
                    scopes.pop();
                    header.clear();
                }
                ';' => header.clear(),
                _ => header.push(c),
            }
        }
        header.push(' ');
    }

    in_code
}

const NOT_A_TYPE: &[&str] = &[
    "return", "throw", "package", "class", "import", "break", "continue", "new", "else",
    "case", "yield", "goto", "assert", "interface", "enum", "do", "this", "super",
];

impl UninitializedVariableProcessor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            declaration: Regex::new(
                r"^\s*(?:(?:final|static|transient|volatile|private|public|protected)\s+)*([A-Za-z_$][\w$.]*)(?:\s*<[^;=(){}]*>)?(?:\s*\[\s*\])*\s+[A-Za-z_$][\w$]*(?:\s*\[\s*\])*(?:\s*,\s*[A-Za-z_$][\w$]*(?:\s*\[\s*\])*)*\s*;\s*$",
            )?,
            plug: Regex::new(r"int\s+_[0-9a-f]{12}\s*=\s*0\s*;\s*$")?,
            type_header: Regex::new(
                r"(?:^|[^.\w$])(?:class|interface|enum|record)\s+[A-Za-z_$]|\bnew\s+[\w$.]+\s*(?:<[^;]*>)?\s*\([^;]*\)\s*$",
            )?,
        })
    }
}

impl SourcePass for UninitializedVariableProcessor {
    fn name(&self) -> &'static str {
        "UninitializedVariableProcessor"
    }

    fn apply(&mut self, lines: &mut [String], _ctx: &mut PassContext) -> Result<()> {
        let masks = mask_lines(lines);
        let in_code = starts_in_code(&masks, &self.type_header);

        for (index, mask) in masks.iter().enumerate() {
            if !in_code[index] {
                continue;
            }
            let Some(caps) = self.declaration.captures(&mask.code) else {
                continue;
            };
            if NOT_A_TYPE.contains(&&caps[1]) || self.plug.is_match(&mask.code) {
                continue;
            }
            let Some(semicolon) = mask.code.rfind(';') else {
                continue;
            };
            let at = semicolon + 1;
            lines[index].insert_str(at, &format!(" {}", plug_statement("var", index, at)));
        }

        Ok(())
    }
}
