// src/core/member_locator.rs
use tree_sitter::{Node, Parser};

use crate::error::{TestPathError, Result};
use super::model::{InvokedKind, Signature};

/// Source lines that bound one method or constructor declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberSpan {
    /// Line holding the member's name
    pub declaration_line: u32,
    /// First statement of the body, if it has one
    pub first_statement_line: Option<u32>,
    /// Line of the body's closing brace
    pub closing_line: u32,
    /// Whether the closing brace stands on a line of its own
    pub closing_brace_alone: bool,
}

impl MemberSpan {
    /// Whether a traced `line` is the declaration rather than a body statement
    pub fn is_declaration_only(&self, line: u32) -> bool {
        line == self.declaration_line && self.first_statement_line != Some(line)
    }

    /// Whether a traced `line` is only the closing brace
    pub fn is_closing_brace(&self, line: u32) -> bool {
        self.closing_brace_alone && line == self.closing_line
    }
}

/// Finds member declarations in Java source with Tree-sitter
pub struct JavaMemberLocator {
    parser: Parser,
}

impl JavaMemberLocator {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let java_language = tree_sitter_java::language();
        parser
            .set_language(&java_language)
            .map_err(|e| TestPathError::Parser(format!("Failed to set Java language: {}", e)))?;

        Ok(Self { parser })
    }

    /// Spans of every declaration matching `signature`.
    ///
    /// Declarations whose parameter types match exactly win; when none do,
    /// declarations with the right parameter count are returned.
    pub fn locate(&mut self, source: &str, signature: &Signature) -> Result<Vec<MemberSpan>> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| TestPathError::Parser("Failed to parse Java code".to_string()))?;

        let target = Target::of(signature);
        let mut exact = vec![];
        let mut by_arity = vec![];
        let mut classes = vec![];
        collect_members(tree.root_node(), source, &target, &mut classes, &mut exact, &mut by_arity);

        Ok(if exact.is_empty() { by_arity } else { exact })
    }
}

struct Target {
    /// Enclosing class chain, outermost first (`Outer$Inner` -> [Outer, Inner])
    classes: Vec<String>,
    member: String,
    kind: InvokedKind,
    parameter_types: Vec<String>,
}

impl Target {
    fn of(signature: &Signature) -> Self {
        Self {
            classes: signature
                .simple_class_name()
                .split('$')
                .map(|s| s.to_string())
                .collect(),
            member: signature.member_name().to_string(),
            kind: signature.kind(),
            parameter_types: signature.parameter_types().iter().map(|t| normalize_type(t)).collect(),
        }
    }

    fn in_class(&self, classes: &[String]) -> bool {
        // anonymous and local classes have numeric binary names we cannot resolve
        if self.classes.iter().any(|c| c.chars().next().map_or(true, |ch| ch.is_ascii_digit())) {
            return classes.last() == self.classes.last();
        }
        classes == self.classes.as_slice()
    }
}

/// `java.util.List<String>` -> `List`, `String...` -> `String[]`
fn normalize_type(text: &str) -> String {
    let mut out = String::new();
    let mut depth = 0;
    for ch in text.chars() {
        match ch {
            '<' => depth += 1,
            '>' => depth -= 1,
            c if depth == 0 && !c.is_whitespace() => out.push(c),
            _ => {}
        }
    }
    let out = match out.strip_suffix("...") {
        Some(base) => format!("{}[]", base),
        None => out,
    };
    match out.rfind('.') {
        Some(dot) => out[dot + 1..].to_string(),
        None => out,
    }
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

fn collect_members(
    node: Node,
    source: &str,
    target: &Target,
    classes: &mut Vec<String>,
    exact: &mut Vec<MemberSpan>,
    by_arity: &mut Vec<MemberSpan>,
) {
    let mut cursor = node.walk();

    for child in node.children(&mut cursor) {
        match child.kind() {
            "class_declaration" | "interface_declaration" | "enum_declaration" | "record_declaration" => {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source).to_string())
                    .unwrap_or_default();
                classes.push(name);
                collect_members(child, source, target, classes, exact, by_arity);
                classes.pop();
            }
            "method_declaration" | "constructor_declaration" => {
                let wanted = match target.kind {
                    InvokedKind::Method => "method_declaration",
                    InvokedKind::Constructor => "constructor_declaration",
                };
                if child.kind() == wanted && target.in_class(classes) {
                    match_member(child, source, target, exact, by_arity);
                }
                // members of local and anonymous classes live below
                collect_members(child, source, target, classes, exact, by_arity);
            }
            _ => collect_members(child, source, target, classes, exact, by_arity),
        }
    }
}

fn match_member(
    node: Node,
    source: &str,
    target: &Target,
    exact: &mut Vec<MemberSpan>,
    by_arity: &mut Vec<MemberSpan>,
) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    if node_text(name, source) != target.member {
        return;
    }
    let Some(body) = node.child_by_field_name("body") else {
        // abstract or native: nothing to trace
        return;
    };

    let parameters = parameter_types(node, source);
    if parameters.len() != target.parameter_types.len() {
        return;
    }

    let first_statement_line = {
        let mut cursor = body.walk();
        let first = body
            .named_children(&mut cursor)
            .find(|c| !c.kind().ends_with("comment"))
            .map(|c| c.start_position().row as u32 + 1);
        first
    };
    let closing_line = body.end_position().row as u32 + 1;
    let closing_brace_alone = source
        .lines()
        .nth(closing_line as usize - 1)
        .map_or(false, |l| l.trim() == "}");

    let span = MemberSpan {
        declaration_line: name.start_position().row as u32 + 1,
        first_statement_line,
        closing_line,
        closing_brace_alone,
    };

    if parameters == target.parameter_types {
        exact.push(span);
    } else {
        by_arity.push(span);
    }
}

fn parameter_types(node: Node, source: &str) -> Vec<String> {
    let Some(parameters) = node.child_by_field_name("parameters") else {
        return vec![];
    };
    let mut cursor = parameters.walk();
    let mut types = vec![];

    for parameter in parameters.named_children(&mut cursor) {
        match parameter.kind() {
            "formal_parameter" => {
                if let Some(ty) = parameter.child_by_field_name("type") {
                    types.push(normalize_type(node_text(ty, source)));
                }
            }
            "spread_parameter" => {
                let mut inner = parameter.walk();
                let ty = parameter
                    .named_children(&mut inner)
                    .find(|c| c.kind() != "modifiers" && c.kind() != "variable_declarator");
                if let Some(ty) = ty {
                    types.push(format!("{}[]", normalize_type(node_text(ty, source))));
                }
            }
            _ => {}
        }
    }

    types
}
