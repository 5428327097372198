// src/core/instrumentor/markers.rs
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::InstrumentationConfig;
use crate::error::Result;
use super::scanner::mask_lines;
use super::{PassContext, SourcePass};

/// Class declaration found while instrumenting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedClass {
    /// Qualified with the file's package when one is declared
    pub name: String,
    pub line: usize,
}

/// Test annotation found while instrumenting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedTest {
    pub annotation: String,
    /// Line of the annotation
    pub line: usize,
    /// Name of the annotated method, when it could be found
    pub method: Option<String>,
}

/// Classes and test entry points recognised at instrumentation time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRegistry {
    pub classes: Vec<MarkedClass>,
    pub tests: Vec<MarkedTest>,
}

impl MarkerRegistry {
    pub fn has_class(&self, name: &str) -> bool {
        self.classes.iter().any(|c| c.name == name)
    }

    pub fn test_named(&self, method: &str) -> Option<&MarkedTest> {
        self.tests.iter().find(|t| t.method.as_deref() == Some(method))
    }
}

/// Prepends a marker annotation to class declarations
pub struct ClassDeclarationProcessor {
    emit: bool,
    marker: String,
    package_regex: Regex,
    declaration_regex: Regex,
}

impl ClassDeclarationProcessor {
    pub fn new(config: &InstrumentationConfig) -> Result<Self> {
        Ok(Self {
            emit: config.emit_markers,
            marker: config.class_marker.clone(),
            package_regex: Regex::new(r"^\s*package\s+([\w.]+)\s*;")?,
            declaration_regex: Regex::new(
                r"^\s*(?:@[\w.]+(?:\([^)]*\))?\s+)*(?:(?:public|protected|private|abstract|final|static|strictfp|sealed|non-sealed)\s+)*(?:class|enum|record)\s+([A-Za-z_$][\w$]*)",
            )?,
        })
    }
}

impl SourcePass for ClassDeclarationProcessor {
    fn name(&self) -> &'static str {
        "ClassDeclarationProcessor"
    }

    fn apply(&mut self, lines: &mut [String], ctx: &mut PassContext) -> Result<()> {
        let masks = mask_lines(lines);
        let mut package: Option<String> = None;

        for (index, mask) in masks.iter().enumerate() {
            if let Some(caps) = self.package_regex.captures(&mask.code) {
                package = Some(caps[1].to_string());
                continue;
            }

            let Some(caps) = self.declaration_regex.captures(&mask.code) else {
                continue;
            };
            let simple = &caps[1];
            let name = match &package {
                Some(pkg) => format!("{}.{}", pkg, simple),
                None => simple.to_string(),
            };
            ctx.markers.classes.push(MarkedClass { name, line: index + 1 });

            if !self.emit || lines[index].contains(&self.marker) {
                continue;
            }
            let indent = mask.code.len() - mask.code.trim_start().len();
            lines[index].insert_str(indent, &format!("{} ", self.marker));
        }

        Ok(())
    }
}

/// Appends a collector marker to recognised test annotations
pub struct TestAnnotationProcessor {
    emit: bool,
    marker: String,
    annotation_regex: Regex,
    method_name_regex: Regex,
}

impl TestAnnotationProcessor {
    pub fn new(config: &InstrumentationConfig) -> Result<Self> {
        let alternatives: Vec<String> = config
            .test_annotations
            .iter()
            .map(|a| regex::escape(a.trim()))
            .collect();
        let pattern = format!(
            r"^\s*(({})(?:\s*\([^)]*\))?)(?:\s|$)",
            alternatives.join("|")
        );

        Ok(Self {
            emit: config.emit_markers,
            marker: config.test_marker.clone(),
            annotation_regex: Regex::new(&pattern)?,
            method_name_regex: Regex::new(r"([A-Za-z_$][\w$]*)\s*\(")?,
        })
    }

    /// Name of the first method declared at or after `from`, skipping annotations
    fn find_method_name(&self, codes: &[&str], from: usize) -> Option<String> {
        for code in codes.iter().skip(from).take(8) {
            let trimmed = code.trim();
            let rest = match trimmed.strip_prefix('@') {
                // annotation arguments may be followed by the declaration on the same line
                Some(annotation) => match annotation.find(')') {
                    Some(close) => &annotation[close + 1..],
                    None => continue,
                },
                None => trimmed,
            };
            if let Some(caps) = self.method_name_regex.captures(rest) {
                return Some(caps[1].to_string());
            }
        }
        None
    }
}

impl SourcePass for TestAnnotationProcessor {
    fn name(&self) -> &'static str {
        "TestAnnotationProcessor"
    }

    fn apply(&mut self, lines: &mut [String], ctx: &mut PassContext) -> Result<()> {
        let masks = mask_lines(lines);
        let codes: Vec<&str> = masks.iter().map(|m| m.code.as_str()).collect();

        for (index, mask) in masks.iter().enumerate() {
            let Some(caps) = self.annotation_regex.captures(&mask.code) else {
                continue;
            };
            let annotation = caps[2].to_string();
            let annotation_end = caps.get(1).map(|m| m.end()).unwrap_or(0);

            let method = {
                // the declaration may follow on the same line
                let same_line = &mask.code[annotation_end.min(mask.code.len())..];
                self.method_name_regex
                    .captures(same_line)
                    .map(|c| c[1].to_string())
                    .or_else(|| self.find_method_name(&codes, index + 1))
            };

            ctx.markers.tests.push(MarkedTest {
                annotation,
                line: index + 1,
                method,
            });

            if !self.emit || lines[index].contains(&self.marker) {
                continue;
            }
            lines[index].insert_str(annotation_end, &format!(" {}", self.marker));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::super::fixtures::*;
    use super::*;

    fn run(pass: &mut dyn SourcePass, source: &str) -> (Vec<String>, PassContext) {
        let mut lines = lines_of(source);
        let mut ctx = PassContext::new(Path::new("TestClass.java"));
        pass.apply(&mut lines, &mut ctx).unwrap();
        (lines, ctx)
    }

    #[test]
    fn test_class_declaration_gets_marker() {
        let mut pass = ClassDeclarationProcessor::new(&InstrumentationConfig::default()).unwrap();
        let (lines, ctx) = run(&mut pass, TEST_CLASS);

        assert_eq!(lines[6], "@testpath.runtime.CollectCalls public class TestClass {");
        assert_eq!(ctx.markers.classes, vec![MarkedClass { name: "examples.TestClass".to_string(), line: 7 }]);
    }

    #[test]
    fn test_anonymous_class_is_not_a_declaration() {
        let mut pass = ClassDeclarationProcessor::new(&InstrumentationConfig::default()).unwrap();
        let (lines, ctx) = run(&mut pass, "Runnable r = new Runnable() {\nObject o = Foo.class;");

        assert_eq!(lines[0], "Runnable r = new Runnable() {");
        assert!(ctx.markers.classes.is_empty());
    }

    #[test]
    fn test_markers_can_be_disabled() {
        let mut config = InstrumentationConfig::default();
        config.emit_markers = false;
        let mut pass = ClassDeclarationProcessor::new(&config).unwrap();
        let (lines, ctx) = run(&mut pass, TEST_CLASS);

        assert_eq!(lines[6], "public class TestClass {");
        assert!(ctx.markers.has_class("examples.TestClass"));
    }

    #[test]
    fn test_test_annotations_are_marked_and_registered() {
        let mut pass = TestAnnotationProcessor::new(&InstrumentationConfig::default()).unwrap();
        let (lines, ctx) = run(&mut pass, TEST_CLASS);

        assert_eq!(lines[7], "    @Test @testpath.runtime.CollectInvocations");
        assert_eq!(
            lines[19],
            "    @Test(expected = IllegalStateException.class) @testpath.runtime.CollectInvocations"
        );
        assert_eq!(ctx.markers.tests.len(), 3);
        assert_eq!(ctx.markers.test_named("testFactorial").map(|t| t.line), Some(8));
        assert_eq!(ctx.markers.test_named("testLoop").map(|t| t.line), Some(20));
    }

    #[test]
    fn test_annotation_on_declaration_line() {
        let mut pass = TestAnnotationProcessor::new(&InstrumentationConfig::default()).unwrap();
        let (lines, ctx) = run(&mut pass, "  @Test public void inline() {}\n  @TestFactory void no() {}");

        assert_eq!(lines[0], "  @Test @testpath.runtime.CollectInvocations public void inline() {}");
        assert_eq!(lines[1], "  @TestFactory void no() {}");
        assert_eq!(ctx.markers.tests[0].method.as_deref(), Some("inline"));
    }
}
