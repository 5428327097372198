// src/core/lifecycle/annotations.rs
//! Java sources for the marker annotations inserted by the instrumentor.
//!
//! Instrumented files reference the markers by their qualified name, so the
//! annotation types have to be compiled next to them before anything else.

use std::path::PathBuf;
use regex::Regex;

use crate::config::InstrumentationConfig;
use crate::error::{TestPathError, Result};

/// One marker annotation type, e.g. `@testpath.runtime.CollectCalls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerAnnotation {
    package: Vec<String>,
    name: String,
}

impl MarkerAnnotation {
    /// Parse a configured marker; it must be a plain, fully qualified annotation
    pub fn parse(marker: &str) -> Result<Self> {
        let identifier = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("Invalid identifier regex");
        let qualified = marker.trim().strip_prefix('@').ok_or_else(|| {
            TestPathError::Config(format!("marker '{}' must start with '@'", marker))
        })?;

        let mut parts: Vec<String> = qualified.split('.').map(str::to_string).collect();
        if parts.len() < 2 || !parts.iter().all(|p| identifier.is_match(p)) {
            return Err(TestPathError::Config(format!(
                "marker '{}' must be a fully qualified annotation name",
                marker
            )));
        }

        let name = parts.pop().unwrap_or_default();
        Ok(Self { package: parts, name })
    }

    /// Both markers of a configuration, class marker first
    pub fn from_config(config: &InstrumentationConfig) -> Result<Vec<Self>> {
        let mut markers = vec![Self::parse(&config.class_marker)?];
        let test_marker = Self::parse(&config.test_marker)?;
        if !markers.contains(&test_marker) {
            markers.push(test_marker);
        }
        Ok(markers)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.package.join("."), self.name)
    }

    /// Source file location below a source root
    pub fn source_path(&self) -> PathBuf {
        self.package_dir().join(format!("{}.java", self.name))
    }

    /// Class file location below an output directory
    pub fn class_path(&self) -> PathBuf {
        self.package_dir().join(format!("{}.class", self.name))
    }

    fn package_dir(&self) -> PathBuf {
        self.package.iter().collect()
    }

    /// Runtime-retained so the tracer can see it on classes and methods
    pub fn source(&self) -> String {
        format!(
            "package {};\n\
             \n\
             import java.lang.annotation.ElementType;\n\
             import java.lang.annotation.Retention;\n\
             import java.lang.annotation.RetentionPolicy;\n\
             import java.lang.annotation.Target;\n\
             \n\
             @Retention(RetentionPolicy.RUNTIME)\n\
             @Target({{ElementType.TYPE, ElementType.METHOD}})\n\
             public @interface {} {{\n\
             }}\n",
            self.package.join("."),
            self.name
        )
    }
}
