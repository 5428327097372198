// src/core/export.rs
use std::io::Write;
use std::str::FromStr;

use crate::error::{TestPathError, Result};
use super::path_parser::TestPathStore;

/// Output format of collected test paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Console,
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = TestPathError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(ExportFormat::Console),
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(TestPathError::Config(format!(
                "unknown export format '{}' (expected console, csv or json)",
                other
            ))),
        }
    }
}

/// Renders a [`TestPathStore`]
pub trait Exporter {
    fn export(&self, store: &TestPathStore, out: &mut dyn Write) -> Result<()>;
}

pub fn exporter_for(format: ExportFormat) -> Box<dyn Exporter> {
    match format {
        ExportFormat::Console => Box::new(ConsoleExporter),
        ExportFormat::Csv => Box::new(CsvExporter),
        ExportFormat::Json => Box::new(JsonExporter),
    }
}

pub struct ConsoleExporter;

impl Exporter for ConsoleExporter {
    fn export(&self, store: &TestPathStore, out: &mut dyn Write) -> Result<()> {
        for (tested, paths) in store.iter() {
            writeln!(out, "{}", tested)?;
            if paths.is_empty() {
                writeln!(out, "    (invoked was not entered)")?;
            }
            for path in paths {
                writeln!(out, "    {}", path)?;
            }
        }
        writeln!(out, "{} tested invocation(s)", store.len())?;
        Ok(())
    }
}

/// `test method;invoked;test path`, one row per path
pub struct CsvExporter;

impl Exporter for CsvExporter {
    fn export(&self, store: &TestPathStore, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "test method;invoked;test path")?;
        for (tested, paths) in store.iter() {
            let test_method = tested.test_method.signature.to_string();
            let invoked = tested.invoked.signature.to_string();
            if paths.is_empty() {
                writeln!(out, "{};{};", test_method, invoked)?;
            }
            for path in paths {
                writeln!(out, "{};{};{}", test_method, invoked, path)?;
            }
        }
        Ok(())
    }
}

pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn export(&self, store: &TestPathStore, out: &mut dyn Write) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, store)?;
        writeln!(out)?;
        Ok(())
    }
}
