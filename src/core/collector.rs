// src/core/collector.rs
//! Loads the call sites a test run under instrumentation discovered.
//!
//! The collector writes a JSON manifest:
//!
//! ```json
//! {
//!   "invocations": [{
//!     "test_method": { "signature": "examples.TestClass.testFactorial()",
//!                      "source": "src/examples/TestClass.java", "line": 9 },
//!     "invoked": { "signature": "examples.AuxClass.factorial(int)",
//!                  "source": "src/examples/AuxClass.java",
//!                  "binary": "bin/examples/AuxClass.class",
//!                  "line": 10, "return_type": "long",
//!                  "args": [{ "type": "int", "value": "4" }] }
//!   }]
//! }
//! ```
//!
//! Relative paths are resolved against the manifest's directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{TestPathError, Result};
use super::model::{Argument, Invoked, InvokedKind, Signature, TestedInvoked};

#[derive(Debug, Deserialize)]
struct Manifest {
    invocations: Vec<InvocationRecord>,
}

#[derive(Debug, Deserialize)]
struct InvocationRecord {
    test_method: MemberRecord,
    invoked: MemberRecord,
}

#[derive(Debug, Deserialize)]
struct MemberRecord {
    signature: String,
    #[serde(default = "default_kind")]
    kind: InvokedKind,
    source: PathBuf,
    #[serde(default)]
    binary: Option<PathBuf>,
    line: u32,
    #[serde(default)]
    return_type: Option<String>,
    #[serde(default)]
    args: Vec<Argument>,
}

fn default_kind() -> InvokedKind {
    InvokedKind::Method
}

impl MemberRecord {
    fn into_invoked(self, base: &Path) -> Result<Invoked> {
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        Ok(Invoked {
            signature: Signature::parse(&self.signature, self.kind)?,
            source_path: resolve(self.source),
            binary_path: self.binary.map(resolve),
            invocation_line: self.line,
            return_type: self.return_type,
            args: self.args,
        })
    }
}

/// Source of the (test method, invoked) pairs to trace
pub struct CallCollector;

impl CallCollector {
    /// Load a manifest file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<TestedInvoked>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let tested = Self::parse(&content, &base)?;
        info!("Loaded {} invocation(s) from {}", tested.len(), path.display());
        Ok(tested)
    }

    /// Parse manifest text; duplicate call sites are kept once, in order
    pub fn parse(content: &str, base: &Path) -> Result<Vec<TestedInvoked>> {
        let manifest: Manifest = serde_json::from_str(content)?;
        let mut seen = HashSet::new();
        let mut tested = vec![];

        for (index, record) in manifest.invocations.into_iter().enumerate() {
            let pair = TestedInvoked::new(
                record.invoked.into_invoked(base).map_err(|e| at_record(index, e))?,
                record.test_method.into_invoked(base).map_err(|e| at_record(index, e))?,
            );
            if pair.invoked.invocation_line == 0 {
                return Err(TestPathError::Config(format!(
                    "invocation {}: invocation line must be positive",
                    index
                )));
            }
            if seen.insert(pair.clone()) {
                tested.push(pair);
            } else {
                debug!("Skipping duplicate invocation {}", pair);
            }
        }

        Ok(tested)
    }
}

fn at_record(index: usize, error: TestPathError) -> TestPathError {
    match error {
        TestPathError::InvalidSignature(s) => {
            TestPathError::InvalidSignature(format!("{} (invocation {})", s, index))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
  "invocations": [
    {
      "test_method": { "signature": "examples.TestClass.testFactorial()", "source": "src/examples/TestClass.java", "line": 9 },
      "invoked": { "signature": "examples.AuxClass.factorial(int)", "source": "src/examples/AuxClass.java",
                   "binary": "bin/examples/AuxClass.class", "line": 10, "return_type": "long",
                   "args": [{ "type": "int", "value": "4" }] }
    },
    {
      "test_method": { "signature": "examples.TestClass.testFactorial()", "source": "src/examples/TestClass.java", "line": 9 },
      "invoked": { "signature": "examples.AuxClass.factorial(int)", "source": "src/examples/AuxClass.java", "line": 10 }
    },
    {
      "test_method": { "signature": "examples.TestClass.testCounter()", "source": "/abs/TestClass.java", "line": 30 },
      "invoked": { "signature": "examples.AuxClass(int)", "kind": "constructor", "source": "src/examples/AuxClass.java", "line": 31 }
    }
  ]
}"#;

    #[test]
    fn test_parse_manifest() {
        let tested = CallCollector::parse(MANIFEST, Path::new("/project")).unwrap();
        assert_eq!(tested.len(), 2);

        let first = &tested[0];
        assert_eq!(first.invoked.signature.to_string(), "examples.AuxClass.factorial(int)");
        assert_eq!(first.invoked.source_path, PathBuf::from("/project/src/examples/AuxClass.java"));
        assert_eq!(
            first.invoked.binary_path,
            Some(PathBuf::from("/project/bin/examples/AuxClass.class"))
        );
        assert_eq!(first.invoked.args[0].value, "4");
        assert_eq!(first.test_method.invocation_line, 9);

        let ctor = &tested[1];
        assert!(ctor.invoked.is_constructor());
        assert!(ctor.invoked.returns_void());
        assert_eq!(ctor.test_method.source_path, PathBuf::from("/abs/TestClass.java"));
    }

    #[test]
    fn test_bad_signature_names_the_record() {
        let manifest = r#"{"invocations": [{
            "test_method": { "signature": "broken", "source": "T.java", "line": 1 },
            "invoked": { "signature": "a.B.c()", "source": "B.java", "line": 2 }
        }]}"#;
        let err = CallCollector::parse(manifest, Path::new(".")).unwrap_err();
        match err {
            TestPathError::InvalidSignature(s) => assert!(s.contains("invocation 0")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_load_resolves_against_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invocations.json");
        std::fs::write(&path, MANIFEST).unwrap();

        let tested = CallCollector::load(&path).unwrap();
        assert_eq!(
            tested[0].invoked.source_path,
            dir.path().join("src/examples/AuxClass.java")
        );
    }
}
