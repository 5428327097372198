// src/core/model.rs
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{TestPathError, Result};

/// Whether the observed member is a method or a constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokedKind {
    Method,
    Constructor,
}

/// Fully qualified member signature, e.g. `examples.AuxClass.factorial(int)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Fully qualified declaring class (nested classes use `$`)
    class_name: String,
    /// Member name; the simple class name for constructors
    member: String,
    parameter_types: Vec<String>,
    kind: InvokedKind,
}

impl Signature {
    /// Parse `pkg.Class.method(T1, T2)` or, for constructors, `pkg.Class(T1)`
    pub fn parse(text: &str, kind: InvokedKind) -> Result<Self> {
        let text = text.trim();
        let invalid = || TestPathError::InvalidSignature(text.to_string());

        let open = text.find('(').ok_or_else(invalid)?;
        if !text.ends_with(')') {
            return Err(invalid());
        }
        let head = text[..open].trim();
        let params = &text[open + 1..text.len() - 1];
        let parameter_types: Vec<String> = params
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        if head.is_empty() || head.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let (class_name, member) = match kind {
            InvokedKind::Constructor => {
                let simple = head.rsplit(['.', '$']).next().unwrap_or(head);
                (head.to_string(), simple.to_string())
            }
            InvokedKind::Method => {
                let dot = head.rfind('.').ok_or_else(invalid)?;
                let (class, member) = (&head[..dot], &head[dot + 1..]);
                if class.is_empty() || member.is_empty() {
                    return Err(invalid());
                }
                (class.to_string(), member.to_string())
            }
        };

        Ok(Self {
            class_name,
            member,
            parameter_types,
            kind,
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Class name without package
    pub fn simple_class_name(&self) -> &str {
        self.class_name.rsplit('.').next().unwrap_or(&self.class_name)
    }

    /// Top-level class, which names the source file
    pub fn outer_class_name(&self) -> &str {
        self.class_name.split('$').next().unwrap_or(&self.class_name)
    }

    pub fn member_name(&self) -> &str {
        &self.member
    }

    /// Member name as debuggers report it in a location
    pub fn runtime_member_name(&self) -> &str {
        match self.kind {
            InvokedKind::Constructor => "<init>",
            InvokedKind::Method => &self.member,
        }
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn kind(&self) -> InvokedKind {
        self.kind
    }

    pub fn package(&self) -> Option<&str> {
        self.outer_class_name().rfind('.').map(|dot| &self.class_name[..dot])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            InvokedKind::Constructor => {
                write!(f, "{}({})", self.class_name, self.parameter_types.join(", "))
            }
            InvokedKind::Method => write!(
                f,
                "{}.{}({})",
                self.class_name,
                self.member,
                self.parameter_types.join(", ")
            ),
        }
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Argument value handed to the invoked, as the call collector observed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
}

/// A method or constructor under observation, built once per discovered call site
#[derive(Debug, Clone, Serialize)]
pub struct Invoked {
    pub signature: Signature,
    /// Source file declaring the member
    pub source_path: PathBuf,
    /// Compiled class file, when known
    pub binary_path: Option<PathBuf>,
    /// Line of the call site in the test file (for a test method: its declaration line)
    pub invocation_line: u32,
    /// Declared return type; absent for constructors
    pub return_type: Option<String>,
    pub args: Vec<Argument>,
}

impl Invoked {
    pub fn is_constructor(&self) -> bool {
        self.signature.kind() == InvokedKind::Constructor
    }

    pub fn returns_void(&self) -> bool {
        self.is_constructor() || self.return_type.as_deref().map_or(false, |t| t.trim() == "void")
    }

    pub fn package(&self) -> Option<&str> {
        self.signature.package()
    }

    /// Directory that compiled classes of this member's package hang from
    pub fn class_root(&self) -> Option<PathBuf> {
        package_root(self.binary_path.as_ref()?, self.package())
    }

    /// Directory that sources of this member's package hang from
    pub fn source_root(&self) -> Option<PathBuf> {
        package_root(&self.source_path, self.package())
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn descriptor(&self) -> InvocationDescriptor {
        InvocationDescriptor {
            signature: self.signature.clone(),
            arg_values: self.args.iter().map(|a| a.value.clone()).collect(),
            arg_types: self.args.iter().map(|a| a.ty.clone()).collect(),
        }
    }
}

// Identity is signature plus call-site line; arguments and paths do not participate.
impl PartialEq for Invoked {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature && self.invocation_line == other.invocation_line
    }
}

impl Eq for Invoked {}

impl Hash for Invoked {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
        self.invocation_line.hash(state);
    }
}

/// Pair of an invoked member and the test method that exercises it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TestedInvoked {
    pub invoked: Invoked,
    pub test_method: Invoked,
}

impl TestedInvoked {
    pub fn new(invoked: Invoked, test_method: Invoked) -> Self {
        Self { invoked, test_method }
    }

    /// Whether the test method and the invoked live in the same source file
    pub fn shares_source_file(&self) -> bool {
        same_file(&self.invoked.source_path, &self.test_method.source_path)
    }
}

impl fmt::Display for TestedInvoked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} (line {})",
            self.test_method.signature, self.invoked.signature, self.invoked.invocation_line
        )
    }
}

fn package_root(file: &Path, package: Option<&str>) -> Option<PathBuf> {
    let mut root = file.parent()?.to_path_buf();
    if let Some(package) = package {
        for _ in package.split('.') {
            root = root.parent()?.to_path_buf();
        }
    }
    Some(root)
}

pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Backend-agnostic description of how the invoked is called
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationDescriptor {
    pub signature: Signature,
    pub arg_values: Vec<String>,
    pub arg_types: Vec<String>,
}

/// Ordered, possibly repeating sequence of original-file lines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestPath {
    pub lines: Vec<u32>,
    /// False when the watchdog interrupted the trace
    pub complete: bool,
}

impl TestPath {
    pub fn new(lines: Vec<u32>) -> Self {
        Self { lines, complete: true }
    }

    pub fn incomplete(lines: Vec<u32>) -> Self {
        Self { lines, complete: false }
    }
}

impl fmt::Display for TestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.lines.iter().map(|l| l.to_string()).collect();
        write!(f, "[{}]", joined.join(", "))?;
        if !self.complete {
            write!(f, " (incomplete)")?;
        }
        Ok(())
    }
}

/// Relation between lines of an instrumented file and its original.
///
/// Instrumentation never changes the number of lines, so a line maps to
/// itself unless a merge moved its content elsewhere. Lines emptied by a
/// merge carry no original statement and are reported as synthetic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineMapping {
    /// original line -> instrumented line, only where the two differ
    moved: BTreeMap<u32, u32>,
    /// instrumented lines with no statement of their own
    synthetic: BTreeSet<u32>,
}

impl LineMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that original `line` now lives on instrumented line `target`
    pub fn record_move(&mut self, line: u32, target: u32) {
        if line != target {
            self.moved.insert(line, target);
            self.synthetic.insert(line);
        }
    }

    /// Original line for an instrumented line; `None` for synthetic lines
    pub fn to_original(&self, instrumented: u32) -> Option<u32> {
        if self.synthetic.contains(&instrumented) {
            None
        } else {
            Some(instrumented)
        }
    }

    /// Where an original line's statement lives in the instrumented file
    pub fn to_instrumented(&self, original: u32) -> u32 {
        self.moved.get(&original).copied().unwrap_or(original)
    }

    /// Only entries whose original and instrumented lines differ
    pub fn entries(&self) -> &BTreeMap<u32, u32> {
        &self.moved
    }
}
