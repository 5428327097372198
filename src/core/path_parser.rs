// src/core/path_parser.rs
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{TestPathError, Result};
use super::instrumentor::{InstrumentationProfile, MarkerRegistry};
use super::member_locator::{JavaMemberLocator, MemberSpan};
use super::model::{Invoked, LineMapping, TestPath, TestedInvoked};
use super::session::CollectionSession;
use super::tracer::{RawSegment, TraceRequest};

/// Step of the per-invocation pipeline a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Instrument,
    Compile,
    Trace,
    Remap,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Instrument => "instrument",
            Phase::Compile => "compile",
            Phase::Trace => "trace",
            Phase::Remap => "remap",
        };
        f.write_str(name)
    }
}

/// Failure of one invocation, tagged with where it happened
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: TestPathError,
}

trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> std::result::Result<T, PhaseError>;
}

impl<T> InPhase<T> for Result<T> {
    fn in_phase(self, phase: Phase) -> std::result::Result<T, PhaseError> {
        self.map_err(|source| PhaseError { phase, source })
    }
}

/// Test paths indexed by (test method, invoked), in insertion order
#[derive(Debug, Default)]
pub struct TestPathStore {
    order: Vec<TestedInvoked>,
    paths: HashMap<TestedInvoked, Vec<TestPath>>,
}

impl TestPathStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append paths for a pair; the pair is registered even with no paths
    pub fn insert(&mut self, tested: TestedInvoked, paths: Vec<TestPath>) {
        match self.paths.get_mut(&tested) {
            Some(existing) => existing.extend(paths),
            None => {
                self.order.push(tested.clone());
                self.paths.insert(tested, paths);
            }
        }
    }

    pub fn get_test_paths_of(&self, tested: &TestedInvoked) -> Option<&[TestPath]> {
        self.paths.get(tested).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TestedInvoked, &[TestPath])> {
        self.order
            .iter()
            .filter_map(|t| self.paths.get(t).map(|p| (t, p.as_slice())))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Serialize)]
struct StoreEntry<'a> {
    test_method: String,
    invoked: String,
    invocation_line: u32,
    test_paths: &'a [TestPath],
}

impl Serialize for TestPathStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(|(tested, paths)| StoreEntry {
            test_method: tested.test_method.signature.to_string(),
            invoked: tested.invoked.signature.to_string(),
            invocation_line: tested.invoked.invocation_line,
            test_paths: paths,
        }))
    }
}

/// Translate one raw segment into an original-file test path.
///
/// Synthetic lines are dropped; a leading declaration line and, for void
/// members, a trailing closing brace are stripped.
pub fn remap_segment(segment: &RawSegment, mapping: &LineMapping, spans: &[MemberSpan], returns_void: bool) -> TestPath {
    let mut lines: Vec<u32> = segment
        .lines
        .iter()
        .filter_map(|&line| mapping.to_original(line))
        .collect();

    if let Some(&first) = lines.first() {
        if spans.iter().any(|s| s.is_declaration_only(first)) {
            lines.remove(0);
        }
    }

    if returns_void {
        if let Some(&last) = lines.last() {
            if spans.iter().any(|s| s.is_closing_brace(last)) {
                lines.pop();
            }
        }
    }

    TestPath {
        lines,
        complete: segment.complete,
    }
}

/// Manifest entries the instrumented files do not back up
fn marker_mismatches(tested: &TestedInvoked, invoked: &MarkerRegistry, test: &MarkerRegistry) -> Vec<String> {
    let mut problems = vec![];
    let invoked_class = tested.invoked.signature.outer_class_name();
    if !invoked.has_class(invoked_class) {
        problems.push(format!(
            "{} declares no class {}",
            tested.invoked.source_path().display(),
            invoked_class
        ));
    }
    let test_method = tested.test_method.signature.member_name();
    if test.test_named(test_method).is_none() {
        problems.push(format!(
            "{} carries no test annotation; the runner may never execute it",
            tested.test_method.signature
        ));
    }
    problems
}

/// Runs instrument, compile, trace and remap for each pair of a session
pub struct TestPathParser<'s> {
    session: &'s CollectionSession,
    locator: JavaMemberLocator,
    store: TestPathStore,
}

impl<'s> TestPathParser<'s> {
    pub fn new(session: &'s CollectionSession) -> Result<Self> {
        Ok(Self {
            session,
            locator: JavaMemberLocator::new()?,
            store: TestPathStore::new(),
        })
    }

    pub fn store(&self) -> &TestPathStore {
        &self.store
    }

    pub fn into_store(self) -> TestPathStore {
        self.store
    }

    pub fn get_test_paths_of(&self, tested: &TestedInvoked) -> Option<&[TestPath]> {
        self.store.get_test_paths_of(tested)
    }

    fn output_dir(&self, member: &Invoked) -> PathBuf {
        member
            .class_root()
            .unwrap_or_else(|| self.session.config().compiler.output_dir.clone())
    }

    /// Trace one pair and record its paths
    pub async fn parse(&mut self, tested: &TestedInvoked) -> std::result::Result<Vec<TestPath>, PhaseError> {
        let invoked = &tested.invoked;
        let test = &tested.test_method;
        let orchestrator = self.session.orchestrator();

        let original = std::fs::read_to_string(invoked.source_path())
            .map_err(TestPathError::from)
            .in_phase(Phase::Instrument)?;
        let spans = self.locator.locate(&original, &invoked.signature).in_phase(Phase::Instrument)?;
        if spans.is_empty() {
            warn!("No declaration of {} found in {}", invoked.signature, invoked.source_path().display());
        }

        let invoked_file = orchestrator
            .prepare(invoked.source_path(), InstrumentationProfile::Invoked)
            .in_phase(Phase::Instrument)?;
        let test_file = orchestrator
            .prepare(test.source_path(), InstrumentationProfile::TestMethod)
            .in_phase(Phase::Instrument)?;
        for problem in marker_mismatches(tested, &invoked_file.markers, &test_file.markers) {
            warn!("{}", problem);
        }
        // the test file may have been the invoked file and re-instrumented
        let invoked_mapping = if tested.shares_source_file() {
            test_file.mapping.clone()
        } else {
            invoked_file.mapping.clone()
        };

        let invoked_out = self.output_dir(invoked);
        let test_out = self.output_dir(test);
        let mut classpath = vec![invoked_out.clone()];
        if test_out != invoked_out {
            classpath.push(test_out.clone());
        }

        orchestrator
            .compile(invoked.source_path(), &invoked_out, &classpath, invoked.binary_path.as_deref())
            .await
            .in_phase(Phase::Compile)?;
        orchestrator
            .compile(test.source_path(), &test_out, &classpath, test.binary_path.as_deref())
            .await
            .in_phase(Phase::Compile)?;

        let request = self.request(tested, &test_file.mapping, classpath);
        debug!(
            "Breaking at {}:{} (original line {})",
            request.test_class, request.breakpoint_line, invoked.invocation_line
        );
        let trace = self
            .session
            .backend()
            .trace(&request)
            .await
            .in_phase(Phase::Trace)?;

        let mut paths: Vec<TestPath> = trace
            .segments
            .iter()
            .map(|segment| remap_segment(segment, &invoked_mapping, &spans, invoked.returns_void()))
            .collect();
        // a timeout outside the invoked still has to show up as an incomplete path
        if trace.timed_out && paths.iter().all(|p| p.complete) {
            warn!("{}: timed out before the invoked was (re-)entered", tested);
            paths.push(TestPath::incomplete(vec![]));
        }

        let line_count = original.lines().count() as u32;
        if let Some(path) = paths.iter().find(|p| p.lines.iter().any(|&l| l == 0 || l > line_count)) {
            return Err(PhaseError {
                phase: Phase::Remap,
                source: TestPathError::TracerProtocol(format!(
                    "traced line outside {}: {}",
                    invoked.source_path().display(),
                    path
                )),
            });
        }

        info!("{}: {} test path(s)", tested, paths.len());
        self.store.insert(tested.clone(), paths.clone());
        Ok(paths)
    }

    fn request(&self, tested: &TestedInvoked, test_mapping: &LineMapping, classpath: Vec<PathBuf>) -> TraceRequest {
        let invoked = &tested.invoked;
        let test = &tested.test_method;

        let mut sourcepath: Vec<PathBuf> = vec![];
        for root in [invoked.source_root(), test.source_root()].into_iter().flatten() {
            if !sourcepath.contains(&root) {
                sourcepath.push(root);
            }
        }

        TraceRequest {
            test_class: test.signature.class_name().to_string(),
            test_method: test.signature.runtime_member_name().to_string(),
            breakpoint_line: test_mapping.to_instrumented(invoked.invocation_line),
            invocation: invoked.descriptor(),
            returns_void: invoked.returns_void(),
            classpath,
            sourcepath,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use async_trait::async_trait;

    use super::*;
    use crate::config::Config;
    use crate::core::instrumentor::fixtures::{AUX_CLASS, TEST_CLASS};
    use crate::core::instrumentor::SourceInstrumentor;
    use crate::core::model::{Argument, InvokedKind, Signature};
    use crate::core::tracer::{RawTrace, TraceBackend};

    fn segment(lines: &[u32]) -> RawSegment {
        RawSegment { lines: lines.to_vec(), complete: true }
    }

    fn factorial_span() -> MemberSpan {
        MemberSpan {
            declaration_line: 34,
            first_statement_line: Some(35),
            closing_line: 42,
            closing_brace_alone: true,
        }
    }

    #[test]
    fn test_remap_drops_synthetic_lines() {
        let mut mapping = LineMapping::new();
        mapping.record_move(48, 47);

        let path = remap_segment(&segment(&[46, 47, 48, 49]), &mapping, &[], false);
        assert_eq!(path.lines, vec![46, 47, 49]);
        assert!(path.complete);
    }

    #[test]
    fn test_remap_strips_declaration_and_void_brace() {
        let ctor = MemberSpan {
            declaration_line: 15,
            first_statement_line: Some(16),
            closing_line: 17,
            closing_brace_alone: true,
        };
        let path = remap_segment(&segment(&[15, 16, 17]), &LineMapping::new(), &[ctor], true);
        assert_eq!(path.lines, vec![16]);

        // an empty body still yields one (empty) path
        let empty = MemberSpan {
            declaration_line: 12,
            first_statement_line: None,
            closing_line: 13,
            closing_brace_alone: true,
        };
        let path = remap_segment(&segment(&[12, 13]), &LineMapping::new(), &[empty], true);
        assert!(path.lines.is_empty());

        // non-void members keep their last line
        let path = remap_segment(&segment(&[35, 36, 37, 41, 42]), &LineMapping::new(), &[factorial_span()], false);
        assert_eq!(path.lines, vec![35, 36, 37, 41, 42]);
    }

    #[test]
    fn test_store_keeps_order_and_empty_entries() {
        let member = |sig: &str, line: u32| Invoked {
            signature: Signature::parse(sig, InvokedKind::Method).unwrap(),
            source_path: "A.java".into(),
            binary_path: None,
            invocation_line: line,
            return_type: None,
            args: vec![],
        };
        let a = TestedInvoked::new(member("a.A.f()", 10), member("a.T.t()", 9));
        let b = TestedInvoked::new(member("a.A.g()", 11), member("a.T.t()", 9));

        let mut store = TestPathStore::new();
        store.insert(b.clone(), vec![]);
        store.insert(a.clone(), vec![TestPath::new(vec![1])]);
        store.insert(a.clone(), vec![TestPath::new(vec![2])]);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get_test_paths_of(&a).unwrap().len(), 2);
        assert_eq!(store.get_test_paths_of(&b), Some(&[][..]));
        let order: Vec<_> = store.iter().map(|(t, _)| t.invoked.signature.to_string()).collect();
        assert_eq!(order, vec!["a.A.g()", "a.A.f()"]);

        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json[1]["test_paths"][0]["lines"], serde_json::json!([1]));
    }

    /// Backend replaying raw segments per invoked member and remembering requests
    struct ReplayBackend {
        segments: HashMap<String, Vec<Vec<u32>>>,
        timed_out: bool,
        requests: Arc<Mutex<Vec<TraceRequest>>>,
    }

    #[async_trait]
    impl TraceBackend for ReplayBackend {
        fn name(&self) -> &'static str {
            "replay"
        }

        async fn trace(&self, request: &TraceRequest) -> Result<RawTrace> {
            self.requests.lock().unwrap().push(request.clone());
            let key = request.invocation.signature.to_string();
            let segments = self
                .segments
                .get(&key)
                .map(|all| all.iter().map(|l| segment(l)).collect())
                .unwrap_or_default();
            Ok(RawTrace { segments, timed_out: self.timed_out })
        }
    }

    struct Project {
        dir: tempfile::TempDir,
        config: Config,
    }

    impl Project {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("src/examples");
            std::fs::create_dir_all(&src).unwrap();
            std::fs::write(src.join("AuxClass.java"), AUX_CLASS).unwrap();
            std::fs::write(src.join("TestClass.java"), TEST_CLASS).unwrap();

            let mut config = Config::default();
            config.session.checkpoint_dir = dir.path().join("state");
            config.compiler.program = "true".to_string();
            config.compiler.output_dir = dir.path().join("bin");
            Self { dir, config }
        }

        fn source(&self, name: &str) -> PathBuf {
            self.dir.path().join("src/examples").join(name)
        }

        fn member(&self, signature: &str, kind: InvokedKind, file: &str, line: u32, return_type: &str) -> Invoked {
            Invoked {
                signature: Signature::parse(signature, kind).unwrap(),
                source_path: self.source(file),
                binary_path: None,
                invocation_line: line,
                return_type: Some(return_type.to_string()),
                args: vec![Argument { ty: "int".to_string(), value: "4".to_string() }],
            }
        }

        fn factorial_from(&self, test_method: &str, test_line: u32, call_line: u32) -> TestedInvoked {
            TestedInvoked::new(
                self.member("examples.AuxClass.factorial(int)", InvokedKind::Method, "AuxClass.java", call_line, "long"),
                self.member(test_method, InvokedKind::Method, "TestClass.java", test_line, "void"),
            )
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parse_factorial_end_to_end() {
        let project = Project::new();
        let raw_four = vec![34, 35, 36, 37, 38, 39, 37, 38, 39, 37, 38, 39, 37, 38, 39, 37, 41];
        let backend = ReplayBackend {
            segments: HashMap::from([("examples.AuxClass.factorial(int)".to_string(), vec![raw_four])]),
            timed_out: false,
            requests: Arc::default(),
        };
        let session = CollectionSession::with_backend(project.config.clone(), Box::new(backend)).unwrap();
        let mut parser = TestPathParser::new(&session).unwrap();

        let tested = project.factorial_from("examples.TestClass.testFactorial()", 9, 10);
        let paths = parser.parse(&tested).await.unwrap();
        assert_eq!(
            paths,
            vec![TestPath::new(vec![35, 36, 37, 38, 39, 37, 38, 39, 37, 38, 39, 37, 38, 39, 37, 41])]
        );
        assert_eq!(parser.get_test_paths_of(&tested).unwrap().len(), 1);

        // both files stay instrumented until the session closes
        assert_ne!(std::fs::read_to_string(project.source("AuxClass.java")).unwrap(), AUX_CLASS);
        drop(parser);
        assert!(session.close().is_empty());
        assert_eq!(std::fs::read_to_string(project.source("AuxClass.java")).unwrap(), AUX_CLASS);
        assert_eq!(std::fs::read_to_string(project.source("TestClass.java")).unwrap(), TEST_CLASS);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_breakpoint_follows_merged_call() {
        let project = Project::new();
        let requests = Arc::new(Mutex::new(vec![]));
        let backend = ReplayBackend {
            segments: HashMap::new(),
            timed_out: false,
            requests: requests.clone(),
        };
        let session = CollectionSession::with_backend(project.config.clone(), Box::new(backend)).unwrap();
        let mut parser = TestPathParser::new(&session).unwrap();

        // `AuxClass.factorial(0)` sits on line 17, a continuation of line 16
        let tested = project.factorial_from("examples.TestClass.testFactorialZero()", 15, 17);
        let paths = parser.parse(&tested).await.unwrap();
        assert!(paths.is_empty());
        assert_eq!(parser.store().len(), 1);

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].breakpoint_line, 16);
        assert_eq!(requests[0].test_class, "examples.TestClass");
        assert_eq!(requests[0].test_method, "testFactorialZero");
        assert!(!requests[0].returns_void);
        assert!(requests[0].sourcepath.contains(&project.dir.path().join("src")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_reported_as_incomplete_path() {
        let project = Project::new();
        let backend = ReplayBackend {
            segments: HashMap::from([(
                "examples.AuxClass.factorial(int)".to_string(),
                vec![vec![35, 36, 37, 41]],
            )]),
            timed_out: true,
            requests: Arc::default(),
        };
        let session = CollectionSession::with_backend(project.config.clone(), Box::new(backend)).unwrap();
        let mut parser = TestPathParser::new(&session).unwrap();

        // the first call returned, the watchdog fired before the test called again
        let tested = project.factorial_from("examples.TestClass.testFactorial()", 9, 10);
        let paths = parser.parse(&tested).await.unwrap();
        assert_eq!(paths, vec![TestPath::new(vec![35, 36, 37, 41]), TestPath::incomplete(vec![])]);

        let mut csv = Vec::new();
        crate::core::export::exporter_for(crate::core::export::ExportFormat::Csv)
            .export(parser.store(), &mut csv)
            .unwrap();
        let csv = String::from_utf8(csv).unwrap();
        assert!(csv.contains("examples.TestClass.testFactorial();examples.AuxClass.factorial(int);[] (incomplete)"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_before_entering_is_not_silent() {
        let project = Project::new();
        let backend = ReplayBackend {
            segments: HashMap::new(),
            timed_out: true,
            requests: Arc::default(),
        };
        let session = CollectionSession::with_backend(project.config.clone(), Box::new(backend)).unwrap();
        let mut parser = TestPathParser::new(&session).unwrap();

        let tested = project.factorial_from("examples.TestClass.testFactorial()", 9, 10);
        let paths = parser.parse(&tested).await.unwrap();
        assert_eq!(paths, vec![TestPath::incomplete(vec![])]);
    }

    #[test]
    fn test_marker_mismatches() {
        let project = Project::new();
        let mut instrumentor =
            SourceInstrumentor::new(InstrumentationProfile::Both, &project.config.instrumentation).unwrap();
        let aux = instrumentor.instrument_file(&project.source("AuxClass.java")).unwrap();
        let test = instrumentor.instrument_file(&project.source("TestClass.java")).unwrap();

        let tested = project.factorial_from("examples.TestClass.testFactorial()", 9, 10);
        assert!(marker_mismatches(&tested, &aux.markers, &test.markers).is_empty());

        // a helper without @Test, and the invoked looked up in the wrong file
        let tested = TestedInvoked::new(
            project.member("examples.AuxClass.factorial(int)", InvokedKind::Method, "AuxClass.java", 10, "long"),
            project.member("examples.TestClass.helper()", InvokedKind::Method, "TestClass.java", 9, "void"),
        );
        let problems = marker_mismatches(&tested, &test.markers, &test.markers);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].ends_with("declares no class examples.AuxClass"));
        assert!(problems[1].starts_with("examples.TestClass.helper()"));
    }
}
