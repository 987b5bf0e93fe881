//! Result model
//!
//! Per-vow and per-context outcomes plus the run-level aggregate. Counters are
//! always derived by walking the tree; nothing is cached on the nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::context::{OutputCapture, VowDef};
use super::topic::{ErrorRecord, Failure, Outcome};

/// Vow execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VowStatus {
    Pass,
    Fail,
    Skip,
}

impl VowStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            VowStatus::Pass => "✓",
            VowStatus::Fail => "✗",
            VowStatus::Skip => "○",
        }
    }
}

impl fmt::Display for VowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VowStatus::Pass => write!(f, "PASS"),
            VowStatus::Fail => write!(f, "FAIL"),
            VowStatus::Skip => write!(f, "SKIP"),
        }
    }
}

/// Outcome of a single vow run against one topic value
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VowResult {
    pub name: String,
    /// Dotted id of the owning context instance
    pub context: String,
    pub enumerated: bool,
    pub index: Option<usize>,
    pub topic: Option<String>,
    pub result: VowStatus,
    pub error: Option<ErrorRecord>,
    pub succeeded: bool,
    pub file: String,
    pub lineno: u32,
    pub elapsed: f64,
    pub skip: Option<String>,
}

impl VowResult {
    /// Record a vow that ran
    pub fn from_outcome(
        vow: &VowDef,
        context: &str,
        topic: Option<String>,
        index: Option<usize>,
        enumerated: bool,
        outcome: Outcome,
        elapsed: f64,
    ) -> Self {
        let mut result = Self {
            name: vow.name.clone(),
            context: context.to_string(),
            enumerated,
            index,
            topic,
            result: VowStatus::Pass,
            error: None,
            succeeded: true,
            file: vow.file.to_string(),
            lineno: vow.line,
            elapsed,
            skip: None,
        };
        match outcome {
            Ok(()) => {}
            Err(Failure::Skip(reason)) => {
                result.result = VowStatus::Skip;
                result.succeeded = false;
                result.skip = Some(reason);
            }
            Err(Failure::Error(record)) => {
                result.result = VowStatus::Fail;
                result.succeeded = false;
                result.error = Some(record);
            }
        }
        result
    }

    /// Record a vow that was never invoked
    pub fn skipped(vow: &VowDef, context: &str, reason: impl Into<String>) -> Self {
        Self::from_outcome(
            vow,
            context,
            None,
            None,
            false,
            Err(Failure::Skip(reason.into())),
            0.0,
        )
    }

    pub fn is_skipped(&self) -> bool {
        self.skip.is_some()
    }

    pub fn is_errored(&self) -> bool {
        !self.succeeded && self.skip.is_none()
    }
}

impl fmt::Display for VowResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{} [{:.3}s]",
            self.result.symbol(),
            self.context,
            self.name,
            self.elapsed
        )?;
        if let Some(reason) = &self.skip {
            write!(f, " - {reason}")?;
        } else if let Some(error) = &self.error {
            write!(f, " - {error}")?;
        }
        Ok(())
    }
}

/// Outcome of one context instance and everything below it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextResult {
    pub name: String,
    pub id: String,
    pub filename: String,
    pub tests: Vec<VowResult>,
    pub contexts: Vec<ContextResult>,
    pub stdout: String,
    pub stderr: String,
    pub topic_elapsed: f64,
    pub error: Option<ErrorRecord>,
    pub skip: Option<String>,
}

impl ContextResult {
    /// This context followed by all of its descendants, depth first
    pub fn walk(&self) -> Vec<&ContextResult> {
        let mut nodes = vec![self];
        for child in &self.contexts {
            nodes.extend(child.walk());
        }
        nodes
    }

    pub fn vows(&self) -> impl Iterator<Item = &VowResult> {
        self.walk().into_iter().flat_map(|context| context.tests.iter())
    }
}

/// Root of the result tree for one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub contexts: Vec<ContextResult>,
    pub elapsed_time: f64,
    pub started_at: DateTime<Utc>,
}

impl RunResult {
    pub fn new(contexts: Vec<ContextResult>, elapsed_time: f64, started_at: DateTime<Utc>) -> Self {
        Self {
            contexts,
            elapsed_time,
            started_at,
        }
    }

    pub fn all_contexts(&self) -> Vec<&ContextResult> {
        self.contexts.iter().flat_map(ContextResult::walk).collect()
    }

    pub fn all_vows(&self) -> Vec<&VowResult> {
        self.contexts.iter().flat_map(ContextResult::vows).collect()
    }

    pub fn successful_tests(&self) -> usize {
        self.all_vows()
            .iter()
            .filter(|vow| vow.succeeded && vow.skip.is_none())
            .count()
    }

    pub fn errored_tests(&self) -> usize {
        self.all_vows().iter().filter(|vow| vow.is_errored()).count()
    }

    pub fn skipped_tests(&self) -> usize {
        self.all_vows().iter().filter(|vow| vow.is_skipped()).count()
    }

    pub fn total_test_count(&self) -> usize {
        self.all_vows().len()
    }

    /// No context error and no failed, non-skipped vow
    pub fn successful(&self) -> bool {
        self.all_contexts().iter().all(|context| context.error.is_none())
            && !self.all_vows().iter().any(|vow| vow.is_errored())
    }

    /// Up to `count` contexts whose topic took longer than `threshold` seconds,
    /// slowest first
    pub fn get_worst_topics(&self, count: usize, threshold: f64) -> Vec<&ContextResult> {
        let mut slow: Vec<_> = self
            .all_contexts()
            .into_iter()
            .filter(|context| context.topic_elapsed > threshold)
            .collect();
        slow.sort_by(|a, b| b.topic_elapsed.total_cmp(&a.topic_elapsed));
        slow.truncate(count);
        slow
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | Total: {} | Pass: {} | Fail: {} | Skip: {} | Duration: {:.3}s",
            if self.successful() { "OK" } else { "FAILED" },
            self.total_test_count(),
            self.successful_tests(),
            self.errored_tests(),
            self.skipped_tests(),
            self.elapsed_time
        )
    }
}

/// Handle to a node in a [`ResultTree`]
pub type NodeId = usize;

#[derive(Debug)]
struct Slot {
    name: String,
    id: String,
    filename: String,
    tests: Vec<VowResult>,
    children: Vec<NodeId>,
    output: Arc<OutputCapture>,
    topic_elapsed: f64,
    error: Option<ErrorRecord>,
    skip: Option<String>,
}

/// Arena holding the result tree while a run is in flight
///
/// Context instances refer to their node (and their parent's) by [`NodeId`];
/// nodes are linked into their parent when the instance is spawned, so the
/// tree can be rendered at any point with [`ResultTree::build`].
#[derive(Debug, Default)]
pub struct ResultTree {
    slots: Vec<Slot>,
    roots: Vec<NodeId>,
}

impl ResultTree {
    pub fn open(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        id: &str,
        filename: &str,
        capture_output: bool,
    ) -> NodeId {
        let node = self.slots.len();
        self.slots.push(Slot {
            name: name.to_string(),
            id: id.to_string(),
            filename: filename.to_string(),
            tests: Vec::new(),
            children: Vec::new(),
            output: Arc::new(OutputCapture::new(capture_output)),
            topic_elapsed: 0.0,
            error: None,
            skip: None,
        });
        match parent.and_then(|parent| self.slots.get_mut(parent)) {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
        node
    }

    pub fn output(&self, node: NodeId) -> Arc<OutputCapture> {
        match self.slots.get(node) {
            Some(slot) => slot.output.clone(),
            None => Arc::new(OutputCapture::default()),
        }
    }

    pub fn push_vow(&mut self, node: NodeId, vow: VowResult) {
        if let Some(slot) = self.slots.get_mut(node) {
            slot.tests.push(vow);
        }
    }

    pub fn set_topic_elapsed(&mut self, node: NodeId, elapsed: f64) {
        if let Some(slot) = self.slots.get_mut(node) {
            slot.topic_elapsed = elapsed;
        }
    }

    pub fn set_skip(&mut self, node: NodeId, reason: &str) {
        if let Some(slot) = self.slots.get_mut(node) {
            slot.skip = Some(reason.to_string());
        }
    }

    /// Record an error unless one is already present; returns whether it was kept
    pub fn set_error(&mut self, node: NodeId, error: ErrorRecord) -> bool {
        match self.slots.get_mut(node) {
            Some(slot) if slot.error.is_none() => {
                slot.error = Some(error);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Render the current state as nested [`ContextResult`]s
    pub fn build(&self) -> Vec<ContextResult> {
        self.roots.iter().filter_map(|&root| self.build_node(root)).collect()
    }

    fn build_node(&self, node: NodeId) -> Option<ContextResult> {
        let slot = self.slots.get(node)?;
        Some(ContextResult {
            name: slot.name.clone(),
            id: slot.id.clone(),
            filename: slot.filename.clone(),
            tests: slot.tests.clone(),
            contexts: slot
                .children
                .iter()
                .filter_map(|&child| self.build_node(child))
                .collect(),
            stdout: slot.output.stdout(),
            stderr: slot.output.stderr(),
            topic_elapsed: slot.topic_elapsed,
            error: slot.error.clone(),
            skip: slot.skip.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::context::{ContextHandle, VowKind};
    use crate::models::topic::TopicValue;

    fn vow_def(name: &str) -> VowDef {
        VowDef {
            name: name.to_string(),
            kind: VowKind::Sync(Arc::new(
                |_: &ContextHandle, _: &TopicValue| -> Outcome { Ok(()) },
            )),
            file: "suite.rs",
            line: 7,
            skip: None,
        }
    }

    fn passed(name: &str) -> VowResult {
        VowResult::from_outcome(&vow_def(name), "Root", None, None, false, Ok(()), 0.01)
    }

    fn failed(name: &str) -> VowResult {
        VowResult::from_outcome(
            &vow_def(name),
            "Root",
            None,
            None,
            false,
            Err(Failure::error("AssertionError", "1 != 2")),
            0.01,
        )
    }

    fn context(name: &str, tests: Vec<VowResult>, topic_elapsed: f64) -> ContextResult {
        ContextResult {
            name: name.to_string(),
            id: name.to_string(),
            filename: "suite.rs".to_string(),
            tests,
            contexts: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            topic_elapsed,
            error: None,
            skip: None,
        }
    }

    #[test]
    fn test_vow_result_from_outcome() {
        let pass = passed("ok");
        assert!(pass.succeeded);
        assert_eq!(pass.result, VowStatus::Pass);
        assert_eq!(pass.lineno, 7);

        let fail = failed("bad");
        assert!(fail.is_errored());
        assert_eq!(fail.error.as_ref().map(|e| e.kind.as_str()), Some("AssertionError"));

        let skip = VowResult::skipped(&vow_def("later"), "Root", "not yet");
        assert!(skip.is_skipped());
        assert!(!skip.is_errored());
        assert_eq!(skip.result, VowStatus::Skip);
    }

    #[test]
    fn test_counters_add_up() {
        let mut root = context("Root", vec![passed("a"), failed("b")], 0.0);
        root.contexts.push(context(
            "Child",
            vec![VowResult::skipped(&vow_def("c"), "Root.Child", "why"), passed("d")],
            0.0,
        ));
        let run = RunResult::new(vec![root], 1.0, Utc::now());

        assert_eq!(run.successful_tests(), 2);
        assert_eq!(run.errored_tests(), 1);
        assert_eq!(run.skipped_tests(), 1);
        assert_eq!(
            run.total_test_count(),
            run.successful_tests() + run.errored_tests() + run.skipped_tests()
        );
        assert!(!run.successful());
    }

    #[test]
    fn test_context_error_marks_run_unsuccessful() {
        let mut root = context("Root", vec![passed("a")], 0.0);
        root.error = Some(ErrorRecord::new("TeardownError", "cleanup failed"));
        let run = RunResult::new(vec![root], 1.0, Utc::now());
        assert_eq!(run.errored_tests(), 0);
        assert!(!run.successful());
    }

    #[test]
    fn test_get_worst_topics() {
        let mut root = context("Root", Vec::new(), 0.05);
        root.contexts.push(context("Slow", Vec::new(), 2.0));
        root.contexts.push(context("Slower", Vec::new(), 3.5));
        root.contexts.push(context("Medium", Vec::new(), 0.5));
        let run = RunResult::new(vec![root], 6.0, Utc::now());

        let worst: Vec<_> = run
            .get_worst_topics(2, 0.1)
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(worst, vec!["Slower", "Slow"]);
        assert_eq!(run.get_worst_topics(10, 0.1).len(), 3);
    }

    #[test]
    fn test_result_tree_links_children_at_open() {
        let mut tree = ResultTree::default();
        let root = tree.open(None, "Root", "Root", "suite.rs", true);
        let child = tree.open(Some(root), "Child", "Root.Child", "suite.rs", true);
        tree.push_vow(child, passed("a"));
        tree.set_skip(root, "partial");

        let built = tree.build();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].skip.as_deref(), Some("partial"));
        assert_eq!(built[0].contexts[0].tests.len(), 1);
    }

    #[test]
    fn test_result_tree_keeps_first_error() {
        let mut tree = ResultTree::default();
        let root = tree.open(None, "Root", "Root", "suite.rs", true);
        assert!(tree.set_error(root, ErrorRecord::new("First", "topic")));
        assert!(!tree.set_error(root, ErrorRecord::new("Second", "teardown")));
        assert_eq!(tree.build()[0].error.as_ref().map(|e| e.kind.as_str()), Some("First"));
    }
}
