//! Context definitions
//!
//! A [`ContextDef`] is the data-only description of one node of the test
//! tree: its topic, hooks, vows and sub-contexts in declaration order. Trees
//! are registered explicitly through a [`Registry`] and never change once
//! planning starts.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::panic::Location;
use std::sync::Arc;

use super::topic::{Outcome, Topic, TopicArgs, TopicValue};
use crate::executor::TopicCallback;

/// Member names that are never planned as vows or sub-contexts
pub const RESERVED_NAMES: &[&str] = &["setup", "topic", "teardown"];

/// Members starting with this prefix are ignored by the planner
pub const IGNORED_PREFIX: &str = "_";

pub type HookFn = Arc<dyn Fn(&ContextHandle) -> Outcome + Send + Sync>;
pub type SyncTopicFn = Arc<dyn Fn(&ContextHandle, &TopicArgs) -> Outcome<Topic> + Send + Sync>;
pub type AsyncTopicFn =
    Arc<dyn Fn(ContextHandle, TopicArgs) -> BoxFuture<'static, Outcome<Topic>> + Send + Sync>;
pub type CallbackTopicFn = Arc<dyn Fn(ContextHandle, TopicArgs, TopicCallback) + Send + Sync>;
pub type SyncVowFn = Arc<dyn Fn(&ContextHandle, &TopicValue) -> Outcome + Send + Sync>;
pub type AsyncVowFn =
    Arc<dyn Fn(ContextHandle, TopicValue) -> BoxFuture<'static, Outcome> + Send + Sync>;
pub type SkipPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// How a topic function delivers its value
#[derive(Clone)]
pub enum TopicKind {
    Sync(SyncTopicFn),
    Async(AsyncTopicFn),
    /// Delivers its value through a [`TopicCallback`] instead of returning
    Callback(CallbackTopicFn),
}

/// Topic function plus the number of ancestor topics it consumes
#[derive(Clone)]
pub struct TopicDef {
    pub arity: usize,
    pub kind: TopicKind,
}

#[derive(Clone)]
pub enum VowKind {
    Sync(SyncVowFn),
    Async(AsyncVowFn),
}

/// A single vow and its declaration site
#[derive(Clone)]
pub struct VowDef {
    pub name: String,
    pub kind: VowKind,
    pub file: &'static str,
    pub line: u32,
    pub skip: Option<String>,
}

impl fmt::Debug for VowDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VowDef")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("line", &self.line)
            .field("skip", &self.skip)
            .finish()
    }
}

/// Skip directive attached to a context
#[derive(Clone)]
pub enum SkipDirective {
    Always(String),
    /// Evaluated once, when the execution plan is built
    When {
        predicate: SkipPredicate,
        reason: String,
    },
}

impl SkipDirective {
    pub fn evaluate(&self) -> Option<String> {
        match self {
            SkipDirective::Always(reason) => Some(reason.clone()),
            SkipDirective::When { predicate, reason } => predicate().then(|| reason.clone()),
        }
    }
}

/// Declared member of a context, in declaration order
#[derive(Clone)]
pub enum Member {
    Vow(VowDef),
    Context(ContextDef),
}

impl Member {
    pub fn name(&self) -> &str {
        match self {
            Member::Vow(vow) => &vow.name,
            Member::Context(context) => &context.name,
        }
    }
}

/// Static definition of a context node
#[derive(Clone)]
pub struct ContextDef {
    pub name: String,
    pub file: &'static str,
    pub members: Vec<Member>,
    pub topic: Option<TopicDef>,
    pub setup: Option<HookFn>,
    pub teardown: Option<HookFn>,
    pub skip: Option<SkipDirective>,
    pub ignored: HashSet<String>,
    pub capture_error: bool,
}

impl ContextDef {
    #[track_caller]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: Location::caller().file(),
            members: Vec::new(),
            topic: None,
            setup: None,
            teardown: None,
            skip: None,
            ignored: HashSet::new(),
            capture_error: false,
        }
    }

    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&ContextHandle) -> Outcome + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&ContextHandle) -> Outcome + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(f));
        self
    }

    /// Topic that takes no ancestor values
    pub fn topic<F>(self, f: F) -> Self
    where
        F: Fn(&ContextHandle) -> Outcome<Topic> + Send + Sync + 'static,
    {
        self.topic_with_args(0, move |handle, _| f(handle))
    }

    /// Topic receiving the `arity` nearest ancestor topics, nearest first
    pub fn topic_with_args<F>(mut self, arity: usize, f: F) -> Self
    where
        F: Fn(&ContextHandle, &TopicArgs) -> Outcome<Topic> + Send + Sync + 'static,
    {
        self.topic = Some(TopicDef {
            arity,
            kind: TopicKind::Sync(Arc::new(f)),
        });
        self
    }

    pub fn topic_async<F, Fut>(mut self, arity: usize, f: F) -> Self
    where
        F: Fn(ContextHandle, TopicArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<Topic>> + Send + 'static,
    {
        self.topic = Some(TopicDef {
            arity,
            kind: TopicKind::Async(Arc::new(move |handle, args| f(handle, args).boxed())),
        });
        self
    }

    /// Topic that hands its value to a callback; `arity` excludes the callback
    pub fn topic_callback<F>(mut self, arity: usize, f: F) -> Self
    where
        F: Fn(ContextHandle, TopicArgs, TopicCallback) + Send + Sync + 'static,
    {
        self.topic = Some(TopicDef {
            arity,
            kind: TopicKind::Callback(Arc::new(f)),
        });
        self
    }

    #[track_caller]
    pub fn vow<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ContextHandle, &TopicValue) -> Outcome + Send + Sync + 'static,
    {
        let location = Location::caller();
        self.members.push(Member::Vow(VowDef {
            name: name.into(),
            kind: VowKind::Sync(Arc::new(f)),
            file: location.file(),
            line: location.line(),
            skip: None,
        }));
        self
    }

    #[track_caller]
    pub fn vow_async<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ContextHandle, TopicValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let location = Location::caller();
        self.members.push(Member::Vow(VowDef {
            name: name.into(),
            kind: VowKind::Async(Arc::new(move |handle, topic| f(handle, topic).boxed())),
            file: location.file(),
            line: location.line(),
            skip: None,
        }));
        self
    }

    /// Vow that is always recorded as skipped and never invoked
    #[track_caller]
    pub fn vow_skipped<F>(
        mut self,
        name: impl Into<String>,
        reason: impl Into<String>,
        f: F,
    ) -> Self
    where
        F: Fn(&ContextHandle, &TopicValue) -> Outcome + Send + Sync + 'static,
    {
        let location = Location::caller();
        self.members.push(Member::Vow(VowDef {
            name: name.into(),
            kind: VowKind::Sync(Arc::new(f)),
            file: location.file(),
            line: location.line(),
            skip: Some(reason.into()),
        }));
        self
    }

    pub fn context(mut self, child: ContextDef) -> Self {
        self.members.push(Member::Context(child));
        self
    }

    /// Never treat the named member as a vow or sub-context
    pub fn ignore(mut self, name: impl Into<String>) -> Self {
        self.ignored.insert(name.into());
        self
    }

    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(SkipDirective::Always(reason.into()));
        self
    }

    pub fn skip_if<P>(mut self, predicate: P, reason: impl Into<String>) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.skip = Some(SkipDirective::When {
            predicate: Arc::new(predicate),
            reason: reason.into(),
        });
        self
    }

    /// Turn a non-skip topic failure into the topic value itself
    pub fn capture_error(mut self) -> Self {
        self.capture_error = true;
        self
    }

    /// Whether a member with this name is planned at all
    pub fn is_plannable(&self, name: &str) -> bool {
        !name.starts_with(IGNORED_PREFIX)
            && !RESERVED_NAMES.contains(&name)
            && !self.ignored.contains(name)
    }
}

impl fmt::Debug for ContextDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDef")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("members", &self.members.iter().map(Member::name).collect::<Vec<_>>())
            .field("has_topic", &self.topic.is_some())
            .finish()
    }
}

/// Named collection of top-level contexts, kept in registration order
#[derive(Clone, Debug, Default)]
pub struct Registry {
    suites: Vec<(String, Vec<ContextDef>)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suite(mut self, name: impl Into<String>, contexts: Vec<ContextDef>) -> Self {
        let name = name.into();
        for context in contexts {
            self.add(name.clone(), context);
        }
        self
    }

    pub fn add(&mut self, suite: impl Into<String>, context: ContextDef) {
        let suite = suite.into();
        match self.suites.iter_mut().find(|(name, _)| *name == suite) {
            Some((_, contexts)) => contexts.push(context),
            None => self.suites.push((suite, vec![context])),
        }
    }

    pub fn suites(&self) -> impl Iterator<Item = (&str, &[ContextDef])> {
        self.suites
            .iter()
            .map(|(name, contexts)| (name.as_str(), contexts.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }
}

/// Per-context stdout/stderr buffers
#[derive(Debug, Default)]
pub struct OutputCapture {
    enabled: bool,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl OutputCapture {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn stdout(&self) -> String {
        self.stdout.lock().clone()
    }

    pub fn stderr(&self) -> String {
        self.stderr.lock().clone()
    }

    fn write_stdout(&self, text: &str) {
        if self.enabled {
            self.stdout.lock().push_str(text);
        } else {
            let _ = std::io::stdout().write_all(text.as_bytes());
        }
    }

    fn write_stderr(&self, text: &str) {
        if self.enabled {
            self.stderr.lock().push_str(text);
        } else {
            let _ = std::io::stderr().write_all(text.as_bytes());
        }
    }
}

/// Handle to a running context instance, passed to all user code
#[derive(Clone, Debug)]
pub struct ContextHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    name: String,
    id: String,
    index: Option<usize>,
    output: Arc<OutputCapture>,
}

impl ContextHandle {
    pub(crate) fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        index: Option<usize>,
        output: Arc<OutputCapture>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name: name.into(),
                id: id.into(),
                index,
                output,
            }),
        }
    }

    /// Same instance, seen from one enumerated branch
    pub(crate) fn with_index(&self, index: Option<usize>) -> Self {
        Self::new(
            self.inner.name.clone(),
            self.inner.id.clone(),
            index,
            self.inner.output.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Position within the nearest enumerated ancestor topic, if any
    pub fn index(&self) -> Option<usize> {
        self.inner.index
    }

    /// Write a line to this context's captured stdout
    pub fn println(&self, text: impl fmt::Display) {
        self.inner.output.write_stdout(&format!("{text}\n"));
    }

    /// Write a line to this context's captured stderr
    pub fn eprintln(&self, text: impl fmt::Display) {
        self.inner.output.write_stderr(&format!("{text}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &ContextHandle, _: &TopicValue) -> Outcome {
        Ok(())
    }

    #[test]
    fn test_members_keep_declaration_order() {
        let def = ContextDef::new("Root")
            .vow("b", noop)
            .context(ContextDef::new("Child"))
            .vow("a", noop);

        let names: Vec<_> = def.members.iter().map(Member::name).collect();
        assert_eq!(names, vec!["b", "Child", "a"]);
    }

    #[test]
    fn test_vow_records_declaration_site() {
        let def = ContextDef::new("Root").vow("located", noop);
        match &def.members[0] {
            Member::Vow(vow) => {
                assert!(vow.file.ends_with("context.rs"));
                assert!(vow.line > 0);
            }
            Member::Context(_) => panic!("expected a vow"),
        }
    }

    #[test]
    fn test_is_plannable() {
        let def = ContextDef::new("Root").ignore("helper");
        assert!(def.is_plannable("should_work"));
        assert!(!def.is_plannable("_private"));
        assert!(!def.is_plannable("topic"));
        assert!(!def.is_plannable("helper"));
    }

    #[test]
    fn test_skip_directive() {
        assert_eq!(
            SkipDirective::Always("later".into()).evaluate(),
            Some("later".to_string())
        );
        let never = SkipDirective::When {
            predicate: Arc::new(|| false),
            reason: "never".into(),
        };
        assert_eq!(never.evaluate(), None);
    }

    #[test]
    fn test_registry_groups_by_suite() {
        let mut registry = Registry::new().suite("math", vec![ContextDef::new("Add")]);
        registry.add("math", ContextDef::new("Sub"));
        registry.add("strings", ContextDef::new("Concat"));

        let suites: Vec<_> = registry
            .suites()
            .map(|(name, contexts)| (name, contexts.len()))
            .collect();
        assert_eq!(suites, vec![("math", 2), ("strings", 1)]);
    }

    #[test]
    fn test_handle_captures_output() {
        let output = Arc::new(OutputCapture::new(true));
        let handle = ContextHandle::new("Ctx", "Root.Ctx", None, output.clone());
        handle.println("hello");
        handle.eprintln("oops");
        assert_eq!(output.stdout(), "hello\n");
        assert_eq!(output.stderr(), "oops\n");
    }
}
