//! Concurrent plan scheduler
//!
//! Walks an [`ExecutionPlan`] with one task per context instance and one task
//! per vow run. Each instance resolves its topic, then either runs its vows
//! and children against it (once per element for enumerated topics) or
//! records the whole subtree as skipped, and finally tears down. An instance
//! only completes after every task below it has completed, so teardowns run
//! innermost first.
//!
//! Worker capacity is a semaphore shared by all units that execute user code.
//! Instances waiting on children or on an async topic callback hold no
//! capacity, so exhausting the pool only delays spawning.

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::bridge::spawn_callback_topic;
use super::resolver::TopicChain;
use crate::models::{
    ContextHandle, ContextResult, ErrorRecord, Failure, NodeId, Outcome, ResultTree, RunResult,
    Topic, TopicKind, TopicValue, VowDef, VowKind, VowResult,
};
use crate::plan::{ExecutionPlan, PlanNode};
use crate::utils::Timer;

/// Default number of concurrently runnable units
pub const DEFAULT_MAX_CONCURRENT: usize = 1000;

/// Prefix of the skip reason recorded below a failed topic
pub const TOPIC_DEPENDENCY_FAILED: &str = "topic dependency failed";

struct Shared {
    pool: Arc<Semaphore>,
    results: Arc<Mutex<ResultTree>>,
    capture_output: bool,
}

impl Shared {
    async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        // The pool is never closed
        self.pool.acquire().await.ok()
    }

    fn open(&self, parent: Option<NodeId>, node: &PlanNode) -> NodeId {
        self.results.lock().open(
            parent,
            &node.name,
            &node.id,
            &node.filename,
            self.capture_output,
        )
    }
}

/// Ancestor view of an instance
#[derive(Clone, Default)]
struct Lineage {
    chain: TopicChain,
    index: Option<usize>,
}

enum TopicState {
    /// `None` passes the inherited topic through
    Resolved(Option<Topic>),
    Skipped(String),
    Errored(ErrorRecord),
}

/// One run of a context's vows and children against a single topic value
struct Branch {
    topic: Option<TopicValue>,
    index: Option<usize>,
    enumerated: bool,
}

/// Result arena of one run
type Arena = Arc<Mutex<ResultTree>>;

/// Runs execution plans concurrently
///
/// Every run owns a fresh result arena; clones share the slot through which
/// [`Scheduler::snapshot`] sees the most recently started run.
#[derive(Clone)]
pub struct Scheduler {
    max_concurrent: usize,
    capture_output: bool,
    current: Arc<Mutex<Arena>>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            capture_output: true,
            current: Arc::default(),
        }
    }

    /// Capture context output into results instead of the process streams
    pub fn with_capture_output(mut self, enabled: bool) -> Self {
        self.capture_output = enabled;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every context of the plan; always yields a result
    pub async fn run(&self, plan: &ExecutionPlan) -> RunResult {
        let started_at = Utc::now();
        let timer = Timer::start("run");
        let results: Arena = Arc::default();
        *self.current.lock() = results.clone();

        let shared = Arc::new(Shared {
            pool: Arc::new(Semaphore::new(self.max_concurrent)),
            results: results.clone(),
            capture_output: self.capture_output,
        });

        info!(
            "Running {} vows (max {} concurrent)",
            plan.vow_count(),
            self.max_concurrent
        );

        let handles: Vec<_> = plan
            .contexts()
            .map(|node| {
                let id = shared.open(None, node);
                spawn_context(shared.clone(), node.clone(), Lineage::default(), id)
            })
            .collect();
        join(handles).await;

        let contexts = results.lock().build();
        let result = RunResult::new(contexts, timer.elapsed_secs(), started_at);
        info!(
            "Run completed in {:.3}s - Pass: {} | Fail: {} | Skip: {}",
            result.elapsed_time,
            result.successful_tests(),
            result.errored_tests(),
            result.skipped_tests()
        );
        result
    }

    /// Current, possibly partial, result tree of the latest run
    pub fn snapshot(&self) -> Vec<ContextResult> {
        let results = self.current.lock().clone();
        let contexts = results.lock().build();
        contexts
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

async fn join(handles: Vec<JoinHandle<()>>) {
    for joined in join_all(handles).await {
        if let Err(err) = joined {
            warn!("Scheduler task did not complete: {}", err);
        }
    }
}

fn spawn_context(
    shared: Arc<Shared>,
    node: Arc<PlanNode>,
    lineage: Lineage,
    id: NodeId,
) -> JoinHandle<()> {
    tokio::spawn(run_context(shared, node, lineage, id))
}

fn run_context(
    shared: Arc<Shared>,
    node: Arc<PlanNode>,
    lineage: Lineage,
    id: NodeId,
) -> BoxFuture<'static, ()> {
    async move {
        let output = shared.results.lock().output(id);
        let handle = ContextHandle::new(&node.name, &node.id, lineage.index, output);

        if let Some(reason) = &node.skip {
            info!("Skipping {}: {}", node.id, reason);
            shared.results.lock().set_skip(id, reason);
            cascade(&shared, &node, id, lineage.index, reason, Cascade::Skip).await;
            run_teardown(&shared, &node, &handle, id).await;
            return;
        }

        debug!("Starting context {}", node.id);
        let timer = Timer::start(&node.id);
        let state = resolve_topic(&shared, &node, &handle, &lineage.chain).await;
        shared.results.lock().set_topic_elapsed(id, timer.elapsed_secs());

        match state {
            TopicState::Resolved(topic) => {
                let branches = branches(topic, &lineage);
                let runs = branches
                    .into_iter()
                    .map(|branch| run_branch(&shared, &node, &handle, &lineage.chain, id, branch));
                join_all(runs).await;
            }
            TopicState::Skipped(reason) => {
                info!("Skipping {}: {}", node.id, reason);
                shared.results.lock().set_skip(id, &reason);
                cascade(&shared, &node, id, lineage.index, &reason, Cascade::Skip).await;
            }
            TopicState::Errored(error) => {
                warn!("Topic of {} failed: {}", node.id, error);
                let reason = format!("{TOPIC_DEPENDENCY_FAILED}: {error}");
                shared.results.lock().set_error(id, error);
                cascade(&shared, &node, id, lineage.index, &reason, Cascade::Error).await;
            }
        }

        run_teardown(&shared, &node, &handle, id).await;
        debug!("Finished context {}", node.id);
    }
    .boxed()
}

/// Run setup and the topic function
async fn resolve_topic(
    shared: &Shared,
    node: &PlanNode,
    handle: &ContextHandle,
    chain: &TopicChain,
) -> TopicState {
    let permit = shared.permit().await;

    if let Some(setup) = &node.setup {
        match guard(|| setup(handle)) {
            Ok(()) => {}
            Err(Failure::Skip(reason)) => return TopicState::Skipped(reason),
            Err(Failure::Error(error)) => return TopicState::Errored(error),
        }
    }

    let Some(topic) = &node.topic else {
        return TopicState::Resolved(None);
    };

    let args = chain.resolve_args(topic.arity);
    let outcome = match &topic.kind {
        TopicKind::Sync(f) => guard(|| f(handle, &args)),
        TopicKind::Async(f) => guard_async(|| f(handle.clone(), args)).await,
        TopicKind::Callback(f) => {
            drop(permit);
            spawn_callback_topic(f.clone(), handle.clone(), args, shared.pool.clone())
                .wait()
                .await
        }
    };

    match outcome {
        Ok(topic) => TopicState::Resolved(Some(topic)),
        Err(Failure::Skip(reason)) => TopicState::Skipped(reason),
        Err(Failure::Error(error)) if node.capture_error => {
            debug!("Captured topic error of {}: {}", node.id, error);
            TopicState::Resolved(Some(Topic::Value(TopicValue::new(error))))
        }
        Err(Failure::Error(error)) => TopicState::Errored(error),
    }
}

fn branches(topic: Option<Topic>, lineage: &Lineage) -> Vec<Branch> {
    match topic {
        None => vec![Branch {
            topic: lineage.chain.inherited(),
            index: lineage.index,
            enumerated: false,
        }],
        Some(Topic::Value(value)) => vec![Branch {
            topic: Some(value),
            index: lineage.index,
            enumerated: false,
        }],
        Some(Topic::Enumerated(values)) => values
            .into_iter()
            .enumerate()
            .map(|(index, value)| Branch {
                topic: Some(value),
                index: Some(index),
                enumerated: true,
            })
            .collect(),
    }
}

async fn run_branch(
    shared: &Arc<Shared>,
    node: &Arc<PlanNode>,
    handle: &ContextHandle,
    chain: &TopicChain,
    id: NodeId,
    branch: Branch,
) {
    let handle = handle.with_index(branch.index);
    let topic = branch.topic.clone().unwrap_or_else(TopicValue::none);
    let mut handles = Vec::new();

    for vow in &node.vows {
        if let Some(reason) = &vow.skip {
            let result = VowResult::skipped(vow, &node.id, reason.clone());
            shared.results.lock().push_vow(id, result);
            continue;
        }
        handles.push(tokio::spawn(run_vow(
            shared.clone(),
            vow.clone(),
            handle.clone(),
            topic.clone(),
            branch.enumerated,
            id,
        )));
    }

    let lineage = Lineage {
        chain: chain.push(branch.topic),
        index: branch.index,
    };
    for child in &node.children {
        let child_id = shared.open(Some(id), child);
        handles.push(spawn_context(
            shared.clone(),
            child.clone(),
            lineage.clone(),
            child_id,
        ));
    }

    join(handles).await;
}

async fn run_vow(
    shared: Arc<Shared>,
    vow: VowDef,
    handle: ContextHandle,
    topic: TopicValue,
    enumerated: bool,
    id: NodeId,
) {
    let _permit = shared.permit().await;
    let timer = Timer::start(&vow.name);

    let outcome = match &vow.kind {
        VowKind::Sync(f) => guard(|| f(&handle, &topic)),
        VowKind::Async(f) => guard_async(|| f(handle.clone(), topic.clone())).await,
    };
    if let Err(Failure::Error(error)) = &outcome {
        debug!("Vow {}.{} failed: {}", handle.id(), vow.name, error);
    }

    let result = VowResult::from_outcome(
        &vow,
        handle.id(),
        Some(topic.repr().to_string()),
        handle.index(),
        enumerated,
        outcome,
        timer.elapsed_secs(),
    );
    shared.results.lock().push_vow(id, result);
}

async fn run_teardown(shared: &Shared, node: &PlanNode, handle: &ContextHandle, id: NodeId) {
    let Some(teardown) = &node.teardown else {
        return;
    };
    let _permit = shared.permit().await;

    match guard(|| teardown(handle)) {
        Ok(()) => {}
        Err(Failure::Skip(reason)) => debug!("Teardown of {} skipped: {}", node.id, reason),
        Err(Failure::Error(error)) => {
            warn!("Teardown of {} failed: {}", node.id, error);
            if !shared.results.lock().set_error(id, error) {
                debug!("{} already carries an error", node.id);
            }
        }
    }
}

/// Why a subtree is recorded without running
#[derive(Clone, Copy, PartialEq, Eq)]
enum Cascade {
    /// Descendants with their own plan-time skip keep their own reason
    Skip,
    /// Every descendant carries the topic dependency reason
    Error,
}

/// Record every vow and descendant of `node` as skipped without running them
///
/// Setup, topic and vows of descendants never run; their teardowns do, each
/// after its own subtree.
fn cascade<'a>(
    shared: &'a Shared,
    node: &'a PlanNode,
    id: NodeId,
    index: Option<usize>,
    reason: &'a str,
    kind: Cascade,
) -> BoxFuture<'a, ()> {
    async move {
        {
            let mut results = shared.results.lock();
            for vow in &node.vows {
                results.push_vow(id, VowResult::skipped(vow, &node.id, reason));
            }
        }

        let children = node.children.iter().map(move |child| {
            let child_id = shared.open(Some(id), child);
            let reason = match kind {
                Cascade::Skip => child.skip.as_deref().unwrap_or(reason),
                Cascade::Error => reason,
            };
            shared.results.lock().set_skip(child_id, reason);

            async move {
                cascade(shared, child, child_id, index, reason, kind).await;
                let output = shared.results.lock().output(child_id);
                let handle = ContextHandle::new(&child.name, &child.id, index, output);
                run_teardown(shared, child, &handle, child_id).await;
            }
        });
        join_all(children).await;
    }
    .boxed()
}

fn panic_failure(payload: Box<dyn std::any::Any + Send>) -> Failure {
    Failure::Error(ErrorRecord::from_panic(payload))
}

/// Call synchronous user code, turning panics into failures
fn guard<T>(call: impl FnOnce() -> Outcome<T>) -> Outcome<T> {
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(panic_failure(payload)))
}

/// Call asynchronous user code, turning panics into failures
async fn guard_async<T>(call: impl FnOnce() -> BoxFuture<'static, Outcome<T>>) -> Outcome<T> {
    let future = match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(future) => future,
        Err(payload) => return Err(panic_failure(payload)),
    };
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panic_failure(payload)))
}
