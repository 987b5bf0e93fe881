//! Data models for the vow engine
//!
//! Static context definitions, topic values and the result tree.

mod context;
mod result;
mod topic;

pub use context::{
    AsyncTopicFn, AsyncVowFn, CallbackTopicFn, ContextDef, ContextHandle, HookFn, Member,
    OutputCapture, Registry, SkipDirective, SkipPredicate, SyncTopicFn, SyncVowFn, TopicDef,
    TopicKind, VowDef, VowKind, IGNORED_PREFIX, RESERVED_NAMES,
};
pub use result::{ContextResult, NodeId, ResultTree, RunResult, VowResult, VowStatus};
pub use topic::{ensure, ErrorRecord, Failure, Outcome, Topic, TopicArgs, TopicValue};
