//! vowrun - concurrent context/topic/vow test engine
//!
//! Suites are trees of contexts. Each context may produce a topic, the value
//! under test, and declares vows: assertions run against that topic. Child
//! contexts receive the topics of their ancestors, and every context instance
//! and vow runs as its own task under a bounded worker pool.
//!
//! ## Features
//!
//! - Sync, async and callback-style topics
//! - Enumerated topics that fan a subtree out over each element
//! - Skip and error cascading through subtrees
//! - Regex exclude/include filtering at plan time
//! - JSON and summary output of the result tree
//!
//! ## Usage
//!
//! ```no_run
//! use vowrun::{ensure, ContextDef, Registry, Topic};
//!
//! fn main() -> std::process::ExitCode {
//!     let registry = Registry::new().suite(
//!         "arithmetic",
//!         vec![ContextDef::new("Addition")
//!             .topic(|_| Ok(Topic::value(1 + 1)))
//!             .vow("is_two", |_, topic| ensure(topic.equals(&2), "1 + 1 != 2"))],
//!     );
//!     vowrun::cli::main(registry)
//! }
//! ```

pub mod cli;
pub mod config;
pub mod executor;
pub mod models;
pub mod output;
pub mod plan;
pub mod utils;

pub use config::AppConfig;
pub use executor::{run_registry, Scheduler, TopicCallback, VowsRunner};
pub use models::{
    ensure, ContextDef, ContextHandle, ContextResult, ErrorRecord, Failure, Outcome, Registry,
    RunResult, Topic, TopicArgs, TopicValue, VowResult, VowStatus,
};
pub use plan::{ExecutionPlan, ExecutionPlanner, PlanError};
