//! Vow execution engine
//!
//! Resolves topics, bridges callback topics and schedules every context
//! instance and vow as a concurrent unit.

mod bridge;
mod resolver;
mod runner;
mod scheduler;

pub use bridge::{spawn_callback_topic, PendingTopic, TopicCallback};
pub use resolver::TopicChain;
pub use runner::{run_registry, VowsRunner};
pub use scheduler::{Scheduler, DEFAULT_MAX_CONCURRENT, TOPIC_DEPENDENCY_FAILED};
