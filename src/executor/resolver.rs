//! Topic argument resolution
//!
//! Every context instance sees its ancestors through a [`TopicChain`]: a
//! persistent, nearest-first list of resolved topics. Enumerated ancestors
//! contribute the element of the branch the instance runs in, so an index is
//! never needed to look a value up.

use std::sync::Arc;

use crate::models::{TopicArgs, TopicValue};

#[derive(Debug)]
struct Link {
    topic: Option<TopicValue>,
    parent: Option<Arc<Link>>,
}

/// Resolved topics of all ancestors of an instance, nearest first
#[derive(Clone, Debug, Default)]
pub struct TopicChain {
    head: Option<Arc<Link>>,
}

impl TopicChain {
    /// Chain seen by top-level contexts
    pub fn root() -> Self {
        Self::default()
    }

    /// Chain seen by the children of an instance whose topic is `topic`
    pub fn push(&self, topic: Option<TopicValue>) -> Self {
        Self {
            head: Some(Arc::new(Link {
                topic,
                parent: self.head.clone(),
            })),
        }
    }

    fn levels(&self) -> impl Iterator<Item = &Link> {
        std::iter::successors(self.head.as_deref(), |link| link.parent.as_deref())
    }

    /// Arguments for a topic function consuming `arity` ancestor values
    ///
    /// Walks upward from the immediate parent until `arity` values are
    /// collected or the root is reached. Levels without any topic are skipped.
    pub fn resolve_args(&self, arity: usize) -> TopicArgs {
        TopicArgs::new(
            self.levels()
                .filter_map(|link| link.topic.clone())
                .take(arity)
                .collect(),
        )
    }

    /// Topic passed through to a context that declares no topic function
    pub fn inherited(&self) -> Option<TopicValue> {
        self.levels().find_map(|link| link.topic.clone())
    }

    pub fn depth(&self) -> usize {
        self.levels().count()
    }
}
