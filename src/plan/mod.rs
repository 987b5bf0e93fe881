//! Execution planning
//!
//! Walks the registered context trees and produces the filtered, declarative
//! [`ExecutionPlan`] the scheduler consumes. Exclusion patterns are matched
//! against bare context and vow names, inclusion patterns against dotted ids;
//! both use regular-expression search semantics.

use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::{ContextDef, HookFn, Member, Registry, TopicDef, VowDef};

/// Configuration errors raised while planning
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("exclusion and inclusion patterns cannot be used together")]
    ConflictingPatterns,

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Planned context, mirroring its [`ContextDef`] minus filtered members
#[derive(Clone)]
pub struct PlanNode {
    pub name: String,
    pub id: String,
    pub filename: String,
    pub vows: Vec<VowDef>,
    pub children: Vec<Arc<PlanNode>>,
    /// Skip reason decided at plan time
    pub skip: Option<String>,
    pub topic: Option<TopicDef>,
    pub setup: Option<HookFn>,
    pub teardown: Option<HookFn>,
    pub capture_error: bool,
}

impl PlanNode {
    /// Dotted ids of this node, its vows and all descendants
    pub fn ids(&self) -> Vec<String> {
        let mut ids = vec![self.id.clone()];
        ids.extend(self.vows.iter().map(|vow| format!("{}.{}", self.id, vow.name)));
        for child in &self.children {
            ids.extend(child.ids());
        }
        ids
    }

    pub fn vow_count(&self) -> usize {
        self.vows.len() + self.children.iter().map(|c| c.vow_count()).sum::<usize>()
    }
}

/// Planned contexts of one suite
#[derive(Clone)]
pub struct SuitePlan {
    pub name: String,
    pub contexts: Vec<Arc<PlanNode>>,
}

/// Filtered tree of everything a run will execute
#[derive(Clone, Default)]
pub struct ExecutionPlan {
    pub suites: Vec<SuitePlan>,
}

impl ExecutionPlan {
    pub fn contexts(&self) -> impl Iterator<Item = &Arc<PlanNode>> {
        self.suites.iter().flat_map(|suite| suite.contexts.iter())
    }

    pub fn ids(&self) -> Vec<String> {
        self.contexts().flat_map(|node| node.ids()).collect()
    }

    pub fn vow_count(&self) -> usize {
        self.contexts().map(|node| node.vow_count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts().next().is_none()
    }
}

/// Builds an [`ExecutionPlan`] from a [`Registry`]
pub struct ExecutionPlanner<'a> {
    registry: &'a Registry,
    exclude: Vec<Regex>,
    include: Vec<Regex>,
}

impl<'a> ExecutionPlanner<'a> {
    pub fn new<S: AsRef<str>>(
        registry: &'a Registry,
        exclude: &[S],
        include: &[S],
    ) -> Result<Self, PlanError> {
        if !exclude.is_empty() && !include.is_empty() {
            return Err(PlanError::ConflictingPatterns);
        }

        Ok(Self {
            registry,
            exclude: compile(exclude)?,
            include: compile(include)?,
        })
    }

    pub fn plan(&self) -> ExecutionPlan {
        let suites = self
            .registry
            .suites()
            .map(|(name, contexts)| SuitePlan {
                name: name.to_string(),
                contexts: self.plan_children(contexts.iter(), ""),
            })
            .collect();

        ExecutionPlan { suites }
    }

    fn plan_children<'d>(
        &self,
        contexts: impl Iterator<Item = &'d ContextDef>,
        id_base: &str,
    ) -> Vec<Arc<PlanNode>> {
        contexts
            .filter(|def| !self.is_excluded(&def.name))
            .filter_map(|def| {
                let (node, required) = self.plan_context(def, id_base);
                if required || self.is_included(&node.id) {
                    Some(Arc::new(node))
                } else {
                    debug!("Pruned context {}", node.id);
                    None
                }
            })
            .collect()
    }

    /// Plan one context; the flag tells whether inclusion patterns require it
    fn plan_context(&self, def: &ContextDef, id_base: &str) -> (PlanNode, bool) {
        let id = if id_base.is_empty() {
            def.name.clone()
        } else {
            format!("{id_base}.{}", def.name)
        };

        let vows: Vec<VowDef> = def
            .members
            .iter()
            .filter_map(|member| match member {
                Member::Vow(vow) if def.is_plannable(&vow.name) => Some(vow),
                _ => None,
            })
            .filter(|vow| {
                !self.is_excluded(&vow.name) && self.is_included(&format!("{id}.{}", vow.name))
            })
            .cloned()
            .collect();

        let children = self.plan_children(
            def.members.iter().filter_map(|member| match member {
                Member::Context(child) if def.is_plannable(&child.name) => Some(child),
                _ => None,
            }),
            &id,
        );

        let required = !self.include.is_empty()
            && (self.is_included(&id) || !vows.is_empty() || !children.is_empty());

        let node = PlanNode {
            name: def.name.clone(),
            filename: def.file.to_string(),
            vows,
            children,
            skip: def.skip.as_ref().and_then(|directive| directive.evaluate()),
            topic: def.topic.clone(),
            setup: def.setup.clone(),
            teardown: def.teardown.clone(),
            capture_error: def.capture_error,
            id,
        };

        (node, required)
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|pattern| pattern.is_match(name))
    }

    fn is_included(&self, name: &str) -> bool {
        self.include.is_empty() || self.include.iter().any(|pattern| pattern.is_match(name))
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, PlanError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern.as_ref()).map_err(|source| PlanError::InvalidPattern {
                pattern: pattern.as_ref().to_string(),
                source,
            })
        })
        .collect()
}
