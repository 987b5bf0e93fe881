//! Vow runner
//!
//! Ties planning and scheduling together for a [`Registry`].

use tracing::{debug, info};

use super::scheduler::Scheduler;
use crate::config::AppConfig;
use crate::models::{Registry, RunResult};
use crate::plan::{ExecutionPlan, ExecutionPlanner, PlanError};

/// Runner for a registry of vow suites
pub struct VowsRunner {
    registry: Registry,
    config: AppConfig,
}

impl VowsRunner {
    /// Create a runner with default configuration
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an exclusion pattern
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.config.exclude.push(pattern.into());
        self
    }

    /// Add an inclusion pattern
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.config.include.push(pattern.into());
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Build the execution plan; fails on conflicting or invalid patterns
    pub fn plan(&self) -> Result<ExecutionPlan, PlanError> {
        let planner =
            ExecutionPlanner::new(&self.registry, &self.config.exclude, &self.config.include)?;
        let plan = planner.plan();
        debug!(
            "Planned {} contexts with {} vows",
            plan.ids().len() - plan.vow_count(),
            plan.vow_count()
        );
        Ok(plan)
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.max_concurrent).with_capture_output(self.config.capture_output)
    }

    /// Plan and run every registered suite
    pub async fn run(&self) -> Result<RunResult, PlanError> {
        let plan = self.plan()?;
        if plan.is_empty() {
            info!("Nothing to run: no context survived filtering");
        }
        Ok(self.scheduler().run(&plan).await)
    }
}

/// Run a registry with default configuration
pub async fn run_registry(registry: Registry) -> Result<RunResult, PlanError> {
    VowsRunner::new(registry).run().await
}
