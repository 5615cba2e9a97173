//! Bootstrap orchestrator
//!
//! Runs the bootstrap stages strictly in order. Each stage gets its own
//! scoped client and retries its whole resource set until it converges, a
//! fatal error occurs, or the cancellation token fires. Later stages assume
//! the resources of earlier ones exist, so a stage never starts before the
//! previous one returned.
//!
//! Completed stages are never rolled back.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::apply::{apply_resource_set, ApplySummary};
use crate::resources::{BundledSets, ResourceSet};
use crate::scope::{LogicalScope, ScopeRouter};
use bootstrapper_common::retry::{retry_with_backoff, RetryConfig};
use bootstrapper_common::Error;

/// User agent tag for stages that target the root scope
pub const ROOT_CALLER_TAG: &str = "bootstrap-root";
/// User agent tag for stages that target the workload scope
pub const WORKLOAD_CALLER_TAG: &str = "bootstrap-widgets";
/// Scope hosting the workload resources unless configured otherwise
pub const DEFAULT_WORKLOAD_SCOPE: &str = "root:widgets";

/// What to do when a stage fails for a reason other than cancellation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Stop at the first failed stage
    #[default]
    Abort,
    /// Run every stage, then report the first failure
    BestEffort,
}

/// One resource set applied to one scope
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage name, used to attribute errors
    pub name: String,
    /// Scope the resources are created in
    pub scope: LogicalScope,
    /// Tag identifying this stage's requests to the API server
    pub caller_tag: String,
    /// Documents to create
    pub resources: Arc<ResourceSet>,
}

impl Stage {
    /// Create a stage
    pub fn new(
        name: impl Into<String>,
        scope: LogicalScope,
        caller_tag: impl Into<String>,
        resources: Arc<ResourceSet>,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            caller_tag: caller_tag.into(),
            resources,
        }
    }
}

/// The bootstrap sequence for the bundled sets
///
/// 1. API schemas and their export into the root scope
/// 2. the workload scope itself, into the root scope
/// 3. a binding to the export, then workload-owned instances, into the
///    workload scope
/// 4. consumer-facing scopes into the root scope
///
/// Schemas do not cross scopes, so the workload scope can only serve the
/// exported kinds once its binding exists.
pub fn default_stages(sets: &BundledSets, workload_scope: &LogicalScope) -> Vec<Stage> {
    let root = LogicalScope::root();
    vec![
        Stage::new(
            sets.schemas.name(),
            root.clone(),
            ROOT_CALLER_TAG,
            sets.schemas.clone(),
        ),
        Stage::new(
            sets.workspaces.name(),
            root.clone(),
            ROOT_CALLER_TAG,
            sets.workspaces.clone(),
        ),
        Stage::new(
            sets.widgets.name(),
            workload_scope.clone(),
            WORKLOAD_CALLER_TAG,
            sets.widgets.clone(),
        ),
        Stage::new(
            sets.consumers.name(),
            root,
            ROOT_CALLER_TAG,
            sets.consumers.clone(),
        ),
    ]
}

/// Stages that converged, in the order they ran
#[derive(Debug, Default)]
pub struct BootstrapReport {
    /// Stage name and what its final pass did
    pub completed: Vec<(String, ApplySummary)>,
}

impl BootstrapReport {
    /// Documents created across all stages
    pub fn created(&self) -> usize {
        self.completed.iter().map(|(_, summary)| summary.created).sum()
    }
}

/// Drives the stages against scoped clients from a router
pub struct Orchestrator<R> {
    router: R,
    stages: Vec<Stage>,
    retry: RetryConfig,
    policy: FailurePolicy,
}

impl<R: ScopeRouter> Orchestrator<R> {
    /// Create an orchestrator with infinite retries and the abort policy
    pub fn new(router: R, stages: Vec<Stage>) -> Self {
        Self {
            router,
            stages,
            retry: RetryConfig::infinite(),
            policy: FailurePolicy::default(),
        }
    }

    /// Override the retry configuration used by every stage
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the failure policy
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stages in execution order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage in order.
    ///
    /// Every error is attributed to its stage. Cancellation stops the run
    /// under either policy; other failures stop it only under
    /// [`FailurePolicy::Abort`].
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BootstrapReport, Error> {
        let mut report = BootstrapReport::default();
        let mut failures = Vec::new();

        for stage in &self.stages {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("stage start").in_stage(&stage.name));
            }

            info!(
                stage = %stage.name,
                scope = %stage.scope,
                documents = stage.resources.len(),
                "Bootstrapping stage"
            );

            match self.run_stage(stage, cancel).await {
                Ok(summary) => {
                    info!(
                        stage = %stage.name,
                        created = summary.created,
                        unchanged = summary.unchanged,
                        diverged = summary.diverged,
                        present = summary.present,
                        "Stage complete"
                    );
                    report.completed.push((stage.name.clone(), summary));
                }
                Err(e) => {
                    let e = e.in_stage(&stage.name);
                    if e.is_cancelled() || self.policy == FailurePolicy::Abort {
                        return Err(e);
                    }
                    error!(
                        stage = %stage.name,
                        error = %e,
                        "Stage failed, continuing with remaining stages"
                    );
                    failures.push(e);
                }
            }
        }

        if let Some(first) = failures.into_iter().next() {
            warn!(
                completed = report.completed.len(),
                total = self.stages.len(),
                "Some bootstrap stages failed"
            );
            return Err(first);
        }

        Ok(report)
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        cancel: &CancellationToken,
    ) -> Result<ApplySummary, Error> {
        let client = self.router.for_scope(&stage.scope, &stage.caller_tag)?;
        let client = &client;
        let set = stage.resources.as_ref();
        let operation = format!("bootstrap-{}", stage.name);

        retry_with_backoff(&self.retry, &operation, cancel, || {
            apply_resource_set(client, set, cancel)
        })
        .await
    }
}
