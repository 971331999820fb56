//! Deployment execution
//!
//! A [`Deployment`] owns the snapshot for one stack for the duration of a
//! run. Steps are scheduled over the dependency graph with at most
//! `parallelism` in flight; every resource-level mutation of the snapshot is
//! persisted before the next one starts.

use crate::error::{EngineError, ResourceFailure, Result};
use crate::goal::ResourceGoal;
use crate::graph::{DependencyGraph, ScheduleNode, deletion_schedule};
use crate::plan::{DeploymentResult, ResourceOutcome, StepOp, StepResult};
use fleetform_config::{DefaultTimeouts, EngineConfig};
use fleetform_provider::{
    CheckFailure, CheckRequest, CreateRequest, DeleteRequest, DiffRequest, ProviderError, ProviderHandle,
    ProviderRegistry, ReadRequest, UpdateRequest,
};
use fleetform_resource::{DiffClassification, PropertyMap, Urn, apply_ignore_changes};
use fleetform_state::{
    ProviderReference, ResourceRecord, ResourceStatus, Snapshot, SnapshotPersister, StateError,
};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Deployment options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOptions {
    /// Maximum number of resource steps in flight
    pub parallelism: usize,

    /// Used when a resource has no custom timeout
    pub timeouts: DefaultTimeouts,

    /// Read pending records before updating
    pub refresh_pending: bool,
}

impl DeploymentOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            parallelism: config.parallelism,
            timeouts: config.default_timeouts,
            refresh_pending: config.refresh_pending,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

pub struct Deployment {
    registry: Arc<ProviderRegistry>,
    snapshot: Mutex<Snapshot>,
    persister: Arc<dyn SnapshotPersister>,
    options: DeploymentOptions,
    cancel: CancellationToken,
    /// PendingCreate records kept for their dependents with nothing behind them
    absent: Mutex<HashSet<Urn>>,
}

impl Deployment {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        snapshot: Snapshot,
        persister: Arc<dyn SnapshotPersister>,
        options: DeploymentOptions,
    ) -> Self {
        Self {
            registry,
            snapshot: Mutex::new(snapshot),
            persister,
            options,
            cancel: CancellationToken::new(),
            absent: Mutex::new(HashSet::new()),
        }
    }

    /// Token that stops new Create/Update/Delete calls when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Point-in-time copy of the snapshot
    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().await.clone()
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot.into_inner()
    }

    /// Plan the goals without touching infrastructure or the snapshot
    pub async fn preview(&self, goals: &[ResourceGoal]) -> Result<DeploymentResult> {
        self.run(goals, true).await
    }

    /// Drive infrastructure to the goals, deleting resources no goal names
    pub async fn update(&self, goals: &[ResourceGoal]) -> Result<DeploymentResult> {
        self.run(goals, false).await
    }

    /// Read every resource back from its provider
    pub async fn refresh(&self) -> Result<DeploymentResult> {
        let started = Instant::now();
        let nodes: Vec<(ScheduleNode, Urn)> = {
            let snapshot = self.snapshot.lock().await;
            snapshot
                .resources()
                .iter()
                .map(|r| (independent(&r.urn), r.urn.clone()))
                .collect()
        };
        tracing::info!("Refreshing {} resources", nodes.len());

        let steps = self.schedule(nodes, |urn| self.read_back(urn)).await?;
        Ok(self.finish(started, false, Vec::new(), steps))
    }

    /// Delete every resource, dependents first
    pub async fn destroy(&self) -> Result<DeploymentResult> {
        let started = Instant::now();
        let (nodes, doomed) = {
            let snapshot = self.snapshot.lock().await;
            let urns: Vec<&Urn> = snapshot.resources().iter().map(|r| &r.urn).collect();
            let doomed: HashSet<Urn> = urns.iter().map(|u| (*u).clone()).collect();
            (deletion_schedule(&snapshot, &urns), doomed)
        };
        tracing::info!("Destroying {} resources", nodes.len());

        let nodes: Vec<(ScheduleNode, Urn)> = nodes
            .into_iter()
            .map(|n| {
                let urn = n.urn.clone();
                (n, urn)
            })
            .collect();
        let steps = self
            .schedule(nodes, |urn| self.delete_step(urn, &doomed, false))
            .await?;
        Ok(self.finish(started, false, Vec::new(), steps))
    }

    async fn run(&self, goals: &[ResourceGoal], preview: bool) -> Result<DeploymentResult> {
        let started = Instant::now();

        // Validate the graph before any provider call
        let mut graph = {
            let snapshot = self.snapshot.lock().await;
            DependencyGraph::build(goals, &snapshot)?
        };

        let reconciled = if !preview && self.options.refresh_pending {
            self.reconcile_pending().await?
        } else {
            Vec::new()
        };
        if !reconciled.is_empty() {
            let snapshot = self.snapshot.lock().await;
            graph = DependencyGraph::build(goals, &snapshot)?;
        }

        tracing::info!(
            "{} {} resources (parallelism {})",
            if preview { "Previewing" } else { "Updating" },
            graph.len(),
            self.options.parallelism
        );

        let by_urn: HashMap<&Urn, &ResourceGoal> = goals.iter().map(|g| (&g.urn, g)).collect();
        let nodes: Vec<(ScheduleNode, &ResourceGoal)> = graph
            .schedule()
            .into_iter()
            .filter_map(|node| by_urn.get(&node.urn).map(|goal| (node, *goal)))
            .collect();
        let mut steps = self
            .schedule(nodes, |goal| self.goal_step(goal, preview))
            .await?;

        let (deletions, doomed) = {
            let snapshot = self.snapshot.lock().await;
            let deletions = graph.deletions(&snapshot);
            let doomed: HashSet<Urn> = deletions.iter().map(|n| n.urn.clone()).collect();
            (deletions, doomed)
        };
        let deletions: Vec<(ScheduleNode, Urn)> = deletions
            .into_iter()
            .map(|n| {
                let urn = n.urn.clone();
                (n, urn)
            })
            .collect();
        steps.extend(
            self.schedule(deletions, |urn| self.delete_step(urn, &doomed, preview))
                .await?,
        );

        Ok(self.finish(started, preview, reconciled, steps))
    }

    fn finish(
        &self,
        started: Instant,
        preview: bool,
        reconciled: Vec<StepResult>,
        steps: Vec<StepResult>,
    ) -> DeploymentResult {
        let result = DeploymentResult {
            preview,
            reconciled,
            steps,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let summary = result.summary();
        if result.is_success() {
            tracing::info!("Deployment finished: {}", summary);
        } else {
            tracing::warn!("Deployment finished with failures: {}", summary);
        }
        result
    }

    /// Run `step` for each node once everything in its `after` set has
    /// succeeded, with at most `parallelism` steps in flight
    ///
    /// A node whose prerequisite failed is skipped; once cancelled, or after
    /// a fatal error, no new step starts and in-flight steps run to
    /// completion. Results come back in node order.
    async fn schedule<T, F, Fut>(
        &self,
        nodes: Vec<(ScheduleNode, T)>,
        step: F,
    ) -> Result<Vec<StepResult>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<ResourceOutcome>>,
    {
        let limit = self.options.parallelism.max(1);
        let order: Vec<Urn> = nodes.iter().map(|(n, _)| n.urn.clone()).collect();
        let mut waiting: Vec<(ScheduleNode, T)> = nodes;
        let mut outcomes: HashMap<Urn, ResourceOutcome> = HashMap::new();
        let mut running = FuturesUnordered::new();
        let mut fatal: Option<EngineError> = None;

        loop {
            let halted = fatal.is_some() || self.cancel.is_cancelled();
            let mut index = 0;
            while index < waiting.len() {
                let node = &waiting[index].0;
                if let Some(outcome) = blocked(node, &outcomes) {
                    let (node, _) = waiting.remove(index);
                    outcomes.insert(node.urn, outcome);
                    continue;
                }
                let ready = node
                    .after
                    .iter()
                    .all(|d| outcomes.get(d).is_some_and(ResourceOutcome::is_success));
                if ready && !halted && running.len() < limit {
                    let (node, item) = waiting.remove(index);
                    let future = step(item);
                    running.push(async move { (node.urn, future.await) });
                    continue;
                }
                index += 1;
            }

            match running.next().await {
                Some((urn, Ok(outcome))) => {
                    outcomes.insert(urn, outcome);
                }
                Some((urn, Err(error))) => {
                    tracing::error!("Aborting deployment at {}: {}", urn, error);
                    outcomes.insert(urn, ResourceOutcome::Cancelled);
                    fatal.get_or_insert(error);
                }
                None => break,
            }
        }

        if let Some(error) = fatal {
            return Err(error);
        }
        for (node, _) in waiting {
            outcomes.insert(node.urn, ResourceOutcome::Cancelled);
        }
        Ok(order
            .into_iter()
            .map(|urn| {
                let outcome = outcomes
                    .remove(&urn)
                    .unwrap_or(ResourceOutcome::Cancelled);
                StepResult { urn, outcome }
            })
            .collect())
    }

    /// Apply `change` to the snapshot, stamp the manifest and persist
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Snapshot) -> fleetform_state::Result<()>,
    {
        let plugins = self.registry.plugin_versions().await;
        let mut snapshot = self.snapshot.lock().await;
        change(&mut snapshot)?;
        snapshot.manifest.stamp(&plugins);
        self.persister.persist(&snapshot).await?;
        Ok(())
    }

    async fn record(&self, urn: &Urn) -> Option<ResourceRecord> {
        self.snapshot.lock().await.get(urn).cloned()
    }

    async fn provider_for(
        &self,
        reference: &ProviderReference,
    ) -> std::result::Result<ProviderHandle, ResourceFailure> {
        self.registry
            .get_or_configure(&reference.package, &reference.config, None)
            .await
            .map_err(ResourceFailure::validation)
    }

    fn timeout(&self, custom: Option<Duration>, default: Duration) -> Duration {
        custom.unwrap_or(default)
    }

    async fn reconcile_pending(&self) -> Result<Vec<StepResult>> {
        let nodes: Vec<(ScheduleNode, Urn)> = {
            let snapshot = self.snapshot.lock().await;
            snapshot
                .pending()
                .into_iter()
                .map(|r| (independent(&r.urn), r.urn.clone()))
                .collect()
        };
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("Reconciling {} pending resources", nodes.len());
        self.schedule(nodes, |urn| self.read_back(urn)).await
    }

    /// Read a resource's live state into its record
    async fn read_back(&self, urn: Urn) -> Result<ResourceOutcome> {
        let Some(record) = self.record(&urn).await else {
            return Ok(ResourceOutcome::applied(StepOp::Discard));
        };
        let provider = match self.provider_for(&record.provider_reference()).await {
            Ok(provider) => provider,
            Err(failure) => return Ok(ResourceOutcome::failed(failure)),
        };

        let response = provider
            .read(ReadRequest {
                id: record.id.clone(),
                urn: urn.clone(),
                type_token: record.type_token.clone(),
                name: urn.name().to_string(),
                properties: record.outputs.clone(),
                inputs: record.inputs.clone(),
            })
            .await;

        match response {
            Ok(read) if !read.exists() => {
                let referenced = record.status == ResourceStatus::PendingCreate && {
                    let snapshot = self.snapshot.lock().await;
                    snapshot.resources().iter().any(|r| r.references_urn(&urn))
                };
                if referenced {
                    tracing::info!("{} was never created, keeping its record for dependents", urn);
                    self.absent.lock().await.insert(urn);
                } else {
                    tracing::info!("{} no longer exists, removing it", urn);
                    self.mutate(|s| s.remove_and_unlink(&urn).map(|_| ())).await?;
                }
                Ok(ResourceOutcome::applied(StepOp::Discard))
            }
            Ok(read) => {
                let mut refreshed = record;
                refreshed.id = read.id;
                refreshed.outputs = strip_unknowns(&urn, read.properties);
                if !read.inputs.is_empty() {
                    refreshed.inputs = read.inputs;
                }
                if refreshed.status != ResourceStatus::External {
                    refreshed.status = ResourceStatus::Created;
                }
                self.mutate(|s| s.upsert(refreshed)).await?;
                Ok(ResourceOutcome::applied(StepOp::Read))
            }
            Err(error) => {
                tracing::warn!("Failed to read {}: {}", urn, error);
                Ok(ResourceOutcome::failed(ResourceFailure::operation(
                    StepOp::Read,
                    error,
                )))
            }
        }
    }

    async fn goal_step(&self, goal: &ResourceGoal, preview: bool) -> Result<ResourceOutcome> {
        let mut old = self.record(&goal.urn).await;
        if old
            .as_ref()
            .is_some_and(|o| o.status == ResourceStatus::PendingCreate)
            && self.absent.lock().await.contains(&goal.urn)
        {
            old = None;
        }
        if let Some(old) = &old {
            match old.status {
                ResourceStatus::Indeterminate => {
                    return Ok(ResourceOutcome::failed(ResourceFailure::Indeterminate {
                        message: "last update did not confirm its rollback; resolve it first"
                            .to_string(),
                    }));
                }
                ResourceStatus::PendingCreate | ResourceStatus::PendingDelete => {
                    return Ok(ResourceOutcome::failed(ResourceFailure::Indeterminate {
                        message: format!("record is still {}; refresh it first", old.status),
                    }));
                }
                ResourceStatus::External => {
                    return Ok(ResourceOutcome::failed(ResourceFailure::Operation {
                        op: StepOp::Update,
                        message: "external resources are read-only".to_string(),
                    }));
                }
                ResourceStatus::Created => {}
            }
        }

        let provider = match self.provider_for(&goal.provider).await {
            Ok(provider) => provider,
            Err(failure) => return Ok(ResourceOutcome::failed(failure)),
        };

        let olds = old.as_ref().map(|o| o.inputs.clone()).unwrap_or_default();
        // Ignored paths keep their recorded values through Check, Diff and Update
        let news = match &old {
            Some(old) => {
                match apply_ignore_changes(&old.inputs, &goal.inputs, &goal.ignore_changes) {
                    Ok(news) => news,
                    Err(error) => {
                        return Ok(ResourceOutcome::failed(ResourceFailure::Validation {
                            failures: vec![CheckFailure::new("ignoreChanges", error.to_string())],
                        }));
                    }
                }
            }
            None => goal.inputs.clone(),
        };
        let checked = match provider
            .check(CheckRequest {
                urn: goal.urn.clone(),
                type_token: goal.type_token.clone(),
                name: goal.name().to_string(),
                olds,
                news: news.clone(),
                random_seed: rand::random::<[u8; 32]>().to_vec(),
            })
            .await
        {
            Ok(checked) => checked,
            Err(error) => return Ok(ResourceOutcome::failed(ResourceFailure::validation(error))),
        };
        if !checked.is_ok() {
            tracing::warn!("{} failed validation", goal.urn);
            return Ok(ResourceOutcome::failed(ResourceFailure::Validation {
                failures: checked.failures,
            }));
        }
        let inputs = checked.inputs.propagate_secrets(&news);

        let Some(old) = old else {
            return self
                .create(goal, &provider, inputs, preview, StepOp::Create)
                .await;
        };

        let diff = match provider
            .diff(DiffRequest {
                id: old.id.clone(),
                urn: goal.urn.clone(),
                type_token: goal.type_token.clone(),
                name: goal.name().to_string(),
                olds: old.inputs.clone(),
                news: inputs.clone(),
                ignore_changes: goal.ignore_changes.clone(),
            })
            .await
        {
            Ok(diff) => diff,
            Err(error) => return Ok(ResourceOutcome::failed(ResourceFailure::validation(error))),
        };
        tracing::debug!(
            "{}: {} (changed: {:?})",
            goal.urn,
            diff.classification,
            diff.changed_keys
        );

        match diff.classification {
            DiffClassification::NoChange => {
                let mut same = goal_record(goal, old.inputs.clone());
                same.id = old.id.clone();
                same.outputs = old.outputs.clone();
                if !preview && same != old {
                    self.mutate(|s| s.upsert(same)).await?;
                }
                Ok(ResourceOutcome::applied(StepOp::Same))
            }
            DiffClassification::Update => {
                self.update_in_place(goal, &provider, &old, inputs, preview)
                    .await
            }
            DiffClassification::Replace => {
                if old.protect {
                    return Ok(ResourceOutcome::failed(ResourceFailure::Protected {
                        op: StepOp::Replace,
                    }));
                }
                tracing::info!(
                    "{} must be replaced (changed: {:?})",
                    goal.urn,
                    diff.replace_keys
                );
                self.replace(
                    goal,
                    &provider,
                    &old,
                    inputs,
                    preview,
                    diff.delete_before_replace,
                )
                .await
            }
        }
    }

    async fn create(
        &self,
        goal: &ResourceGoal,
        provider: &ProviderHandle,
        inputs: PropertyMap,
        preview: bool,
        op: StepOp,
    ) -> Result<ResourceOutcome> {
        let request = self.create_request(goal, inputs.clone(), preview);

        if preview {
            return Ok(match provider.create(request).await {
                Ok(_) => ResourceOutcome::applied(op),
                Err(error) => {
                    ResourceOutcome::failed(ResourceFailure::operation(StepOp::Create, error))
                }
            });
        }
        if self.cancel.is_cancelled() {
            return Ok(ResourceOutcome::Cancelled);
        }

        let pending = goal_record(goal, inputs.clone()).with_status(ResourceStatus::PendingCreate);
        self.mutate(|s| s.upsert(pending.clone())).await?;

        tracing::info!("Creating {}", goal.urn);
        match provider.create(request).await {
            Ok(created) => {
                let Some(id) = created.id.filter(|id| !id.is_empty()) else {
                    return Ok(ResourceOutcome::failed(ResourceFailure::Indeterminate {
                        message: "provider returned no id".to_string(),
                    }));
                };
                let outputs =
                    strip_unknowns(&goal.urn, created.properties.propagate_secrets(&inputs));
                let record = pending
                    .with_id(id)
                    .with_outputs(outputs)
                    .with_status(ResourceStatus::Created);
                self.mutate(|s| s.upsert(record)).await?;
                Ok(ResourceOutcome::applied(op))
            }
            Err(error @ (ProviderError::Timeout(_) | ProviderError::Transport(_))) => {
                tracing::warn!("Create of {} left pending: {}", goal.urn, error);
                Ok(ResourceOutcome::failed(ResourceFailure::operation(
                    StepOp::Create,
                    error,
                )))
            }
            Err(error) => {
                tracing::warn!("Create of {} failed: {}", goal.urn, error);
                let mut kept = false;
                self.mutate(|s| match s.remove(&goal.urn) {
                    Ok(_) => Ok(()),
                    // Dependents still point at it; the record stays as a placeholder
                    Err(StateError::StillReferenced { .. }) => {
                        kept = true;
                        Ok(())
                    }
                    Err(e) => Err(e),
                })
                .await?;
                if kept {
                    self.absent.lock().await.insert(goal.urn.clone());
                }
                Ok(ResourceOutcome::failed(ResourceFailure::operation(
                    StepOp::Create,
                    error,
                )))
            }
        }
    }

    fn create_request(
        &self,
        goal: &ResourceGoal,
        properties: PropertyMap,
        preview: bool,
    ) -> CreateRequest {
        CreateRequest {
            urn: goal.urn.clone(),
            type_token: goal.type_token.clone(),
            name: goal.name().to_string(),
            properties,
            timeout: self.timeout(
                goal.custom_timeouts.as_ref().and_then(|t| t.create_timeout()),
                self.options.timeouts.create(),
            ),
            preview,
        }
    }

    async fn update_in_place(
        &self,
        goal: &ResourceGoal,
        provider: &ProviderHandle,
        old: &ResourceRecord,
        inputs: PropertyMap,
        preview: bool,
    ) -> Result<ResourceOutcome> {
        let request = UpdateRequest {
            id: old.id.clone(),
            urn: goal.urn.clone(),
            type_token: goal.type_token.clone(),
            name: goal.name().to_string(),
            olds: old.outputs.clone(),
            news: inputs.clone(),
            timeout: self.timeout(
                goal.custom_timeouts.as_ref().and_then(|t| t.update_timeout()),
                self.options.timeouts.update(),
            ),
            ignore_changes: goal.ignore_changes.clone(),
            preview,
        };

        if preview {
            return Ok(match provider.update(request).await {
                Ok(_) => ResourceOutcome::applied(StepOp::Update),
                Err(error) => {
                    ResourceOutcome::failed(ResourceFailure::operation(StepOp::Update, error))
                }
            });
        }
        if self.cancel.is_cancelled() {
            return Ok(ResourceOutcome::Cancelled);
        }

        tracing::info!("Updating {}", goal.urn);
        match provider.update(request).await {
            Ok(updated) => {
                let mut record = goal_record(goal, inputs.clone());
                record.id = old.id.clone();
                record.outputs =
                    strip_unknowns(&goal.urn, updated.properties.propagate_secrets(&inputs));
                self.mutate(|s| s.upsert(record)).await?;
                Ok(ResourceOutcome::applied(StepOp::Update))
            }
            Err(ProviderError::UpdateFailed {
                message,
                rolled_back: true,
            }) => {
                tracing::warn!(
                    "Update of {} failed, provider reports rollback: {}",
                    goal.urn,
                    message
                );
                Ok(ResourceOutcome::failed(ResourceFailure::Operation {
                    op: StepOp::Update,
                    message,
                }))
            }
            Err(error) => {
                tracing::error!("Update of {} left it indeterminate: {}", goal.urn, error);
                self.mutate(|s| s.set_status(&goal.urn, ResourceStatus::Indeterminate))
                    .await?;
                let failure = match error {
                    ProviderError::Transport(message) => ResourceFailure::Transport { message },
                    other => ResourceFailure::Indeterminate {
                        message: other.to_string(),
                    },
                };
                Ok(ResourceOutcome::failed(failure))
            }
        }
    }

    /// Swap the resource behind `old` for a new one under the same URN
    ///
    /// The new resource is created first and the old one deleted after, so a
    /// failed create leaves the old resource and its record untouched.
    /// Providers that cannot hold both at once ask for `delete_first`.
    async fn replace(
        &self,
        goal: &ResourceGoal,
        provider: &ProviderHandle,
        old: &ResourceRecord,
        inputs: PropertyMap,
        preview: bool,
        delete_first: bool,
    ) -> Result<ResourceOutcome> {
        if preview {
            return self
                .create(goal, provider, inputs, true, StepOp::Replace)
                .await;
        }
        if self.cancel.is_cancelled() {
            return Ok(ResourceOutcome::Cancelled);
        }

        let old_provider = if old.provider_reference() == goal.provider {
            provider.clone()
        } else {
            match self.provider_for(&old.provider_reference()).await {
                Ok(provider) => provider,
                Err(failure) => return Ok(ResourceOutcome::failed(failure)),
            }
        };

        if delete_first {
            tracing::info!("Replacing {} (delete first)", goal.urn);
            if let Some(failure) = self.delete_record(&old_provider, old).await? {
                return Ok(ResourceOutcome::failed(failure));
            }
            let reset =
                goal_record(goal, inputs.clone()).with_status(ResourceStatus::PendingCreate);
            self.mutate(|s| s.upsert(reset)).await?;
            return self
                .create(goal, provider, inputs, false, StepOp::Replace)
                .await;
        }

        tracing::info!("Replacing {}", goal.urn);
        let request = self.create_request(goal, inputs.clone(), false);
        let created = match provider.create(request).await {
            Ok(created) => created,
            Err(error) => {
                tracing::warn!(
                    "Create of the replacement for {} failed, keeping {}: {}",
                    goal.urn,
                    old.id,
                    error
                );
                return Ok(ResourceOutcome::failed(ResourceFailure::operation(
                    StepOp::Create,
                    error,
                )));
            }
        };
        let Some(id) = created.id.filter(|id| !id.is_empty()) else {
            return Ok(ResourceOutcome::failed(ResourceFailure::Indeterminate {
                message: "provider returned no id for the replacement".to_string(),
            }));
        };
        let outputs = strip_unknowns(&goal.urn, created.properties.propagate_secrets(&inputs));
        let record = goal_record(goal, inputs)
            .with_id(id)
            .with_outputs(outputs)
            .with_status(ResourceStatus::Created);
        self.mutate(|s| s.upsert(record)).await?;

        let request = DeleteRequest {
            id: old.id.clone(),
            urn: old.urn.clone(),
            type_token: old.type_token.clone(),
            name: old.urn.name().to_string(),
        };
        match old_provider.delete(request, self.delete_timeout(old)).await {
            Ok(()) => Ok(ResourceOutcome::applied(StepOp::Replace)),
            Err(error) => {
                tracing::warn!(
                    "{} was replaced but its old resource {} was not deleted: {}",
                    goal.urn,
                    old.id,
                    error
                );
                Ok(ResourceOutcome::failed(ResourceFailure::Operation {
                    op: StepOp::Delete,
                    message: format!("old resource {} was not deleted: {}", old.id, error),
                }))
            }
        }
    }

    async fn delete_step(
        &self,
        urn: Urn,
        doomed: &HashSet<Urn>,
        preview: bool,
    ) -> Result<ResourceOutcome> {
        let (record, referrer) = {
            let snapshot = self.snapshot.lock().await;
            let Some(record) = snapshot.get(&urn).cloned() else {
                return Ok(ResourceOutcome::applied(StepOp::Discard));
            };
            // A preview never rewrites the records of goals that dropped the reference
            let referrer = if preview {
                None
            } else {
                snapshot
                    .resources()
                    .iter()
                    .find(|r| r.references_urn(&urn) && !doomed.contains(&r.urn))
                    .map(|r| r.urn.clone())
            };
            (record, referrer)
        };

        if record.protect {
            return Ok(ResourceOutcome::failed(ResourceFailure::Protected {
                op: StepOp::Delete,
            }));
        }
        if let Some(by) = referrer {
            tracing::warn!("Not deleting {}: still referenced by {}", urn, by);
            return Ok(ResourceOutcome::Skipped { blocked_by: by });
        }
        if record.status == ResourceStatus::PendingCreate
            && self.absent.lock().await.contains(&urn)
        {
            if !preview {
                self.mutate(|s| s.remove(&urn).map(|_| ())).await?;
            }
            return Ok(ResourceOutcome::applied(StepOp::Discard));
        }
        match record.status {
            ResourceStatus::External => {
                if !preview {
                    self.mutate(|s| s.remove_and_unlink(&urn).map(|_| ())).await?;
                }
                return Ok(ResourceOutcome::applied(StepOp::Discard));
            }
            ResourceStatus::Indeterminate | ResourceStatus::PendingCreate => {
                return Ok(ResourceOutcome::failed(ResourceFailure::Indeterminate {
                    message: format!("record is {}; refresh or resolve it first", record.status),
                }));
            }
            ResourceStatus::Created | ResourceStatus::PendingDelete => {}
        }
        if preview {
            return Ok(ResourceOutcome::applied(StepOp::Delete));
        }
        if self.cancel.is_cancelled() {
            return Ok(ResourceOutcome::Cancelled);
        }

        let provider = match self.provider_for(&record.provider_reference()).await {
            Ok(provider) => provider,
            Err(failure) => return Ok(ResourceOutcome::failed(failure)),
        };

        tracing::info!("Deleting {}", urn);
        if let Some(failure) = self.delete_record(&provider, &record).await? {
            return Ok(ResourceOutcome::failed(failure));
        }
        self.mutate(|s| s.remove(&urn).map(|_| ())).await?;
        Ok(ResourceOutcome::applied(StepOp::Delete))
    }

    /// Delete the resource behind `record`, leaving the record in place
    ///
    /// A timed-out call leaves the record PendingDelete; any other failure
    /// restores it unchanged.
    async fn delete_record(
        &self,
        provider: &ProviderHandle,
        record: &ResourceRecord,
    ) -> Result<Option<ResourceFailure>> {
        let urn = record.urn.clone();
        self.mutate(|s| s.set_status(&urn, ResourceStatus::PendingDelete))
            .await?;

        let timeout = self.delete_timeout(record);
        let request = DeleteRequest {
            id: record.id.clone(),
            urn: urn.clone(),
            type_token: record.type_token.clone(),
            name: urn.name().to_string(),
        };

        match provider.delete(request, timeout).await {
            Ok(()) => Ok(None),
            Err(error @ ProviderError::Timeout(_)) => {
                tracing::warn!("Delete of {} left pending: {}", urn, error);
                Ok(Some(ResourceFailure::operation(StepOp::Delete, error)))
            }
            Err(error) => {
                tracing::warn!("Delete of {} failed: {}", urn, error);
                let original = record.clone();
                self.mutate(|s| s.upsert(original)).await?;
                Ok(Some(ResourceFailure::operation(StepOp::Delete, error)))
            }
        }
    }

    fn delete_timeout(&self, record: &ResourceRecord) -> Duration {
        self.timeout(
            record.custom_timeouts.as_ref().and_then(|t| t.delete_timeout()),
            self.options.timeouts.delete(),
        )
    }
}

/// Record for a goal with the given checked inputs
fn goal_record(goal: &ResourceGoal, inputs: PropertyMap) -> ResourceRecord {
    let mut record = ResourceRecord::new(goal.urn.clone(), goal.type_token.clone())
        .with_inputs(inputs)
        .with_protect(goal.protect)
        .with_provider(goal.provider.clone());
    record.parent = goal.parent.clone();
    record.dependencies = goal.dependencies.clone();
    record.custom_timeouts = goal.custom_timeouts;
    record
}

fn independent(urn: &Urn) -> ScheduleNode {
    ScheduleNode {
        urn: urn.clone(),
        after: Default::default(),
    }
}

/// Outcome for a node whose prerequisite did not succeed
fn blocked(node: &ScheduleNode, outcomes: &HashMap<Urn, ResourceOutcome>) -> Option<ResourceOutcome> {
    node.after.iter().find_map(|dep| match outcomes.get(dep)? {
        ResourceOutcome::Applied { .. } => None,
        ResourceOutcome::Cancelled => Some(ResourceOutcome::Cancelled),
        ResourceOutcome::Skipped { blocked_by } => Some(ResourceOutcome::Skipped {
            blocked_by: blocked_by.clone(),
        }),
        ResourceOutcome::Failed { .. } => Some(ResourceOutcome::Skipped {
            blocked_by: dep.clone(),
        }),
    })
}

/// Computed values never reach a finalized snapshot
fn strip_unknowns(urn: &Urn, mut outputs: PropertyMap) -> PropertyMap {
    let unknown: Vec<String> = outputs
        .iter()
        .filter(|(_, v)| v.contains_unknowns())
        .map(|(k, _)| k.clone())
        .collect();
    for key in unknown {
        tracing::warn!("{}: dropping unresolved output '{}'", urn, key);
        outputs.remove(&key);
    }
    outputs
}
