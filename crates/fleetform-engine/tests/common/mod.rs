#![allow(dead_code)]

use async_trait::async_trait;
use fleetform_engine::{Deployment, DeploymentOptions, ResourceGoal};
use fleetform_provider::{
    CheckFailure, CheckRequest, CheckResponse, ConfigureRequest, CreateRequest, CreateResponse,
    DeleteRequest, DiffRequest, DiffResponse, Provider, ProviderError, ProviderRegistry,
    ReadRequest, ReadResponse, Result, TracingHost, UpdateRequest, UpdateResponse,
};
use fleetform_resource::{PropertyMap, PropertyValue, Urn, diff_with_ignore_changes};
use fleetform_state::{Snapshot, SnapshotPersister};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const PACKAGE: &str = "test";
pub const TYPE: &str = "test:index:Thing";

pub fn urn(name: &str) -> Urn {
    Urn::new("dev", "proj", None, TYPE, name)
}

pub fn goal(name: &str) -> ResourceGoal {
    ResourceGoal::new(urn(name)).with_inputs(PropertyMap::new().with("name", name))
}

/// A provider call, as seen by the scripted provider
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Configure,
    Check(String),
    Diff(String),
    Create { name: String, preview: bool },
    Read(String),
    Update { name: String, preview: bool },
    Delete(String),
}

/// How the scripted provider answers calls for one resource name
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub check_failures: Vec<CheckFailure>,
    pub create_error: Option<ProviderError>,
    pub update_error: Option<ProviderError>,
    pub delete_error: Option<ProviderError>,
    pub read_error: Option<ProviderError>,
    /// Read reports the resource as gone
    pub gone: bool,
    /// Calls sleep this long before answering
    pub delay: Option<Duration>,
    /// Cancel the script's token when Create starts
    pub cancel_on_create: bool,
    /// Changes to these keys force replacement
    pub replace_on_changes: BTreeSet<String>,
    /// Diff asks for the old resource to go before the new one is created
    pub delete_before_replace: bool,
    /// Check rejects these keys unless they hold a positive number
    pub positive: BTreeSet<String>,
}

#[derive(Default)]
pub struct Script {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, name: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(name.to_string(), behavior);
    }

    pub fn clear(&self, name: &str) {
        self.behaviors.lock().unwrap().remove(name);
    }

    pub fn set_cancel_token(&self, token: CancellationToken) {
        *self.cancel.lock().unwrap() = Some(token);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn behavior(&self, name: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn enter(&self, behavior: &Behavior) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = behavior.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Provider whose answers come from a [`Script`]
pub struct ScriptedProvider {
    script: Arc<Script>,
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        PACKAGE
    }

    fn version(&self) -> &str {
        "1.2.3"
    }

    async fn configure(&self, _request: ConfigureRequest) -> Result<()> {
        self.script.record(Call::Configure);
        Ok(())
    }

    async fn check(&self, request: CheckRequest) -> Result<CheckResponse> {
        self.script.record(Call::Check(request.name.clone()));
        let behavior = self.script.behavior(&request.name);
        let mut failures = behavior.check_failures;
        for key in &behavior.positive {
            if !request
                .news
                .get(key)
                .and_then(PropertyValue::as_f64)
                .is_some_and(|n| n > 0.0)
            {
                failures.push(CheckFailure::new(key.clone(), "must be a positive number"));
            }
        }
        Ok(CheckResponse {
            inputs: request.news,
            failures,
        })
    }

    async fn diff(&self, request: DiffRequest) -> Result<DiffResponse> {
        self.script.record(Call::Diff(request.name.clone()));
        let behavior = self.script.behavior(&request.name);
        let diff = diff_with_ignore_changes(
            &request.olds,
            &request.news,
            &request.ignore_changes,
            &behavior.replace_on_changes,
        )
        .map_err(|e| ProviderError::Operation(e.to_string()))?;
        let mut response: DiffResponse = diff.into();
        response.delete_before_replace = behavior.delete_before_replace;
        Ok(response)
    }

    async fn create(&self, request: CreateRequest) -> Result<CreateResponse> {
        self.script.record(Call::Create {
            name: request.name.clone(),
            preview: request.preview,
        });
        let behavior = self.script.behavior(&request.name);
        if behavior.cancel_on_create
            && let Some(token) = self.script.cancel.lock().unwrap().as_ref()
        {
            token.cancel();
        }
        self.script.enter(&behavior).await;
        self.script.leave();
        if let Some(error) = behavior.create_error {
            return Err(error);
        }

        // Echo inputs without their secret markers
        let mut properties = PropertyMap::new();
        for (key, value) in request.properties.iter() {
            properties.insert(key.clone(), value.clone().declassify());
        }
        if request.preview {
            // Only the provider-assigned ARN is unknown before apply
            properties.insert("arn", PropertyValue::Computed);
            return Ok(CreateResponse {
                id: None,
                properties,
            });
        }
        properties.insert("arn", format!("arn:test:{}", request.name));
        Ok(CreateResponse {
            id: Some(format!("id-{}", request.name)),
            properties,
        })
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResponse> {
        self.script.record(Call::Read(request.name.clone()));
        let behavior = self.script.behavior(&request.name);
        if let Some(error) = behavior.read_error {
            return Err(error);
        }
        if behavior.gone {
            return Ok(ReadResponse::gone());
        }
        let mut properties = request.properties.clone();
        properties.insert("observed", true);
        Ok(ReadResponse {
            id: format!("id-{}", request.name),
            properties,
            inputs: request.inputs,
        })
    }

    async fn update(&self, request: UpdateRequest) -> Result<UpdateResponse> {
        self.script.record(Call::Update {
            name: request.name.clone(),
            preview: request.preview,
        });
        let behavior = self.script.behavior(&request.name);
        self.script.enter(&behavior).await;
        self.script.leave();
        if let Some(error) = behavior.update_error {
            return Err(error);
        }
        let mut properties = request.news.clone();
        properties.insert("arn", format!("arn:test:{}", request.name));
        Ok(UpdateResponse { properties })
    }

    async fn delete(&self, request: DeleteRequest) -> Result<()> {
        self.script.record(Call::Delete(request.name.clone()));
        let behavior = self.script.behavior(&request.name);
        self.script.enter(&behavior).await;
        self.script.leave();
        match behavior.delete_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Keeps every persisted snapshot
#[derive(Default)]
pub struct MemoryPersister {
    saved: Mutex<Vec<Snapshot>>,
}

impl MemoryPersister {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Snapshot> {
        self.saved.lock().unwrap().last().cloned()
    }

    pub fn history(&self) -> Vec<Snapshot> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotPersister for MemoryPersister {
    async fn persist(&self, snapshot: &Snapshot) -> fleetform_state::Result<()> {
        self.saved.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

/// Registry with the scripted provider under [`PACKAGE`]
pub fn registry(script: &Arc<Script>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new(Arc::new(TracingHost));
    let script = script.clone();
    registry.register(PACKAGE, move |_host| {
        Arc::new(ScriptedProvider {
            script: script.clone(),
        }) as Arc<dyn Provider>
    });
    Arc::new(registry)
}

pub struct Harness {
    pub script: Arc<Script>,
    pub persister: Arc<MemoryPersister>,
    pub deployment: Deployment,
}

impl Harness {
    pub fn new(snapshot: Snapshot) -> Self {
        Self::with_options(snapshot, DeploymentOptions::default())
    }

    pub fn with_options(snapshot: Snapshot, options: DeploymentOptions) -> Self {
        let script = Script::new();
        let persister = MemoryPersister::new();
        let deployment = Deployment::new(registry(&script), snapshot, persister.clone(), options);
        Self {
            script,
            persister,
            deployment,
        }
    }

    /// Fresh deployment over the current snapshot, keeping the script
    pub async fn next_run(self) -> Self {
        self.next_run_with(|_| {}).await
    }

    /// Like [`Harness::next_run`], after an operator edit of the snapshot
    pub async fn next_run_with(self, edit: impl FnOnce(&mut Snapshot)) -> Self {
        let mut snapshot = self.deployment.snapshot().await;
        edit(&mut snapshot);
        let deployment = Deployment::new(
            registry(&self.script),
            snapshot,
            self.persister.clone(),
            DeploymentOptions::default(),
        );
        self.script.reset_calls();
        Self {
            script: self.script,
            persister: self.persister,
            deployment,
        }
    }
}
