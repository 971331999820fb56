//! Desired state of a resource

use fleetform_resource::{PropertyMap, PropertyPath, Urn};
use fleetform_state::{CustomTimeouts, ProviderReference};
use std::collections::BTreeSet;

/// What the program declares a resource should look like
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceGoal {
    pub urn: Urn,
    pub type_token: String,
    pub provider: ProviderReference,
    pub inputs: PropertyMap,
    pub parent: Option<Urn>,
    pub dependencies: BTreeSet<Urn>,
    pub protect: bool,

    /// Paths that keep their recorded values through Check, Diff and Update
    pub ignore_changes: Vec<PropertyPath>,

    pub custom_timeouts: Option<CustomTimeouts>,
}

impl ResourceGoal {
    /// Goal managed by the default provider of the URN's type package
    pub fn new(urn: Urn) -> Self {
        let type_token = urn.type_token().to_string();
        Self {
            provider: ProviderReference::default_for_type(&type_token),
            urn,
            type_token,
            inputs: PropertyMap::new(),
            parent: None,
            dependencies: BTreeSet::new(),
            protect: false,
            ignore_changes: Vec::new(),
            custom_timeouts: None,
        }
    }

    pub fn with_inputs(mut self, inputs: PropertyMap) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_provider(mut self, provider: ProviderReference) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_parent(mut self, parent: Urn) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_dependency(mut self, dependency: Urn) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    pub fn with_protect(mut self, protect: bool) -> Self {
        self.protect = protect;
        self
    }

    pub fn with_ignore_changes(mut self, paths: Vec<PropertyPath>) -> Self {
        self.ignore_changes = paths;
        self
    }

    pub fn with_custom_timeouts(mut self, timeouts: CustomTimeouts) -> Self {
        self.custom_timeouts = Some(timeouts);
        self
    }

    /// Logical name, the last URN segment
    pub fn name(&self) -> &str {
        self.urn.name()
    }

    /// Parent and dependencies
    pub fn references(&self) -> impl Iterator<Item = &Urn> {
        self.parent.iter().chain(self.dependencies.iter())
    }
}
