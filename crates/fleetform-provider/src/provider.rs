//! Provider trait definition

use crate::error::Result;
use crate::types::{
    CheckRequest, CheckResponse, ConfigureRequest, CreateRequest, CreateResponse, DeleteRequest,
    DiffRequest, DiffResponse, ReadRequest, ReadResponse, UpdateRequest, UpdateResponse,
};
use async_trait::async_trait;
use fleetform_resource::diff_with_ignore_changes;
use std::collections::BTreeSet;

/// Resource provider abstraction trait
///
/// Every provider kind (cloud APIs, DNS, local test doubles, remote plugin
/// processes behind a transport) implements this trait. Operations are not
/// transactional: a failed Create must leave nothing behind, a failed Delete
/// means the resource still exists, and a failed Update reports whether it
/// rolled back through [`crate::ProviderError::UpdateFailed`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider package name (e.g., "sakura-cloud")
    fn name(&self) -> &str;

    /// Returns the provider plugin version recorded in checkpoints
    fn version(&self) -> &str;

    /// Validate provider configuration
    async fn check_config(&self, request: CheckRequest) -> Result<CheckResponse> {
        Ok(CheckResponse::ok(request.news))
    }

    /// Impact of a configuration change on this provider
    async fn diff_config(&self, request: DiffRequest) -> Result<DiffResponse> {
        let diff = diff_with_ignore_changes(
            &request.olds,
            &request.news,
            &request.ignore_changes,
            &BTreeSet::new(),
        )
        .map_err(|e| crate::ProviderError::Operation(e.to_string()))?;
        Ok(diff.into())
    }

    /// Configure the provider with its global settings
    async fn configure(&self, request: ConfigureRequest) -> Result<()>;

    /// Validate resource inputs and return the inputs for Diff/Create/Update
    async fn check(&self, request: CheckRequest) -> Result<CheckResponse>;

    /// Classify the impact of an input change
    async fn diff(&self, request: DiffRequest) -> Result<DiffResponse>;

    /// Allocate a new resource
    async fn create(&self, request: CreateRequest) -> Result<CreateResponse>;

    /// Read the live state of a resource
    async fn read(&self, request: ReadRequest) -> Result<ReadResponse>;

    /// Update an existing resource in place
    async fn update(&self, request: UpdateRequest) -> Result<UpdateResponse>;

    /// Tear down a resource
    async fn delete(&self, request: DeleteRequest) -> Result<()>;
}
