//! fleetform provider protocol
//!
//! Providers are plugins that perform create/read/update/delete operations on
//! externally-provisioned resources. This crate defines the protocol contract
//! every provider honors, and the engine-side plumbing around it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               fleetform-engine                   │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ProviderRegistry::get_or_configure
//! ┌─────────────────▼───────────────────────────────┐
//! │               fleetform-provider                 │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  ProviderHandle (ordering, timeouts,     │   │
//! │  │  transport poisoning)                    │   │
//! │  └──────────────────┬───────────────────────┘   │
//! │  ┌──────────────────▼───────────────────────┐   │
//! │  │  trait Provider { check, diff, create,   │   │
//! │  │    read, update, delete, configure }     │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! The transport that carries calls to a provider process lives outside this
//! crate; it implements [`Provider`] and reports failures as
//! [`ProviderError::Transport`].

pub mod error;
pub mod handle;
pub mod host;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod types;

// Re-exports
pub use error::{ProviderError, Result};
pub use handle::ProviderHandle;
pub use host::{Host, LogMessage, LogSeverity, TracingHost};
pub use provider::Provider;
pub use registry::{ProviderKey, ProviderRegistry};
pub use types::{
    CheckFailure, CheckRequest, CheckResponse, ConfigureRequest, CreateRequest, CreateResponse,
    DeleteRequest, DiffRequest, DiffResponse, ReadRequest, ReadResponse, UpdateRequest,
    UpdateResponse,
};
