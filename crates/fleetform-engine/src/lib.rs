//! fleetform deployment engine
//!
//! Walks a resource dependency graph and drives each resource through the
//! provider lifecycle, recording every outcome in the stack snapshot.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │        goals (ResourceGoal) + Snapshot          │
//! └─────────────────┬───────────────────────────────┘
//!                   │ DependencyGraph::build
//! ┌─────────────────▼───────────────────────────────┐
//! │               Deployment                         │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  scheduler (parallelism, barriers,       │   │
//! │  │  cancellation)                           │   │
//! │  └──────────────────┬───────────────────────┘   │
//! │  ┌──────────────────▼───────────────────────┐   │
//! │  │  Check → Diff → Create/Update/Replace    │   │
//! │  │  Delete, Read (refresh, pending)         │   │
//! │  └──────────────────────────────────────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼────────┐ ┌──────▼──────────────┐
//! │ProviderRegistry│ │ SnapshotPersister   │
//! └────────────────┘ └─────────────────────┘
//! ```
//!
//! A failure is scoped to its resource: dependents are skipped and reported,
//! unrelated resources continue. Only snapshot persistence errors and an
//! invalid graph abort the whole deployment.

pub mod deployment;
pub mod error;
pub mod goal;
pub mod graph;
pub mod plan;

// Re-exports
pub use deployment::{Deployment, DeploymentOptions};
pub use error::{EngineError, ResourceFailure, Result};
pub use goal::ResourceGoal;
pub use graph::{DependencyGraph, ScheduleNode};
pub use plan::{DeploymentResult, PlanSummary, ResourceOutcome, StepOp, StepResult};
