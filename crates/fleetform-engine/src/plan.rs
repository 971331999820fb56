//! Step and result types for deployments

use crate::error::ResourceFailure;
use fleetform_resource::Urn;
use serde::{Deserialize, Serialize};

/// Operation performed (or, in preview, planned) for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOp {
    /// No changes needed
    Same,
    Create,
    Update,
    /// Delete the old resource, then create the new one
    Replace,
    Delete,
    /// Live state read back into the snapshot
    Read,
    /// Record dropped without a provider call (gone, or not managed)
    Discard,
}

impl std::fmt::Display for StepOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOp::Same => write!(f, "same"),
            StepOp::Create => write!(f, "create"),
            StepOp::Update => write!(f, "update"),
            StepOp::Replace => write!(f, "replace"),
            StepOp::Delete => write!(f, "delete"),
            StepOp::Read => write!(f, "read"),
            StepOp::Discard => write!(f, "discard"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResourceOutcome {
    Applied { op: StepOp },
    Failed { failure: ResourceFailure },
    /// Not attempted because a resource it depends on did not succeed
    Skipped { blocked_by: Urn },
    /// Not attempted because the deployment was cancelled
    Cancelled,
}

impl ResourceOutcome {
    pub fn applied(op: StepOp) -> Self {
        ResourceOutcome::Applied { op }
    }

    pub fn failed(failure: ResourceFailure) -> Self {
        ResourceOutcome::Failed { failure }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResourceOutcome::Applied { .. })
    }

    pub fn op(&self) -> Option<StepOp> {
        match self {
            ResourceOutcome::Applied { op } => Some(*op),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&ResourceFailure> {
        match self {
            ResourceOutcome::Failed { failure } => Some(failure),
            _ => None,
        }
    }
}

/// Result of a single resource step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub urn: Urn,
    pub outcome: ResourceOutcome,
}

/// Result of a deployment operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    /// Whether this was a dry run
    pub preview: bool,

    /// Pending records reconciled before the run
    pub reconciled: Vec<StepResult>,

    /// One entry per resource the run visited, in dependency order
    pub steps: Vec<StepResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl DeploymentResult {
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.outcome.is_success())
    }

    pub fn outcome(&self, urn: &Urn) -> Option<&ResourceOutcome> {
        self.steps
            .iter()
            .find(|s| &s.urn == urn)
            .map(|s| &s.outcome)
    }

    pub fn failures(&self) -> Vec<(&Urn, &ResourceFailure)> {
        self.steps
            .iter()
            .filter_map(|s| s.outcome.failure().map(|f| (&s.urn, f)))
            .collect()
    }

    /// Steps that applied `op`
    pub fn steps_by_op(&self, op: StepOp) -> Vec<&Urn> {
        self.steps
            .iter()
            .filter(|s| s.outcome.op() == Some(op))
            .map(|s| &s.urn)
            .collect()
    }

    /// Summary of the deployment
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for step in &self.steps {
            match &step.outcome {
                ResourceOutcome::Applied { op } => match op {
                    StepOp::Same => summary.same += 1,
                    StepOp::Create => summary.create += 1,
                    StepOp::Update => summary.update += 1,
                    StepOp::Replace => summary.replace += 1,
                    StepOp::Delete | StepOp::Discard => summary.delete += 1,
                    StepOp::Read => summary.read += 1,
                },
                ResourceOutcome::Failed { .. } => summary.failed += 1,
                ResourceOutcome::Skipped { .. } | ResourceOutcome::Cancelled => {
                    summary.skipped += 1
                }
            }
        }
        summary
    }
}

/// Summary of performed or planned steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub read: usize,
    pub same: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl PlanSummary {
    pub fn has_changes(&self) -> bool {
        self.create + self.update + self.replace + self.delete > 0
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.same
        )?;
        if self.read > 0 {
            write!(f, ", {} refreshed", self.read)?;
        }
        if self.failed > 0 || self.skipped > 0 {
            write!(f, " ({} failed, {} skipped)", self.failed, self.skipped)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urn(name: &str) -> Urn {
        Urn::parse(format!("dev::proj::test:index:Thing::{}", name)).unwrap()
    }

    fn step(name: &str, outcome: ResourceOutcome) -> StepResult {
        StepResult {
            urn: urn(name),
            outcome,
        }
    }

    #[test]
    fn test_summary_counts_and_display() {
        let result = DeploymentResult {
            steps: vec![
                step("a", ResourceOutcome::applied(StepOp::Create)),
                step("b", ResourceOutcome::applied(StepOp::Create)),
                step("c", ResourceOutcome::applied(StepOp::Same)),
                step(
                    "d",
                    ResourceOutcome::failed(ResourceFailure::Protected {
                        op: StepOp::Delete,
                    }),
                ),
                step("e", ResourceOutcome::Skipped { blocked_by: urn("d") }),
            ],
            ..Default::default()
        };

        let summary = result.summary();
        assert_eq!(summary.create, 2);
        assert_eq!(summary.same, 1);
        assert!(summary.has_changes());
        assert_eq!(
            summary.to_string(),
            "2 to create, 0 to update, 0 to replace, 0 to delete, 1 unchanged (1 failed, 1 skipped)"
        );
        assert!(!result.is_success());
        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.steps_by_op(StepOp::Create).len(), 2);
    }

    #[test]
    fn test_failure_messages() {
        let failure = ResourceFailure::Protected { op: StepOp::Replace };
        assert_eq!(failure.to_string(), "resource is protected and cannot be replaced");

        let failure = ResourceFailure::Validation {
            failures: vec![fleetform_provider::CheckFailure::new("size", "must be positive")],
        };
        assert_eq!(failure.to_string(), "validation failed: size: must be positive");
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(ResourceOutcome::applied(StepOp::Update)).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "applied", "op": "update"}));

        let json = serde_json::to_value(ResourceOutcome::failed(ResourceFailure::Indeterminate {
            message: "lost".to_string(),
        }))
        .unwrap();
        assert_eq!(json["failure"]["kind"], "indeterminate");
    }
}
