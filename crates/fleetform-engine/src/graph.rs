//! Resource dependency graph
//!
//! Built from the goals of a deployment plus the prior snapshot. Goals may
//! reference each other or records that only exist in the snapshot; the
//! latter are kept alive ("retained") for as long as a goal needs them.

use crate::error::{EngineError, Result};
use crate::goal::ResourceGoal;
use fleetform_resource::Urn;
use fleetform_state::Snapshot;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A unit of scheduled work and the URNs that must finish first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleNode {
    pub urn: Urn,
    pub after: BTreeSet<Urn>,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Goal URNs, dependencies first
    order: Vec<Urn>,

    /// Goal-to-goal edges
    dependencies: HashMap<Urn, BTreeSet<Urn>>,

    /// Snapshot records that goals still reference
    retained: BTreeSet<Urn>,
}

impl DependencyGraph {
    pub fn build(goals: &[ResourceGoal], snapshot: &Snapshot) -> Result<Self> {
        let mut seen = HashSet::new();
        for goal in goals {
            if !seen.insert(&goal.urn) {
                return Err(EngineError::DuplicateGoal(goal.urn.clone()));
            }
        }

        let mut dependencies: HashMap<Urn, BTreeSet<Urn>> = HashMap::new();
        let mut retained = BTreeSet::new();
        for goal in goals {
            let mut edges = BTreeSet::new();
            for reference in goal.references() {
                if seen.contains(reference) {
                    edges.insert(reference.clone());
                } else if snapshot.contains(reference) {
                    retain(snapshot, reference, &seen, &mut retained);
                } else {
                    return Err(EngineError::UnknownDependency {
                        urn: goal.urn.clone(),
                        dependency: reference.clone(),
                    });
                }
            }
            dependencies.insert(goal.urn.clone(), edges);
        }

        let order = topological_order(goals, &dependencies)?;
        Ok(Self {
            order,
            dependencies,
            retained,
        })
    }

    pub fn order(&self) -> &[Urn] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, urn: &Urn) -> bool {
        self.dependencies.contains_key(urn)
    }

    pub fn dependencies_of(&self, urn: &Urn) -> Option<&BTreeSet<Urn>> {
        self.dependencies.get(urn)
    }

    /// Goals that directly depend on `urn`
    pub fn dependents(&self, urn: &Urn) -> Vec<&Urn> {
        self.order
            .iter()
            .filter(|u| self.dependencies.get(*u).is_some_and(|d| d.contains(urn)))
            .collect()
    }

    pub fn retained(&self) -> &BTreeSet<Urn> {
        &self.retained
    }

    /// Goal steps in dependency order
    pub fn schedule(&self) -> Vec<ScheduleNode> {
        self.order
            .iter()
            .map(|urn| ScheduleNode {
                urn: urn.clone(),
                after: self.dependencies.get(urn).cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// Snapshot records no goal accounts for, dependents first
    pub fn deletions(&self, snapshot: &Snapshot) -> Vec<ScheduleNode> {
        let doomed: Vec<&Urn> = snapshot
            .resources()
            .iter()
            .map(|r| &r.urn)
            .filter(|u| !self.contains(u) && !self.retained.contains(*u))
            .collect();
        deletion_schedule(snapshot, &doomed)
    }
}

/// Delete `urns` so that every record is deleted after the records that
/// reference it
pub fn deletion_schedule(snapshot: &Snapshot, urns: &[&Urn]) -> Vec<ScheduleNode> {
    let doomed: HashSet<&Urn> = urns.iter().copied().collect();
    snapshot
        .resources()
        .iter()
        .rev()
        .filter(|r| doomed.contains(&r.urn))
        .map(|record| ScheduleNode {
            urn: record.urn.clone(),
            after: snapshot
                .resources()
                .iter()
                .filter(|r| doomed.contains(&r.urn) && r.references_urn(&record.urn))
                .map(|r| r.urn.clone())
                .collect(),
        })
        .collect()
}

fn retain(snapshot: &Snapshot, urn: &Urn, goals: &HashSet<&Urn>, retained: &mut BTreeSet<Urn>) {
    if goals.contains(urn) || !retained.insert(urn.clone()) {
        return;
    }
    if let Some(record) = snapshot.get(urn) {
        for reference in record.references() {
            retain(snapshot, reference, goals, retained);
        }
    }
}

/// Kahn's algorithm, always taking the earliest ready goal
fn topological_order(
    goals: &[ResourceGoal],
    dependencies: &HashMap<Urn, BTreeSet<Urn>>,
) -> Result<Vec<Urn>> {
    let mut pending: Vec<&Urn> = goals.iter().map(|g| &g.urn).collect();
    let mut placed: HashSet<&Urn> = HashSet::new();
    let mut order = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|urn| {
            dependencies
                .get(*urn)
                .is_none_or(|deps| deps.iter().all(|d| placed.contains(d)))
        });
        let Some(index) = ready else {
            return Err(EngineError::Cycle(pending[0].clone()));
        };
        let urn = pending.remove(index);
        placed.insert(urn);
        order.push(urn.clone());
    }
    Ok(order)
}
