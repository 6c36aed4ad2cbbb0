//! Ordered, shared-aware deletion
//!
//! A plan removes everything a root owns outright and nothing it shares.
//! Referrers go first so no step leaves a signature pointing at a deleted
//! manifest, then platform manifests, then the index that listed them.

use super::Graph;
use crate::{
    api::PackageApi,
    classify::RoleSet,
    errors::GraphError,
    image::ImageName,
};
use std::{cmp::Reverse, collections::BTreeSet};
use tokio_util::sync::CancellationToken;

/// One version deletion
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanStep {
    pub id: i64,
    pub digest: String,
    pub roles: RoleSet,
    pub tags: Vec<String>,
}

/// A node in the root's closure that another image still needs
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SharedNode {
    pub id: Option<i64>,
    pub digest: String,
    pub roles: RoleSet,
    /// Every root this node belongs to
    pub images: BTreeSet<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeletionPlan {
    pub root: String,
    pub steps: Vec<PlanStep>,
    pub shared: Vec<SharedNode>,
    /// Exclusive nodes with no management ID, which cannot be deleted
    pub skipped: Vec<String>,
}

impl DeletionPlan {
    /// Plan the removal of one root
    ///
    /// Nothing happens here; the plan can be printed for a dry run or passed
    /// to [DeletionPlan::execute]. A root that is not in the graph gets an
    /// empty plan.
    pub fn for_root(graph: &Graph, root: &str) -> Self {
        let mut plan = DeletionPlan {
            root: root.to_owned(),
            ..Default::default()
        };
        if !graph.is_root(root) {
            log::warn!("{} is not a root of this graph, nothing to plan", root);
            return plan;
        }

        let partition = graph.partition(root);

        for digest in &partition.shared {
            if let Some(node) = graph.get(digest) {
                plan.shared.push(SharedNode {
                    id: node.id(),
                    digest: digest.clone(),
                    roles: node.roles.clone(),
                    images: graph.image_of(digest),
                });
            }
        }

        let mut keyed = Vec::new();
        for digest in &partition.exclusive {
            let node = match graph.get(digest) {
                Some(node) => node,
                None => continue,
            };
            let id = match node.id() {
                Some(id) => id,
                None => {
                    log::warn!(
                        "{} has no package version, it cannot be deleted and will be skipped",
                        digest
                    );
                    plan.skipped.push(digest.clone());
                    continue;
                }
            };
            let tier = if node.is_referrer() {
                0
            } else if node.is_index() {
                2
            } else {
                1
            };
            let depth = referrer_depth(graph, digest);
            keyed.push((
                (tier, Reverse(depth), id, digest.clone()),
                PlanStep {
                    id,
                    digest: digest.clone(),
                    roles: node.roles.clone(),
                    tags: node.tags().to_vec(),
                },
            ));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        plan.steps = keyed.into_iter().map(|(_, step)| step).collect();
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Version IDs in execution order
    pub fn ids(&self) -> Vec<i64> {
        self.steps.iter().map(|step| step.id).collect()
    }

    /// Run the plan, one version at a time
    ///
    /// A failed step is recorded and the next step still runs. Cancellation
    /// stops before the next step and abandons the one in flight.
    pub async fn execute(
        &self,
        packages: &dyn PackageApi,
        image: &ImageName,
        cancel: &CancellationToken,
    ) -> DeletionReport {
        let mut report = DeletionReport::default();
        for step in &self.steps {
            if report.cancelled || cancel.is_cancelled() {
                report.cancelled = true;
                report.push(step, StepOutcome::NotAttempted);
                continue;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                result = packages.delete_version(image, step.id) => Some(result),
            };
            let outcome = match result {
                None => {
                    log::warn!("cancelled while deleting version {}", step.id);
                    report.cancelled = true;
                    StepOutcome::NotAttempted
                }
                Some(Ok(())) => {
                    log::info!("deleted version {} ({})", step.id, step.digest);
                    StepOutcome::Deleted
                }
                Some(Err(err)) if err.is_not_found() => {
                    log::warn!("version {} was already gone", step.id);
                    StepOutcome::Deleted
                }
                Some(Err(err)) => {
                    log::error!("failed to delete version {}: {}", step.id, err);
                    StepOutcome::Failed(err.to_string())
                }
            };
            report.push(step, outcome);
        }
        report
    }
}

/// Length of the referrer chain hanging off a node, counting the node
///
/// A signature over an SBOM has depth 2 and the SBOM depth 1, so sorting by
/// depth descending removes the outermost referrer first.
fn referrer_depth(graph: &Graph, digest: &str) -> usize {
    fn walk(graph: &Graph, digest: &str, seen: &mut BTreeSet<String>) -> usize {
        if !matches!(graph.get(digest), Some(node) if node.is_referrer()) {
            return 0;
        }
        if !seen.insert(digest.to_owned()) {
            return 0;
        }
        let below = graph
            .outgoing_in_graph(digest)
            .map(|target| target.digest().to_owned())
            .collect::<Vec<_>>()
            .into_iter()
            .map(|target| walk(graph, &target, seen))
            .max()
            .unwrap_or(0);
        seen.remove(digest);
        below + 1
    }
    walk(graph, digest, &mut BTreeSet::new())
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    Deleted,
    Failed(String),
    NotAttempted,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepReport {
    pub step: PlanStep,
    pub outcome: StepOutcome,
}

/// What happened to each step of an executed plan
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeletionReport {
    pub steps: Vec<StepReport>,
    pub cancelled: bool,
}

impl DeletionReport {
    fn push(&mut self, step: &PlanStep, outcome: StepOutcome) {
        self.steps.push(StepReport {
            step: step.clone(),
            outcome,
        });
    }

    pub fn deleted(&self) -> usize {
        self.count(|outcome| *outcome == StepOutcome::Deleted)
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, StepOutcome::Failed(_)))
    }

    fn count<F: Fn(&StepOutcome) -> bool>(&self, f: F) -> usize {
        self.steps.iter().filter(|report| f(&report.outcome)).count()
    }

    /// Turn the report into the overall outcome of the command
    pub fn result(&self) -> Result<(), GraphError> {
        if self.cancelled {
            Err(GraphError::Cancelled(None))
        } else if self.failed() > 0 {
            Err(GraphError::Partial {
                failed: self.failed(),
                total: self.steps.len(),
                report: self.clone(),
            })
        } else {
            Ok(())
        }
    }
}
