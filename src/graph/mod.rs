//! The unified artifact graph of one package
//!
//! Nodes are keyed by digest and edges are stored as digest strings, so the
//! graph has no back pointers to maintain and serializes directly. A [Graph]
//! is built once per command and never mutated afterwards; deleting versions
//! invalidates it, and the next command builds a fresh one.

mod analyze;
mod builder;
mod plan;

pub use analyze::Partition;
pub use builder::{GraphBuilder, Scope, DEFAULT_FAN_OUT};
pub use plan::{DeletionPlan, DeletionReport, PlanStep, SharedNode, StepOutcome, StepReport};

use crate::{
    classify::{Classification, Role, RoleSet},
    manifest::Platform,
    versions::Version,
};
use std::collections::{BTreeMap, BTreeSet};

/// A classified vertex: one package version plus what its manifest says
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    pub version: Version,
    pub roles: RoleSet,
    pub platform: Option<Platform>,
    pub media_type: Option<String>,
    /// Digests this manifest references, including ones absent from the graph
    pub outgoing: BTreeSet<String>,
    /// Digests of nodes in the graph that reference this one
    pub incoming: BTreeSet<String>,
}

impl Node {
    /// A node for a manifest that was fetched and classified
    pub fn new(
        version: Version,
        classification: Classification,
        media_type: Option<String>,
        outgoing: BTreeSet<String>,
    ) -> Self {
        Node {
            version,
            roles: classification.roles,
            platform: classification.platform,
            media_type,
            outgoing,
            incoming: BTreeSet::new(),
        }
    }

    /// A listed version whose manifest the registry does not have
    pub fn missing(version: Version) -> Self {
        Node {
            version,
            roles: RoleSet::single(Role::Unknown),
            platform: None,
            media_type: None,
            outgoing: BTreeSet::new(),
            incoming: BTreeSet::new(),
        }
    }

    pub fn digest(&self) -> &str {
        &self.version.digest
    }

    pub fn id(&self) -> Option<i64> {
        self.version.id
    }

    pub fn tags(&self) -> &[String] {
        &self.version.tags
    }

    pub fn is_index(&self) -> bool {
        self.roles.is_index()
    }

    pub fn is_referrer(&self) -> bool {
        self.roles.is_referrer()
    }
}

/// Mapping from digest to [Node] over a single package, plus its roots
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
    roots: BTreeSet<String>,
    membership: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    /// Assemble a graph from nodes whose `outgoing` sets are filled in
    ///
    /// Any `incoming` sets on the input are discarded and recomputed by
    /// inverting `outgoing`, restricted to digests present in the graph.
    /// Roots and image membership are computed here too.
    pub fn from_nodes<I: IntoIterator<Item = Node>>(nodes: I) -> Self {
        let mut nodes: BTreeMap<String, Node> = nodes
            .into_iter()
            .map(|mut node| {
                node.incoming.clear();
                (node.digest().to_owned(), node)
            })
            .collect();

        let edges: Vec<(String, String)> = nodes
            .values()
            .flat_map(|node| {
                node.outgoing
                    .iter()
                    .map(move |target| (node.digest().to_owned(), target.clone()))
            })
            .collect();
        for (source, target) in edges {
            if source == target {
                continue;
            }
            if let Some(node) = nodes.get_mut(&target) {
                node.incoming.insert(source);
            }
        }

        let mut graph = Graph {
            nodes,
            roots: BTreeSet::new(),
            membership: BTreeMap::new(),
        };
        graph.roots = graph.compute_roots();
        graph.membership = graph.compute_membership();
        graph
    }

    pub fn get(&self, digest: &str) -> Option<&Node> {
        self.nodes.get(digest)
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.nodes.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, ordered by digest
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Root digests, ordered
    pub fn roots(&self) -> &BTreeSet<String> {
        &self.roots
    }

    /// Find the node a management version ID belongs to
    pub fn by_id(&self, id: i64) -> Option<&Node> {
        self.nodes.values().find(|node| node.id() == Some(id))
    }

    /// Find the node currently carrying a tag
    pub fn by_tag(&self, tag: &str) -> Option<&Node> {
        self.nodes
            .values()
            .find(|node| node.tags().iter().any(|t| t == tag))
    }

    /// Outgoing edges of a node that land on nodes in this graph
    pub fn outgoing_in_graph<'a>(&'a self, digest: &str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .get(digest)
            .into_iter()
            .flat_map(move |node| node.outgoing.iter().filter_map(move |d| self.nodes.get(d)))
    }

    /// Nodes in this graph that reference the given node
    pub fn incoming_nodes<'a>(&'a self, digest: &str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .get(digest)
            .into_iter()
            .flat_map(move |node| node.incoming.iter().filter_map(move |d| self.nodes.get(d)))
    }
}
