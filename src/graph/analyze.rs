//! Roots, image membership, and sharing
//!
//! A root is an artifact a user would think of as "an image": an index, a
//! standalone single-arch manifest, or a referrer whose subject is gone. Every
//! other node belongs to the roots it can climb to. Climbing follows
//! outgoing edges that land in the graph (a referrer toward its subject) and
//! incoming edges from indexes (a platform manifest toward the index that
//! lists it), and stops at the first root along each path.

use super::{Graph, Node};
use std::collections::BTreeSet;

/// How a root's closure splits for deletion
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Partition {
    /// Nodes that belong to this root alone
    pub exclusive: BTreeSet<String>,
    /// Nodes that also belong to some other root
    pub shared: BTreeSet<String>,
}

impl Graph {
    pub(super) fn compute_roots(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .filter(|node| self.qualifies_as_root(node))
            .map(|node| node.digest().to_owned())
            .collect()
    }

    fn qualifies_as_root(&self, node: &Node) -> bool {
        if node.is_index() {
            return true;
        }
        let listed_by_index = self.incoming_nodes(node.digest()).any(Node::is_index);
        if node.is_referrer() {
            // Referrer chains (a signature over an SBOM) do not demote the
            // inner referrer, only an index listing it or a live subject does
            let has_subject = self.outgoing_in_graph(node.digest()).next().is_some();
            return !has_subject && !listed_by_index;
        }
        let lists_index = self.outgoing_in_graph(node.digest()).any(Node::is_index);
        !listed_by_index && !lists_index
    }

    pub(super) fn compute_membership(&self) -> std::collections::BTreeMap<String, BTreeSet<String>> {
        self.nodes
            .keys()
            .map(|digest| (digest.clone(), self.climb(digest)))
            .collect()
    }

    fn climb(&self, start: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        if self.roots.contains(start) {
            found.insert(start.to_owned());
            return found;
        }

        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(digest) = stack.pop() {
            if !seen.insert(digest) {
                continue;
            }
            if digest != start && self.roots.contains(digest) {
                found.insert(digest.to_owned());
                continue;
            }
            stack.extend(self.outgoing_in_graph(digest).map(Node::digest));
            stack.extend(
                self.incoming_nodes(digest)
                    .filter(|parent| parent.is_index())
                    .map(Node::digest),
            );
        }

        if found.is_empty() {
            log::debug!("{} reaches no root, treating it as its own image", start);
            found.insert(start.to_owned());
        }
        found
    }

    pub fn is_root(&self, digest: &str) -> bool {
        self.roots.contains(digest)
    }

    /// The roots a node belongs to
    ///
    /// Empty for digests not in the graph.
    pub fn image_of(&self, digest: &str) -> BTreeSet<String> {
        self.membership.get(digest).cloned().unwrap_or_default()
    }

    pub fn membership_count(&self, digest: &str) -> usize {
        self.membership.get(digest).map(BTreeSet::len).unwrap_or(0)
    }

    /// Does this node belong to more than one image?
    pub fn is_shared(&self, digest: &str) -> bool {
        self.membership_count(digest) > 1
    }

    /// Every node that belongs to the given root, the root included
    pub fn closure(&self, root: &str) -> BTreeSet<String> {
        self.membership
            .iter()
            .filter(|(_, roots)| roots.contains(root))
            .map(|(digest, _)| digest.clone())
            .collect()
    }

    /// Split a root's closure into what it owns outright and what it shares
    pub fn partition(&self, root: &str) -> Partition {
        let (shared, exclusive) = self
            .closure(root)
            .into_iter()
            .partition(|digest| self.is_shared(digest));
        Partition { exclusive, shared }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::classify::Role;

    fn set(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|label| d(label)).collect()
    }

    #[test]
    fn single_arch_with_referrer() {
        let graph = Graph::from_nodes(vec![
            node(Some(1), "a1", &[Role::ManifestPlatform], &[]),
            node(Some(2), "b1", &[Role::Signature], &["a1"]),
        ]);
        assert_eq!(graph.roots(), &set(&["a1"]));
        assert_eq!(graph.image_of(&d("b1")), set(&["a1"]));
        assert_eq!(graph.closure(&d("a1")), set(&["a1", "b1"]));
        assert!(!graph.is_shared(&d("b1")));
    }

    #[test]
    fn multi_arch_with_buildx_attestation() {
        let graph = Graph::from_nodes(vec![
            node(Some(100), "1d", &[Role::Index], &["a3d", "a4e", "a77"]),
            node(Some(200), "a3d", &[Role::ManifestPlatform], &[]),
            node(Some(201), "a4e", &[Role::ManifestPlatform], &[]),
            node(Some(300), "a77", &[Role::Sbom, Role::Provenance], &["a3d"]),
        ]);
        assert_eq!(graph.roots(), &set(&["1d"]));
        for label in ["a3d", "a4e", "a77"] {
            assert_eq!(graph.image_of(&d(label)), set(&["1d"]));
        }
        let partition = graph.partition(&d("1d"));
        assert_eq!(partition.exclusive, set(&["1d", "a3d", "a4e", "a77"]));
        assert!(partition.shared.is_empty());
    }

    #[test]
    fn shared_platform_manifest() {
        let graph = Graph::from_nodes(vec![
            node(Some(1), "e1", &[Role::Index], &["c1"]),
            node(Some(2), "e2", &[Role::Index], &["c1"]),
            node(Some(3), "c1", &[Role::ManifestPlatform], &[]),
        ]);
        assert_eq!(graph.roots(), &set(&["e1", "e2"]));
        assert_eq!(graph.image_of(&d("c1")), set(&["e1", "e2"]));
        assert_eq!(graph.membership_count(&d("c1")), 2);
        let partition = graph.partition(&d("e1"));
        assert_eq!(partition.exclusive, set(&["e1"]));
        assert_eq!(partition.shared, set(&["c1"]));
    }

    #[test]
    fn orphan_referrer_is_its_own_root() {
        let graph = Graph::from_nodes(vec![node(Some(7), "0f", &[Role::Sbom], &["dead"])]);
        assert_eq!(graph.roots(), &set(&["0f"]));
        assert_eq!(graph.image_of(&d("0f")), set(&["0f"]));
    }

    #[test]
    fn referrer_chain_over_orphan() {
        let graph = Graph::from_nodes(vec![
            node(Some(1), "5b", &[Role::Sbom], &["dead"]),
            node(Some(2), "51", &[Role::Signature], &["5b"]),
        ]);
        assert_eq!(graph.roots(), &set(&["5b"]));
        assert_eq!(graph.image_of(&d("51")), set(&["5b"]));
    }

    #[test]
    fn dangling_unknown_is_root() {
        let graph = Graph::from_nodes(vec![node(Some(5), "ff", &[Role::Unknown], &[])]);
        assert!(graph.is_root(&d("ff")));
        assert_eq!(graph.closure(&d("ff")), set(&["ff"]));
    }

    #[test]
    fn every_node_has_an_image() {
        let graph = Graph::from_nodes(vec![
            node(Some(1), "e1", &[Role::Index], &["c1", "c2"]),
            node(Some(2), "e2", &[Role::Index], &["c2"]),
            node(Some(3), "c1", &[Role::ManifestPlatform], &[]),
            node(Some(4), "c2", &[Role::ManifestPlatform], &[]),
            node(Some(5), "51", &[Role::Signature], &["e1"]),
            node(Some(6), "52", &[Role::Sbom], &["c2"]),
            node(None, "53", &[Role::Signature], &["52"]),
        ]);
        for node in graph.nodes() {
            let image = graph.image_of(node.digest());
            assert!(!image.is_empty(), "{} has no image", node.digest());
            assert!(image.is_subset(graph.roots()));
            if graph.is_root(node.digest()) {
                assert_eq!(image.len(), 1);
            }
        }
        assert_eq!(graph.image_of(&d("53")), set(&["e1", "e2"]));
        assert_eq!(graph.image_of(&d("51")), set(&["e1"]));
        assert!(graph.image_of(&d("missing")).is_empty());
    }
}
