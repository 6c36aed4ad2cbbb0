mod common;

use common::*;
use ghcrctl::{
    attestation,
    graph::{GraphBuilder, Scope},
    image::ContentDigest,
    tagger::{add_tag, resolve_target, TagOutcome},
    DeletionPlan, Graph, GraphError, Role, RoleSet, Tag,
};
use serde_json::json;
use std::{collections::BTreeSet, sync::Arc};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

async fn build(fake: &FakeGhcr, scope: Scope) -> Result<Graph, GraphError> {
    GraphBuilder::new(Arc::new(fake.clone()), Arc::new(fake.clone()))
        .build(&image(), &scope)
        .await
}

async fn build_full(fake: &FakeGhcr) -> Graph {
    build(fake, Scope::Full).await.unwrap()
}

struct Buildx {
    index: String,
    amd: String,
    arm: String,
    att: String,
}

fn push_buildx(fake: &FakeGhcr) -> Buildx {
    let amd = fake.push(200, &platform_manifest("amd"), &[]);
    let arm = fake.push(201, &platform_manifest("arm"), &[]);
    let sbom = fake.store_blob(&json!({ "spdxVersion": "SPDX-2.3", "name": "app" }));
    let provenance = fake.store_blob(&json!({ "buildType": "https://mobyproject.org/buildkit" }));
    let att = fake.push(300, &buildx_attestation(&sbom, &provenance), &[]);
    let index = fake.push(
        100,
        &index(vec![
            entry(&amd, Some(("linux", "amd64"))),
            entry(&arm, Some(("linux", "arm64"))),
            attestation_entry(&att, &amd),
        ]),
        &["latest"],
    );
    Buildx {
        index,
        amd,
        arm,
        att,
    }
}

fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort();
    ids
}

fn check_invariants(graph: &Graph) {
    for node in graph.nodes() {
        assert!(!node.roles.is_empty(), "{} has no roles", node.digest());
        for target in &node.outgoing {
            if let Some(target) = graph.get(target) {
                assert!(target.incoming.contains(node.digest()));
            }
        }
        if node.roles.contains(Role::Index) {
            assert!(!node.outgoing.is_empty());
        }
        assert!(graph.membership_count(node.digest()) >= 1);
    }
    if !graph.is_empty() {
        assert!(!graph.roots().is_empty());
    }
    for root in graph.roots() {
        let partition = graph.partition(root);
        assert!(partition.exclusive.is_disjoint(&partition.shared));
        let union: BTreeSet<String> = partition
            .exclusive
            .union(&partition.shared)
            .cloned()
            .collect();
        assert_eq!(union, graph.closure(root));
        for digest in &partition.exclusive {
            assert_eq!(graph.membership_count(digest), 1);
        }
        for digest in &partition.shared {
            assert!(graph.membership_count(digest) > 1);
        }
    }
}

#[test]
fn single_arch_image() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let aa = fake.push(10, &platform_manifest("aa"), &["latest"]);
        let graph = build_full(&fake).await;

        assert_eq!(graph.len(), 1);
        let node = graph.get(&aa).unwrap();
        assert_eq!(node.roles, RoleSet::single(Role::ManifestPlatform));
        assert!(graph.is_root(&aa));
        assert_eq!(graph.image_of(&aa), BTreeSet::from([aa.clone()]));

        let plan = DeletionPlan::for_root(&graph, &aa);
        assert_eq!(plan.ids(), vec![10]);
        assert!(plan.shared.is_empty());
        check_invariants(&graph);
    })
}

#[test]
fn multi_arch_with_buildx_attestations() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let b = push_buildx(&fake);
        let graph = build_full(&fake).await;

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.roots(), &BTreeSet::from([b.index.clone()]));

        let att = graph.get(&b.att).unwrap();
        assert!(att.roles.contains(Role::Sbom));
        assert!(att.roles.contains(Role::Provenance));
        assert!(att.outgoing.contains(&b.amd));
        assert!(graph.get(&b.amd).unwrap().incoming.contains(&b.att));
        assert_eq!(
            graph.get(&b.arm).unwrap().platform.as_ref().unwrap().architecture,
            "arm64"
        );

        let plan = DeletionPlan::for_root(&graph, &b.index);
        assert_eq!(plan.ids(), vec![300, 200, 201, 100]);
        assert!(plan.shared.is_empty());
        check_invariants(&graph);
    })
}

#[test]
fn shared_platform_between_indexes() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let sh = fake.push(3, &platform_manifest("sh"), &[]);
        let mut first = index(vec![entry(&sh, Some(("linux", "amd64")))]);
        first["annotations"] = json!({ "org.opencontainers.image.version": "1" });
        let mut second = index(vec![entry(&sh, Some(("linux", "amd64")))]);
        second["annotations"] = json!({ "org.opencontainers.image.version": "2" });
        let one = fake.push(1, &first, &["v1"]);
        let two = fake.push(2, &second, &["v2"]);

        let graph = build_full(&fake).await;
        check_invariants(&graph);
        assert!(graph.is_shared(&sh));
        let plan = DeletionPlan::for_root(&graph, &one);
        assert_eq!(plan.ids(), vec![1]);
        assert_eq!(plan.shared.len(), 1);
        assert_eq!(plan.shared[0].id, Some(3));

        let report = plan
            .execute(&fake, &image(), &CancellationToken::new())
            .await;
        assert!(report.result().is_ok());
        assert_eq!(fake.version_ids(), vec![2, 3]);

        let graph = build_full(&fake).await;
        assert!(!graph.is_shared(&sh));
        let plan = DeletionPlan::for_root(&graph, &two);
        assert_eq!(sorted(plan.ids()), vec![2, 3]);
        assert!(plan.shared.is_empty());
    })
}

#[test]
fn orphan_attestation_is_a_root() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let gone = ContentDigest::from_content(b"deleted long ago");
        let layer = fake.store_blob(&json!({ "spdxVersion": "SPDX-2.3" }));
        let sbom = fake.push(40, &sbom_referrer(gone.as_str(), &layer), &[]);

        let graph = build_full(&fake).await;
        assert_eq!(graph.len(), 1);
        let node = graph.get(&sbom).unwrap();
        assert_eq!(node.roles, RoleSet::single(Role::Sbom));
        assert!(node.incoming.is_empty());
        assert_eq!(graph.outgoing_in_graph(&sbom).count(), 0);
        assert!(graph.is_root(&sbom));
        assert_eq!(DeletionPlan::for_root(&graph, &sbom).ids(), vec![40]);
        check_invariants(&graph);
    })
}

#[test]
fn listed_version_missing_from_registry() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let zz = ContentDigest::from_content(b"zz").as_str().to_owned();
        fake.list(7, &zz, &[]);

        let graph = build_full(&fake).await;
        let node = graph.get(&zz).unwrap();
        assert_eq!(node.roles, RoleSet::single(Role::Unknown));
        assert!(node.outgoing.is_empty());
        assert!(graph.is_root(&zz));
        assert_eq!(DeletionPlan::for_root(&graph, &zz).ids(), vec![7]);
    })
}

#[test]
fn tag_add_keeps_existing_tags() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let aa = fake.push(10, &platform_manifest("aa"), &["v1"]);
        let digest = ContentDigest::parse(&aa).unwrap();
        let v1 = Tag::parse("v1").unwrap();
        let v2 = Tag::parse("v2").unwrap();

        let outcome = add_tag(&fake, &image(), &digest, &v2, false).await.unwrap();
        assert_eq!(outcome, TagOutcome::Created);
        assert_eq!(resolve_target(&fake, &image(), "v2").await.unwrap(), digest);
        assert_eq!(resolve_target(&fake, &image(), "v1").await.unwrap(), digest);
        assert_eq!(fake.tags_of(&aa), vec!["v1", "v2"]);

        let again = add_tag(&fake, &image(), &digest, &v1, false).await.unwrap();
        assert_eq!(again, TagOutcome::Unchanged);

        let graph = build_full(&fake).await;
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.by_tag("v2").unwrap().id(), Some(10));
    })
}

#[test]
fn tag_conflict_needs_force() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let aa = fake.push(10, &platform_manifest("aa"), &["v1"]);
        let bb = fake.push(11, &platform_manifest("bb"), &["stable"]);
        let digest = ContentDigest::parse(&aa).unwrap();
        let stable = Tag::parse("stable").unwrap();

        let err = add_tag(&fake, &image(), &digest, &stable, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Conflict { .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(fake.tags_of(&bb), vec!["stable"]);

        let moved = add_tag(&fake, &image(), &digest, &stable, true).await.unwrap();
        assert_eq!(moved, TagOutcome::Moved { from: bb.clone() });
        assert!(fake.tags_of(&bb).is_empty());
        assert_eq!(fake.tags_of(&aa), vec!["stable", "v1"]);
    })
}

#[test]
fn building_twice_is_identical() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        push_buildx(&fake);
        fake.push(10, &platform_manifest("aa"), &["old"]);
        let first = build_full(&fake).await;
        let second = GraphBuilder::new(Arc::new(fake.clone()), Arc::new(fake.clone()))
            .fan_out(1)
            .build(&image(), &Scope::Full)
            .await
            .unwrap();
        assert_eq!(first, second);
    })
}

#[test]
fn replanning_after_delete_is_empty() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let b = push_buildx(&fake);
        let keep = fake.push(10, &platform_manifest("aa"), &["old"]);

        let graph = build_full(&fake).await;
        let report = DeletionPlan::for_root(&graph, &b.index)
            .execute(&fake, &image(), &CancellationToken::new())
            .await;
        assert_eq!(report.deleted(), 4);
        assert_eq!(fake.version_ids(), vec![10]);

        let graph = build_full(&fake).await;
        assert_eq!(graph.roots(), &BTreeSet::from([keep]));
        let plan = DeletionPlan::for_root(&graph, &b.index);
        assert!(plan.is_empty());
        assert!(plan.shared.is_empty());
    })
}

#[test]
fn partial_failure_keeps_going() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let b = push_buildx(&fake);
        fake.fail_delete(200);

        let graph = build_full(&fake).await;
        let report = DeletionPlan::for_root(&graph, &b.index)
            .execute(&fake, &image(), &CancellationToken::new())
            .await;
        assert_eq!(report.deleted(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(fake.version_ids(), vec![200]);
        let err = report.result().unwrap_err();
        assert!(matches!(err, GraphError::Partial { failed: 1, total: 4, .. }));
        assert_eq!(err.exit_code(), 4);
    })
}

#[test]
fn scoped_build_follows_one_tag() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let b = push_buildx(&fake);
        let other = fake.push(10, &platform_manifest("aa"), &["old"]);

        let graph = build(&fake, Scope::Tag(Tag::latest())).await.unwrap();
        assert_eq!(graph.len(), 4);
        assert!(graph.contains(&b.att));
        assert!(!graph.contains(&other));
        assert_eq!(graph.by_tag("latest").unwrap().id(), Some(100));

        let graph = build(&fake, Scope::Digest(ContentDigest::parse(&b.amd).unwrap()))
            .await
            .unwrap();
        assert!(graph.contains(&b.amd));
        assert!(!graph.contains(&b.index));
    })
}

#[test]
fn requested_digest_must_exist() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        push_buildx(&fake);
        let missing = ContentDigest::from_content(b"nothing here");
        let err = build(&fake, Scope::Digest(missing)).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.exit_code(), 3);

        let listed_only = ContentDigest::from_content(b"listed but gone");
        fake.list(7, listed_only.as_str(), &[]);
        let err = build(&fake, Scope::Digest(listed_only)).await.unwrap_err();
        assert!(err.is_not_found());

        let err = build(&fake, Scope::Tag(Tag::parse("nope").unwrap()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    })
}

#[test]
fn referrers_tag_index_is_not_an_image() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let m = fake.push(1, &platform_manifest("m"), &[]);
        let layer = fake.store_blob(&json!({ "spdxVersion": "SPDX-2.3" }));
        let s = fake.push(2, &sbom_referrer(&m, &layer), &[]);
        let fallback = format!("sha256-{}", m.trim_start_matches("sha256:"));
        let x = fake.push(3, &index(vec![entry(&s, None)]), &[&fallback]);

        let graph = build_full(&fake).await;
        check_invariants(&graph);
        assert_eq!(graph.get(&x).unwrap().roles, RoleSet::single(Role::Unknown));
        assert!(graph.roots().contains(&x));
        assert_eq!(graph.image_of(&s), BTreeSet::from([m.clone()]));

        let plan = DeletionPlan::for_root(&graph, &m);
        assert_eq!(sorted(plan.ids()), vec![1, 2]);
        assert!(plan.shared.is_empty());
    })
}

#[test]
fn referrers_found_through_the_registry() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let b = push_buildx(&fake);
        let layer = fake.store_blob(&json!({ "spdxVersion": "SPDX-2.3" }));
        let listed = fake.push(400, &sbom_referrer(&b.arm, &layer), &[]);
        let unlisted = fake.store(&sbom_referrer(&b.index, &layer));

        let graph = build_full(&fake).await;
        check_invariants(&graph);
        assert!(graph.get(&listed).unwrap().outgoing.contains(&b.arm));
        let node = graph.get(&unlisted).unwrap();
        assert_eq!(node.id(), None);
        assert_eq!(graph.image_of(&unlisted), BTreeSet::from([b.index.clone()]));

        let plan = DeletionPlan::for_root(&graph, &b.index);
        assert_eq!(plan.skipped, vec![unlisted]);
        assert_eq!(sorted(plan.ids()[..2].to_vec()), vec![300, 400]);
        assert_eq!(plan.ids().last(), Some(&100));
        assert_eq!(sorted(plan.ids()), vec![100, 200, 201, 300, 400]);

        let without = GraphBuilder::new(Arc::new(fake.clone()), Arc::new(fake.clone()))
            .referrers(false)
            .build(&image(), &Scope::Tag(Tag::latest()))
            .await
            .unwrap();
        assert!(!without.contains(&listed));
    })
}

#[test]
fn cancelled_build_returns_partial_graph() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        push_buildx(&fake);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = GraphBuilder::new(Arc::new(fake.clone()), Arc::new(fake.clone()))
            .cancel_token(cancel)
            .build(&image(), &Scope::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Cancelled(_)));
        assert_eq!(err.exit_code(), 5);
    })
}

#[test]
fn cancelled_mid_discovery_keeps_what_was_fetched() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        push_buildx(&fake);
        for id in 10..16 {
            fake.push(id, &platform_manifest(&format!("extra-{}", id)), &[]);
        }
        let cancel = CancellationToken::new();
        let registry = CancelAfter::new(fake.clone(), 3, cancel.clone());
        let err = GraphBuilder::new(Arc::new(fake.clone()), Arc::new(registry))
            .fan_out(4)
            .cancel_token(cancel)
            .build(&image(), &Scope::Full)
            .await
            .unwrap_err();
        let graph = match err {
            GraphError::Cancelled(Some(graph)) => graph,
            other => panic!("expected a partial graph, got {:?}", other),
        };
        assert!(!graph.is_empty());
        assert!(graph.nodes().any(|node| node.media_type.is_some()));
        check_invariants(&graph);
    })
}

#[test]
fn sbom_documents_are_fetched() {
    init_logging();
    Runtime::new().unwrap().block_on(async {
        let fake = FakeGhcr::new();
        let b = push_buildx(&fake);
        let graph = build(&fake, Scope::Tag(Tag::latest())).await.unwrap();

        let bodies = attestation::fetch_bodies(&fake, &image(), &graph, Role::Sbom)
            .await
            .unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].manifest, b.att);
        assert_eq!(bodies[0].content["spdxVersion"], "SPDX-2.3");

        let provenance = attestation::fetch_bodies(&fake, &image(), &graph, Role::Provenance)
            .await
            .unwrap();
        assert_eq!(provenance.len(), 1);
        assert!(provenance[0].content.get("buildType").is_some());

        let err = attestation::fetch_bodies(&fake, &image(), &graph, Role::Signature)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    })
}
