//! Concurrent discovery of a package's artifact graph
//!
//! Discovery starts from a set of seed digests and walks the registry: every
//! fetched manifest contributes its index entries, its subject, and (for
//! anything that is not itself a referrer) whatever the referrers API lists
//! for it. A fixed pool of worker tasks drains a shared queue, so at most
//! `fan_out` registry calls are in flight at once.
//!
//! Classification waits until the queue has drained. By then every parent has
//! reported its hints about each child, so the roles a node ends up with do
//! not depend on which worker happened to fetch what first.

use super::{Graph, Node};
use crate::{
    api::{FetchedManifest, PackageApi, RegistryApi},
    classify::{classify, classify_manifest, Classification, EntryHint, Role, RoleSet},
    errors::GraphError,
    image::{ContentDigest, ImageName, ImageVersion, Tag},
    manifest::Manifest,
    versions::{Version, VersionIndex},
};
use futures_util::{stream::FuturesUnordered, StreamExt};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{sync::Notify, task};
use tokio_util::sync::CancellationToken;

/// Registry calls in flight at once, unless configured otherwise
pub const DEFAULT_FAN_OUT: usize = 8;

/// Where discovery starts
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Scope {
    /// Every listed version of the package
    Full,
    /// Whatever a tag currently points at
    Tag(Tag),
    /// One manifest, by digest
    Digest(ContentDigest),
}

impl From<ImageVersion> for Scope {
    fn from(version: ImageVersion) -> Self {
        match version {
            ImageVersion::Tag(tag) => Scope::Tag(tag),
            ImageVersion::ContentDigest(digest) => Scope::Digest(digest),
        }
    }
}

/// Builds a [Graph] for one package
///
/// ```no_run
/// # use ghcrctl::{graph::{GraphBuilder, Scope}, registry::{PackageClient, RegistryClient}, ImageName};
/// # use std::sync::Arc;
/// # async fn run(packages: Arc<PackageClient>, registry: Arc<RegistryClient>) -> Result<(), ghcrctl::GraphError> {
/// let image = ImageName::parse("ghcr.io/octo/app")?;
/// let graph = GraphBuilder::new(packages, registry)
///     .fan_out(4)
///     .build(&image, &Scope::Full)
///     .await?;
/// println!("{} images", graph.roots().len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GraphBuilder {
    packages: Arc<dyn PackageApi>,
    registry: Arc<dyn RegistryApi>,
    fan_out: usize,
    cancel: CancellationToken,
    referrers: bool,
}

impl GraphBuilder {
    pub fn new(packages: Arc<dyn PackageApi>, registry: Arc<dyn RegistryApi>) -> Self {
        GraphBuilder {
            packages,
            registry,
            fan_out: DEFAULT_FAN_OUT,
            cancel: CancellationToken::new(),
            referrers: true,
        }
    }

    /// Limit the number of concurrent registry calls
    pub fn fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out.max(1);
        self
    }

    /// Stop discovery when this token is cancelled
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Turn referrers API lookups on or off
    ///
    /// With lookups off, only edges written into manifests themselves (index
    /// entries and subjects) are followed.
    pub fn referrers(mut self, enabled: bool) -> Self {
        self.referrers = enabled;
        self
    }

    /// Discover and classify everything reachable from the scope's seeds
    ///
    /// Cancellation returns [GraphError::Cancelled] carrying whatever had been
    /// fetched so far.
    pub async fn build(&self, image: &ImageName, scope: &Scope) -> Result<Graph, GraphError> {
        let versions = tokio::select! {
            _ = self.cancel.cancelled() => return Err(GraphError::Cancelled(None)),
            versions = VersionIndex::fetch(self.packages.as_ref(), image) => versions?,
        };

        let seeds = match scope {
            Scope::Full => versions
                .digests()
                .into_iter()
                .map(|digest| Visit {
                    digest,
                    requested: false,
                })
                .collect(),
            Scope::Tag(tag) => {
                let descriptor = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(GraphError::Cancelled(None)),
                    descriptor = self.registry.resolve_tag(image, tag) => descriptor?,
                };
                log::info!("{}:{} is {}", image, tag, descriptor.digest);
                vec![Visit {
                    digest: descriptor.digest,
                    requested: true,
                }]
            }
            Scope::Digest(digest) => vec![Visit {
                digest: digest.as_str().to_owned(),
                requested: true,
            }],
        };
        log::debug!("discovery of {} starts from {} seeds", image, seeds.len());

        let shared = Arc::new(Shared {
            frontier: Mutex::new(Frontier {
                queue: seeds.into(),
                ..Default::default()
            }),
            wake: Notify::new(),
            image: image.without_version(),
            registry: self.registry.clone(),
            cancel: self.cancel.clone(),
            referrers: self.referrers,
        });

        let mut tasks = FuturesUnordered::new();
        for _ in 0..self.fan_out {
            tasks.push(task::spawn(worker(shared.clone())));
        }
        while let Some(result) = tasks.next().await {
            result?;
        }

        let frontier = std::mem::take(&mut *shared.lock());
        let graph = assemble(&versions, frontier.fetched, &frontier.hints);
        if frontier.cancelled || self.cancel.is_cancelled() {
            log::warn!("discovery cancelled with {} nodes fetched", graph.len());
            return Err(GraphError::Cancelled(Some(Box::new(graph))));
        }
        if let Some(err) = frontier.failure {
            return Err(err);
        }
        log::info!(
            "{} has {} nodes in {} images",
            image,
            graph.len(),
            graph.roots().len()
        );
        Ok(graph)
    }
}

struct Visit {
    digest: String,
    /// A seed the user asked for by name, which must exist
    requested: bool,
}

#[derive(Default)]
struct Frontier {
    queue: VecDeque<Visit>,
    visited: HashSet<String>,
    in_flight: usize,
    /// Manifests by digest; `None` when the registry did not have it
    fetched: BTreeMap<String, Option<FetchedManifest>>,
    hints: HashMap<String, EntryHint>,
    failure: Option<GraphError>,
    cancelled: bool,
}

impl Frontier {
    fn take(&mut self) -> Option<Visit> {
        while let Some(visit) = self.queue.pop_front() {
            if self.visited.insert(visit.digest.clone()) {
                self.in_flight += 1;
                return Some(visit);
            }
        }
        None
    }

    fn is_stopped(&self) -> bool {
        self.cancelled || self.failure.is_some()
    }

    fn record(&mut self, digest: String, discovery: Discovery) {
        self.fetched.insert(digest, discovery.fetched);
        for (child, hint) in discovery.children {
            if !hint.is_empty() {
                self.hints.entry(child.clone()).or_default().merge(&hint);
            }
            if !self.visited.contains(&child) {
                self.queue.push_back(Visit {
                    digest: child,
                    requested: false,
                });
            }
        }
    }
}

struct Shared {
    frontier: Mutex<Frontier>,
    wake: Notify,
    image: ImageName,
    registry: Arc<dyn RegistryApi>,
    cancel: CancellationToken,
    referrers: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Frontier> {
        self.frontier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn discover(&self, visit: &Visit) -> Result<Discovery, GraphError> {
        let fetched = match self.registry.fetch_manifest(&self.image, &visit.digest).await {
            Ok(fetched) => fetched,
            Err(err) if err.is_not_found() => {
                if visit.requested {
                    return Err(GraphError::NotFound(format!("{}@{}", self.image, visit.digest)));
                }
                log::warn!("{} is referenced but the registry does not have it", visit.digest);
                return Ok(Discovery::default());
            }
            Err(err) => return Err(err),
        };

        let mut children = Vec::new();
        let manifest = match Manifest::from_slice(&fetched.bytes) {
            Ok(manifest) => manifest,
            Err(err) => {
                log::warn!("{} does not parse as a manifest, {}", visit.digest, err);
                return Ok(Discovery {
                    fetched: Some(fetched),
                    children,
                });
            }
        };

        for entry in &manifest.manifests {
            let hint = EntryHint::from_descriptor(entry);
            if let Some(subject) = &hint.attestation_subject {
                children.push((subject.clone(), EntryHint::default()));
            }
            children.push((entry.digest.clone(), hint));
        }
        if let Some(subject) = &manifest.subject {
            children.push((subject.digest.clone(), EntryHint::default()));
        }

        let describes_another =
            classify_manifest(&fetched.media_type, &manifest, &EntryHint::default())
                .roles
                .is_referrer();
        if self.referrers && !describes_another && manifest.subject.is_none() {
            let referrers = self
                .registry
                .list_referrers(&self.image, &visit.digest, None)
                .await?;
            log::debug!("{} has {} referrers", visit.digest, referrers.len());
            for descriptor in referrers {
                let hint = EntryHint {
                    artifact_type: descriptor.artifact_type,
                    ..Default::default()
                };
                children.push((descriptor.digest, hint));
            }
        }

        children.retain(|(digest, _)| {
            let valid = ContentDigest::is_valid(digest);
            if !valid {
                log::warn!("{} references malformed digest {:?}", visit.digest, digest);
            }
            valid
        });

        Ok(Discovery {
            fetched: Some(fetched),
            children,
        })
    }
}

#[derive(Default)]
struct Discovery {
    fetched: Option<FetchedManifest>,
    children: Vec<(String, EntryHint)>,
}

async fn worker(shared: Arc<Shared>) {
    loop {
        // Registered before checking the queue, so a wakeup between the
        // check and the await is not lost
        let notified = shared.wake.notified();
        let visit = {
            let mut frontier = shared.lock();
            if frontier.is_stopped() {
                return;
            }
            let visit = frontier.take();
            if visit.is_none() && frontier.in_flight == 0 {
                return;
            }
            visit
        };

        let visit = match visit {
            Some(visit) => visit,
            None => {
                tokio::select! {
                    _ = shared.cancel.cancelled() => {
                        shared.lock().cancelled = true;
                        shared.wake.notify_waiters();
                        return;
                    }
                    _ = notified => continue,
                }
            }
        };

        let result = tokio::select! {
            _ = shared.cancel.cancelled() => None,
            result = shared.discover(&visit) => Some(result),
        };

        {
            let mut frontier = shared.lock();
            frontier.in_flight -= 1;
            match result {
                None => frontier.cancelled = true,
                Some(Ok(discovery)) => frontier.record(visit.digest, discovery),
                Some(Err(err)) => {
                    log::error!("discovery of {} failed, {}", visit.digest, err);
                    if frontier.failure.is_none() {
                        frontier.failure = Some(err);
                    }
                }
            }
        }
        shared.wake.notify_waiters();
    }
}

/// Indexes stored under `sha256-<hex>` by the referrers tag fallback
fn is_referrers_index(version: &Version) -> bool {
    version
        .tags
        .iter()
        .filter_map(|tag| Tag::parse(tag).ok())
        .any(|tag| tag.artifact_subject().is_some())
}

/// Classify everything fetched and turn it into a graph
fn assemble(
    versions: &VersionIndex,
    fetched: BTreeMap<String, Option<FetchedManifest>>,
    hints: &HashMap<String, EntryHint>,
) -> Graph {
    let no_hint = EntryHint::default();
    let mut nodes = Vec::with_capacity(fetched.len());

    for (digest, manifest) in fetched {
        let (manifest, listed) = match (manifest, versions.by_digest(&digest).cloned()) {
            (Some(manifest), listed) => (manifest, listed),
            (None, Some(listed)) => {
                nodes.push(Node::missing(listed));
                continue;
            }
            (None, None) => continue,
        };

        let hint = hints.get(&digest).unwrap_or(&no_hint);
        let mut classification = classify(&manifest.media_type, &manifest.bytes, hint);
        if classification.roles.is_index() && listed.as_ref().map_or(false, is_referrers_index) {
            log::debug!("{} is a referrers tag index, not an image", digest);
            classification = Classification {
                roles: RoleSet::single(Role::Unknown),
                platform: None,
            };
        }
        let mut outgoing = BTreeSet::new();
        if let Ok(parsed) = Manifest::from_slice(&manifest.bytes) {
            outgoing.extend(parsed.manifests.iter().map(|entry| entry.digest.clone()));
            outgoing.extend(parsed.subject.iter().map(|subject| subject.digest.clone()));
            if classification.roles.is_referrer() {
                outgoing.extend(hint.attestation_subject.iter().cloned());
            }
        }
        if classification.roles.is_referrer() && outgoing.is_empty() {
            // cosign names its signatures after the subject, sha256-<hex>.sig
            if let Some(listed) = &listed {
                outgoing.extend(
                    listed
                        .tags
                        .iter()
                        .filter_map(|tag| Tag::parse(tag).ok())
                        .filter_map(|tag| tag.artifact_subject()),
                );
            }
        }
        outgoing.remove(&digest);

        let mut version = listed.unwrap_or_else(|| Version::synthetic(&digest));
        if version.size == 0 {
            version.size = manifest.bytes.len() as i64;
        }
        nodes.push(Node::new(
            version,
            classification,
            Some(manifest.media_type),
            outgoing,
        ));
    }

    Graph::from_nodes(nodes)
}
