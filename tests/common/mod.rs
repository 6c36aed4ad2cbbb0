//! In-memory stand-in for both GitHub views of one package

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ghcrctl::{
    api::{
        Descriptor, FetchedManifest, Package, PackageApi, PackagePage, RegistryApi, VersionPage,
    },
    image::ContentDigest,
    manifest::{media_types, Manifest},
    versions::Version,
    GraphError, ImageName, Tag,
};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio_util::sync::CancellationToken;

pub const PAGE_SIZE: usize = 3;

#[derive(Default)]
struct State {
    versions: BTreeMap<i64, Version>,
    manifests: HashMap<String, FetchedManifest>,
    blobs: HashMap<String, Bytes>,
    tags: HashMap<String, String>,
    fail_delete: HashSet<i64>,
    next_id: i64,
}

#[derive(Clone, Default)]
pub struct FakeGhcr {
    state: Arc<Mutex<State>>,
    pub manifest_fetches: Arc<AtomicUsize>,
}

pub fn image() -> ImageName {
    ImageName::parse("octo/app").unwrap()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn platform_manifest(seed: &str) -> Value {
    json!({
        "schemaVersion": 2,
        "mediaType": media_types::OCI_MANIFEST,
        "config": {
            "mediaType": media_types::OCI_CONFIG,
            "digest": ContentDigest::from_content(seed.as_bytes()).as_str(),
            "size": seed.len(),
        },
        "layers": [],
    })
}

/// Descriptor JSON for an existing manifest in the fake
pub fn entry(digest: &str, platform: Option<(&str, &str)>) -> Value {
    let mut value = json!({
        "mediaType": media_types::OCI_MANIFEST,
        "digest": digest,
        "size": 100,
    });
    if let Some((os, architecture)) = platform {
        value["platform"] = json!({ "os": os, "architecture": architecture });
    }
    value
}

/// A buildx attestation entry for an index, describing `subject`
pub fn attestation_entry(digest: &str, subject: &str) -> Value {
    json!({
        "mediaType": media_types::OCI_MANIFEST,
        "digest": digest,
        "size": 100,
        "platform": { "os": "unknown", "architecture": "unknown" },
        "annotations": {
            "vnd.docker.reference.type": "attestation-manifest",
            "vnd.docker.reference.digest": subject,
        },
    })
}

pub fn index(entries: Vec<Value>) -> Value {
    json!({
        "schemaVersion": 2,
        "mediaType": media_types::OCI_INDEX,
        "manifests": entries,
    })
}

/// Manifest with SBOM and provenance layers, as buildx writes them
pub fn buildx_attestation(sbom_layer: &str, provenance_layer: &str) -> Value {
    json!({
        "schemaVersion": 2,
        "mediaType": media_types::OCI_MANIFEST,
        "config": {
            "mediaType": media_types::IN_TOTO,
            "digest": ContentDigest::from_content(b"{}").as_str(),
            "size": 2,
        },
        "layers": [
            {
                "mediaType": media_types::IN_TOTO,
                "digest": sbom_layer,
                "size": 10,
                "annotations": { "in-toto.io/predicate-type": "https://spdx.dev/Document" },
            },
            {
                "mediaType": media_types::IN_TOTO,
                "digest": provenance_layer,
                "size": 10,
                "annotations": { "in-toto.io/predicate-type": "https://slsa.dev/provenance/v0.2" },
            },
        ],
    })
}

/// An OCI 1.1 referrer manifest carrying an SPDX document
pub fn sbom_referrer(subject: &str, layer: &str) -> Value {
    json!({
        "schemaVersion": 2,
        "mediaType": media_types::OCI_MANIFEST,
        "artifactType": media_types::SPDX_JSON,
        "config": {
            "mediaType": media_types::OCI_EMPTY,
            "digest": ContentDigest::from_content(b"{}").as_str(),
            "size": 2,
        },
        "layers": [
            { "mediaType": media_types::SPDX_JSON, "digest": layer, "size": 10 },
        ],
        "subject": { "mediaType": media_types::OCI_MANIFEST, "digest": subject, "size": 100 },
    })
}

impl FakeGhcr {
    pub fn new() -> Self {
        let fake = FakeGhcr::default();
        fake.state.lock().unwrap().next_id = 1000;
        fake
    }

    /// Store a manifest in the registry only, returning its digest
    pub fn store(&self, body: &Value) -> String {
        let bytes = Bytes::from(serde_json::to_vec(body).unwrap());
        let digest = ContentDigest::from_content(&bytes).as_str().to_owned();
        let media_type = body["mediaType"].as_str().unwrap_or_default().to_owned();
        self.state
            .lock()
            .unwrap()
            .manifests
            .insert(digest.clone(), FetchedManifest { media_type, bytes });
        digest
    }

    /// Store a manifest and list it as a package version
    pub fn push(&self, id: i64, body: &Value, tags: &[&str]) -> String {
        let digest = self.store(body);
        self.list(id, &digest, tags);
        digest
    }

    /// List a version without storing a manifest for it
    pub fn list(&self, id: i64, digest: &str, tags: &[&str]) {
        let mut state = self.state.lock().unwrap();
        for tag in tags {
            state.tags.insert(tag.to_string(), digest.to_owned());
        }
        state.versions.insert(
            id,
            Version {
                id: Some(id),
                digest: digest.to_owned(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                created_at: None,
                size: 100,
            },
        );
    }

    pub fn store_blob(&self, content: &Value) -> String {
        let bytes = Bytes::from(serde_json::to_vec(content).unwrap());
        let digest = ContentDigest::from_content(&bytes).as_str().to_owned();
        self.state.lock().unwrap().blobs.insert(digest.clone(), bytes);
        digest
    }

    pub fn fail_delete(&self, id: i64) {
        self.state.lock().unwrap().fail_delete.insert(id);
    }

    pub fn version_ids(&self) -> Vec<i64> {
        self.state.lock().unwrap().versions.keys().copied().collect()
    }

    pub fn tags_of(&self, digest: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut tags: Vec<String> = state
            .tags
            .iter()
            .filter(|(_, d)| d.as_str() == digest)
            .map(|(t, _)| t.clone())
            .collect();
        tags.sort();
        tags
    }
}

#[async_trait]
impl PackageApi for FakeGhcr {
    async fn list_versions(&self, _: &ImageName, page: u32) -> Result<VersionPage, GraphError> {
        let state = self.state.lock().unwrap();
        let start = (page as usize - 1) * PAGE_SIZE;
        let versions: Vec<Version> = state
            .versions
            .values()
            .skip(start)
            .take(PAGE_SIZE)
            .cloned()
            .collect();
        let next_page = if start + PAGE_SIZE < state.versions.len() {
            Some(page + 1)
        } else {
            None
        };
        Ok(VersionPage {
            versions,
            next_page,
        })
    }

    async fn delete_version(&self, image: &ImageName, id: i64) -> Result<(), GraphError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete.contains(&id) {
            return Err(GraphError::Forbidden(format!("cannot delete {} from {}", id, image)));
        }
        let version = state
            .versions
            .remove(&id)
            .ok_or_else(|| GraphError::NotFound(format!("version {}", id)))?;
        state.manifests.remove(&version.digest);
        state.tags.retain(|_, digest| *digest != version.digest);
        Ok(())
    }

    async fn list_packages(&self, owner: &str, _: u32) -> Result<PackagePage, GraphError> {
        Ok(PackagePage {
            packages: vec![Package {
                id: 1,
                name: format!("{}-app", owner),
                visibility: Some("private".to_owned()),
                version_count: Some(self.state.lock().unwrap().versions.len() as i64),
                created_at: None,
                updated_at: None,
            }],
            next_page: None,
        })
    }
}

#[async_trait]
impl RegistryApi for FakeGhcr {
    async fn resolve_tag(&self, image: &ImageName, tag: &Tag) -> Result<Descriptor, GraphError> {
        let state = self.state.lock().unwrap();
        let digest = state
            .tags
            .get(tag.as_str())
            .ok_or_else(|| GraphError::NotFound(format!("{}:{}", image, tag)))?;
        let manifest = state
            .manifests
            .get(digest)
            .ok_or_else(|| GraphError::NotFound(digest.clone()))?;
        Ok(Descriptor {
            digest: digest.clone(),
            media_type: manifest.media_type.clone(),
            size: manifest.bytes.len() as i64,
            artifact_type: None,
        })
    }

    async fn fetch_manifest(
        &self,
        image: &ImageName,
        digest: &str,
    ) -> Result<FetchedManifest, GraphError> {
        self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(digest)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("{}@{}", image, digest)))
    }

    async fn list_referrers(
        &self,
        _: &ImageName,
        subject: &str,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, GraphError> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<Descriptor> = state
            .manifests
            .iter()
            .filter_map(|(digest, fetched)| {
                let manifest = Manifest::from_slice(&fetched.bytes).ok()?;
                if manifest.subject.as_ref()?.digest != subject {
                    return None;
                }
                Some(Descriptor {
                    digest: digest.clone(),
                    media_type: fetched.media_type.clone(),
                    size: fetched.bytes.len() as i64,
                    artifact_type: manifest.artifact_type.clone(),
                })
            })
            .filter(|d| artifact_type.is_none() || d.artifact_type.as_deref() == artifact_type)
            .collect();
        found.sort_by(|a, b| a.digest.cmp(&b.digest));
        Ok(found)
    }

    async fn put_manifest(
        &self,
        _: &ImageName,
        tag: &Tag,
        bytes: Bytes,
        media_type: &str,
    ) -> Result<(), GraphError> {
        let digest = ContentDigest::from_content(&bytes).as_str().to_owned();
        let mut state = self.state.lock().unwrap();
        state.manifests.insert(
            digest.clone(),
            FetchedManifest {
                media_type: media_type.to_owned(),
                bytes,
            },
        );
        if let Some(old) = state.tags.insert(tag.as_str().to_owned(), digest.clone()) {
            for version in state.versions.values_mut().filter(|v| v.digest == old) {
                version.tags.retain(|t| t != tag.as_str());
            }
        }
        match state.versions.values_mut().find(|v| v.digest == digest) {
            Some(version) => version.tags.push(tag.as_str().to_owned()),
            None => {
                state.next_id += 1;
                let id = state.next_id;
                state.versions.insert(
                    id,
                    Version {
                        id: Some(id),
                        digest,
                        tags: vec![tag.as_str().to_owned()],
                        created_at: None,
                        size: 0,
                    },
                );
            }
        }
        Ok(())
    }

    async fn fetch_blob(&self, image: &ImageName, digest: &str) -> Result<Bytes, GraphError> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("{}@{}", image, digest)))
    }
}

/// Registry that cancels `token` once `after` manifest fetches have completed
pub struct CancelAfter {
    pub inner: FakeGhcr,
    pub after: usize,
    pub token: CancellationToken,
    fetched: AtomicUsize,
}

impl CancelAfter {
    pub fn new(inner: FakeGhcr, after: usize, token: CancellationToken) -> Self {
        CancelAfter {
            inner,
            after,
            token,
            fetched: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RegistryApi for CancelAfter {
    async fn resolve_tag(&self, image: &ImageName, tag: &Tag) -> Result<Descriptor, GraphError> {
        self.inner.resolve_tag(image, tag).await
    }

    async fn fetch_manifest(
        &self,
        image: &ImageName,
        digest: &str,
    ) -> Result<FetchedManifest, GraphError> {
        let result = self.inner.fetch_manifest(image, digest).await;
        if self.fetched.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
        result
    }

    async fn list_referrers(
        &self,
        image: &ImageName,
        subject: &str,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, GraphError> {
        self.inner.list_referrers(image, subject, artifact_type).await
    }

    async fn put_manifest(
        &self,
        image: &ImageName,
        tag: &Tag,
        bytes: Bytes,
        media_type: &str,
    ) -> Result<(), GraphError> {
        self.inner.put_manifest(image, tag, bytes, media_type).await
    }

    async fn fetch_blob(&self, image: &ImageName, digest: &str) -> Result<Bytes, GraphError> {
        self.inner.fetch_blob(image, digest).await
    }
}
