//! Package versions from the management API, indexed by digest and by ID

use crate::{api::PackageApi, errors::GraphError, image::ImageName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One row from the package-management view
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct Version {
    /// Management identifier, the only handle usable for deletion
    ///
    /// `None` for manifests the registry holds but the management API does
    /// not list.
    pub id: Option<i64>,
    pub digest: String,
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub size: i64,
}

impl Version {
    /// A registry-only manifest with no management identity
    pub fn synthetic(digest: &str) -> Self {
        Version {
            id: None,
            digest: digest.to_owned(),
            ..Default::default()
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_untagged(&self) -> bool {
        self.tags.is_empty()
    }
}

/// All versions of one package
#[derive(Clone, Debug, Default)]
pub struct VersionIndex {
    by_digest: HashMap<String, Version>,
    by_id: BTreeMap<i64, Version>,
}

impl VersionIndex {
    /// Page through every version of a package
    pub async fn fetch(packages: &dyn PackageApi, image: &ImageName) -> Result<Self, GraphError> {
        let mut index = VersionIndex::default();
        let mut page = Some(1);
        while let Some(number) = page {
            let result = packages.list_versions(image, number).await?;
            log::debug!(
                "{} version page {} has {} entries",
                image,
                number,
                result.versions.len()
            );
            for version in result.versions {
                index.insert(version);
            }
            page = result.next_page;
        }
        log::info!("{} has {} versions", image, index.len());
        Ok(index)
    }

    /// Add a version, replacing any earlier one with the same digest or ID
    pub fn insert(&mut self, version: Version) {
        if let Some(previous) = self.by_digest.get(&version.digest) {
            log::warn!(
                "digest {} listed twice (ids {:?} and {:?}), keeping the later one",
                version.digest,
                previous.id,
                version.id
            );
            if let Some(id) = previous.id {
                self.by_id.remove(&id);
            }
        }
        if let Some(id) = version.id {
            self.by_id.insert(id, version.clone());
        }
        self.by_digest.insert(version.digest.clone(), version);
    }

    pub fn by_digest(&self, digest: &str) -> Option<&Version> {
        self.by_digest.get(digest)
    }

    pub fn by_id(&self, id: i64) -> Option<&Version> {
        self.by_id.get(&id)
    }

    /// Versions that carry a tag, looked up by tag name
    pub fn by_tag(&self, tag: &str) -> Option<&Version> {
        self.by_digest
            .values()
            .find(|version| version.tags.iter().any(|t| t == tag))
    }

    /// All digests, in sorted order
    pub fn digests(&self) -> Vec<String> {
        let mut digests: Vec<String> = self.by_digest.keys().cloned().collect();
        digests.sort();
        digests
    }

    /// All versions, ordered by ID
    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }
}
