//! Narrow interfaces to the two upstream views of a package
//!
//! The graph engine only talks to the outside world through [PackageApi] and
//! [RegistryApi]. The HTTP clients in [crate::registry] implement them for
//! GitHub; tests implement them in memory.

use crate::{
    errors::GraphError,
    image::{ImageName, Tag},
    versions::Version,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of package versions
#[derive(Clone, Debug, Default)]
pub struct VersionPage {
    pub versions: Vec<Version>,
    /// Page number to ask for next, if there is more
    pub next_page: Option<u32>,
}

/// A container package owned by an account
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct Package {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub version_count: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One page of packages
#[derive(Clone, Debug, Default)]
pub struct PackagePage {
    pub packages: Vec<Package>,
    pub next_page: Option<u32>,
}

/// The package-management view: version IDs and tags, but no linkage
#[async_trait]
pub trait PackageApi: Send + Sync {
    /// List one page of versions for a package, starting at page 1
    async fn list_versions(&self, image: &ImageName, page: u32) -> Result<VersionPage, GraphError>;

    /// Delete one version by its management ID
    async fn delete_version(&self, image: &ImageName, id: i64) -> Result<(), GraphError>;

    /// List one page of container packages owned by an account
    async fn list_packages(&self, owner: &str, page: u32) -> Result<PackagePage, GraphError>;
}

/// Content descriptor returned by the registry
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Descriptor {
    pub digest: String,
    pub media_type: String,
    pub size: i64,
    /// Artifact type, as reported by the referrers API
    pub artifact_type: Option<String>,
}

impl From<&crate::manifest::Descriptor> for Descriptor {
    fn from(d: &crate::manifest::Descriptor) -> Self {
        Descriptor {
            digest: d.digest.clone(),
            media_type: d.media_type.clone(),
            size: d.size,
            artifact_type: d.artifact_type.clone(),
        }
    }
}

/// Raw manifest bytes as stored in the registry
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FetchedManifest {
    pub media_type: String,
    pub bytes: Bytes,
}

/// The OCI registry view: linkage, but no version IDs
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Find the manifest a tag currently points at
    async fn resolve_tag(&self, image: &ImageName, tag: &Tag) -> Result<Descriptor, GraphError>;

    /// Download a manifest by digest
    async fn fetch_manifest(
        &self,
        image: &ImageName,
        digest: &str,
    ) -> Result<FetchedManifest, GraphError>;

    /// List manifests whose `subject` is the given digest
    async fn list_referrers(
        &self,
        image: &ImageName,
        subject: &str,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, GraphError>;

    /// Store manifest bytes under a tag
    async fn put_manifest(
        &self,
        image: &ImageName,
        tag: &Tag,
        bytes: Bytes,
        media_type: &str,
    ) -> Result<(), GraphError>;

    /// Download a blob by digest
    async fn fetch_blob(&self, image: &ImageName, digest: &str) -> Result<Bytes, GraphError>;
}
