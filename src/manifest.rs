//! Serde model of the OCI and Docker manifest formats
//!
//! One [Manifest] struct covers image manifests, image indexes, and Docker
//! manifest lists. Fields that only apply to one kind are optional or default
//! to empty, which keeps parsing tolerant of whatever the registry stores.
//!
//! Reference: <https://github.com/opencontainers/image-spec/blob/main/manifest.md>

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Reference from one manifest to another manifest or blob
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Platform a manifest was built for, as declared by its parent index entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// buildx marks attestation entries with an `unknown/unknown` platform
    pub fn is_unknown(&self) -> bool {
        self.os == "unknown" && self.architecture == "unknown"
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}/{}/{}", self.os, self.architecture, variant),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}

impl Manifest {
    /// Parse a manifest body
    pub fn from_slice(body: &[u8]) -> Result<Manifest, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// The media type this manifest claims for itself, if any
    pub fn declared_media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    /// Is this an image index or Docker manifest list media type?
    pub fn is_index(media_type: &str) -> bool {
        media_type == media_types::OCI_INDEX || media_type == media_types::DOCKER_MANIFEST_LIST
    }

    /// Is this one of the single-image manifest media types?
    pub fn is_image_manifest(media_type: &str) -> bool {
        media_type == media_types::OCI_MANIFEST || media_type == media_types::DOCKER_MANIFEST
    }
}

impl Descriptor {
    /// Subject digest named by a buildx attestation index entry
    ///
    /// buildx lists attestation manifests in the image index next to the
    /// platform manifests, marking them with a reference type annotation and
    /// the digest of the platform manifest they describe.
    pub fn attestation_subject(&self) -> Option<&str> {
        match self.annotations.get(annotations::REFERENCE_TYPE) {
            Some(kind) if kind == annotations::ATTESTATION_MANIFEST => self
                .annotations
                .get(annotations::REFERENCE_DIGEST)
                .map(String::as_str),
            _ => None,
        }
    }

    /// In-toto predicate type annotation, if any
    pub fn predicate_type(&self) -> Option<&str> {
        self.annotations
            .get(annotations::PREDICATE_TYPE)
            .map(String::as_str)
    }
}

pub mod media_types {
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    pub const OCI_EMPTY: &str = "application/vnd.oci.empty.v1+json";

    pub const IN_TOTO: &str = "application/vnd.in-toto+json";
    pub const DSSE_ENVELOPE: &str = "application/vnd.dsse.envelope.v1+json";
    pub const SIGSTORE_BUNDLE_PREFIX: &str = "application/vnd.dev.sigstore.bundle";
    pub const COSIGN_SIMPLESIGNING: &str = "application/vnd.dev.cosign.simplesigning.v1+json";
    pub const COSIGN_SIGNATURE: &str = "application/vnd.dev.cosign.artifact.sig.v1+json";
    pub const COSIGN_SBOM: &str = "application/vnd.dev.cosign.artifact.sbom.v1+json";
    pub const SPDX_JSON: &str = "application/spdx+json";
    pub const SPDX_TEXT: &str = "text/spdx";
    pub const CYCLONEDX_JSON: &str = "application/vnd.cyclonedx+json";
    pub const SYFT_JSON: &str = "application/vnd.syft+json";
    pub const SARIF_JSON: &str = "application/sarif+json";
    pub const OPENVEX_JSON: &str = "application/vnd.openvex+json";

    /// Every manifest type we accept from the registry
    pub const ACCEPT_MANIFESTS: &str = concat!(
        "application/vnd.oci.image.index.v1+json, ",
        "application/vnd.oci.image.manifest.v1+json, ",
        "application/vnd.docker.distribution.manifest.list.v2+json, ",
        "application/vnd.docker.distribution.manifest.v2+json"
    );
}

pub mod annotations {
    pub const PREDICATE_TYPE: &str = "in-toto.io/predicate-type";
    pub const REFERENCE_TYPE: &str = "vnd.docker.reference.type";
    pub const REFERENCE_DIGEST: &str = "vnd.docker.reference.digest";
    pub const ATTESTATION_MANIFEST: &str = "attestation-manifest";
}
