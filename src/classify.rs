//! Assigning artifact roles to manifests
//!
//! Classification is a pure function of the manifest body, its media type,
//! and whatever the manifest's parents said about it (an [EntryHint]). It
//! never touches the network, so the graph builder can run it after discovery
//! has finished, once every hint has been collected.

use crate::manifest::{media_types, Descriptor, Manifest, Platform};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, collections::BTreeSet, fmt};

/// What part an artifact plays within an image
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Index,
    ManifestPlatform,
    Sbom,
    Provenance,
    Signature,
    VulnScan,
    Vex,
    Attestation,
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Index => "index",
            Role::ManifestPlatform => "manifest-platform",
            Role::Sbom => "sbom",
            Role::Provenance => "provenance",
            Role::Signature => "signature",
            Role::VulnScan => "vuln-scan",
            Role::Vex => "vex",
            Role::Attestation => "attestation",
            Role::Unknown => "unknown",
        }
    }

    /// Roles of artifacts that describe another manifest
    pub fn is_referrer(&self) -> bool {
        matches!(
            self,
            Role::Sbom
                | Role::Provenance
                | Role::Signature
                | Role::VulnScan
                | Role::Vex
                | Role::Attestation
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of roles carried by one node
///
/// A buildx attestation manifest with an SPDX layer and a SLSA layer is both
/// `sbom` and `provenance`, so roles are never exclusive.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        RoleSet(BTreeSet::new())
    }

    pub fn single(role: Role) -> Self {
        let mut set = RoleSet::new();
        set.insert(role);
        set
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    pub fn is_index(&self) -> bool {
        self.contains(Role::Index)
    }

    /// Does this node describe another manifest?
    ///
    /// An index is never treated as a referrer, even if it also carries a
    /// referrer role.
    pub fn is_referrer(&self) -> bool {
        !self.is_index() && self.iter().any(|role| role.is_referrer())
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        RoleSet(iter.into_iter().collect())
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for role in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            f.write_str(role.as_str())?;
        }
        Ok(())
    }
}

/// What the parents of a manifest said about it
///
/// Collected from index entries and referrers API descriptors during
/// discovery. A manifest reachable along several paths gets the merge of all
/// of them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EntryHint {
    /// Platform declared by a parent index entry
    pub platform: Option<Platform>,
    /// Artifact type reported by the referrers API
    pub artifact_type: Option<String>,
    /// Subject digest from a buildx attestation index entry
    pub attestation_subject: Option<String>,
}

impl EntryHint {
    /// Hint carried by one index entry or referrer descriptor
    pub fn from_descriptor(descriptor: &Descriptor) -> Self {
        EntryHint {
            platform: descriptor.platform.clone(),
            artifact_type: descriptor.artifact_type.clone(),
            attestation_subject: descriptor.attestation_subject().map(str::to_owned),
        }
    }

    /// Fill in whatever this hint is missing from another one
    ///
    /// When two parents disagree the smaller value wins, so the result does
    /// not depend on discovery order.
    pub fn merge(&mut self, other: &EntryHint) {
        fn pick<T: Ord + Clone>(mine: &mut Option<T>, theirs: &Option<T>) {
            match (mine.as_ref(), theirs) {
                (_, None) => (),
                (None, Some(value)) => *mine = Some(value.clone()),
                (Some(current), Some(value)) => {
                    if value < current {
                        *mine = Some(value.clone());
                    }
                }
            }
        }
        pick(&mut self.platform, &other.platform);
        pick(&mut self.artifact_type, &other.artifact_type);
        pick(&mut self.attestation_subject, &other.attestation_subject);
    }

    pub fn is_empty(&self) -> bool {
        self.platform.is_none() && self.artifact_type.is_none() && self.attestation_subject.is_none()
    }
}

/// Result of classifying one manifest
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Classification {
    pub roles: RoleSet,
    pub platform: Option<Platform>,
}

impl Classification {
    fn roles(roles: RoleSet) -> Self {
        Classification {
            roles,
            platform: None,
        }
    }

    fn unknown() -> Self {
        Classification::roles(RoleSet::single(Role::Unknown))
    }
}

/// Assign roles to a manifest
///
/// `media_type` is what the registry reported for the body; when empty, the
/// body's own `mediaType` field is used.
pub fn classify(media_type: &str, body: &[u8], hint: &EntryHint) -> Classification {
    match Manifest::from_slice(body) {
        Ok(manifest) => classify_manifest(media_type, &manifest, hint),
        Err(err) => {
            log::debug!("manifest body does not parse, {}", err);
            Classification::unknown()
        }
    }
}

/// Assign roles to a manifest that has already been parsed
pub fn classify_manifest(media_type: &str, manifest: &Manifest, hint: &EntryHint) -> Classification {
    let media_type = match media_type {
        "" => manifest.declared_media_type().unwrap_or(""),
        other => other,
    };

    if Manifest::is_index(media_type) {
        return if manifest.subject.is_some() {
            Classification::roles(referrer_roles(manifest, hint))
        } else if manifest.manifests.is_empty() || lists_only_referrers(manifest) {
            Classification::unknown()
        } else {
            Classification::roles(RoleSet::single(Role::Index))
        };
    }

    if !Manifest::is_image_manifest(media_type) {
        return Classification::unknown();
    }

    if is_attestation_typed(manifest, hint) || manifest.subject.is_some() {
        return Classification::roles(referrer_roles(manifest, hint));
    }

    Classification {
        roles: RoleSet::single(Role::ManifestPlatform),
        platform: hint.platform.clone().filter(|platform| !platform.is_unknown()),
    }
}

/// An index of attestations rather than of images
///
/// The referrers tag fallback stores one of these under `sha256-<hex>`; its
/// entries are classified on their own and must not become an image.
fn lists_only_referrers(manifest: &Manifest) -> bool {
    manifest.manifests.iter().all(|entry| {
        entry.artifact_type.is_some()
            || entry.attestation_subject().is_some()
            || entry.platform.as_ref().map(Platform::is_unknown).unwrap_or(false)
    })
}

fn is_attestation_type(media_type: &str) -> bool {
    media_type == media_types::IN_TOTO
        || media_type == media_types::DSSE_ENVELOPE
        || media_type == media_types::COSIGN_SIMPLESIGNING
        || media_type.starts_with(media_types::SIGSTORE_BUNDLE_PREFIX)
        || role_for_media_type(media_type).is_some()
}

fn is_attestation_typed(manifest: &Manifest, hint: &EntryHint) -> bool {
    hint.attestation_subject.is_some()
        || manifest
            .config
            .as_ref()
            .map(|config| config.media_type == media_types::IN_TOTO)
            .unwrap_or(false)
        || manifest
            .artifact_type
            .iter()
            .chain(hint.artifact_type.iter())
            .any(|t| is_attestation_type(t))
        || manifest
            .layers
            .iter()
            .any(|layer| is_attestation_type(&layer.media_type) || predicate_of(&layer.annotations).is_some())
}

fn predicate_of(annotations: &BTreeMap<String, String>) -> Option<&str> {
    const KEYS: [&str; 3] = [
        crate::manifest::annotations::PREDICATE_TYPE,
        "predicateType",
        "dev.sigstore.bundle.predicateType",
    ];
    KEYS.iter()
        .find_map(|key| annotations.get(*key))
        .map(String::as_str)
}

fn role_for_predicate(predicate: &str) -> Option<Role> {
    const SBOM: [&str; 3] = [
        "https://spdx.dev/Document",
        "https://cyclonedx.org/bom",
        "https://syft.dev/bom",
    ];
    const PROVENANCE: [&str; 2] = ["https://slsa.dev/provenance/", "https://in-toto.io/Provenance"];

    if SBOM.iter().any(|prefix| predicate.starts_with(prefix)) {
        Some(Role::Sbom)
    } else if PROVENANCE.iter().any(|prefix| predicate.starts_with(prefix)) {
        Some(Role::Provenance)
    } else if predicate == "https://cosign.sigstore.dev/attestation/vuln/v1" {
        Some(Role::VulnScan)
    } else if predicate.starts_with("https://openvex.dev/ns") {
        Some(Role::Vex)
    } else {
        None
    }
}

fn role_for_media_type(media_type: &str) -> Option<Role> {
    match media_type {
        media_types::SPDX_JSON
        | media_types::SPDX_TEXT
        | media_types::SYFT_JSON
        | media_types::COSIGN_SBOM => Some(Role::Sbom),
        media_types::COSIGN_SIMPLESIGNING | media_types::COSIGN_SIGNATURE => Some(Role::Signature),
        media_types::SARIF_JSON => Some(Role::VulnScan),
        media_types::OPENVEX_JSON => Some(Role::Vex),
        other if other.starts_with(media_types::CYCLONEDX_JSON.trim_end_matches("+json")) => {
            Some(Role::Sbom)
        }
        other if other.starts_with(media_types::SIGSTORE_BUNDLE_PREFIX) => Some(Role::Signature),
        _ => None,
    }
}

/// What a single attestation layer carries, judged by predicate then media type
pub fn layer_role(layer: &Descriptor) -> Option<Role> {
    predicate_of(&layer.annotations)
        .and_then(role_for_predicate)
        .or_else(|| role_for_media_type(&layer.media_type))
}

/// Roles of a manifest that describes another one
///
/// In-toto predicate annotations are the most specific evidence and win
/// when present. Otherwise media types of the artifact, config, and layers
/// decide. A referrer with no recognizable content is a generic attestation.
fn referrer_roles(manifest: &Manifest, hint: &EntryHint) -> RoleSet {
    let from_predicates: RoleSet = std::iter::once(&manifest.annotations)
        .chain(manifest.layers.iter().map(|layer| &layer.annotations))
        .filter_map(predicate_of)
        .filter_map(role_for_predicate)
        .collect();
    if !from_predicates.is_empty() {
        return from_predicates;
    }

    let from_media_types: RoleSet = manifest
        .artifact_type
        .iter()
        .chain(hint.artifact_type.iter())
        .chain(manifest.config.iter().map(|config| &config.media_type))
        .chain(manifest.layers.iter().map(|layer| &layer.media_type))
        .filter_map(|t| role_for_media_type(t))
        .collect();
    if !from_media_types.is_empty() {
        return from_media_types;
    }

    RoleSet::single(Role::Attestation)
}
