//! Adding tags to manifests that already exist
//!
//! A registry tag is created by uploading manifest bytes under the tag name.
//! Uploading the exact bytes that are already stored creates no new content,
//! so the tag lands on the existing digest.

use crate::{
    api::RegistryApi,
    errors::GraphError,
    image::{ContentDigest, ImageName, Tag},
};

/// What [add_tag] did
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TagOutcome {
    /// The tag was created
    Created,
    /// The tag already pointed at the digest
    Unchanged,
    /// The tag was moved here from another digest
    Moved { from: String },
}

/// Point `new_tag` at an existing manifest
///
/// Fails with [GraphError::Conflict] if the tag already points at a
/// different digest, unless `force` is set.
pub async fn add_tag(
    registry: &dyn RegistryApi,
    image: &ImageName,
    digest: &ContentDigest,
    new_tag: &Tag,
    force: bool,
) -> Result<TagOutcome, GraphError> {
    let image = image.without_version();
    let manifest = registry.fetch_manifest(&image, digest.as_str()).await?;

    let existing = match registry.resolve_tag(&image, new_tag).await {
        Ok(descriptor) => Some(descriptor.digest),
        Err(err) if err.is_not_found() => None,
        Err(err) => return Err(err),
    };

    let outcome = match existing {
        Some(existing) if existing == digest.as_str() => {
            log::info!("{}:{} already points at {}", image, new_tag, digest);
            return Ok(TagOutcome::Unchanged);
        }
        Some(existing) if !force => {
            return Err(GraphError::Conflict {
                tag: new_tag.as_str().to_owned(),
                existing,
                requested: digest.as_str().to_owned(),
            })
        }
        Some(existing) => {
            log::warn!("moving {}:{} from {} to {}", image, new_tag, existing, digest);
            TagOutcome::Moved { from: existing }
        }
        None => TagOutcome::Created,
    };

    registry
        .put_manifest(&image, new_tag, manifest.bytes, &manifest.media_type)
        .await?;
    log::info!("tagged {}@{} as {}", image, digest, new_tag);
    Ok(outcome)
}

/// Resolve a digest or tag argument to the digest it names
pub async fn resolve_target(
    registry: &dyn RegistryApi,
    image: &ImageName,
    target: &str,
) -> Result<ContentDigest, GraphError> {
    if target.starts_with("sha256:") {
        return ContentDigest::parse(target);
    }
    let tag = Tag::parse(target)?;
    let descriptor = registry.resolve_tag(&image.without_version(), &tag).await?;
    ContentDigest::parse(&descriptor.digest)
}
