//! Downloading the documents that attestation manifests carry

use crate::{
    api::RegistryApi,
    classify::{layer_role, Role},
    errors::GraphError,
    graph::Graph,
    image::ImageName,
    manifest::Manifest,
};

/// One attestation layer, decoded
#[derive(Clone, Debug, PartialEq)]
pub struct AttestationBody {
    /// Digest of the attestation manifest holding this layer
    pub manifest: String,
    /// Digest of the layer blob
    pub layer: String,
    pub media_type: String,
    /// The blob as JSON, or as a JSON string if it was not JSON
    pub content: serde_json::Value,
}

/// Fetch every layer of every `role` node in the graph
///
/// Layers are picked by their own predicate or media type. An attestation
/// manifest whose layers say nothing about themselves contributes all of
/// them, since the manifest as a whole was already classified as `role`.
pub async fn fetch_bodies(
    registry: &dyn RegistryApi,
    image: &ImageName,
    graph: &Graph,
    role: Role,
) -> Result<Vec<AttestationBody>, GraphError> {
    let image = image.without_version();
    let mut bodies = Vec::new();
    for node in graph.nodes().filter(|node| node.roles.contains(role)) {
        let fetched = registry.fetch_manifest(&image, node.digest()).await?;
        let manifest = Manifest::from_slice(&fetched.bytes)?;
        let mut layers: Vec<_> = manifest
            .layers
            .iter()
            .filter(|layer| layer_role(layer) == Some(role))
            .collect();
        if layers.is_empty() {
            layers = manifest.layers.iter().collect();
        }
        for layer in layers {
            log::debug!("fetching {} layer {} of {}", role, layer.digest, node.digest());
            let blob = registry.fetch_blob(&image, &layer.digest).await?;
            let content = serde_json::from_slice(&blob).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&blob).into_owned())
            });
            bodies.push(AttestationBody {
                manifest: node.digest().to_owned(),
                layer: layer.digest.clone(),
                media_type: layer.media_type.clone(),
                content,
            });
        }
    }
    if bodies.is_empty() {
        return Err(GraphError::NotFound(format!("no {} attached to {}", role, image)));
    }
    Ok(bodies)
}
