//! OCI distribution API client

use crate::{
    api::{Descriptor, FetchedManifest, RegistryApi},
    errors::GraphError,
    image::{ContentDigest, ImageName, Registry, Tag},
    manifest::{media_types, Manifest},
    registry::{auth::Auth, retry::status_error, RegistryClientBuilder, RetryPolicy},
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{self, HeaderValue},
    RequestBuilder, Response, StatusCode, Url,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registry clients read and write manifests on one registry server
///
/// Each client holds its login and any bearer tokens obtained with it. Clones
/// share the token cache, so one client can be handed to many tasks.
#[derive(Clone)]
pub struct RegistryClient {
    req: reqwest::Client,
    auth: Arc<Mutex<Auth>>,
    registry: Registry,
    retry: RetryPolicy,
    allow_http_registries: bool,
}

impl RegistryClient {
    /// Construct a new registry client with default options
    pub fn new() -> Result<RegistryClient, GraphError> {
        RegistryClient::builder().build()
    }

    /// Construct a registry client with custom options, via RegistryClientBuilder
    pub fn builder() -> RegistryClientBuilder {
        RegistryClientBuilder::new()
    }

    /// Return the default `User-Agent` that we use if no other is set
    pub fn default_user_agent() -> HeaderValue {
        static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        HeaderValue::from_static(USER_AGENT)
    }

    pub(crate) fn from_parts(
        req: reqwest::Client,
        auth: Auth,
        registry: Registry,
        retry: RetryPolicy,
        allow_http_registries: bool,
    ) -> Self {
        RegistryClient {
            req,
            auth: Arc::new(Mutex::new(auth)),
            registry,
            retry,
            allow_http_registries,
        }
    }

    /// The server an image lives on
    fn registry_for(&self, image: &ImageName) -> Result<Registry, GraphError> {
        let registry = image.registry().cloned().unwrap_or_else(|| self.registry.clone());
        if !self.allow_http_registries && !registry.is_https() {
            log::warn!("registry {} not allowed by configuration", registry);
            return Err(GraphError::Config(format!(
                "registry {} would be contacted over http",
                registry
            )));
        }
        Ok(registry)
    }

    fn url(&self, registry: &Registry, image: &ImageName, path: &str) -> Result<Url, GraphError> {
        Ok(registry
            .base_url()?
            .join(&format!("v2/{}/{}", image.repository(), path))?)
    }

    /// Send a request, answering one auth challenge and retrying transient failures
    async fn send<F>(&self, registry: &Registry, url: &Url, build: F) -> Result<Response, GraphError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let build = &build;
        self.retry
            .run(url.as_str(), move || self.send_once(registry, url, build))
            .await
    }

    async fn send_once<F>(
        &self,
        registry: &Registry,
        url: &Url,
        build: &F,
    ) -> Result<Response, GraphError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let mut challenged = false;
        loop {
            let request = {
                let auth = self.auth.lock().await;
                auth.include_token(registry, build(&self.req))
            };
            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && !challenged {
                if let Some(value) = response.headers().get(header::WWW_AUTHENTICATE) {
                    let challenge = value
                        .to_str()
                        .map_err(|_| GraphError::UnsupportedAuthentication(format!("{:?}", value)))?
                        .to_owned();
                    self.auth
                        .lock()
                        .await
                        .authenticate_for(registry, &self.req, &challenge)
                        .await?;
                    challenged = true;
                    continue;
                }
            }
            if let Some(err) = status_error(response.status(), url.as_str()) {
                return Err(err);
            }
            return Ok(response);
        }
    }

    async fn get_manifest(
        &self,
        image: &ImageName,
        reference: &str,
    ) -> Result<FetchedManifest, GraphError> {
        let registry = self.registry_for(image)?;
        let url = self.url(&registry, image, &format!("manifests/{}", reference))?;
        log::info!("{} <{}> downloading manifest", image, url);
        let response = self
            .send(&registry, &url, |req| {
                req.get(url.clone())
                    .header(header::ACCEPT, media_types::ACCEPT_MANIFESTS)
            })
            .await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or("").trim().to_owned());
        let bytes = response.bytes().await?;
        log::trace!("raw json manifest, {}", String::from_utf8_lossy(&bytes));

        // Fall back to the body's own mediaType when the server is vague
        let media_type = match content_type {
            Some(t) if Manifest::is_index(&t) || Manifest::is_image_manifest(&t) => t,
            _ => Manifest::from_slice(&bytes)
                .ok()
                .and_then(|m| m.media_type)
                .unwrap_or_default(),
        };
        Ok(FetchedManifest { media_type, bytes })
    }

    /// Referrers recorded under the `sha256-<hex>` tag schema
    async fn referrers_by_tag(
        &self,
        image: &ImageName,
        subject: &ContentDigest,
    ) -> Result<Vec<Descriptor>, GraphError> {
        match self.get_manifest(image, &subject.referrers_tag()).await {
            Ok(fetched) => {
                let index = Manifest::from_slice(&fetched.bytes)?;
                Ok(index.manifests.iter().map(Descriptor::from).collect())
            }
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn resolve_tag(&self, image: &ImageName, tag: &Tag) -> Result<Descriptor, GraphError> {
        let fetched = self.get_manifest(image, tag.as_str()).await?;
        let digest = ContentDigest::from_content(&fetched.bytes);
        log::debug!("{}:{} resolved to {}", image.without_version(), tag, digest);
        Ok(Descriptor {
            digest: digest.as_str().to_owned(),
            media_type: fetched.media_type,
            size: fetched.bytes.len() as i64,
            artifact_type: None,
        })
    }

    async fn fetch_manifest(
        &self,
        image: &ImageName,
        digest: &str,
    ) -> Result<FetchedManifest, GraphError> {
        let expected = ContentDigest::parse(digest)?;
        let fetched = self.get_manifest(image, expected.as_str()).await?;
        let found = ContentDigest::from_content(&fetched.bytes);
        if found != expected {
            return Err(GraphError::ContentDigestMismatch { expected, found });
        }
        Ok(fetched)
    }

    async fn list_referrers(
        &self,
        image: &ImageName,
        subject: &str,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Descriptor>, GraphError> {
        let subject = ContentDigest::parse(subject)?;
        let registry = self.registry_for(image)?;
        let mut url = self.url(&registry, image, &format!("referrers/{}", subject))?;
        if let Some(artifact_type) = artifact_type {
            url.query_pairs_mut().append_pair("artifactType", artifact_type);
        }
        log::debug!("{} <{}> listing referrers", image, url);

        let response = self
            .send(&registry, &url, |req| {
                req.get(url.clone())
                    .header(header::ACCEPT, media_types::OCI_INDEX)
            })
            .await;
        let mut referrers = match response {
            Ok(response) => {
                let index: Manifest = serde_json::from_slice(&response.bytes().await?)?;
                index.manifests.iter().map(Descriptor::from).collect()
            }
            Err(err) if err.is_not_found() => {
                log::debug!("no referrers endpoint, trying tag {}", subject.referrers_tag());
                self.referrers_by_tag(image, &subject).await?
            }
            Err(err) => return Err(err),
        };

        if let Some(wanted) = artifact_type {
            referrers.retain(|d| d.artifact_type.as_deref() == Some(wanted));
        }
        Ok(referrers)
    }

    async fn put_manifest(
        &self,
        image: &ImageName,
        tag: &Tag,
        bytes: Bytes,
        media_type: &str,
    ) -> Result<(), GraphError> {
        let registry = self.registry_for(image)?;
        let url = self.url(&registry, image, &format!("manifests/{}", tag))?;
        log::info!("{} <{}> uploading {} byte manifest", image, url, bytes.len());
        self.send(&registry, &url, |req| {
            req.put(url.clone())
                .header(header::CONTENT_TYPE, media_type)
                .body(bytes.clone())
        })
        .await?;
        Ok(())
    }

    async fn fetch_blob(&self, image: &ImageName, digest: &str) -> Result<Bytes, GraphError> {
        let expected = ContentDigest::parse(digest)?;
        let registry = self.registry_for(image)?;
        let url = self.url(&registry, image, &format!("blobs/{}", expected))?;
        log::info!("{} <{}> downloading blob", image, url);
        let bytes = self
            .send(&registry, &url, |req| req.get(url.clone()))
            .await?
            .bytes()
            .await?;
        let found = ContentDigest::from_content(&bytes);
        if found != expected {
            return Err(GraphError::ContentDigestMismatch { expected, found });
        }
        Ok(bytes)
    }
}
