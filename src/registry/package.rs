//! GitHub packages REST API client

use crate::{
    api::{Package, PackageApi, PackagePage, VersionPage},
    config::{Credentials, OwnerKind},
    errors::GraphError,
    image::ImageName,
    registry::{retry::status_error, RegistryClient, RetryPolicy},
    versions::Version,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Method, Response, Url};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;

const PER_PAGE: &str = "100";

/// Builder for configuring custom [PackageClient] instances
pub struct PackageClientBuilder {
    credentials: Credentials,
    network: reqwest::ClientBuilder,
    api_url: Option<Url>,
    owners: HashMap<String, OwnerKind>,
    retry: RetryPolicy,
}

impl PackageClientBuilder {
    pub fn new(credentials: Credentials) -> Self {
        PackageClientBuilder {
            credentials,
            network: reqwest::Client::builder().user_agent(RegistryClient::default_user_agent()),
            api_url: None,
            owners: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Talk to a different API server, such as GitHub Enterprise
    pub fn api_url(mut self, url: Url) -> Self {
        self.api_url = Some(url);
        self
    }

    /// Skip owner type detection for an account whose type is known
    pub fn owner(mut self, name: &str, kind: OwnerKind) -> Self {
        self.owners.insert(name.to_ascii_lowercase(), kind);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.timeout(timeout);
        self
    }

    pub fn build(self) -> Result<PackageClient, GraphError> {
        let api = match self.api_url {
            Some(url) => url,
            None => Url::parse(PackageClient::DEFAULT_API_URL)?,
        };
        Ok(PackageClient {
            req: self.network.build()?,
            api,
            credentials: self.credentials,
            owners: Arc::new(Mutex::new(self.owners)),
            retry: self.retry,
        })
    }
}

/// Package clients list and delete versions through the GitHub REST API
#[derive(Clone)]
pub struct PackageClient {
    req: reqwest::Client,
    api: Url,
    credentials: Credentials,
    owners: Arc<Mutex<HashMap<String, OwnerKind>>>,
    retry: RetryPolicy,
}

impl PackageClient {
    pub const DEFAULT_API_URL: &'static str = "https://api.github.com/";

    pub fn builder(credentials: Credentials) -> PackageClientBuilder {
        PackageClientBuilder::new(credentials)
    }

    /// Is this account a user or an organization?
    ///
    /// Asked once per owner and remembered.
    pub async fn owner_kind(&self, owner: &str) -> Result<OwnerKind, GraphError> {
        let key = owner.to_ascii_lowercase();
        if let Some(kind) = self.owners.lock().await.get(&key) {
            return Ok(*kind);
        }
        let url = self.url(&["users", owner])?;
        let account: ApiAccount = self.send(Method::GET, &url).await?.json().await?;
        let kind = if account.kind == "Organization" {
            OwnerKind::Org
        } else {
            OwnerKind::User
        };
        log::info!("{} is a {}", owner, kind);
        self.owners.lock().await.insert(key, kind);
        Ok(kind)
    }

    /// Build an API URL from path segments, each percent-encoded on its own
    fn url(&self, segments: &[&str]) -> Result<Url, GraphError> {
        let mut url = self.api.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn package_url(&self, image: &ImageName, rest: &[&str]) -> Result<Url, GraphError> {
        let kind = self.owner_kind(image.owner()).await?;
        let mut segments = vec![
            kind.api_prefix(),
            image.owner(),
            "packages",
            "container",
            image.package(),
        ];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    async fn send(&self, method: Method, url: &Url) -> Result<Response, GraphError> {
        let method = &method;
        self.retry
            .run(url.as_str(), move || async move {
                log::debug!("{} {}", method, url);
                let response = self
                    .req
                    .request(method.clone(), url.clone())
                    .bearer_auth(self.credentials.token())
                    .header(header::ACCEPT, "application/vnd.github+json")
                    .header("X-GitHub-Api-Version", "2022-11-28")
                    .send()
                    .await?;
                match status_error(response.status(), url.as_str()) {
                    Some(err) => Err(err),
                    None => Ok(response),
                }
            })
            .await
    }
}

#[derive(Deserialize)]
struct ApiAccount {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ApiVersion {
    id: i64,
    /// The manifest digest
    name: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<ApiMetadata>,
}

#[derive(Deserialize)]
struct ApiMetadata {
    #[serde(default)]
    container: Option<ApiContainer>,
}

#[derive(Deserialize)]
struct ApiContainer {
    #[serde(default)]
    tags: Vec<String>,
}

impl From<ApiVersion> for Version {
    fn from(v: ApiVersion) -> Self {
        Version {
            id: Some(v.id),
            digest: v.name,
            tags: v
                .metadata
                .and_then(|m| m.container)
                .map(|c| c.tags)
                .unwrap_or_default(),
            created_at: v.created_at,
            size: 0,
        }
    }
}

/// Does a `Link` response header announce another page?
fn has_next_page(response: &Response) -> bool {
    response
        .headers()
        .get(header::LINK)
        .and_then(|value| value.to_str().ok())
        .map(link_has_next)
        .unwrap_or(false)
}

fn link_has_next(link: &str) -> bool {
    link.split(',').any(|part| part.contains("rel=\"next\""))
}

#[async_trait]
impl PackageApi for PackageClient {
    async fn list_versions(&self, image: &ImageName, page: u32) -> Result<VersionPage, GraphError> {
        let mut url = self.package_url(image, &["versions"]).await?;
        url.query_pairs_mut()
            .append_pair("per_page", PER_PAGE)
            .append_pair("page", &page.to_string());
        let response = self.send(Method::GET, &url).await?;
        let next = has_next_page(&response);
        let versions: Vec<ApiVersion> = response.json().await?;
        Ok(VersionPage {
            versions: versions.into_iter().map(Version::from).collect(),
            next_page: if next { Some(page + 1) } else { None },
        })
    }

    async fn delete_version(&self, image: &ImageName, id: i64) -> Result<(), GraphError> {
        let url = self
            .package_url(image, &["versions", &id.to_string()])
            .await?;
        log::info!("{} deleting version {}", image, id);
        self.send(Method::DELETE, &url).await?;
        Ok(())
    }

    async fn list_packages(&self, owner: &str, page: u32) -> Result<PackagePage, GraphError> {
        let kind = self.owner_kind(owner).await?;
        let mut url = self.url(&[kind.api_prefix(), owner, "packages"])?;
        url.query_pairs_mut()
            .append_pair("package_type", "container")
            .append_pair("per_page", PER_PAGE)
            .append_pair("page", &page.to_string());
        let response = self.send(Method::GET, &url).await?;
        let next = has_next_page(&response);
        let packages: Vec<Package> = response.json().await?;
        Ok(PackagePage {
            packages,
            next_page: if next { Some(page + 1) } else { None },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> PackageClient {
        PackageClient::builder(Credentials::new("t".into()))
            .owner("octo", OwnerKind::Org)
            .build()
            .unwrap()
    }

    #[test]
    fn package_names_are_one_segment() {
        let image = ImageName::parse("octo/team/app").unwrap();
        let url = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(client().package_url(&image, &["versions", "42"]))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/orgs/octo/packages/container/team%2Fapp/versions/42"
        );
    }

    #[test]
    fn versions_from_api_json() {
        let json = r#"[{
            "id": 101,
            "name": "sha256:aa",
            "created_at": "2024-05-01T12:00:00Z",
            "metadata": {"package_type": "container", "container": {"tags": ["latest", "v1"]}}
        }, {
            "id": 102,
            "name": "sha256:bb",
            "metadata": {"package_type": "container", "container": {"tags": []}}
        }]"#;
        let versions: Vec<Version> = serde_json::from_str::<Vec<ApiVersion>>(json)
            .unwrap()
            .into_iter()
            .map(Version::from)
            .collect();
        assert_eq!(versions[0].id, Some(101));
        assert_eq!(versions[0].tags, vec!["latest", "v1"]);
        assert!(versions[0].created_at.is_some());
        assert!(versions[1].is_untagged());
    }

    #[test]
    fn link_header_pagination() {
        assert!(link_has_next(
            r#"<https://api.github.com/x?page=2>; rel="next", <https://api.github.com/x?page=5>; rel="last""#
        ));
        assert!(!link_has_next(r#"<https://api.github.com/x?page=1>; rel="prev""#));
    }
}
