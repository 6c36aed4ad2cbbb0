//! Builder for the registry client

use crate::{
    errors::GraphError,
    image::Registry,
    registry::{auth::Auth, RegistryClient, RetryPolicy},
};

use reqwest::{
    header::{HeaderMap, HeaderValue},
    Certificate, Client, ClientBuilder,
};
use std::time::Duration;

/// Builder for configuring custom [RegistryClient] instances
pub struct RegistryClientBuilder {
    auth: Auth,
    network: ClientBuilder,
    registry: Option<Registry>,
    retry: RetryPolicy,
    allow_http_registries: bool,
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        RegistryClientBuilder::new()
    }
}

impl RegistryClientBuilder {
    /// Start constructing a custom registry client
    pub fn new() -> Self {
        RegistryClientBuilder {
            network: Client::builder().user_agent(RegistryClient::default_user_agent()),
            registry: None,
            auth: Auth::new(),
            retry: RetryPolicy::default(),
            allow_http_registries: true,
        }
    }

    /// Disallow connecting to registries via HTTP
    ///
    /// Names like `localhost:5000/octo/app` are contacted over unencrypted
    /// HTTP. This setting refuses such registries instead.
    pub fn disallow_http(mut self) -> Self {
        self.allow_http_registries = false;
        self
    }

    /// Set a timeout for each network request
    ///
    /// This timeout applies from the beginning of a request until the last
    /// byte has been received. By default there is no timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.timeout(timeout);
        self
    }

    /// Set a timeout for only the initial connect phase of each network request
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.connect_timeout(timeout);
        self
    }

    /// Sets the `User-Agent` header used by this client
    ///
    /// By default, the value returned by
    /// [RegistryClient::default_user_agent()] is used.
    pub fn user_agent(mut self, value: HeaderValue) -> Self {
        self.network = self.network.user_agent(value);
        self
    }

    /// Set the default headers for every HTTP request
    pub fn default_request_headers(mut self, headers: HeaderMap) -> Self {
        self.network = self.network.default_headers(headers);
        self
    }

    /// Trust an additional root certificate
    pub fn add_root_certificate(mut self, certificate: Certificate) -> Self {
        self.network = self.network.add_root_certificate(certificate);
        self
    }

    /// Change the registry server
    ///
    /// Image names that carry their own registry still use it. The default is
    /// `ghcr.io`.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Change how failed requests are retried
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Store a username and password for use with a particular registry on this
    /// client
    pub fn login(mut self, registry: Registry, username: String, password: Option<String>) -> Self {
        self.auth.login(registry, username, password);
        self
    }

    /// Construct a RegistryClient using the parameters from this Builder
    pub fn build(self) -> Result<RegistryClient, GraphError> {
        let registry = self.registry.unwrap_or_else(Registry::ghcr);
        if !self.allow_http_registries && !registry.is_https() {
            return Err(GraphError::Config(format!(
                "registry {} would be contacted over http",
                registry
            )));
        }
        log::debug!("registry client for {}", registry);
        Ok(RegistryClient::from_parts(
            self.network.build()?,
            self.auth,
            registry,
            self.retry,
            self.allow_http_registries,
        ))
    }
}
