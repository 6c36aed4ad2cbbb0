use crate::{errors::GraphError, image::Registry};
use regex::Regex;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use std::collections::HashMap;

/// Credentials and cached bearer tokens, per registry server
#[derive(Clone, Default)]
pub struct Auth {
    logins: HashMap<Registry, Login>,
    tokens: HashMap<Registry, Token>,
}

#[derive(Clone)]
struct Login {
    username: String,
    password: Option<String>,
}

impl Auth {
    pub fn new() -> Self {
        Auth::default()
    }

    pub fn login(&mut self, registry: Registry, username: String, password: Option<String>) {
        self.logins.insert(registry, Login { username, password });
    }

    pub fn include_token(&self, registry: &Registry, req: RequestBuilder) -> RequestBuilder {
        match self.tokens.get(registry) {
            Some(token_struct) => {
                log::trace!("using token for {}", registry);
                req.bearer_auth(&token_struct.token)
            }
            None => req,
        }
    }

    /// Answer a `WWW-Authenticate: Bearer` challenge and keep the token
    ///
    /// The token replaces any earlier one for the same registry, since the
    /// challenge scope (pull, or pull and push) is whatever the failed
    /// request needed.
    ///
    /// Reference: <https://docs.docker.com/registry/spec/auth/token/>
    pub async fn authenticate_for(
        &mut self,
        registry: &Registry,
        req: &reqwest::Client,
        auth_header: &str,
    ) -> Result<(), GraphError> {
        let challenge = BearerChallenge::parse(auth_header)?;
        log::debug!("login challenge for {}, {:?}", registry, challenge);
        let mut query = vec![("service", challenge.service)];
        if let Some(scope) = challenge.scope {
            query.push(("scope", scope));
        }
        let req = req.get(challenge.realm).query(&query);
        let req = match self.logins.get(registry) {
            Some(login) => req.basic_auth(&login.username, login.password.as_ref()),
            None => req,
        };
        let response = req.send().await?;
        if let Some(err) = super::retry::status_error(response.status(), response.url().as_str()) {
            return Err(err);
        }
        let token: Token = response.json().await?;
        log::debug!("received token for {}", registry);
        self.tokens.insert(registry.clone(), token);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BearerChallenge {
    realm: Url,
    service: String,
    scope: Option<String>,
}

#[derive(Clone, Deserialize)]
struct Token {
    #[serde(alias = "access_token")]
    token: String,
}

impl BearerChallenge {
    fn parse(auth_header: &str) -> Result<Self, GraphError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(concat!(
                "^[ \\t]*",
                "[Bb][Ee][Aa][Rr][Ee][Rr]", // Case-insensitive challenge type
                "(?:",           // multiple unordered parameters
                /* */ "[ \\t]*",
                /* */ "(?:",     // alternative group for the parameters
                /* -- */ "(?:",  // parameter: service
                /* -- -- */ "service=",
                /* -- -- */ "\"(?P<service>",
                /* -- -- -- */ r"[\x20-\x21\x23-\x5B\x5D-\x7E]*", // allowed chars from RFC 6750
                /* -- -- */ ")\"",
                /* -- */ ")|",
                /* -- */ "(?:",  // parameter: scope
                /* -- -- */ "scope=",
                /* -- -- */ "\"(?P<scope>",
                /* -- -- -- */ r"[\x20-\x21\x23-\x5B\x5D-\x7E]*", // allowed chars from RFC 6750
                /* -- -- */ ")\"",
                /* -- */ ")|",
                /* -- */ "(?:",  // parameter: realm
                /* -- -- */ "realm=",
                /* -- -- */ "\"(?P<realm>", // capture quoted string
                /* -- -- -- */ "https://",  // require auth server to be https
                /* -- -- -- */ "[-_.+a-zA-Z:0-9/]+",
                /* -- -- */ ")\"",
                /* -- */ ")",
                /* */ ")",
                /* */ ",?",      // to keep the parser regular, commas are all optional *shrug*
                ")*$",
            )).unwrap();
        }
        match RE.captures(auth_header).map(|captures| {
            (
                captures.name("service").map(|m| m.as_str().to_owned()),
                captures.name("scope").map(|m| m.as_str().to_owned()),
                captures.name("realm").map(|m| m.as_str().parse::<Url>()),
            )
        }) {
            Some((Some(service), scope, Some(Ok(realm)))) => Ok(BearerChallenge {
                realm,
                service,
                scope,
            }),
            _ => Err(GraphError::UnsupportedAuthentication(
                auth_header.to_string(),
            )),
        }
    }
}
