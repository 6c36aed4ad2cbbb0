use crate::errors::GraphError;
use regex::Regex;
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
    str,
    str::FromStr,
};
use url::Url;

/// Name of an OCI registry server
///
/// This is a domain name, with an optional port. The protocol is https,
/// except for the Docker-compatible development heuristic: a domain without
/// dots (such as `localhost:5000`) is contacted over unencrypted http.
#[derive(Clone)]
pub struct Registry {
    serialized: String,
    domain_pos: Range<usize>,
    port: Option<u16>,
    is_https: bool,
}

static GHCR_STR: &str = "ghcr.io";

impl Registry {
    /// Returns a reference to the existing string representation of a
    /// [Registry]
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// The GitHub Container Registry, used when a reference names no server
    pub fn ghcr() -> Self {
        Registry {
            serialized: GHCR_STR.to_owned(),
            domain_pos: 0..GHCR_STR.len(),
            port: None,
            is_https: true,
        }
    }

    /// Parse a [prim@str] as a [Registry]
    pub fn parse(s: &str) -> Result<Self, GraphError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Registry::regex_str(),)).unwrap();
        }
        let captures = RE
            .captures(s)
            .ok_or_else(|| GraphError::InvalidReference(s.to_owned()))?;
        let domain = captures
            .name("reg_d")
            .ok_or_else(|| GraphError::InvalidReference(s.to_owned()))?;
        let port = match captures.name("reg_p") {
            None => None,
            Some(m) => Some(
                m.as_str()
                    .parse()
                    .map_err(|_| GraphError::InvalidReference(s.to_owned()))?,
            ),
        };
        Ok(Registry {
            serialized: s.to_owned(),
            domain_pos: domain.range(),
            is_https: domain.as_str().contains('.'),
            port,
        })
    }

    /// Returns a reference to the domain portion of the string
    pub fn domain_str(&self) -> &str {
        &self.serialized[self.domain_pos.clone()]
    }

    /// Returns the port, if present
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Are we using https to connect to the registry?
    pub fn is_https(&self) -> bool {
        self.is_https
    }

    /// The protocol to use, either "http" or "https"
    pub fn protocol_str(&self) -> &str {
        if self.is_https() {
            "https"
        } else {
            "http"
        }
    }

    /// Root URL of the registry server, with a trailing slash
    pub fn base_url(&self) -> Result<Url, GraphError> {
        Ok(Url::parse(&format!("{}://{}/", self.protocol_str(), self))?)
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<reg>", // Main registry match group
            /*  */ "(?P<reg_d>", // registry domain match group
            /* -- */ "(?:", // First domain component
            /* -- -- */ "[a-zA-Z0-9]|",
            /* -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
            /* -- */ ")",
            /* -- */ "(?:", // Optional additional domain components
            /* -- -- */ "\\.",
            /* -- -- */ "(?:",
            /* -- -- -- */ "[a-zA-Z0-9]|",
            /* -- -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
            /* -- -- */ ")",
            /* -- */ ")*",
            /*  */ ")", // end registry domain match group
            /*  */ "(?:", // Optional port number
            /* -- */ "[:]",
            /* -- */ "(?P<reg_p>", // Registry port group
            /* -- -- */ "[0-9]+",
            /* -- */ ")",
            /*  */ ")?",
            ")",
        )
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::ghcr()
    }
}

impl Eq for Registry {}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl FromStr for Registry {
    type Err = GraphError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Registry::parse(s)
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Hash for Registry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl Ord for Registry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl PartialOrd for Registry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
