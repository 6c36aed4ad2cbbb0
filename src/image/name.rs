use crate::{
    errors::GraphError,
    image::{ContentDigest, ImageVersion, Registry, Repository, Tag},
};
use regex::Regex;
use std::{
    cmp::{Ordering, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    str,
    str::FromStr,
};

/// Parsed reference to a container package, optionally at one version
///
/// The accepted forms are `owner/image`, `registry/owner/image`, either one
/// followed by an optional `:tag` and an optional `@sha256:<hex>` digest, and
/// the registry form prefixed by `https://` or `http://` as copied from a
/// browser.
///
/// Delineating the optional [Registry] from the owner uses the Docker
/// heuristic: if the first path section includes any dot (.) or colon (:)
/// characters, or is exactly `localhost`, it is a registry server.
///
/// The image part may contain further slashes; only the first path segment
/// after the registry is the owner.
#[derive(Clone)]
pub struct ImageName {
    serialized: String,
    registry: Option<Registry>,
    repository: Repository,
    tag: Option<Tag>,
    digest: Option<ContentDigest>,
}

impl ImageName {
    /// Returns a reference to the existing string representation of an
    /// [ImageName]
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse an [ImageName] from its component pieces
    ///
    /// This fails if the assembled string would parse differently than
    /// intended, for example an owner that looks like a registry server.
    pub fn from_parts(
        registry: Option<&str>,
        repository: &str,
        tag: Option<&str>,
        digest: Option<&str>,
    ) -> Result<Self, GraphError> {
        let mut combined = String::new();
        if let Some(registry) = registry {
            combined.push_str(registry);
            combined.push('/');
        }
        combined.push_str(repository);
        if let Some(tag) = tag {
            combined.push(':');
            combined.push_str(tag);
        }
        if let Some(digest) = digest {
            combined.push('@');
            combined.push_str(digest);
        }
        let parsed = ImageName::parse(&combined)?;
        if parsed.as_parts() == (registry, repository, tag, digest) {
            Ok(parsed)
        } else {
            // Parsing ambiguity
            Err(GraphError::InvalidReference(combined))
        }
    }

    /// Return references to the parsed components within this [ImageName]
    pub fn as_parts(&self) -> (Option<&str>, &str, Option<&str>, Option<&str>) {
        (
            self.registry.as_ref().map(Registry::as_str),
            self.repository.as_str(),
            self.tag.as_ref().map(Tag::as_str),
            self.digest.as_ref().map(ContentDigest::as_str),
        )
    }

    /// Parse a [prim@str] as an [ImageName]
    pub fn parse(s: &str) -> Result<Self, GraphError> {
        lazy_static! {
            static ref SCHEME: Regex = Regex::new("^[hH][tT][tT][pP][sS]?://").unwrap();
            static ref HAS_REGISTRY: Regex = Regex::new(concat!(
                "^",
                "(?:", // alternatives group
                /* */ "(?:", // one option: a domain with at least one dot
                /* -- */ "(?:", // First domain component
                /* -- -- */ "[a-zA-Z0-9]|",
                /* -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
                /* -- */ ")",
                /* -- */ "(?:", // Additional domain components
                /* -- -- */ "\\.",
                /* -- -- */ "(?:",
                /* -- -- -- */ "[a-zA-Z0-9]|",
                /* -- -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
                /* -- -- */ ")",
                /* -- */ ")+",
                /* -- */ "(?::[0-9]+)?", // Optional port number
                /*  */ ")",
                /* */ "|(?:", // another option: no dots, but there's a port number
                /* -- */ "(?:",
                /* -- -- */ "[a-zA-Z0-9]|",
                /* -- -- */ "[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]",
                /* -- */ ")",
                /* -- */ "(?::[0-9]+)",
                /*  */ ")",
                /* */ "|(?:", // special case for localhost
                /* -- */ "localhost",
                /* -- */ "(?::[0-9]+)?",
                /*  */ ")",
                ")", // end of alternatives
                "/", // done matching at the first slash, which is not optional here
            ))
            .unwrap();
            static ref WITH_REGISTRY: Regex = Regex::new(&format!(
                "^{}/{}(?::{})?(?:@{})?$",
                Registry::regex_str(),
                Repository::regex_str(),
                Tag::regex_str(),
                ContentDigest::regex_str()
            ))
            .unwrap();
            static ref NO_REGISTRY: Regex = Regex::new(&format!(
                "^{}(?::{})?(?:@{})?$",
                Repository::regex_str(),
                Tag::regex_str(),
                ContentDigest::regex_str()
            ))
            .unwrap();
        }
        let invalid = || GraphError::InvalidReference(s.to_owned());

        let (body, had_scheme) = match SCHEME.find(s) {
            Some(m) => (s[m.end()..].trim_end_matches('/'), true),
            None => (s, false),
        };
        let captures = if HAS_REGISTRY.is_match(body) {
            WITH_REGISTRY.captures(body).ok_or_else(invalid)?
        } else if had_scheme {
            // A URL always starts with a server
            return Err(invalid());
        } else {
            NO_REGISTRY.captures(body).ok_or_else(invalid)?
        };

        let registry = match captures.name("reg") {
            Some(m) => Some(Registry::parse(m.as_str())?),
            None => None,
        };
        let repository = Repository::parse(captures.name("repo").ok_or_else(invalid)?.as_str())?;
        let tag = match captures.name("tag") {
            Some(m) => Some(Tag::parse(m.as_str())?),
            None => None,
        };
        let digest = match captures.name("dig") {
            Some(m) => Some(ContentDigest::parse(m.as_str())?),
            None => None,
        };
        Ok(ImageName {
            serialized: body.to_owned(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Returns the registry, if the reference named one
    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    /// Returns the registry, defaulting to `ghcr.io`
    pub fn registry_or_default(&self) -> Registry {
        self.registry.clone().unwrap_or_default()
    }

    /// Returns the registry, failing if the reference did not name one
    pub fn require_registry(&self) -> Result<&Registry, GraphError> {
        self.registry
            .as_ref()
            .ok_or_else(|| GraphError::InvalidReference(format!("{}: missing registry", self)))
    }

    /// Returns the `owner/package` path
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Returns the account that owns the package
    pub fn owner(&self) -> &str {
        self.repository.owner()
    }

    /// Returns the package name under its owner
    pub fn package(&self) -> &str {
        self.repository.package()
    }

    /// Returns the tag, if present
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Returns the tag, defaulting to `latest`
    ///
    /// Only commands that need a tag should use this default.
    pub fn tag_or_latest(&self) -> Tag {
        self.tag.clone().unwrap_or_else(Tag::latest)
    }

    /// Returns the digest, if present
    pub fn content_digest(&self) -> Option<&ContentDigest> {
        self.digest.as_ref()
    }

    /// Returns the most specific version named, if any
    ///
    /// A digest wins over a tag when both are present.
    pub fn version(&self) -> Option<ImageVersion> {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => Some(ImageVersion::ContentDigest(digest.clone())),
            (None, Some(tag)) => Some(ImageVersion::Tag(tag.clone())),
            (None, None) => None,
        }
    }

    /// Returns the most specific version named, defaulting to tag `latest`
    pub fn version_or_latest(&self) -> ImageVersion {
        self.version()
            .unwrap_or_else(|| ImageVersion::Tag(Tag::latest()))
    }

    /// The same package with no tag or digest
    pub fn without_version(&self) -> ImageName {
        ImageName {
            serialized: match &self.registry {
                Some(registry) => format!("{}/{}", registry, self.repository),
                None => self.repository.to_string(),
            },
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: None,
        }
    }
}

impl Eq for ImageName {}

impl PartialEq for ImageName {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl FromStr for ImageName {
    type Err = GraphError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Hash for ImageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl Ord for ImageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl PartialOrd for ImageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
