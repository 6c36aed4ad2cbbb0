use crate::errors::GraphError;
use regex::Regex;
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    str,
    str::FromStr,
};

/// Name of a container package within the registry, as `owner/package`
///
/// The first path segment is the GitHub account that owns the package. It is
/// alphanumeric with internal single dashes, and case is preserved. The
/// remaining segments name the package itself; these are lowercase
/// alphanumeric groupings separated by slashes, where each grouping may also
/// contain internal separator characters: single periods, single
/// underscores, double underscores, or any number of dashes.
#[derive(Clone)]
pub struct Repository {
    serialized: String,
    owner_len: usize,
}

/// Iterator over components of a Repository path
pub struct RepositoryIter<'a> {
    remaining: Option<&'a str>,
}

impl<'a> Iterator for RepositoryIter<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<Self::Item> {
        self.remaining.map(|remaining| match remaining.split_once('/') {
            Some((first, rest)) => {
                self.remaining = Some(rest);
                first
            }
            None => {
                self.remaining = None;
                remaining
            }
        })
    }
}

impl Repository {
    /// Returns a reference to the existing string representation of a
    /// [Repository]
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [Repository]
    ///
    /// ```
    /// # use ghcrctl::Repository;
    /// let repo = Repository::parse("octo-org/tools/builder").unwrap();
    /// assert_eq!(repo.owner(), "octo-org");
    /// assert_eq!(repo.package(), "tools/builder");
    /// assert!(Repository::parse("lonely").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, GraphError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Repository::regex_str(),)).unwrap();
        }
        match RE.captures(s) {
            None => Err(GraphError::InvalidReference(s.to_owned())),
            Some(captures) => Ok(Repository {
                serialized: s.to_owned(),
                owner_len: captures.name("owner").map(|m| m.end()).unwrap_or(0),
            }),
        }
    }

    /// Build a repository from an owner and a package name
    pub fn from_parts(owner: &str, package: &str) -> Result<Self, GraphError> {
        Repository::parse(&format!("{}/{}", owner, package))
    }

    /// The account that owns this package
    pub fn owner(&self) -> &str {
        &self.serialized[..self.owner_len]
    }

    /// The package name, which may itself contain slashes
    pub fn package(&self) -> &str {
        &self.serialized[self.owner_len + 1..]
    }

    /// Produce an iterator over the slash-separated parts of a repository path
    pub fn iter(&self) -> RepositoryIter<'_> {
        RepositoryIter {
            remaining: Some(&self.serialized),
        }
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<repo>", // Repository match group
            /*  */ "(?P<owner>", // Account name
            /* -- */ "[a-zA-Z0-9]",
            /* -- */ "(?:[-]?[a-zA-Z0-9]+)*",
            /*  */ ")",
            /*  */ "/",
            /*  */ "(?P<pkg>", // Package name, at least one component
            /* -- */ "[a-z0-9]+",
            /* -- */ "(?:",
            /* -- -- */ "(?:[._]|__|[-]*)", // allowed separators
            /* -- -- */ "[a-z0-9]+",
            /* -- */ ")*", // multiple separator groups
            /* -- */ "(?:", // Optional additional name components
            /* -- -- */ "/",
            /* -- -- */ "[a-z0-9]+",
            /* -- -- */ "(?:",
            /* -- -- -- */ "(?:[._]|__|[-]*)",
            /* -- -- -- */ "[a-z0-9]+",
            /* -- -- */ ")*",
            /* -- */ ")*",
            /*  */ ")",
            ")"
        )
    }
}

impl Eq for Repository {}

impl PartialEq for Repository {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl FromStr for Repository {
    type Err = GraphError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Repository::parse(s)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Hash for Repository {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl Ord for Repository {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl PartialOrd for Repository {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
