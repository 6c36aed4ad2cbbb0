use crate::errors::GraphError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{
    cmp::{Ord, Ordering, PartialOrd},
    fmt,
    hash::{Hash, Hasher},
    str,
    str::FromStr,
};

/// A digest securely identifies the specific contents of a manifest or blob
///
/// Only `sha256` digests are accepted, which is the only format the container
/// registry produces.
#[derive(Clone)]
pub struct ContentDigest {
    serialized: String,
}

impl Eq for ContentDigest {}

impl PartialEq for ContentDigest {
    fn eq(&self, other: &Self) -> bool {
        self.serialized.eq(&other.serialized)
    }
}

impl FromStr for ContentDigest {
    type Err = GraphError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentDigest::parse(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Hash for ContentDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serialized.hash(state);
    }
}

impl Ord for ContentDigest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialized.cmp(&other.serialized)
    }
}

impl PartialOrd for ContentDigest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ContentDigest {
    /// Returns a reference to the existing string representation of a
    /// [ContentDigest]
    ///
    /// This is always `sha256:` followed by exactly 64 lowercase hexadecimal
    /// digits.
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Create a new ContentDigest from content data
    ///
    /// ```
    /// # use ghcrctl::ContentDigest;
    /// let digest = ContentDigest::from_content(b"cat");
    /// assert_eq!(digest.as_str(), "sha256:77af778b51abd4a3c51c5ddd97204a9c3ae614ebccb75a606c3b6865aed6744e");
    /// ```
    pub fn from_content(content_bytes: &[u8]) -> Self {
        ContentDigest {
            serialized: format!("sha256:{:x}", Sha256::digest(content_bytes)),
        }
    }

    /// Parse a [prim@str] as a [ContentDigest]
    ///
    /// ```
    /// # use ghcrctl::ContentDigest;
    /// let hex = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
    /// let digest = ContentDigest::parse(&format!("sha256:{}", hex)).unwrap();
    /// assert_eq!(digest.hex_str(), hex);
    /// assert!(ContentDigest::parse("sha512:0011").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, GraphError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(&format!("^{}$", ContentDigest::regex_str(),)).unwrap();
        }
        if RE.is_match(s) {
            Ok(ContentDigest {
                serialized: s.to_owned(),
            })
        } else {
            Err(GraphError::InvalidReference(s.to_owned()))
        }
    }

    /// Is this string a valid digest?
    pub fn is_valid(s: &str) -> bool {
        ContentDigest::parse(s).is_ok()
    }

    /// Return a reference to the hexadecimal string portion of this digest.
    pub fn hex_str(&self) -> &str {
        &self.serialized["sha256:".len()..]
    }

    /// Tag under which the referrers tag schema stores referrers of this digest
    ///
    /// Registries without a referrers endpoint keep an index of referrers
    /// under `sha256-<hex>`.
    pub fn referrers_tag(&self) -> String {
        format!("sha256-{}", self.hex_str())
    }

    pub(crate) fn regex_str() -> &'static str {
        concat!(
            "(?P<dig>", // digest group
            /*  */ "sha256", // the only format we accept
            /*  */ "[:]",
            /*  */ "(?P<dig_h>", // digest hex group
            /* -- */ "[a-f0-9]{64}",
            /*  */ ")",
            ")",
        )
    }
}
