use crate::{
    errors::GraphError,
    image::{ContentDigest, Tag},
};
use std::{
    cmp::{Ord, PartialOrd},
    fmt,
    hash::Hash,
    str,
    str::FromStr,
};

/// Either an image tag or a content digest
///
/// Command arguments that select one manifest accept either form, so a
/// string is a digest when it parses as `sha256:<hex>` and a tag otherwise.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ImageVersion {
    Tag(Tag),
    ContentDigest(ContentDigest),
}

impl ImageVersion {
    /// Returns a reference to the existing string representation of an
    /// [ImageVersion]
    pub fn as_str(&self) -> &str {
        match self {
            ImageVersion::Tag(tag) => tag.as_str(),
            ImageVersion::ContentDigest(content_digest) => content_digest.as_str(),
        }
    }

    /// Parse a [prim@str] as an [ImageVersion]
    pub fn parse(s: &str) -> Result<Self, GraphError> {
        if s.contains(':') {
            Ok(ImageVersion::ContentDigest(ContentDigest::parse(s)?))
        } else {
            Ok(ImageVersion::Tag(Tag::parse(s)?))
        }
    }

    /// Is this version a content digest?
    pub fn is_content_digest(&self) -> bool {
        matches!(self, ImageVersion::ContentDigest(_))
    }
}

impl From<Tag> for ImageVersion {
    fn from(tag: Tag) -> Self {
        ImageVersion::Tag(tag)
    }
}

impl From<ContentDigest> for ImageVersion {
    fn from(digest: ContentDigest) -> Self {
        ImageVersion::ContentDigest(digest)
    }
}

impl FromStr for ImageVersion {
    type Err = GraphError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageVersion::parse(s)
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
