//! Image references and image identity


mod digest;
mod name;
mod registry;
mod repository;
mod tag;
mod version;

pub use digest::ContentDigest;
pub use name::ImageName;
pub use registry::Registry;
pub use repository::{Repository, RepositoryIter};
pub use tag::Tag;
pub use version::ImageVersion;
