//! HTTP clients for the registry server and the GitHub packages API

mod auth;
mod builder;
mod client;
mod package;
mod retry;

pub use builder::RegistryClientBuilder;
pub use client::RegistryClient;
pub use package::{PackageClient, PackageClientBuilder};
pub use retry::RetryPolicy;
