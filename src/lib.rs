//! Graph-aware administration of container packages on the GitHub Container
//! Registry
//!
//! A single `docker buildx build --push` leaves several package versions
//! behind: an image index, one manifest per platform, and attestations. The
//! package view lists them as unrelated rows, while the registry view knows
//! how they link but not their version IDs. This crate merges both into a
//! [graph::Graph], classifies every node, works out which nodes make up
//! each image, and deletes whole images without touching anything another
//! image still needs.

#[macro_use] extern crate lazy_static;

pub mod api;
pub mod attestation;
pub mod classify;
pub mod config;
pub mod errors;
pub mod graph;
pub mod image;
pub mod manifest;
pub mod present;
pub mod registry;
pub mod tagger;
pub mod versions;

pub use crate::{
    classify::{Role, RoleSet},
    errors::GraphError,
    graph::{DeletionPlan, Graph, GraphBuilder, Scope},
    image::{ContentDigest, ImageName, Repository, Tag},
};
