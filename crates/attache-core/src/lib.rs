//! # attache-core
//!
//! Core types, traits, and the geometry engine for attache.
//!
//! This crate provides the data model for file attachments on database
//! records, the image geometry calculations used to plan thumbnails, the
//! path/URL template engine, configuration loading, and the collaborator
//! traits the other attache crates implement.

pub mod config;
pub mod defaults;
pub mod error;
pub mod geometry;
pub mod interpolation;
pub mod logging;
pub mod models;
pub mod traits;

// In-memory collaborators for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export commonly used types at crate root
pub use config::{
    AttachmentDefinition, ConfigError, FogConfig, S3Config, StorageConfig, StyleDefinition,
};
pub use error::{io_error_at, Error, Result};
pub use geometry::{CropRegion, Geometry, Modifier, TransformPlan};
pub use interpolation::{InterpolationContext, Template};
pub use models::*;
pub use traits::*;
