//! Image Warden core types.
//!
//! Shared building blocks for the reconciliation engine and the CLI:
//! the error taxonomy, run configuration, the declarative image
//! definition model, and natural version ordering.

pub mod config;
pub mod definition;
pub mod error;
pub mod version;

pub use config::{CloudProfile, CloudsFile, RunConfig};
pub use definition::{ImageDefinition, ImageStatus, VersionEntry, Visibility};
pub use error::{Result, WardenError};
