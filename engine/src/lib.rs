//! Image Warden reconciliation engine.
//!
//! Reconciles declarative image definitions against a Glance-like image
//! registry: resolves and orders versions, classifies existence, imports
//! missing artifacts, synchronizes properties, rotates the aliases of
//! rolling "multi" families, and retires images no longer referenced by
//! any definition. Companion modules cover image sharing, build-date age
//! checks, and the upstream mirror pipeline.

pub mod age;
pub mod checksum;
pub mod classifier;
pub mod importer;
pub mod mirror;
pub mod properties;
pub mod reconcile;
pub mod registry;
pub mod rename;
pub mod resolver;
pub mod retire;
pub mod share;
pub mod upstream;

pub use mirror::{HttpObjectStore, MirrorReport, ObjectStore};
pub use reconcile::{Reconciler, RunReport};
pub use registry::{GlanceClient, ImageMember, ImageRegistry, KeystoneSession, NewImage, RegistryImage};
pub use retire::RetireReport;
pub use upstream::{HttpUpstream, Upstream};
