//! Image registry adapter.
//!
//! The reconciliation engine talks to the registry exclusively through the
//! [`ImageRegistry`] trait so the production Glance client can be swapped
//! for an in-memory recorder in tests.

mod glance;
mod keystone;

pub use glance::GlanceClient;
pub use keystone::KeystoneSession;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;

use warden_core::Result;

/// Read-only view of one registry image.
///
/// `status` stays a string because Glance moves images through transient
/// states (`queued`, `importing`, `saving`) beyond the two the definitions
/// can declare.
#[derive(Debug, Clone, Default)]
pub struct RegistryImage {
    pub id: String,
    pub name: String,
    pub status: String,
    pub visibility: String,
    pub tags: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub min_disk: u64,
    pub min_ram: u64,
    pub size: Option<u64>,
    pub os_hidden: bool,
    pub owner: Option<String>,
    pub created_at: Option<String>,
}

/// Creation request for a new registry image record.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub name: String,
    pub container_format: String,
    pub disk_format: String,
    pub min_disk: u64,
    pub min_ram: u64,
    pub tags: Vec<String>,
    pub visibility: String,
    /// Explicit UUID to assign, when the version pins one.
    pub id: Option<String>,
}

/// One image-sharing membership record.
#[derive(Debug, Clone)]
pub struct ImageMember {
    pub member_id: String,
    pub status: String,
}

/// Contract with the remote image registry.
///
/// Every mutation is a discrete call; the engine never patches its own
/// snapshot in place but re-fetches via [`list_images`] after operations
/// that change registry membership.
///
/// [`list_images`]: ImageRegistry::list_images
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Fetch all images carrying `tag`, keyed by name. With
    /// `include_hidden`, images with `os_hidden = true` are merged in.
    async fn list_images(
        &self,
        tag: &str,
        include_hidden: bool,
    ) -> Result<HashMap<String, RegistryImage>>;

    async fn create_image(&self, new: &NewImage) -> Result<RegistryImage>;

    /// Trigger a server-side web-download import into an existing record.
    async fn import_from_url(&self, image_id: &str, url: &str) -> Result<()>;

    /// Upload a local file as the image payload.
    async fn upload_file(&self, image_id: &str, path: &Path) -> Result<()>;

    async fn get_image(&self, image_id: &str) -> Result<RegistryImage>;

    /// Set a free-form property.
    async fn update_property(&self, image_id: &str, key: &str, value: &str) -> Result<()>;

    async fn set_name(&self, image_id: &str, name: &str) -> Result<()>;
    async fn set_min_disk(&self, image_id: &str, gib: u64) -> Result<()>;
    async fn set_min_ram(&self, image_id: &str, mib: u64) -> Result<()>;
    async fn set_visibility(&self, image_id: &str, visibility: &str) -> Result<()>;
    async fn set_os_hidden(&self, image_id: &str, hidden: bool) -> Result<()>;

    async fn add_tag(&self, image_id: &str, tag: &str) -> Result<()>;
    async fn remove_tag(&self, image_id: &str, tag: &str) -> Result<()>;

    async fn deactivate_image(&self, image_id: &str) -> Result<()>;
    async fn reactivate_image(&self, image_id: &str) -> Result<()>;
    async fn delete_image(&self, image_id: &str) -> Result<()>;

    async fn find_member(
        &self,
        image_id: &str,
        project_id: &str,
    ) -> Result<Option<ImageMember>>;
    async fn add_member(&self, image_id: &str, project_id: &str) -> Result<ImageMember>;
    async fn accept_member(&self, image_id: &str, project_id: &str) -> Result<()>;
    async fn remove_member(&self, image_id: &str, project_id: &str) -> Result<()>;
}
