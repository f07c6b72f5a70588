//! In-memory registry and upstream doubles for engine tests.
//!
//! The registry records every mutating call so tests can assert both the
//! final state and that a converged run performs no writes.

// not every test binary exercises every helper
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use warden_core::{Result, WardenError};
use warden_engine::registry::{ImageMember, ImageRegistry, NewImage, RegistryImage};
use warden_engine::upstream::Upstream;

#[derive(Default)]
pub struct MockRegistry {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    images: HashMap<String, RegistryImage>,
    members: HashMap<(String, String), String>,
    calls: Vec<String>,
    next_id: usize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an image record directly.
    pub fn seed(&self, image: RegistryImage) {
        let mut state = self.state.lock().unwrap();
        state.images.insert(image.id.clone(), image);
    }

    /// All mutating calls recorded so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Current image names.
    pub fn names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> =
            state.images.values().map(|i| i.name.clone()).collect();
        names.sort();
        names
    }

    pub fn image_by_name(&self, name: &str) -> Option<RegistryImage> {
        let state = self.state.lock().unwrap();
        state.images.values().find(|i| i.name == name).cloned()
    }

    pub fn member_status(&self, image_id: &str, project_id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .members
            .get(&(image_id.to_string(), project_id.to_string()))
            .cloned()
    }

    fn record(state: &mut State, call: String) {
        state.calls.push(call);
    }

    fn modify<F>(&self, image_id: &str, call: String, f: F) -> Result<()>
    where
        F: FnOnce(&mut RegistryImage),
    {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, call);
        match state.images.get_mut(image_id) {
            Some(image) => {
                f(image);
                Ok(())
            }
            None => Err(WardenError::RegistryError {
                operation: "update".to_string(),
                message: format!("no such image '{image_id}'"),
            }),
        }
    }
}

/// Convenience builder for seeded registry images.
pub fn registry_image(id: &str, name: &str) -> RegistryImage {
    RegistryImage {
        id: id.to_string(),
        name: name.to_string(),
        status: "active".to_string(),
        visibility: "private".to_string(),
        tags: vec!["managed_by_warden".to_string()],
        properties: BTreeMap::new(),
        min_disk: 0,
        min_ram: 0,
        size: None,
        os_hidden: false,
        owner: None,
        created_at: None,
    }
}

#[async_trait]
impl ImageRegistry for MockRegistry {
    async fn list_images(
        &self,
        tag: &str,
        include_hidden: bool,
    ) -> Result<HashMap<String, RegistryImage>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .values()
            .filter(|image| image.tags.iter().any(|t| t == tag))
            .filter(|image| include_hidden || !image.os_hidden)
            .map(|image| (image.name.clone(), image.clone()))
            .collect())
    }

    async fn create_image(&self, new: &NewImage) -> Result<RegistryImage> {
        let mut state = self.state.lock().unwrap();
        let id = new.id.clone().unwrap_or_else(|| {
            state.next_id += 1;
            format!("img-{}", state.next_id)
        });
        Self::record(&mut state, format!("create_image:{}", new.name));
        let image = RegistryImage {
            id: id.clone(),
            name: new.name.clone(),
            status: "queued".to_string(),
            visibility: new.visibility.clone(),
            tags: new.tags.clone(),
            properties: BTreeMap::new(),
            min_disk: new.min_disk,
            min_ram: new.min_ram,
            size: None,
            os_hidden: false,
            owner: None,
            created_at: Some("2024-08-01T00:00:00Z".to_string()),
        };
        state.images.insert(id, image.clone());
        Ok(image)
    }

    async fn import_from_url(&self, image_id: &str, url: &str) -> Result<()> {
        self.modify(image_id, format!("import_from_url:{image_id}:{url}"), |image| {
            image.status = "active".to_string();
        })
    }

    async fn upload_file(&self, image_id: &str, path: &Path) -> Result<()> {
        self.modify(
            image_id,
            format!("upload_file:{image_id}:{}", path.display()),
            |image| {
                image.status = "active".to_string();
            },
        )
    }

    async fn get_image(&self, image_id: &str) -> Result<RegistryImage> {
        let state = self.state.lock().unwrap();
        state
            .images
            .get(image_id)
            .cloned()
            .ok_or_else(|| WardenError::RegistryError {
                operation: "get_image".to_string(),
                message: format!("no such image '{image_id}'"),
            })
    }

    async fn update_property(&self, image_id: &str, key: &str, value: &str) -> Result<()> {
        self.modify(
            image_id,
            format!("update_property:{image_id}:{key}={value}"),
            |image| {
                image
                    .properties
                    .insert(key.to_string(), value.to_string());
            },
        )
    }

    async fn set_name(&self, image_id: &str, name: &str) -> Result<()> {
        self.modify(image_id, format!("set_name:{image_id}:{name}"), |image| {
            image.name = name.to_string();
        })
    }

    async fn set_min_disk(&self, image_id: &str, gib: u64) -> Result<()> {
        self.modify(image_id, format!("set_min_disk:{image_id}:{gib}"), |image| {
            image.min_disk = gib;
        })
    }

    async fn set_min_ram(&self, image_id: &str, mib: u64) -> Result<()> {
        self.modify(image_id, format!("set_min_ram:{image_id}:{mib}"), |image| {
            image.min_ram = mib;
        })
    }

    async fn set_visibility(&self, image_id: &str, visibility: &str) -> Result<()> {
        self.modify(
            image_id,
            format!("set_visibility:{image_id}:{visibility}"),
            |image| {
                image.visibility = visibility.to_string();
            },
        )
    }

    async fn set_os_hidden(&self, image_id: &str, hidden: bool) -> Result<()> {
        self.modify(
            image_id,
            format!("set_os_hidden:{image_id}:{hidden}"),
            |image| {
                image.os_hidden = hidden;
            },
        )
    }

    async fn add_tag(&self, image_id: &str, tag: &str) -> Result<()> {
        self.modify(image_id, format!("add_tag:{image_id}:{tag}"), |image| {
            if !image.tags.iter().any(|t| t == tag) {
                image.tags.push(tag.to_string());
            }
        })
    }

    async fn remove_tag(&self, image_id: &str, tag: &str) -> Result<()> {
        self.modify(image_id, format!("remove_tag:{image_id}:{tag}"), |image| {
            image.tags.retain(|t| t != tag);
        })
    }

    async fn deactivate_image(&self, image_id: &str) -> Result<()> {
        self.modify(image_id, format!("deactivate_image:{image_id}"), |image| {
            image.status = "deactivated".to_string();
        })
    }

    async fn reactivate_image(&self, image_id: &str) -> Result<()> {
        self.modify(image_id, format!("reactivate_image:{image_id}"), |image| {
            image.status = "active".to_string();
        })
    }

    async fn delete_image(&self, image_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, format!("delete_image:{image_id}"));
        state.images.remove(image_id);
        Ok(())
    }

    async fn find_member(
        &self,
        image_id: &str,
        project_id: &str,
    ) -> Result<Option<ImageMember>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .members
            .get(&(image_id.to_string(), project_id.to_string()))
            .map(|status| ImageMember {
                member_id: project_id.to_string(),
                status: status.clone(),
            }))
    }

    async fn add_member(&self, image_id: &str, project_id: &str) -> Result<ImageMember> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, format!("add_member:{image_id}:{project_id}"));
        state
            .members
            .insert((image_id.to_string(), project_id.to_string()), "pending".to_string());
        Ok(ImageMember {
            member_id: project_id.to_string(),
            status: "pending".to_string(),
        })
    }

    async fn accept_member(&self, image_id: &str, project_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, format!("accept_member:{image_id}:{project_id}"));
        state
            .members
            .insert((image_id.to_string(), project_id.to_string()), "accepted".to_string());
        Ok(())
    }

    async fn remove_member(&self, image_id: &str, project_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::record(&mut state, format!("remove_member:{image_id}:{project_id}"));
        state
            .members
            .remove(&(image_id.to_string(), project_id.to_string()));
        Ok(())
    }
}

/// Scripted upstream: URL status codes, manifest bodies and Last-Modified
/// headers keyed by URL.
#[derive(Default)]
pub struct MockUpstream {
    pub statuses: HashMap<String, u16>,
    pub manifests: HashMap<String, String>,
    pub modified: HashMap<String, String>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn head_status(&self, url: &str) -> Result<u16> {
        Ok(*self.statuses.get(url).unwrap_or(&200))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.manifests
            .get(url)
            .cloned()
            .ok_or_else(|| WardenError::HttpError {
                url: url.to_string(),
                message: "status 404".to_string(),
            })
    }

    async fn last_modified(&self, url: &str) -> Result<Option<String>> {
        Ok(self.modified.get(url).cloned())
    }
}

/// A run configuration with all sleeps zeroed for tests.
pub fn test_config() -> warden_core::config::RunConfig {
    warden_core::config::RunConfig {
        queued_interval: std::time::Duration::ZERO,
        poll_interval: std::time::Duration::ZERO,
        ..warden_core::config::RunConfig::default()
    }
}
