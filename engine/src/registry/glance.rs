//! Glance (Images API v2) registry client.
//!
//! Implements the [`ImageRegistry`] adapter over the REST API: tag-filtered
//! listing, record creation, web-download imports, local file uploads,
//! JSON-patch updates, tag and member operations.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use warden_core::{Result, WardenError};

use super::keystone::KeystoneSession;
use super::{ImageMember, ImageRegistry, NewImage, RegistryImage};

const PATCH_CONTENT_TYPE: &str = "application/openstack-images-v2.1-json-patch";
const PAGE_LIMIT: u32 = 500;

/// Top-level attributes of the image document; everything else is treated
/// as a free-form property.
const KNOWN_ATTRIBUTES: &[&str] = &[
    "id",
    "name",
    "status",
    "visibility",
    "tags",
    "min_disk",
    "min_ram",
    "size",
    "virtual_size",
    "owner",
    "created_at",
    "updated_at",
    "checksum",
    "container_format",
    "disk_format",
    "protected",
    "os_hidden",
    "os_hash_algo",
    "os_hash_value",
    "file",
    "schema",
    "self",
    "direct_url",
    "locations",
    "stores",
];

/// HTTP client for one authenticated Glance endpoint.
pub struct GlanceClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    project_id: Option<String>,
}

impl GlanceClient {
    pub fn new(session: KeystoneSession) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: session.image_endpoint,
            token: session.token,
            project_id: session.project_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("X-Auth-Token", &self.token)
    }

    /// Send a request and fail with a registry error carrying the response
    /// body when the status is not successful.
    async fn send(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| WardenError::RegistryError {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(WardenError::RegistryError {
            operation: operation.to_string(),
            message: format!("status {status}: {body}"),
        })
    }

    async fn json(&self, operation: &str, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = self.send(operation, builder).await?;
        response
            .json()
            .await
            .map_err(|e| WardenError::RegistryError {
                operation: operation.to_string(),
                message: format!("unreadable response: {e}"),
            })
    }

    /// Apply one JSON-patch operation to an image.
    async fn patch(&self, image_id: &str, op: &str, path: &str, value: Value) -> Result<()> {
        let body = json!([{ "op": op, "path": path, "value": value }]);
        self.send(
            "update_image",
            self.request(reqwest::Method::PATCH, &format!("/v2/images/{image_id}"))
                .header("Content-Type", PATCH_CONTENT_TYPE)
                .body(body.to_string()),
        )
        .await?;
        Ok(())
    }

    /// Keep an image when it carries the tag and is either public or owned
    /// by the authenticated project.
    fn is_visible_to_us(&self, image: &RegistryImage, tag: &str) -> bool {
        if !image.tags.iter().any(|t| t == tag) {
            return false;
        }
        image.visibility == "public"
            || self.project_id.is_none()
            || image.owner.as_deref() == self.project_id.as_deref()
    }

    /// Fetch every page of an image listing.
    async fn list_pages(&self, query: &str) -> Result<Vec<RegistryImage>> {
        let mut images = Vec::new();
        let mut path = format!("/v2/images?limit={PAGE_LIMIT}{query}");
        loop {
            let page = self
                .json("list_images", self.request(reqwest::Method::GET, &path))
                .await?;
            if let Some(items) = page["images"].as_array() {
                images.extend(items.iter().map(parse_image));
            }
            match page["next"].as_str() {
                Some(next) => path = next.to_string(),
                None => break,
            }
        }
        Ok(images)
    }

    /// Resolve a name or UUID to an image, for operations addressed from
    /// the command line (e.g. sharing).
    pub async fn resolve_image(&self, name_or_id: &str) -> Result<RegistryImage> {
        if uuid::Uuid::parse_str(name_or_id).is_ok() {
            return self.get_image(name_or_id).await;
        }
        let matches = self
            .list_pages(&format!("&name={name_or_id}"))
            .await?;
        matches
            .into_iter()
            .next()
            .ok_or_else(|| WardenError::RegistryError {
                operation: "resolve_image".to_string(),
                message: format!("no image named '{name_or_id}'"),
            })
    }
}

/// Convert one Glance image document into the adapter view.
fn parse_image(value: &Value) -> RegistryImage {
    let mut properties = BTreeMap::new();
    if let Some(object) = value.as_object() {
        for (key, val) in object {
            if KNOWN_ATTRIBUTES.contains(&key.as_str()) {
                continue;
            }
            properties.insert(key.clone(), stringify(val));
        }
    }

    RegistryImage {
        id: value["id"].as_str().unwrap_or_default().to_string(),
        name: value["name"].as_str().unwrap_or_default().to_string(),
        status: value["status"].as_str().unwrap_or_default().to_string(),
        visibility: value["visibility"].as_str().unwrap_or_default().to_string(),
        tags: value["tags"]
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        properties,
        min_disk: value["min_disk"].as_u64().unwrap_or(0),
        min_ram: value["min_ram"].as_u64().unwrap_or(0),
        size: value["size"].as_u64(),
        os_hidden: value["os_hidden"].as_bool().unwrap_or(false),
        owner: value["owner"].as_str().map(str::to_string),
        created_at: value["created_at"].as_str().map(str::to_string),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ImageRegistry for GlanceClient {
    async fn list_images(
        &self,
        tag: &str,
        include_hidden: bool,
    ) -> Result<HashMap<String, RegistryImage>> {
        let mut result = HashMap::new();

        for image in self.list_pages(&format!("&tag={tag}")).await? {
            if self.is_visible_to_us(&image, tag) {
                result.insert(image.name.clone(), image);
            } else {
                tracing::debug!(image = %image.name, "Unmanaged image");
            }
        }

        if include_hidden {
            for image in self
                .list_pages(&format!("&tag={tag}&os_hidden=true"))
                .await?
            {
                if self.is_visible_to_us(&image, tag) {
                    result.insert(image.name.clone(), image);
                } else {
                    tracing::debug!(image = %image.name, "Unmanaged hidden image");
                }
            }
        }

        Ok(result)
    }

    async fn create_image(&self, new: &NewImage) -> Result<RegistryImage> {
        let mut body = json!({
            "name": new.name,
            "container_format": new.container_format,
            "disk_format": new.disk_format,
            "min_disk": new.min_disk,
            "min_ram": new.min_ram,
            "tags": new.tags,
            "visibility": new.visibility,
        });
        if let Some(id) = &new.id {
            body["id"] = json!(id);
        }

        let value = self
            .json(
                "create_image",
                self.request(reqwest::Method::POST, "/v2/images").json(&body),
            )
            .await?;
        Ok(parse_image(&value))
    }

    async fn import_from_url(&self, image_id: &str, url: &str) -> Result<()> {
        let body = json!({
            "method": { "name": "web-download", "uri": url }
        });
        self.send(
            "import_image",
            self.request(
                reqwest::Method::POST,
                &format!("/v2/images/{image_id}/import"),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn upload_file(&self, image_id: &str, path: &Path) -> Result<()> {
        let data = tokio::fs::read(path).await?;
        self.send(
            "upload_file",
            self.request(
                reqwest::Method::PUT,
                &format!("/v2/images/{image_id}/file"),
            )
            .header("Content-Type", "application/octet-stream")
            .body(data),
        )
        .await?;
        Ok(())
    }

    async fn get_image(&self, image_id: &str) -> Result<RegistryImage> {
        let value = self
            .json(
                "get_image",
                self.request(reqwest::Method::GET, &format!("/v2/images/{image_id}")),
            )
            .await?;
        Ok(parse_image(&value))
    }

    async fn update_property(&self, image_id: &str, key: &str, value: &str) -> Result<()> {
        self.patch(image_id, "add", &format!("/{key}"), json!(value))
            .await
    }

    async fn set_name(&self, image_id: &str, name: &str) -> Result<()> {
        self.patch(image_id, "replace", "/name", json!(name)).await
    }

    async fn set_min_disk(&self, image_id: &str, gib: u64) -> Result<()> {
        self.patch(image_id, "replace", "/min_disk", json!(gib)).await
    }

    async fn set_min_ram(&self, image_id: &str, mib: u64) -> Result<()> {
        self.patch(image_id, "replace", "/min_ram", json!(mib)).await
    }

    async fn set_visibility(&self, image_id: &str, visibility: &str) -> Result<()> {
        self.patch(image_id, "replace", "/visibility", json!(visibility))
            .await
    }

    async fn set_os_hidden(&self, image_id: &str, hidden: bool) -> Result<()> {
        self.patch(image_id, "replace", "/os_hidden", json!(hidden))
            .await
    }

    async fn add_tag(&self, image_id: &str, tag: &str) -> Result<()> {
        self.send(
            "add_tag",
            self.request(
                reqwest::Method::PUT,
                &format!("/v2/images/{image_id}/tags/{tag}"),
            ),
        )
        .await?;
        Ok(())
    }

    async fn remove_tag(&self, image_id: &str, tag: &str) -> Result<()> {
        self.send(
            "remove_tag",
            self.request(
                reqwest::Method::DELETE,
                &format!("/v2/images/{image_id}/tags/{tag}"),
            ),
        )
        .await?;
        Ok(())
    }

    async fn deactivate_image(&self, image_id: &str) -> Result<()> {
        self.send(
            "deactivate_image",
            self.request(
                reqwest::Method::POST,
                &format!("/v2/images/{image_id}/actions/deactivate"),
            ),
        )
        .await?;
        Ok(())
    }

    async fn reactivate_image(&self, image_id: &str) -> Result<()> {
        self.send(
            "reactivate_image",
            self.request(
                reqwest::Method::POST,
                &format!("/v2/images/{image_id}/actions/reactivate"),
            ),
        )
        .await?;
        Ok(())
    }

    async fn delete_image(&self, image_id: &str) -> Result<()> {
        self.send(
            "delete_image",
            self.request(reqwest::Method::DELETE, &format!("/v2/images/{image_id}")),
        )
        .await?;
        Ok(())
    }

    async fn find_member(
        &self,
        image_id: &str,
        project_id: &str,
    ) -> Result<Option<ImageMember>> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/v2/images/{image_id}/members/{project_id}"),
            )
            .send()
            .await
            .map_err(|e| WardenError::RegistryError {
                operation: "find_member".to_string(),
                message: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(WardenError::RegistryError {
                operation: "find_member".to_string(),
                message: format!("status {}", response.status()),
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| WardenError::RegistryError {
                operation: "find_member".to_string(),
                message: format!("unreadable response: {e}"),
            })?;
        Ok(Some(ImageMember {
            member_id: value["member_id"].as_str().unwrap_or_default().to_string(),
            status: value["status"].as_str().unwrap_or_default().to_string(),
        }))
    }

    async fn add_member(&self, image_id: &str, project_id: &str) -> Result<ImageMember> {
        let value = self
            .json(
                "add_member",
                self.request(
                    reqwest::Method::POST,
                    &format!("/v2/images/{image_id}/members"),
                )
                .json(&json!({ "member": project_id })),
            )
            .await?;
        Ok(ImageMember {
            member_id: value["member_id"].as_str().unwrap_or_default().to_string(),
            status: value["status"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn accept_member(&self, image_id: &str, project_id: &str) -> Result<()> {
        self.send(
            "accept_member",
            self.request(
                reqwest::Method::PUT,
                &format!("/v2/images/{image_id}/members/{project_id}"),
            )
            .json(&json!({ "status": "accepted" })),
        )
        .await?;
        Ok(())
    }

    async fn remove_member(&self, image_id: &str, project_id: &str) -> Result<()> {
        self.send(
            "remove_member",
            self.request(
                reqwest::Method::DELETE,
                &format!("/v2/images/{image_id}/members/{project_id}"),
            ),
        )
        .await?;
        Ok(())
    }
}
