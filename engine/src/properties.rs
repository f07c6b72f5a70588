//! Property, tag, status and visibility synchronization.
//!
//! Converges one registry image onto its declared state. Every mutation is
//! skipped when the registry already matches, so a run over a converged
//! catalog performs no writes; dry-run logs the would-be mutation instead
//! of performing it.

use std::collections::HashMap;

use chrono::DateTime;

use warden_core::config::RunConfig;
use warden_core::definition::ImageDefinition;
use warden_core::Result;

use crate::registry::{ImageRegistry, RegistryImage};
use crate::resolver::ResolvedVersions;
use crate::upstream::Upstream;

const GIB: u64 = 1 << 30;

/// Properties owned by the registry itself, never touched or reported.
fn is_reserved(property: &str) -> bool {
    matches!(property, "self" | "schema" | "stores") || property.starts_with("os_")
}

/// Converge the image called `name` onto the declared state of `version`.
///
/// `upstream_checksum` is the manifest digest resolved earlier for
/// `"latest"` sentinels; it is published so the next run can short-circuit
/// when upstream has not changed.
pub async fn synchronize(
    registry: &dyn ImageRegistry,
    upstream: &dyn Upstream,
    config: &RunConfig,
    definition: &ImageDefinition,
    name: &str,
    versions: &ResolvedVersions,
    version: &str,
    upstream_checksum: &str,
    snapshot: &HashMap<String, RegistryImage>,
) -> Result<()> {
    let cloud_image = match snapshot.get(name) {
        Some(image) => image,
        None => return Ok(()),
    };
    let resolved = match versions.get(version) {
        Some(resolved) => resolved,
        None => return Ok(()),
    };

    tracing::info!(image = %name, "Checking parameters");

    sync_sizing(registry, config, definition, cloud_image).await?;
    sync_hidden(registry, config, versions, version, cloud_image).await?;

    let mut meta = definition.meta.clone();

    if version == "latest" {
        meta.insert(
            "internal_version".to_string(),
            latest_marker(upstream, &resolved.url, definition).await,
        );
        if !upstream_checksum.is_empty() {
            meta.insert("upstream_checksum".to_string(), upstream_checksum.to_string());
        }
    } else {
        tracing::info!(internal_version = %version, "Setting internal_version");
        meta.insert("internal_version".to_string(), version.to_string());
    }

    tracing::info!(image_original_user = %definition.login, "Setting image_original_user");
    meta.insert("image_original_user".to_string(), definition.login.clone());

    if definition.multi {
        if let Some(os_version) = &resolved.os_version {
            meta.insert("os_version".to_string(), os_version.clone());
        }
    } else {
        meta.insert("os_version".to_string(), version.to_string());
    }

    sync_tags(registry, config, definition, cloud_image).await?;

    for (key, value) in &resolved.meta {
        meta.insert(key.clone(), value.clone());
    }

    sync_properties(registry, config, &meta, cloud_image).await?;
    sync_status(registry, config, definition, name, cloud_image).await?;
    sync_visibility(registry, config, definition, versions, version, name, cloud_image)
        .await?;

    Ok(())
}

/// Declared and payload-derived disk/RAM floors.
async fn sync_sizing(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    definition: &ImageDefinition,
    cloud_image: &RegistryImage,
) -> Result<()> {
    let mut current_min_disk = cloud_image.min_disk;

    if let Some(declared) = definition.min_disk {
        if declared != current_min_disk {
            tracing::info!(
                min_disk = declared,
                was = current_min_disk,
                "Setting min_disk"
            );
            if !config.dry_run {
                registry.set_min_disk(&cloud_image.id, declared).await?;
            }
            current_min_disk = declared;
        }
    }

    // the payload must always fit, whatever the catalog declares
    if let Some(size) = cloud_image.size {
        let real_size_gib = size.div_ceil(GIB);
        let needs_floor = match definition.min_disk {
            Some(declared) => real_size_gib > declared,
            None => true,
        };
        if needs_floor && real_size_gib != current_min_disk {
            tracing::info!(min_disk = real_size_gib, "Setting min_disk from payload size");
            if !config.dry_run {
                registry.set_min_disk(&cloud_image.id, real_size_gib).await?;
            }
        }
    }

    if let Some(declared) = definition.min_ram {
        if declared != cloud_image.min_ram {
            tracing::info!(min_ram = declared, was = cloud_image.min_ram, "Setting min_ram");
            if !config.dry_run {
                registry.set_min_ram(&cloud_image.id, declared).await?;
            }
        }
    }

    Ok(())
}

/// Hidden flag: per-version override first, otherwise everything but the
/// newest version is hidden. Only active when the deployment supports the
/// hidden attribute.
async fn sync_hidden(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    versions: &ResolvedVersions,
    version: &str,
    cloud_image: &RegistryImage,
) -> Result<()> {
    if !config.use_os_hidden {
        return Ok(());
    }

    let resolved = match versions.get(version) {
        Some(resolved) => resolved,
        None => return Ok(()),
    };

    let desired = match resolved.hidden {
        Some(hidden) => hidden,
        None => versions.newest() != Some(version),
    };

    if desired != cloud_image.os_hidden {
        tracing::info!(os_hidden = desired, "Setting os_hidden");
        if !config.dry_run {
            registry.set_os_hidden(&cloud_image.id, desired).await?;
        }
    }

    Ok(())
}

/// The `internal_version` marker of a `"latest"` sentinel: the upstream
/// modification date as `YYYYMMDD`, or the literal `"latest"` when the
/// header is missing or unparsable.
async fn latest_marker(
    upstream: &dyn Upstream,
    url: &str,
    definition: &ImageDefinition,
) -> String {
    let header = match upstream.last_modified(url).await {
        Ok(Some(header)) => header,
        Ok(None) | Err(_) => {
            tracing::error!(
                image = %definition.name,
                "Error when retrieving the modification date"
            );
            tracing::info!(internal_version = "latest", "Setting internal_version");
            return "latest".to_string();
        }
    };

    match DateTime::parse_from_rfc2822(&header) {
        Ok(parsed) => {
            let marker = parsed.format("%Y%m%d").to_string();
            tracing::info!(internal_version = %marker, "Setting internal_version");
            marker
        }
        Err(_) => {
            tracing::error!(
                image = %definition.name,
                "Error when retrieving the modification date"
            );
            tracing::info!(internal_version = "latest", "Setting internal_version");
            "latest".to_string()
        }
    }
}

/// Symmetric tag reconciliation: declared tags are added, stray tags
/// removed.
async fn sync_tags(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    definition: &ImageDefinition,
    cloud_image: &RegistryImage,
) -> Result<()> {
    for tag in &definition.tags {
        if !cloud_image.tags.contains(tag) {
            tracing::info!(tag = %tag, "Adding tag");
            if !config.dry_run {
                registry.add_tag(&cloud_image.id, tag).await?;
            }
        }
    }

    for tag in &cloud_image.tags {
        if !definition.tags.contains(tag) {
            tracing::info!(tag = %tag, "Deleting tag");
            if !config.dry_run {
                registry.remove_tag(&cloud_image.id, tag).await?;
            }
        }
    }

    Ok(())
}

/// Free-form property reconciliation. Orphaned registry properties are
/// reported but never deleted, so manually attached data survives a run.
async fn sync_properties(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    meta: &std::collections::BTreeMap<String, String>,
    cloud_image: &RegistryImage,
) -> Result<()> {
    for (property, current) in &cloud_image.properties {
        match meta.get(property) {
            Some(desired) => {
                if desired != current {
                    tracing::info!(
                        property = %property,
                        was = %current,
                        now = %desired,
                        "Setting property"
                    );
                    if !config.dry_run {
                        registry
                            .update_property(&cloud_image.id, property, desired)
                            .await?;
                    }
                }
            }
            None => {
                if !is_reserved(property) {
                    tracing::debug!(property = %property, "Leaving orphaned property in place");
                }
            }
        }
    }

    for (property, desired) in meta {
        if !cloud_image.properties.contains_key(property) {
            tracing::info!(property = %property, value = %desired, "Setting property");
            if !config.dry_run {
                registry
                    .update_property(&cloud_image.id, property, desired)
                    .await?;
            }
        }
    }

    Ok(())
}

async fn sync_status(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    definition: &ImageDefinition,
    name: &str,
    cloud_image: &RegistryImage,
) -> Result<()> {
    tracing::info!(image = %name, "Checking status");
    let declared = definition.status.to_string();

    if cloud_image.status != declared && declared == "deactivated" {
        tracing::info!(image = %name, "Deactivating image");
        if !config.dry_run {
            registry.deactivate_image(&cloud_image.id).await?;
        }
    } else if cloud_image.status != declared && declared == "active" {
        tracing::info!(image = %name, "Reactivating image");
        if !config.dry_run {
            registry.reactivate_image(&cloud_image.id).await?;
        }
    }

    Ok(())
}

async fn sync_visibility(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    definition: &ImageDefinition,
    versions: &ResolvedVersions,
    version: &str,
    name: &str,
    cloud_image: &RegistryImage,
) -> Result<()> {
    tracing::info!(image = %name, "Checking visibility");

    let desired = versions
        .get(version)
        .and_then(|v| v.visibility)
        .unwrap_or(definition.visibility);

    if cloud_image.visibility != desired.as_str() {
        tracing::info!(image = %name, visibility = %desired, "Setting visibility");
        if !config.dry_run {
            registry.set_visibility(&cloud_image.id, desired.as_str()).await?;
        }
    }

    Ok(())
}
