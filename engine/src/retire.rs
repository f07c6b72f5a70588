//! Retirement of displaced images.
//!
//! Everything carrying the management tag that no catalog entry claimed in
//! this run is a removal candidate. Candidates are walked newest-first per
//! family; their `uuid_validity` property decides how many displaced
//! versions stay untouched, and the run flags decide whether the rest are
//! hidden, deactivated, or deleted.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use warden_core::config::RunConfig;
use warden_core::definition::ImageDefinition;
use warden_core::version::natural_cmp;
use warden_core::{Result, WardenError};

use crate::registry::{ImageRegistry, RegistryImage};

/// Outcome of a retirement sweep.
#[derive(Debug, Default)]
pub struct RetireReport {
    /// Unmanaged images that were touched (or would be, in dry-run).
    pub affected: Vec<String>,
    pub errors: usize,
}

/// Retention window encoded in the `uuid_validity` property.
fn retention_window(uuid_validity: &str) -> i64 {
    match uuid_validity.strip_prefix("last:") {
        Some(count) => count.parse::<i64>().unwrap_or(1) - 1,
        None => 0,
    }
}

/// Sweep the registry for displaced images of known families.
///
/// `managed` holds every display name the reconciliation claimed; anything
/// tagged but unclaimed is a candidate. Images whose provenance cannot be
/// traced to a definition are left alone.
pub async fn retire_outdated(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    definitions: &[ImageDefinition],
    managed: &HashSet<String>,
) -> Result<RetireReport> {
    let filter = match &config.filter {
        Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
            WardenError::ConfigError(format!("invalid filter pattern '{pattern}': {e}"))
        })?),
        None => None,
    };

    let by_name: HashMap<&str, &ImageDefinition> =
        definitions.iter().map(|d| (d.name.as_str(), d)).collect();

    let snapshot = registry
        .list_images(&config.tag, config.use_os_hidden)
        .await?;

    let mut unmanaged: Vec<&String> = snapshot
        .keys()
        .filter(|name| !managed.contains(*name))
        .filter(|name| {
            filter
                .as_ref()
                .map(|f| f.is_match(name))
                .unwrap_or(true)
        })
        .collect();
    unmanaged.sort_by(|a, b| natural_cmp(b, a));

    let mut report = RetireReport::default();
    let mut counters: HashMap<String, i64> = HashMap::new();

    for name in unmanaged {
        tracing::info!(image = %name, "Processing removal candidate");
        let cloud_image = &snapshot[name];

        let family = match cloud_image.properties.get("image_description") {
            Some(family) => family.clone(),
            None => {
                tracing::warn!(image = %name, "No provenance property, image will be ignored");
                continue;
            }
        };

        let definition = match by_name.get(family.as_str()) {
            Some(definition) => *definition,
            None => {
                tracing::warn!(
                    image = %name,
                    "No image definition found, image will be ignored"
                );
                continue;
            }
        };

        // the bare family name is always the freshest import
        if &family == name {
            continue;
        }

        let counter = counters.entry(family.clone()).or_insert(0);
        *counter += 1;

        // absent property retires like any unrecognized value (window 0)
        let uuid_validity = cloud_image
            .properties
            .get("uuid_validity")
            .map(String::as_str)
            .unwrap_or("");
        let last = retention_window(uuid_validity);

        if config.keep && !definition.multi {
            tracing::info!(
                image = %name,
                "Image will not be deleted, undefined versions of defined images are kept"
            );
        } else if uuid_validity == "none" {
            tracing::info!(image = %name, "Image will not be deleted, UUID validity is 'none'");
        } else if *counter > last {
            retire_one(registry, config, definition, name, cloud_image, &mut report).await;
            report.affected.push(name.clone());
        } else {
            tracing::info!(
                image = %name,
                position = *counter,
                window = last,
                "Image is inside its retention window"
            );
            if config.hide && !config.dry_run && cloud_image.visibility != "community" {
                tracing::info!(image = %name, "Setting visibility to 'community'");
                if let Err(e) = registry.set_visibility(&cloud_image.id, "community").await {
                    tracing::error!(image = %name, error = %e, "Failed to hide image");
                    report.errors += 1;
                }
            }
            report.affected.push(name.clone());
        }
    }

    Ok(report)
}

/// Handle one candidate outside its retention window.
async fn retire_one(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    definition: &ImageDefinition,
    name: &str,
    cloud_image: &RegistryImage,
    report: &mut RetireReport,
) {
    if config.delete && config.confirm_delete && !config.dry_run {
        let result = async {
            tracing::info!(image = %name, "Deactivating image");
            registry.deactivate_image(&cloud_image.id).await?;

            tracing::info!(image = %name, "Setting visibility to 'community'");
            registry.set_visibility(&cloud_image.id, "community").await?;

            if definition.keep {
                tracing::info!(image = %name, "Image will not be deleted, 'keep' flag is set");
            } else {
                tracing::info!(image = %name, "Deleting image");
                registry.delete_image(&cloud_image.id).await?;
            }
            Ok::<(), WardenError>(())
        }
        .await;

        if let Err(e) = result {
            // deletion is best-effort; an in-use image stays behind
            tracing::info!(image = %name, error = %e, "Image cannot be deleted");
        }
    } else {
        tracing::warn!(image = %name, "Image should be deleted, but deletion is disabled");

        if config.deactivate && !config.dry_run {
            tracing::info!(image = %name, "Deactivating image");
            if let Err(e) = registry.deactivate_image(&cloud_image.id).await {
                tracing::error!(image = %name, error = %e, "Failed to deactivate image");
                report.errors += 1;
            }
        }

        if config.hide && !config.dry_run && cloud_image.visibility != "community" {
            tracing::info!(image = %name, "Setting visibility to 'community'");
            if let Err(e) = registry.set_visibility(&cloud_image.id, "community").await {
                tracing::error!(image = %name, error = %e, "Failed to hide image");
                report.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_window_parsing() {
        assert_eq!(retention_window("none"), 0);
        assert_eq!(retention_window("forever"), 0);
        assert_eq!(retention_window("last:1"), 0);
        assert_eq!(retention_window("last:3"), 2);
        assert_eq!(retention_window("last:bogus"), 0);
    }
}
