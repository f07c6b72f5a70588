//! Staleness detection.
//!
//! Compares the build date recorded on each managed registry image against
//! the newest build date its definition declares. Images trailing the
//! catalog by more than the allowed number of days are reported.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use warden_core::config::RunConfig;
use warden_core::definition::ImageDefinition;
use warden_core::Result;

use crate::registry::ImageRegistry;

/// Return the names of managed images older than the configured maximum.
pub async fn check_image_age(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    definitions: &[ImageDefinition],
) -> Result<BTreeSet<String>> {
    tracing::info!(max_age_days = config.max_age_days, "Checking image age");

    let by_name: HashMap<&str, &ImageDefinition> =
        definitions.iter().map(|d| (d.name.as_str(), d)).collect();

    let snapshot = registry
        .list_images(&config.tag, config.use_os_hidden)
        .await?;

    let mut too_old = BTreeSet::new();

    for (name, cloud_image) in &snapshot {
        let family = match cloud_image.properties.get("image_description") {
            Some(family) => family.as_str(),
            None => {
                tracing::warn!(image = %name, "No provenance property, image will be ignored");
                continue;
            }
        };

        let definition = match by_name.get(family) {
            Some(definition) => *definition,
            None => {
                tracing::warn!(
                    image = %family,
                    "No image definition found, image will be ignored"
                );
                continue;
            }
        };

        let recorded = match cloud_image
            .properties
            .get("image_build_date")
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        {
            Some(date) => date,
            None => {
                tracing::warn!(image = %name, "No usable build date, image will be ignored");
                continue;
            }
        };

        let declared = newest_declared_build_date(definition, cloud_image.properties.get("os_version"));
        let declared = match declared {
            Some(date) => date,
            None => {
                tracing::warn!(
                    image = %name,
                    "No compatible version definition found, image will be ignored"
                );
                continue;
            }
        };

        tracing::info!(image = %name, build_date = %recorded, "Image build date");

        let age_difference = (declared - recorded).num_days();
        if age_difference > config.max_age_days {
            tracing::warn!(
                image = %name,
                days_behind = age_difference,
                "Image is older than the newest image in the definition"
            );
            too_old.insert(name.clone());
        }
    }

    Ok(too_old)
}

/// Newest declared build date relevant to this image: any version for a
/// rotating family, only the matching version otherwise.
fn newest_declared_build_date(
    definition: &ImageDefinition,
    os_version: Option<&String>,
) -> Option<NaiveDate> {
    definition
        .versions
        .iter()
        .filter(|v| {
            definition.multi || os_version.map(|ov| &v.version == ov).unwrap_or(false)
        })
        .filter_map(|v| v.build_date)
        .max()
}
