//! Alias rotation for rotating families.
//!
//! After a successful import the bare family name must point at the newest
//! payload and the displaced image must move to its version alias. The
//! rotation is planned as a pure, ordered list of operations so it can be
//! inspected and tested without a registry.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use warden_core::config::RunConfig;
use warden_core::definition::ImageDefinition;
use warden_core::{Result, WardenError};

use crate::classifier::alias_name;
use crate::registry::{ImageRegistry, RegistryImage};

/// One step of an alias rotation, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOp {
    /// Backfill the version marker before the image moves to its alias.
    SetInternalVersion { id: String, value: String },
    Rename { id: String, from: String, to: String },
}

/// Plan the rotation for `definition` after `imported` became active.
///
/// `previous` is the image that held the bare family name when the import
/// started; it is required for the single-version rotation, where the
/// displaced image's alias is derived from its own version marker.
pub fn plan_renames(
    definition: &ImageDefinition,
    sorted_versions: &[String],
    snapshot: &HashMap<String, RegistryImage>,
    imported: &RegistryImage,
    previous: Option<&RegistryImage>,
) -> Result<Vec<RenameOp>> {
    let name = &definition.name;
    let mut ops = Vec::new();

    if sorted_versions.len() > 1 {
        let latest = alias_name(definition, &sorted_versions[sorted_versions.len() - 1]);
        let previous_latest =
            alias_name(definition, &sorted_versions[sorted_versions.len() - 2]);

        if let Some(bare) = snapshot.get(name) {
            if !snapshot.contains_key(&previous_latest) {
                ops.push(RenameOp::Rename {
                    id: bare.id.clone(),
                    from: name.clone(),
                    to: previous_latest,
                });
            }
        }
        if let Some(newest) = snapshot.get(&latest) {
            ops.push(RenameOp::Rename {
                id: newest.id.clone(),
                from: latest,
                to: name.clone(),
            });
        }
    } else if snapshot.contains_key(name) {
        let previous = previous.ok_or_else(|| {
            WardenError::Other(format!(
                "cannot rotate '{name}': displaced image is unknown"
            ))
        })?;

        let marker = previous
            .properties
            .get("internal_version")
            .filter(|marker| marker.as_str() != "latest")
            .cloned();

        let alias_version = match marker {
            Some(marker) => marker,
            None => {
                // no usable marker; derive one from the creation timestamp
                let created_at = previous.created_at.as_deref().ok_or_else(|| {
                    WardenError::Other(format!(
                        "cannot rotate '{name}': displaced image has no creation date"
                    ))
                })?;
                let parsed =
                    NaiveDateTime::parse_from_str(created_at, "%Y-%m-%dT%H:%M:%SZ")
                        .map_err(|e| {
                            WardenError::Other(format!(
                                "cannot rotate '{name}': unparsable creation date: {e}"
                            ))
                        })?;
                let create_date = parsed.format("%Y%m%d").to_string();
                ops.push(RenameOp::SetInternalVersion {
                    id: previous.id.clone(),
                    value: create_date.clone(),
                });
                create_date
            }
        };

        let previous_latest = alias_name(definition, &alias_version);
        ops.push(RenameOp::Rename {
            id: previous.id.clone(),
            from: name.clone(),
            to: previous_latest,
        });
        ops.push(RenameOp::Rename {
            id: imported.id.clone(),
            from: imported.name.clone(),
            to: name.clone(),
        });
    } else {
        let latest = alias_name(definition, &sorted_versions[sorted_versions.len() - 1]);
        if let Some(newest) = snapshot.get(&latest) {
            ops.push(RenameOp::Rename {
                id: newest.id.clone(),
                from: latest,
                to: name.clone(),
            });
        }
    }

    Ok(ops)
}

/// Apply a planned rotation in order.
pub async fn apply(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    ops: &[RenameOp],
) -> Result<()> {
    for op in ops {
        match op {
            RenameOp::SetInternalVersion { id, value } => {
                tracing::info!(internal_version = %value, "Backfilling internal_version");
                if !config.dry_run {
                    registry.update_property(id, "internal_version", value).await?;
                }
            }
            RenameOp::Rename { id, from, to } => {
                tracing::info!(from = %from, to = %to, "Renaming image");
                if !config.dry_run {
                    registry.set_name(id, to).await?;
                }
            }
        }
    }
    Ok(())
}
