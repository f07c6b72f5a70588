//! Image sharing.
//!
//! Grants or revokes another project's access to a `shared` image via the
//! registry member API. Both operations are idempotent: an existing,
//! accepted membership is left alone and a missing one is nothing to
//! revoke.

use warden_core::config::RunConfig;
use warden_core::Result;

use crate::registry::ImageRegistry;

/// Share `image_id` with `project_id`, accepting the membership on the
/// target's behalf.
pub async fn share_with_project(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    image_id: &str,
    project_id: &str,
) -> Result<()> {
    let mut member = registry.find_member(image_id, project_id).await?;

    if member.is_none() {
        tracing::info!(image = %image_id, project = %project_id, "Adding member");
        if !config.dry_run {
            member = Some(registry.add_member(image_id, project_id).await?);
        }
    }

    if let Some(member) = member {
        if !config.dry_run && member.status != "accepted" {
            tracing::info!(image = %image_id, project = %project_id, "Accepting member");
            registry.accept_member(image_id, project_id).await?;
        }
    }

    Ok(())
}

/// Revoke `project_id`'s access to `image_id`.
pub async fn unshare_with_project(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    image_id: &str,
    project_id: &str,
) -> Result<()> {
    if registry.find_member(image_id, project_id).await?.is_some() {
        tracing::info!(image = %image_id, project = %project_id, "Removing member");
        if !config.dry_run {
            registry.remove_member(image_id, project_id).await?;
        }
    }

    Ok(())
}
