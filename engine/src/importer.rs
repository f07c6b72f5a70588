//! Image import.
//!
//! Creates the registry record, hands the payload over (web-download for
//! remote URLs, a direct upload for `file:` URLs) and polls until the
//! image settles in `active` state. An import that silently falls back to
//! `queued` is reported as stuck instead of waiting forever.

use std::path::Path;

use warden_core::config::RunConfig;
use warden_core::definition::ImageDefinition;
use warden_core::{Result, WardenError};

use crate::registry::{ImageRegistry, NewImage, RegistryImage};
use crate::resolver::ResolvedVersion;

/// Import one version of a family under `name`, from `url`.
///
/// Returns the active registry image. The freshly created record is
/// removed again when a local-file upload fails, so no half-imported
/// record lingers.
pub async fn import_image(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    definition: &ImageDefinition,
    name: &str,
    url: &str,
    version: &ResolvedVersion,
) -> Result<RegistryImage> {
    tracing::info!(image = %name, "Importing image");
    tracing::info!(url = %url, "Importing from URL");

    let new_image = NewImage {
        name: name.to_string(),
        container_format: "bare".to_string(),
        disk_format: definition.format.clone(),
        min_disk: definition.min_disk.unwrap_or(0),
        min_ram: definition.min_ram.unwrap_or(0),
        tags: vec![config.tag.clone()],
        visibility: "private".to_string(),
        id: version.id.clone(),
    };

    let created = registry.create_image(&new_image).await?;

    if let Some(path) = local_path(url) {
        tracing::info!(file = %path, image = %name, "Uploading local file");
        if let Err(e) = registry.upload_file(&created.id, Path::new(&path)).await {
            // drop the empty record so the next run starts clean
            if let Err(delete_err) = registry.delete_image(&created.id).await {
                tracing::error!(
                    image = %name,
                    error = %delete_err,
                    "Failed to remove record after upload failure"
                );
            }
            return Err(WardenError::ImportError {
                image: name.to_string(),
                message: format!("local file upload failed: {e}"),
            });
        }
    } else {
        registry.import_from_url(&created.id, url).await?;
    }

    wait_for_active(registry, config, &created.id, name).await
}

/// Poll the registry until the image becomes `active`.
///
/// An image stuck in `queued` beyond the configured retry budget means
/// the payload transfer never started (e.g. the web-download task API is
/// disabled server-side) and is reported as an import error.
pub async fn wait_for_active(
    registry: &dyn ImageRegistry,
    config: &RunConfig,
    id: &str,
    name: &str,
) -> Result<RegistryImage> {
    let mut queued_budget = i64::from(config.queued_retries);
    let mut polls: u32 = 0;

    loop {
        let image = registry.get_image(id).await?;
        match image.status.as_str() {
            "active" => return Ok(image),
            "queued" => {
                if queued_budget < 0 {
                    tracing::error!(image = %name, "Image seems stuck in queued state");
                    return Err(WardenError::ImportError {
                        image: name.to_string(),
                        message: "stuck in queued state".to_string(),
                    });
                }
                queued_budget -= 1;
                tracing::info!("Waiting for image to leave queued state...");
                tokio::time::sleep(config.queued_interval).await;
            }
            _ => {
                polls += 1;
                if polls > config.import_poll_limit {
                    return Err(WardenError::ImportError {
                        image: name.to_string(),
                        message: format!(
                            "import did not finish after {polls} polls (status '{}')",
                            image.status
                        ),
                    });
                }
                tracing::info!("Waiting for import to complete...");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

/// Filesystem path of a `file:` URL, `None` for remote schemes.
fn local_path(url: &str) -> Option<String> {
    let rest = url.strip_prefix("file:")?;
    Some(rest.strip_prefix("//").unwrap_or(rest).to_string())
}
