//! Reconciliation driver.
//!
//! Walks the catalog definition by definition, version by version: decides
//! whether a version needs an import, performs it, converges properties,
//! rotates aliases, and finally hands the set of claimed names over to the
//! retirement sweep. Failures are accumulated per run instead of aborting
//! it; one broken definition never blocks the rest of the catalog.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use regex::Regex;

use warden_core::config::RunConfig;
use warden_core::definition::{self, ImageDefinition};
use warden_core::{Result, WardenError};

use crate::age;
use crate::checksum::{filename_from_url, find_checksum};
use crate::classifier;
use crate::importer;
use crate::properties;
use crate::registry::{ImageRegistry, RegistryImage};
use crate::rename;
use crate::resolver::{self, ResolvedVersions};
use crate::retire;
use crate::upstream::Upstream;

/// Aggregated outcome of a full reconciliation run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Display names claimed by the catalog during this run.
    pub managed: HashSet<String>,
    /// Number of successful imports.
    pub imported: usize,
    /// Accumulated non-fatal failures; a non-zero count fails the process.
    pub errors: usize,
    /// Images flagged by the age check.
    pub too_old: Vec<String>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

/// Per-definition processing state.
#[derive(Debug, Default)]
struct ProcessOutcome {
    managed: HashSet<String>,
    imported: Option<RegistryImage>,
    previous: Option<RegistryImage>,
    failed: bool,
}

pub struct Reconciler<'a> {
    registry: &'a dyn ImageRegistry,
    upstream: &'a dyn Upstream,
    config: &'a RunConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        registry: &'a dyn ImageRegistry,
        upstream: &'a dyn Upstream,
        config: &'a RunConfig,
    ) -> Self {
        Self {
            registry,
            upstream,
            config,
        }
    }

    /// Run the full reconciliation over `definitions`.
    ///
    /// The returned report carries every accumulated failure; callers
    /// decide whether a dirty report fails the process.
    pub async fn run(&self, definitions: &[ImageDefinition]) -> Result<RunReport> {
        let filter = match &self.config.filter {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                WardenError::ConfigError(format!("invalid filter pattern '{pattern}': {e}"))
            })?),
            None => None,
        };

        let mut report = RunReport::default();
        let selected =
            definition::select(definitions, filter.as_ref(), self.config.force);

        for mut def in selected {
            if let Err(e) = def.validate() {
                tracing::error!(image = %def.name, error = %e, "Invalid image definition");
                report.errors += 1;
                continue;
            }
            def.prepare(&self.config.tag);

            if let Err(e) = self.process_definition(&def, &mut report).await {
                tracing::error!(image = %def.name, error = %e, "Processing failed");
                report.errors += 1;
            }
        }

        // a filtered run must not treat out-of-scope images as displaced
        if let Some(filter) = &filter {
            let snapshot = self.snapshot().await?;
            for name in snapshot.keys() {
                if !filter.is_match(name) {
                    report.managed.insert(name.clone());
                }
            }
        }

        if self.config.check_age {
            let too_old =
                age::check_image_age(self.registry, self.config, definitions).await?;
            report.errors += too_old.len();
            report.too_old = too_old.into_iter().collect();
        }

        let retired = retire::retire_outdated(
            self.registry,
            self.config,
            definitions,
            &report.managed,
        )
        .await?;
        report.errors += retired.errors;

        Ok(report)
    }

    async fn process_definition(
        &self,
        definition: &ImageDefinition,
        report: &mut RunReport,
    ) -> Result<()> {
        tracing::debug!(image = %definition.name, "Processing definition");

        let versions = resolver::resolve(definition)?;
        let outcome = self.process_image(definition, &versions).await?;

        report.managed.extend(outcome.managed.iter().cloned());
        if outcome.failed {
            report.errors += 1;
        }
        if outcome.imported.is_some() {
            report.imported += 1;
        }

        if definition.multi {
            if let Some(imported) = &outcome.imported {
                let snapshot = self.snapshot().await?;
                let ops = rename::plan_renames(
                    definition,
                    versions.sorted(),
                    &snapshot,
                    imported,
                    outcome.previous.as_ref(),
                )?;
                rename::apply(self.registry, self.config, &ops).await?;
            }
        }

        Ok(())
    }

    /// Process every version of one definition against the registry.
    async fn process_image(
        &self,
        definition: &ImageDefinition,
        versions: &ResolvedVersions,
    ) -> Result<ProcessOutcome> {
        let mut snapshot = self.snapshot().await?;
        let mut outcome = ProcessOutcome::default();
        let sorted = versions.sorted().to_vec();

        for version in &sorted {
            let name = classifier::display_name(definition, version);
            let resolved = match versions.get(version) {
                Some(resolved) => resolved,
                None => continue,
            };
            tracing::info!(image = %name, "Processing image");

            if let Some(existing) = snapshot.get(&name) {
                if existing.status != "active" {
                    importer::wait_for_active(
                        self.registry,
                        self.config,
                        &existing.id,
                        &name,
                    )
                    .await?;
                }
            }

            let mut existence =
                classifier::exists(definition, self.config, &sorted, version, &snapshot);
            let mut upstream_checksum = String::new();

            if version == "latest" {
                match self
                    .latest_checksum(definition, resolved.url.as_str(), resolved)
                    .await
                {
                    Some(checksum) => upstream_checksum = checksum,
                    None => {
                        outcome.failed = true;
                        return Ok(outcome);
                    }
                }

                let recorded = snapshot
                    .get(&definition.name)
                    .and_then(|image| image.properties.get("upstream_checksum"));
                match recorded {
                    Some(recorded) if recorded == &upstream_checksum => {
                        tracing::info!(image = %definition.name, "No new version");
                        outcome.managed.insert(definition.name.clone());
                        return Ok(outcome);
                    }
                    _ => {
                        tracing::info!(image = %definition.name, "New version");
                        existence = false;
                    }
                }
            }

            let skip_for_latest_only = self.config.latest_only
                && sorted.len() > 1
                && Some(version.as_str()) != sorted.last().map(String::as_str);

            if !existence && !skip_for_latest_only {
                let url = resolved.effective_url();

                if !self.check_source(&name, url).await {
                    outcome.failed = true;
                    return Ok(outcome);
                }

                if definition.multi {
                    if let Some(bare) = snapshot.get(&definition.name) {
                        outcome.previous = Some(bare.clone());
                    }
                }

                if self.config.dry_run {
                    tracing::info!(
                        image = %name,
                        "Skipping required import, running in dry-run mode"
                    );
                } else {
                    match importer::import_image(
                        self.registry,
                        self.config,
                        definition,
                        &name,
                        url,
                        resolved,
                    )
                    .await
                    {
                        Ok(_) => {
                            tracing::info!(image = %name, "Import completed, reloading images");
                            snapshot = self.snapshot().await?;
                            outcome.imported = snapshot.get(&name).cloned();
                        }
                        Err(e) => {
                            tracing::error!(image = %name, error = %e, "Import failed");
                            outcome.failed = true;
                        }
                    }
                }
            } else if self.config.latest_only
                && Some(version.as_str()) != sorted.last().map(String::as_str)
            {
                tracing::info!(
                    image = %name,
                    "Skipping image (only importing the latest version)"
                );
            }

            if definition.multi {
                outcome.managed.insert(definition.name.clone());
            } else {
                outcome.managed.insert(name.clone());
            }

            properties::synchronize(
                self.registry,
                self.upstream,
                self.config,
                definition,
                &name,
                versions,
                version,
                &upstream_checksum,
                &snapshot,
            )
            .await?;
        }

        Ok(outcome)
    }

    /// Resolve the manifest digest for a `"latest"` sentinel; `None` means
    /// the manifest did not yield one and the definition must be skipped.
    async fn latest_checksum(
        &self,
        definition: &ImageDefinition,
        url: &str,
        resolved: &crate::resolver::ResolvedVersion,
    ) -> Option<String> {
        let checksums_url = resolved.checksums_url.as_deref()?;
        let manifest = match self.upstream.fetch_text(checksums_url).await {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::error!(
                    image = %definition.name,
                    url = %checksums_url,
                    error = %e,
                    "Could not fetch the checksum manifest"
                );
                return None;
            }
        };

        match find_checksum(&manifest, &filename_from_url(url)) {
            Some(checksum) => Some(checksum),
            None => {
                tracing::error!(
                    image = %definition.name,
                    "Could not find checksum, check the checksums_url"
                );
                None
            }
        }
    }

    /// Verify a download source before creating any registry record.
    async fn check_source(&self, name: &str, url: &str) -> bool {
        if let Some(path) = url.strip_prefix("file:") {
            let path = path.strip_prefix("//").unwrap_or(path);
            if Path::new(path).is_file() {
                return true;
            }
            tracing::error!(image = %name, file = %path, "Skipping, file not found locally");
            return false;
        }

        match self.upstream.head_status(url).await {
            Ok(status @ (200 | 302)) => {
                tracing::info!(url = %url, status = status, "Tested URL");
                true
            }
            Ok(status) => {
                tracing::error!(url = %url, status = status, "Tested URL");
                tracing::error!(image = %name, status = status, "Skipping due to HTTP status");
                false
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "URL check failed");
                false
            }
        }
    }

    async fn snapshot(&self) -> Result<HashMap<String, RegistryImage>> {
        self.registry
            .list_images(&self.config.tag, self.config.use_os_hidden)
            .await
    }
}
