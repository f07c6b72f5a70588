//! Version resolution.
//!
//! Flattens the version entries of one image definition into a resolved,
//! naturally-sorted view: per-version download locations, overrides, and
//! the merged metadata (version meta plus the injected `image_source` and
//! `image_build_date`). Pure, no I/O happens here.

use std::collections::BTreeMap;

use warden_core::definition::{ImageDefinition, Visibility};
use warden_core::version::natural_sorted;
use warden_core::{Result, WardenError};

/// One version of a family with all effective fields merged.
#[derive(Debug, Clone)]
pub struct ResolvedVersion {
    /// Source-of-truth download location (also published as provenance).
    pub url: String,
    /// Preferred download location for the actual fetch.
    pub mirror_url: Option<String>,
    pub checksums_url: Option<String>,
    pub visibility: Option<Visibility>,
    pub os_version: Option<String>,
    pub hidden: Option<bool>,
    pub id: Option<String>,
    /// Version meta plus `image_source` and `image_build_date`.
    pub meta: BTreeMap<String, String>,
}

impl ResolvedVersion {
    /// The URL used for the actual fetch: the mirror when configured,
    /// otherwise the upstream location.
    pub fn effective_url(&self) -> &str {
        self.mirror_url.as_deref().unwrap_or(&self.url)
    }
}

/// All versions of one family, naturally sorted ascending.
#[derive(Debug, Clone)]
pub struct ResolvedVersions {
    versions: BTreeMap<String, ResolvedVersion>,
    sorted: Vec<String>,
}

impl ResolvedVersions {
    pub fn get(&self, version: &str) -> Option<&ResolvedVersion> {
        self.versions.get(version)
    }

    /// Version identifiers in ascending natural order; the last element is
    /// the newest.
    pub fn sorted(&self) -> &[String] {
        &self.sorted
    }

    pub fn newest(&self) -> Option<&str> {
        self.sorted.last().map(String::as_str)
    }

    pub fn second_newest(&self) -> Option<&str> {
        if self.sorted.len() < 2 {
            return None;
        }
        self.sorted.get(self.sorted.len() - 2).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

/// Resolve every version entry of `definition`.
///
/// Fails the whole definition when a `"latest"` sentinel lacks its
/// `checksums_url`; that is a configuration error, not something to skip
/// silently.
pub fn resolve(definition: &ImageDefinition) -> Result<ResolvedVersions> {
    let mut versions = BTreeMap::new();

    for entry in &definition.versions {
        if entry.version == "latest" && entry.checksums_url.is_none() {
            return Err(WardenError::DefinitionError {
                image: definition.name.clone(),
                message: "key 'checksums_url' is required when using version 'latest'"
                    .to_string(),
            });
        }

        let mut meta = entry.meta.clone();
        meta.insert("image_source".to_string(), source_property(&entry.url));
        if let Some(build_date) = entry.build_date {
            meta.insert(
                "image_build_date".to_string(),
                build_date.format("%Y-%m-%d").to_string(),
            );
        }

        versions.insert(
            entry.version.clone(),
            ResolvedVersion {
                url: entry.url.clone(),
                mirror_url: entry.mirror_url.clone(),
                checksums_url: entry.checksums_url.clone(),
                visibility: entry.visibility,
                os_version: entry.os_version.clone(),
                hidden: entry.hidden,
                id: entry.id.clone(),
                meta,
            },
        );
    }

    let sorted = natural_sorted(&versions.keys().cloned().collect::<Vec<_>>());
    Ok(ResolvedVersions { versions, sorted })
}

/// The published `image_source`: `file:` URLs are stripped to their
/// basename so the registry never leaks local filesystem layout.
fn source_property(url: &str) -> String {
    if url.starts_with("file:") && url.contains('/') {
        if let Some((_, basename)) = url.rsplit_once('/') {
            return format!("file:{basename}");
        }
    }
    url.to_string()
}
