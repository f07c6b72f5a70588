//! Declarative image definition model.
//!
//! Image catalogs are YAML documents of the form `{"images": [...]}`. Each
//! entry is deserialized individually so that one malformed definition skips
//! only itself; unknown keys are rejected instead of silently ignored.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, WardenError};

/// Declared lifecycle status of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Active,
    Deactivated,
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deactivated => write!(f, "deactivated"),
        }
    }
}

/// Registry visibility of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Community,
    Shared,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Community => "community",
            Self::Shared => "shared",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_enable() -> bool {
    true
}

fn default_separator() -> String {
    " ".to_string()
}

/// One logical image family from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageDefinition {
    pub name: String,

    /// Disabled definitions are skipped unless the run forces them.
    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Blocks the final delete call during retirement.
    #[serde(default)]
    pub keep: bool,

    /// Disk format (qcow2, raw, ...).
    pub format: String,

    /// Default login user, published as `image_original_user`.
    pub login: String,

    pub status: ImageStatus,
    pub visibility: Visibility,

    /// Rolling "latest" + "previous" pair instead of one entry per version.
    #[serde(default)]
    pub multi: bool,

    #[serde(default)]
    pub min_disk: Option<u64>,
    #[serde(default)]
    pub min_ram: Option<u64>,

    /// Joins the family name and the version suffix.
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Directory prefix used by the mirror pipeline.
    #[serde(default)]
    pub shortname: Option<String>,

    /// Recognized catalog keys maintained by the upstream update tooling.
    #[serde(default)]
    pub latest_url: Option<String>,
    #[serde(default)]
    pub latest_checksum_url: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Free-form registry properties (description, distro, ...).
    #[serde(default, deserialize_with = "scalar_map")]
    pub meta: BTreeMap<String, String>,

    #[serde(default)]
    pub versions: Vec<VersionEntry>,
}

/// One published artifact of an image family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionEntry {
    /// Version identifier; the literal `"latest"` is a sentinel resolved
    /// through a checksum manifest.
    #[serde(deserialize_with = "scalar_string")]
    pub version: String,

    /// Source-of-truth download location (provenance metadata).
    pub url: String,

    /// Preferred download location, e.g. an operator-controlled mirror.
    #[serde(default)]
    pub mirror_url: Option<String>,

    /// Upstream location consumed by the mirror pipeline.
    #[serde(default)]
    pub source: Option<String>,

    /// Checksum manifest, required for the `"latest"` sentinel.
    #[serde(default)]
    pub checksums_url: Option<String>,

    /// Recorded mirror state.
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub verify_checksum: Option<String>,

    #[serde(default)]
    pub build_date: Option<chrono::NaiveDate>,

    #[serde(default)]
    pub os_version: Option<String>,

    /// Per-version visibility override.
    #[serde(default)]
    pub visibility: Option<Visibility>,

    /// Per-version `os_hidden` override.
    #[serde(default)]
    pub hidden: Option<bool>,

    /// Explicit registry UUID to assign on creation.
    #[serde(default)]
    pub id: Option<String>,

    /// Version-specific property overrides merged on top of family meta.
    #[serde(default, deserialize_with = "scalar_map")]
    pub meta: BTreeMap<String, String>,
}

impl ImageDefinition {
    /// Validate invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WardenError::DefinitionError {
                image: self.name.clone(),
                message: "name must not be empty".to_string(),
            });
        }
        if self.versions.is_empty() {
            return Err(WardenError::DefinitionError {
                image: self.name.clone(),
                message: "at least one version is required".to_string(),
            });
        }
        Ok(())
    }

    /// Inject the derived tags and default meta entries used during
    /// processing: the management tag, an `os:<distro>` tag, and
    /// `image_description` / `image_name` falling back to the family name.
    pub fn prepare(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
        if let Some(distro) = self.meta.get("os_distro") {
            let os_tag = format!("os:{distro}");
            if !self.tags.iter().any(|t| t == &os_tag) {
                self.tags.push(os_tag);
            }
        }
        if !self.meta.contains_key("image_description") {
            self.meta
                .insert("image_description".to_string(), self.name.clone());
        }
        if !self.meta.contains_key("image_name") {
            self.meta.insert("image_name".to_string(), self.name.clone());
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    images: Vec<serde_yaml::Value>,
}

/// Read every image definition below `path` (a directory of `.yml`/`.yaml`
/// files or a single file).
///
/// Returns all parseable definitions plus the number of entries that were
/// skipped because they failed deserialization; each skip is logged at the
/// point of occurrence.
pub fn load_definitions(path: &Path) -> Result<(Vec<ImageDefinition>, usize)> {
    let mut files = Vec::new();
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let p = entry.path();
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            if p.is_file() && (ext == "yml" || ext == "yaml") {
                files.push(p);
            }
        }
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }

    let mut images = Vec::new();
    let mut skipped = 0;
    for file in files {
        let data = std::fs::read_to_string(&file)?;
        let document: CatalogDocument = match serde_yaml::from_str(&data) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(file = %file.display(), error = %e, "Unreadable image file");
                skipped += 1;
                continue;
            }
        };
        for value in document.images {
            let name = value
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("<unnamed>")
                .to_string();
            match serde_yaml::from_value::<ImageDefinition>(value) {
                Ok(image) => images.push(image),
                Err(e) => {
                    tracing::error!(image = %name, error = %e, "Invalid image definition");
                    skipped += 1;
                }
            }
        }
    }
    Ok((images, skipped))
}

/// Apply the `enable`/force and name-filter selection rules.
pub fn select(
    images: &[ImageDefinition],
    filter: Option<&Regex>,
    force: bool,
) -> Vec<ImageDefinition> {
    images
        .iter()
        .filter(|image| image.enable || force)
        .filter(|image| filter.map_or(true, |re| re.is_match(&image.name)))
        .cloned()
        .collect()
}

/// Deserialize a YAML scalar (string, number, bool) into a string.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    scalar_to_string(&value).ok_or_else(|| D::Error::custom("expected a scalar value"))
}

/// Deserialize a mapping of scalars into string keys and values.
fn scalar_map<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, serde_yaml::Value> = BTreeMap::deserialize(deserializer)?;
    let mut map = BTreeMap::new();
    for (key, value) in raw {
        let text = scalar_to_string(&value)
            .ok_or_else(|| D::Error::custom(format!("meta key '{key}' must be a scalar")))?;
        map.insert(key, text);
    }
    Ok(map)
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_yaml() -> &'static str {
        r#"
images:
  - name: Ubuntu 22.04
    format: qcow2
    login: ubuntu
    status: active
    visibility: public
    multi: true
    min_disk: 8
    min_ram: 512
    meta:
      os_distro: ubuntu
      os_version: "22.04"
      uuid_validity: "last:3"
    tags: []
    versions:
      - version: "20240101"
        url: https://cloud-images.example.com/jammy-20240101.img
        build_date: 2024-01-01
"#
    }

    #[test]
    fn test_parse_minimal_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", minimal_yaml()).unwrap();
        let (images, skipped) = load_definitions(file.path()).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(images.len(), 1);

        let image = &images[0];
        assert_eq!(image.name, "Ubuntu 22.04");
        assert!(image.multi);
        assert!(image.enable);
        assert_eq!(image.separator, " ");
        assert_eq!(image.min_disk, Some(8));
        assert_eq!(image.meta.get("os_distro").map(String::as_str), Some("ubuntu"));
        assert_eq!(image.versions[0].version, "20240101");
        assert_eq!(
            image.versions[0].build_date,
            Some(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
    }

    #[test]
    fn test_numeric_version_becomes_string() {
        let yaml = r#"
images:
  - name: CirrOS
    format: qcow2
    login: cirros
    status: active
    visibility: public
    versions:
      - version: 6
        url: https://example.com/cirros.img
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", yaml).unwrap();
        let (images, _) = load_definitions(file.path()).unwrap();
        assert_eq!(images[0].versions[0].version, "6");
    }

    #[test]
    fn test_missing_required_key_skips_only_that_image() {
        let yaml = r#"
images:
  - name: Broken
    format: qcow2
    status: active
    visibility: public
    versions: []
  - name: Fine
    format: qcow2
    login: debian
    status: active
    visibility: public
    versions:
      - version: "12"
        url: https://example.com/debian.qcow2
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", yaml).unwrap();
        let (images, skipped) = load_definitions(file.path()).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "Fine");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let yaml = r#"
images:
  - name: Surprising
    format: qcow2
    login: root
    status: active
    visibility: public
    surprise: true
    versions:
      - version: "1"
        url: https://example.com/x.img
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", yaml).unwrap();
        let (images, skipped) = load_definitions(file.path()).unwrap();
        assert!(images.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_validate_requires_versions() {
        let yaml = r#"
images:
  - name: Versionless
    format: qcow2
    login: root
    status: active
    visibility: public
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", yaml).unwrap();
        let (images, _) = load_definitions(file.path()).unwrap();
        assert!(images[0].validate().is_err());
    }

    #[test]
    fn test_prepare_appends_derived_tags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", minimal_yaml()).unwrap();
        let (mut images, _) = load_definitions(file.path()).unwrap();
        let image = &mut images[0];
        image.prepare("managed_by_warden");
        assert!(image.tags.contains(&"managed_by_warden".to_string()));
        assert!(image.tags.contains(&"os:ubuntu".to_string()));
        assert_eq!(
            image.meta.get("image_description").map(String::as_str),
            Some("Ubuntu 22.04")
        );
        assert_eq!(
            image.meta.get("image_name").map(String::as_str),
            Some("Ubuntu 22.04")
        );

        // prepare is idempotent
        image.prepare("managed_by_warden");
        assert_eq!(
            image
                .tags
                .iter()
                .filter(|t| *t == "managed_by_warden")
                .count(),
            1
        );
    }

    #[test]
    fn test_select_honors_enable_and_filter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let yaml = r#"
images:
  - name: Ubuntu 22.04
    enable: false
    format: qcow2
    login: ubuntu
    status: active
    visibility: public
    versions:
      - version: "1"
        url: https://example.com/u.img
  - name: Debian 12
    format: qcow2
    login: debian
    status: active
    visibility: public
    versions:
      - version: "1"
        url: https://example.com/d.img
"#;
        write!(file, "{}", yaml).unwrap();
        let (images, _) = load_definitions(file.path()).unwrap();

        let selected = select(&images, None, false);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "Debian 12");

        let forced = select(&images, None, true);
        assert_eq!(forced.len(), 2);

        let re = Regex::new("Ubuntu").unwrap();
        let filtered = select(&images, Some(&re), true);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Ubuntu 22.04");
    }

    #[test]
    fn test_visibility_round_trip() {
        assert_eq!(Visibility::Community.to_string(), "community");
        assert_eq!(ImageStatus::Deactivated.to_string(), "deactivated");
        let v: Visibility = serde_yaml::from_str("shared").unwrap();
        assert_eq!(v, Visibility::Shared);
    }
}
