//! Existence classification.
//!
//! Decides whether a catalog version is already represented in the
//! registry. For plain families this is a direct name lookup; for
//! rotating families the newest version may live under the bare family
//! name while older ones carry an alias suffix, so presence has to be
//! derived from the alias layout.

use std::collections::HashMap;

use warden_core::config::RunConfig;
use warden_core::definition::ImageDefinition;

use crate::registry::RegistryImage;

/// The registry display name of one version of a family.
///
/// Rotating families wrap the version in parentheses because the suffix is
/// transient; plain families append it verbatim.
pub fn display_name(definition: &ImageDefinition, version: &str) -> String {
    if definition.multi {
        format!("{}{}({})", definition.name, definition.separator, version)
    } else {
        format!("{}{}{}", definition.name, definition.separator, version)
    }
}

/// Alias name of a rotated-out version, regardless of family mode.
pub fn alias_name(definition: &ImageDefinition, version: &str) -> String {
    format!("{}{}({})", definition.name, definition.separator, version)
}

/// Whether `version` already exists in the registry snapshot.
///
/// The ladder mirrors the alias rotation: when the newest version of a
/// rotating family is absent under its alias, it may still be present
/// under the bare family name (carrying `internal_version`), or implied
/// by the previous alias plus the bare name.
pub fn exists(
    definition: &ImageDefinition,
    config: &RunConfig,
    sorted_versions: &[String],
    version: &str,
    snapshot: &HashMap<String, RegistryImage>,
) -> bool {
    let name = display_name(definition, version);
    let mut existence = snapshot.contains_key(&name);

    let newest = sorted_versions.last().map(String::as_str);
    let second_newest = if sorted_versions.len() >= 2 {
        sorted_versions.get(sorted_versions.len() - 2).map(String::as_str)
    } else {
        None
    };

    if definition.multi && config.latest_only && newest == Some(version) && !existence {
        existence = snapshot.contains_key(&definition.name);
        if existence {
            match snapshot[&definition.name].properties.get("internal_version") {
                Some(internal) => existence = internal == version,
                None => {
                    // keep the bare-name presence; a missing marker is a
                    // data problem, not a missing image
                    tracing::error!(
                        image = %definition.name,
                        "Image is missing property 'internal_version'"
                    );
                }
            }
        }
    } else if definition.multi
        && sorted_versions.len() > 1
        && newest == Some(version)
        && !existence
    {
        let previous = second_newest
            .map(|v| alias_name(definition, v))
            .unwrap_or_default();
        existence =
            snapshot.contains_key(&previous) && snapshot.contains_key(&definition.name);
    } else if definition.multi
        && sorted_versions.len() > 1
        && second_newest == Some(version)
        && !existence
    {
        existence = snapshot.contains_key(&definition.name);
    } else if definition.multi && sorted_versions.len() == 1 {
        existence = snapshot.contains_key(&definition.name);
    }

    existence
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use warden_core::definition::{ImageStatus, Visibility};

    fn definition(multi: bool) -> ImageDefinition {
        ImageDefinition {
            name: "Ubuntu 24.04".to_string(),
            enable: true,
            keep: false,
            format: "qcow2".to_string(),
            login: "ubuntu".to_string(),
            status: ImageStatus::Active,
            visibility: Visibility::Public,
            multi,
            min_disk: None,
            min_ram: None,
            separator: " ".to_string(),
            shortname: None,
            latest_url: None,
            latest_checksum_url: None,
            tags: vec![],
            meta: BTreeMap::new(),
            versions: vec![],
        }
    }

    fn image(name: &str) -> RegistryImage {
        RegistryImage {
            id: format!("id-{name}"),
            name: name.to_string(),
            status: "active".to_string(),
            visibility: "public".to_string(),
            tags: vec![],
            properties: BTreeMap::new(),
            min_disk: 0,
            min_ram: 0,
            size: None,
            os_hidden: false,
            owner: None,
            created_at: None,
        }
    }

    fn snapshot(names: &[&str]) -> HashMap<String, RegistryImage> {
        names
            .iter()
            .map(|n| (n.to_string(), image(n)))
            .collect()
    }

    #[test]
    fn test_display_name_plain_and_rotating() {
        assert_eq!(
            display_name(&definition(false), "20240801"),
            "Ubuntu 24.04 20240801"
        );
        assert_eq!(
            display_name(&definition(true), "20240801"),
            "Ubuntu 24.04 (20240801)"
        );
    }

    #[test]
    fn test_plain_family_is_a_direct_lookup() {
        let def = definition(false);
        let config = RunConfig::default();
        let versions = vec!["20240801".to_string()];
        let snap = snapshot(&["Ubuntu 24.04 20240801"]);
        assert!(exists(&def, &config, &versions, "20240801", &snap));
        assert!(!exists(&def, &config, &versions, "20240901", &snap));
    }

    #[test]
    fn test_rotating_newest_implied_by_previous_alias_and_bare_name() {
        let def = definition(true);
        let config = RunConfig::default();
        let versions = vec!["20240701".to_string(), "20240801".to_string()];
        // newest lives under the bare name, previous under its alias
        let snap = snapshot(&["Ubuntu 24.04", "Ubuntu 24.04 (20240701)"]);
        assert!(exists(&def, &config, &versions, "20240801", &snap));
    }

    #[test]
    fn test_rotating_newest_missing_without_previous_alias() {
        let def = definition(true);
        let config = RunConfig::default();
        let versions = vec!["20240701".to_string(), "20240801".to_string()];
        let snap = snapshot(&["Ubuntu 24.04"]);
        assert!(!exists(&def, &config, &versions, "20240801", &snap));
    }

    #[test]
    fn test_rotating_second_newest_implied_by_bare_name() {
        let def = definition(true);
        let config = RunConfig::default();
        let versions = vec!["20240701".to_string(), "20240801".to_string()];
        let snap = snapshot(&["Ubuntu 24.04"]);
        assert!(exists(&def, &config, &versions, "20240701", &snap));
    }

    #[test]
    fn test_rotating_single_version_follows_bare_name_only() {
        let def = definition(true);
        let config = RunConfig::default();
        let versions = vec!["20240801".to_string()];
        assert!(exists(
            &def,
            &config,
            &versions,
            "20240801",
            &snapshot(&["Ubuntu 24.04"])
        ));
        assert!(!exists(
            &def,
            &config,
            &versions,
            "20240801",
            &snapshot(&["Ubuntu 24.04 (20240801)"])
        ));
    }

    #[test]
    fn test_latest_only_checks_version_marker() {
        let def = definition(true);
        let config = RunConfig {
            latest_only: true,
            ..RunConfig::default()
        };
        let versions = vec!["20240701".to_string(), "20240801".to_string()];

        let mut snap = snapshot(&["Ubuntu 24.04"]);
        snap.get_mut("Ubuntu 24.04")
            .unwrap()
            .properties
            .insert("internal_version".to_string(), "20240801".to_string());
        assert!(exists(&def, &config, &versions, "20240801", &snap));

        snap.get_mut("Ubuntu 24.04")
            .unwrap()
            .properties
            .insert("internal_version".to_string(), "20240701".to_string());
        assert!(!exists(&def, &config, &versions, "20240801", &snap));
    }

    #[test]
    fn test_latest_only_missing_marker_keeps_presence() {
        let def = definition(true);
        let config = RunConfig {
            latest_only: true,
            ..RunConfig::default()
        };
        let versions = vec!["20240801".to_string()];
        // the marker is absent; bare-name presence still counts
        let snap = snapshot(&["Ubuntu 24.04"]);
        assert!(exists(&def, &config, &versions, "20240801", &snap));
    }
}
