//! Run configuration and cloud credential profiles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WardenError};

/// Default management tag attached to every image this tool is
/// responsible for.
pub const DEFAULT_TAG: &str = "managed_by_warden";

/// Reconciliation run configuration.
///
/// Every operator toggle is an explicit field with a default; there is no
/// free-form option bag. Importer poll tuning lives here so tests can zero
/// the sleep intervals.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Log intended mutations instead of performing them.
    pub dry_run: bool,

    /// Only import the newest version of multi families.
    pub latest_only: bool,

    /// Never retire versions of non-multi families that are no longer defined.
    pub keep: bool,

    /// Process definitions even when they are disabled via `enable: false`.
    pub force: bool,

    /// Tag identifying managed images in the registry.
    pub tag: String,

    /// Optional regex restricting which definitions are processed.
    pub filter: Option<String>,

    /// Drive the `os_hidden` property on registry images.
    pub use_os_hidden: bool,

    /// Deactivate images that are eligible for deletion.
    pub deactivate: bool,

    /// Demote eligible images to "community" visibility.
    pub hide: bool,

    /// Delete outdated images (requires `confirm_delete`).
    pub delete: bool,

    /// Second, explicit confirmation for deletion.
    pub confirm_delete: bool,

    /// Compare registry build dates against the definitions.
    pub check_age: bool,

    /// Age in days beyond which an image is reported as too old.
    pub max_age_days: i64,

    /// How often a freshly created import may be observed in "queued"
    /// before it is considered stuck.
    pub queued_retries: u32,

    /// Sleep between "queued" observations.
    pub queued_interval: Duration,

    /// Sleep between observations of other non-active states.
    pub poll_interval: Duration,

    /// Upper bound on non-queued poll iterations; exceeding it fails the
    /// import for this image only.
    pub import_poll_limit: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            latest_only: false,
            keep: false,
            force: false,
            tag: DEFAULT_TAG.to_string(),
            filter: None,
            use_os_hidden: false,
            deactivate: false,
            hide: false,
            delete: false,
            confirm_delete: false,
            check_age: false,
            max_age_days: 90,
            queued_retries: 4,
            queued_interval: Duration::from_secs(2),
            poll_interval: Duration::from_secs(10),
            import_poll_limit: 360,
        }
    }
}

/// `clouds.yaml`-style credential file.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudsFile {
    pub clouds: HashMap<String, CloudProfile>,
}

/// One named cloud entry from `clouds.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudProfile {
    pub auth: CloudAuth,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
}

/// Identity service credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudAuth {
    pub auth_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub user_domain_name: Option<String>,
    #[serde(default)]
    pub project_domain_name: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl CloudsFile {
    /// Load a clouds file from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let file: CloudsFile = serde_yaml::from_str(&data)?;
        Ok(file)
    }

    /// Locate the clouds file: `OS_CLIENT_CONFIG_FILE`, `./clouds.yaml`,
    /// `~/.config/openstack/clouds.yaml`, `/etc/openstack/clouds.yaml`.
    pub fn discover() -> Result<Self> {
        for candidate in Self::candidate_paths() {
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        Err(WardenError::ConfigError(
            "no clouds.yaml found (set OS_CLIENT_CONFIG_FILE or provide ./clouds.yaml)"
                .to_string(),
        ))
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var("OS_CLIENT_CONFIG_FILE") {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("clouds.yaml"));
        if let Ok(home) = std::env::var("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("openstack")
                    .join("clouds.yaml"),
            );
        }
        paths.push(PathBuf::from("/etc/openstack/clouds.yaml"));
        paths
    }

    /// Look up a named cloud profile.
    pub fn profile(&self, name: &str) -> Result<CloudProfile> {
        self.clouds.get(name).cloned().ok_or_else(|| {
            WardenError::ConfigError(format!("cloud '{name}' not found in clouds.yaml"))
        })
    }
}

/// Build a cloud profile from `OS_*` environment variables, if set.
///
/// `OS_AUTH_URL` is the trigger; the remaining variables fill in the
/// credential fields. Mirrors the behavior of connecting without a named
/// cloud when the environment is already populated.
pub fn profile_from_env() -> Option<CloudProfile> {
    let auth_url = std::env::var("OS_AUTH_URL").ok()?;
    Some(CloudProfile {
        auth: CloudAuth {
            auth_url,
            username: std::env::var("OS_USERNAME").ok(),
            password: std::env::var("OS_PASSWORD").ok(),
            project_name: std::env::var("OS_PROJECT_NAME").ok(),
            project_id: std::env::var("OS_PROJECT_ID").ok(),
            user_domain_name: std::env::var("OS_USER_DOMAIN_NAME").ok(),
            project_domain_name: std::env::var("OS_PROJECT_DOMAIN_NAME").ok(),
            token: std::env::var("OS_TOKEN").ok(),
        },
        region_name: std::env::var("OS_REGION_NAME").ok(),
        interface: std::env::var("OS_INTERFACE").ok(),
    })
}
