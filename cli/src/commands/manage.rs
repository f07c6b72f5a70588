//! `image-warden manage` command.

use std::path::Path;

use clap::Args;

use warden_core::config::{RunConfig, DEFAULT_TAG};
use warden_core::definition::load_definitions;
use warden_engine::{HttpUpstream, Reconciler};

#[derive(Args)]
pub struct ManageArgs {
    /// Do not perform any changes
    #[arg(long)]
    pub dry_run: bool,

    /// Only import the latest version of images of type multi
    #[arg(long)]
    pub latest: bool,

    /// Keep versions of defined images that are no longer in the catalog
    #[arg(long)]
    pub keep: bool,

    /// Cloud profile name from clouds.yaml
    #[arg(long, default_value = "openstack")]
    pub cloud: String,

    /// Path to the image definition file or directory
    #[arg(long, default_value = "etc/images")]
    pub images: String,

    /// Tag identifying managed images
    #[arg(long, default_value = DEFAULT_TAG)]
    pub tag: String,

    /// Regex restricting which image definitions are processed
    #[arg(long)]
    pub filter: Option<String>,

    /// Process definitions that are disabled via 'enable: false'
    #[arg(long)]
    pub force: bool,

    /// Deactivate images eligible for deletion
    #[arg(long)]
    pub deactivate: bool,

    /// Demote images eligible for deletion to 'community' visibility
    #[arg(long)]
    pub hide: bool,

    /// Delete outdated images (requires --yes-i-really-know-what-i-do)
    #[arg(long)]
    pub delete: bool,

    /// Confirm that deletion is really intended
    #[arg(long)]
    pub yes_i_really_know_what_i_do: bool,

    /// Drive the os_hidden attribute on registry images
    #[arg(long)]
    pub use_os_hidden: bool,

    /// Compare registry build dates against the definitions
    #[arg(long)]
    pub check_age: bool,

    /// Age in days beyond which an image is reported as too old
    #[arg(long, default_value_t = 90)]
    pub max_age: i64,
}

impl ManageArgs {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            dry_run: self.dry_run,
            latest_only: self.latest,
            keep: self.keep,
            force: self.force,
            tag: self.tag.clone(),
            filter: self.filter.clone(),
            use_os_hidden: self.use_os_hidden,
            deactivate: self.deactivate,
            hide: self.hide,
            delete: self.delete,
            confirm_delete: self.yes_i_really_know_what_i_do,
            check_age: self.check_age,
            max_age_days: self.max_age,
            ..RunConfig::default()
        }
    }
}

pub async fn execute(args: ManageArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!(cloud = %args.cloud, images = %args.images, tag = %args.tag, "Starting run");

    let config = args.run_config();
    let (definitions, skipped) = load_definitions(Path::new(&args.images))?;
    if skipped > 0 {
        tracing::warn!(skipped = skipped, "Some image definitions could not be read");
    }

    let registry = super::connect(&args.cloud).await?;
    let upstream = HttpUpstream::new();

    let report = Reconciler::new(&registry, &upstream, &config)
        .run(&definitions)
        .await?;

    tracing::info!(
        imported = report.imported,
        managed = report.managed.len(),
        errors = report.errors,
        "Run finished"
    );

    if !report.is_clean() {
        return Err(
            "one or more errors occurred during the run, please check the output".into(),
        );
    }
    Ok(())
}
