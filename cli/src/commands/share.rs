//! `image-warden share` command.

use clap::{Args, ValueEnum};

use warden_core::config::RunConfig;
use warden_engine::share::{share_with_project, unshare_with_project};

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ShareAction {
    /// Grant access
    Add,
    /// Revoke access
    Del,
}

#[derive(Args)]
pub struct ShareArgs {
    /// Whether to grant or revoke access
    #[arg(value_enum)]
    pub action: ShareAction,

    /// Image name or UUID
    pub image: String,

    /// Target project ID
    pub project: String,

    /// Do not perform any changes
    #[arg(long)]
    pub dry_run: bool,

    /// Cloud profile name from clouds.yaml
    #[arg(long, default_value = "openstack")]
    pub cloud: String,
}

pub async fn execute(args: ShareArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = super::connect(&args.cloud).await?;
    let image = registry.resolve_image(&args.image).await?;

    let config = RunConfig {
        dry_run: args.dry_run,
        ..RunConfig::default()
    };

    match args.action {
        ShareAction::Add => {
            share_with_project(&registry, &config, &image.id, &args.project).await?
        }
        ShareAction::Del => {
            unshare_with_project(&registry, &config, &image.id, &args.project).await?
        }
    }
    Ok(())
}
