//! CLI command definitions and dispatch.

mod manage;
mod mirror;
mod share;

use clap::{Parser, Subcommand};

use warden_core::config::CloudProfile;
use warden_engine::registry::{GlanceClient, KeystoneSession};

/// Image Warden: declarative image catalog reconciliation.
#[derive(Parser)]
#[command(name = "image-warden", version, about)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Reconcile the image catalog against the registry
    Manage(manage::ManageArgs),
    /// Republish upstream images into an object store
    Mirror(mirror::MirrorArgs),
    /// Grant or revoke another project's access to an image
    Share(share::ShareArgs),
}

pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Manage(args) => manage::execute(args).await,
        Command::Mirror(args) => mirror::execute(args).await,
        Command::Share(args) => share::execute(args).await,
    }
}

/// Resolve cloud credentials (environment first, then `clouds.yaml`) and
/// open an authenticated registry client.
pub(crate) async fn connect(cloud: &str) -> Result<GlanceClient, Box<dyn std::error::Error>> {
    let profile: CloudProfile = match warden_core::config::profile_from_env() {
        Some(profile) => profile,
        None => warden_core::config::CloudsFile::discover()?.profile(cloud)?,
    };
    let session = KeystoneSession::authenticate(&profile).await?;
    Ok(GlanceClient::new(session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_manage_flags_parse() {
        let cli = Cli::try_parse_from([
            "image-warden",
            "manage",
            "--dry-run",
            "--latest",
            "--filter",
            "Ubuntu",
            "--max-age",
            "30",
        ])
        .unwrap();
        match cli.command {
            Command::Manage(args) => {
                assert!(args.dry_run);
                assert!(args.latest);
                assert_eq!(args.filter.as_deref(), Some("Ubuntu"));
                assert_eq!(args.max_age, 30);
                assert_eq!(args.tag, warden_core::config::DEFAULT_TAG);
            }
            _ => panic!("expected manage command"),
        }
    }

    #[test]
    fn test_share_requires_action_image_and_project() {
        assert!(Cli::try_parse_from(["image-warden", "share", "add", "img"]).is_err());
        let cli =
            Cli::try_parse_from(["image-warden", "share", "add", "img", "proj"]).unwrap();
        assert!(matches!(cli.command, Command::Share(_)));
    }
}
