//! `image-warden mirror` command.

use std::path::Path;

use clap::Args;

use warden_core::definition::load_definitions;
use warden_engine::mirror::{mirror_images, HttpObjectStore};

#[derive(Args)]
pub struct MirrorArgs {
    /// Do not perform any uploads
    #[arg(long)]
    pub dry_run: bool,

    /// Path to the image definition file or directory
    #[arg(long, default_value = "etc/images")]
    pub images: String,

    /// Object store server base URL
    #[arg(long, default_value = "https://mirror.example.com")]
    pub server: String,

    /// Object store bucket
    #[arg(long, default_value = "image-warden")]
    pub bucket: String,

    /// Bearer token for the object store
    #[arg(long)]
    pub token: Option<String>,
}

pub async fn execute(args: MirrorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (definitions, skipped) = load_definitions(Path::new(&args.images))?;
    if skipped > 0 {
        tracing::warn!(skipped = skipped, "Some image definitions could not be read");
    }

    let store = HttpObjectStore::new(&args.server, &args.bucket, args.token.clone());
    let report = mirror_images(&store, args.dry_run, &definitions).await?;

    tracing::info!(
        uploaded = report.uploaded,
        skipped = report.skipped,
        errors = report.errors,
        "Mirror run finished"
    );

    if report.errors > 0 {
        return Err(
            "one or more errors occurred during the mirror run, please check the output"
                .into(),
        );
    }
    Ok(())
}
