//! Mirror pipeline.
//!
//! Republishes upstream distribution images into an operator-controlled
//! object store. For every version that declares a `source`, the object
//! path is derived from the family shortname and version; already-present
//! objects are skipped, everything else is downloaded, decompressed when
//! the source is a compressed single file, digested and uploaded.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha512};

use warden_core::definition::ImageDefinition;
use warden_core::{Result, WardenError};

/// Mirror upload target.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn put(&self, path: &str, file: &Path) -> Result<()>;
}

/// Plain HTTP object store: HEAD for existence, PUT for upload, with an
/// optional bearer token.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(server: &str, bucket: &str, token: Option<String>) -> Self {
        let server = server.trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{server}/{bucket}"),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let url = self.url(path);
        let response = self
            .authorize(self.client.head(&url))
            .send()
            .await
            .map_err(|e| WardenError::MirrorError(format!("HEAD {url} failed: {e}")))?;
        Ok(response.status().is_success())
    }

    async fn put(&self, path: &str, file: &Path) -> Result<()> {
        let url = self.url(path);
        let payload = tokio::fs::File::open(file).await?;
        let stream = tokio_util::io::ReaderStream::new(payload);
        let response = self
            .authorize(self.client.put(&url))
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| WardenError::MirrorError(format!("PUT {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(WardenError::MirrorError(format!(
                "PUT {url} rejected with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Compressed single-file formats the pipeline unpacks before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "gz" => Some(Self::Gzip),
            "bz2" => Some(Self::Bzip2),
            "xz" => Some(Self::Xz),
            _ => None,
        }
    }
}

/// Derived upload location of one mirrored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorObject {
    /// `<shortname>/<version>/<filename>`
    pub path: String,
    pub filename: String,
    pub compression: Option<Compression>,
}

/// Derive the object location the way the catalog consumers expect it:
/// the source basename with any compression extension stripped; tarballs
/// keep the published download name instead.
pub fn object_location(
    shortname: &str,
    version: &str,
    source: &str,
    url: &str,
) -> MirrorObject {
    let source_name = basename(source);
    let (stem, extension) = split_extension(&source_name);

    let compression = extension.as_deref().and_then(Compression::from_extension);
    let mut filename = if compression.is_some() {
        stem.clone()
    } else {
        source_name.clone()
    };

    // a compressed tarball is republished under its download name
    let (_, inner_extension) = split_extension(&stem);
    if inner_extension.as_deref() == Some("tar") {
        filename = basename(url);
    }

    MirrorObject {
        path: format!("{shortname}/{version}/{filename}"),
        filename,
        compression,
    }
}

fn basename(url: &str) -> String {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn split_extension(name: &str) -> (String, Option<String>) {
    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => {
            (stem.to_string(), Some(extension.to_string()))
        }
        _ => (name.to_string(), None),
    }
}

/// Result of one mirror sweep.
#[derive(Debug, Default)]
pub struct MirrorReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Mirror every version carrying a `source` into `store`.
pub async fn mirror_images(
    store: &dyn ObjectStore,
    dry_run: bool,
    definitions: &[ImageDefinition],
) -> Result<MirrorReport> {
    let mut report = MirrorReport::default();
    let workdir = tempfile::tempdir()?;

    for definition in definitions {
        let shortname = match &definition.shortname {
            Some(shortname) => shortname,
            None => continue,
        };

        for version in &definition.versions {
            let source = match &version.source {
                Some(source) => source,
                None => continue,
            };
            tracing::debug!(source = %source, "Considering mirror source");

            let object =
                object_location(shortname, &version.version, source, &version.url);

            match store.exists(&object.path).await {
                Ok(true) => {
                    tracing::info!(object = %object.path, "Already available");
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {
                    tracing::info!(object = %object.path, "Not yet available");
                }
                Err(e) => {
                    tracing::error!(object = %object.path, error = %e, "Existence check failed");
                    report.errors += 1;
                    continue;
                }
            }

            match mirror_one(store, dry_run, workdir.path(), source, &object).await {
                Ok(()) => {
                    if !dry_run {
                        report.uploaded += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(object = %object.path, error = %e, "Mirroring failed");
                    report.errors += 1;
                }
            }
        }
    }

    Ok(report)
}

async fn mirror_one(
    store: &dyn ObjectStore,
    dry_run: bool,
    workdir: &Path,
    source: &str,
    object: &MirrorObject,
) -> Result<()> {
    tracing::info!(source = %source, "Downloading");
    let downloaded = workdir.join(basename(source));
    download(source, &downloaded).await?;

    let upload_path = match object.compression {
        Some(compression) => {
            tracing::info!(file = %downloaded.display(), "Decompressing");
            let target = workdir.join(&object.filename);
            let digest = unpack(compression, downloaded.clone(), target.clone()).await?;
            tracing::info!(file = %object.filename, sha512 = %digest, "Decompressed payload");
            tokio::fs::remove_file(&downloaded).await?;
            target
        }
        None => downloaded,
    };

    if dry_run {
        tracing::info!(object = %object.path, "Not uploading (dry-run enabled)");
    } else {
        tracing::info!(object = %object.path, "Uploading");
        store.put(&object.path, &upload_path).await?;
    }

    tokio::fs::remove_file(&upload_path).await?;
    Ok(())
}

/// Stream a download to disk.
async fn download(url: &str, target: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| WardenError::HttpError {
            url: url.to_string(),
            message: e.to_string(),
        })?;
    if !response.status().is_success() {
        return Err(WardenError::HttpError {
            url: url.to_string(),
            message: format!("status {}", response.status()),
        });
    }

    let mut file = tokio::fs::File::create(target).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| WardenError::HttpError {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await?;
    }
    tokio::io::AsyncWriteExt::flush(&mut file).await?;
    Ok(())
}

/// Decompress `input` into `output`, returning the SHA-512 of the payload.
async fn unpack(compression: Compression, input: PathBuf, output: PathBuf) -> Result<String> {
    let digest = tokio::task::spawn_blocking(move || -> Result<String> {
        let reader = std::fs::File::open(&input)?;
        let mut decoder: Box<dyn Read> = match compression {
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        };

        let mut writer = std::fs::File::create(&output)?;
        let mut hasher = Sha512::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = decoder.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            writer.write_all(&buffer[..read])?;
        }
        writer.flush()?;
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| WardenError::MirrorError(format!("decompression task failed: {e}")))??;

    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_image_keeps_its_name() {
        let object = object_location(
            "ubuntu",
            "20240801",
            "https://cloud-images.ubuntu.com/jammy/jammy-server-cloudimg-amd64.img",
            "https://mirror.example.com/ubuntu/20240801/jammy.img",
        );
        assert_eq!(object.filename, "jammy-server-cloudimg-amd64.img");
        assert_eq!(object.path, "ubuntu/20240801/jammy-server-cloudimg-amd64.img");
        assert_eq!(object.compression, None);
    }

    #[test]
    fn test_compressed_image_drops_the_extension() {
        let object = object_location(
            "netbsd",
            "9.3",
            "https://example.com/pub/netbsd-9.3.img.gz",
            "https://mirror.example.com/netbsd/9.3/netbsd-9.3.img",
        );
        assert_eq!(object.filename, "netbsd-9.3.img");
        assert_eq!(object.compression, Some(Compression::Gzip));
    }

    #[test]
    fn test_xz_and_bz2_are_recognized() {
        let xz = object_location("a", "1", "https://x/disk.img.xz", "https://y/disk.img");
        assert_eq!(xz.compression, Some(Compression::Xz));
        let bz2 = object_location("a", "1", "https://x/disk.img.bz2", "https://y/disk.img");
        assert_eq!(bz2.compression, Some(Compression::Bzip2));
    }

    #[test]
    fn test_tarball_takes_the_published_name() {
        let object = object_location(
            "talos",
            "1.7",
            "https://example.com/talos/disk.tar.gz",
            "https://mirror.example.com/talos/1.7/disk.raw",
        );
        assert_eq!(object.filename, "disk.raw");
        assert_eq!(object.path, "talos/1.7/disk.raw");
        assert_eq!(object.compression, Some(Compression::Gzip));
    }

    #[test]
    fn test_query_strings_are_ignored_in_basenames() {
        assert_eq!(basename("https://x/a/b/image.img?sig=abc"), "image.img");
    }
}
