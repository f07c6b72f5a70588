//! Checksum manifest parsing.
//!
//! Upstream distributions publish manifests in slightly different shapes
//! (`SHA256SUMS`, `CHECKSUM`, `*-CHECKSUM`); all of them put a bare hex
//! digest and the filename somewhere on the same line. The scanner picks
//! the first token of a plausible digest length (MD5/SHA-1/SHA-256/SHA-512)
//! that is not a filename.

/// Extract the checksum for `filename` from a manifest document.
pub fn find_checksum(manifest: &str, filename: &str) -> Option<String> {
    for line in manifest.lines() {
        if !line.contains(filename) {
            continue;
        }
        for token in line.split_whitespace() {
            if is_digest(token) {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// Last path segment of a download URL.
pub fn filename_from_url(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

fn is_digest(token: &str) -> bool {
    matches!(token.len(), 32 | 40 | 64 | 128)
        && !token.contains('.')
        && token.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const SHA512: &str = "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce\
47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e";

    #[test]
    fn test_ubuntu_style_manifest() {
        let manifest = format!(
            "{SHA256} *jammy-server-cloudimg-amd64.img\n\
             aaaa *jammy-server-cloudimg-arm64.img\n"
        );
        assert_eq!(
            find_checksum(&manifest, "jammy-server-cloudimg-amd64.img"),
            Some(SHA256.to_string())
        );
    }

    #[test]
    fn test_centos_style_manifest() {
        let manifest = format!(
            "# CentOS-Stream-GenericCloud-9.qcow2: 1128267776 bytes\n\
             SHA256 (CentOS-Stream-GenericCloud-9.qcow2) = {SHA256}\n"
        );
        assert_eq!(
            find_checksum(&manifest, "CentOS-Stream-GenericCloud-9.qcow2"),
            Some(SHA256.to_string())
        );
    }

    #[test]
    fn test_sha512_manifest() {
        let manifest = format!("{SHA512}  debian-12-genericcloud-amd64.qcow2\n");
        assert_eq!(
            find_checksum(&manifest, "debian-12-genericcloud-amd64.qcow2"),
            Some(SHA512.to_string())
        );
    }

    #[test]
    fn test_filename_not_mistaken_for_digest() {
        // a 64-character filename with a dot must not be picked up
        let name = format!("{}.img", "a".repeat(60));
        let manifest = format!("{SHA256}  {name}\n");
        assert_eq!(find_checksum(&manifest, &name), Some(SHA256.to_string()));
    }

    #[test]
    fn test_missing_file_returns_none() {
        let manifest = format!("{SHA256}  other.img\n");
        assert_eq!(find_checksum(&manifest, "wanted.img"), None);
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/images/jammy.img"),
            "jammy.img"
        );
        assert_eq!(filename_from_url("bare-name.img"), "bare-name.img");
    }
}
