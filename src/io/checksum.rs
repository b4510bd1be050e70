//! Resolving declared checksums to a concrete sha256 digest.
//!
//! Three declaration shapes are supported: a literal `sha256:<hex>`, a
//! checksum file fetched over HTTP (`<hex>  <filename>` lines, filename
//! matched by pattern), and a JSON document indexed by asset name.

use regex::Regex;
use reqwest::Client;

use crate::resource::ChecksumSpec;

use super::download::{fetch_text, DownloadError};

/// Resolves the expected hex digest for `asset`. Checksum declarations are
/// optional upstream, so the caller handles `spec = None`; this function
/// always produces a digest or an error.
pub async fn expected_digest(
    client: &Client,
    spec: &ChecksumSpec,
    asset: &str,
) -> Result<String, DownloadError> {
    match spec {
        ChecksumSpec::Literal(value) => Ok(value
            .strip_prefix("sha256:")
            .unwrap_or(value)
            .to_ascii_lowercase()),
        ChecksumSpec::File { url, file } => {
            let body = fetch_text(client, url).await?;
            find_in_checksum_file(&body, file).ok_or_else(|| DownloadError::Io {
                path: url.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no checksum entry matching {file:?}"),
                ),
            })
        }
        ChecksumSpec::JsonIndexed { url, key } => {
            let body = fetch_text(client, url).await?;
            let doc: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
                DownloadError::Io {
                    path: url.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                }
            })?;
            let lookup = key.as_deref().unwrap_or(asset);
            doc.get(lookup)
                .and_then(|v| v.as_str())
                .map(|s| s.strip_prefix("sha256:").unwrap_or(s).to_ascii_lowercase())
                .ok_or_else(|| DownloadError::Io {
                    path: url.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no checksum entry for {lookup:?}"),
                    ),
                })
        }
    }
}

/// Scans `<hex>  <filename>` lines for a filename matching `pattern`
/// (literal text with `*` wildcards).
fn find_in_checksum_file(body: &str, pattern: &str) -> Option<String> {
    let regex = wildcard_regex(pattern)?;
    for line in body.lines() {
        let mut fields = line.split_whitespace();
        let (Some(digest), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        let name = name.strip_prefix('*').unwrap_or(name);
        // Checksum files sometimes list paths; match on the basename too.
        let base = name.rsplit('/').next().unwrap_or(name);
        if regex.is_match(name) || regex.is_match(base) {
            if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Some(digest.to_ascii_lowercase());
            }
        }
    }
    None
}

fn wildcard_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}$")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_and_wildcard_names() {
        let body = "\
0000000000000000000000000000000000000000000000000000000000000001  rg-14.0.0-linux.tar.gz
0000000000000000000000000000000000000000000000000000000000000002  rg-14.0.0-darwin.tar.gz
";
        assert_eq!(
            find_in_checksum_file(body, "rg-14.0.0-darwin.tar.gz").unwrap(),
            "0000000000000000000000000000000000000000000000000000000000000002"
        );
        assert_eq!(
            find_in_checksum_file(body, "rg-*-linux.tar.gz").unwrap(),
            "0000000000000000000000000000000000000000000000000000000000000001"
        );
        assert!(find_in_checksum_file(body, "fd-*.tar.gz").is_none());
    }

    #[test]
    fn tolerates_binary_mode_markers_and_paths() {
        let body =
            "0000000000000000000000000000000000000000000000000000000000000003 *dist/rg.tar.gz\n";
        assert_eq!(
            find_in_checksum_file(body, "rg.tar.gz").unwrap(),
            "0000000000000000000000000000000000000000000000000000000000000003"
        );
    }

    #[tokio::test]
    async fn literal_digest_needs_no_network() {
        let digest = expected_digest(
            &Client::new(),
            &ChecksumSpec::Literal(format!("sha256:{}", "A".repeat(64))),
            "rg.tar.gz",
        )
        .await
        .unwrap();
        assert_eq!(digest, "a".repeat(64));
    }

    #[tokio::test]
    async fn json_indexed_lookup_by_asset_name() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sums.json")
            .with_body(format!("{{\"rg.tar.gz\": \"{}\"}}", "b".repeat(64)))
            .create_async()
            .await;
        let digest = expected_digest(
            &Client::new(),
            &ChecksumSpec::JsonIndexed { url: format!("{}/sums.json", server.url()), key: None },
            "rg.tar.gz",
        )
        .await
        .unwrap();
        assert_eq!(digest, "b".repeat(64));
    }
}
