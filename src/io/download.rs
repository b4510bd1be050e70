//! Streaming HTTP downloads with sha256 verification, progress reporting,
//! and cooperative cancellation.

use std::io::Write as _;
use std::path::Path;

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::exec::context;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    Checksum {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("download of {url} was cancelled")]
    Cancelled { url: String },
}

impl DownloadError {
    fn http(url: &str, source: reqwest::Error) -> Self {
        DownloadError::Http { url: url.to_string(), source }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        DownloadError::Io { path: path.display().to_string(), source }
    }
}

/// Downloads `url` to `dest`, hashing while streaming. Returns the hex
/// sha256 digest; when `expected` is given a mismatch removes the file
/// and fails. Progress goes to the current node context; cancellation is
/// honored between chunks.
pub async fn fetch_verified(
    client: &Client,
    url: &str,
    dest: &Path,
    expected: Option<&str>,
) -> Result<String, DownloadError> {
    let cancel = context::cancel_token();
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await
        .map_err(|e| DownloadError::http(url, e))?;
    if !response.status().is_success() {
        return Err(DownloadError::Status { url: url.to_string(), status: response.status().as_u16() });
    }
    let total = response.content_length().unwrap_or(0);
    context::report_progress(0, total);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| DownloadError::io(parent, e))?;
    }
    let mut file = File::create(dest).await.map_err(|e| DownloadError::io(dest, e))?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            () = cancel.cancelled() => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(DownloadError::Cancelled { url: url.to_string() });
            }
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| DownloadError::http(url, e))?;
        file.write_all(&chunk).await.map_err(|e| DownloadError::io(dest, e))?;
        hasher.write_all(&chunk).map_err(|e| DownloadError::io(dest, e))?;
        downloaded += chunk.len() as u64;
        context::report_progress(downloaded, total);
    }
    file.flush().await.map_err(|e| DownloadError::io(dest, e))?;

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected {
        if !actual.eq_ignore_ascii_case(expected) {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(DownloadError::Checksum {
                url: url.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(actual)
}

/// Fetches a small text document (checksum files, registry documents).
pub async fn fetch_text(client: &Client, url: &str) -> Result<String, DownloadError> {
    let bytes = fetch_bytes(client, url).await?;
    String::from_utf8(bytes).map_err(|e| DownloadError::Io {
        path: url.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })
}

/// Fetches a document as raw bytes, media-type agnostic.
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>, DownloadError> {
    let cancel = context::cancel_token();
    let request = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send();
    let response = tokio::select! {
        response = request => response.map_err(|e| DownloadError::http(url, e))?,
        () = cancel.cancelled() => return Err(DownloadError::Cancelled { url: url.to_string() }),
    };
    if !response.status().is_success() {
        return Err(DownloadError::Status { url: url.to_string(), status: response.status().as_u16() });
    }
    let bytes = tokio::select! {
        bytes = response.bytes() => bytes.map_err(|e| DownloadError::http(url, e))?,
        () = cancel.cancelled() => return Err(DownloadError::Cancelled { url: url.to_string() }),
    };
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_verified_writes_and_hashes() {
        let mut server = mockito::Server::new_async().await;
        let body = b"hello artifact".to_vec();
        let expected = hex::encode(Sha256::digest(&body));
        let mock = server
            .mock("GET", "/rg.tar.gz")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rg.tar.gz");
        let client = Client::new();
        let url = format!("{}/rg.tar.gz", server.url());

        let digest = fetch_verified(&client, &url, &dest, Some(&expected)).await.unwrap();
        assert_eq!(digest, expected);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn checksum_mismatch_removes_the_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rg.tar.gz")
            .with_status(200)
            .with_body("unexpected bytes")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("rg.tar.gz");
        let client = Client::new();
        let url = format!("{}/rg.tar.gz", server.url());

        let err = fetch_verified(&client, &url, &dest, Some(&"0".repeat(64)))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Checksum { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/gone").with_status(404).create_async().await;
        let client = Client::new();
        let err = fetch_bytes(&client, &format!("{}/gone", server.url())).await.unwrap_err();
        assert!(matches!(err, DownloadError::Status { status: 404, .. }));
    }
}
