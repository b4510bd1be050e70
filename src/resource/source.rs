//! Download sources: URL, checksum declaration, archive type.

use serde::{Deserialize, Serialize};

/// Where a download-mode runtime or tool fetches its artifact from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceSpec {
    /// HTTPS URL of the artifact. May reference `{{.Version}}`, `{{.OS}}`,
    /// `{{.Arch}}`.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_type: Option<ArchiveType>,
}

impl SourceSpec {
    /// URLs must be HTTPS; plain HTTP is tolerated only for loopback hosts.
    pub fn url_ok(&self) -> bool {
        if self.url.starts_with("https://") {
            return true;
        }
        if let Some(rest) = self.url.strip_prefix("http://") {
            let host = rest.split(['/', ':']).next().unwrap_or("");
            return host == "127.0.0.1" || host == "localhost" || host == "[::1]";
        }
        false
    }
}

/// How the expected sha256 digest of a download is obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChecksumSpec {
    /// A literal `sha256:<hex>` string.
    Literal(String),
    /// A checksum file (`<hex>  <filename>` lines) fetched from `url`;
    /// `file` is the asset filename pattern to match, `*` wildcards allowed.
    File { url: String, file: String },
    /// A JSON document fetched from `url`, mapping asset filenames to hex
    /// digests under an optional `key`.
    JsonIndexed {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

impl ChecksumSpec {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ChecksumSpec::Literal(s) => {
                let hex_part = s
                    .strip_prefix("sha256:")
                    .ok_or_else(|| format!("literal checksum must be sha256:<hex>, got {s:?}"))?;
                if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(format!("{s:?} is not a 64-char hex sha256 digest"));
                }
                Ok(())
            }
            ChecksumSpec::File { url, file } => {
                if url.is_empty() || file.is_empty() {
                    return Err("checksum url and file pattern are required".to_string());
                }
                Ok(())
            }
            ChecksumSpec::JsonIndexed { url, .. } => {
                if url.is_empty() {
                    return Err("checksum url is required".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Supported archive containers. `Raw` means the download is the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveType {
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "tar.xz")]
    TarXz,
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "raw")]
    Raw,
}

impl ArchiveType {
    /// Best-effort inference from an artifact filename.
    pub fn infer(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            ArchiveType::TarGz
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            ArchiveType::TarXz
        } else if lower.ends_with(".zip") {
            ArchiveType::Zip
        } else {
            ArchiveType::Raw
        }
    }

    /// Parses an aqua `format` field.
    pub fn from_format(format: &str) -> Option<Self> {
        match format {
            "tar.gz" | "tgz" => Some(ArchiveType::TarGz),
            "tar.xz" | "txz" => Some(ArchiveType::TarXz),
            "zip" => Some(ArchiveType::Zip),
            "raw" | "" => Some(ArchiveType::Raw),
            _ => None,
        }
    }
}
