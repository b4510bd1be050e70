//! Aqua-style registry resolution.
//!
//! Turns `(registry ref, package, version, os, arch)` into a concrete
//! download URL by fetching the package's `registry.yaml`, merging version
//! and OS overrides, applying token replacements, and rendering the asset
//! template. Fetched documents are cached by path; cache hits skip the
//! network entirely.

pub mod constraint;
pub mod schema;

use std::path::{Path, PathBuf};

use reqwest::Client;
use thiserror::Error;

use crate::io::download::{fetch_bytes, DownloadError};
use crate::resource::ArchiveType;
use crate::template::{self, TemplateError, Vars};

pub use constraint::Constraint;
pub use schema::{OsOverride, PackageRecord, RegistryDoc, VersionOverride};

/// Default registry base; override with `TOMEI_REGISTRY_BASE`.
pub const DEFAULT_BASE: &str = "https://raw.githubusercontent.com/aquaproj/aqua-registry";

/// Default registry ref pinned on first use.
pub const DEFAULT_REF: &str = "main";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("failed to parse registry document for {package}: {source}")]
    Parse {
        package: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("registry has no record for {0}")]
    NotFound(String),

    #[error("registry package {package} has unsupported type {package_type:?}")]
    Unsupported { package: String, package_type: String },

    #[error("registry package {package} is missing {field}")]
    Missing { package: String, field: &'static str },

    #[error(transparent)]
    Constraint(#[from] constraint::ConstraintError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One resolution request.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub registry_ref: &'a str,
    pub owner: &'a str,
    pub repo: &'a str,
    pub version: &'a str,
    pub os: &'a str,
    pub arch: &'a str,
}

impl ResolveRequest<'_> {
    fn package(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// The resolver's answer: concrete URLs plus any non-fatal findings.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    pub asset: String,
    pub archive_url: String,
    pub checksum_url: Option<String>,
    pub archive_type: ArchiveType,
    /// Non-fatal problems, e.g. the platform is outside `supported_envs`.
    /// The URL is still a best effort.
    pub errors: Vec<String>,
}

/// Fetches, caches, and resolves registry package records.
#[derive(Debug, Clone)]
pub struct Resolver {
    base: String,
    cache_dir: PathBuf,
    client: Client,
}

impl Resolver {
    pub fn new(base: impl Into<String>, cache_dir: &Path, client: Client) -> Self {
        Self { base: base.into(), cache_dir: cache_dir.to_path_buf(), client }
    }

    /// Resolver against the default base, honoring `TOMEI_REGISTRY_BASE`.
    pub fn from_env(cache_dir: &Path, client: Client) -> Self {
        let base =
            std::env::var("TOMEI_REGISTRY_BASE").unwrap_or_else(|_| DEFAULT_BASE.to_string());
        Self::new(base, cache_dir, client)
    }

    pub async fn resolve(
        &self,
        request: &ResolveRequest<'_>,
    ) -> Result<ResolvedAsset, RegistryError> {
        let bytes = self.fetch_cached(request).await?;
        let doc: RegistryDoc = serde_yaml::from_slice(&bytes).map_err(|source| {
            RegistryError::Parse { package: request.package(), source }
        })?;
        let record = doc
            .packages
            .iter()
            .find(|r| {
                r.repo_owner.as_deref().is_none_or(|o| o == request.owner)
                    && r.repo_name.as_deref().is_none_or(|n| n == request.repo)
            })
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(request.package()))?;
        resolve_record(record, request)
    }

    fn cache_path(&self, request: &ResolveRequest<'_>) -> PathBuf {
        self.cache_dir
            .join(request.registry_ref)
            .join("pkgs")
            .join(request.owner)
            .join(request.repo)
            .join("registry.yaml")
    }

    /// Reads the package document from the cache, fetching and caching it
    /// on a miss. Concurrent writers of the same path go through
    /// tmp-then-rename, so a torn cache file is never observed.
    async fn fetch_cached(&self, request: &ResolveRequest<'_>) -> Result<Vec<u8>, RegistryError> {
        let path = self.cache_path(request);
        match tokio::fs::read(&path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RegistryError::Io { path: path.display().to_string(), source: e })
            }
        }

        let url = format!(
            "{}/{}/pkgs/{}/{}/registry.yaml",
            self.base, request.registry_ref, request.owner, request.repo
        );
        let bytes = fetch_bytes(&self.client, &url).await?;

        let io_err = |p: &Path, e: std::io::Error| RegistryError::Io {
            path: p.display().to_string(),
            source: e,
        };
        let parent = path.parent().expect("cache path has a parent");
        tokio::fs::create_dir_all(parent).await.map_err(|e| io_err(parent, e))?;
        let tmp = path.with_extension(format!("yaml.tmp.{}", std::process::id()));
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| io_err(&path, e))?;
        Ok(bytes)
    }
}

/// Resolves one record for one request: override merging, replacements,
/// template rendering, URL construction.
pub fn resolve_record(
    mut record: PackageRecord,
    request: &ResolveRequest<'_>,
) -> Result<ResolvedAsset, RegistryError> {
    let package = request.package();

    match record.package_type.as_deref() {
        None | Some("github_release") => {}
        Some(other) => {
            return Err(RegistryError::Unsupported {
                package,
                package_type: other.to_string(),
            })
        }
    }

    // A matching version override replaces base fields wholesale.
    if let Some(version_overrides) = record.version_overrides.take() {
        for vo in &version_overrides {
            if Constraint::parse(&vo.version_constraint)?.matches(request.version) {
                record.apply_version_override(vo);
                break;
            }
        }
    }

    // Then a matching OS override merges into the current record.
    if let Some(overrides) = record.overrides.take() {
        for ov in &overrides {
            if ov.matches(request.os, request.arch) {
                record.apply_os_override(ov);
                break;
            }
        }
    }

    let mut errors = Vec::new();
    if let Some(envs) = &record.supported_envs {
        if !env_supported(envs, request.os, request.arch) {
            errors.push(format!(
                "{}/{} is not in supported_envs {:?}",
                request.os, request.arch, envs
            ));
        }
    }

    let replacements = record.replacements.unwrap_or_default();
    let os_token = replacements.get(request.os).map_or(request.os, String::as_str);
    let arch_token = replacements.get(request.arch).map_or(request.arch, String::as_str);

    let asset_template = record
        .asset
        .ok_or(RegistryError::Missing { package: package.clone(), field: "asset" })?;
    let vars = Vars::new()
        .version(request.version)
        .os(os_token)
        .arch(arch_token);
    let asset = template::render(&asset_template, &vars)?;

    let owner = record.repo_owner.as_deref().unwrap_or(request.owner);
    let repo = record.repo_name.as_deref().unwrap_or(request.repo);
    let archive_url = format!(
        "https://github.com/{owner}/{repo}/releases/download/{version}/{asset}",
        version = request.version
    );

    let checksum_url = match record.checksum.as_ref().filter(|c| c.enabled != Some(false)) {
        Some(block) => match &block.asset {
            Some(checksum_template) => {
                let checksum_asset =
                    template::render(checksum_template, &vars.clone().asset(asset.clone()))?;
                Some(format!(
                    "https://github.com/{owner}/{repo}/releases/download/{version}/{checksum_asset}",
                    version = request.version
                ))
            }
            None => None,
        },
        None => None,
    };

    let archive_type = match record.format.as_deref() {
        Some(format) => ArchiveType::from_format(format).ok_or(RegistryError::Unsupported {
            package,
            package_type: format!("format {format:?}"),
        })?,
        None => ArchiveType::infer(&asset),
    };

    Ok(ResolvedAsset { asset, archive_url, checksum_url, archive_type, errors })
}

/// `supported_envs` entries cover `all`, an OS, an arch, or `os/arch`.
fn env_supported(envs: &[String], os: &str, arch: &str) -> bool {
    let pair = format!("{os}/{arch}");
    envs.iter().any(|e| e == "all" || e == os || e == arch || *e == pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(version: &'a str, os: &'a str, arch: &'a str) -> ResolveRequest<'a> {
        ResolveRequest {
            registry_ref: "main",
            owner: "BurntSushi",
            repo: "ripgrep",
            version,
            os,
            arch,
        }
    }

    fn base_record() -> PackageRecord {
        serde_yaml::from_str(
            r#"
type: github_release
repo_owner: BurntSushi
repo_name: ripgrep
asset: "ripgrep-{{.Version}}-{{.Arch}}-{{.OS}}.tar.gz"
replacements:
  darwin: apple-darwin
  linux: unknown-linux-musl
  amd64: x86_64
  arm64: aarch64
"#,
        )
        .unwrap()
    }

    #[test]
    fn renders_asset_with_replacements() {
        let resolved = resolve_record(base_record(), &request("14.0.0", "linux", "amd64")).unwrap();
        assert_eq!(resolved.asset, "ripgrep-14.0.0-x86_64-unknown-linux-musl.tar.gz");
        assert_eq!(
            resolved.archive_url,
            "https://github.com/BurntSushi/ripgrep/releases/download/14.0.0/ripgrep-14.0.0-x86_64-unknown-linux-musl.tar.gz"
        );
        assert_eq!(resolved.archive_type, ArchiveType::TarGz);
        assert!(resolved.errors.is_empty());
    }

    #[test]
    fn version_override_replaces_then_os_override_merges() {
        let mut record = base_record();
        record.version_overrides = serde_yaml::from_str(
            r#"
- version_constraint: semver(">= 2.0.0")
  replacements:
    darwin: Darwin
"#,
        )
        .unwrap();

        // Spec scenario: version 2.5.0 matches the override, whose
        // replacements REPLACE the whole base map. darwin maps to Darwin;
        // arm64 keeps its canonical token because the base aarch64 mapping
        // is gone.
        let resolved =
            resolve_record(record.clone(), &request("2.5.0", "darwin", "arm64")).unwrap();
        assert_eq!(resolved.asset, "ripgrep-2.5.0-arm64-Darwin.tar.gz");

        // Below the constraint the base map applies untouched.
        let resolved = resolve_record(record, &request("1.9.0", "darwin", "arm64")).unwrap();
        assert_eq!(resolved.asset, "ripgrep-1.9.0-aarch64-apple-darwin.tar.gz");
    }

    #[test]
    fn os_override_after_version_override_scalar_replace_map_merge() {
        let mut record = base_record();
        record.version_overrides = serde_yaml::from_str(
            r#"
- version_constraint: semver(">= 2.0.0")
  format: zip
  replacements:
    darwin: Darwin
"#,
        )
        .unwrap();
        record.overrides = serde_yaml::from_str(
            r#"
- goos: darwin
  replacements:
    arm64: aarch64
"#,
        )
        .unwrap();

        let resolved = resolve_record(record, &request("2.5.0", "darwin", "arm64")).unwrap();
        // Version override replaced the map (Darwin only) and format; the
        // OS override then merged the arm64 mapping back in.
        assert_eq!(resolved.asset, "ripgrep-2.5.0-aarch64-Darwin.tar.gz");
        assert_eq!(resolved.archive_type, ArchiveType::Zip);
    }

    #[test]
    fn unsupported_env_is_a_recorded_error_not_a_failure() {
        let mut record = base_record();
        record.supported_envs = Some(vec!["linux/amd64".to_string()]);
        let resolved = resolve_record(record, &request("14.0.0", "darwin", "arm64")).unwrap();
        assert!(!resolved.archive_url.is_empty());
        assert_eq!(resolved.errors.len(), 1);
        assert!(resolved.errors[0].contains("supported_envs"));
    }

    #[test]
    fn unsupported_package_type_is_fatal() {
        let mut record = base_record();
        record.package_type = Some("go_install".to_string());
        let err = resolve_record(record, &request("14.0.0", "linux", "amd64")).unwrap_err();
        assert!(matches!(err, RegistryError::Unsupported { .. }));
    }

    #[test]
    fn checksum_template_may_reference_the_asset() {
        let mut record = base_record();
        record.checksum = serde_yaml::from_str(
            "{type: github_release, asset: \"{{.Asset}}.sha256\", algorithm: sha256}",
        )
        .unwrap();
        let resolved = resolve_record(record, &request("14.0.0", "linux", "amd64")).unwrap();
        assert_eq!(
            resolved.checksum_url.as_deref(),
            Some("https://github.com/BurntSushi/ripgrep/releases/download/14.0.0/ripgrep-14.0.0-x86_64-unknown-linux-musl.tar.gz.sha256")
        );
    }

    #[tokio::test]
    async fn cache_hits_skip_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/main/pkgs/BurntSushi/ripgrep/registry.yaml")
            .with_body("packages:\n  - asset: \"rg-{{.Version}}.tar.gz\"\n")
            .expect(1)
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(server.url(), cache.path(), Client::new());
        let req = request("14.0.0", "linux", "amd64");

        let first = resolver.resolve(&req).await.unwrap();
        let second = resolver.resolve(&req).await.unwrap();
        assert_eq!(first.archive_url, second.archive_url);
        mock.assert_async().await; // exactly one fetch
        assert!(cache
            .path()
            .join("main/pkgs/BurntSushi/ripgrep/registry.yaml")
            .exists());
    }
}
