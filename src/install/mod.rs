//! Per-kind install and remove contracts.
//!
//! The executor drives these with a node context installed (progress and
//! output callbacks, cancellation token). Installers return the state
//! entry to persist on success and never write state themselves; a failed
//! install leaves state untouched.

pub mod repository;
pub mod runtime;
pub mod tool;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reqwest::Client;
use thiserror::Error;

use crate::io::download::DownloadError;
use crate::registry::{Resolver, RegistryError};
use crate::shell::{self, ExecError, ExecRequest};
use crate::state::VersionKind;
use crate::template::TemplateError;
use crate::Paths;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("operation was cancelled")]
    Cancelled,
}

impl InstallError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        InstallError::Io { path: path.display().to_string(), source }
    }

    /// Whether the error is a cancellation rather than a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            InstallError::Cancelled
                | InstallError::Download(DownloadError::Cancelled { .. })
                | InstallError::Exec(ExecError::Cancelled { .. })
        )
    }
}

/// Shared dependencies of every installer.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub paths: Paths,
    pub client: Client,
    pub resolver: Resolver,
    /// Registry ref used for aqua lookups, from the state pin or default.
    pub registry_ref: String,
}

impl InstallContext {
    pub fn new(paths: Paths, client: Client) -> Self {
        let resolver = Resolver::from_env(&paths.cache_dir(), client.clone());
        Self {
            paths,
            client,
            resolver,
            registry_ref: crate::registry::DEFAULT_REF.to_string(),
        }
    }
}

/// A resolved version plus how it was arrived at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version: String,
    pub kind: VersionKind,
}

/// Resolves the version to install. An empty declared version is `latest`;
/// a resolution command turns a non-empty declared version into an alias.
pub(crate) async fn resolve_version(
    resource: &str,
    spec_version: &str,
    resolve_command: Option<&str>,
    env: &BTreeMap<String, String>,
) -> Result<ResolvedVersion, InstallError> {
    match resolve_command {
        Some(script) if !script.trim().is_empty() => {
            let rendered = crate::template::render(
                script,
                &crate::template::Vars::new().version(if spec_version.is_empty() {
                    "latest"
                } else {
                    spec_version
                }),
            )?;
            let resolved = shell::run_capture(
                ExecRequest::new(resource, "resolve version", rendered).env(env),
            )
            .await?;
            if resolved.is_empty() {
                return Err(InstallError::Invalid(format!(
                    "resolve version for {resource} produced no output"
                )));
            }
            let kind = if spec_version.is_empty() { VersionKind::Latest } else { VersionKind::Alias };
            Ok(ResolvedVersion { version: resolved, kind })
        }
        _ => {
            if spec_version.is_empty() {
                Ok(ResolvedVersion { version: "latest".to_string(), kind: VersionKind::Latest })
            } else {
                Ok(ResolvedVersion {
                    version: spec_version.to_string(),
                    kind: VersionKind::Exact,
                })
            }
        }
    }
}

/// Expands a leading `~` to the home directory.
pub(crate) fn expand_home(path: &Path) -> PathBuf {
    let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) else {
        return path.to_path_buf();
    };
    dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| path.to_path_buf())
}

/// Removes a directory tree, tolerating its absence.
pub(crate) fn remove_dir_if_present(dir: &Path) -> Result<(), InstallError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::io(dir, e)),
    }
}

/// Removes a bin symlink, tolerating its absence.
pub(crate) fn remove_link_if_present(link: &Path) -> Result<(), InstallError> {
    match std::fs::symlink_metadata(link) {
        Ok(_) => std::fs::remove_file(link).map_err(|e| InstallError::io(link, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::io(link, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_version_without_resolver_is_latest() {
        let resolved = resolve_version("Tool/x", "", None, &BTreeMap::new()).await.unwrap();
        assert_eq!(resolved.version, "latest");
        assert_eq!(resolved.kind, VersionKind::Latest);
    }

    #[tokio::test]
    async fn exact_version_without_resolver_stays_exact() {
        let resolved =
            resolve_version("Tool/x", "14.0.0", None, &BTreeMap::new()).await.unwrap();
        assert_eq!(resolved.version, "14.0.0");
        assert_eq!(resolved.kind, VersionKind::Exact);
    }

    #[tokio::test]
    async fn resolver_output_marks_alias_or_latest() {
        let resolved =
            resolve_version("Tool/x", "stable", Some("echo 1.80.1"), &BTreeMap::new())
                .await
                .unwrap();
        assert_eq!(resolved.version, "1.80.1");
        assert_eq!(resolved.kind, VersionKind::Alias);

        let resolved = resolve_version("Tool/x", "", Some("echo 1.80.1"), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(resolved.kind, VersionKind::Latest);
    }

    #[tokio::test]
    async fn resolver_may_reference_the_requested_version() {
        let resolved = resolve_version(
            "Tool/x",
            "stable",
            Some("echo requested-{{.Version}}"),
            &BTreeMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(resolved.version, "requested-stable");
    }
}
