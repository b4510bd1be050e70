//! Persisted state: what tomei has installed and how.
//!
//! The state file is the single source of truth for reconciliation. Every
//! entry records the post-install facts needed to diff against a manifest
//! without re-running anything: the resolved version and how it was
//! requested, the install and bin paths, the digest for downloads, and the
//! captured commands/env for delegated installs so removal still works
//! after the manifest is gone.

pub mod diff;
pub mod store;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{
    CommandSet, InstallMode, InstallerMode, PackageId, RepositorySource, SourceSpec,
};

pub use diff::{diff_user_states, EntryChange, StateDiff};
pub use store::{StateStore, StateError};

/// Current state-file format version.
pub const FORMAT_VERSION: &str = "v1";

/// How the entry's version was requested in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionKind {
    /// A concrete version was declared and used as-is.
    Exact,
    /// The manifest left the version empty.
    Latest,
    /// A non-empty version string that required resolution.
    Alias,
}

/// Top-level persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryPin>,
    #[serde(default)]
    pub installers: BTreeMap<String, InstallerState>,
    #[serde(default)]
    pub runtimes: BTreeMap<String, RuntimeState>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolState>,
    #[serde(default)]
    pub installer_repositories: BTreeMap<String, RepositoryState>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            registry: None,
            installers: BTreeMap::new(),
            runtimes: BTreeMap::new(),
            tools: BTreeMap::new(),
            installer_repositories: BTreeMap::new(),
        }
    }
}

impl State {
    pub fn is_empty(&self) -> bool {
        self.installers.is_empty()
            && self.runtimes.is_empty()
            && self.tools.is_empty()
            && self.installer_repositories.is_empty()
    }
}

/// System-privilege state. Same shape as [`State`]; a distinct type so the
/// user and system stores cannot be mixed up at compile time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemState(pub State);

/// Pinned registry references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryPin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aqua: Option<AquaPin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AquaPin {
    #[serde(rename = "ref")]
    pub reference: String,
    pub updated_at: DateTime<Utc>,
}

/// Persisted facts about an installed runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    pub version: String,
    pub version_kind: VersionKind,
    /// The version string as declared in the manifest at install time.
    #[serde(default)]
    pub spec_version: String,
    pub mode: InstallMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_bin_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Captured source declaration, compared on later reconciles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpec>,
    /// Captured bootstrap commands; removal runs `bootstrap.remove`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<CommandSet>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_version: Option<String>,
    #[serde(default)]
    pub taint_on_upgrade: bool,
    /// Non-empty forces reinstall on the next apply.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub taint_reason: String,
    pub updated_at: DateTime<Utc>,
}

/// Persisted facts about an installed tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolState {
    pub version: String,
    pub version_kind: VersionKind,
    #[serde(default)]
    pub spec_version: String,
    /// Install method label: `download`, `runtime-delegation`,
    /// `installer-delegation`, or `commands`.
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bin_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub taint_reason: String,
    pub updated_at: DateTime<Utc>,
}

/// Persisted installer identity, kept so tools whose installer disappeared
/// can still be detected and removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerState {
    pub mode: InstallerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted facts about an installer repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryState {
    pub installer_ref: String,
    pub source: RepositorySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub taint_reason: String,
    pub updated_at: DateTime<Utc>,
}
