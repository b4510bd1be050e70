//! Tool resources and the four install patterns.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::command::CommandSet;
use super::source::SourceSpec;
use super::{ConfigError, Kind, Metadata, Ref};

/// A declared tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResource {
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: ToolSpec,
}

/// What a tool installs: a language-specific path or an owner/repo pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageId {
    Path(String),
    OwnerRepo { owner: String, repo: String },
}

impl PackageId {
    /// Owner/repo split, for registry lookups. A plain `owner/repo` path
    /// string qualifies when it has exactly one slash.
    pub fn owner_repo(&self) -> Option<(&str, &str)> {
        match self {
            PackageId::OwnerRepo { owner, repo } => Some((owner, repo)),
            PackageId::Path(p) => {
                let mut parts = p.splitn(3, '/');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
                        Some((owner, repo))
                    }
                    _ => None,
                }
            }
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageId::Path(p) => f.write_str(p),
            PackageId::OwnerRepo { owner, repo } => write!(f, "{owner}/{repo}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolSpec {
    /// Requested version. Empty means latest; a non-semver string is an
    /// alias resolved at install time.
    #[serde(default)]
    pub version: String,
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
    /// Binary names this tool exports. Defaults to the tool name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,
}

/// The resolved install pattern of a tool. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPattern {
    /// `installer_ref` names a download installer; artifact comes from
    /// `source` or from the registry via `package`.
    Download,
    /// `runtime_ref` names a runtime whose `commands.install` installs
    /// `package`.
    RuntimeDelegation,
    /// `installer_ref` names a delegation installer applied to `package`.
    InstallerDelegation,
    /// The tool carries its own command set.
    Commands,
}

impl ToolSpec {
    pub(super) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.installer_ref.is_some() && self.runtime_ref.is_some() {
            return Err(ConfigError::invalid(
                Kind::Tool,
                name,
                "installerRef and runtimeRef are mutually exclusive",
            ));
        }
        if self.installer_ref.is_some() {
            if self.source.is_none() && self.package.is_none() {
                return Err(ConfigError::invalid(
                    Kind::Tool,
                    name,
                    "installerRef requires spec.source or spec.package",
                ));
            }
            if let Some(source) = &self.source {
                if !source.url_ok() {
                    return Err(ConfigError::invalid(
                        Kind::Tool,
                        name,
                        format!("source.url must be https, got {:?}", source.url),
                    ));
                }
                if let Some(checksum) = &source.checksum {
                    checksum
                        .validate()
                        .map_err(|reason| ConfigError::invalid(Kind::Tool, name, reason))?;
                }
            }
        } else if self.runtime_ref.is_some() {
            if self.package.is_none() {
                return Err(ConfigError::invalid(
                    Kind::Tool,
                    name,
                    "runtimeRef requires spec.package",
                ));
            }
        } else {
            let ok = self.commands.as_ref().is_some_and(CommandSet::has_install);
            if !ok {
                return Err(ConfigError::invalid(
                    Kind::Tool,
                    name,
                    "a tool without installerRef or runtimeRef must carry commands.install",
                ));
            }
        }
        Ok(())
    }

    pub fn dependencies(&self) -> Vec<Ref> {
        if let Some(installer) = &self.installer_ref {
            vec![Ref::new(Kind::Installer, installer.clone())]
        } else if let Some(runtime) = &self.runtime_ref {
            vec![Ref::new(Kind::Runtime, runtime.clone())]
        } else {
            Vec::new()
        }
    }

    /// Binary names to export, defaulting to the tool's own name.
    pub fn binaries_or(&self, name: &str) -> Vec<String> {
        if self.binaries.is_empty() {
            vec![name.to_string()]
        } else {
            self.binaries.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(yaml: &str) -> ToolSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn both_refs_rejected() {
        let s = spec("{installerRef: download, runtimeRef: go, package: gopls}");
        assert!(s.validate("gopls").is_err());
    }

    #[test]
    fn runtime_delegation_requires_package() {
        assert!(spec("{runtimeRef: go}").validate("gopls").is_err());
        assert!(spec("{runtimeRef: go, package: golang.org/x/tools/gopls}")
            .validate("gopls")
            .is_ok());
    }

    #[test]
    fn bare_tool_requires_commands_install() {
        assert!(spec("{version: 1.0.0}").validate("x").is_err());
        assert!(spec("{commands: {install: \"./install.sh\"}}").validate("x").is_ok());
    }

    #[test]
    fn package_id_owner_repo_split() {
        let p: PackageId = serde_yaml::from_str("BurntSushi/ripgrep").unwrap();
        assert_eq!(p.owner_repo(), Some(("BurntSushi", "ripgrep")));

        let p: PackageId = serde_yaml::from_str("golang.org/x/tools/gopls").unwrap();
        assert_eq!(p.owner_repo(), None);

        let p: PackageId = serde_yaml::from_str("{owner: cli, repo: cli}").unwrap();
        assert_eq!(p.owner_repo(), Some(("cli", "cli")));
        assert_eq!(p.to_string(), "cli/cli");
    }

    #[test]
    fn dependencies_follow_the_declared_ref() {
        let s = spec("{runtimeRef: go, package: gopls}");
        assert_eq!(s.dependencies(), vec![Ref::new(Kind::Runtime, "go")]);
        let s = spec("{installerRef: download, source: {url: \"https://h/a.tar.gz\"}}");
        assert_eq!(s.dependencies(), vec![Ref::new(Kind::Installer, "download")]);
    }
}
