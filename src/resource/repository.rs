//! Installer repositories: package sources registered with an installer,
//! either a git checkout or the installer's own repo-management scripts.

use serde::{Deserialize, Serialize};

use super::command::CommandSet;
use super::{ConfigError, Kind, Metadata, Ref};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryResource {
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: RepositorySpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositorySource {
    /// Clone/pull a remote repository into a managed directory.
    Git,
    /// Run the installer's own add/check/remove scripts
    /// (e.g. `helm repo add`).
    Delegation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepositorySpec {
    pub installer_ref: String,
    pub source: RepositorySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
}

impl RepositorySpec {
    pub(super) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.installer_ref.is_empty() {
            return Err(ConfigError::invalid(
                Kind::InstallerRepository,
                name,
                "spec.installerRef is required",
            ));
        }
        match self.source {
            RepositorySource::Git => {
                if self.url.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::invalid(
                        Kind::InstallerRepository,
                        name,
                        "git repositories require spec.url",
                    ));
                }
            }
            RepositorySource::Delegation => {
                let ok = self.commands.as_ref().is_some_and(CommandSet::has_install);
                if !ok {
                    return Err(ConfigError::invalid(
                        Kind::InstallerRepository,
                        name,
                        "delegation repositories require spec.commands.install",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn dependencies(&self) -> Vec<Ref> {
        vec![Ref::new(Kind::Installer, self.installer_ref.clone())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_repository_requires_url() {
        let s: RepositorySpec =
            serde_yaml::from_str("{installerRef: helm, source: git}").unwrap();
        assert!(s.validate("charts").is_err());

        let s: RepositorySpec = serde_yaml::from_str(
            "{installerRef: helm, source: git, url: \"https://github.com/org/charts\"}",
        )
        .unwrap();
        assert!(s.validate("charts").is_ok());
        assert_eq!(s.dependencies(), vec![Ref::new(Kind::Installer, "helm")]);
    }

    #[test]
    fn delegation_repository_requires_install_command() {
        let s: RepositorySpec = serde_yaml::from_str(
            "{installerRef: helm, source: delegation, commands: {install: \"helm repo add stable https://charts\"}}",
        )
        .unwrap();
        assert!(s.validate("stable").is_ok());
    }
}
