//! Installer resources: identity-only download installers and
//! delegation installers that install tools through a runtime.

use serde::{Deserialize, Serialize};

use super::command::CommandSet;
use super::{ConfigError, Kind, Metadata, Ref};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerResource {
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: InstallerSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerMode {
    /// No commands; tools using it fetch artifacts themselves.
    Download,
    /// Carries a runtime ref and a command set applied per tool.
    Delegation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstallerSpec {
    pub mode: InstallerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
}

impl InstallerSpec {
    pub(super) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self.mode {
            InstallerMode::Download => {
                if self.commands.is_some() || self.runtime_ref.is_some() {
                    return Err(ConfigError::invalid(
                        Kind::Installer,
                        name,
                        "download installers are identity-only; commands and runtimeRef are not allowed",
                    ));
                }
            }
            InstallerMode::Delegation => {
                if self.runtime_ref.is_none() {
                    return Err(ConfigError::invalid(
                        Kind::Installer,
                        name,
                        "delegation installers require spec.runtimeRef",
                    ));
                }
                let ok = self.commands.as_ref().is_some_and(CommandSet::has_install);
                if !ok {
                    return Err(ConfigError::invalid(
                        Kind::Installer,
                        name,
                        "delegation installers require spec.commands.install",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn dependencies(&self) -> Vec<Ref> {
        match (&self.mode, &self.runtime_ref) {
            (InstallerMode::Delegation, Some(runtime)) => {
                vec![Ref::new(Kind::Runtime, runtime.clone())]
            }
            _ => Vec::new(),
        }
    }
}
