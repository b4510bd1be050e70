//! Tool sets: planning-time sugar expanding into tools that share one
//! installer or runtime. Never persisted.

use serde::{Deserialize, Serialize};

use super::tool::{PackageId, ToolResource, ToolSpec};
use super::{ConfigError, Kind, Metadata, Ref};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSetResource {
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: ToolSetSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolSetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_ref: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSetMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolSetMember {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,
}

impl ToolSetSpec {
    pub(super) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match (&self.installer_ref, &self.runtime_ref) {
            (Some(_), Some(_)) => Err(ConfigError::invalid(
                Kind::ToolSet,
                name,
                "installerRef and runtimeRef are mutually exclusive",
            )),
            (None, None) => Err(ConfigError::invalid(
                Kind::ToolSet,
                name,
                "a tool set requires installerRef or runtimeRef",
            )),
            _ => {
                for member in &self.tools {
                    if member.name.is_empty() {
                        return Err(ConfigError::invalid(
                            Kind::ToolSet,
                            name,
                            "every tool set member needs a name",
                        ));
                    }
                }
                Ok(())
            }
        }
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
}

impl ToolSetResource {
    /// Expands the set into concrete tools inheriting the shared ref.
    pub fn expand(&self) -> Vec<ToolResource> {
        self.spec
            .tools
            .iter()
            .map(|member| ToolResource {
                api_version: self.api_version.clone(),
                metadata: Metadata {
                    name: member.name.clone(),
                    description: None,
                    labels: self.metadata.labels.clone(),
                },
                spec: ToolSpec {
                    version: member.version.clone(),
                    installer_ref: self.spec.installer_ref.clone(),
                    runtime_ref: self.spec.runtime_ref.clone(),
                    package: member.package.clone(),
                    source: None,
                    commands: None,
                    binaries: member.binaries.clone(),
                },
            })
            .collect()
    }
}
