//! Runtime resources: language toolchains installed by download or by
//! delegating to their own bootstrap scripts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::command::CommandSet;
use super::source::SourceSpec;
use super::{ConfigError, Kind, Metadata};

/// A declared runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeResource {
    pub api_version: String,
    pub metadata: Metadata,
    pub spec: RuntimeSpec,
}

/// How the runtime itself gets onto the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Fetch an archive from `source` and place it under the managed
    /// runtimes directory.
    Download,
    /// Run the runtime's own `bootstrap` commands.
    Delegation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuntimeSpec {
    /// Requested version. Empty means latest.
    #[serde(default)]
    pub version: String,
    pub mode: InstallMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<CommandSet>,
    /// Binary names exported into the bin directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binaries: Vec<String>,
    /// Where exported binaries are symlinked. Defaults to the managed bin
    /// directory; falls back to `tool_bin_path` semantics when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_dir: Option<PathBuf>,
    /// Where this runtime's own package-install command drops binaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_bin_path: Option<PathBuf>,
    /// Environment exported when running this runtime's commands.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Templates for tools delegated to this runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<CommandSet>,
    /// Shell snippet printing the concrete version for dynamic-version
    /// runtimes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_version: Option<String>,
    /// When true, upgrading this runtime re-installs its dependent tools.
    #[serde(default)]
    pub taint_on_upgrade: bool,
}

impl RuntimeSpec {
    pub(super) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self.mode {
            InstallMode::Download => {
                let source = self.source.as_ref().ok_or_else(|| {
                    ConfigError::invalid(Kind::Runtime, name, "download mode requires spec.source")
                })?;
                if !source.url_ok() {
                    return Err(ConfigError::invalid(
                        Kind::Runtime,
                        name,
                        format!("source.url must be https, got {:?}", source.url),
                    ));
                }
                if let Some(checksum) = &source.checksum {
                    checksum
                        .validate()
                        .map_err(|reason| ConfigError::invalid(Kind::Runtime, name, reason))?;
                }
            }
            InstallMode::Delegation => {
                let ok = self.bootstrap.as_ref().is_some_and(CommandSet::has_install);
                if !ok {
                    return Err(ConfigError::invalid(
                        Kind::Runtime,
                        name,
                        "delegation mode requires spec.bootstrap.install",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(yaml: &str) -> RuntimeResource {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn download_runtime_requires_source() {
        let r = runtime(
            "apiVersion: tomei.dev/v1\nmetadata: {name: go}\nspec:\n  version: 1.26.0\n  mode: download\n",
        );
        assert!(r.spec.validate("go").is_err());
    }

    #[test]
    fn delegation_runtime_requires_bootstrap_install() {
        let r = runtime(
            "apiVersion: tomei.dev/v1\nmetadata: {name: rustup}\nspec:\n  mode: delegation\n  bootstrap: {check: \"which rustup\"}\n",
        );
        assert!(r.spec.validate("rustup").is_err());

        let r = runtime(
            "apiVersion: tomei.dev/v1\nmetadata: {name: rustup}\nspec:\n  mode: delegation\n  bootstrap: {install: \"curl https://sh.rustup.rs | sh -s -- -y\"}\n",
        );
        assert!(r.spec.validate("rustup").is_ok());
    }

    #[test]
    fn manifest_round_trip_preserves_spec() {
        let r = runtime(
            "apiVersion: tomei.dev/v1\nmetadata: {name: go}\nspec:\n  version: 1.26.0\n  mode: download\n  source: {url: \"https://go.dev/dl/go{{.Version}}.linux-amd64.tar.gz\"}\n  binaries: [go, gofmt]\n  taintOnUpgrade: true\n",
        );
        assert!(r.spec.taint_on_upgrade);
        assert_eq!(r.spec.binaries, vec!["go", "gofmt"]);
        let json = serde_json::to_string(&r).unwrap();
        let back: RuntimeResource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
