//! Registry document schema and override merging.
//!
//! A registry package file is one YAML document listing package records.
//! Unknown fields are rejected: a record this resolver cannot fully
//! understand must not silently resolve to a wrong URL.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level registry package file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryDoc {
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

/// One package record, before override merging.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageRecord {
    #[serde(rename = "type")]
    pub package_type: Option<String>,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
    /// Asset template over `{{.Version}} {{.OS}} {{.Arch}}`.
    pub asset: Option<String>,
    pub format: Option<String>,
    /// Canonical token -> target token, applied to OS and Arch before
    /// template expansion.
    pub replacements: Option<BTreeMap<String, String>>,
    pub supported_envs: Option<Vec<String>>,
    pub checksum: Option<ChecksumBlock>,
    pub version_constraint: Option<String>,
    pub version_overrides: Option<Vec<VersionOverride>>,
    pub overrides: Option<Vec<OsOverride>>,
}

/// Record fields overridden for a version range. Matching is by semver
/// constraint; fields present here replace the base fields wholesale.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionOverride {
    pub version_constraint: String,
    pub asset: Option<String>,
    pub format: Option<String>,
    pub replacements: Option<BTreeMap<String, String>>,
    pub supported_envs: Option<Vec<String>>,
    pub checksum: Option<ChecksumBlock>,
    pub overrides: Option<Vec<OsOverride>>,
}

/// Record fields overridden for an OS/arch. Scalars replace; the
/// `replacements` map merges key-wise.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OsOverride {
    pub goos: Option<String>,
    pub goarch: Option<String>,
    pub asset: Option<String>,
    pub format: Option<String>,
    pub replacements: Option<BTreeMap<String, String>>,
    pub checksum: Option<ChecksumBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChecksumBlock {
    #[serde(rename = "type")]
    pub checksum_type: Option<String>,
    /// Checksum-asset template; may additionally reference `{{.Asset}}`.
    pub asset: Option<String>,
    pub algorithm: Option<String>,
    pub enabled: Option<bool>,
}

impl OsOverride {
    /// Whether this override matches the requested platform. An absent
    /// field matches anything.
    pub fn matches(&self, os: &str, arch: &str) -> bool {
        self.goos.as_deref().is_none_or(|goos| goos == os)
            && self.goarch.as_deref().is_none_or(|goarch| goarch == arch)
    }
}

impl PackageRecord {
    /// Applies a matching version override: each field present in the
    /// override replaces the corresponding base field entirely. In
    /// particular `replacements` is NOT merged; a version override with a
    /// one-entry map drops every base replacement.
    pub fn apply_version_override(&mut self, vo: &VersionOverride) {
        if vo.asset.is_some() {
            self.asset = vo.asset.clone();
        }
        if vo.format.is_some() {
            self.format = vo.format.clone();
        }
        if vo.replacements.is_some() {
            self.replacements = vo.replacements.clone();
        }
        if vo.supported_envs.is_some() {
            self.supported_envs = vo.supported_envs.clone();
        }
        if vo.checksum.is_some() {
            self.checksum = vo.checksum.clone();
        }
        if vo.overrides.is_some() {
            self.overrides = vo.overrides.clone();
        }
    }

    /// Applies a matching OS override: scalar fields replace, the
    /// `replacements` map merges key-wise with the override winning.
    pub fn apply_os_override(&mut self, ov: &OsOverride) {
        if ov.asset.is_some() {
            self.asset = ov.asset.clone();
        }
        if ov.format.is_some() {
            self.format = ov.format.clone();
        }
        if ov.checksum.is_some() {
            self.checksum = ov.checksum.clone();
        }
        if let Some(incoming) = &ov.replacements {
            let merged = self.replacements.get_or_insert_with(BTreeMap::new);
            for (key, value) in incoming {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
}
