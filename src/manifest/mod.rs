//! Manifest loading.
//!
//! Manifests are YAML documents, one resource per document; files may hold
//! several documents separated by `---`. Directories are walked for
//! `*.yaml`/`*.yml` in sorted order so loading is deterministic. The loader
//! injects the platform tags `os`, `arch`, and `headless` as labels every
//! manifest can reference; everything else is the schema's business.

use std::path::{Path, PathBuf};

use serde::de::Deserialize as _;

use crate::platform;
use crate::resource::{ConfigError, Resource};

/// Loads and validates every resource declared under `paths`.
pub fn load(paths: &[PathBuf]) -> Result<Vec<Resource>, ConfigError> {
    let mut files = Vec::new();
    for path in paths {
        collect_files(path, &mut files)?;
    }
    files.sort();
    files.dedup();

    let mut resources = Vec::new();
    for file in &files {
        let text = std::fs::read_to_string(file).map_err(|source| ConfigError::Io {
            path: file.display().to_string(),
            source,
        })?;
        for document in serde_yaml::Deserializer::from_str(&text) {
            let value = serde_yaml::Value::deserialize(document).map_err(|source| {
                ConfigError::Parse { path: file.display().to_string(), source }
            })?;
            if value.is_null() {
                continue; // empty document between separators
            }
            let mut resource: Resource =
                serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
                    path: file.display().to_string(),
                    source,
                })?;
            inject_platform_labels(&mut resource);
            resource.validate()?;
            resources.push(resource);
        }
    }
    Ok(resources)
}

fn collect_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io { path: path.display().to_string(), source };
    let meta = std::fs::metadata(path).map_err(io_err)?;
    if meta.is_file() {
        out.push(path.to_path_buf());
        return Ok(());
    }
    for entry in std::fs::read_dir(path).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let child = entry.path();
        if child.is_dir() {
            collect_files(&child, out)?;
        } else if matches!(
            child.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        ) {
            out.push(child);
        }
    }
    Ok(())
}

/// Well-known platform tags, available to every manifest as labels.
fn inject_platform_labels(resource: &mut Resource) {
    let labels = &mut resource.metadata_mut().labels;
    labels
        .entry("os".to_string())
        .or_insert_with(|| platform::os().to_string());
    labels
        .entry("arch".to_string())
        .or_insert_with(|| platform::arch().to_string());
    labels
        .entry("headless".to_string())
        .or_insert_with(|| platform::headless().to_string());
}
