//! CLI subcommand implementations.

pub mod apply;
pub mod doctor;
pub mod env;
pub mod get;
pub mod init;
pub mod logs;
pub mod plan;
pub mod state;
pub mod uninit;
pub mod validate;

use std::path::PathBuf;

use anyhow::{Context, Result};

use tomei::resource::ResourceStore;
use tomei::{manifest, Paths};

/// Loads manifests from the given paths, defaulting to the config
/// directory, and builds the resource store.
pub(crate) fn load_store(paths: &Paths, files: Vec<PathBuf>) -> Result<ResourceStore> {
    let sources = if files.is_empty() {
        let config = paths.config_dir().to_path_buf();
        anyhow::ensure!(
            config.exists(),
            "no manifests found: {} does not exist (pass --file or run `tomei init`)",
            config.display()
        );
        vec![config]
    } else {
        files
    };
    let resources = manifest::load(&sources).context("failed to load manifests")?;
    let store = ResourceStore::build(resources).context("invalid manifests")?;
    Ok(store)
}
