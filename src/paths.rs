//! Directory layout for managed installs, state, and caches.
//!
//! The user variant lives under the XDG base directories
//! (`$XDG_DATA_HOME/tomei`, `$XDG_CONFIG_HOME/tomei`); the system-privilege
//! variant under `/var/lib/tomei`. Everything tomei writes stays inside
//! these roots plus the bin directory.

use std::path::{Path, PathBuf};

/// Resolved directory layout for one tomei instance.
#[derive(Debug, Clone)]
pub struct Paths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl Paths {
    /// Layout for the current user, honoring `XDG_CONFIG_HOME` and
    /// `XDG_DATA_HOME`.
    ///
    /// # Panics
    /// Panics if the home directory cannot be determined and neither XDG
    /// variable is set.
    pub fn user() -> Self {
        let config_base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .expect("could not determine home directory");
        let data_base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
            .expect("could not determine home directory");
        Self {
            config_dir: config_base.join("tomei"),
            data_dir: data_base.join("tomei"),
        }
    }

    /// Layout for system-privilege resources under `/var/lib/tomei`.
    pub fn system() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/tomei"),
            data_dir: PathBuf::from("/var/lib/tomei"),
        }
    }

    /// Layout rooted at an arbitrary directory. Used by tests.
    pub fn rooted(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    /// Directory holding manifest files.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Root data directory; also where `state.json` lives.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory the state store operates in.
    pub fn state_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Install root for a runtime at a specific version.
    pub fn runtime_dir(&self, name: &str, version: &str) -> PathBuf {
        self.data_dir.join("runtimes").join(name).join(version)
    }

    /// Install root for a tool at a specific version.
    pub fn tool_dir(&self, name: &str, version: &str) -> PathBuf {
        self.data_dir.join("tools").join(name).join(version)
    }

    /// Where exported binaries are symlinked.
    pub fn bin_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }

    /// Checkout directory for an installer repository.
    pub fn repo_dir(&self, installer: &str, name: &str) -> PathBuf {
        self.data_dir.join("repos").join(installer).join(name)
    }

    /// Registry byte cache root.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Failure-log root; one subdirectory per apply session.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Scratch space guaranteed to be on the same volume as the data dir,
    /// so renames into place are atomic.
    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }
}
