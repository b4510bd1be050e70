//! Command sets for delegation-style installs.

use serde::{Deserialize, Serialize};

/// Shell snippets for the phases of a delegated install. Each snippet is
/// run through `sh -c`; multi-line snippets are allowed. Install-command
/// templates may reference the closed variable set of [`crate::template`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_version: Option<String>,
}

impl CommandSet {
    /// Whether the set carries an install command, the minimum for any
    /// delegation target.
    pub fn has_install(&self) -> bool {
        self.install.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}
