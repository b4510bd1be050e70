//! The action taxonomy the planner emits.
//!
//! Actions carry enough payload to execute without re-reading manifests:
//! the declared resource (for install/upgrade) and the prior state entry
//! (for upgrade/remove).

use std::fmt;

use serde::Serialize;

use crate::resource::{
    InstallerResource, RepositoryResource, RuntimeResource, ToolPattern, ToolResource,
};
use crate::state::{InstallerState, RepositoryState, RuntimeState, ToolState};

/// What the executor should do with one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Install,
    Upgrade,
    Remove,
    /// Nothing to do. Never appears in a plan's lists; the planner omits
    /// these entries.
    None,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Install => "install",
            ActionKind::Upgrade => "upgrade",
            ActionKind::Remove => "remove",
            ActionKind::None => "none",
        };
        f.write_str(s)
    }
}

/// Why a tool upgrade was forced by its runtime, with enough context for
/// the executor to suppress the reinstall when the runtime's resolved
/// version turns out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeOrigin {
    pub runtime: String,
    pub prior_version: String,
}

/// Reason label for cascaded tool upgrades.
pub const REASON_RUNTIME_UPGRADED: &str = "runtime_upgraded";

#[derive(Debug, Clone)]
pub struct RuntimeAction {
    pub name: String,
    pub kind: ActionKind,
    pub resource: Option<RuntimeResource>,
    pub prior: Option<RuntimeState>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolAction {
    pub name: String,
    pub kind: ActionKind,
    pub resource: Option<ToolResource>,
    pub prior: Option<ToolState>,
    /// Resolved install pattern; present for install/upgrade.
    pub pattern: Option<ToolPattern>,
    pub reason: Option<String>,
    /// Set when this upgrade was forced by a runtime upgrade.
    pub cascade: Option<CascadeOrigin>,
}

#[derive(Debug, Clone)]
pub struct RepositoryAction {
    pub name: String,
    pub kind: ActionKind,
    pub resource: Option<RepositoryResource>,
    pub prior: Option<RepositoryState>,
    pub reason: Option<String>,
}

/// Installers have no install step; their actions only rewrite the state
/// record so later applies can detect tools whose installer disappeared.
#[derive(Debug, Clone)]
pub struct InstallerAction {
    pub name: String,
    pub kind: ActionKind,
    pub resource: Option<InstallerResource>,
    pub prior: Option<InstallerState>,
}

/// The planner's output: per-kind action lists, each ordered by name.
/// Cross-list ordering is the scheduler's concern.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub runtimes: Vec<RuntimeAction>,
    pub installers: Vec<InstallerAction>,
    pub repositories: Vec<RepositoryAction>,
    pub tools: Vec<ToolAction>,
}

impl Plan {
    /// True when the apply would be a no-op.
    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
            && self.installers.is_empty()
            && self.repositories.is_empty()
            && self.tools.is_empty()
    }

    /// Number of actions that run installers (installer records excluded).
    pub fn work_len(&self) -> usize {
        self.runtimes.len() + self.repositories.len() + self.tools.len()
    }
}
