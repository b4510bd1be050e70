//! Reconciliation planning: diff desired resources against persisted state
//! and emit typed actions.

pub mod action;
pub mod graph;

use thiserror::Error;

use crate::resource::{ConfigError, ResourceStore, RuntimeSpec, ToolSpec};
use crate::state::{RuntimeState, State, ToolState, VersionKind};

pub use action::{
    ActionKind, CascadeOrigin, InstallerAction, Plan, RepositoryAction, RuntimeAction,
    ToolAction, REASON_RUNTIME_UPGRADED,
};
pub use graph::{install_layers, remove_layers};

#[derive(Error, Debug)]
pub enum PlanError {
    /// A runtime cannot be removed while installed tools still depend on
    /// it. Fail fast before any action runs.
    #[error(
        "runtime {runtime:?} is still required by installed tool {dependent:?}; \
         remove the tool first"
    )]
    RuntimeInUse { runtime: String, dependent: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Apply-wide reconcile flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanFlags {
    /// Re-install every entry whose version was requested as latest.
    pub sync: bool,
    /// Re-resolve tools with floating versions (latest or alias).
    pub update_tools: bool,
    /// Re-resolve runtimes with floating versions (latest or alias).
    pub update_runtimes: bool,
}

/// Diffs the desired resources against `state` and returns the actions
/// needed to converge. `state` is the planner's working copy: the taint
/// pass marks entries in place and those marks persist once the apply
/// commits.
pub fn reconcile(
    store: &ResourceStore,
    state: &mut State,
    flags: &PlanFlags,
) -> Result<Plan, PlanError> {
    taint_pass(state, flags);
    check_runtime_removals(store, state)?;
    store.validate()?;

    let mut plan = Plan::default();
    diff_installers(store, state, &mut plan);
    diff_repositories(store, state, &mut plan);
    diff_runtimes(store, state, &mut plan);
    diff_tools(store, state, &mut plan);
    cascade(store, state, &mut plan);
    Ok(plan)
}

/// Marks persisted entries for reinstall according to the update flags.
fn taint_pass(state: &mut State, flags: &PlanFlags) {
    if flags.sync {
        for entry in state.runtimes.values_mut() {
            if entry.version_kind == VersionKind::Latest && entry.taint_reason.is_empty() {
                entry.taint_reason = "sync".to_string();
            }
        }
        for entry in state.tools.values_mut() {
            if entry.version_kind == VersionKind::Latest && entry.taint_reason.is_empty() {
                entry.taint_reason = "sync".to_string();
            }
        }
    }
    if flags.update_tools {
        for entry in state.tools.values_mut() {
            if matches!(entry.version_kind, VersionKind::Latest | VersionKind::Alias)
                && entry.taint_reason.is_empty()
            {
                entry.taint_reason = "update_tools".to_string();
            }
        }
    }
    if flags.update_runtimes {
        for entry in state.runtimes.values_mut() {
            if matches!(entry.version_kind, VersionKind::Latest | VersionKind::Alias)
                && entry.taint_reason.is_empty()
            {
                entry.taint_reason = "update_runtimes".to_string();
            }
        }
    }
}

/// A runtime leaving the manifest must not strand installed tools. Tools
/// that leave the manifest in the same apply are fine; removes run in
/// reverse dependency order.
fn check_runtime_removals(store: &ResourceStore, state: &State) -> Result<(), PlanError> {
    for runtime_name in state.runtimes.keys() {
        if store.runtime(runtime_name).is_some() {
            continue; // still declared
        }
        for (tool_name, entry) in &state.tools {
            let depends = entry.runtime_ref.as_deref() == Some(runtime_name.as_str());
            let tool_stays = store.tool(tool_name).is_some();
            if depends && tool_stays {
                return Err(PlanError::RuntimeInUse {
                    runtime: runtime_name.clone(),
                    dependent: tool_name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn diff_installers(store: &ResourceStore, state: &State, plan: &mut Plan) {
    for resource in store.installers() {
        let name = &resource.metadata.name;
        match state.installers.get(name) {
            None => plan.installers.push(InstallerAction {
                name: name.clone(),
                kind: ActionKind::Install,
                resource: Some(resource.clone()),
                prior: None,
            }),
            Some(prior) => {
                let changed = prior.mode != resource.spec.mode
                    || prior.runtime_ref != resource.spec.runtime_ref
                    || prior.commands != resource.spec.commands;
                if changed {
                    plan.installers.push(InstallerAction {
                        name: name.clone(),
                        kind: ActionKind::Upgrade,
                        resource: Some(resource.clone()),
                        prior: Some(prior.clone()),
                    });
                }
            }
        }
    }
    for (name, prior) in &state.installers {
        if store.installer(name).is_none() {
            plan.installers.push(InstallerAction {
                name: name.clone(),
                kind: ActionKind::Remove,
                resource: None,
                prior: Some(prior.clone()),
            });
        }
    }
}

fn diff_repositories(store: &ResourceStore, state: &State, plan: &mut Plan) {
    for resource in store.repositories() {
        let name = &resource.metadata.name;
        match state.installer_repositories.get(name) {
            None => plan.repositories.push(RepositoryAction {
                name: name.clone(),
                kind: ActionKind::Install,
                resource: Some(resource.clone()),
                prior: None,
                reason: None,
            }),
            Some(prior) => {
                let spec = &resource.spec;
                let mut reason = None;
                if prior.source != spec.source
                    || prior.url != spec.url
                    || prior.commands != spec.commands
                    || prior.installer_ref != spec.installer_ref
                {
                    reason = Some("spec_changed".to_string());
                } else if !prior.taint_reason.is_empty() {
                    reason = Some(prior.taint_reason.clone());
                }
                if let Some(reason) = reason {
                    plan.repositories.push(RepositoryAction {
                        name: name.clone(),
                        kind: ActionKind::Upgrade,
                        resource: Some(resource.clone()),
                        prior: Some(prior.clone()),
                        reason: Some(reason),
                    });
                }
            }
        }
    }
    for (name, prior) in &state.installer_repositories {
        if store.repository(name).is_none() {
            plan.repositories.push(RepositoryAction {
                name: name.clone(),
                kind: ActionKind::Remove,
                resource: None,
                prior: Some(prior.clone()),
                reason: None,
            });
        }
    }
}

/// Reason an installed runtime no longer matches its declaration, if any.
fn runtime_upgrade_reason(spec: &RuntimeSpec, prior: &RuntimeState) -> Option<String> {
    if spec.version != prior.spec_version {
        return Some(format!(
            "version {} -> {}",
            display_version(&prior.spec_version),
            display_version(&spec.version)
        ));
    }
    if spec.mode != prior.mode
        || spec.source != prior.source
        || spec.bootstrap != prior.bootstrap
        || spec.binaries != prior.binaries
        || spec.env != prior.env
        || spec.commands != prior.commands
        || spec.resolve_version != prior.resolve_version
        || spec.bin_dir != prior.bin_dir
        || spec.tool_bin_path != prior.tool_bin_path
    {
        return Some("spec_changed".to_string());
    }
    if !prior.taint_reason.is_empty() {
        return Some(prior.taint_reason.clone());
    }
    None
}

fn diff_runtimes(store: &ResourceStore, state: &State, plan: &mut Plan) {
    for resource in store.runtimes() {
        let name = &resource.metadata.name;
        match state.runtimes.get(name) {
            None => plan.runtimes.push(RuntimeAction {
                name: name.clone(),
                kind: ActionKind::Install,
                resource: Some(resource.clone()),
                prior: None,
                reason: None,
            }),
            Some(prior) => {
                if let Some(reason) = runtime_upgrade_reason(&resource.spec, prior) {
                    plan.runtimes.push(RuntimeAction {
                        name: name.clone(),
                        kind: ActionKind::Upgrade,
                        resource: Some(resource.clone()),
                        prior: Some(prior.clone()),
                        reason: Some(reason),
                    });
                }
            }
        }
    }
    for (name, prior) in &state.runtimes {
        if store.runtime(name).is_none() {
            plan.runtimes.push(RuntimeAction {
                name: name.clone(),
                kind: ActionKind::Remove,
                resource: None,
                prior: Some(prior.clone()),
                reason: None,
            });
        }
    }
}

fn tool_upgrade_reason(spec: &ToolSpec, name: &str, prior: &ToolState) -> Option<String> {
    if spec.version != prior.spec_version {
        return Some(format!(
            "version {} -> {}",
            display_version(&prior.spec_version),
            display_version(&spec.version)
        ));
    }
    if spec.installer_ref != prior.installer_ref
        || spec.runtime_ref != prior.runtime_ref
        || spec.package != prior.package
        || spec.source != prior.source
        || spec.commands != prior.commands
        || spec.binaries_or(name) != prior.binaries
    {
        return Some("spec_changed".to_string());
    }
    if !prior.taint_reason.is_empty() {
        return Some(prior.taint_reason.clone());
    }
    None
}

fn diff_tools(store: &ResourceStore, state: &State, plan: &mut Plan) {
    for resource in store.tools() {
        let name = &resource.metadata.name;
        // Pattern resolution cannot fail here: store.validate() ran first.
        let pattern = store.tool_pattern(resource).ok();
        match state.tools.get(name) {
            None => plan.tools.push(ToolAction {
                name: name.clone(),
                kind: ActionKind::Install,
                resource: Some(resource.clone()),
                prior: None,
                pattern,
                reason: None,
                cascade: None,
            }),
            Some(prior) => {
                if let Some(reason) = tool_upgrade_reason(&resource.spec, name, prior) {
                    plan.tools.push(ToolAction {
                        name: name.clone(),
                        kind: ActionKind::Upgrade,
                        resource: Some(resource.clone()),
                        prior: Some(prior.clone()),
                        pattern,
                        reason: Some(reason),
                        cascade: None,
                    });
                }
            }
        }
    }
    for (name, prior) in &state.tools {
        if store.tool(name).is_none() {
            plan.tools.push(ToolAction {
                name: name.clone(),
                kind: ActionKind::Remove,
                resource: None,
                prior: Some(prior.clone()),
                pattern: None,
                reason: None,
                cascade: None,
            });
        }
    }
}

/// Promotes tools of upgrading `taint_on_upgrade` runtimes to upgrades.
///
/// Suppressed at plan time when the declared version already matches the
/// installed one (the upgrade cannot change the runtime); the executor
/// suppresses the remaining no-op case after version resolution.
fn cascade(store: &ResourceStore, state: &State, plan: &mut Plan) {
    let cascading: Vec<(String, String)> = plan
        .runtimes
        .iter()
        .filter(|action| action.kind == ActionKind::Upgrade)
        .filter_map(|action| {
            let resource = action.resource.as_ref()?;
            let prior = action.prior.as_ref()?;
            if !resource.spec.taint_on_upgrade {
                return None;
            }
            let declared = &resource.spec.version;
            if !declared.is_empty() && *declared == prior.version {
                return None; // cannot resolve to a different version
            }
            Some((action.name.clone(), prior.version.clone()))
        })
        .collect();

    for (runtime, prior_version) in cascading {
        // Promote installed dependents that would otherwise be no-ops.
        let dependents: Vec<String> = store
            .tools()
            .filter(|tool| tool.spec.runtime_ref.as_deref() == Some(runtime.as_str()))
            .map(|tool| tool.metadata.name.clone())
            .collect();
        for name in dependents {
            if let Some(existing) = plan.tools.iter_mut().find(|t| t.name == name) {
                if existing.kind == ActionKind::Upgrade && existing.cascade.is_none() {
                    existing.cascade = Some(CascadeOrigin {
                        runtime: runtime.clone(),
                        prior_version: prior_version.clone(),
                    });
                }
                continue; // installs and explicit upgrades already run
            }
            let Some(resource) = store.tool(&name) else { continue };
            plan.tools.push(ToolAction {
                name: name.clone(),
                kind: ActionKind::Upgrade,
                resource: Some(resource.clone()),
                prior: state.tools.get(&name).cloned(),
                pattern: store.tool_pattern(resource).ok(),
                reason: Some(REASON_RUNTIME_UPGRADED.to_string()),
                cascade: Some(CascadeOrigin {
                    runtime: runtime.clone(),
                    prior_version: prior_version.clone(),
                }),
            });
        }
        plan.tools.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

fn display_version(v: &str) -> &str {
    if v.is_empty() {
        "latest"
    } else {
        v
    }
}
