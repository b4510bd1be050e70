//! Topological layering of the action set.
//!
//! Install/upgrade actions run in ascending dependency rank: a layer only
//! starts once every node of the prior layer has finished. Removes run the
//! same ranks in reverse, so dependents disappear before their
//! dependencies.

use std::collections::BTreeMap;

use crate::resource::{Kind, Ref};

use super::action::{ActionKind, Plan};

/// Layers for install/upgrade actions, ascending by dependency rank.
pub fn install_layers(plan: &Plan) -> Vec<Vec<Ref>> {
    let mut deps: BTreeMap<Ref, Vec<Ref>> = BTreeMap::new();
    for action in &plan.runtimes {
        if matches!(action.kind, ActionKind::Install | ActionKind::Upgrade) {
            deps.insert(Ref::new(Kind::Runtime, &action.name), Vec::new());
        }
    }
    for action in &plan.installers {
        if matches!(action.kind, ActionKind::Install | ActionKind::Upgrade) {
            let edges = action
                .resource
                .as_ref()
                .map(|r| installer_deps(r.spec.mode, r.spec.runtime_ref.as_deref()))
                .unwrap_or_default();
            deps.insert(Ref::new(Kind::Installer, &action.name), edges);
        }
    }
    for action in &plan.repositories {
        if matches!(action.kind, ActionKind::Install | ActionKind::Upgrade) {
            let edges = action
                .resource
                .as_ref()
                .map(|r| vec![Ref::new(Kind::Installer, r.spec.installer_ref.clone())])
                .unwrap_or_default();
            deps.insert(Ref::new(Kind::InstallerRepository, &action.name), edges);
        }
    }
    for action in &plan.tools {
        if matches!(action.kind, ActionKind::Install | ActionKind::Upgrade) {
            let edges = action
                .resource
                .as_ref()
                .map(|r| r.spec.dependencies())
                .unwrap_or_default();
            deps.insert(Ref::new(Kind::Tool, &action.name), edges);
        }
    }
    layer(&deps)
}

fn installer_deps(
    mode: crate::resource::InstallerMode,
    runtime_ref: Option<&str>,
) -> Vec<Ref> {
    match (mode, runtime_ref) {
        (crate::resource::InstallerMode::Delegation, Some(runtime)) => {
            vec![Ref::new(Kind::Runtime, runtime)]
        }
        _ => Vec::new(),
    }
}

/// Layers for remove actions, dependents first. Edges come from the prior
/// state entries; the resources themselves are gone from the manifest.
pub fn remove_layers(plan: &Plan) -> Vec<Vec<Ref>> {
    let mut deps: BTreeMap<Ref, Vec<Ref>> = BTreeMap::new();
    for action in &plan.runtimes {
        if action.kind == ActionKind::Remove {
            deps.insert(Ref::new(Kind::Runtime, &action.name), Vec::new());
        }
    }
    for action in &plan.installers {
        if action.kind == ActionKind::Remove {
            let edges = action
                .prior
                .as_ref()
                .and_then(|p| p.runtime_ref.as_deref())
                .map(|r| vec![Ref::new(Kind::Runtime, r)])
                .unwrap_or_default();
            deps.insert(Ref::new(Kind::Installer, &action.name), edges);
        }
    }
    for action in &plan.repositories {
        if action.kind == ActionKind::Remove {
            let edges = action
                .prior
                .as_ref()
                .map(|p| vec![Ref::new(Kind::Installer, p.installer_ref.clone())])
                .unwrap_or_default();
            deps.insert(Ref::new(Kind::InstallerRepository, &action.name), edges);
        }
    }
    for action in &plan.tools {
        if action.kind == ActionKind::Remove {
            let mut edges = Vec::new();
            if let Some(prior) = &action.prior {
                if let Some(runtime) = &prior.runtime_ref {
                    edges.push(Ref::new(Kind::Runtime, runtime.clone()));
                }
                if let Some(installer) = &prior.installer_ref {
                    edges.push(Ref::new(Kind::Installer, installer.clone()));
                }
            }
            deps.insert(Ref::new(Kind::Tool, &action.name), edges);
        }
    }
    let mut layers = layer(&deps);
    layers.reverse();
    layers
}

/// Partitions nodes into rank-equivalence classes. Edges pointing outside
/// the node set are already satisfied and carry no ordering weight.
fn layer(deps: &BTreeMap<Ref, Vec<Ref>>) -> Vec<Vec<Ref>> {
    fn rank_of(
        node: &Ref,
        deps: &BTreeMap<Ref, Vec<Ref>>,
        memo: &mut BTreeMap<Ref, usize>,
    ) -> usize {
        if let Some(rank) = memo.get(node) {
            return *rank;
        }
        let rank = deps
            .get(node)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|dep| deps.contains_key(*dep))
                    .map(|dep| rank_of(dep, deps, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(node.clone(), rank);
        rank
    }

    let mut memo = BTreeMap::new();
    let mut by_rank: BTreeMap<usize, Vec<Ref>> = BTreeMap::new();
    for node in deps.keys() {
        let rank = rank_of(node, deps, &mut memo);
        by_rank.entry(rank).or_default().push(node.clone());
    }
    by_rank.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::action::{InstallerAction, RuntimeAction, ToolAction};
    use crate::resource::{InstallerResource, RuntimeResource, ToolResource};

    fn parse_runtime(name: &str) -> RuntimeResource {
        serde_yaml::from_str(&format!(
            "apiVersion: tomei.dev/v1\nmetadata: {{name: {name}}}\nspec:\n  mode: delegation\n  bootstrap: {{install: \"./get.sh\"}}\n"
        ))
        .unwrap()
    }

    fn parse_installer(name: &str, runtime: &str) -> InstallerResource {
        serde_yaml::from_str(&format!(
            "apiVersion: tomei.dev/v1\nmetadata: {{name: {name}}}\nspec:\n  mode: delegation\n  runtimeRef: {runtime}\n  commands: {{install: \"x {{{{.Package}}}}\"}}\n"
        ))
        .unwrap()
    }

    fn parse_tool(name: &str, runtime: &str) -> ToolResource {
        serde_yaml::from_str(&format!(
            "apiVersion: tomei.dev/v1\nmetadata: {{name: {name}}}\nspec: {{runtimeRef: {runtime}, package: pkg/{name}}}\n"
        ))
        .unwrap()
    }

    #[test]
    fn layers_follow_dependency_rank() {
        let plan = Plan {
            runtimes: vec![RuntimeAction {
                name: "go".into(),
                kind: ActionKind::Install,
                resource: Some(parse_runtime("go")),
                prior: None,
                reason: None,
            }],
            installers: vec![InstallerAction {
                name: "go-install".into(),
                kind: ActionKind::Install,
                resource: Some(parse_installer("go-install", "go")),
                prior: None,
            }],
            repositories: Vec::new(),
            tools: vec![
                ToolAction {
                    name: "gopls".into(),
                    kind: ActionKind::Install,
                    resource: Some(parse_tool("gopls", "go")),
                    prior: None,
                    pattern: None,
                    reason: None,
                    cascade: None,
                },
                ToolAction {
                    name: "standalone".into(),
                    kind: ActionKind::Install,
                    resource: Some(serde_yaml::from_str(
                        "apiVersion: tomei.dev/v1\nmetadata: {name: standalone}\nspec: {commands: {install: \"./install.sh\"}}\n",
                    ).unwrap()),
                    prior: None,
                    pattern: None,
                    reason: None,
                    cascade: None,
                },
            ],
        };

        let layers = install_layers(&plan);
        assert_eq!(layers.len(), 2);
        // Layer 1: the runtime plus everything with no unmet dependency.
        assert!(layers[0].contains(&Ref::new(Kind::Runtime, "go")));
        assert!(layers[0].contains(&Ref::new(Kind::Tool, "standalone")));
        assert!(layers[0].contains(&Ref::new(Kind::Installer, "go-install")));
        // gopls waits for go.
        assert_eq!(layers[1], vec![Ref::new(Kind::Tool, "gopls")]);
    }

    #[test]
    fn dependencies_outside_the_action_set_do_not_gate() {
        let plan = Plan {
            tools: vec![ToolAction {
                name: "gopls".into(),
                kind: ActionKind::Install,
                resource: Some(parse_tool("gopls", "go")),
                prior: None,
                pattern: None,
                reason: None,
                cascade: None,
            }],
            ..Plan::default()
        };
        // go is already installed (not in the action set): gopls is layer 1.
        let layers = install_layers(&plan);
        assert_eq!(layers, vec![vec![Ref::new(Kind::Tool, "gopls")]]);
    }
}
