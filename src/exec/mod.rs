//! Layered parallel execution of a plan.
//!
//! The combined action set is partitioned into dependency layers. Within a
//! layer nodes run concurrently under a counting semaphore; a layer
//! completes only when every started node has finished. The first failure
//! in a layer cancels its peers through the layer's cancellation token and
//! stops the apply before the next layer; successes already committed to
//! state stay committed.

pub mod context;
pub mod event;
pub mod logs;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::install::tool::ToolDeps;
use crate::install::{self, InstallContext, InstallError};
use crate::plan::{
    install_layers, remove_layers, ActionKind, InstallerAction, Plan, RepositoryAction,
    RuntimeAction, ToolAction,
};
use crate::resource::{Kind, Ref};
use crate::state::{AquaPin, RegistryPin, State, StateError, StateStore};

pub use context::NodeContext;
pub use event::{Event, EventSink, JsonSink, MemorySink, NodeId, TextSink};
pub use logs::LogStore;

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("{node} failed: {message}")]
    Node {
        node: NodeId,
        message: String,
        /// Failure log written by the log store, when one exists.
        log: Option<PathBuf>,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Outcome counters for one apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub installed: usize,
    pub upgraded: usize,
    pub removed: usize,
    /// Nodes skipped after their cascade turned out to be a no-op.
    pub skipped: usize,
}

impl ApplyReport {
    pub fn total(&self) -> usize {
        self.installed + self.upgraded + self.removed
    }
}

enum NodeWork {
    Runtime(RuntimeAction),
    Installer(InstallerAction),
    Repository(RepositoryAction),
    Tool(ToolAction),
}

enum NodeOutcome {
    Done(NodeId, ActionKind),
    Skipped(NodeId),
    Cancelled(NodeId),
    Failed(NodeId, String, Option<PathBuf>),
}

/// Drives a plan to completion.
pub struct Executor {
    ctx: InstallContext,
    sink: Arc<dyn EventSink>,
    parallelism: usize,
}

impl Executor {
    pub fn new(ctx: InstallContext, sink: Arc<dyn EventSink>, parallelism: usize) -> Self {
        Self { ctx, sink, parallelism: parallelism.max(1) }
    }

    /// Applies the plan against `state`, committing each success through
    /// `store` under its lock. Returns the first fatal error after all
    /// in-flight nodes have terminated.
    pub async fn apply(
        &self,
        plan: Plan,
        store: Arc<StateStore>,
        state: State,
    ) -> Result<ApplyReport, ApplyError> {
        let logs = Arc::new(LogStore::new(&self.ctx.paths.logs_dir()));
        let result = self.apply_inner(plan, store, state, &logs).await;
        logs.close();
        result
    }

    async fn apply_inner(
        &self,
        plan: Plan,
        store: Arc<StateStore>,
        mut state: State,
        logs: &Arc<LogStore>,
    ) -> Result<ApplyReport, ApplyError> {
        // Pin the registry ref on first use so later applies resolve
        // against the same registry state.
        if state.registry.is_none() && plan_uses_registry(&plan) {
            state.registry = Some(RegistryPin {
                aqua: Some(AquaPin {
                    reference: self.ctx.registry_ref.clone(),
                    updated_at: chrono::Utc::now(),
                }),
            });
        }

        let install_order = install_layers(&plan);
        let remove_order = remove_layers(&plan);
        let mut work = index_work(plan);

        let shared = Arc::new(Mutex::new(state));
        let mut report = ApplyReport::default();

        for layer in install_order.into_iter().chain(remove_order) {
            let outcomes = self.run_layer(&layer, &mut work, &store, &shared, logs).await;
            let mut first_failure: Option<ApplyError> = None;
            for outcome in outcomes {
                match outcome {
                    NodeOutcome::Done(_, ActionKind::Install) => report.installed += 1,
                    NodeOutcome::Done(_, ActionKind::Upgrade) => report.upgraded += 1,
                    NodeOutcome::Done(_, ActionKind::Remove) => report.removed += 1,
                    NodeOutcome::Done(_, ActionKind::None) => {}
                    NodeOutcome::Skipped(_) => report.skipped += 1,
                    NodeOutcome::Cancelled(_) => {}
                    NodeOutcome::Failed(node, message, log) => {
                        if first_failure.is_none() {
                            first_failure = Some(ApplyError::Node { node, message, log });
                        }
                    }
                }
            }
            if let Some(error) = first_failure {
                return Err(error);
            }
        }
        Ok(report)
    }

    /// Starts every node of a layer, capped by the parallelism limit, and
    /// waits for all of them. The first failure cancels the layer token.
    async fn run_layer(
        &self,
        layer: &[Ref],
        work: &mut BTreeMap<Ref, NodeWork>,
        store: &Arc<StateStore>,
        shared: &Arc<Mutex<State>>,
        logs: &Arc<LogStore>,
    ) -> Vec<NodeOutcome> {
        let token = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut set: JoinSet<NodeOutcome> = JoinSet::new();

        for node_ref in layer {
            let Some(node_work) = work.remove(node_ref) else { continue };
            let node = NodeId::new(node_ref.kind, node_ref.name.clone());
            let ctx = self.ctx.clone();
            let sink = self.sink.clone();
            let logs = logs.clone();
            let shared = shared.clone();
            let token = token.clone();
            let semaphore = semaphore.clone();
            let store = store.clone();
            set.spawn(async move {
                let _permit =
                    semaphore.acquire_owned().await.expect("layer semaphore closed");
                if token.is_cancelled() {
                    return NodeOutcome::Cancelled(node);
                }
                run_node(node, node_work, ctx, sink, logs, shared, token, store).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                NodeOutcome::Failed(
                    NodeId::new(Kind::Tool, "internal"),
                    format!("node task panicked: {e}"),
                    None,
                )
            });
            if matches!(outcome, NodeOutcome::Failed(..)) {
                token.cancel();
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

fn plan_uses_registry(plan: &Plan) -> bool {
    plan.tools.iter().any(|action| {
        matches!(action.kind, ActionKind::Install | ActionKind::Upgrade)
            && action.resource.as_ref().is_some_and(|r| {
                r.spec.installer_ref.is_some()
                    && r.spec.source.is_none()
                    && r.spec.package.is_some()
            })
    })
}

fn index_work(plan: Plan) -> BTreeMap<Ref, NodeWork> {
    let mut work = BTreeMap::new();
    for action in plan.runtimes {
        work.insert(Ref::new(Kind::Runtime, action.name.clone()), NodeWork::Runtime(action));
    }
    for action in plan.installers {
        work.insert(Ref::new(Kind::Installer, action.name.clone()), NodeWork::Installer(action));
    }
    for action in plan.repositories {
        work.insert(
            Ref::new(Kind::InstallerRepository, action.name.clone()),
            NodeWork::Repository(action),
        );
    }
    for action in plan.tools {
        work.insert(Ref::new(Kind::Tool, action.name.clone()), NodeWork::Tool(action));
    }
    work
}

fn tool_deps_from(state: &State, runtime_ref: Option<&str>, installer_ref: Option<&str>) -> ToolDeps {
    let runtime = runtime_ref.and_then(|name| state.runtimes.get(name).cloned());
    let installer = installer_ref.and_then(|name| state.installers.get(name).cloned());
    let installer_runtime = installer
        .as_ref()
        .and_then(|i| i.runtime_ref.as_deref())
        .and_then(|name| state.runtimes.get(name).cloned());
    ToolDeps { runtime, installer, installer_runtime }
}

#[allow(clippy::too_many_arguments)]
async fn run_node(
    node: NodeId,
    work: NodeWork,
    ctx: InstallContext,
    sink: Arc<dyn EventSink>,
    logs: Arc<LogStore>,
    shared: Arc<Mutex<State>>,
    token: CancellationToken,
    store: Arc<StateStore>,
) -> NodeOutcome {
    // Installer records are bookkeeping, not work: no events, no logs.
    if let NodeWork::Installer(action) = &work {
        let mut state = shared.lock().expect("state mutex poisoned");
        match action.kind {
            ActionKind::Remove => {
                state.installers.remove(&action.name);
            }
            _ => {
                if let Some(resource) = &action.resource {
                    state.installers.insert(
                        action.name.clone(),
                        crate::state::InstallerState {
                            mode: resource.spec.mode,
                            runtime_ref: resource.spec.runtime_ref.clone(),
                            commands: resource.spec.commands.clone(),
                            updated_at: chrono::Utc::now(),
                        },
                    );
                }
            }
        }
        return match store.save(&state) {
            Ok(()) => NodeOutcome::Done(node, ActionKind::None),
            Err(e) => NodeOutcome::Failed(node, e.to_string(), None),
        };
    }

    let (action_kind, version, method) = describe(&work);

    // Cascade suppression: a tool promoted because its runtime upgraded is
    // skipped when the runtime resolved back to the version it already
    // had.
    if let NodeWork::Tool(action) = &work {
        if let Some(cascade) = &action.cascade {
            let unchanged = {
                let state = shared.lock().expect("state mutex poisoned");
                state
                    .runtimes
                    .get(&cascade.runtime)
                    .is_some_and(|r| r.version == cascade.prior_version)
            };
            let only_cascade =
                action.reason.as_deref() == Some(crate::plan::REASON_RUNTIME_UPGRADED);
            if unchanged && only_cascade {
                return NodeOutcome::Skipped(node);
            }
        }
    }

    logs.begin(node.clone(), &version, action_kind);
    sink.emit(&Event::Start {
        node: node.clone(),
        version: version.clone(),
        action: action_kind,
        method,
    });

    let node_ctx = NodeContext::new(
        node.clone(),
        {
            let sink = sink.clone();
            let node = node.clone();
            Arc::new(move |downloaded, total| {
                sink.emit(&Event::Progress { node: node.clone(), downloaded, total });
            })
        },
        {
            let sink = sink.clone();
            let logs = logs.clone();
            let node = node.clone();
            Arc::new(move |line: &str| {
                logs.record(&node, line);
                sink.emit(&Event::Output { node: node.clone(), line: line.to_string() });
            })
        },
        token.clone(),
    );

    let result = context::scope(node_ctx, execute_work(&work, &ctx, &shared)).await;

    match result {
        Ok(commit) => {
            let committed = {
                let mut state = shared.lock().expect("state mutex poisoned");
                commit(&mut state);
                store.save(&state)
            };
            match committed {
                Ok(()) => {
                    logs.complete(&node);
                    sink.emit(&Event::Complete { node: node.clone() });
                    NodeOutcome::Done(node, action_kind)
                }
                Err(e) => {
                    let message = e.to_string();
                    sink.emit(&Event::Error { node: node.clone(), message: message.clone() });
                    let log = logs.fail(&node, &message);
                    NodeOutcome::Failed(node, message, log)
                }
            }
        }
        Err(error) if error.is_cancelled() => {
            logs.complete(&node);
            NodeOutcome::Cancelled(node)
        }
        Err(error) => {
            let message = error.to_string();
            sink.emit(&Event::Error { node: node.clone(), message: message.clone() });
            let log = logs.fail(&node, &message);
            NodeOutcome::Failed(node, message, log)
        }
    }
}

type Commit = Box<dyn FnOnce(&mut State) + Send>;

/// Runs the node's installer and returns the state mutation to commit.
/// State is only touched through the returned closure, after success.
async fn execute_work(
    work: &NodeWork,
    ctx: &InstallContext,
    shared: &Arc<Mutex<State>>,
) -> Result<Commit, InstallError> {
    match work {
        NodeWork::Installer(_) => unreachable!("installer records are handled earlier"),
        NodeWork::Runtime(action) => match action.kind {
            ActionKind::Remove => {
                let entry = action
                    .prior
                    .clone()
                    .ok_or_else(|| InstallError::Invalid("remove without prior state".into()))?;
                install::runtime::remove(ctx, &entry, &action.name).await?;
                let name = action.name.clone();
                Ok(Box::new(move |state: &mut State| {
                    state.runtimes.remove(&name);
                }))
            }
            _ => {
                let resource = action
                    .resource
                    .clone()
                    .ok_or_else(|| InstallError::Invalid("install without resource".into()))?;
                let entry = install::runtime::install(ctx, &resource).await?;
                let name = action.name.clone();
                Ok(Box::new(move |state: &mut State| {
                    state.runtimes.insert(name, entry);
                }))
            }
        },
        NodeWork::Repository(action) => match action.kind {
            ActionKind::Remove => {
                let entry = action
                    .prior
                    .clone()
                    .ok_or_else(|| InstallError::Invalid("remove without prior state".into()))?;
                install::repository::remove(ctx, &entry, &action.name).await?;
                let name = action.name.clone();
                Ok(Box::new(move |state: &mut State| {
                    state.installer_repositories.remove(&name);
                }))
            }
            _ => {
                let resource = action
                    .resource
                    .clone()
                    .ok_or_else(|| InstallError::Invalid("install without resource".into()))?;
                let entry = install::repository::install(ctx, &resource).await?;
                let name = action.name.clone();
                Ok(Box::new(move |state: &mut State| {
                    state.installer_repositories.insert(name, entry);
                }))
            }
        },
        NodeWork::Tool(action) => match action.kind {
            ActionKind::Remove => {
                let entry = action
                    .prior
                    .clone()
                    .ok_or_else(|| InstallError::Invalid("remove without prior state".into()))?;
                let deps = {
                    let state = shared.lock().expect("state mutex poisoned");
                    tool_deps_from(
                        &state,
                        entry.runtime_ref.as_deref(),
                        entry.installer_ref.as_deref(),
                    )
                };
                install::tool::remove(ctx, &entry, &action.name, &deps).await?;
                let name = action.name.clone();
                Ok(Box::new(move |state: &mut State| {
                    state.tools.remove(&name);
                }))
            }
            _ => {
                let resource = action
                    .resource
                    .clone()
                    .ok_or_else(|| InstallError::Invalid("install without resource".into()))?;
                let pattern = action.pattern.ok_or_else(|| {
                    InstallError::Invalid("tool action without resolved pattern".into())
                })?;
                let deps = {
                    let state = shared.lock().expect("state mutex poisoned");
                    tool_deps_from(
                        &state,
                        resource.spec.runtime_ref.as_deref(),
                        resource.spec.installer_ref.as_deref(),
                    )
                };
                let entry = install::tool::install(ctx, &resource, pattern, &deps).await?;
                let name = action.name.clone();
                Ok(Box::new(move |state: &mut State| {
                    state.tools.insert(name, entry);
                }))
            }
        },
    }
}

fn describe(work: &NodeWork) -> (ActionKind, String, String) {
    match work {
        NodeWork::Runtime(action) => {
            let version = action
                .resource
                .as_ref()
                .map(|r| r.spec.version.clone())
                .or_else(|| action.prior.as_ref().map(|p| p.version.clone()))
                .unwrap_or_default();
            let method = action
                .resource
                .as_ref()
                .map(|r| match r.spec.mode {
                    crate::resource::InstallMode::Download => "download",
                    crate::resource::InstallMode::Delegation => "delegation",
                })
                .unwrap_or("state")
                .to_string();
            (action.kind, version, method)
        }
        NodeWork::Installer(action) => (action.kind, String::new(), "record".to_string()),
        NodeWork::Repository(action) => {
            let method = action
                .resource
                .as_ref()
                .map(|r| match r.spec.source {
                    crate::resource::RepositorySource::Git => "git",
                    crate::resource::RepositorySource::Delegation => "delegation",
                })
                .or_else(|| {
                    action.prior.as_ref().map(|p| match p.source {
                        crate::resource::RepositorySource::Git => "git",
                        crate::resource::RepositorySource::Delegation => "delegation",
                    })
                })
                .unwrap_or("state")
                .to_string();
            (action.kind, String::new(), method)
        }
        NodeWork::Tool(action) => {
            let version = action
                .resource
                .as_ref()
                .map(|r| r.spec.version.clone())
                .or_else(|| action.prior.as_ref().map(|p| p.version.clone()))
                .unwrap_or_default();
            let method = action
                .pattern
                .map(|p| match p {
                    crate::resource::ToolPattern::Download => "download",
                    crate::resource::ToolPattern::RuntimeDelegation => "runtime-delegation",
                    crate::resource::ToolPattern::InstallerDelegation => "installer-delegation",
                    crate::resource::ToolPattern::Commands => "commands",
                })
                .or_else(|| action.prior.as_ref().map(|p| p.method.as_str()))
                .unwrap_or("state")
                .to_string();
            (action.kind, version, method)
        }
    }
}
