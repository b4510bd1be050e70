//! `tomei apply` - reconcile the machine with the manifests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use tomei::exec::{ApplyError, EventSink, Executor, JsonSink, TextSink};
use tomei::install::InstallContext;
use tomei::plan::{reconcile, PlanFlags};
use tomei::state::StateStore;
use tomei::Paths;

pub(crate) async fn run(
    files: Vec<PathBuf>,
    flags: PlanFlags,
    parallelism: Option<usize>,
    json: bool,
) -> Result<()> {
    let paths = Paths::user();
    let store = super::load_store(&paths, files)?;

    let state_store = Arc::new(StateStore::user(&paths));
    state_store.lock().context("another apply is in progress")?;
    let result = apply_locked(&paths, store, &state_store, flags, parallelism, json).await;
    state_store.unlock();
    result
}

async fn apply_locked(
    paths: &Paths,
    store: tomei::resource::ResourceStore,
    state_store: &Arc<StateStore>,
    flags: PlanFlags,
    parallelism: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut state = state_store.load()?;
    let plan = reconcile(&store, &mut state, &flags)?;
    if plan.is_empty() {
        println!("everything up to date");
        return Ok(());
    }
    state_store.create_backup()?;

    let client = reqwest::Client::new();
    let mut ctx = InstallContext::new(paths.clone(), client);
    if let Some(pin) = state.registry.as_ref().and_then(|r| r.aqua.as_ref()) {
        ctx.registry_ref = pin.reference.clone();
    }

    let sink: Arc<dyn EventSink> =
        if json { Arc::new(JsonSink) } else { Arc::new(TextSink) };
    let parallelism = parallelism.unwrap_or_else(num_cpus::get);
    let executor = Executor::new(ctx, sink, parallelism);

    match executor.apply(plan, state_store.clone(), state).await {
        Ok(report) => {
            let mut parts = Vec::new();
            if report.installed > 0 {
                parts.push(format!("{} installed", report.installed));
            }
            if report.upgraded > 0 {
                parts.push(format!("{} upgraded", report.upgraded));
            }
            if report.removed > 0 {
                parts.push(format!("{} removed", report.removed));
            }
            if report.skipped > 0 {
                parts.push(format!("{} unchanged", report.skipped));
            }
            println!("apply complete: {}", parts.join(", "));
            Ok(())
        }
        Err(ApplyError::Node { node, message, log }) => {
            if let Some(log) = &log {
                eprintln!("see {}", log.display());
            }
            Err(anyhow::anyhow!("{node} failed: {message}"))
        }
        Err(e) => Err(e.into()),
    }
}
