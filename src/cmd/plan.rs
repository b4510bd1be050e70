//! `tomei plan` - show pending actions without applying them.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use tomei::plan::{reconcile, ActionKind, Plan, PlanFlags};
use tomei::state::StateStore;
use tomei::Paths;

#[derive(Serialize)]
struct PlanLine<'a> {
    kind: &'a str,
    action: ActionKind,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

pub(crate) fn run(files: Vec<PathBuf>, flags: PlanFlags, json: bool) -> Result<()> {
    let paths = Paths::user();
    let store = super::load_store(&paths, files)?;
    let state_store = StateStore::user(&paths);
    let mut state = state_store.load_read_only()?;

    let plan = reconcile(&store, &mut state, &flags)?;
    if plan.is_empty() {
        println!("nothing to do");
        return Ok(());
    }
    print_plan(&plan, json);
    Ok(())
}

fn print_plan(plan: &Plan, json: bool) {
    let mut lines = Vec::new();
    for action in &plan.runtimes {
        lines.push(PlanLine {
            kind: "runtime",
            action: action.kind,
            name: &action.name,
            reason: action.reason.as_deref(),
        });
    }
    for action in &plan.repositories {
        lines.push(PlanLine {
            kind: "repository",
            action: action.kind,
            name: &action.name,
            reason: action.reason.as_deref(),
        });
    }
    for action in &plan.tools {
        lines.push(PlanLine {
            kind: "tool",
            action: action.kind,
            name: &action.name,
            reason: action.reason.as_deref(),
        });
    }

    if json {
        if let Ok(body) = serde_json::to_string_pretty(&lines) {
            println!("{body}");
        }
        return;
    }
    for line in &lines {
        match line.reason {
            Some(reason) => println!("{:<10} {:<8} {} ({reason})", line.kind, line.action.to_string(), line.name),
            None => println!("{:<10} {:<8} {}", line.kind, line.action.to_string(), line.name),
        }
    }
}
