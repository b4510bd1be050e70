//! `tomei get` - print installed resources from state.

use anyhow::Result;
use clap::ValueEnum;

use tomei::state::{State, StateStore};
use tomei::Paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum GetKind {
    Runtime,
    Tool,
    Installer,
    Repository,
}

pub(crate) fn run(kind: GetKind, name: Option<String>, json: bool) -> Result<()> {
    let paths = Paths::user();
    let state = StateStore::user(&paths).load_read_only()?;

    if json {
        print_json(&state, kind, name.as_deref())?;
        return Ok(());
    }

    match kind {
        GetKind::Runtime => {
            for (entry_name, entry) in filtered(&state.runtimes, name.as_deref()) {
                println!("{entry_name}\t{}\t{:?}", entry.version, entry.mode);
            }
        }
        GetKind::Tool => {
            for (entry_name, entry) in filtered(&state.tools, name.as_deref()) {
                println!("{entry_name}\t{}\t{}", entry.version, entry.method);
            }
        }
        GetKind::Installer => {
            for (entry_name, entry) in filtered(&state.installers, name.as_deref()) {
                println!("{entry_name}\t{:?}", entry.mode);
            }
        }
        GetKind::Repository => {
            for (entry_name, entry) in filtered(&state.installer_repositories, name.as_deref()) {
                println!("{entry_name}\t{:?}\t{}", entry.source, entry.installer_ref);
            }
        }
    }
    Ok(())
}

fn filtered<'a, T>(
    map: &'a std::collections::BTreeMap<String, T>,
    name: Option<&'a str>,
) -> impl Iterator<Item = (&'a String, &'a T)> {
    map.iter().filter(move |(n, _)| name.is_none_or(|wanted| wanted == n.as_str()))
}

fn print_json(state: &State, kind: GetKind, name: Option<&str>) -> Result<()> {
    let value = match kind {
        GetKind::Runtime => serde_json::to_value(
            filtered(&state.runtimes, name).collect::<std::collections::BTreeMap<_, _>>(),
        )?,
        GetKind::Tool => serde_json::to_value(
            filtered(&state.tools, name).collect::<std::collections::BTreeMap<_, _>>(),
        )?,
        GetKind::Installer => serde_json::to_value(
            filtered(&state.installers, name).collect::<std::collections::BTreeMap<_, _>>(),
        )?,
        GetKind::Repository => serde_json::to_value(
            filtered(&state.installer_repositories, name)
                .collect::<std::collections::BTreeMap<_, _>>(),
        )?,
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
