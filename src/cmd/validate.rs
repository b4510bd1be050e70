//! `tomei validate` - check manifests without touching state.

use std::path::PathBuf;

use anyhow::Result;

use tomei::Paths;

pub(crate) fn run(files: Vec<PathBuf>) -> Result<()> {
    let paths = Paths::user();
    let store = super::load_store(&paths, files)?;
    store.validate()?;

    let runtimes = store.runtimes().count();
    let tools = store.tools().count();
    let installers = store.installers().count();
    let repositories = store.repositories().count();
    println!(
        "ok: {runtimes} runtimes, {tools} tools, {installers} installers, {repositories} repositories"
    );
    Ok(())
}
