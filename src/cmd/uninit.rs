//! `tomei uninit` - remove everything tomei manages.

use anyhow::{Context, Result};

use tomei::state::StateStore;
use tomei::Paths;

pub(crate) fn run(yes: bool) -> Result<()> {
    let paths = Paths::user();
    let data = paths.data_dir();
    anyhow::ensure!(
        yes,
        "this removes {} including all installed tools; re-run with --yes to confirm",
        data.display()
    );

    // Refuse while another process is applying.
    let store = StateStore::user(&paths);
    store.lock().context("another apply is in progress")?;
    store.unlock();

    if data.exists() {
        std::fs::remove_dir_all(data)
            .with_context(|| format!("failed to remove {}", data.display()))?;
        println!("removed {}", data.display());
    } else {
        println!("nothing to remove");
    }
    println!("manifests under {} were left in place", paths.config_dir().display());
    Ok(())
}
