//! `tomei init` - create the managed directories and an empty state file.

use anyhow::{Context, Result};

use tomei::state::StateStore;
use tomei::Paths;

pub(crate) fn run() -> Result<()> {
    let paths = Paths::user();
    for dir in [
        paths.config_dir().to_path_buf(),
        paths.data_dir().to_path_buf(),
        paths.bin_dir(),
        paths.cache_dir(),
        paths.logs_dir(),
        paths.tmp_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let store = StateStore::user(&paths);
    if !store.state_path().exists() {
        store.lock()?;
        let state = store.load()?;
        store.save(&state)?;
        store.unlock();
        println!("initialized state at {}", store.state_path().display());
    } else {
        println!("state already present at {}", store.state_path().display());
    }
    println!("add manifests under {}", paths.config_dir().display());
    Ok(())
}
