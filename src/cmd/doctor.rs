//! `tomei doctor` - health checks for the managed environment.

use anyhow::Result;

use tomei::state::StateStore;
use tomei::Paths;

pub(crate) fn run() -> Result<()> {
    let paths = Paths::user();
    let mut problems = 0usize;
    let mut check = |name: &str, ok: bool, detail: String| {
        if ok {
            println!("ok   {name}: {detail}");
        } else {
            println!("FAIL {name}: {detail}");
            problems += 1;
        }
    };

    let data = paths.data_dir();
    check("data dir", data.exists(), data.display().to_string());

    let config = paths.config_dir();
    check(
        "config dir",
        config.exists(),
        format!("{} ({})", config.display(), if config.exists() { "present" } else { "missing" }),
    );

    let store = StateStore::user(&paths);
    match store.load_read_only() {
        Ok(state) => {
            check(
                "state",
                true,
                format!(
                    "{} runtimes, {} tools, {} repositories",
                    state.runtimes.len(),
                    state.tools.len(),
                    state.installer_repositories.len()
                ),
            );
        }
        Err(e) => check("state", false, e.to_string()),
    }

    let lock_path = store.lock_path();
    if lock_path.exists() {
        let pid = std::fs::read_to_string(&lock_path).unwrap_or_default();
        check("lock", true, format!("last held by pid {}", pid.trim()));
    } else {
        check("lock", true, "never held".to_string());
    }

    // Dangling symlinks in the bin directory mean a removal went wrong.
    let bin = paths.bin_dir();
    if bin.exists() {
        let mut dangling = Vec::new();
        for entry in std::fs::read_dir(&bin)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_symlink() && std::fs::metadata(&path).is_err() {
                dangling.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        check(
            "bin symlinks",
            dangling.is_empty(),
            if dangling.is_empty() { "all resolve".to_string() } else { format!("dangling: {}", dangling.join(", ")) },
        );
    }

    for binary in ["sh", "git"] {
        check(
            binary,
            which::which(binary).is_ok(),
            which::which(binary)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "not found on PATH".to_string()),
        );
    }

    anyhow::ensure!(problems == 0, "{problems} problem(s) found");
    Ok(())
}
