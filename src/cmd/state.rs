//! `tomei state diff` - compare live state against the pre-apply backup.

use anyhow::Result;

use tomei::state::{diff_user_states, StateStore};
use tomei::Paths;

pub(crate) fn diff(json: bool) -> Result<()> {
    let paths = Paths::user();
    let store = StateStore::user(&paths);
    let current = store.load_read_only()?;
    let Some(backup) = store.load_backup()? else {
        println!("no backup to diff against");
        return Ok(());
    };

    let diff = diff_user_states(&backup, &current);
    if diff.is_empty() {
        println!("state is unchanged since the backup");
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }
    for change in &diff.entries {
        let marker = if change.is_added() {
            "+"
        } else if change.is_removed() {
            "-"
        } else {
            "~"
        };
        println!("{marker} {}/{}", change.kind, change.name);
    }
    Ok(())
}
