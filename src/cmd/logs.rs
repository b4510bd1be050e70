//! `tomei logs` - show failure logs from past applies.

use anyhow::Result;

use tomei::Paths;

pub(crate) fn run(session: Option<String>) -> Result<()> {
    let paths = Paths::user();
    let logs_dir = paths.logs_dir();
    if !logs_dir.exists() {
        println!("no failure logs");
        return Ok(());
    }

    let mut sessions: Vec<String> = std::fs::read_dir(&logs_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    sessions.sort();

    let Some(selected) = session.or_else(|| sessions.last().cloned()) else {
        println!("no failure logs");
        return Ok(());
    };

    let session_dir = logs_dir.join(&selected);
    anyhow::ensure!(session_dir.is_dir(), "no such session {selected:?}");

    let mut files: Vec<_> = std::fs::read_dir(&session_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    files.sort();

    println!("session {selected}:");
    for file in files {
        println!("--- {}", file.display());
        print!("{}", std::fs::read_to_string(&file)?);
    }
    Ok(())
}
