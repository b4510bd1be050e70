//! Locked, atomic persistence for the state file.
//!
//! The store owns one directory holding `state.json`, `state.json.bak`, and
//! `state.lock`. Writes are tmp-then-rename so a crash never leaves a
//! partial file; the lock is an advisory exclusive lock whose file records
//! the holder's process id so contention errors can name the other side.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs4::fs_std::FileExt;
use thiserror::Error;
use tracing::warn;

use super::{State, FORMAT_VERSION};

const STATE_FILE: &str = "state.json";
const BACKUP_FILE: &str = "state.json.bak";
const LOCK_FILE: &str = "state.lock";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state directory {dir} is locked by process {pid}")]
    Locked { dir: String, pid: String },

    #[error("state store is not locked; acquire the lock before {op}")]
    NotLocked { op: &'static str },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl StateError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StateError::Io { path: path.display().to_string(), source }
    }
}

/// Process-safe store for one state directory.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    lock: Mutex<Option<File>>,
}

impl StateStore {
    /// Store for the per-user state directory.
    pub fn user(paths: &crate::Paths) -> Self {
        Self::at(paths.state_dir())
    }

    /// Store for the system-privilege state directory. Same semantics; the
    /// only difference is where the files live.
    pub fn system() -> Self {
        Self::at(Path::new("/var/lib/tomei"))
    }

    /// Store rooted at an explicit directory.
    pub fn at(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf(), lock: Mutex::new(None) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Acquires the exclusive advisory lock, writing this process's id into
    /// the lock file. Locking an already-held store is a no-op.
    pub fn lock(&self) -> Result<(), StateError> {
        let mut guard = self.lock.lock().expect("state lock mutex poisoned");
        if guard.is_some() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;
        let path = self.lock_path();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StateError::io(&path, e))?;
        let acquired = file.try_lock_exclusive().map_err(|e| StateError::io(&path, e))?;
        if !acquired {
            let mut pid = String::new();
            file.read_to_string(&mut pid).ok();
            let pid = pid.trim().to_string();
            return Err(StateError::Locked {
                dir: self.dir.display().to_string(),
                pid: if pid.is_empty() { "unknown".to_string() } else { pid },
            });
        }
        file.set_len(0).map_err(|e| StateError::io(&path, e))?;
        file.rewind().map_err(|e| StateError::io(&path, e))?;
        write!(file, "{}", std::process::id()).map_err(|e| StateError::io(&path, e))?;
        file.flush().map_err(|e| StateError::io(&path, e))?;
        *guard = Some(file);
        Ok(())
    }

    /// Releases the advisory lock. Unlocking an unlocked store is a no-op.
    pub fn unlock(&self) {
        let mut guard = self.lock.lock().expect("state lock mutex poisoned");
        if let Some(file) = guard.take() {
            let _ = FileExt::unlock(&file);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.lock().expect("state lock mutex poisoned").is_some()
    }

    fn require_lock(&self, op: &'static str) -> Result<(), StateError> {
        if self.is_locked() {
            Ok(())
        } else {
            Err(StateError::NotLocked { op })
        }
    }

    /// Loads the state. A missing file is an empty state, never an error.
    pub fn load(&self) -> Result<State, StateError> {
        self.require_lock("load")?;
        self.read_state()
    }

    /// Loads the state without holding the lock, for read-only commands.
    pub fn load_read_only(&self) -> Result<State, StateError> {
        self.read_state()
    }

    fn read_state(&self) -> Result<State, StateError> {
        let path = self.state_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(State::default()),
            Err(e) => return Err(StateError::io(&path, e)),
        };
        let state: State = serde_json::from_str(&text)
            .map_err(|source| StateError::Parse { path: path.display().to_string(), source })?;
        Self::validate(&state);
        Ok(state)
    }

    /// Persists the state atomically: write `state.json.tmp`, rename over
    /// `state.json`. On rename failure the temp file is removed.
    pub fn save(&self, state: &State) -> Result<(), StateError> {
        self.require_lock("save")?;
        let mut body = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
        body.push('\n');
        self.write_atomic(&self.state_path(), body.as_bytes())
    }

    /// Copies the current `state.json` bytes to `state.json.bak`. Missing
    /// source is a no-op.
    pub fn create_backup(&self) -> Result<(), StateError> {
        self.require_lock("create_backup")?;
        let source = self.state_path();
        let bytes = match fs::read(&source) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StateError::io(&source, e)),
        };
        self.write_atomic(&self.backup_path(), &bytes)
    }

    /// Reads the pre-apply backup. Missing backup is `Ok(None)`.
    pub fn load_backup(&self) -> Result<Option<State>, StateError> {
        let path = self.backup_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&path, e)),
        };
        let state = serde_json::from_str(&text)
            .map_err(|source| StateError::Parse { path: path.display().to_string(), source })?;
        Ok(Some(state))
    }

    /// Non-fatal sanity warnings. Never prevents loading.
    pub fn validate(state: &State) {
        if state.version != FORMAT_VERSION {
            warn!(
                version = %state.version,
                expected = FORMAT_VERSION,
                "state file has an unknown format version"
            );
        }
        let empty_versions = state
            .runtimes
            .iter()
            .map(|(n, e)| (n, e.version.is_empty()))
            .chain(state.tools.iter().map(|(n, e)| (n, e.version.is_empty())))
            .filter(|(_, empty)| *empty)
            .map(|(n, _)| n.clone())
            .collect::<Vec<_>>();
        if !empty_versions.is_empty() {
            warn!(entries = ?empty_versions, "state entries with empty versions");
        }
    }

    fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;
        let tmp = dest.with_extension(match dest.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{ext}.tmp"),
            None => "tmp".to_string(),
        });
        fs::write(&tmp, bytes).map_err(|e| StateError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, dest) {
            let _ = fs::remove_file(&tmp);
            return Err(StateError::io(dest, e));
        }
        Ok(())
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ToolState, VersionKind};
    use chrono::Utc;

    fn sample_tool() -> ToolState {
        ToolState {
            version: "14.0.0".into(),
            version_kind: VersionKind::Exact,
            spec_version: "14.0.0".into(),
            method: "download".into(),
            installer_ref: Some("download".into()),
            runtime_ref: None,
            package: None,
            source: None,
            commands: None,
            install_path: None,
            bin_paths: Vec::new(),
            binaries: vec!["rg".into()],
            digest: Some("ab".repeat(32)),
            taint_reason: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn load_of_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path());
        store.lock().unwrap();
        let state = store.load().unwrap();
        assert!(state.is_empty());
        assert_eq!(state.version, FORMAT_VERSION);
    }

    #[test]
    fn save_requires_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path());
        let err = store.save(&State::default()).unwrap_err();
        assert!(matches!(err, StateError::NotLocked { .. }));
    }

    #[test]
    fn save_round_trips_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path());
        store.lock().unwrap();

        let mut state = State::default();
        state.tools.insert("ripgrep".into(), sample_tool());
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), state);
        assert!(!dir.path().join("state.json.tmp").exists());
        let text = fs::read_to_string(store.state_path()).unwrap();
        assert!(text.contains("\"ripgrep\""));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn lock_is_reentrant_and_contention_reports_pid() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path());
        store.lock().unwrap();
        store.lock().unwrap(); // no-op

        // A second handle on the same directory contends with the first and
        // learns the holder's pid from the lock file.
        let other = StateStore::at(dir.path());
        let err = other.lock().unwrap_err();
        match err {
            StateError::Locked { pid, .. } => {
                assert_eq!(pid, std::process::id().to_string());
            }
            other => panic!("expected Locked, got {other:?}"),
        }

        store.unlock();
        other.lock().unwrap();
    }

    #[test]
    fn backup_copies_current_bytes_and_missing_source_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path());
        store.lock().unwrap();

        store.create_backup().unwrap();
        assert_eq!(store.load_backup().unwrap(), None);

        let mut state = State::default();
        state.tools.insert("ripgrep".into(), sample_tool());
        store.save(&state).unwrap();
        store.create_backup().unwrap();

        assert_eq!(store.load_backup().unwrap(), Some(state.clone()));

        // The backup is the pre-apply snapshot: saving again leaves it.
        state.tools.clear();
        store.save(&state).unwrap();
        assert_ne!(store.load_backup().unwrap(), Some(state));
    }

    #[test]
    fn malformed_backup_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path());
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(store.backup_path(), b"{not json").unwrap();
        assert!(matches!(store.load_backup(), Err(StateError::Parse { .. })));
    }

    #[test]
    fn lock_file_holds_the_pid() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path());
        store.lock().unwrap();
        let pid = fs::read_to_string(store.lock_path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
    }
}
