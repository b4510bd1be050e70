//! Failure-only log persistence.
//!
//! Output is buffered per node in memory for the duration of the apply.
//! Nodes that complete cleanly leave nothing behind; a failing node's
//! buffer is flushed to `<logs>/<session>/<Kind>_<Name>.log` with a header
//! naming the resource, the action, and the terminal error. A session with
//! no failures leaves no directory at all.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::plan::ActionKind;

use super::event::NodeId;

#[derive(Debug)]
struct NodeBuffer {
    version: String,
    action: ActionKind,
    lines: Vec<String>,
}

/// In-memory log buffers for one apply session.
#[derive(Debug)]
pub struct LogStore {
    session_dir: PathBuf,
    buffers: Mutex<HashMap<NodeId, NodeBuffer>>,
}

impl LogStore {
    /// Creates a store for a new session under `logs_dir`. Nothing is
    /// written until a node fails.
    pub fn new(logs_dir: &Path) -> Self {
        let session = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S"),
            std::process::id()
        );
        Self {
            session_dir: logs_dir.join(session),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Starts buffering for a node.
    pub fn begin(&self, node: NodeId, version: &str, action: ActionKind) {
        self.buffers.lock().expect("log store poisoned").insert(
            node,
            NodeBuffer {
                version: version.to_string(),
                action,
                lines: Vec::new(),
            },
        );
    }

    /// Appends one output line to a node's buffer.
    pub fn record(&self, node: &NodeId, line: &str) {
        if let Some(buffer) = self.buffers.lock().expect("log store poisoned").get_mut(node) {
            buffer.lines.push(line.to_string());
        }
    }

    /// Discards a node's buffer after clean completion.
    pub fn complete(&self, node: &NodeId) {
        self.buffers.lock().expect("log store poisoned").remove(node);
    }

    /// Flushes a failed node's buffer to its log file and returns the
    /// path. Returns `None` when writing the log itself failed.
    pub fn fail(&self, node: &NodeId, error: &str) -> Option<PathBuf> {
        let buffer = self.buffers.lock().expect("log store poisoned").remove(node)?;
        let path = self
            .session_dir
            .join(format!("{}_{}.log", node.kind, node.name));
        match self.write_log(&path, node, &buffer, error) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(node = %node, error = %e, "failed to write failure log");
                None
            }
        }
    }

    fn write_log(
        &self,
        path: &Path,
        node: &NodeId,
        buffer: &NodeBuffer,
        error: &str,
    ) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.session_dir)?;
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "resource: {node}")?;
        if !buffer.version.is_empty() {
            writeln!(file, "version: {}", buffer.version)?;
        }
        writeln!(file, "action: {}", buffer.action)?;
        writeln!(file, "error: {error}")?;
        writeln!(file)?;
        for line in &buffer.lines {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    /// Drops remaining buffers and removes the session directory if the
    /// session produced no logs.
    pub fn close(&self) {
        self.buffers.lock().expect("log store poisoned").clear();
        if let Ok(mut entries) = std::fs::read_dir(&self.session_dir) {
            if entries.next().is_none() {
                let _ = std::fs::remove_dir(&self.session_dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Kind;

    #[test]
    fn clean_session_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let node = NodeId::new(Kind::Tool, "rg");
        store.begin(node.clone(), "14.0.0", ActionKind::Install);
        store.record(&node, "downloading");
        store.complete(&node);
        store.close();
        assert!(!store.session_dir().exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failure_flushes_buffer_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let node = NodeId::new(Kind::Tool, "B");
        store.begin(node.clone(), "1.0.0", ActionKind::Install);
        store.record(&node, "step one");
        store.record(&node, "step two failed");
        let path = store.fail(&node, "exit status 1").unwrap();
        store.close();

        assert!(path.ends_with("Tool_B.log"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("resource: Tool/B"));
        assert!(body.contains("action: install"));
        assert!(body.contains("error: exit status 1"));
        assert!(body.contains("step two failed"));
        assert!(store.session_dir().exists());
    }

    #[test]
    fn only_failed_nodes_get_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let ok = NodeId::new(Kind::Tool, "A");
        let bad = NodeId::new(Kind::Tool, "B");
        store.begin(ok.clone(), "1", ActionKind::Install);
        store.begin(bad.clone(), "1", ActionKind::Install);
        store.complete(&ok);
        store.fail(&bad, "boom").unwrap();
        store.close();

        let names: Vec<String> = std::fs::read_dir(store.session_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Tool_B.log"]);
    }
}
