//! Apply events and the sink that receives them.
//!
//! Every node the executor runs emits `Start`, any number of `Progress`
//! and `Output`, then `Error` or `Complete`. Events arrive pre-tagged with
//! the node identity, so interleaved output from parallel nodes is always
//! attributable.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

use crate::plan::ActionKind;
use crate::resource::Kind;

/// Identity of one node in the action DAG.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeId {
    pub kind: Kind,
    pub name: String,
}

impl NodeId {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One apply event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    Start {
        #[serde(flatten)]
        node: NodeId,
        version: String,
        action: ActionKind,
        method: String,
    },
    Progress {
        #[serde(flatten)]
        node: NodeId,
        downloaded: u64,
        total: u64,
    },
    Output {
        #[serde(flatten)]
        node: NodeId,
        line: String,
    },
    Error {
        #[serde(flatten)]
        node: NodeId,
        message: String,
    },
    Complete {
        #[serde(flatten)]
        node: NodeId,
    },
}

impl Event {
    pub fn node(&self) -> &NodeId {
        match self {
            Event::Start { node, .. }
            | Event::Progress { node, .. }
            | Event::Output { node, .. }
            | Event::Error { node, .. }
            | Event::Complete { node } => node,
        }
    }
}

/// Receives all node events of an apply.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Plain line-per-event text sink.
#[derive(Debug, Default)]
pub struct TextSink;

impl EventSink for TextSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::Start { node, version, action, method } => {
                if version.is_empty() {
                    println!("{action} {node} ({method})");
                } else {
                    println!("{action} {node} {version} ({method})");
                }
            }
            Event::Progress { .. } => {}
            Event::Output { node, line } => println!("  {node}: {line}"),
            Event::Error { node, message } => eprintln!("error {node}: {message}"),
            Event::Complete { node } => println!("done {node}"),
        }
    }
}

/// JSON-lines sink for `--output json`.
#[derive(Debug, Default)]
pub struct JsonSink;

impl EventSink for JsonSink {
    fn emit(&self, event: &Event) {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    }
}

/// Collects events in memory. Test support.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("memory sink poisoned").clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.events.lock().expect("memory sink poisoned").push(event.clone());
    }
}
