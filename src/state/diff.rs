//! Structural diff between two user states, used by `tomei state diff` to
//! compare the live state against the pre-apply backup.

use serde::Serialize;

use crate::resource::Kind;

use super::State;

/// One entry-level difference.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryChange {
    pub kind: Kind,
    pub name: String,
    /// Entry as it appears in the first state; `None` means added.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// Entry as it appears in the second state; `None` means removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

impl EntryChange {
    pub fn is_added(&self) -> bool {
        self.before.is_none()
    }

    pub fn is_removed(&self) -> bool {
        self.after.is_none()
    }
}

/// All differences between two states, ordered by kind then name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StateDiff {
    pub entries: Vec<EntryChange>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Diffs two user states. Applying the reported changes to `a` (insert
/// `after` where present, delete where absent) yields `b`.
pub fn diff_user_states(a: &State, b: &State) -> StateDiff {
    let mut diff = StateDiff::default();
    diff_map(Kind::Installer, &a.installers, &b.installers, &mut diff);
    diff_map(Kind::Runtime, &a.runtimes, &b.runtimes, &mut diff);
    diff_map(Kind::Tool, &a.tools, &b.tools, &mut diff);
    diff_map(
        Kind::InstallerRepository,
        &a.installer_repositories,
        &b.installer_repositories,
        &mut diff,
    );
    diff
}

fn diff_map<T: Serialize + PartialEq>(
    kind: Kind,
    a: &std::collections::BTreeMap<String, T>,
    b: &std::collections::BTreeMap<String, T>,
    out: &mut StateDiff,
) {
    let to_value = |entry: &T| serde_json::to_value(entry).expect("state entries serialize");
    for (name, before) in a {
        match b.get(name) {
            None => out.entries.push(EntryChange {
                kind,
                name: name.clone(),
                before: Some(to_value(before)),
                after: None,
            }),
            Some(after) if after != before => out.entries.push(EntryChange {
                kind,
                name: name.clone(),
                before: Some(to_value(before)),
                after: Some(to_value(after)),
            }),
            Some(_) => {}
        }
    }
    for (name, after) in b {
        if !a.contains_key(name) {
            out.entries.push(EntryChange {
                kind,
                name: name.clone(),
                before: None,
                after: Some(to_value(after)),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ToolState, VersionKind};
    use chrono::Utc;

    fn tool(version: &str) -> ToolState {
        ToolState {
            version: version.into(),
            version_kind: VersionKind::Exact,
            spec_version: version.into(),
            method: "download".into(),
            installer_ref: Some("download".into()),
            runtime_ref: None,
            package: None,
            source: None,
            commands: None,
            install_path: None,
            bin_paths: Vec::new(),
            binaries: Vec::new(),
            digest: None,
            taint_reason: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn identical_states_have_an_empty_diff() {
        let mut a = State::default();
        a.tools.insert("rg".into(), tool("14.0.0"));
        assert!(diff_user_states(&a, &a.clone()).is_empty());
    }

    #[test]
    fn diff_applied_as_a_patch_reproduces_the_target() {
        let mut a = State::default();
        a.tools.insert("rg".into(), tool("14.0.0"));
        a.tools.insert("fd".into(), tool("9.0.0"));

        let mut b = State::default();
        b.tools.insert("rg".into(), tool("14.1.0")); // changed
        b.tools.insert("jq".into(), tool("1.7")); // added; fd removed

        let diff = diff_user_states(&a, &b);
        assert_eq!(diff.entries.len(), 3);

        let mut patched = a.clone();
        for change in &diff.entries {
            match &change.after {
                Some(after) => {
                    let entry: ToolState = serde_json::from_value(after.clone()).unwrap();
                    patched.tools.insert(change.name.clone(), entry);
                }
                None => {
                    patched.tools.remove(&change.name);
                }
            }
        }
        assert_eq!(patched, b);
    }
}
