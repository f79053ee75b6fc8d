//! Immutable workspace snapshots.

use std::collections::BTreeMap;

use appforge_protocol::FileEntry;
use serde::{Deserialize, Serialize};

/// A point-in-time capture of the workspace file set. Paths are unique
/// and iteration order is lexicographic, which keeps diffing
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    files: BTreeMap<String, String>,
}

impl WorkspaceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[FileEntry]) -> Self {
        let files = entries
            .iter()
            .map(|f| (f.path.clone(), f.content.clone()))
            .collect();
        Self { files }
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in lexicographic path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Produce the snapshot that results from applying a set of edits.
    /// `None` content removes the file; the original is untouched.
    pub fn apply(&self, edits: &BTreeMap<String, Option<String>>) -> WorkspaceSnapshot {
        let mut files = self.files.clone();
        for (path, content) in edits {
            match content {
                Some(content) => {
                    files.insert(path.clone(), content.clone());
                }
                None => {
                    files.remove(path);
                }
            }
        }
        WorkspaceSnapshot { files }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_inserts_updates_and_removes() {
        let mut snapshot = WorkspaceSnapshot::new();
        snapshot.insert("a.ts", "old");
        snapshot.insert("b.ts", "keep");

        let mut edits = BTreeMap::new();
        edits.insert("a.ts".to_string(), Some("new".to_string()));
        edits.insert("b.ts".to_string(), None);
        edits.insert("c.ts".to_string(), Some("added".to_string()));

        let next = snapshot.apply(&edits);
        assert_eq!(next.get("a.ts"), Some("new"));
        assert_eq!(next.get("b.ts"), None);
        assert_eq!(next.get("c.ts"), Some("added"));
        // original unchanged
        assert_eq!(snapshot.get("a.ts"), Some("old"));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn iteration_is_lexicographic() {
        let mut snapshot = WorkspaceSnapshot::new();
        snapshot.insert("z.ts", "");
        snapshot.insert("a.ts", "");
        snapshot.insert("m/n.ts", "");

        let paths: Vec<&str> = snapshot.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["a.ts", "m/n.ts", "z.ts"]);
    }
}
