//! Deterministic unified diffs between workspace snapshots.
//!
//! File sections are ordered lexicographically by path and the hash is
//! computed over the exact diff text, so identical snapshot pairs always
//! produce identical output. A renamed file appears as a delete plus an
//! add; there is no rename detection.

use std::collections::BTreeSet;

use appforge_protocol::DiffStatEntry;
use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};

use crate::snapshot::WorkspaceSnapshot;

const CONTEXT_RADIUS: usize = 3;

/// Result of diffing two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceDiff {
    /// Unified diff across all changed files.
    pub unified_diff: String,
    /// SHA-256 hex digest of `unified_diff`.
    pub hash: String,
    /// Per-file line statistics, changed files only.
    pub stats: Vec<DiffStatEntry>,
}

impl WorkspaceDiff {
    pub fn is_empty(&self) -> bool {
        self.unified_diff.is_empty()
    }
}

pub struct DiffEngine;

impl DiffEngine {
    /// Compute the unified diff, stats, and content hash between two
    /// snapshots. Unchanged files are omitted entirely.
    pub fn diff(prev: &WorkspaceSnapshot, next: &WorkspaceSnapshot) -> WorkspaceDiff {
        let mut paths: BTreeSet<&str> = BTreeSet::new();
        paths.extend(prev.iter().map(|(p, _)| p));
        paths.extend(next.iter().map(|(p, _)| p));

        let mut unified = String::new();
        let mut stats = Vec::new();

        for path in paths {
            let old = prev.get(path);
            let new = next.get(path);
            if old == new {
                continue;
            }

            let old_label = match old {
                Some(_) => format!("a/{}", path),
                None => "/dev/null".to_string(),
            };
            let new_label = match new {
                Some(_) => format!("b/{}", path),
                None => "/dev/null".to_string(),
            };

            let old_text = old.unwrap_or("");
            let new_text = new.unwrap_or("");
            let text_diff = TextDiff::from_lines(old_text, new_text);

            let mut insertions = 0;
            let mut deletions = 0;
            for change in text_diff.iter_all_changes() {
                match change.tag() {
                    ChangeTag::Insert => insertions += 1,
                    ChangeTag::Delete => deletions += 1,
                    ChangeTag::Equal => {}
                }
            }

            unified.push_str(
                &text_diff
                    .unified_diff()
                    .context_radius(CONTEXT_RADIUS)
                    .header(&old_label, &new_label)
                    .to_string(),
            );

            stats.push(DiffStatEntry {
                path: path.to_string(),
                insertions,
                deletions,
            });
        }

        let hash = format!("{:x}", Sha256::digest(unified.as_bytes()));

        WorkspaceDiff {
            unified_diff: unified,
            hash,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(files: &[(&str, &str)]) -> WorkspaceSnapshot {
        let mut snap = WorkspaceSnapshot::new();
        for (path, content) in files {
            snap.insert(*path, *content);
        }
        snap
    }

    #[test]
    fn identical_snapshots_diff_to_empty() {
        let a = snapshot(&[("src/app.ts", "hello\n")]);
        let diff = DiffEngine::diff(&a, &a.clone());
        assert!(diff.is_empty());
        assert!(diff.stats.is_empty());
        // Hash of the empty diff is still well-defined.
        assert_eq!(diff.hash.len(), 64);
    }

    #[test]
    fn diff_is_deterministic() {
        let prev = snapshot(&[("b.ts", "one\ntwo\n"), ("a.ts", "x\n")]);
        let next = snapshot(&[("b.ts", "one\nthree\n"), ("a.ts", "x\n"), ("c.ts", "new\n")]);

        let first = DiffEngine::diff(&prev, &next);
        let second = DiffEngine::diff(&prev, &next);
        assert_eq!(first.unified_diff, second.unified_diff);
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn added_and_removed_files_use_dev_null() {
        let prev = snapshot(&[("gone.ts", "bye\n")]);
        let next = snapshot(&[("fresh.ts", "hi\n")]);

        let diff = DiffEngine::diff(&prev, &next);
        assert!(diff.unified_diff.contains("--- /dev/null"));
        assert!(diff.unified_diff.contains("+++ b/fresh.ts"));
        assert!(diff.unified_diff.contains("--- a/gone.ts"));
        assert!(diff.unified_diff.contains("+++ /dev/null"));
    }

    #[test]
    fn sections_are_ordered_lexicographically() {
        let prev = WorkspaceSnapshot::new();
        let next = snapshot(&[("z.ts", "z\n"), ("a.ts", "a\n"), ("m.ts", "m\n")]);

        let diff = DiffEngine::diff(&prev, &next);
        let a_pos = diff.unified_diff.find("b/a.ts").unwrap();
        let m_pos = diff.unified_diff.find("b/m.ts").unwrap();
        let z_pos = diff.unified_diff.find("b/z.ts").unwrap();
        assert!(a_pos < m_pos && m_pos < z_pos);
    }

    #[test]
    fn stats_cover_only_changed_files_and_match_line_delta() {
        let prev = snapshot(&[("a.ts", "one\ntwo\nthree\n"), ("same.ts", "static\n")]);
        let next = snapshot(&[("a.ts", "one\nTWO\nthree\nfour\n"), ("same.ts", "static\n")]);

        let diff = DiffEngine::diff(&prev, &next);
        assert_eq!(diff.stats.len(), 1);
        let entry = &diff.stats[0];
        assert_eq!(entry.path, "a.ts");
        assert_eq!(entry.insertions, 2); // "TWO" and "four"
        assert_eq!(entry.deletions, 1); // "two"
    }

    #[test]
    fn stats_are_per_step_not_cumulative() {
        let first = snapshot(&[("a.ts", "v1\n")]);
        let second = snapshot(&[("a.ts", "v2\n"), ("b.ts", "new\n")]);
        let third = snapshot(&[("a.ts", "v2\n"), ("b.ts", "edited\n")]);

        // Step two only touched b.ts; a.ts differs from `first` but not
        // from the immediately preceding snapshot.
        let diff = DiffEngine::diff(&second, &third);
        assert_eq!(diff.stats.len(), 1);
        assert_eq!(diff.stats[0].path, "b.ts");

        let earlier = DiffEngine::diff(&first, &second);
        assert_eq!(earlier.stats.len(), 2);
    }
}
