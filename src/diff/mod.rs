//! Unified-diff parsing.
//!
//! Turns raw diff text into an ordered list of [`FileChange`] records.
//! Parsing is total: malformed hunk headers produce a zero-count record
//! for that file instead of aborting, and anything unrecognized is
//! skipped. Files matching the configured exclusion globs (lockfiles,
//! vendored dependencies, build output) are dropped before they reach
//! the rest of the pipeline.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Pre/post-image path used by diffs for created and deleted files.
const NULL_DEVICE: &str = "/dev/null";

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,\d+)? @@").unwrap()
});

// ── File change record ───────────────────────────────────────────

/// Lifecycle of a file within a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

impl ChangeStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

/// One file's contribution to a change set. Created once by the
/// parser, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub added: usize,
    pub removed: usize,
    pub status: ChangeStatus,
    /// Language inferred from the file extension.
    pub language: String,
    /// Raw hunk text including `@@` headers.
    pub hunk_text: String,
}

impl FileChange {
    pub fn total_changed(&self) -> usize {
        self.added + self.removed
    }
}

// ── Parser ───────────────────────────────────────────────────────

/// Unified-diff parser with path exclusion rules.
pub struct DiffParser {
    excludes: Vec<Pattern>,
}

impl DiffParser {
    /// Build a parser from exclusion glob patterns. Invalid patterns
    /// are skipped with a warning rather than failing construction.
    pub fn new(exclude_globs: &[String]) -> Self {
        let excludes = exclude_globs
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %raw, error = %e, "Skipping invalid exclusion glob");
                    None
                }
            })
            .collect();
        Self { excludes }
    }

    /// Parse diff text into ordered file changes, dropping excluded paths.
    pub fn parse(&self, diff_text: &str) -> Vec<FileChange> {
        let mut files = Vec::new();
        let mut current: Option<PendingFile> = None;
        let mut lines = diff_text.lines().peekable();

        while let Some(line) = lines.next() {
            if line.starts_with("diff --git ") {
                if let Some(pending) = current.take() {
                    files.push(pending.finish());
                }
                current = Some(PendingFile::default());
                continue;
            }

            if let Some(rest) = line.strip_prefix("--- ") {
                // A bare ---/+++ pair also opens a file record. Inside
                // hunk content this is only a boundary when the next
                // line is the matching +++ header; otherwise it is a
                // removed line whose content starts with "--".
                let in_hunk = current.as_ref().is_some_and(|p| p.saw_hunk);
                let next_is_new_path =
                    lines.peek().is_some_and(|next| next.starts_with("+++ "));
                if !in_hunk || next_is_new_path {
                    if in_hunk {
                        if let Some(pending) = current.take() {
                            files.push(pending.finish());
                        }
                    }
                    let pending = current.get_or_insert_with(PendingFile::default);
                    pending.old_path = Some(strip_prefix_marker(rest, "a/"));
                    continue;
                }
            }

            if let Some(rest) = line.strip_prefix("+++ ") {
                let in_hunk = current.as_ref().is_some_and(|p| p.saw_hunk);
                if !in_hunk {
                    if let Some(pending) = current.as_mut() {
                        pending.new_path = Some(strip_prefix_marker(rest, "b/"));
                    }
                    continue;
                }
            }

            let Some(pending) = current.as_mut() else {
                continue;
            };

            if line.starts_with("@@") {
                pending.saw_hunk = true;
                if !HUNK_HEADER.is_match(line) {
                    tracing::warn!(
                        path = pending.new_path.as_deref().unwrap_or("?"),
                        "Unparsable hunk header; recording file with zero counts"
                    );
                    pending.malformed = true;
                }
                pending.hunk_text.push_str(line);
                pending.hunk_text.push('\n');
                continue;
            }

            if pending.saw_hunk {
                pending.hunk_text.push_str(line);
                pending.hunk_text.push('\n');
                if line.starts_with('+') && !line.starts_with("+++") {
                    pending.added += 1;
                } else if line.starts_with('-') && !line.starts_with("---") {
                    pending.removed += 1;
                }
            }
        }

        if let Some(pending) = current.take() {
            files.push(pending.finish());
        }

        files
            .into_iter()
            .filter(|f| !self.is_excluded(&f.path))
            .collect()
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excludes.iter().any(|p| p.matches(path))
    }
}

#[derive(Default)]
struct PendingFile {
    old_path: Option<String>,
    new_path: Option<String>,
    added: usize,
    removed: usize,
    saw_hunk: bool,
    malformed: bool,
    hunk_text: String,
}

impl PendingFile {
    fn finish(self) -> FileChange {
        let old_is_null = self.old_path.as_deref() == Some(NULL_DEVICE);
        let new_is_null = self.new_path.as_deref() == Some(NULL_DEVICE);

        let status = if old_is_null {
            ChangeStatus::Added
        } else if new_is_null {
            ChangeStatus::Deleted
        } else {
            ChangeStatus::Modified
        };

        let path = if new_is_null {
            self.old_path.unwrap_or_default()
        } else {
            self.new_path.or(self.old_path).unwrap_or_default()
        };

        let (added, removed) = if self.malformed {
            (0, 0)
        } else {
            (self.added, self.removed)
        };

        FileChange {
            language: language_for(&path),
            path,
            added,
            removed,
            status,
            hunk_text: self.hunk_text,
        }
    }
}

/// Post-image start line of a hunk header, if `line` is one.
pub(crate) fn hunk_new_start(line: &str) -> Option<usize> {
    HUNK_HEADER
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn strip_prefix_marker(path: &str, marker: &str) -> String {
    let trimmed = path.trim();
    if trimmed == NULL_DEVICE {
        return trimmed.to_string();
    }
    trimmed
        .strip_prefix(marker)
        .unwrap_or(trimmed)
        .to_string()
}

/// Infer a language tag from a path's extension.
pub fn language_for(path: &str) -> String {
    let ext = path.rsplit('.').next().unwrap_or_default();
    let tag = match ext {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "sql" => "sql",
        "sh" | "bash" => "shell",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        _ => "text",
    };
    tag.to_string()
}

// ── Tests ────────────────────────────────────────────────────────
