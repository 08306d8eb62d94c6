//! Pattern-based risk detection.
//!
//! A fixed, ordered table of regex rules scanned over hunk content.
//! Added lines are checked for introduced hazards (hardcoded secrets,
//! dynamic evaluation, string-built SQL, unguarded throw/panic);
//! removed lines are checked for deleted public surface. Rules are
//! independent and order-insensitive; each emits at most one finding
//! per matching line.

use regex::Regex;
use std::sync::LazyLock;

use crate::diff::{self, FileChange};
use crate::engine::types::{Finding, FindingCategory, Provenance, Severity};

/// Which side of the diff a rule scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineTarget {
    Added,
    Removed,
}

struct RiskRule {
    id: &'static str,
    pattern: Regex,
    target: LineTarget,
    category: FindingCategory,
    severity: Severity,
    description: &'static str,
}

static RISK_RULES: LazyLock<Vec<RiskRule>> = LazyLock::new(|| {
    vec![
        RiskRule {
            id: "hardcoded_secret",
            pattern: Regex::new(
                r#"(?i)\b(password|passwd|secret|api[_-]?key|auth[_-]?token|access[_-]?token|private[_-]?key)\b\s*[:=]\s*["'][^"']{3,}["']"#,
            )
            .unwrap(),
            target: LineTarget::Added,
            category: FindingCategory::Security,
            severity: Severity::Critical,
            description: "Hardcoded credential or secret value",
        },
        RiskRule {
            id: "dynamic_eval",
            pattern: Regex::new(r"\beval\s*\(|\bexec\s*\(|new\s+Function\s*\(").unwrap(),
            target: LineTarget::Added,
            category: FindingCategory::Security,
            severity: Severity::Warning,
            description: "Dynamic code evaluation construct",
        },
        RiskRule {
            id: "sql_concatenation",
            pattern: Regex::new(
                r#"(?i)["'][^"']*\b(select|insert|update|delete)\b[^"']*["']\s*(\+|%|\|\|)|(\+|%|\|\|)\s*["'][^"']*\b(where|from|values)\b"#,
            )
            .unwrap(),
            target: LineTarget::Added,
            category: FindingCategory::Security,
            severity: Severity::Critical,
            description: "SQL statement built by string concatenation",
        },
        RiskRule {
            id: "unguarded_throw",
            pattern: Regex::new(r"^\s*throw\s+|\bpanic!\s*\(").unwrap(),
            target: LineTarget::Added,
            category: FindingCategory::Quality,
            severity: Severity::Warning,
            description: "Unguarded throw or panic added",
        },
        RiskRule {
            id: "removed_public_export",
            pattern: Regex::new(
                r"^\s*(pub\s+(fn|struct|enum|trait|const|static|type)\b|export\s+(function|const|class|default|interface)\b|module\.exports)",
            )
            .unwrap(),
            target: LineTarget::Removed,
            category: FindingCategory::Breaking,
            severity: Severity::Warning,
            description: "Public export removed",
        },
    ]
});

/// Deterministic risk analyzer over parsed file changes.
pub struct RiskDetector;

impl RiskDetector {
    /// Scan one file's hunks. Pure function of the hunk text.
    pub fn detect(file: &FileChange) -> Vec<Finding> {
        let mut findings = Vec::new();
        // Post-image line number, tracked from hunk headers. Removed
        // lines do not advance it and report no line number.
        let mut new_line: Option<usize> = None;

        for line in file.hunk_text.lines() {
            if let Some(start) = diff::hunk_new_start(line) {
                new_line = Some(start);
                continue;
            }

            if line.starts_with('+') && !line.starts_with("+++") {
                let content = &line[1..];
                for rule in RISK_RULES.iter().filter(|r| r.target == LineTarget::Added) {
                    if rule.pattern.is_match(content) {
                        findings.push(Self::finding(rule, file, new_line));
                    }
                }
                new_line = new_line.map(|n| n + 1);
            } else if line.starts_with('-') && !line.starts_with("---") {
                let content = &line[1..];
                for rule in RISK_RULES.iter().filter(|r| r.target == LineTarget::Removed) {
                    if rule.pattern.is_match(content) {
                        findings.push(Self::finding(rule, file, None));
                    }
                }
            } else if new_line.is_some() {
                new_line = new_line.map(|n| n + 1);
            }
        }

        findings
    }

    /// Scan every file, concatenating findings in diff order.
    pub fn detect_all(files: &[FileChange]) -> Vec<Finding> {
        files.iter().flat_map(Self::detect).collect()
    }

    fn finding(rule: &RiskRule, file: &FileChange, line: Option<usize>) -> Finding {
        tracing::debug!(rule = rule.id, path = %file.path, "Risk rule matched");
        Finding {
            category: rule.category,
            severity: rule.severity,
            description: format!("{} ({})", rule.description, rule.id),
            file: Some(file.path.clone()),
            line,
            provenance: Provenance::Heuristic,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffParser;

    fn file_from(diff: &str) -> FileChange {
        let files = DiffParser::new(&[]).parse(diff);
        assert_eq!(files.len(), 1);
        files.into_iter().next().unwrap()
    }

    #[test]
    fn hardcoded_password_is_one_critical_security_finding() {
        let file = file_from(
            "\
diff --git a/src/auth.rs b/src/auth.rs
--- a/src/auth.rs
+++ b/src/auth.rs
@@ -1,1 +1,2 @@
 fn login() {}
+let password = \"abc123\";
",
        );
        let findings = RiskDetector::detect(&file);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].category, FindingCategory::Security);
        assert_eq!(findings[0].file.as_deref(), Some("src/auth.rs"));
        assert_eq!(findings[0].provenance, Provenance::Heuristic);
    }

    #[test]
    fn finding_carries_post_image_line_number() {
        let file = file_from(
            "\
diff --git a/a.js b/a.js
--- a/a.js
+++ b/a.js
@@ -10,3 +10,4 @@
 context();
+eval(userInput);
 more();
",
        );
        let findings = RiskDetector::detect(&file);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, Some(11));
    }

    #[test]
    fn sql_concatenation_detected() {
        let file = file_from(
            "\
diff --git a/db.js b/db.js
--- a/db.js
+++ b/db.js
@@ -1,1 +1,2 @@
 const db = connect();
+const q = \"SELECT * FROM users WHERE id = \" + id;
",
        );
        let findings = RiskDetector::detect(&file);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].category, FindingCategory::Security);
    }

    #[test]
    fn removed_export_is_breaking() {
        let file = file_from(
            "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,2 +1,1 @@
-pub fn widely_used() {}
 fn internal() {}
",
        );
        let findings = RiskDetector::detect(&file);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, FindingCategory::Breaking);
        assert_eq!(findings[0].line, None);
    }

    #[test]
    fn unguarded_panic_detected() {
        let file = file_from(
            "\
diff --git a/src/run.rs b/src/run.rs
--- a/src/run.rs
+++ b/src/run.rs
@@ -1,1 +1,2 @@
 fn run() {
+    panic!(\"boom\");
",
        );
        let findings = RiskDetector::detect(&file);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, FindingCategory::Quality);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn clean_diff_has_no_findings() {
        let file = file_from(
            "\
diff --git a/src/math.rs b/src/math.rs
--- a/src/math.rs
+++ b/src/math.rs
@@ -1,1 +1,3 @@
 fn add(a: i32, b: i32) -> i32 { a + b }
+fn sub(a: i32, b: i32) -> i32 { a - b }
+fn mul(a: i32, b: i32) -> i32 { a * b }
",
        );
        assert!(RiskDetector::detect(&file).is_empty());
    }

    #[test]
    fn detection_is_deterministic() {
        let file = file_from(
            "\
diff --git a/s.py b/s.py
--- a/s.py
+++ b/s.py
@@ -1,1 +1,2 @@
 import os
+api_key = \"sk-123456\"
",
        );
        let first = RiskDetector::detect(&file);
        let second = RiskDetector::detect(&file);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].description, second[0].description);
    }

    #[test]
    fn findings_concatenate_in_diff_order() {
        let parser = DiffParser::new(&[]);
        let files = parser.parse(
            "\
diff --git a/one.js b/one.js
--- a/one.js
+++ b/one.js
@@ -1,1 +1,2 @@
+eval(x);
diff --git a/two.js b/two.js
--- a/two.js
+++ b/two.js
@@ -1,1 +1,2 @@
+const secret = \"hunter22\";
",
        );
        let findings = RiskDetector::detect_all(&files);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].file.as_deref(), Some("one.js"));
        assert_eq!(findings[1].file.as_deref(), Some("two.js"));
    }
}
