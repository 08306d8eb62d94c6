//! Change-set complexity scoring.
//!
//! The score is the maximum of independent bucketed sub-scores (total
//! changed lines, file count, per-file average) plus fixed bonuses for
//! migration-like and config-like paths, clamped to 1-5. Each sub-score
//! is monotonic in its input and the whole function is deterministic
//! and side-effect-free.

use crate::diff::FileChange;

/// Deterministic complexity scorer over parsed file changes.
pub struct ComplexityScorer;

impl ComplexityScorer {
    /// Score a change set. Empty input scores 1.
    pub fn score(files: &[FileChange]) -> u8 {
        if files.is_empty() {
            return 1;
        }

        let total: usize = files.iter().map(FileChange::total_changed).sum();
        let count = files.len();
        let average = total / count;
        let migration = files.iter().any(|f| is_migration_path(&f.path));
        let config = files.iter().any(|f| is_config_path(&f.path));

        Self::score_from_parts(total, count, average, migration, config)
    }

    /// Combine sub-scores. Public so the monotonicity properties can be
    /// checked per dimension.
    pub fn score_from_parts(
        total_changed: usize,
        file_count: usize,
        avg_per_file: usize,
        has_migration: bool,
        has_config: bool,
    ) -> u8 {
        let base = bucket_total(total_changed)
            .max(bucket_files(file_count))
            .max(bucket_average(avg_per_file));

        let mut score = base;
        if has_migration {
            score += 1;
        }
        if has_config {
            score += 1;
        }
        score.clamp(1, 5)
    }
}

fn bucket_total(changed: usize) -> u8 {
    match changed {
        0..=9 => 1,
        10..=49 => 2,
        50..=199 => 3,
        200..=499 => 4,
        _ => 5,
    }
}

fn bucket_files(count: usize) -> u8 {
    match count {
        0..=1 => 1,
        2..=4 => 2,
        5..=9 => 3,
        10..=19 => 4,
        _ => 5,
    }
}

fn bucket_average(avg: usize) -> u8 {
    match avg {
        0..=9 => 1,
        10..=24 => 2,
        25..=49 => 3,
        50..=99 => 4,
        _ => 5,
    }
}

fn is_migration_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("migration") || lower.contains("migrate") || lower.contains("/schema")
}

fn is_config_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let config_ext = [".toml", ".yaml", ".yml", ".ini", ".env", ".conf"]
        .iter()
        .any(|ext| lower.ends_with(ext));
    config_ext
        || lower.contains("config")
        || lower
            .rsplit('/')
            .next()
            .is_some_and(|name| name.starts_with('.'))
}

// ── Tests ────────────────────────────────────────────────────────
