use crate::accumulator::Accumulator;
use crate::output::write_lines;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

static CJK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\u{4e00}-\u{9fa5}]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    pub remove_mentions: bool,
    pub remove_chinese: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            remove_mentions: true,
            remove_chinese: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub lines_read: usize,
    pub written: usize,
    pub removed_mentions: usize,
    pub removed_chinese: usize,
}

pub fn contains_chinese(line: &str) -> bool {
    CJK_RE.is_match(line)
}

/// Apply the filters to `content`, keeping the first occurrence of each surviving line.
pub fn filter_lines(content: &str, options: FilterOptions) -> (Vec<String>, FilterStats) {
    let mut stats = FilterStats::default();
    let mut kept = Accumulator::new();

    for line in content.lines() {
        stats.lines_read += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if options.remove_mentions && line.starts_with('@') {
            stats.removed_mentions += 1;
            continue;
        }
        if options.remove_chinese && contains_chinese(line) {
            stats.removed_chinese += 1;
            continue;
        }
        kept.insert(line.to_string());
    }

    let lines = kept.into_vec();
    stats.written = lines.len();
    (lines, stats)
}

pub fn filter_comments(input: &Path, output: &Path, options: FilterOptions) -> Result<FilterStats> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let (lines, stats) = filter_lines(&content, options);
    write_lines(output, &lines)?;

    info!(
        "Filtered {} -> {}: read {} lines, removed {} @-lines and {} Chinese lines, kept {} unique",
        input.display(),
        output.display(),
        stats.lines_read,
        stats.removed_mentions,
        stats.removed_chinese,
        stats.written
    );
    Ok(stats)
}

/// Sorted set of the non-empty trimmed lines.
pub fn unique_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn make_unique(input: &Path, output: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let lines = unique_lines(&content);
    write_lines(output, &lines)?;
    info!(
        "Wrote {} unique lines from {} to {}",
        lines.len(),
        input.display(),
        output.display()
    );
    Ok(lines.len())
}
