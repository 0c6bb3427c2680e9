use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// Non-empty trimmed lines of a seed file.
pub fn read_prompts(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompts file {}", path.display()))?;
    let prompts: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    info!("Read {} prompts from {}", prompts.len(), path.display());
    Ok(prompts)
}

/// Post URLs of a links file; headers and other lines are skipped.
pub fn read_post_urls(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read post links file {}", path.display()))?;
    let mut urls = Vec::new();
    let mut skipped = 0;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("http") && line.contains("/explore/") {
            urls.push(line.to_string());
        } else {
            skipped += 1;
        }
    }
    if skipped > 0 {
        warn!("Skipped {} lines that are not post URLs in {}", skipped, path.display());
    }
    info!("Read {} post URLs from {}", urls.len(), path.display());
    Ok(urls)
}
