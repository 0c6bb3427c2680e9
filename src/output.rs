use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const SESSION_METADATA_FILE: &str = "metadata.txt";
pub const POST_LINKS_FILE: &str = "post_links.txt";
pub const RUN_METADATA_FILE: &str = "run_metadata.txt";

/// Write one line per item, creating parent directories as needed.
pub fn write_lines<I, S>(path: &Path, lines: I) -> Result<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ensure_parent(path)?;
    let mut content = String::new();
    let mut count = 0;
    for line in lines {
        content.push_str(line.as_ref());
        content.push('\n');
        count += 1;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(count)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Create `{base}/{YYYYmmdd_HHMMSS}`, suffixing a counter if that name is taken.
pub fn create_session_directory(base: &Path, now: DateTime<Local>) -> Result<(String, PathBuf)> {
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let mut name = stamp.clone();
    let mut attempt = 1;
    while base.join(&name).exists() {
        attempt += 1;
        name = format!("{}_{}", stamp, attempt);
    }
    let dir = base.join(&name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create session directory {}", dir.display()))?;
    Ok((stamp, dir))
}

/// Summary of one search prompt.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub timestamp: String,
    pub prompt: String,
    pub total_images: usize,
    pub successful_downloads: usize,
    pub post_links: usize,
    pub duration: Duration,
}

impl SessionMetadata {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Timestamp: {}", self.timestamp);
        let _ = writeln!(out, "Prompt: {}", self.prompt);
        let _ = writeln!(out, "Total images found: {}", self.total_images);
        let _ = writeln!(out, "Successfully downloaded: {}", self.successful_downloads);
        let _ = writeln!(out, "Total unique post links found: {}", self.post_links);
        let _ = writeln!(out, "Duration: {:.2} seconds", self.duration.as_secs_f64());
        let _ = writeln!(out, "Post links saved to: {}", POST_LINKS_FILE);
        out
    }
}

/// Write `metadata.txt` and the sorted `post_links.txt` into a session directory.
pub fn write_session(dir: &Path, metadata: &SessionMetadata, post_urls: &[String]) -> Result<()> {
    let metadata_path = dir.join(SESSION_METADATA_FILE);
    std::fs::write(&metadata_path, metadata.render())
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

    let mut links = post_urls.to_vec();
    links.sort();
    let mut body = String::new();
    if links.is_empty() {
        body.push_str("No post links were found for this prompt.\n");
    } else {
        let _ = writeln!(body, "Post links found for prompt: {}", metadata.prompt);
        let _ = writeln!(body, "{}", "=".repeat(30));
        for link in &links {
            let _ = writeln!(body, "{}", link);
        }
    }
    let links_path = dir.join(POST_LINKS_FILE);
    std::fs::write(&links_path, body)
        .with_context(|| format!("Failed to write {}", links_path.display()))?;

    info!("Saved {} post links to {}", links.len(), links_path.display());
    Ok(())
}

/// Summary of an images or comments run.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub job: String,
    pub started: DateTime<Local>,
    pub seeds_total: usize,
    pub seeds_processed: usize,
    pub items_collected: usize,
    pub items_saved: usize,
    pub duration: Duration,
    pub interrupted: bool,
}

impl RunMetadata {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Job: {}", self.job);
        let _ = writeln!(out, "Started: {}", self.started.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Posts listed: {}", self.seeds_total);
        let _ = writeln!(out, "Posts processed: {}", self.seeds_processed);
        let _ = writeln!(out, "Items collected: {}", self.items_collected);
        let _ = writeln!(out, "Items saved: {}", self.items_saved);
        let _ = writeln!(out, "Duration: {:.2} seconds", self.duration.as_secs_f64());
        if self.interrupted {
            let _ = writeln!(out, "Interrupted: yes");
        }
        out
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(RUN_METADATA_FILE);
        ensure_parent(&path)?;
        std::fs::write(&path, self.render())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
