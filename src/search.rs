use crate::browser::PageDriver;
use crate::config::{BrowserSettings, SearchArgs};
use crate::download::ImageDownloader;
use crate::extractor::SearchResultHarvester;
use crate::output::{create_session_directory, write_session, SessionMetadata};
use crate::pagination::{
    pause_unless_cancelled, scroll_and_collect, Pacing, PaginationPolicy, PaginationReport,
};
use crate::scroller::{ScrollSettings, Scroller};
use anyhow::{Context, Result};
use chrono::Local;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const SEARCH_BOX_SELECTOR: &str = "input[placeholder*='搜索']";

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub site_url: String,
    pub output_dir: PathBuf,
    pub policy: PaginationPolicy,
    pub pacing: Pacing,
    pub scroll: ScrollSettings,
    pub download: bool,
    pub image_host: String,
    /// Pause after loading the home page and after submitting a search.
    pub page_settle: Duration,
    pub search_box_wait: Duration,
    pub between_prompts: Duration,
    pub download_pause: Duration,
}

impl SearchOptions {
    pub fn from_args(browser: &BrowserSettings, args: &SearchArgs) -> Self {
        Self {
            site_url: browser.site_url.trim_end_matches('/').to_string(),
            output_dir: args.output_dir.clone(),
            policy: PaginationPolicy::from(&args.pagination),
            pacing: Pacing::from(&args.pagination),
            scroll: ScrollSettings {
                increment: args.pagination.scroll_increment,
                element_wait: Duration::from_secs(browser.element_wait_seconds),
                ..ScrollSettings::default()
            },
            download: args.download,
            image_host: args.image_host.clone(),
            page_settle: Duration::from_secs(5),
            search_box_wait: Duration::from_secs(browser.element_wait_seconds),
            between_prompts: Duration::from_secs(args.prompt_wait_seconds),
            download_pause: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptOutcome {
    pub prompt: String,
    pub session_dir: PathBuf,
    pub post_links: usize,
    pub images: usize,
    pub downloaded: usize,
    pub pagination: Option<PaginationReport>,
    pub error: Option<String>,
}

/// The search URL used when the search box cannot be driven.
pub fn search_fallback_url(site_url: &str, prompt: &str) -> String {
    format!(
        "{}/search_result?keyword={}",
        site_url.trim_end_matches('/'),
        urlencoding::encode(prompt)
    )
}

async fn open_search(page: &dyn PageDriver, opts: &SearchOptions, prompt: &str) -> Result<()> {
    info!("Opening {}", opts.site_url);
    page.goto(&opts.site_url)
        .await
        .with_context(|| format!("Failed to open {}", opts.site_url))?;
    sleep(opts.page_settle).await;

    let typed = match page.wait_for(SEARCH_BOX_SELECTOR, opts.search_box_wait).await {
        Ok(()) => page.submit_text(SEARCH_BOX_SELECTOR, prompt).await,
        Err(e) => Err(e),
    };
    if let Err(e) = typed {
        let url = search_fallback_url(&opts.site_url, prompt);
        warn!("Search box unusable ({}), navigating to {}", e, url);
        page.goto(&url)
            .await
            .with_context(|| format!("Failed to open {}", url))?;
    }

    info!("Searching for: {}", prompt);
    sleep(opts.page_settle).await;
    Ok(())
}

async fn collect(
    page: &dyn PageDriver,
    opts: &SearchOptions,
    prompt: &str,
    harvester: &mut SearchResultHarvester,
    downloaded: &mut usize,
    session_dir: &std::path::Path,
) -> Result<PaginationReport> {
    open_search(page, opts, prompt).await?;

    let mut scroller = Scroller::window(opts.scroll.clone());
    let report = scroll_and_collect(page, &mut scroller, harvester, opts.policy, opts.pacing).await;
    info!(
        "Found {} unique images and {} unique post links",
        harvester.image_count(),
        harvester.post_count()
    );

    if opts.download {
        let image_urls = harvester.image_urls();
        info!("Downloading {} images", image_urls.len());
        let downloader = ImageDownloader::from_page(page).await?;
        for (index, url) in image_urls.iter().enumerate() {
            let dest = session_dir.join(format!("image_{}.jpg", index));
            match downloader.download(url, &opts.site_url, &dest).await {
                Ok(_) => *downloaded += 1,
                Err(e) => error!("Error downloading image {}: {}", index, e),
            }
            sleep(opts.download_pause).await;
        }
    }
    Ok(report)
}

/// Search one prompt and record what was found, even when it fails part way.
pub async fn scrape_prompt(
    page: &dyn PageDriver,
    opts: &SearchOptions,
    prompt: &str,
) -> PromptOutcome {
    let started = Instant::now();
    let (timestamp, session_dir) = match create_session_directory(&opts.output_dir, Local::now()) {
        Ok(created) => created,
        Err(e) => {
            error!("Could not create a session directory for prompt '{}': {:#}", prompt, e);
            return PromptOutcome {
                prompt: prompt.to_string(),
                session_dir: opts.output_dir.clone(),
                post_links: 0,
                images: 0,
                downloaded: 0,
                pagination: None,
                error: Some(format!("{:#}", e)),
            };
        }
    };
    info!("Starting scraping for prompt '{}' into {}", prompt, session_dir.display());

    let mut harvester = SearchResultHarvester::new(&opts.site_url, &opts.image_host);
    let mut downloaded = 0;
    let result = collect(page, opts, prompt, &mut harvester, &mut downloaded, &session_dir).await;

    let (label, pagination, error) = match result {
        Ok(report) => (prompt.to_string(), Some(report), None),
        Err(e) => {
            error!("Scraping error for prompt '{}': {:#}", prompt, e);
            (format!("{} (encountered error)", prompt), None, Some(format!("{:#}", e)))
        }
    };

    let post_urls = harvester.post_urls();
    let metadata = SessionMetadata {
        timestamp,
        prompt: label,
        total_images: harvester.image_count(),
        successful_downloads: downloaded,
        post_links: post_urls.len(),
        duration: started.elapsed(),
    };
    if let Err(e) = write_session(&session_dir, &metadata, &post_urls) {
        error!("Could not save metadata for prompt '{}': {:#}", prompt, e);
    }
    info!(
        "Session for '{}' finished in {:.2} seconds",
        prompt,
        metadata.duration.as_secs_f64()
    );

    PromptOutcome {
        prompt: prompt.to_string(),
        session_dir,
        post_links: post_urls.len(),
        images: harvester.image_count(),
        downloaded,
        pagination,
        error,
    }
}

pub async fn run_search(
    page: &dyn PageDriver,
    opts: &SearchOptions,
    prompts: &[String],
    cancel: &CancellationToken,
) -> Vec<PromptOutcome> {
    let mut outcomes = Vec::with_capacity(prompts.len());
    for (index, prompt) in prompts.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("Interrupted; skipping the remaining {} prompts", prompts.len() - index);
            break;
        }
        info!("Processing prompt {}/{}: {}", index + 1, prompts.len(), prompt);
        outcomes.push(scrape_prompt(page, opts, prompt).await);

        if index + 1 < prompts.len() && !pause_unless_cancelled(cancel, opts.between_prompts).await {
            warn!("Interrupted between prompts");
            break;
        }
    }
    outcomes
}
