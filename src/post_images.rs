use crate::browser::PageDriver;
use crate::carousel::{collect_carousel_images, CarouselSettings, POST_PAGE_LOAD_INDICATOR};
use crate::config::{BrowserSettings, ImagesArgs};
use crate::download::ImageDownloader;
use crate::extractor::post_folder_name;
use crate::output::RunMetadata;
use crate::pagination::pause_unless_cancelled;
use anyhow::{Context, Result};
use chrono::Local;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ImagesOptions {
    pub output_dir: PathBuf,
    pub carousel: CarouselSettings,
    pub page_load_timeout: Duration,
    /// Pause after the page indicator shows up, for the carousel scripts.
    pub post_settle: Duration,
    pub between_posts: Duration,
    pub download_pause: Duration,
}

impl ImagesOptions {
    pub fn from_args(browser: &BrowserSettings, args: &ImagesArgs) -> Self {
        Self {
            output_dir: args.output_dir.clone(),
            carousel: CarouselSettings {
                max_clicks: args.max_slider_clicks,
                ..CarouselSettings::default()
            },
            page_load_timeout: Duration::from_secs(browser.page_load_timeout_seconds),
            post_settle: Duration::from_secs(3),
            between_posts: Duration::from_secs(args.post_wait_seconds),
            download_pause: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostImagesOutcome {
    pub post_url: String,
    pub folder: PathBuf,
    pub found: usize,
    pub downloaded: usize,
    /// The post page never showed its media.
    pub skipped: bool,
}

/// Collect and download every carousel image of one post.
pub async fn scrape_post_images(
    page: &dyn PageDriver,
    opts: &ImagesOptions,
    post_url: &str,
) -> Result<PostImagesOutcome> {
    let started = Instant::now();
    let post_id = post_folder_name(post_url, Local::now());
    let folder = opts.output_dir.join(&post_id);
    std::fs::create_dir_all(&folder)
        .with_context(|| format!("Failed to create {}", folder.display()))?;
    info!("Saving images for post {} to {}", post_id, folder.display());

    let mut outcome = PostImagesOutcome {
        post_url: post_url.to_string(),
        folder: folder.clone(),
        found: 0,
        downloaded: 0,
        skipped: false,
    };

    if let Err(e) = page.goto(post_url).await {
        error!("Failed to open post {}: {}", post_url, e);
        outcome.skipped = true;
        return Ok(outcome);
    }
    if let Err(e) = page.wait_for(POST_PAGE_LOAD_INDICATOR, opts.page_load_timeout).await {
        let landed = page.current_url().await.ok().flatten().unwrap_or_default();
        error!(
            "Post page {} never showed its content ({}); landed on '{}', skipping",
            post_url, e, landed
        );
        outcome.skipped = true;
        return Ok(outcome);
    }
    sleep(opts.post_settle).await;

    let report = collect_carousel_images(page, &opts.carousel).await;
    let mut image_urls = report.image_urls;
    image_urls.sort();
    outcome.found = image_urls.len();

    if image_urls.is_empty() {
        info!("No image URLs were collected for post {}", post_id);
    } else {
        let downloader = ImageDownloader::from_page(page).await?;
        for (index, url) in image_urls.iter().enumerate() {
            let dest = folder.join(format!("{}_{}.jpg", post_id, index));
            match downloader.download(url, post_url, &dest).await {
                Ok(_) => outcome.downloaded += 1,
                Err(e) => error!("Error downloading image {} of post {}: {}", index, post_id, e),
            }
            sleep(opts.download_pause).await;
        }
        info!(
            "Downloaded {} / {} images for post {}",
            outcome.downloaded, outcome.found, post_id
        );
    }

    info!(
        "Post {} finished in {:.2} seconds",
        post_id,
        started.elapsed().as_secs_f64()
    );
    Ok(outcome)
}

pub async fn run_post_images(
    page: &dyn PageDriver,
    opts: &ImagesOptions,
    post_urls: &[String],
    cancel: &CancellationToken,
) -> Result<(Vec<PostImagesOutcome>, RunMetadata)> {
    let started_at = Local::now();
    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(post_urls.len());
    let mut interrupted = false;

    for (index, post_url) in post_urls.iter().enumerate() {
        if cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        info!("Processing post {}/{}: {}", index + 1, post_urls.len(), post_url);
        match scrape_post_images(page, opts, post_url).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("Failed to process post {}: {:#}", post_url, e),
        }

        if index + 1 < post_urls.len() && !pause_unless_cancelled(cancel, opts.between_posts).await {
            interrupted = true;
            break;
        }
    }
    if interrupted {
        warn!("Interrupted after {} of {} posts", outcomes.len(), post_urls.len());
    }

    let metadata = RunMetadata {
        job: "images".to_string(),
        started: started_at,
        seeds_total: post_urls.len(),
        seeds_processed: outcomes.iter().filter(|o| !o.skipped).count(),
        items_collected: outcomes.iter().map(|o| o.found).sum(),
        items_saved: outcomes.iter().map(|o| o.downloaded).sum(),
        duration: started.elapsed(),
        interrupted,
    };
    let path = metadata.write_to(&opts.output_dir)?;
    info!("Run metadata written to {}", path.display());
    Ok((outcomes, metadata))
}
