use crate::browser::PageDriver;
use crate::carousel::POST_PAGE_LOAD_INDICATOR;
use crate::config::{BrowserSettings, CommentsArgs};
use crate::extractor::{post_folder_name, CommentHarvester};
use crate::output::{write_lines, RunMetadata};
use crate::pagination::{
    pause_unless_cancelled, scroll_and_collect, Pacing, PaginationPolicy, PaginationReport,
};
use crate::scroller::{ScrollSettings, Scroller};
use anyhow::Result;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const COMMENTS_SECTION_SELECTOR: &str = "div.comments-el";
/// The element that actually scrolls the comment list.
pub const COMMENTS_LIST_CONTAINER_SELECTOR: &str = "div.comments-el div.list-container";

#[derive(Debug, Clone)]
pub struct CommentsOptions {
    pub output: PathBuf,
    pub policy: PaginationPolicy,
    pub pacing: Pacing,
    pub scroll: ScrollSettings,
    pub page_load_timeout: Duration,
    pub element_wait: Duration,
    pub post_settle: Duration,
    pub between_posts: Duration,
}

impl CommentsOptions {
    pub fn from_args(browser: &BrowserSettings, args: &CommentsArgs) -> Self {
        let element_wait = Duration::from_secs(browser.element_wait_seconds);
        Self {
            output: args.output.clone(),
            policy: PaginationPolicy::from(&args.pagination),
            pacing: Pacing::from(&args.pagination),
            scroll: ScrollSettings {
                increment: args.pagination.scroll_increment,
                element_wait,
                ..ScrollSettings::default()
            },
            page_load_timeout: Duration::from_secs(browser.page_load_timeout_seconds),
            element_wait,
            post_settle: Duration::from_secs(3),
            between_posts: Duration::from_secs(args.post_wait_seconds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostComments {
    pub post_url: String,
    pub comments: Vec<String>,
    pub pagination: Option<PaginationReport>,
}

/// Load every comment of one post by scrolling its comment list.
pub async fn scrape_post_comments(
    page: &dyn PageDriver,
    opts: &CommentsOptions,
    post_url: &str,
) -> PostComments {
    let started = Instant::now();
    let post_id = post_folder_name(post_url, Local::now());
    info!("Processing post {} (ID: {})", post_url, post_id);

    let mut result = PostComments {
        post_url: post_url.to_string(),
        comments: Vec::new(),
        pagination: None,
    };

    if let Err(e) = page.goto(post_url).await {
        error!("Failed to open post {}: {}", post_url, e);
        return result;
    }
    if let Err(e) = page.wait_for(POST_PAGE_LOAD_INDICATOR, opts.page_load_timeout).await {
        let landed = page.current_url().await.ok().flatten().unwrap_or_default();
        error!(
            "Post page {} never showed its content ({}); landed on '{}', skipping",
            post_url, e, landed
        );
        return result;
    }
    sleep(opts.post_settle).await;

    // Bringing the section into view is what triggers the first comment batch
    match page.wait_for(COMMENTS_SECTION_SELECTOR, opts.element_wait).await {
        Ok(()) => match page.scroll_into_view(COMMENTS_SECTION_SELECTOR).await {
            Ok(()) => sleep(opts.pacing.step_pause).await,
            Err(e) => warn!("Could not scroll the comments section into view: {}", e),
        },
        Err(_) => warn!(
            "Comments section '{}' not found; relying on page scrolling",
            COMMENTS_SECTION_SELECTOR
        ),
    }

    let mut scroller =
        Scroller::for_element(page, COMMENTS_LIST_CONTAINER_SELECTOR, opts.scroll.clone()).await;
    let mut harvester = CommentHarvester::default();
    let report =
        scroll_and_collect(page, &mut scroller, &mut harvester, opts.policy, opts.pacing).await;

    result.comments = harvester.into_comments();
    result.pagination = Some(report);
    info!(
        "Collected {} comments for post {} in {:.2} seconds",
        result.comments.len(),
        post_id,
        started.elapsed().as_secs_f64()
    );
    result
}

pub async fn run_comments(
    page: &dyn PageDriver,
    opts: &CommentsOptions,
    post_urls: &[String],
    cancel: &CancellationToken,
) -> Result<(Vec<PostComments>, RunMetadata)> {
    let started_at = Local::now();
    let started = Instant::now();
    let mut posts = Vec::with_capacity(post_urls.len());
    let mut interrupted = false;

    for (index, post_url) in post_urls.iter().enumerate() {
        if cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        info!("Processing post {}/{}: {}", index + 1, post_urls.len(), post_url);
        posts.push(scrape_post_comments(page, opts, post_url).await);

        if index + 1 < post_urls.len() && !pause_unless_cancelled(cancel, opts.between_posts).await {
            interrupted = true;
            break;
        }
    }
    if interrupted {
        warn!("Interrupted after {} of {} posts", posts.len(), post_urls.len());
    }

    let all_comments: Vec<&str> = posts
        .iter()
        .flat_map(|p| p.comments.iter().map(String::as_str))
        .collect();
    let saved = if all_comments.is_empty() {
        info!("No comments were collected from any posts");
        0
    } else {
        let saved = write_lines(&opts.output, &all_comments)?;
        info!("Saved {} comments to {}", saved, opts.output.display());
        saved
    };

    let metadata = RunMetadata {
        job: "comments".to_string(),
        started: started_at,
        seeds_total: post_urls.len(),
        seeds_processed: posts.iter().filter(|p| p.pagination.is_some()).count(),
        items_collected: all_comments.len(),
        items_saved: saved,
        duration: started.elapsed(),
        interrupted,
    };
    let dir = opts
        .output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    metadata.write_to(dir)?;
    Ok((posts, metadata))
}
