use crate::browser::ChromeSession;
use crate::comments::{run_comments, CommentsOptions};
use crate::config::{load_config, Command};
use crate::detector::{write_report, Detector};
use crate::ocr::{ocr_tree, write_csv, OcrSettings};
use crate::post_images::{run_post_images, ImagesOptions};
use crate::search::{run_search, SearchOptions};
use crate::seeds::{read_post_urls, read_prompts};
use crate::text_filter::{filter_comments, make_unique, FilterOptions};
use anyhow::{bail, Context, Result};
use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod accumulator;
mod browser;
mod carousel;
mod comments;
mod config;
mod detector;
mod download;
mod extractor;
mod log_dedup;
mod models;
mod ocr;
mod openai;
mod output;
mod pagination;
mod post_images;
mod scroller;
mod search;
mod seeds;
mod text_filter;
mod walk;

#[cfg(test)]
mod tests;

/// Cancel the returned token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; finishing the current item and stopping");
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let app_settings = load_config().with_context(|| "Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(app_settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Configuration loaded; log level {}", app_settings.log_level);
    let cancel = cancel_on_ctrl_c();
    let browser = &app_settings.browser;

    match &app_settings.command {
        Command::Search(args) => {
            let prompts = read_prompts(&args.prompts_file)?;
            if prompts.is_empty() {
                bail!("No valid prompts found in {}", args.prompts_file.display());
            }
            let opts = SearchOptions::from_args(browser, args);
            let session = ChromeSession::start(browser)
                .await
                .with_context(|| "Failed to start the browser")?;
            let outcomes = run_search(&session, &opts, &prompts, &cancel).await;
            session.close().await;

            let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
            let links: usize = outcomes.iter().map(|o| o.post_links).sum();
            info!(
                "Processed {} prompts ({} with errors), {} post links in total",
                outcomes.len(),
                failed,
                links
            );
        }
        Command::Images(args) => {
            let post_urls = read_post_urls(&args.post_links_file)?;
            if post_urls.is_empty() {
                bail!("No valid post URLs found in {}", args.post_links_file.display());
            }
            let opts = ImagesOptions::from_args(browser, args);
            let session = ChromeSession::start(browser)
                .await
                .with_context(|| "Failed to start the browser")?;
            let result = run_post_images(&session, &opts, &post_urls, &cancel).await;
            session.close().await;

            let (_, metadata) = result?;
            info!(
                "Processed {} / {} posts, downloaded {} of {} images",
                metadata.seeds_processed,
                metadata.seeds_total,
                metadata.items_saved,
                metadata.items_collected
            );
        }
        Command::Comments(args) => {
            let post_urls = read_post_urls(&args.post_links_file)?;
            if post_urls.is_empty() {
                bail!("No valid post URLs found in {}", args.post_links_file.display());
            }
            let opts = CommentsOptions::from_args(browser, args);
            let session = ChromeSession::start(browser)
                .await
                .with_context(|| "Failed to start the browser")?;
            let result = run_comments(&session, &opts, &post_urls, &cancel).await;
            session.close().await;

            let (_, metadata) = result?;
            info!(
                "Processed {} / {} posts, saved {} comments to {}",
                metadata.seeds_processed,
                metadata.seeds_total,
                metadata.items_saved,
                args.output.display()
            );
        }
        Command::Filter(args) => {
            let options = FilterOptions {
                remove_mentions: !args.keep_mentions,
                remove_chinese: !args.keep_chinese,
            };
            let stats = filter_comments(&args.input, &args.output, options)?;
            info!(
                "Kept {} comments; removed {} @-lines and {} Chinese lines out of {} lines",
                stats.written, stats.removed_mentions, stats.removed_chinese, stats.lines_read
            );
            if let Some(unique_output) = &args.unique_output {
                let count = make_unique(&args.output, unique_output)?;
                info!("{} unique lines written to {}", count, unique_output.display());
            }
        }
        Command::Unique(args) => {
            let count = make_unique(&args.input, &args.output)?;
            info!("{} unique lines written to {}", count, args.output.display());
        }
        Command::Ocr(args) => {
            let settings = OcrSettings {
                lang: args.lang.clone(),
                psm: args.psm,
                preprocess: !args.no_preprocess,
            };
            let root = args.root_dir.clone();
            let out = args.out.clone();
            let rows = tokio::task::spawn_blocking(move || {
                let rows = ocr_tree(&root, &settings)?;
                write_csv(&out, &rows)?;
                Ok::<_, ocr::OcrError>(rows.len())
            })
            .await
            .with_context(|| "OCR task panicked")?
            .with_context(|| format!("OCR of {} failed", args.root_dir.display()))?;
            info!("OCR finished for {} sub-directories", rows);
        }
        Command::Detect(args) => {
            let detector = Detector::new(&app_settings.openai, args)
                .with_context(|| "Failed to create the LLM client")?;
            let run = detector
                .run(&args.images_dir, &cancel)
                .await
                .with_context(|| format!("Failed to scan {}", args.images_dir.display()))?;
            let report = write_report(&run, &args.images_dir, &args.reports_dir, Local::now())
                .with_context(|| "Failed to write the detection report")?;
            info!(
                "Analysis complete. Scanned {} images, found {} suspicious ({} failed). Report: {}",
                run.findings.len(),
                run.suspicious().count(),
                run.failed().count(),
                report.display()
            );
        }
    }

    Ok(())
}
