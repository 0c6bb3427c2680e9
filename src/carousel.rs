use crate::accumulator::Accumulator;
use crate::browser::PageDriver;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub const NEXT_BUTTON_SELECTOR: &str = "div.arrow-controller.right";
pub const DISABLED_BUTTON_CLASS: &str = "forbidden";
pub const IMAGE_SELECTOR: &str = "div.swiper-slide img.note-slider-img";
pub const FALLBACK_IMAGE_SELECTOR: &str = "div.media-container img";
/// Present once a post page has rendered its media.
pub const POST_PAGE_LOAD_INDICATOR: &str = "div.slider-container, div.media-container img";

#[derive(Debug, Clone)]
pub struct CarouselSettings {
    pub max_clicks: u32,
    /// Pause before reading each view.
    pub check_pause: Duration,
    /// Pause after clicking "next".
    pub click_pause: Duration,
    pub next_button_wait: Duration,
}

impl Default for CarouselSettings {
    fn default() -> Self {
        Self {
            max_clicks: 15,
            check_pause: Duration::from_millis(700),
            click_pause: Duration::from_millis(1500),
            next_button_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarouselEnd {
    NoNextButton,
    NextDisabled,
    ClickFailed,
    NoImages,
    ClickBudgetSpent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarouselReport {
    /// Image URLs in first-seen order.
    pub image_urls: Vec<String>,
    pub views: u32,
    pub clicks: u32,
    pub end: CarouselEnd,
}

async fn visible_image_sources(page: &dyn PageDriver) -> Vec<String> {
    for selector in [IMAGE_SELECTOR, FALLBACK_IMAGE_SELECTOR] {
        match page.attribute_values(selector, "src").await {
            Ok(values) if !values.is_empty() => {
                if selector == FALLBACK_IMAGE_SELECTOR {
                    debug!("Using fallback image selector");
                }
                return values.into_iter().flatten().collect();
            }
            Ok(_) => {}
            Err(e) => warn!("Error reading images with '{}': {}", selector, e),
        }
    }
    Vec::new()
}

/// Walk an image carousel by clicking its "next" control, collecting every image URL.
pub async fn collect_carousel_images(
    page: &dyn PageDriver,
    settings: &CarouselSettings,
) -> CarouselReport {
    let mut images = Accumulator::new();
    let mut clicks = 0;
    let mut views = 0;

    let end = loop {
        sleep(settings.check_pause).await;
        views += 1;

        let sources = visible_image_sources(page).await;
        if sources.is_empty() {
            if clicks == 0 {
                warn!("No image elements found with the primary or fallback selectors");
            } else {
                break CarouselEnd::NoImages;
            }
        }
        let new_images = images.extend_new(sources.into_iter().filter(|src| src.starts_with("http")));
        debug!("Found {} new image URLs in this view", new_images);

        if page
            .wait_for(NEXT_BUTTON_SELECTOR, settings.next_button_wait)
            .await
            .is_err()
        {
            info!("Next button not found; single image post or end of carousel");
            break CarouselEnd::NoNextButton;
        }
        match page.class_attribute(NEXT_BUTTON_SELECTOR).await {
            Ok(Some(classes)) if classes.split_whitespace().any(|c| c == DISABLED_BUTTON_CLASS) => {
                info!("Next button is disabled; end of carousel");
                break CarouselEnd::NextDisabled;
            }
            Ok(Some(_)) => {}
            Ok(None) => break CarouselEnd::NoNextButton,
            Err(e) => {
                warn!("Could not read next button state: {}", e);
                break CarouselEnd::NoNextButton;
            }
        }

        if clicks >= settings.max_clicks {
            break CarouselEnd::ClickBudgetSpent;
        }

        debug!("Clicking next image button (attempt {})", clicks + 1);
        if let Err(e) = page.click(NEXT_BUTTON_SELECTOR).await {
            warn!("Scripted click failed ({}), trying a native click", e);
            if let Err(e) = page.native_click(NEXT_BUTTON_SELECTOR).await {
                error!("Both click methods failed for the next button: {}", e);
                break CarouselEnd::ClickFailed;
            }
        }
        clicks += 1;
        sleep(settings.click_pause).await;
    };

    info!(
        "Carousel walk ended ({:?}) after {} views: {} unique image URLs",
        end,
        views,
        images.len()
    );
    CarouselReport {
        image_urls: images.into_vec(),
        views,
        clicks,
        end,
    }
}
