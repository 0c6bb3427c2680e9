use crate::accumulator::Accumulator;
use crate::browser::PageDriver;
use crate::log_dedup::LogDeduplicator;
use crate::pagination::Harvester;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

/// Anchors wrapping a search result cover.
pub const SEARCH_RESULT_LINK_SELECTOR: &str = "a.cover[href*='/search_result/']";
pub const COMMENT_ITEM_SELECTOR: &str = "div.parent-comment div.comment-item";
pub const COMMENT_CONTENT_SELECTOR: &str = "span.note-text";

static SEARCH_RESULT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/search_result/([a-f0-9]+)").unwrap());
static POST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/explore/([a-f0-9]{24})").unwrap());

/// Post id embedded in a search result href.
pub fn search_result_id(href: &str) -> Option<&str> {
    SEARCH_RESULT_ID_RE
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Rebuild the canonical post URL for a search result href, keeping its query
/// string (the `xsec_token` the site requires for direct visits).
pub fn post_url_from_search_href(site_url: &str, href: &str) -> Option<String> {
    let post_id = search_result_id(href)?;
    let base = format!("{}/explore/{}", site_url.trim_end_matches('/'), post_id);

    let query = Url::parse(site_url)
        .and_then(|site| site.join(href))
        .ok()
        .and_then(|parsed| parsed.query().map(str::to_string))
        .filter(|q| !q.is_empty());

    Some(match query {
        Some(query) => format!("{}?{}", base, query),
        None => base,
    })
}

/// 24-hex-digit post id of a post page URL.
pub fn post_id_from_url(post_url: &str) -> Option<String> {
    POST_ID_RE
        .captures(post_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Folder name for a post: its id, or a timestamped stand-in when the URL has none.
pub fn post_folder_name(post_url: &str, now: DateTime<Local>) -> String {
    if let Some(post_id) = post_id_from_url(post_url) {
        return post_id;
    }
    let last_segment = post_url
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default();
    let prefix: String = last_segment.chars().take(10).collect();
    format!("unknown_{}_{}", prefix, now.format("%H%M%S_%6f"))
}

/// An http(s) image URL whose host contains `host_filter` (empty accepts any host).
pub fn accept_image_url(src: &str, host_filter: &str) -> bool {
    let Ok(parsed) = Url::parse(src) else {
        return false;
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return false;
    }
    host_filter.is_empty() || parsed.host_str().is_some_and(|host| host.contains(host_filter))
}

/// Post links and cover images from a search results page.
pub struct SearchResultHarvester {
    site_url: String,
    image_host: String,
    post_ids: Accumulator<String>,
    posts: Accumulator<String>,
    images: Accumulator<String>,
    warnings: LogDeduplicator,
}

impl SearchResultHarvester {
    pub fn new(site_url: &str, image_host: &str) -> Self {
        Self {
            site_url: site_url.to_string(),
            image_host: image_host.to_string(),
            post_ids: Accumulator::new(),
            posts: Accumulator::new(),
            images: Accumulator::new(),
            warnings: LogDeduplicator::default(),
        }
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn post_urls(&self) -> Vec<String> {
        self.posts.iter().cloned().collect()
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.images.iter().cloned().collect()
    }
}

#[async_trait]
impl Harvester for SearchResultHarvester {
    async fn harvest(&mut self, page: &dyn PageDriver) -> usize {
        self.warnings.cleanup();
        let cards = match page.link_cards(SEARCH_RESULT_LINK_SELECTOR).await {
            Ok(cards) => cards,
            Err(e) => {
                warn!("Could not read search results: {}", e);
                return 0;
            }
        };

        let mut new_posts = 0;
        let mut new_images = 0;
        for card in cards {
            let Some(href) = card.href.as_deref() else {
                continue;
            };
            let Some(post_id) = search_result_id(href) else {
                if self.warnings.should_log(href) {
                    warn!("Skipping search result without a post id: {}", href);
                }
                continue;
            };
            if !self.post_ids.insert(post_id.to_string()) {
                continue;
            }

            if let Some(post_url) = post_url_from_search_href(&self.site_url, href) {
                if self.posts.insert(post_url) {
                    new_posts += 1;
                }
            }

            match card.image_src.as_deref() {
                Some(src) if accept_image_url(src, &self.image_host) => {
                    if self.images.insert(src.to_string()) {
                        new_images += 1;
                    }
                }
                Some(_) => {}
                None => debug!("No cover image inside result for post {}", post_id),
            }
        }

        if new_posts > 0 || new_images > 0 {
            debug!(
                "Found {} new posts, {} new images ({} posts, {} images total)",
                new_posts,
                new_images,
                self.posts.len(),
                self.images.len()
            );
        }
        new_posts + new_images
    }

    fn total(&self) -> usize {
        self.posts.len()
    }
}

/// Comment texts of a post page, keyed by DOM id or text.
pub struct CommentHarvester {
    item_selector: String,
    content_selector: String,
    keys: Accumulator<String>,
    comments: Vec<String>,
}

impl CommentHarvester {
    pub fn new(item_selector: &str, content_selector: &str) -> Self {
        Self {
            item_selector: item_selector.to_string(),
            content_selector: content_selector.to_string(),
            keys: Accumulator::new(),
            comments: Vec::new(),
        }
    }

    pub fn into_comments(self) -> Vec<String> {
        self.comments
    }
}

impl Default for CommentHarvester {
    fn default() -> Self {
        Self::new(COMMENT_ITEM_SELECTOR, COMMENT_CONTENT_SELECTOR)
    }
}

#[async_trait]
impl Harvester for CommentHarvester {
    async fn harvest(&mut self, page: &dyn PageDriver) -> usize {
        let nodes = match page
            .comment_nodes(&self.item_selector, &self.content_selector)
            .await
        {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Could not read comments: {}", e);
                return 0;
            }
        };

        let mut new_comments = 0;
        for node in nodes {
            let Some(text) = node.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
                continue;
            };
            let Some(key) = node.key() else {
                continue;
            };
            if self.keys.insert(key) {
                self.comments.push(text.to_string());
                new_comments += 1;
            }
        }
        new_comments
    }

    fn total(&self) -> usize {
        self.comments.len()
    }
}
