use crate::carousel::{CarouselSettings, IMAGE_SELECTOR, POST_PAGE_LOAD_INDICATOR};
use crate::comments::{
    run_comments, CommentsOptions, COMMENTS_LIST_CONTAINER_SELECTOR, COMMENTS_SECTION_SELECTOR,
};
use crate::models::{CommentNode, LinkCard};
use crate::output::{POST_LINKS_FILE, RUN_METADATA_FILE, SESSION_METADATA_FILE};
use crate::pagination::{Pacing, PaginationPolicy};
use crate::post_images::{run_post_images, ImagesOptions};
use crate::scroller::ScrollSettings;
use crate::search::{run_search, scrape_prompt, SearchOptions, SEARCH_BOX_SELECTOR};
use crate::tests::fake_page::{FakePage, ScriptedScroll};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const SITE: &str = "https://www.xiaohongshu.com";
const POST_URL: &str =
    "https://www.xiaohongshu.com/explore/678d4d360000000019015ca8?xsec_token=tok";

fn policy() -> PaginationPolicy {
    PaginationPolicy {
        stall_threshold: 2,
        min_iterations: 0,
        max_iterations: 10,
    }
}

fn scroll_settings() -> ScrollSettings {
    ScrollSettings {
        increment: 1000,
        element_wait: Duration::from_millis(10),
        relocate_wait: Duration::from_millis(10),
    }
}

fn search_options(output_dir: &Path) -> SearchOptions {
    SearchOptions {
        site_url: SITE.to_string(),
        output_dir: output_dir.to_path_buf(),
        policy: policy(),
        pacing: Pacing::new(Duration::ZERO),
        scroll: scroll_settings(),
        download: false,
        image_host: "sns-webpic-qc.xhscdn.com".to_string(),
        page_settle: Duration::ZERO,
        search_box_wait: Duration::from_millis(10),
        between_prompts: Duration::ZERO,
        download_pause: Duration::ZERO,
    }
}

fn result_cards() -> Vec<LinkCard> {
    vec![
        LinkCard {
            href: Some(format!("{}/search_result/bbb222?xsec_token=t2", SITE)),
            image_src: Some("https://sns-webpic-qc.xhscdn.com/b.webp".to_string()),
        },
        LinkCard {
            href: Some(format!("{}/search_result/aaa111?xsec_token=t1", SITE)),
            image_src: Some("https://sns-webpic-qc.xhscdn.com/a.webp".to_string()),
        },
    ]
}

#[tokio::test]
async fn test_search_falls_back_to_keyword_url() {
    let dir = TempDir::new().unwrap();
    let page = FakePage::new().with_link_cards(vec![result_cards()]);

    let outcome = scrape_prompt(&page, &search_options(dir.path()), "cute cats").await;

    assert!(outcome.error.is_none());
    assert_eq!(outcome.post_links, 2);
    assert_eq!(outcome.images, 2);
    assert!(page
        .calls()
        .contains(&format!("goto:{}/search_result?keyword=cute%20cats", SITE)));

    let links = std::fs::read_to_string(outcome.session_dir.join(POST_LINKS_FILE)).unwrap();
    let lines: Vec<&str> = links.lines().collect();
    assert_eq!(lines[0], "Post links found for prompt: cute cats");
    assert_eq!(
        &lines[2..],
        &[
            "https://www.xiaohongshu.com/explore/aaa111?xsec_token=t1",
            "https://www.xiaohongshu.com/explore/bbb222?xsec_token=t2",
        ]
    );
}

#[tokio::test]
async fn test_search_types_into_search_box_when_present() {
    let dir = TempDir::new().unwrap();
    let page = FakePage::new()
        .with_element(SEARCH_BOX_SELECTOR)
        .with_link_cards(vec![result_cards()]);

    scrape_prompt(&page, &search_options(dir.path()), "翻译").await;

    let calls = page.calls();
    assert!(calls.contains(&format!("submit_text:{}:翻译", SEARCH_BOX_SELECTOR)));
    assert_eq!(page.count_calls("goto:"), 1);
}

#[tokio::test]
async fn test_search_failure_still_writes_partial_output() {
    let dir = TempDir::new().unwrap();
    let page = FakePage::new().with_goto_failure(SITE);

    let outcome = scrape_prompt(&page, &search_options(dir.path()), "cute cats").await;

    assert!(outcome.error.is_some());
    let metadata =
        std::fs::read_to_string(outcome.session_dir.join(SESSION_METADATA_FILE)).unwrap();
    assert!(metadata.contains("Prompt: cute cats (encountered error)\n"));
    assert!(metadata.contains("Total unique post links found: 0\n"));
    let links = std::fs::read_to_string(outcome.session_dir.join(POST_LINKS_FILE)).unwrap();
    assert_eq!(links, "No post links were found for this prompt.\n");
}

#[tokio::test]
async fn test_search_stops_between_prompts_when_cancelled() {
    let dir = TempDir::new().unwrap();
    let page = FakePage::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let prompts = vec!["one".to_string(), "two".to_string()];
    let outcomes = run_search(&page, &search_options(dir.path()), &prompts, &cancel).await;

    assert!(outcomes.is_empty());
    assert!(page.calls().is_empty());
}

#[tokio::test]
async fn test_session_directory_failure_does_not_stop_later_prompts() {
    let dir = TempDir::new().unwrap();
    // A plain file where the output directory should be
    let blocked = dir.path().join("downloaded_images");
    std::fs::write(&blocked, "not a directory").unwrap();
    let page = FakePage::new().with_link_cards(vec![result_cards()]);
    let cancel = CancellationToken::new();

    let prompts = vec!["one".to_string(), "two".to_string()];
    let outcomes = run_search(&page, &search_options(&blocked), &prompts, &cancel).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.error.is_some() && o.post_links == 0));
    assert_eq!(outcomes[1].prompt, "two");
    assert!(page.calls().is_empty());
}

fn comments_options(output: &Path) -> CommentsOptions {
    CommentsOptions {
        output: output.to_path_buf(),
        policy: policy(),
        pacing: Pacing::new(Duration::ZERO),
        scroll: scroll_settings(),
        page_load_timeout: Duration::from_millis(10),
        element_wait: Duration::from_millis(10),
        post_settle: Duration::ZERO,
        between_posts: Duration::ZERO,
    }
}

fn comment(id: &str, text: &str) -> CommentNode {
    CommentNode {
        id: Some(id.to_string()),
        text: Some(text.to_string()),
    }
}

#[tokio::test]
async fn test_comments_job_scrolls_list_and_writes_file() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("comments.txt");
    let page = FakePage::new()
        .with_element(POST_PAGE_LOAD_INDICATOR)
        .with_element(COMMENTS_SECTION_SELECTOR)
        .with_element(COMMENTS_LIST_CONTAINER_SELECTOR)
        .with_element_scrolls(vec![
            ScriptedScroll::Height(500),
            ScriptedScroll::Height(900),
        ])
        .with_comment_nodes(vec![
            vec![comment("comment-1", " first "), comment("comment-2", "second")],
            vec![
                comment("comment-1", "first"),
                comment("comment-2", "second"),
                comment("comment-3", "same text"),
                comment("comment-4", "same text"),
                CommentNode {
                    id: None,
                    text: Some("   ".to_string()),
                },
            ],
        ]);

    let (posts, metadata) = run_comments(
        &page,
        &comments_options(&output),
        &[POST_URL.to_string()],
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].comments, vec!["first", "second", "same text", "same text"]);
    assert!(page.count_calls("scroll_element:") >= 1);
    assert_eq!(page.count_calls("scroll_window"), 0);
    assert_eq!(page.count_calls("scroll_into_view:"), 1);

    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(written, "first\nsecond\nsame text\nsame text\n");
    assert_eq!(metadata.items_saved, 4);
    assert!(dir.path().join(RUN_METADATA_FILE).exists());
}

#[tokio::test]
async fn test_comments_job_skips_post_that_never_loads() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("comments.txt");
    let page = FakePage::new();

    let (posts, metadata) = run_comments(
        &page,
        &comments_options(&output),
        &[POST_URL.to_string()],
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(posts[0].pagination.is_none());
    assert_eq!(metadata.seeds_processed, 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_images_job_downloads_sorted_carousel_images() {
    let mut server = mockito::Server::new_async().await;
    let image_a = server
        .mock("GET", "/a.jpg")
        .match_header("referer", POST_URL)
        .match_header("user-agent", "FakePage/1.0")
        .match_header("cookie", "web_session=fake")
        .with_status(200)
        .with_body("AAA")
        .create_async()
        .await;
    let image_b = server
        .mock("GET", "/b.jpg")
        .with_status(200)
        .with_body("BBB")
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let page = FakePage::new()
        .with_element(POST_PAGE_LOAD_INDICATOR)
        .with_attribute_views(
            IMAGE_SELECTOR,
            vec![vec![
                Some(format!("{}/b.jpg", server.url())),
                Some(format!("{}/a.jpg", server.url())),
            ]],
        );
    let opts = ImagesOptions {
        output_dir: dir.path().to_path_buf(),
        carousel: CarouselSettings {
            check_pause: Duration::ZERO,
            click_pause: Duration::ZERO,
            next_button_wait: Duration::from_millis(10),
            ..CarouselSettings::default()
        },
        page_load_timeout: Duration::from_millis(10),
        post_settle: Duration::ZERO,
        between_posts: Duration::ZERO,
        download_pause: Duration::ZERO,
    };

    let (outcomes, metadata) = run_post_images(
        &page,
        &opts,
        &[POST_URL.to_string()],
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    image_a.assert_async().await;
    image_b.assert_async().await;
    assert_eq!(outcomes[0].found, 2);
    assert_eq!(outcomes[0].downloaded, 2);
    assert_eq!(metadata.items_saved, 2);

    let folder = dir.path().join("678d4d360000000019015ca8");
    assert_eq!(
        std::fs::read_to_string(folder.join("678d4d360000000019015ca8_0.jpg")).unwrap(),
        "AAA"
    );
    assert_eq!(
        std::fs::read_to_string(folder.join("678d4d360000000019015ca8_1.jpg")).unwrap(),
        "BBB"
    );
    assert!(dir.path().join(RUN_METADATA_FILE).exists());
}
