use crate::carousel::{
    collect_carousel_images, CarouselEnd, CarouselSettings, FALLBACK_IMAGE_SELECTOR,
    IMAGE_SELECTOR, NEXT_BUTTON_SELECTOR,
};
use crate::tests::fake_page::FakePage;
use std::time::Duration;

const ENABLED: &str = "arrow-controller right";
const DISABLED: &str = "arrow-controller right forbidden";

fn settings(max_clicks: u32) -> CarouselSettings {
    CarouselSettings {
        max_clicks,
        check_pause: Duration::ZERO,
        click_pause: Duration::ZERO,
        next_button_wait: Duration::from_millis(10),
    }
}

fn srcs(urls: &[&str]) -> Vec<Option<String>> {
    urls.iter().map(|u| Some(u.to_string())).collect()
}

#[tokio::test]
async fn test_walk_stops_on_disabled_button() {
    let page = FakePage::new()
        .with_attribute_views(
            IMAGE_SELECTOR,
            vec![
                srcs(&["https://img/a.jpg", "https://img/b.jpg"]),
                srcs(&["https://img/b.jpg", "https://img/c.jpg"]),
            ],
        )
        .with_class_states(
            NEXT_BUTTON_SELECTOR,
            vec![Some(ENABLED.to_string()), Some(DISABLED.to_string())],
        );

    let report = collect_carousel_images(&page, &settings(15)).await;

    assert_eq!(report.end, CarouselEnd::NextDisabled);
    assert_eq!(
        report.image_urls,
        vec!["https://img/a.jpg", "https://img/b.jpg", "https://img/c.jpg"]
    );
    assert_eq!(report.views, 2);
    assert_eq!(report.clicks, 1);
}

#[tokio::test]
async fn test_walk_never_exceeds_click_budget() {
    let page = FakePage::new()
        .with_attribute_views(IMAGE_SELECTOR, vec![srcs(&["https://img/a.jpg"])])
        .with_class_states(NEXT_BUTTON_SELECTOR, vec![Some(ENABLED.to_string())]);

    let report = collect_carousel_images(&page, &settings(2)).await;

    assert_eq!(report.end, CarouselEnd::ClickBudgetSpent);
    assert_eq!(report.clicks, 2);
    assert_eq!(report.views, 3);
    assert_eq!(page.count_calls("click:"), 2);
}

#[tokio::test]
async fn test_single_image_post_without_next_button() {
    let page = FakePage::new().with_attribute_views(
        FALLBACK_IMAGE_SELECTOR,
        vec![vec![
            Some("https://img/only.jpg".to_string()),
            None,
            Some("blob:https://www.xiaohongshu.com/1".to_string()),
        ]],
    );

    let report = collect_carousel_images(&page, &settings(15)).await;

    assert_eq!(report.end, CarouselEnd::NoNextButton);
    assert_eq!(report.image_urls, vec!["https://img/only.jpg"]);
    assert_eq!(report.views, 1);
}

#[tokio::test]
async fn test_native_click_fallback_and_total_failure() {
    let page = FakePage::new()
        .with_attribute_views(
            IMAGE_SELECTOR,
            vec![srcs(&["https://img/a.jpg"]), srcs(&["https://img/b.jpg"])],
        )
        .with_class_states(
            NEXT_BUTTON_SELECTOR,
            vec![Some(ENABLED.to_string()), Some(DISABLED.to_string())],
        )
        .with_click_failures(true, false);

    let report = collect_carousel_images(&page, &settings(15)).await;
    assert_eq!(report.end, CarouselEnd::NextDisabled);
    assert_eq!(report.clicks, 1);
    assert_eq!(page.count_calls("native_click:"), 1);

    let page = FakePage::new()
        .with_attribute_views(IMAGE_SELECTOR, vec![srcs(&["https://img/a.jpg"])])
        .with_class_states(NEXT_BUTTON_SELECTOR, vec![Some(ENABLED.to_string())])
        .with_click_failures(true, true);

    let report = collect_carousel_images(&page, &settings(15)).await;
    assert_eq!(report.end, CarouselEnd::ClickFailed);
    assert_eq!(report.clicks, 0);
}

#[tokio::test]
async fn test_walk_ends_when_images_disappear() {
    let page = FakePage::new()
        .with_attribute_views(IMAGE_SELECTOR, vec![srcs(&["https://img/a.jpg"]), vec![]])
        .with_class_states(NEXT_BUTTON_SELECTOR, vec![Some(ENABLED.to_string())]);

    let report = collect_carousel_images(&page, &settings(15)).await;

    assert_eq!(report.end, CarouselEnd::NoImages);
    assert_eq!(report.image_urls, vec!["https://img/a.jpg"]);
    assert_eq!(report.views, 2);
}
