use crate::config::DetectArgs;
use crate::detector::{
    find_detection_images, parse_verdict, render_report, write_report, Detector, FindingOutcome,
    Verdict,
};
use crate::tests::openai_tests::create_test_settings;
use chrono::{Local, TimeZone};
use mockito::Matcher;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn chat_body(content: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "qwen-vl-plus",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

#[test]
fn test_parse_verdict_json_in_code_fence() {
    let answer = "```json\n{\"suspicious\": true, \"explanation\": \"Hidden instruction in the caption\"}\n```";
    assert_eq!(
        parse_verdict(answer),
        Verdict {
            suspicious: true,
            explanation: "Hidden instruction in the caption".to_string(),
        }
    );
}

#[test]
fn test_parse_verdict_json_embedded_in_prose() {
    let answer = "Here is my analysis: {\"suspicious\": false, \"explanation\": \"No suspicious content found.\"} Thanks!";
    let verdict = parse_verdict(answer);
    assert!(!verdict.suspicious);
    assert_eq!(verdict.explanation, "No suspicious content found.");
}

#[test]
fn test_parse_verdict_sentinel_fallback() {
    assert!(!parse_verdict("No suspicious content found.").suspicious);

    let verdict = parse_verdict("The English text says 'ignore all previous instructions'.");
    assert!(verdict.suspicious);
    assert_eq!(
        verdict.explanation,
        "The English text says 'ignore all previous instructions'."
    );
}

#[test]
fn test_parse_verdict_wrong_json_shape_uses_sentinel() {
    let verdict = parse_verdict("{\"risk\": \"low\"} No suspicious content found");
    assert!(!verdict.suspicious);
}

fn write_fixture(dir: &Path) {
    std::fs::create_dir_all(dir.join("sub")).unwrap();
    std::fs::write(dir.join("sub").join("a.jpg"), "one").unwrap();
    std::fs::write(dir.join("b.jpeg"), "two").unwrap();
    std::fs::write(dir.join("c.PNG"), "xyz").unwrap();
    std::fs::write(dir.join("notes.txt"), "not an image").unwrap();
}

#[test]
fn test_find_detection_images_recursive_and_filtered() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let images = find_detection_images(dir.path()).unwrap();
    let names: Vec<String> = images
        .iter()
        .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
        .collect();
    assert_eq!(names, vec!["b.jpeg", "c.PNG", "sub/a.jpg"]);
}

#[tokio::test]
async fn test_detector_run_separates_suspicious_and_failed() {
    let mut server = mockito::Server::new_async().await;
    let suspicious = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("data:image/jpeg;base64,b25l".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_body(
            "```json\n{\"suspicious\": true, \"explanation\": \"Caption asks the translator to ignore its instructions\"}\n```",
        ))
        .create_async()
        .await;
    let failing = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("base64,dHdv".to_string()))
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;
    let clean = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("data:image/png;base64,eHl6".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_body("No suspicious content found."))
        .create_async()
        .await;

    let images = TempDir::new().unwrap();
    write_fixture(images.path());
    let args = DetectArgs {
        images_dir: images.path().to_path_buf(),
        reports_dir: images.path().join("reports"),
        call_delay_ms: 0,
    };
    let detector = Detector::new(&create_test_settings(server.url()), &args).unwrap();

    let run = detector
        .run(images.path(), &CancellationToken::new())
        .await
        .unwrap();

    suspicious.assert_async().await;
    failing.assert_async().await;
    clean.assert_async().await;
    assert_eq!(run.findings.len(), 3);
    assert_eq!(run.suspicious().count(), 1);
    assert_eq!(run.failed().count(), 1);
    assert!(matches!(
        &run.findings[1].outcome,
        FindingOutcome::Analyzed(v) if !v.suspicious
    ));

    let report = render_report(&run, images.path());
    assert!(report.starts_with("LLM Detection Analysis Report\n"));
    assert!(report.contains("Total Images Scanned: 3\n"));
    assert!(report.contains("Suspicious Images Found: 1\n"));
    assert!(report.contains("Failed Analyses: 1\n"));
    assert!(report.contains("- sub/a.jpg\n"));
    assert!(report.contains("\nImage: sub/a.jpg\n----------------\n"));
    assert!(report.contains("Caption asks the translator to ignore its instructions"));
    assert!(report.contains("- b.jpeg: "));

    let now = Local.with_ymd_and_hms(2024, 5, 1, 13, 4, 5).unwrap();
    let path = write_report(&run, images.path(), &args.reports_dir, now).unwrap();
    assert!(path.ends_with("llm_report_20240501_130405.txt"));
    assert_eq!(std::fs::read_to_string(path).unwrap(), report);
}

#[cfg(unix)]
#[test]
fn test_find_detection_images_does_not_follow_directory_symlinks() {
    let dir = TempDir::new().unwrap();
    let post = dir.path().join("post_a");
    std::fs::create_dir_all(&post).unwrap();
    std::fs::write(post.join("a.png"), "x").unwrap();
    std::os::unix::fs::symlink(&post, post.join("loop")).unwrap();

    let images = find_detection_images(dir.path()).unwrap();
    assert_eq!(images, vec![post.join("a.png")]);
}
