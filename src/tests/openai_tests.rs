use crate::config::OpenAISettings;
use crate::models::{
    OpenAIChatMessage, OpenAIChatRequest, OpenAIContentPart, OpenAIImageUrl, OpenAIMessageContent,
};
use crate::openai::{OpenAIApiClient, OpenAIClientError, OPENAI_CHAT_COMPLETIONS_PATH};
use mockito::Matcher;
use reqwest::StatusCode;
use serde_json::json;

pub(crate) fn create_test_settings(base_url: String) -> OpenAISettings {
    OpenAISettings {
        openai_api_key: Some("test_api_key".to_string()),
        openai_custom_url: base_url,
        openai_model: "qwen-vl-plus".to_string(),
        openai_max_tokens: 256,
        openai_timeout_seconds: 5,
    }
}

fn image_request() -> OpenAIChatRequest {
    OpenAIChatRequest {
        model: "qwen-vl-plus".to_string(),
        messages: vec![OpenAIChatMessage {
            role: "user".to_string(),
            content: Some(OpenAIMessageContent::Parts(vec![
                OpenAIContentPart::Text {
                    text: "What is in this image?".to_string(),
                },
                OpenAIContentPart::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: "data:image/png;base64,AAAA".to_string(),
                    },
                },
            ])),
        }],
        temperature: Some(0.0),
        max_tokens: Some(50),
    }
}

fn chat_response(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "qwen-vl-plus",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content
            },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 9,
            "completion_tokens": 12,
            "total_tokens": 21
        }
    })
}

#[test]
fn test_new_openai_api_client_invalid_url() {
    let settings = create_test_settings("not a valid url".to_string());
    match OpenAIApiClient::new(&settings) {
        Err(OpenAIClientError::UrlParse(_)) => {}
        other => panic!("Expected UrlParse, got {:?}", other),
    }
}

#[test]
fn test_new_openai_api_client_missing_key() {
    let mut settings = create_test_settings("http://localhost:1234/v1".to_string());
    settings.openai_api_key = Some("  ".to_string());
    assert!(matches!(
        OpenAIApiClient::new(&settings),
        Err(OpenAIClientError::MissingApiKey)
    ));
}

#[test]
fn test_completions_url_keeps_base_path() {
    let settings = create_test_settings(
        "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
    );
    let client = OpenAIApiClient::new(&settings).unwrap();
    assert_eq!(
        client.completions_url().as_str(),
        "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
    );
}

#[test]
fn test_image_request_serializes_content_parts() {
    let value = serde_json::to_value(image_request()).unwrap();
    assert_eq!(value["messages"][0]["content"][0]["type"], "text");
    assert_eq!(value["messages"][0]["content"][1]["type"], "image_url");
    assert_eq!(
        value["messages"][0]["content"][1]["image_url"]["url"],
        "data:image/png;base64,AAAA"
    );
}

#[tokio::test]
async fn test_send_chat_completion_success() {
    let mut server = mockito::Server::new_async().await;
    let settings = create_test_settings(server.url());
    let client = OpenAIApiClient::new(&settings).unwrap();

    let mock = server
        .mock(
            "POST",
            Matcher::Exact(format!("/{}", OPENAI_CHAT_COMPLETIONS_PATH)),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_response("No suspicious content found.").to_string())
        .match_header("Authorization", "Bearer test_api_key")
        .match_body(Matcher::PartialJson(json!({"model": "qwen-vl-plus"})))
        .create_async()
        .await;

    let response = client.send_chat_completion(&image_request()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(
        response.first_text().as_deref(),
        Some("No suspicious content found.")
    );
}

#[tokio::test]
async fn test_send_chat_completion_with_path_no_trailing_slash() {
    let mut server = mockito::Server::new_async().await;
    let settings = create_test_settings(format!("{}/v1", server.url()));
    let client = OpenAIApiClient::new(&settings).unwrap();

    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_response("ok").to_string())
        .create_async()
        .await;

    let result = client.send_chat_completion(&image_request()).await;

    mock.assert_async().await;
    assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result.err());
}

#[tokio::test]
async fn test_send_chat_completion_api_error() {
    let mut server = mockito::Server::new_async().await;
    let settings = create_test_settings(server.url());
    let client = OpenAIApiClient::new(&settings).unwrap();

    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_body(r#"{"error": {"message": "Invalid API key"}}"#)
        .create_async()
        .await;

    let result = client.send_chat_completion(&image_request()).await;

    mock.assert_async().await;
    match result {
        Err(OpenAIClientError::Api { status, body }) => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(body.contains("Invalid API key"));
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_chat_completion_malformed_body() {
    let mut server = mockito::Server::new_async().await;
    let settings = create_test_settings(server.url());
    let client = OpenAIApiClient::new(&settings).unwrap();

    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{not json")
        .create_async()
        .await;

    let result = client.send_chat_completion(&image_request()).await;

    mock.assert_async().await;
    assert!(matches!(result, Err(OpenAIClientError::Deserialization(_))));
}
