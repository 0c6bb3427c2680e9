use crate::config::OpenAISettings;
use crate::models::{OpenAIChatRequest, OpenAIChatResponse};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;

pub const OPENAI_CHAT_COMPLETIONS_PATH: &str = "chat/completions";

#[derive(Error, Debug)]
pub enum OpenAIClientError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {body}")]
    Api { status: StatusCode, body: String },
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Failed to deserialize response: {0}")]
    Deserialization(reqwest::Error),
    #[error("Missing API key")]
    MissingApiKey,
}

#[derive(Debug)]
pub struct OpenAIApiClient {
    client: Client,
    completions_url: Url,
    api_key: String,
}

impl OpenAIApiClient {
    pub fn new(settings: &OpenAISettings) -> Result<Self, OpenAIClientError> {
        let api_key = settings
            .openai_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(OpenAIClientError::MissingApiKey)?;

        // Url::join drops the last segment unless the base ends with '/'
        let mut base = settings.openai_custom_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let completions_url = Url::parse(&base)?.join(OPENAI_CHAT_COMPLETIONS_PATH)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.openai_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            completions_url,
            api_key,
        })
    }

    pub fn completions_url(&self) -> &Url {
        &self.completions_url
    }

    #[instrument(skip(self, request_payload), fields(model = %request_payload.model))]
    pub async fn send_chat_completion(
        &self,
        request_payload: &OpenAIChatRequest,
    ) -> Result<OpenAIChatResponse, OpenAIClientError> {
        debug!(
            "Sending chat completion request to: {}",
            self.completions_url
        );

        let response = self
            .client
            .post(self.completions_url.clone())
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(header::CONTENT_TYPE, "application/json")
            .json(request_payload)
            .send()
            .await
            .map_err(OpenAIClientError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
            error!("Chat completion API error: {} - {}", status, body);
            return Err(OpenAIClientError::Api { status, body });
        }

        let parsed_response = response
            .json::<OpenAIChatResponse>()
            .await
            .map_err(OpenAIClientError::Deserialization)?;

        Ok(parsed_response)
    }
}
