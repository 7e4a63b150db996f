//! Anthropic adapter (messages API)
//!
//! Anthropic has no embeddings endpoint; embedding payloads fail with
//! [`Error::UnsupportedOperation`] through the trait default.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    ImageOptions, ProviderAdapter, TextGeneration, TextOptions, check_status, estimate_tokens,
    http_client, image_media_type,
};
use crate::error::{Error, Result};
use crate::routing::Provider;

const API_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory for the messages API
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    output_tokens: u64,
}

pub(crate) fn text_request(prompt: &str, options: &TextOptions) -> Value {
    let mut body = json!({
        "model": options.model,
        "max_tokens": options.max_length.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": [{ "role": "user", "content": prompt }],
    });
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = options.top_p {
        body["top_p"] = json!(top_p);
    }
    body
}

pub(crate) fn vision_request(image: &[u8], options: &ImageOptions) -> Value {
    let instruction = options
        .task
        .as_deref()
        .unwrap_or("Describe this image in detail.");
    json!({
        "model": options.model,
        "max_tokens": DEFAULT_MAX_TOKENS,
        "messages": [{
            "role": "user",
            "content": [
                {
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image_media_type(image),
                        "data": BASE64.encode(image),
                    },
                },
                { "type": "text", "text": instruction },
            ],
        }],
    })
}

pub(crate) fn parse_messages(body: &str) -> Result<TextGeneration> {
    let response: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("anthropic messages: {}", e)))?;

    let text: String = response
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();
    if text.is_empty() {
        return Err(Error::InvalidResponse(
            "anthropic messages: no text content".to_string(),
        ));
    }

    let token_count_estimate = response
        .usage
        .map(|u| u.output_tokens)
        .unwrap_or_else(|| estimate_tokens(&text));
    Ok(TextGeneration {
        text,
        token_count_estimate,
    })
}

/// Client for the Anthropic API
#[derive(Clone)]
pub struct AnthropicAdapter {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, base_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http_client: http_client(timeout_secs)?,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn messages(&self, body: &Value) -> Result<TextGeneration> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(Error::NetworkError)?;
        let response = check_status(response).await?;
        let text = response.text().await.map_err(Error::NetworkError)?;
        parse_messages(&text)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> Result<TextGeneration> {
        debug!(model = %options.model, "Sending messages request");
        self.messages(&text_request(prompt, options)).await
    }

    async fn analyze_image(&self, image: &[u8], options: &ImageOptions) -> Result<Value> {
        debug!(model = %options.model, bytes = image.len(), "Sending vision request");
        let generation = self.messages(&vision_request(image, options)).await?;
        Ok(json!({
            "task": options.task.as_deref().unwrap_or("describe"),
            "description": generation.text,
        }))
    }
}
