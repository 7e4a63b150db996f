//! OpenAI adapter
//!
//! Chat completions for text, the embeddings endpoint, and vision through
//! chat completions with an inline `data:` URI.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    Embedding, EmbeddingInput, EmbeddingOptions, ImageOptions, ProviderAdapter, TextGeneration,
    TextOptions, check_status, estimate_tokens, http_client, image_data_uri,
};
use crate::error::{Error, Result};
use crate::routing::Provider;

const DEFAULT_IMAGE_PROMPT: &str = "Describe this image in detail.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

fn chat_body(model: &str, content: Value, options: Option<&TextOptions>) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [{ "role": "user", "content": content }],
    });
    if let Some(options) = options {
        if let Some(max) = options.max_length {
            body["max_tokens"] = json!(max);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
    }
    body
}

pub(crate) fn text_request(prompt: &str, options: &TextOptions) -> Value {
    chat_body(&options.model, json!(prompt), Some(options))
}

pub(crate) fn vision_request(image: &[u8], options: &ImageOptions) -> Value {
    let instruction = options.task.as_deref().unwrap_or(DEFAULT_IMAGE_PROMPT);
    let content = json!([
        { "type": "text", "text": instruction },
        { "type": "image_url", "image_url": { "url": image_data_uri(image) } },
    ]);
    chat_body(&options.model, content, None)
}

pub(crate) fn parse_chat(body: &str) -> Result<TextGeneration> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("openai chat: {}", e)))?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| Error::InvalidResponse("openai chat: no choices".to_string()))?;
    let token_count_estimate = response
        .usage
        .map(|u| u.completion_tokens)
        .unwrap_or_else(|| estimate_tokens(&text));
    Ok(TextGeneration {
        text,
        token_count_estimate,
    })
}

pub(crate) fn parse_embedding(body: &str) -> Result<Vec<f32>> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("openai embeddings: {}", e)))?;
    response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| Error::InvalidResponse("openai embeddings: empty data".to_string()))
}

/// Client for the OpenAI API
#[derive(Clone)]
pub struct OpenAiAdapter {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>, base_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http_client: http_client(timeout_secs)?,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<String> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(Error::NetworkError)?;
        let response = check_status(response).await?;
        response.text().await.map_err(Error::NetworkError)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> Result<TextGeneration> {
        debug!(model = %options.model, "Sending chat completion request");
        let body = self.post("chat/completions", &text_request(prompt, options)).await?;
        parse_chat(&body)
    }

    async fn generate_embedding(
        &self,
        input: &EmbeddingInput,
        options: &EmbeddingOptions,
    ) -> Result<Embedding> {
        debug!(model = %options.model, "Sending embedding request");
        let request = json!({ "model": options.model, "input": input.as_text()? });
        let body = self.post("embeddings", &request).await?;
        Ok(Embedding::new(parse_embedding(&body)?).normalized_if(options.normalize))
    }

    async fn analyze_image(&self, image: &[u8], options: &ImageOptions) -> Result<Value> {
        debug!(model = %options.model, bytes = image.len(), "Sending vision request");
        let body = self.post("chat/completions", &vision_request(image, options)).await?;
        let generation = parse_chat(&body)?;
        Ok(json!({
            "task": options.task.as_deref().unwrap_or("describe"),
            "description": generation.text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_request_shape() {
        let options = TextOptions {
            model: "gpt-4".to_string(),
            max_length: Some(256),
            temperature: Some(0.5),
            top_p: None,
        };
        let body = text_request("Say hi", &options);
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["messages"][0]["content"], "Say hi");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.5);
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn test_vision_request_uses_data_uri() {
        let body = vision_request(&[0x89, b'P', b'N', b'G'], &ImageOptions::new("gpt-4-vision-preview"));
        let url = body["messages"][0]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(body["messages"][0]["content"][0]["text"], DEFAULT_IMAGE_PROMPT);
    }

    #[test]
    fn test_parse_chat() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        }"#;
        let generation = parse_chat(body).unwrap();
        assert_eq!(generation.text, "Hello!");
        assert_eq!(generation.token_count_estimate, 2);

        let without_usage = r#"{"choices": [{"message": {"content": "12345678"}}]}"#;
        assert_eq!(parse_chat(without_usage).unwrap().token_count_estimate, 2);

        assert!(parse_chat(r#"{"choices": []}"#).is_err());
    }

    #[test]
    fn test_parse_embedding() {
        let body = r#"{"object": "list", "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}]}"#;
        assert_eq!(parse_embedding(body).unwrap(), vec![0.1, 0.2, 0.3]);
        assert!(parse_embedding(r#"{"data": []}"#).is_err());
    }
}
