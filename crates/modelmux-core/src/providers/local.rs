//! Local model server adapter (Ollama-compatible API)

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    Embedding, EmbeddingInput, EmbeddingOptions, ImageOptions, ProviderAdapter, TextGeneration,
    TextOptions, check_status, estimate_tokens, http_client,
};
use crate::error::{Error, Result};
use crate::routing::Provider;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

pub(crate) fn generate_request(prompt: &str, options: &TextOptions) -> Value {
    let mut model_options = json!({});
    if let Some(max) = options.max_length {
        model_options["num_predict"] = json!(max);
    }
    if let Some(temperature) = options.temperature {
        model_options["temperature"] = json!(temperature);
    }
    if let Some(top_p) = options.top_p {
        model_options["top_p"] = json!(top_p);
    }
    json!({
        "model": options.model,
        "prompt": prompt,
        "stream": false,
        "options": model_options,
    })
}

pub(crate) fn parse_generate(body: &str) -> Result<TextGeneration> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("local generate: {}", e)))?;
    let token_count_estimate = response
        .eval_count
        .unwrap_or_else(|| estimate_tokens(&response.response));
    Ok(TextGeneration {
        text: response.response,
        token_count_estimate,
    })
}

/// Client for a local Ollama-compatible server
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    http_client: HttpClient,
    base_url: String,
}

impl LocalAdapter {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http_client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<String> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(Error::NetworkError)?;
        let response = check_status(response).await?;
        response.text().await.map_err(Error::NetworkError)
    }
}

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    fn provider(&self) -> Provider {
        Provider::Local
    }

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> Result<TextGeneration> {
        debug!(model = %options.model, "Sending local generate request");
        let body = self.post("api/generate", &generate_request(prompt, options)).await?;
        parse_generate(&body)
    }

    async fn generate_embedding(
        &self,
        input: &EmbeddingInput,
        options: &EmbeddingOptions,
    ) -> Result<Embedding> {
        debug!(model = %options.model, "Sending local embeddings request");
        let request = json!({ "model": options.model, "prompt": input.as_text()? });
        let body = self.post("api/embeddings", &request).await?;
        let response: EmbeddingsResponse = serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(format!("local embeddings: {}", e)))?;
        if response.embedding.is_empty() {
            return Err(Error::InvalidResponse("local embeddings: empty vector".to_string()));
        }
        Ok(Embedding::new(response.embedding).normalized_if(options.normalize))
    }

    async fn analyze_image(&self, image: &[u8], options: &ImageOptions) -> Result<Value> {
        debug!(model = %options.model, bytes = image.len(), "Sending local vision request");
        let prompt = options
            .task
            .as_deref()
            .unwrap_or("Describe this image in detail.");
        let mut request = generate_request(prompt, &TextOptions::new(options.model.clone()));
        request["images"] = json!([BASE64.encode(image)]);
        let generation = parse_generate(&self.post("api/generate", &request).await?)?;
        Ok(json!({
            "task": options.task.as_deref().unwrap_or("describe"),
            "description": generation.text,
        }))
    }
}
