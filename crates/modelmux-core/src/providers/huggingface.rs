//! Hugging Face Inference API adapter
//!
//! Every model is served at `{base}/models/{model}`; the request and
//! response shape depends on the pipeline (text generation, feature
//! extraction, image classification).

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    Embedding, EmbeddingInput, EmbeddingOptions, ImageOptions, ProviderAdapter, TextGeneration,
    TextOptions, check_status, estimate_tokens, http_client, image_media_type,
};
use crate::error::{Error, Result};
use crate::routing::Provider;

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

pub(crate) fn text_request(prompt: &str, options: &TextOptions) -> Value {
    let mut parameters = json!({ "return_full_text": false });
    if let Some(max) = options.max_length {
        parameters["max_new_tokens"] = json!(max);
    }
    if let Some(temperature) = options.temperature {
        parameters["temperature"] = json!(temperature);
    }
    if let Some(top_p) = options.top_p {
        parameters["top_p"] = json!(top_p);
    }
    json!({
        "inputs": prompt,
        "parameters": parameters,
        "options": { "wait_for_model": true },
    })
}

pub(crate) fn parse_generation(body: &str) -> Result<TextGeneration> {
    let outputs: Vec<GeneratedText> = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("huggingface generation: {}", e)))?;
    let text = outputs
        .into_iter()
        .next()
        .map(|o| o.generated_text)
        .ok_or_else(|| Error::InvalidResponse("huggingface generation: empty output".to_string()))?;
    let token_count_estimate = estimate_tokens(&text);
    Ok(TextGeneration {
        text,
        token_count_estimate,
    })
}

fn as_vector(value: &Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Parse feature-extraction output
///
/// Sentence-transformer models return one vector; plain encoders return one
/// vector per token (possibly wrapped in a batch), which is mean-pooled.
pub(crate) fn parse_features(body: &str) -> Result<Vec<f32>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("huggingface features: {}", e)))?;

    if let Some(vector) = as_vector(&value) {
        if vector.is_empty() {
            return Err(Error::InvalidResponse(
                "huggingface features: empty vector".to_string(),
            ));
        }
        return Ok(vector);
    }

    let mut rows = value
        .as_array()
        .ok_or_else(|| Error::InvalidResponse("huggingface features: not an array".to_string()))?
        .clone();
    // Unwrap a single-item batch
    if rows.len() == 1 && rows[0].as_array().is_some_and(|inner| inner.iter().all(Value::is_array)) {
        rows = rows[0].as_array().cloned().unwrap_or_default();
    }

    let vectors: Vec<Vec<f32>> = rows
        .iter()
        .map(as_vector)
        .collect::<Option<_>>()
        .ok_or_else(|| Error::InvalidResponse("huggingface features: unexpected shape".to_string()))?;

    let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
    if dimensions == 0 || vectors.iter().any(|v| v.len() != dimensions) {
        return Err(Error::InvalidResponse(
            "huggingface features: ragged or empty vectors".to_string(),
        ));
    }

    let mut pooled = vec![0.0f32; dimensions];
    for vector in &vectors {
        for (acc, v) in pooled.iter_mut().zip(vector) {
            *acc += v;
        }
    }
    let count = vectors.len() as f32;
    pooled.iter_mut().for_each(|v| *v /= count);
    Ok(pooled)
}

/// Client for the Hugging Face Inference API
#[derive(Clone)]
pub struct HuggingFaceAdapter {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for HuggingFaceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceAdapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HuggingFaceAdapter {
    pub fn new(api_key: impl Into<String>, base_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http_client: http_client(timeout_secs)?,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/models/{}", self.base_url, model)
    }

    async fn read(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Error::NetworkError)?;
        let response = check_status(response).await?;
        response.text().await.map_err(Error::NetworkError)
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    fn provider(&self) -> Provider {
        Provider::HuggingFace
    }

    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> Result<TextGeneration> {
        debug!(model = %options.model, "Sending text-generation request");
        let request = self
            .http_client
            .post(self.model_url(&options.model))
            .json(&text_request(prompt, options));
        parse_generation(&self.read(request).await?)
    }

    async fn generate_embedding(
        &self,
        input: &EmbeddingInput,
        options: &EmbeddingOptions,
    ) -> Result<Embedding> {
        debug!(model = %options.model, "Sending feature-extraction request");
        let request = self.http_client.post(self.model_url(&options.model)).json(&json!({
            "inputs": input.as_text()?,
            "options": { "wait_for_model": true },
        }));
        let values = parse_features(&self.read(request).await?)?;
        Ok(Embedding::new(values).normalized_if(options.normalize))
    }

    async fn analyze_image(&self, image: &[u8], options: &ImageOptions) -> Result<Value> {
        debug!(model = %options.model, bytes = image.len(), "Sending image-classification request");
        let request = self
            .http_client
            .post(self.model_url(&options.model))
            .header(reqwest::header::CONTENT_TYPE, image_media_type(image))
            .body(image.to_vec());
        let body = self.read(request).await?;
        let labels: Value = serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(format!("huggingface image: {}", e)))?;
        Ok(json!({
            "task": options.task.as_deref().unwrap_or("classify"),
            "labels": labels,
        }))
    }
}
