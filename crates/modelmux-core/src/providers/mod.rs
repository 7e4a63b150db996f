//! Provider adapters
//!
//! A [`ProviderAdapter`] turns a task payload into a call against one AI
//! backend. Adapters are thin: they build a request, send it and parse the
//! response. Selection, timing and metrics live in the router.
//!
//! - `openai`: chat completions, embeddings, vision via data URIs
//! - `anthropic`: messages API, vision (no embeddings)
//! - `huggingface`: hosted Inference API
//! - `local`: Ollama-compatible server

pub mod anthropic;
pub mod huggingface;
pub mod local;
pub mod openai;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{Config, resolved_api_key};
use crate::error::{Error, Result};
use crate::routing::Provider;

pub use anthropic::AnthropicAdapter;
pub use huggingface::HuggingFaceAdapter;
pub use local::LocalAdapter;
pub use openai::OpenAiAdapter;

/// Options for text generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextOptions {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl TextOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Generated text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextGeneration {
    pub text: String,
    /// Completion tokens as reported by the provider, or estimated
    pub token_count_estimate: u64,
}

/// Input to embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingInput {
    Text(String),
    Bytes(Vec<u8>),
}

impl EmbeddingInput {
    /// Text form of the input; bytes must be valid UTF-8
    pub fn as_text(&self) -> Result<Cow<'_, str>> {
        match self {
            Self::Text(text) => Ok(Cow::Borrowed(text)),
            Self::Bytes(bytes) => std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|_| Error::InvalidInput("embedding input is not valid UTF-8".to_string())),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

/// Options for embedding generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOptions {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder_type: Option<String>,
    #[serde(default)]
    pub normalize: bool,
}

impl EmbeddingOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// An embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub dimensions: usize,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        let dimensions = values.len();
        Self { values, dimensions }
    }

    /// Apply L2 normalization when requested
    pub fn normalized_if(mut self, normalize: bool) -> Self {
        if normalize {
            l2_normalize(&mut self.values);
        }
        self
    }
}

/// Scale a vector to unit length; zero vectors are left unchanged
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

/// Options for image analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageOptions {
    pub model: String,
    /// What to do with the image, e.g. `describe` or `classify`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl ImageOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// The input of one routed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Text {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_p: Option<f32>,
    },
    Embedding {
        input: EmbeddingInput,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encoder_type: Option<String>,
        #[serde(default)]
        normalize: bool,
    },
    Image {
        data: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<String>,
    },
}

impl TaskPayload {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self::Text {
            prompt: prompt.into(),
            max_length: None,
            temperature: None,
            top_p: None,
        }
    }

    pub fn embedding(input: impl Into<String>) -> Self {
        Self::Embedding {
            input: EmbeddingInput::Text(input.into()),
            encoder_type: None,
            normalize: false,
        }
    }

    pub fn image(data: Vec<u8>) -> Self {
        Self::Image { data, task: None }
    }

    /// The raw input bytes (prompt, embedding input or image)
    pub fn input_bytes(&self) -> &[u8] {
        match self {
            Self::Text { prompt, .. } => prompt.as_bytes(),
            Self::Embedding { input, .. } => input.as_bytes(),
            Self::Image { data, .. } => data,
        }
    }

    /// Size of the input in bytes
    pub fn context_size(&self) -> u64 {
        self.input_bytes().len() as u64
    }

    /// SHA-256 of the input, hex encoded
    pub fn input_hash(&self) -> String {
        hex::encode(Sha256::digest(self.input_bytes()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Embedding { .. } => "embedding",
            Self::Image { .. } => "image",
        }
    }
}

/// The output of one routed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaskOutput {
    Text(TextGeneration),
    Embedding(Embedding),
    Image(serde_json::Value),
}

/// Rough token estimate: four characters per token, rounded up, at least one
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4).max(1)
}

/// `data:` URI for an image, guessing the media type from magic bytes
pub fn image_data_uri(data: &[u8]) -> String {
    format!("data:{};base64,{}", image_media_type(data), BASE64.encode(data))
}

/// Media type of an image from its magic bytes, defaulting to JPEG
pub fn image_media_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// One AI backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter talks to
    fn provider(&self) -> Provider;

    /// Generate text from a prompt
    async fn generate_text(&self, prompt: &str, options: &TextOptions) -> Result<TextGeneration>;

    /// Embed text or bytes
    async fn generate_embedding(
        &self,
        _input: &EmbeddingInput,
        _options: &EmbeddingOptions,
    ) -> Result<Embedding> {
        Err(Error::UnsupportedOperation {
            provider: self.provider().to_string(),
            operation: "embeddings".to_string(),
        })
    }

    /// Analyze an image
    async fn analyze_image(&self, _image: &[u8], _options: &ImageOptions) -> Result<serde_json::Value> {
        Err(Error::UnsupportedOperation {
            provider: self.provider().to_string(),
            operation: "image analysis".to_string(),
        })
    }

    /// Run a payload against a model
    async fn execute(&self, model: &str, payload: &TaskPayload) -> Result<TaskOutput> {
        match payload {
            TaskPayload::Text {
                prompt,
                max_length,
                temperature,
                top_p,
            } => {
                let options = TextOptions {
                    model: model.to_string(),
                    max_length: *max_length,
                    temperature: *temperature,
                    top_p: *top_p,
                };
                self.generate_text(prompt, &options).await.map(TaskOutput::Text)
            }
            TaskPayload::Embedding {
                input,
                encoder_type,
                normalize,
            } => {
                let options = EmbeddingOptions {
                    model: model.to_string(),
                    encoder_type: encoder_type.clone(),
                    normalize: *normalize,
                };
                self.generate_embedding(input, &options)
                    .await
                    .map(TaskOutput::Embedding)
            }
            TaskPayload::Image { data, task } => {
                let options = ImageOptions {
                    model: model.to_string(),
                    task: task.clone(),
                };
                self.analyze_image(data, &options).await.map(TaskOutput::Image)
            }
        }
    }
}

/// Build the shared HTTP client for an adapter
pub(crate) fn http_client(timeout_secs: u64) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(Error::NetworkError)
}

/// Turn a non-success response into an [`Error::ApiError`]
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::ApiError {
        status: status.as_u16(),
        body,
    })
}

/// Adapters available to the router, keyed by provider
#[derive(Clone, Default)]
pub struct ProviderSet {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("providers", &self.providers())
            .finish()
    }
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter, replacing any existing adapter for its provider
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<&Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider)
    }

    pub fn contains(&self, provider: Provider) -> bool {
        self.adapters.contains_key(&provider)
    }

    /// Registered providers in priority order
    pub fn providers(&self) -> Vec<Provider> {
        Provider::PRIORITY
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Build adapters for every provider whose API key is set
    ///
    /// The local adapter needs no key and is always present.
    pub fn from_env(config: &Config) -> Result<Self> {
        let endpoints = &config.providers;
        let timeout = endpoints.request_timeout_secs;
        let mut set = Self::new();

        if let Some(key) = resolved_api_key(Provider::OpenAi) {
            set.insert(Arc::new(OpenAiAdapter::new(key, &endpoints.openai_base_url, timeout)?));
        }
        if let Some(key) = resolved_api_key(Provider::Anthropic) {
            set.insert(Arc::new(AnthropicAdapter::new(
                key,
                &endpoints.anthropic_base_url,
                timeout,
            )?));
        }
        if let Some(key) = resolved_api_key(Provider::HuggingFace) {
            set.insert(Arc::new(HuggingFaceAdapter::new(
                key,
                &endpoints.huggingface_base_url,
                timeout,
            )?));
        }
        set.insert(Arc::new(LocalAdapter::new(&endpoints.local_base_url, timeout)?));

        debug!(providers = ?set.providers(), "Built provider adapters");
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TextOnly;

    #[async_trait]
    impl ProviderAdapter for TextOnly {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn generate_text(&self, prompt: &str, options: &TextOptions) -> Result<TextGeneration> {
            Ok(TextGeneration {
                text: format!("{}:{}", options.model, prompt),
                token_count_estimate: estimate_tokens(prompt),
            })
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_l2_normalize() {
        let mut values = vec![3.0, 4.0];
        l2_normalize(&mut values);
        assert!((values[0] - 0.6).abs() < 1e-6);
        assert!((values[1] - 0.8).abs() < 1e-6);

        let mut zeros = vec![0.0, 0.0];
        l2_normalize(&mut zeros);
        assert_eq!(zeros, vec![0.0, 0.0]);
    }

    #[test]
    fn test_payload_hash_and_size() {
        let payload = TaskPayload::text("hello");
        assert_eq!(payload.context_size(), 5);
        assert_eq!(
            payload.input_hash(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(TaskPayload::image(vec![1, 2, 3]).context_size(), 3);
    }

    #[test]
    fn test_image_media_type() {
        assert_eq!(image_media_type(&[0x89, b'P', b'N', b'G', 0x0d]), "image/png");
        assert_eq!(image_media_type(b"GIF89a"), "image/gif");
        assert_eq!(image_media_type(&[0xff, 0xd8, 0xff]), "image/jpeg");
        assert!(image_data_uri(b"GIF89a").starts_with("data:image/gif;base64,"));
    }

    #[tokio::test]
    async fn test_execute_dispatch_and_unsupported_defaults() {
        let adapter = TextOnly;

        let output = adapter.execute("claude-3-haiku", &TaskPayload::text("hi")).await.unwrap();
        match output {
            TaskOutput::Text(generation) => assert_eq!(generation.text, "claude-3-haiku:hi"),
            other => panic!("unexpected output: {:?}", other),
        }

        let err = adapter
            .execute("claude-3-haiku", &TaskPayload::embedding("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_provider_set_priority_order() {
        let set = ProviderSet::new().with(Arc::new(TextOnly));
        assert!(set.contains(Provider::Anthropic));
        assert!(!set.contains(Provider::OpenAi));
        assert_eq!(set.providers(), vec![Provider::Anthropic]);
    }

    #[test]
    fn test_embedding_input_text() {
        assert_eq!(EmbeddingInput::Bytes(b"abc".to_vec()).as_text().unwrap(), "abc");
        assert!(EmbeddingInput::Bytes(vec![0xff, 0xfe]).as_text().is_err());
    }
}
