//! Modelmux Core Library
//!
//! This crate provides the core functionality for Modelmux, including:
//! - Model registry with weighted multi-objective scoring
//! - Explore/exploit rotation between standard and evaluation mode
//! - Model router with concurrent evaluation fan-out
//! - Provider adapters (OpenAI, Anthropic, Hugging Face, local Ollama)
//! - Storage (SQLite metrics store with migrations)
//! - Configuration management

pub mod config;
pub mod error;
pub mod providers;
pub mod routing;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::providers::{ProviderAdapter, ProviderSet, TaskOutput, TaskPayload};
    pub use crate::routing::{
        MetricsStore, ModelIdentifier, ModelRegistry, ModelRouter, Provider, RouteOptions,
        SelectionOptions, SqliteMetricsStore, TaskType,
    };
    pub use crate::storage::Database;
}
