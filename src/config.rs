//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then a TOML file, then `MULTICHAT_*`
//! environment variables. CLI flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ChatError;
use crate::message::CompareModels;

/// File picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "multichat.toml";

pub const ENV_BACKEND_URL: &str = "MULTICHAT_BACKEND_URL";
pub const ENV_PROXY_URL: &str = "MULTICHAT_PROXY_URL";
pub const ENV_RAG_API_URL: &str = "MULTICHAT_RAG_API_URL";
pub const ENV_PROXY_PORT: &str = "MULTICHAT_PROXY_PORT";

/// Order in which comparison completions are applied to their slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DrainOrder {
    /// Each slot updates as soon as its own request settles.
    #[default]
    Completion,
    /// Completions are applied in launch order; a slow `model1` holds back the others.
    Launch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin of the model backend (comparison and quality endpoints, proxy target).
    pub backend_url: String,
    /// Origin of the proxy the Q&A tab talks to.
    pub proxy_url: String,
    /// Base URL for retrieval calls (`/chat/embed`, `/chat/rag` are appended).
    pub rag_api_url: String,
    pub proxy_bind: String,
    pub proxy_port: u16,
    /// Per-request timeout; 0 disables it.
    pub request_timeout_secs: u64,
    pub compare_drain: DrainOrder,
    pub default_model: String,
    pub default_openai_model: String,
    pub compare_defaults: CompareModels,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend_url: "http://127.0.0.1:8002".to_string(),
            proxy_url: "http://127.0.0.1:3000".to_string(),
            rag_api_url: "http://127.0.0.1:8002/api".to_string(),
            proxy_bind: "127.0.0.1".to_string(),
            proxy_port: 3000,
            request_timeout_secs: 0,
            compare_drain: DrainOrder::Completion,
            default_model: "gpt-oss:20b".to_string(),
            default_openai_model: "gpt-3.5-turbo".to_string(),
            compare_defaults: CompareModels::default(),
        }
    }
}

impl Config {
    /// Load from `path` if given, else from `multichat.toml` when present, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ChatError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(&fallback)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ChatError> {
        let text = std::fs::read_to_string(path).map_err(|e| ChatError::Config {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            ChatError::Config { detail, .. } => ChatError::Config {
                path: path.display().to_string(),
                detail,
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, ChatError> {
        toml::from_str(text).map_err(|e| ChatError::Config {
            path: "<inline>".to_string(),
            detail: e.to_string(),
        })
    }

    /// Apply `MULTICHAT_*` overrides read through `lookup`. Unparseable ports are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_BACKEND_URL) {
            self.backend_url = v;
        }
        if let Some(v) = non_empty(ENV_PROXY_URL) {
            self.proxy_url = v;
        }
        if let Some(v) = non_empty(ENV_RAG_API_URL) {
            self.rag_api_url = v;
        }
        if let Some(port) = non_empty(ENV_PROXY_PORT).and_then(|v| v.trim().parse().ok()) {
            self.proxy_port = port;
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Default model for the given provider switch.
    pub fn model_for(&self, use_openai: bool) -> &str {
        if use_openai {
            &self.default_openai_model
        } else {
            &self.default_model
        }
    }
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
