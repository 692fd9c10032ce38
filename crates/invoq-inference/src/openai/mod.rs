//! OpenAI-compatible structuring backend.
//!
//! Works with any endpoint that implements `/chat/completions`: OpenAI,
//! Azure OpenAI, Ollama in compatibility mode, vLLM, LM Studio.
//!
//! # Example
//!
//! ```rust,no_run
//! use invoq_inference::openai::{OpenAIBackend, OpenAIConfig};
//!
//! let config = OpenAIConfig {
//!     base_url: "http://localhost:11434/v1".to_string(),
//!     api_key: None,
//!     model: "llama3.1".to_string(),
//!     timeout_seconds: 120,
//! };
//! let backend = OpenAIBackend::new(config).unwrap();
//! ```

mod backend;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig, DEFAULT_MODEL, DEFAULT_OPENAI_URL};
pub use types::*;
