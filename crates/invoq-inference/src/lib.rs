//! # invoq-inference
//!
//! Generative-AI backends for invoice structuring.
//!
//! This crate provides:
//! - Gemini implementation (feature `gemini`, default)
//! - OpenAI-compatible implementation (feature `openai`, default)
//! - Provider error classification
//! - Deterministic mock backend (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use invoq_inference::{GeminiBackend, GeminiConfig, StructuringBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = GeminiBackend::new(GeminiConfig::new("api-key")).unwrap();
//!     let raw = backend
//!         .generate_structured("Invoice #1001 Total: $250.00", "Return JSON.")
//!         .await
//!         .unwrap();
//!     println!("{raw}");
//! }
//! ```

pub mod error;

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use invoq_core::*;

pub use error::{to_invoq_error, ProviderErrorCode};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiBackend, GeminiConfig};

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};
