//! # invoq-core
//!
//! Core types, traits, and abstractions for the invoq invoice pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other invoq crates depend on: the job model and its state machine
//! vocabulary, the structured invoice record, the error taxonomy, and the
//! collaborator traits (durable store, document fetcher, OCR, AI structuring).

pub mod defaults;
pub mod error;
pub mod invoice;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use invoice::{DocumentFormat, ImageKind, LineItem, StructuredInvoiceRecord};
pub use models::*;
pub use traits::*;
pub use uuid_utils::{extract_timestamp, new_v7};
