//! Common error handling utilities for the ReliefWatch engine
//!
//! Every crate in the workspace keeps its own `thiserror` enum. This crate gives
//! those enums a shared vocabulary so that logs, the operations CLI and any UI
//! layer can reason about failures without matching on crate-specific variants.
//!
//! # Key Features
//!
//! - **Error Categories**: coarse buckets (validation, storage, crypto, sync, ...)
//! - **Error Codes**: stable string codes, safe to surface to operators
//! - **Context Preservation**: entity/queue/update identifiers without payload data
//! - **Reporting**: one place that turns a categorized error into a `tracing` event
//!
//! # Example
//!
//! ```rust
//! use error_common::{codes, Categorized, ErrorCategory, ErrorContext};
//!
//! #[derive(Debug)]
//! struct QueueFull;
//!
//! impl std::fmt::Display for QueueFull {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("queue full")
//!     }
//! }
//!
//! impl Categorized for QueueFull {
//!     fn category(&self) -> ErrorCategory {
//!         ErrorCategory::Storage
//!     }
//!     fn code(&self) -> &'static str {
//!         codes::storage::QUOTA_EXCEEDED
//!     }
//! }
//!
//! let ctx = ErrorContext::new().with_entity("ENTITY", "e1");
//! error_common::report(&QueueFull, &ctx);
//! ```

pub mod codes;
pub mod context;
pub mod reporting;
pub mod types;

pub use context::*;
pub use reporting::*;
pub use types::*;
