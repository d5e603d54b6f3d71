//! # SnapVal Common Library
//!
//! Shared code for the SnapVal services including:
//! - Event types (AnalysisEvent enum) and the broadcast EventBus
//! - Configuration file resolution
//! - Common error types

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
