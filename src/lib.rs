//! Comment categorization and idea-clustering engine.
//!
//! `algo` holds the pure data model and statistics, `model` the rate-limited
//! text-generation gateway, `pipeline` the model-driven stages, and `ops` the
//! JSON-in/JSON-out wrappers every interface calls.

pub mod algo;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod ops;
pub mod pipeline;
