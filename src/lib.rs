//! Textgate - Multi-tenant text normalization gateway
//!
//! Detects the language of free-text business records and translates them into
//! a tenant's target language through interchangeable providers, guarded by
//! per-provider circuit breakers, a two-tier cache and per-tenant rate limits.
//! `orchestrator::Orchestrator` is the entry point for calling code.

pub mod breaker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod glossary;
pub mod input;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod rate_limit;
pub mod translate;
pub mod usage;

pub use error::{GatewayError, Result};
pub use orchestrator::Orchestrator;
