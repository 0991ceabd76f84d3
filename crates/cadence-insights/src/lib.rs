//! AI insight generation.
//!
//! The worker gathers metric context, consults an LLM provider behind a
//! retry + circuit-breaker policy, and persists structured suggestions.
//! Provider failures never fail the surrounding job; they degrade to a
//! fallback insight.

pub mod breaker;
pub mod prompts;
pub mod provider;
pub mod worker;

pub use breaker::{Breaker, BreakerConfig};
pub use provider::{
    build_provider, fallback_insight, AiProvider, GeminiProvider, InsightMetrics, InsightPayload,
    KimiProvider,
};
pub use worker::refresh_insights;
