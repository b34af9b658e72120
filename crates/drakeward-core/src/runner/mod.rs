//! Direct-call LLM runner for single-turn agents (Dragon, Wyrm, Wyvern).
//!
//! Unlike [`crate::harness::Harness`], which drives a coding-agent
//! subprocess against a workspace, a [`Provider`] sends one request and
//! reads back one response from an LLM vendor API. No workspace, no
//! subprocess, no event stream -- just `{text in, text or JSON out}`.

pub mod anthropic;
pub mod registry;

use anyhow::Result;
use async_trait::async_trait;

/// One turn of a direct-call conversation.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// The system prompt (role, instructions, schema if any).
    pub system: String,
    /// The user-turn content.
    pub user: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

/// The result of one provider turn.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Raw text content of the reply.
    pub text: String,
    /// Tokens consumed, when reported by the vendor.
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Adapter interface for a direct-call LLM vendor.
///
/// Implementors wrap a specific vendor API (e.g. the Anthropic Messages
/// API) and translate it into one [`ProviderRequest`] -> [`ProviderResponse`]
/// call. Object-safe so it can be stored as `Box<dyn Provider>` in a
/// [`registry::ProviderRegistry`], mirroring [`crate::harness::Harness`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable name for this provider (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Send one request and await the response.
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse>;
}

// Compile-time assertion: Provider must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};
