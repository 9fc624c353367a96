//! Token usage and cost reporting.
//!
//! Providers report cache activity under different metadata keys. Each
//! provider gets a [`UsageNormalizer`] that folds its metadata into one
//! [`UsageReport`] shape.

use desk_core::config::ModelPricing;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw token counters of one model step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    /// `provider/model`
    pub model: String,
    pub sent_tokens: u64,
    pub received_tokens: u64,
    pub cache_write_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub message_cost: f64,
    pub agent_total_cost: f64,
}

/// Cache counters pulled out of provider metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheTokens {
    pub write: Option<u64>,
    pub read: Option<u64>,
}

pub trait UsageNormalizer: Send + Sync {
    fn cache_tokens(&self, metadata: &Value) -> CacheTokens;

    /// Whether cache reads are already counted in the prompt tokens.
    fn reads_included_in_prompt(&self) -> bool {
        true
    }

    /// Cost reported by the provider itself, if any.
    fn reported_cost(&self, _metadata: &Value) -> Option<f64> {
        None
    }

    fn cache_read_fallback(&self, pricing: &ModelPricing) -> f64 {
        pricing.cache_read_input_token_cost.unwrap_or(0.0)
    }

    fn cost(&self, usage: TokenUsage, metadata: &Value, pricing: Option<&ModelPricing>) -> f64 {
        if let Some(cost) = self.reported_cost(metadata) {
            return cost;
        }
        let Some(pricing) = pricing else {
            return 0.0;
        };
        let cache = self.cache_tokens(metadata);
        let read = cache.read.unwrap_or(0);
        let write = cache.write.unwrap_or(0);

        let billable_input = if self.reads_included_in_prompt() {
            usage.prompt_tokens.saturating_sub(read)
        } else {
            usage.prompt_tokens
        };
        let input_cost = billable_input as f64 * pricing.input_cost_per_token;
        let output_cost = usage.completion_tokens as f64 * pricing.output_cost_per_token;
        let write_cost = write as f64
            * pricing
                .cache_write_input_token_cost
                .unwrap_or(pricing.input_cost_per_token);
        let read_cost = read as f64 * self.cache_read_fallback(pricing);

        input_cost + output_cost + write_cost + read_cost
    }
}

pub struct AnthropicUsage;
pub struct OpenAiUsage;
pub struct GeminiUsage;
pub struct OpenRouterUsage;
pub struct RequestyUsage;
pub struct PlainUsage;

fn u64_at(metadata: &Value, pointer: &str) -> Option<u64> {
    metadata.pointer(pointer).and_then(Value::as_u64)
}

impl UsageNormalizer for AnthropicUsage {
    fn cache_tokens(&self, metadata: &Value) -> CacheTokens {
        CacheTokens {
            write: u64_at(metadata, "/anthropic/cacheCreationInputTokens"),
            read: u64_at(metadata, "/anthropic/cacheReadInputTokens"),
        }
    }

    fn reads_included_in_prompt(&self) -> bool {
        false
    }
}

impl UsageNormalizer for OpenAiUsage {
    fn cache_tokens(&self, metadata: &Value) -> CacheTokens {
        CacheTokens {
            write: None,
            read: u64_at(metadata, "/openai/cachedPromptTokens"),
        }
    }

    fn cache_read_fallback(&self, pricing: &ModelPricing) -> f64 {
        pricing
            .cache_read_input_token_cost
            .unwrap_or(pricing.input_cost_per_token)
    }
}

impl UsageNormalizer for GeminiUsage {
    fn cache_tokens(&self, metadata: &Value) -> CacheTokens {
        CacheTokens {
            write: None,
            read: u64_at(metadata, "/google/cachedContentTokenCount"),
        }
    }

    fn cache_read_fallback(&self, pricing: &ModelPricing) -> f64 {
        pricing
            .cache_read_input_token_cost
            .unwrap_or(pricing.input_cost_per_token * 0.25)
    }
}

impl UsageNormalizer for OpenRouterUsage {
    fn cache_tokens(&self, metadata: &Value) -> CacheTokens {
        CacheTokens {
            write: None,
            read: u64_at(metadata, "/openrouter/usage/promptTokensDetails/cachedTokens"),
        }
    }

    fn reported_cost(&self, metadata: &Value) -> Option<f64> {
        Some(
            metadata
                .pointer("/openrouter/usage/cost")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        )
    }
}

impl UsageNormalizer for RequestyUsage {
    fn cache_tokens(&self, metadata: &Value) -> CacheTokens {
        CacheTokens {
            write: u64_at(metadata, "/requesty/usage/cachingTokens"),
            read: u64_at(metadata, "/requesty/usage/cachedTokens"),
        }
    }
}

impl UsageNormalizer for PlainUsage {
    fn cache_tokens(&self, _metadata: &Value) -> CacheTokens {
        CacheTokens::default()
    }
}

pub fn normalizer_for(provider: &str) -> &'static dyn UsageNormalizer {
    match provider {
        "anthropic" => &AnthropicUsage,
        "openai" => &OpenAiUsage,
        "gemini" | "vertex-ai" => &GeminiUsage,
        "openrouter" => &OpenRouterUsage,
        "requesty" => &RequestyUsage,
        _ => &PlainUsage,
    }
}

/// Build the report for one step and the run's running total.
pub fn usage_report(
    provider: &str,
    model: &str,
    usage: TokenUsage,
    metadata: &Value,
    pricing: Option<&ModelPricing>,
    total_before: f64,
) -> UsageReport {
    let normalizer = normalizer_for(provider);
    let message_cost = normalizer.cost(usage, metadata, pricing);
    let cache = normalizer.cache_tokens(metadata);

    let sent_tokens = if normalizer.reads_included_in_prompt() {
        usage.prompt_tokens.saturating_sub(cache.read.unwrap_or(0))
    } else {
        usage.prompt_tokens
    };

    UsageReport {
        model: format!("{provider}/{model}"),
        sent_tokens,
        received_tokens: usage.completion_tokens,
        cache_write_tokens: cache.write,
        cache_read_tokens: cache.read,
        message_cost,
        agent_total_cost: total_before + message_cost,
    }
}
