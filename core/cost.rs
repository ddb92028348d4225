use serde::{Deserialize, Serialize};

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Dollar rates per million tokens.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Rates {
    #[serde(default = "default_input_rate")]
    pub input: f64,
    #[serde(default = "default_cache_write_rate")]
    pub cache_write: f64,
    #[serde(default = "default_cache_read_rate")]
    pub cache_read: f64,
    #[serde(default = "default_output_rate")]
    pub output: f64,
}

fn default_input_rate() -> f64 {
    3.0
}
fn default_cache_write_rate() -> f64 {
    3.75
}
fn default_cache_read_rate() -> f64 {
    0.30
}
fn default_output_rate() -> f64 {
    15.0
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            input: default_input_rate(),
            cache_write: default_cache_write_rate(),
            cache_read: default_cache_read_rate(),
            output: default_output_rate(),
        }
    }
}

/// Token counters reported once a remote call finishes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageRecord {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default, rename = "cache_creation_input_tokens")]
    pub cache_write_tokens: u64,
    #[serde(default, rename = "cache_read_input_tokens")]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl UsageRecord {
    /// Folds a later usage report into this one. The provider reports input
    /// counters up front and a cumulative output counter at the end, so
    /// non-zero values from the later report win.
    pub fn merge(&mut self, later: &UsageRecord) {
        if later.input_tokens > 0 {
            self.input_tokens = later.input_tokens;
        }
        if later.cache_write_tokens > 0 {
            self.cache_write_tokens = later.cache_write_tokens;
        }
        if later.cache_read_tokens > 0 {
            self.cache_read_tokens = later.cache_read_tokens;
        }
        if later.output_tokens > 0 {
            self.output_tokens = later.output_tokens;
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Default)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub cache_write_cost: f64,
    pub cache_read_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub total_input_tokens: u64,
}

fn term(tokens: u64, rate: f64) -> f64 {
    tokens as f64 / TOKENS_PER_UNIT * rate
}

pub fn cost(usage: &UsageRecord, rates: &Rates) -> CostBreakdown {
    let input_cost = term(usage.input_tokens, rates.input);
    let cache_write_cost = term(usage.cache_write_tokens, rates.cache_write);
    let cache_read_cost = term(usage.cache_read_tokens, rates.cache_read);
    let output_cost = term(usage.output_tokens, rates.output);
    CostBreakdown {
        input_cost,
        cache_write_cost,
        cache_read_cost,
        output_cost,
        total_cost: input_cost + cache_write_cost + cache_read_cost + output_cost,
        total_input_tokens: usage.input_tokens + usage.cache_write_tokens + usage.cache_read_tokens,
    }
}
