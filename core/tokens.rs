//! Local token estimation.
//!
//! The provider's tokenizer is not public, so counts come from `cl100k_base`
//! scaled by a correction factor. The raw BPE count runs low against the
//! target model on source code; with the default factor of 1.2 the estimate
//! lands above the provider's count for typical repository text, and the
//! error bound is the configured factor's distance from the true ratio.
//! Use [`crate::api::AnthropicClient::count_tokens`] when an exact figure
//! matters.

use crate::error::{AppError, Result};
use tiktoken_rs::{CoreBPE, cl100k_base};

pub const DEFAULT_CORRECTION: f64 = 1.2;
pub const MIN_CORRECTION: f64 = 1.0;
pub const MAX_CORRECTION: f64 = 2.0;

pub struct TokenEstimator {
    bpe: CoreBPE,
    correction: f64,
}

impl TokenEstimator {
    pub fn new(correction: f64) -> Result<Self> {
        if !(MIN_CORRECTION..=MAX_CORRECTION).contains(&correction) {
            return Err(AppError::InvalidArgument(format!(
                "Token correction factor {} outside {}..={}",
                correction, MIN_CORRECTION, MAX_CORRECTION
            )));
        }
        let bpe = cl100k_base().map_err(|e| AppError::TikToken(e.to_string()))?;
        Ok(Self { bpe, correction })
    }

    pub fn raw_count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Upper-biased token estimate: raw BPE count times the correction, rounded up.
    pub fn estimate(&self, text: &str) -> usize {
        (self.raw_count(text) as f64 * self.correction).ceil() as usize
    }

    pub fn correction(&self) -> f64 {
        self.correction
    }
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("correction", &self.correction)
            .finish_non_exhaustive()
    }
}
