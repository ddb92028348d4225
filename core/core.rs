pub mod api;
pub mod config;
pub mod cost;
pub mod defaults;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod prompt;
pub mod recency;
pub mod request;
pub mod stream;
pub mod tokens;
pub mod tree;

pub use api::AnthropicClient;
pub use config::Config;
pub use cost::{CostBreakdown, Rates, UsageRecord, cost};
pub use defaults::{BuiltinIgnores, get_builtin_ignore_patterns, get_default_system_prompt};
pub use error::{AppError, Result};
pub use loader::{FileRecord, load_files};
pub use matcher::{MATCH_ALL, MatchOptions, match_paths};
pub use prompt::{FileLayout, PromptInputs, PromptPayload, PromptSegment, assemble};
pub use recency::{RecencyBuckets, partition};
pub use request::{RequestConfig, RequestParser, load_request_document, parse_request_document};
pub use stream::{BlockKind, StreamEvent};
pub use tokens::TokenEstimator;
pub use tree::{TreeNode, render_annotated, render_plain};
