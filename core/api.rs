use crate::config::ApiConfig;
use crate::cost::UsageRecord;
use crate::error::{AppError, Result};
use crate::prompt::PromptPayload;
use crate::stream::{SseDecoder, StreamEvent, decode_event};
use futures::StreamExt;
use log;
use serde::Deserialize;
use serde_json::{Value, json};
use std::env;

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Cache breakpoints accepted per request.
pub const MAX_CACHE_MARKERS: usize = 4;

#[derive(Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct CountTokensResponse {
    input_tokens: usize,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_tokens,
        }
    }

    /// Reads the key from the environment variable named in `api.key_env`.
    pub fn from_config(api: &ApiConfig) -> Result<Self> {
        let api_key = env::var(&api.key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AppError::MissingCredential(api.key_env.clone()))?;
        Ok(Self::new(api_key, &api.base_url, &api.model, api.max_tokens))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn count_tokens_url(&self) -> String {
        format!("{}/v1/messages/count_tokens", self.base_url)
    }

    /// Builds the Messages API body. Only the last [`MAX_CACHE_MARKERS`]
    /// cache-flagged segments keep their marker.
    pub fn request_body(&self, payload: &PromptPayload, thinking_budget: Option<u32>) -> Value {
        let marked = payload.cached_segments();
        let skip_markers = marked.saturating_sub(MAX_CACHE_MARKERS);
        if skip_markers > 0 {
            log::debug!(
                "{} cache markers requested, keeping the last {}",
                marked,
                MAX_CACHE_MARKERS
            );
        }

        let mut seen_markers = 0;
        let content: Vec<Value> = payload
            .segments
            .iter()
            .map(|segment| {
                let mut block = json!({ "type": "text", "text": segment.text });
                if segment.cache {
                    seen_markers += 1;
                    if seen_markers > skip_markers {
                        block["cache_control"] = json!({ "type": "ephemeral" });
                    }
                }
                block
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
        });
        if !payload.system.trim().is_empty() {
            body["system"] = json!([{ "type": "text", "text": payload.system }]);
        }
        if let Some(budget) = thinking_budget {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }
        body
    }

    fn post(&self, url: String, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Asks the provider for the authoritative input token count.
    pub async fn count_tokens(
        &self,
        payload: &PromptPayload,
        thinking_budget: Option<u32>,
    ) -> Result<usize> {
        let body = self.request_body(payload, thinking_budget);
        log::debug!("POST {}", self.count_tokens_url());
        let response = self.post(self.count_tokens_url(), &body).send().await?;
        let response = Self::check_status(response).await?;
        let counted: CountTokensResponse = response.json().await?;
        log::info!("Provider counted {} input tokens", counted.input_tokens);
        Ok(counted.input_tokens)
    }

    /// Sends one streaming request and hands each decoded event to
    /// `on_event` in arrival order. Returns the merged usage counters.
    pub async fn stream_message<F>(
        &self,
        payload: &PromptPayload,
        thinking_budget: Option<u32>,
        mut on_event: F,
    ) -> Result<UsageRecord>
    where
        F: FnMut(&StreamEvent) -> Result<()>,
    {
        let mut body = self.request_body(payload, thinking_budget);
        body["max_tokens"] = json!(self.max_tokens);
        body["stream"] = json!(true);

        log::debug!("POST {} (model {})", self.messages_url(), self.model);
        let response = self
            .post(self.messages_url(), &body)
            .header("accept", "text/event-stream")
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let mut usage = UsageRecord::default();
        let mut decoder = SseDecoder::new();
        let mut bytes = response.bytes_stream();
        let mut stopped = false;

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                stopped |= dispatch(&data, &mut usage, &mut on_event)?;
            }
        }
        for data in decoder.finish() {
            stopped |= dispatch(&data, &mut usage, &mut on_event)?;
        }

        if !stopped {
            log::warn!("Stream ended without a message_stop event");
        }
        log::debug!("Final usage: {:?}", usage);
        Ok(usage)
    }
}

/// Returns whether the payload was the stop event.
fn dispatch<F>(data: &str, usage: &mut UsageRecord, on_event: &mut F) -> Result<bool>
where
    F: FnMut(&StreamEvent) -> Result<()>,
{
    match decode_event(data)? {
        Some(event) => {
            if let StreamEvent::Usage(report) = &event {
                usage.merge(report);
            }
            on_event(&event)?;
            Ok(event == StreamEvent::Stop)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptSegment;

    fn client() -> AnthropicClient {
        AnthropicClient::new("key".into(), "https://example.test/", "m", 1024)
    }

    fn segment(label: &'static str, cache: bool) -> PromptSegment {
        PromptSegment {
            label,
            text: label.to_string(),
            cache,
        }
    }

    fn markers(body: &Value) -> Vec<bool> {
        body["messages"][0]["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|block| block.get("cache_control").is_some())
            .collect()
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(client().messages_url(), "https://example.test/v1/messages");
        assert_eq!(
            client().count_tokens_url(),
            "https://example.test/v1/messages/count_tokens"
        );
    }

    #[test]
    fn body_carries_system_and_segments_in_order() {
        let payload = PromptPayload {
            system: "pick a mode".into(),
            segments: vec![segment("tree", true), segment("request", false)],
        };
        let body = client().request_body(&payload, None);
        assert_eq!(body["model"], "m");
        assert_eq!(body["system"][0]["text"], "pick a mode");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "tree");
        assert_eq!(body["messages"][0]["content"][1]["text"], "request");
        assert_eq!(markers(&body), vec![true, false]);
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn only_last_four_markers_survive() {
        let payload = PromptPayload {
            system: String::new(),
            segments: vec![
                segment("rules", true),
                segment("tree", true),
                segment("files:before", true),
                segment("files:last_week", true),
                segment("files:today", true),
                segment("request", false),
            ],
        };
        let body = client().request_body(&payload, None);
        assert_eq!(markers(&body), vec![false, true, true, true, true, false]);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn thinking_budget_is_forwarded() {
        let payload = PromptPayload {
            system: String::new(),
            segments: vec![segment("request", false)],
        };
        let body = client().request_body(&payload, Some(2048));
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
    }

    #[test]
    fn dispatch_merges_usage_and_reports_stop() {
        let mut usage = UsageRecord::default();
        let mut seen = Vec::new();
        let mut record = |event: &StreamEvent| -> Result<()> {
            seen.push(event.clone());
            Ok(())
        };
        let start = r#"{"type":"message_start","message":{"usage":{"input_tokens":7,"output_tokens":1}}}"#;
        let delta = r#"{"type":"message_delta","usage":{"output_tokens":42}}"#;
        assert!(!dispatch(start, &mut usage, &mut record).unwrap());
        assert!(!dispatch(r#"{"type":"ping"}"#, &mut usage, &mut record).unwrap());
        assert!(!dispatch(delta, &mut usage, &mut record).unwrap());
        assert!(dispatch(r#"{"type":"message_stop"}"#, &mut usage, &mut record).unwrap());
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 42);
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn missing_key_is_a_credential_error() {
        let api = ApiConfig {
            key_env: "XASK_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..ApiConfig::default()
        };
        match AnthropicClient::from_config(&api) {
            Err(AppError::MissingCredential(name)) => {
                assert_eq!(name, "XASK_TEST_KEY_THAT_IS_NEVER_SET")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
