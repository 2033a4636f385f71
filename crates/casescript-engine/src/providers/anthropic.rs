use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use casescript_contracts::script::{ActMap, ActScore, ScoreMap, DEFAULT_ACCEPT_THRESHOLD};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::prompts::{rewrite_prompt, rubric_prompt, script_prompt};
use super::{
    api_base, extract_json, map_object, response_json_or_error, ActRewriteRequest, ActScorer,
    CallContext, NamedProvider, RubricRequest, ScriptRequest, ScriptWriter, ServiceCall,
    REQUEST_TIMEOUT_SECS,
};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const SCRIPT_MAX_TOKENS: u64 = 32_000;
const SHORT_MAX_TOKENS: u64 = 8_000;

/// Thin client for the Messages API shared by the writer and the rubric.
struct MessagesClient {
    api_base: String,
    http: HttpClient,
}

struct MessagesReply {
    text: String,
    request: Map<String, Value>,
    response: Map<String, Value>,
    warnings: Vec<String>,
}

impl MessagesClient {
    fn new() -> Self {
        Self {
            api_base: api_base("ANTHROPIC_API_BASE", DEFAULT_API_BASE),
            http: HttpClient::new(),
        }
    }

    fn send(&self, ctx: &CallContext<'_>, prompt: &str, max_tokens: u64) -> Result<MessagesReply> {
        let api_key = ctx.require_key("Anthropic")?;
        let endpoint = format!("{}/v1/messages", self.api_base);
        let payload = json!({
            "model": ctx.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http
            .post(&endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .with_context(|| format!("Anthropic request to {endpoint} failed"))?;
        let response_payload = response_json_or_error("Anthropic", response)?;
        let text = message_text(&response_payload);
        if text.trim().is_empty() {
            bail!("Anthropic response contained no text content");
        }

        let stop_reason = response_payload
            .get("stop_reason")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let mut warnings = Vec::new();
        if stop_reason == "max_tokens" {
            warnings.push(format!(
                "response hit max_tokens ({max_tokens}); output may be cut short"
            ));
        }

        Ok(MessagesReply {
            text,
            request: map_object(json!({
                "endpoint": endpoint,
                "x-api-key": api_key,
                "payload": payload,
            })),
            response: map_object(json!({
                "id": response_payload.get("id").cloned().unwrap_or(Value::Null),
                "stop_reason": stop_reason,
                "usage": response_payload.get("usage").cloned().unwrap_or(Value::Null),
            })),
            warnings,
        })
    }
}

fn message_text(payload: &Value) -> String {
    payload
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("")
        })
        .unwrap_or_default()
}

pub struct AnthropicWriter {
    client: MessagesClient,
}

impl Default for AnthropicWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicWriter {
    pub fn new() -> Self {
        Self {
            client: MessagesClient::new(),
        }
    }
}

impl NamedProvider for AnthropicWriter {
    fn name(&self) -> &str {
        "anthropic"
    }
}

impl ScriptWriter for AnthropicWriter {
    fn write_script(
        &self,
        ctx: &CallContext<'_>,
        request: &ScriptRequest<'_>,
    ) -> Result<ServiceCall<String>> {
        let reply = self
            .client
            .send(ctx, &script_prompt(request), SCRIPT_MAX_TOKENS)?;
        Ok(ServiceCall {
            output: reply.text,
            provider_request: reply.request,
            provider_response: reply.response,
            warnings: reply.warnings,
        })
    }

    fn rewrite_act(
        &self,
        ctx: &CallContext<'_>,
        request: &ActRewriteRequest<'_>,
    ) -> Result<ServiceCall<String>> {
        let reply = self
            .client
            .send(ctx, &rewrite_prompt(request), SHORT_MAX_TOKENS)?;
        Ok(ServiceCall {
            output: reply.text.trim().to_string(),
            provider_request: reply.request,
            provider_response: reply.response,
            warnings: reply.warnings,
        })
    }
}

/// Rubric answered by the generation service as a JSON object per act.
pub struct LlmRubric {
    client: MessagesClient,
}

impl Default for LlmRubric {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmRubric {
    pub fn new() -> Self {
        Self {
            client: MessagesClient::new(),
        }
    }

    /// Scores for exactly the labels in `acts`. Bare numbers are accepted in
    /// place of `{score, notes}` objects.
    pub fn parse_scores(text: &str, acts: &ActMap) -> Result<ScoreMap> {
        let parsed = extract_json(text)
            .ok_or_else(|| anyhow!("rubric response did not contain a JSON object"))?;
        let Value::Object(mut rows) = parsed else {
            bail!("rubric response JSON is not an object keyed by act label");
        };
        let mut scores = ScoreMap::new();
        for label in acts.keys() {
            let row = rows
                .remove(label)
                .ok_or_else(|| anyhow!("rubric response missing a score for {label}"))?;
            let score = match row {
                Value::Number(number) => ActScore::new(
                    number.as_f64().unwrap_or(0.0),
                    DEFAULT_ACCEPT_THRESHOLD,
                    Vec::new(),
                ),
                other => serde_json::from_value(other)
                    .with_context(|| format!("invalid rubric entry for {label}"))?,
            };
            scores.insert(label.clone(), score);
        }
        Ok(scores)
    }
}

impl NamedProvider for LlmRubric {
    fn name(&self) -> &str {
        "anthropic"
    }
}

impl ActScorer for LlmRubric {
    fn score(
        &self,
        ctx: &CallContext<'_>,
        request: &RubricRequest<'_>,
    ) -> Result<ServiceCall<ScoreMap>> {
        let reply = self
            .client
            .send(ctx, &rubric_prompt(request), SHORT_MAX_TOKENS)?;
        let scores = Self::parse_scores(&reply.text, request.acts)?;
        Ok(ServiceCall {
            output: scores,
            provider_request: reply.request,
            provider_response: reply.response,
            warnings: reply.warnings,
        })
    }
}
