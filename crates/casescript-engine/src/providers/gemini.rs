use std::time::Duration;

use anyhow::{bail, Context, Result};
use casescript_contracts::brief::ThumbnailBrief;
use casescript_contracts::cases::CaseCandidate;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::prompts::research_prompt;
use super::{
    api_base, extract_json, map_object, response_json_or_error, CallContext, CaseResearcher,
    NamedProvider, ServiceCall, REQUEST_TIMEOUT_SECS,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Case research through `generateContent` with search grounding.
pub struct GeminiResearcher {
    api_base: String,
    http: HttpClient,
}

impl Default for GeminiResearcher {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiResearcher {
    pub fn new() -> Self {
        Self {
            api_base: api_base("GEMINI_API_BASE", DEFAULT_API_BASE),
            http: HttpClient::new(),
        }
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn response_text(payload: &Value) -> String {
        payload
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<Vec<&str>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn grounding_sources(payload: &Value) -> Vec<String> {
        payload
            .pointer("/candidates/0/groundingMetadata/groundingChunks")
            .and_then(Value::as_array)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter_map(|chunk| chunk.pointer("/web/uri").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Candidates from the model text. Accepts a bare array or an object with
    /// a `cases` array. Candidates without sources borrow the grounding URIs.
    pub fn parse_candidates(payload: &Value) -> Result<(Vec<CaseCandidate>, Vec<String>)> {
        let text = Self::response_text(payload);
        let Some(parsed) = extract_json(&text) else {
            bail!("Gemini research response did not contain JSON case candidates");
        };
        let rows = match parsed {
            Value::Array(rows) => rows,
            Value::Object(mut map) => match map.remove("cases") {
                Some(Value::Array(rows)) => rows,
                _ => bail!("Gemini research response JSON has no case list"),
            },
            _ => bail!("Gemini research response JSON has no case list"),
        };

        let grounding = Self::grounding_sources(payload);
        let mut warnings = Vec::new();
        let mut cases = Vec::new();
        for (idx, row) in rows.into_iter().enumerate() {
            match serde_json::from_value::<CaseCandidate>(row) {
                Ok(mut case) => {
                    if case.sources.is_empty() && !grounding.is_empty() {
                        case.sources = grounding.clone();
                    }
                    cases.push(case);
                }
                Err(err) => warnings.push(format!("skipped candidate {}: {err}", idx + 1)),
            }
        }
        Ok((cases, warnings))
    }
}

impl NamedProvider for GeminiResearcher {
    fn name(&self) -> &str {
        "gemini"
    }
}

impl CaseResearcher for GeminiResearcher {
    fn find_cases(
        &self,
        ctx: &CallContext<'_>,
        brief: &ThumbnailBrief,
    ) -> Result<ServiceCall<Vec<CaseCandidate>>> {
        let api_key = ctx.require_key("Gemini")?;
        let endpoint = self.endpoint_for_model(ctx.model);
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": research_prompt(brief) }],
            }],
            "tools": [{ "google_search": {} }],
        });

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Gemini request to {endpoint} failed"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let (cases, warnings) = Self::parse_candidates(&response_payload)?;

        Ok(ServiceCall {
            provider_request: map_object(json!({
                "endpoint": endpoint,
                "model": ctx.model,
                "payload": payload,
            })),
            provider_response: map_object(json!({
                "count": cases.len(),
                "finish_reason": response_payload
                    .pointer("/candidates/0/finishReason")
                    .cloned()
                    .unwrap_or(Value::Null),
                "usage": response_payload.get("usageMetadata").cloned().unwrap_or(Value::Null),
            })),
            warnings,
            output: cases,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::GeminiResearcher;

    #[test]
    fn parses_fenced_array_and_fills_grounding_sources() -> anyhow::Result<()> {
        let text = "```json\n[{\"title\": \"A\", \"summary\": \"s\", \"confidence\": 0.9}, \
                    {\"title\": \"B\", \"summary\": \"t\", \"confidence\": \"low\", \"sources\": [\"u\"]}]\n```";
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }] },
                "groundingMetadata": {
                    "groundingChunks": [{ "web": { "uri": "https://news.example/a" } }]
                }
            }]
        });
        let (cases, warnings) = GeminiResearcher::parse_candidates(&payload)?;
        assert!(warnings.is_empty());
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].confidence, "0.9");
        assert_eq!(cases[0].sources, vec!["https://news.example/a"]);
        assert_eq!(cases[1].sources, vec!["u"]);
        Ok(())
    }

    #[test]
    fn accepts_object_with_cases_key() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"cases\": [{\"title\": \"Only\"}]}" }] }
            }]
        });
        let (cases, _) = GeminiResearcher::parse_candidates(&payload)?;
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].title, "Only");
        Ok(())
    }

    #[test]
    fn prose_without_json_is_an_error() {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "text": "I could not find any." }] } }]
        });
        assert!(GeminiResearcher::parse_candidates(&payload).is_err());
    }

    #[test]
    fn endpoint_prefixes_models_path() {
        let researcher = GeminiResearcher {
            api_base: "https://api.test/v1beta".to_string(),
            http: reqwest::blocking::Client::new(),
        };
        assert_eq!(
            researcher.endpoint_for_model("gemini-2.5-flash"),
            "https://api.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            researcher.endpoint_for_model("models/gemini-2.5-pro"),
            "https://api.test/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }
}
