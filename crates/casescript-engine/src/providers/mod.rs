//! Capability interfaces for the external services the pipeline calls, plus
//! the concrete implementations (dry-run, Gemini, Anthropic).
//!
//! Providers are looked up by name; the model registry decides which name a
//! step resolves to. Every call returns the sanitizable request/response
//! pair alongside its output so the pipeline can write a receipt.

pub mod anthropic;
pub mod dryrun;
pub mod gemini;
pub mod prompts;

use std::collections::BTreeMap;
use std::env;

use anyhow::{bail, Context, Result};
use casescript_contracts::brief::ThumbnailBrief;
use casescript_contracts::cases::CaseCandidate;
use casescript_contracts::script::{ActMap, ScoreMap};
use casescript_contracts::settings::TonePreset;
use casescript_contracts::spine::FactSpine;
use casescript_contracts::runs::receipts::ProviderReceipt;
use reqwest::blocking::Response as HttpResponse;
use serde_json::{Map, Value};

use crate::rubric::HeuristicRubric;

pub use anthropic::{AnthropicWriter, LlmRubric};
pub use dryrun::{DryrunResearcher, DryrunWriter};
pub use gemini::GeminiResearcher;

pub const REQUEST_TIMEOUT_SECS: u64 = 600;

/// Model and credential for one call.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub model: &'a str,
    pub api_key: Option<&'a str>,
}

impl CallContext<'_> {
    pub fn require_key(&self, provider: &str) -> Result<&str> {
        match self.api_key {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!("{provider} call made without a credential"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceCall<T> {
    pub output: T,
    pub provider_request: Map<String, Value>,
    pub provider_response: Map<String, Value>,
    pub warnings: Vec<String>,
}

impl<T> ServiceCall<T> {
    /// Splits off the output, keeping the audit half as a [`CallRecord`].
    pub fn into_parts(
        self,
        step: &str,
        provider: &str,
        model: &str,
        latency_s: f64,
    ) -> (T, CallRecord) {
        let record = CallRecord {
            step: step.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            request: self.provider_request,
            response: self.provider_response,
            warnings: self.warnings,
            latency_s,
        };
        (self.output, record)
    }
}

/// One finished external call, ready to be written as a receipt.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub step: String,
    pub provider: String,
    pub model: String,
    pub request: Map<String, Value>,
    pub response: Map<String, Value>,
    pub warnings: Vec<String>,
    pub latency_s: f64,
}

impl CallRecord {
    pub fn to_receipt(&self) -> ProviderReceipt {
        ProviderReceipt::new(
            &self.step,
            &self.provider,
            &self.model,
            &self.request,
            &self.response,
            &self.warnings,
            self.latency_s,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptRequest<'a> {
    pub spine: &'a FactSpine,
    pub tone: TonePreset,
    pub min_words: u32,
    pub max_words: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ActRewriteRequest<'a> {
    pub label: &'a str,
    pub act_text: &'a str,
    pub spine: &'a FactSpine,
    pub tone: TonePreset,
    pub target_words: u32,
    pub notes: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct RubricRequest<'a> {
    pub acts: &'a ActMap,
    pub min_words: u32,
    pub max_words: u32,
}

pub trait NamedProvider: Send + Sync {
    fn name(&self) -> &str;
}

pub trait CaseResearcher: NamedProvider {
    fn find_cases(
        &self,
        ctx: &CallContext<'_>,
        brief: &ThumbnailBrief,
    ) -> Result<ServiceCall<Vec<CaseCandidate>>>;
}

pub trait ScriptWriter: NamedProvider {
    fn write_script(
        &self,
        ctx: &CallContext<'_>,
        request: &ScriptRequest<'_>,
    ) -> Result<ServiceCall<String>>;

    fn rewrite_act(
        &self,
        ctx: &CallContext<'_>,
        request: &ActRewriteRequest<'_>,
    ) -> Result<ServiceCall<String>>;
}

pub trait ActScorer: NamedProvider {
    fn score(&self, ctx: &CallContext<'_>, request: &RubricRequest<'_>)
        -> Result<ServiceCall<ScoreMap>>;
}

pub struct ProviderRegistry<P: ?Sized> {
    providers: BTreeMap<String, Box<P>>,
}

impl<P: ?Sized> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }
}

impl<P: NamedProvider + ?Sized> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<P>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&P> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Everything the pipeline may call out to, keyed by provider name.
#[derive(Default)]
pub struct Services {
    pub researchers: ProviderRegistry<dyn CaseResearcher>,
    pub writers: ProviderRegistry<dyn ScriptWriter>,
    pub scorers: ProviderRegistry<dyn ActScorer>,
}

impl Services {
    /// Built-in providers for every model in the default registry.
    pub fn standard() -> Self {
        let mut services = Self::default();
        services.researchers.register(Box::new(DryrunResearcher));
        services.researchers.register(Box::new(GeminiResearcher::new()));
        services.writers.register(Box::new(DryrunWriter));
        services.writers.register(Box::new(AnthropicWriter::new()));
        services.scorers.register(Box::new(HeuristicRubric));
        services.scorers.register(Box::new(LlmRubric::new()));
        services
    }
}

/// Where credentials come from. The process environment in production,
/// a fixed map in tests.
pub trait Credentials {
    fn lookup(&self, key: &str) -> Option<String>;

    /// First non-empty value among `keys`.
    fn first_of(&self, keys: &[String]) -> Option<String> {
        keys.iter().find_map(|key| self.lookup(key))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl Credentials for EnvCredentials {
    fn lookup(&self, key: &str) -> Option<String> {
        non_empty_env(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    values: BTreeMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl Credentials for StaticCredentials {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn api_base(env_key: &str, default: &str) -> String {
    non_empty_env(env_key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Pulls a JSON value out of model text that may wrap it in prose or a
/// fenced block.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let unfenced = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        return Some(value);
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        let (Some(start), Some(end)) = (unfenced.find(open), unfenced.rfind(close)) else {
            continue;
        };
        if end <= start {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(&unfenced[start..=end]) {
            return Some(value);
        }
    }
    None
}
