use std::fmt;

use indexmap::IndexMap;

/// What a model is used for in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Research,
    Script,
    Rubric,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Research => "research",
            Capability::Script => "script",
            Capability::Rubric => "rubric",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
    pub context_window: Option<u64>,
    /// Environment keys checked in order; empty means no credential needed.
    pub credential_env: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn needs_credential(&self) -> bool {
        !self.credential_env.is_empty()
    }
}

/// Named models in preference order: the first model supporting a
/// capability is the default for it.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

const GEMINI_KEYS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];
const ANTHROPIC_KEYS: &[&str] = &["ANTHROPIC_API_KEY"];

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      provider: &str,
                      capabilities: &[Capability],
                      context_window: Option<u64>,
                      credential_env: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities.to_vec(),
                context_window,
                credential_env: credential_env
                    .iter()
                    .map(|key| (*key).to_string())
                    .collect(),
            },
        );
    };

    insert(
        "gemini-2.5-flash",
        "gemini",
        &[Capability::Research],
        Some(1_048_576),
        GEMINI_KEYS,
    );
    insert(
        "gemini-2.5-pro",
        "gemini",
        &[Capability::Research],
        Some(1_048_576),
        GEMINI_KEYS,
    );
    insert(
        "heuristic-rubric-1",
        "heuristic",
        &[Capability::Rubric],
        None,
        &[],
    );
    insert(
        "claude-opus-4-5-20251101",
        "anthropic",
        &[Capability::Script, Capability::Rubric],
        Some(200_000),
        ANTHROPIC_KEYS,
    );
    insert(
        "claude-sonnet-4-5",
        "anthropic",
        &[Capability::Script, Capability::Rubric],
        Some(200_000),
        ANTHROPIC_KEYS,
    );
    insert(
        "dryrun-research-1",
        "dryrun",
        &[Capability::Research],
        None,
        &[],
    );
    insert(
        "dryrun-script-1",
        "dryrun",
        &[Capability::Script],
        Some(8192),
        &[],
    );

    map
}
