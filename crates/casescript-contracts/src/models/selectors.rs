use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolves `requested` for `capability`, falling back to the first
    /// registered model that supports it.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{Capability, ModelRegistry, ModelSpec};

    fn script_model(name: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: "dryrun".to_string(),
            capabilities: vec![Capability::Script],
            context_window: None,
            credential_env: Vec::new(),
        }
    }

    fn selector(models: &[ModelSpec]) -> ModelSelector {
        let mut map = IndexMap::new();
        for model in models {
            map.insert(model.name.clone(), model.clone());
        }
        ModelSelector::new(Some(ModelRegistry::new(Some(map))))
    }

    #[test]
    fn falls_back_when_requested_model_unavailable() {
        let selection = selector(&[script_model("writer-fallback")])
            .select(Some("missing"), Capability::Script)
            .unwrap();
        assert_eq!(selection.model.name, "writer-fallback");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'script'.")
        );
    }

    #[test]
    fn blank_request_counts_as_unspecified() {
        let selection = selector(&[script_model("writer-default")])
            .select(Some("  "), Capability::Script)
            .unwrap();
        assert_eq!(selection.requested, None);
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn exact_match_has_no_fallback_reason() {
        let selection = selector(&[script_model("a"), script_model("b")])
            .select(Some("b"), Capability::Script)
            .unwrap();
        assert_eq!(selection.model.name, "b");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn errors_when_no_model_has_capability() {
        let err = selector(&[script_model("writer")])
            .select(Some("writer"), Capability::Research)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'research'.");
    }
}
