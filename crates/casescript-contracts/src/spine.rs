use serde::{Deserialize, Serialize};

use crate::cases::CaseCandidate;

/// Facts the script must never contradict.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RealSpine {
    #[serde(default)]
    pub timeline: Vec<String>,
    #[serde(default)]
    pub key_events: Vec<String>,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Bounds on what the writer may invent around the real spine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FictionLayerRules {
    pub names_are_fictional: bool,
    pub dialogue_is_recreated: bool,
    pub juicy_details_allowed: bool,
    pub must_not_contradict_real_spine: bool,
}

impl Default for FictionLayerRules {
    fn default() -> Self {
        Self {
            names_are_fictional: true,
            dialogue_is_recreated: true,
            juicy_details_allowed: true,
            must_not_contradict_real_spine: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactSpine {
    pub case_title: String,
    pub real_spine: RealSpine,
    pub fiction_layer_rules: FictionLayerRules,
}

impl FactSpine {
    /// Deterministic reshaping of the chosen case into the spine template.
    /// Only the title and sources carry over; the remaining real-spine fields
    /// start empty and are filled in by hand when the case file is reviewed.
    pub fn from_case(case: &CaseCandidate) -> Self {
        Self {
            case_title: case.title.clone(),
            real_spine: RealSpine {
                sources: case.sources.clone(),
                ..RealSpine::default()
            },
            fiction_layer_rules: FictionLayerRules::default(),
        }
    }

    /// Plain-text rendering used inside generation prompts.
    pub fn as_prompt_block(&self) -> String {
        let mut lines = vec![format!("CASE: {}", self.case_title)];
        push_list(&mut lines, "TIMELINE", &self.real_spine.timeline);
        push_list(&mut lines, "KEY EVENTS", &self.real_spine.key_events);
        if !self.real_spine.outcome.trim().is_empty() {
            lines.push(format!("OUTCOME: {}", self.real_spine.outcome.trim()));
        }
        push_list(&mut lines, "EVIDENCE", &self.real_spine.evidence);
        push_list(&mut lines, "SOURCES", &self.real_spine.sources);

        let rules = self.fiction_layer_rules;
        lines.push("FICTION RULES:".to_string());
        lines.push(format!("- names are fictional: {}", rules.names_are_fictional));
        lines.push(format!(
            "- dialogue is recreated: {}",
            rules.dialogue_is_recreated
        ));
        lines.push(format!(
            "- juicy details allowed: {}",
            rules.juicy_details_allowed
        ));
        lines.push(format!(
            "- must not contradict real spine: {}",
            rules.must_not_contradict_real_spine
        ));
        lines.join("\n")
    }
}

fn push_list(lines: &mut Vec<String>, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    lines.push(format!("{heading}:"));
    for item in items {
        lines.push(format!("- {}", item.trim()));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::FactSpine;
    use crate::cases::CaseCandidate;

    fn case() -> CaseCandidate {
        CaseCandidate {
            title: "The Clown Face Trial".to_string(),
            summary: "summary".to_string(),
            confidence: "high".to_string(),
            sources: vec!["https://example.org/1".to_string()],
        }
    }

    #[test]
    fn from_case_fills_title_sources_and_fixed_rules() -> anyhow::Result<()> {
        let spine = FactSpine::from_case(&case());
        let value = serde_json::to_value(&spine)?;
        assert_eq!(value["case_title"], json!("The Clown Face Trial"));
        assert_eq!(
            value["real_spine"]["sources"],
            json!(["https://example.org/1"])
        );
        assert_eq!(value["real_spine"]["timeline"], json!([]));
        assert_eq!(value["real_spine"]["outcome"], json!(""));
        let rules = value["fiction_layer_rules"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        assert_eq!(rules.len(), 4);
        assert!(rules.values().all(|flag| *flag == Value::Bool(true)));
        Ok(())
    }

    #[test]
    fn prompt_block_skips_empty_sections() {
        let block = FactSpine::from_case(&case()).as_prompt_block();
        assert!(block.starts_with("CASE: The Clown Face Trial"));
        assert!(block.contains("SOURCES:\n- https://example.org/1"));
        assert!(!block.contains("TIMELINE"));
        assert!(block.contains("- must not contradict real spine: true"));
    }
}
