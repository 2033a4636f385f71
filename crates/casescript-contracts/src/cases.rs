use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const MIN_CANDIDATES: usize = 3;
pub const MAX_CANDIDATES: usize = 5;

/// One real case proposed by the research service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseCandidate {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "unknown_confidence", deserialize_with = "confidence_text")]
    pub confidence: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl CaseCandidate {
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "(no title)"
        } else {
            self.title.trim()
        }
    }

    pub fn headline(&self, position: usize) -> String {
        format!(
            "Candidate {position}: {} — confidence: {}",
            self.display_title(),
            self.confidence
        )
    }
}

fn unknown_confidence() -> String {
    "?".to_string()
}

// Research models answer with "high", 0.8 or 80 interchangeably.
fn confidence_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) if !text.trim().is_empty() => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => unknown_confidence(),
    })
}
