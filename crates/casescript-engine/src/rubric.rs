//! Local rubric used when no scoring model is configured.

use anyhow::Result;
use casescript_contracts::script::{word_count, ActScore, ScoreMap, DEFAULT_ACCEPT_THRESHOLD};
use serde_json::{json, Value};

use crate::providers::{
    map_object, ActScorer, CallContext, NamedProvider, RubricRequest, ServiceCall,
};

const MAX_SCORE: f64 = 10.0;
const FAR_SHORT_PENALTY: f64 = 4.0;
const SHORT_PENALTY: f64 = 2.0;
const LONG_PENALTY: f64 = 1.0;
const NO_DIALOGUE_PENALTY: f64 = 1.5;
const FLAT_ENDING_PENALTY: f64 = 1.5;
const PLACEHOLDER_PENALTY: f64 = 4.0;
const SYNTHETIC_LABEL_PENALTY: f64 = 1.0;

const PLACEHOLDER_MARKERS: [&str; 3] = ["[stub", "[placeholder", "lorem ipsum"];
const CLOSING_BEATS: [&str; 6] = ["?", "!", "…", "...", "—", "-"];

/// Scores each act out of 10 from its length against the per-act share of
/// the word range, dialogue, the closing beat and leftover placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicRubric;

impl HeuristicRubric {
    pub fn score_act(
        label: &str,
        text: &str,
        act_count: usize,
        min_words: u32,
        max_words: u32,
    ) -> ActScore {
        let acts = act_count.max(1) as f64;
        let target = f64::from(min_words) / acts;
        let ceiling = f64::from(max_words) / acts;
        let words = word_count(text);
        let mut score = MAX_SCORE;
        let mut notes = Vec::new();

        if (words as f64) < target * 0.5 {
            score -= FAR_SHORT_PENALTY;
            notes.push(format!(
                "far below per-act target ({words} of ~{} words)",
                target.round()
            ));
        } else if (words as f64) < target {
            score -= SHORT_PENALTY;
            notes.push(format!(
                "below per-act target ({words} of ~{} words)",
                target.round()
            ));
        } else if (words as f64) > ceiling {
            score -= LONG_PENALTY;
            notes.push(format!(
                "over per-act ceiling ({words} of ~{} words)",
                ceiling.round()
            ));
        }

        if !text.contains('"') && !text.contains('“') {
            score -= NO_DIALOGUE_PENALTY;
            notes.push("no dialogue".to_string());
        }

        let last_line = text
            .lines()
            .rev()
            .map(str::trim_end)
            .find(|line| !line.trim().is_empty())
            .unwrap_or("");
        if !CLOSING_BEATS.iter().any(|beat| last_line.ends_with(beat)) {
            score -= FLAT_ENDING_PENALTY;
            notes.push("flat closing beat".to_string());
        }

        let lowered = text.to_lowercase();
        if text.contains("TODO") || PLACEHOLDER_MARKERS.iter().any(|marker| lowered.contains(marker))
        {
            score -= PLACEHOLDER_PENALTY;
            notes.push("placeholder text left in act".to_string());
        }

        if label.starts_with("ACT_") {
            score -= SYNTHETIC_LABEL_PENALTY;
            notes.push("act header was malformed".to_string());
        }

        let score = (score.clamp(0.0, MAX_SCORE) * 10.0).round() / 10.0;
        let mut result = ActScore::new(score, DEFAULT_ACCEPT_THRESHOLD, notes);
        result.extra.insert("words".to_string(), json!(words));
        result
    }
}

impl NamedProvider for HeuristicRubric {
    fn name(&self) -> &str {
        "heuristic"
    }
}

impl ActScorer for HeuristicRubric {
    fn score(
        &self,
        ctx: &CallContext<'_>,
        request: &RubricRequest<'_>,
    ) -> Result<ServiceCall<ScoreMap>> {
        let act_count = request.acts.len();
        let scores: ScoreMap = request
            .acts
            .iter()
            .map(|(label, text)| {
                (
                    label.clone(),
                    Self::score_act(
                        label,
                        text,
                        act_count,
                        request.min_words,
                        request.max_words,
                    ),
                )
            })
            .collect();
        let summary: Value = scores
            .iter()
            .map(|(label, score)| (label.clone(), json!(score.score)))
            .collect::<serde_json::Map<String, Value>>()
            .into();

        Ok(ServiceCall {
            provider_request: map_object(json!({
                "endpoint": "local",
                "model": ctx.model,
                "acts": act_count,
                "min_words": request.min_words,
                "max_words": request.max_words,
            })),
            provider_response: map_object(json!({ "scores": summary })),
            warnings: Vec::new(),
            output: scores,
        })
    }
}
