use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;

pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 7.0;

/// Act label -> act text, in header order. Persisted as `acts.json`.
pub type ActMap = IndexMap<String, String>;

/// Act label -> rubric result. Persisted as `scores.json`.
pub type ScoreMap = IndexMap<String, ActScore>;

/// Rubric result for a single act. Scorers may attach extra fields; they
/// round-trip untouched through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActScore {
    pub score: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActScore {
    pub fn new(score: f64, threshold: f64, notes: Vec<String>) -> Self {
        Self {
            score,
            threshold,
            notes,
            extra: Map::new(),
        }
    }

    pub fn is_weak(&self) -> bool {
        self.score < self.threshold
    }
}

fn default_threshold() -> f64 {
    DEFAULT_ACCEPT_THRESHOLD
}

/// Labels of weak acts, lowest score first; ties keep header order.
pub fn weak_acts(scores: &ScoreMap) -> Vec<String> {
    let mut weak: Vec<(usize, &String, f64)> = scores
        .iter()
        .enumerate()
        .filter(|(_, (_, score))| score.is_weak())
        .map(|(idx, (label, score))| (idx, label, score.score))
        .collect();
    weak.sort_by(|left, right| left.2.total_cmp(&right.2).then(left.0.cmp(&right.0)));
    weak.into_iter().map(|(_, label, _)| label.clone()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptMeta {
    pub word_count: usize,
    pub tone_preset: String,
    pub min_words: u32,
    pub max_words: u32,
    pub model: Option<String>,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStop {
    NoPassesRequested,
    AllAcceptable,
    MaxPassesReached,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEntry {
    pub act: String,
    pub score_before: f64,
    pub threshold: f64,
    pub old_sha256: String,
    pub new_sha256: String,
    pub old_words: usize,
    pub new_words: usize,
    pub diff: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPass {
    pub pass: u32,
    pub weak_acts: Vec<String>,
    pub entries: Vec<PatchEntry>,
}

/// What a patch invocation changed. Persisted as `patch_log.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchLog {
    pub max_passes: u32,
    pub passes: Vec<PatchPass>,
    pub stop: PatchStop,
    pub aborted: Option<String>,
    pub words_before: usize,
    pub words_after: usize,
}

impl PatchLog {
    pub fn patched_acts(&self) -> usize {
        self.passes.iter().map(|pass| pass.entries.len()).sum()
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn act_diff(act: &str, before: &str, after: &str) -> Vec<String> {
    let diff = TextDiff::from_lines(before, after);
    diff.unified_diff()
        .header(&format!("{act} (before)"), &format!("{act} (after)"))
        .to_string()
        .lines()
        .map(str::to_string)
        .collect()
}
