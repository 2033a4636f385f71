use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_WORDS: u32 = 7000;
pub const DEFAULT_MAX_WORDS: u32 = 10000;
pub const DEFAULT_MAX_PATCH_PASSES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TonePreset {
    #[default]
    Strict,
    Aggressive,
    #[serde(rename = "Hard Cliffhanger")]
    HardCliffhanger,
    #[serde(rename = "Smooth Act1 Handoff")]
    SmoothAct1Handoff,
}

impl TonePreset {
    pub const ALL: [TonePreset; 4] = [
        TonePreset::Strict,
        TonePreset::Aggressive,
        TonePreset::HardCliffhanger,
        TonePreset::SmoothAct1Handoff,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TonePreset::Strict => "Strict",
            TonePreset::Aggressive => "Aggressive",
            TonePreset::HardCliffhanger => "Hard Cliffhanger",
            TonePreset::SmoothAct1Handoff => "Smooth Act1 Handoff",
        }
    }

    /// Writing direction handed to the generation service.
    pub fn direction(self) -> &'static str {
        match self {
            TonePreset::Strict => {
                "Measured, factual narration. No speculation beyond the fact spine."
            }
            TonePreset::Aggressive => {
                "Punchy, confrontational narration with short sentences and hard turns."
            }
            TonePreset::HardCliffhanger => {
                "End every act on an unresolved question that forces the next act."
            }
            TonePreset::SmoothAct1Handoff => {
                "Open slowly and hand ACT 1 into ACT 2 without a jarring break."
            }
        }
    }
}

impl fmt::Display for TonePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TonePreset {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "strict" => Ok(TonePreset::Strict),
            "aggressive" => Ok(TonePreset::Aggressive),
            "hardcliffhanger" | "cliffhanger" => Ok(TonePreset::HardCliffhanger),
            "smoothact1handoff" | "smoothhandoff" | "smooth" => Ok(TonePreset::SmoothAct1Handoff),
            _ => Err(format!(
                "unknown tone preset '{raw}' (expected one of: {})",
                TonePreset::ALL
                    .iter()
                    .map(|preset| preset.label())
                    .collect::<Vec<&str>>()
                    .join(", ")
            )),
        }
    }
}

/// Which thumbnail brief builder a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BriefMode {
    #[default]
    Heuristic,
    FixedTemplate,
}

impl FromStr for BriefMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "heuristic" => Ok(BriefMode::Heuristic),
            "fixed-template" | "fixed" | "template" => Ok(BriefMode::FixedTemplate),
            other => Err(format!(
                "unknown brief mode '{other}' (expected heuristic or fixed-template)"
            )),
        }
    }
}

/// How the act splitter treats malformed or duplicate headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    #[default]
    Strict,
    Lenient,
}

impl FromStr for SplitMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SplitMode::Strict),
            "lenient" => Ok(SplitMode::Lenient),
            other => Err(format!(
                "unknown split mode '{other}' (expected strict or lenient)"
            )),
        }
    }
}

/// Per-run tunables, persisted as `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default)]
    pub tone_preset: TonePreset,
    #[serde(default = "default_min_words")]
    pub min_words: u32,
    #[serde(default = "default_max_words")]
    pub max_words: u32,
    #[serde(default = "default_max_patch_passes")]
    pub max_patch_passes: u32,
    #[serde(default)]
    pub brief_mode: BriefMode,
    #[serde(default)]
    pub split_mode: SplitMode,
    #[serde(default)]
    pub research_model: Option<String>,
    #[serde(default)]
    pub script_model: Option<String>,
    #[serde(default)]
    pub rubric_model: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            tone_preset: TonePreset::default(),
            min_words: DEFAULT_MIN_WORDS,
            max_words: DEFAULT_MAX_WORDS,
            max_patch_passes: DEFAULT_MAX_PATCH_PASSES,
            brief_mode: BriefMode::default(),
            split_mode: SplitMode::default(),
            research_model: None,
            script_model: None,
            rubric_model: None,
        }
    }
}

impl RunSettings {
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let parsed: Self = serde_json::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("invalid settings file {}: {err}", path.display()))?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_words == 0 {
            return Err("min_words must be positive".to_string());
        }
        if self.min_words > self.max_words {
            return Err(format!(
                "min_words ({}) exceeds max_words ({})",
                self.min_words, self.max_words
            ));
        }
        Ok(())
    }
}

fn default_min_words() -> u32 {
    DEFAULT_MIN_WORDS
}

fn default_max_words() -> u32 {
    DEFAULT_MAX_WORDS
}

fn default_max_patch_passes() -> u32 {
    DEFAULT_MAX_PATCH_PASSES
}
