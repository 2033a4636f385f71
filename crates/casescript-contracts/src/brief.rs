use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Three-way bucket used for both brightness and contrast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneType {
    Courtroom,
    Prison,
    Footage,
    Residential,
    Interrogation,
    Unknown,
}

impl SceneType {
    pub fn as_str(self) -> &'static str {
        match self {
            SceneType::Courtroom => "courtroom",
            SceneType::Prison => "prison",
            SceneType::Footage => "footage",
            SceneType::Residential => "residential",
            SceneType::Interrogation => "interrogation",
            SceneType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SceneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured summary of a thumbnail, written once per run to
/// `thumbnail_brief.json` and used to steer research and tone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailBrief {
    pub scene_type: SceneType,
    #[serde(default)]
    pub visible_elements: Vec<String>,
    #[serde(default)]
    pub vibe: Vec<String>,
    #[serde(default)]
    pub hook_angle: String,
    #[serde(default)]
    pub composition_notes: Vec<String>,
    #[serde(default)]
    pub text_on_thumbnail: Option<String>,
    /// `color_1`..`color_k` in descending pixel frequency.
    #[serde(default)]
    pub colors: IndexMap<String, String>,
    pub brightness: Level,
    pub contrast: Level,
    #[serde(default)]
    pub user_hint: String,
}

impl ThumbnailBrief {
    /// Compact one-paragraph rendering for prompts and terminal output.
    pub fn describe(&self) -> String {
        let palette = self
            .colors
            .values()
            .cloned()
            .collect::<Vec<String>>()
            .join(", ");
        let mut out = format!(
            "scene={} brightness={} contrast={} vibe=[{}] elements=[{}] palette=[{}]",
            self.scene_type,
            self.brightness,
            self.contrast,
            self.vibe.join(", "),
            self.visible_elements.join(", "),
            palette
        );
        if let Some(text) = self.text_on_thumbnail.as_deref() {
            if !text.trim().is_empty() {
                out.push_str(&format!(" text=\"{}\"", text.trim()));
            }
        }
        if !self.user_hint.trim().is_empty() {
            out.push_str(&format!(" hint=\"{}\"", self.user_hint.trim()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use serde_json::{json, Value};

    use super::{Level, SceneType, ThumbnailBrief};

    fn sample() -> ThumbnailBrief {
        let mut colors = IndexMap::new();
        colors.insert("color_1".to_string(), "#101010".to_string());
        colors.insert("color_2".to_string(), "#a03020".to_string());
        ThumbnailBrief {
            scene_type: SceneType::Courtroom,
            visible_elements: vec!["courtroom".to_string(), "defendant".to_string()],
            vibe: vec!["ominous".to_string()],
            hook_angle: "hook".to_string(),
            composition_notes: vec!["landscape thumbnail".to_string()],
            text_on_thumbnail: None,
            colors,
            brightness: Level::Low,
            contrast: Level::Medium,
            user_hint: "court case".to_string(),
        }
    }

    #[test]
    fn brief_serializes_levels_and_scene_as_lowercase() -> anyhow::Result<()> {
        let value = serde_json::to_value(sample())?;
        assert_eq!(value["scene_type"], json!("courtroom"));
        assert_eq!(value["brightness"], json!("low"));
        assert_eq!(value["contrast"], json!("medium"));
        assert_eq!(value["text_on_thumbnail"], Value::Null);
        Ok(())
    }

    #[test]
    fn colors_keep_frequency_order_through_json() -> anyhow::Result<()> {
        let raw = serde_json::to_string(&sample())?;
        let parsed: ThumbnailBrief = serde_json::from_str(&raw)?;
        let keys: Vec<&str> = parsed.colors.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["color_1", "color_2"]);
        Ok(())
    }

    #[test]
    fn describe_mentions_hint_and_palette() {
        let text = sample().describe();
        assert!(text.contains("scene=courtroom"));
        assert!(text.contains("#a03020"));
        assert!(text.contains("hint=\"court case\""));
    }
}
