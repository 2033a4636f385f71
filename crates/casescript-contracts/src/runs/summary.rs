use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::store::{Artifact, RunStore};
use crate::events::now_utc_iso;
use crate::script::word_count;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub present: Vec<String>,
    pub missing: Vec<String>,
    pub word_count: Option<usize>,
    pub receipts: usize,
    pub ts: String,
}

impl RunSummary {
    /// Snapshot of which pipeline artifacts exist right now.
    pub fn collect(store: &RunStore) -> anyhow::Result<Self> {
        let (present, missing): (Vec<Artifact>, Vec<Artifact>) = Artifact::PIPELINE
            .iter()
            .copied()
            .partition(|artifact| store.exists(*artifact));
        let word_count = store
            .load_text(Artifact::Script)?
            .map(|script| word_count(&script));
        let receipts = std::fs::read_dir(store.receipts_dir())
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0);
        Ok(Self {
            run_id: store.run_id().to_string(),
            present: present
                .into_iter()
                .map(|artifact| artifact.file_name().to_string())
                .collect(),
            missing: missing
                .into_iter()
                .map(|artifact| artifact.file_name().to_string())
                .collect(),
            word_count,
            receipts,
            ts: now_utc_iso(),
        })
    }
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{write_summary, RunSummary};
    use crate::runs::store::{Artifact, RunStore};

    #[test]
    fn collect_partitions_present_and_missing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = RunStore::create(temp.path(), 10)?;
        store.save_json(Artifact::ThumbnailBrief, &json!({}))?;
        store.save_text(Artifact::Script, "ACT 1: one two three")?;

        let summary = RunSummary::collect(&store)?;
        assert_eq!(summary.run_id, "run_10");
        assert_eq!(summary.present, vec!["thumbnail_brief.json", "script.txt"]);
        assert!(summary.missing.contains(&"final_script.docx".to_string()));
        assert_eq!(summary.word_count, Some(5));
        assert_eq!(summary.receipts, 0);
        Ok(())
    }

    #[test]
    fn write_summary_merges_extra_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = RunStore::create(temp.path(), 11)?;
        let summary = RunSummary::collect(&store)?;
        let mut extra = Map::new();
        extra.insert("document".to_string(), json!("final_script.docx"));
        let path = store.path(Artifact::Summary);
        write_summary(&path, &summary, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["run_id"], json!("run_11"));
        assert_eq!(parsed["document"], json!("final_script.docx"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
