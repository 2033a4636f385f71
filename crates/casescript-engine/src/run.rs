//! The `Run` aggregate: one run directory plus the artifacts loaded from it.

use std::path::Path;

use anyhow::{Context, Result};
use casescript_contracts::brief::ThumbnailBrief;
use casescript_contracts::cases::CaseCandidate;
use casescript_contracts::events::{EventLog, EventPayload};
use casescript_contracts::runs::summary::{write_summary, RunSummary};
use casescript_contracts::runs::{Artifact, RunStore};
use casescript_contracts::script::{ActMap, PatchLog, ScoreMap, ScriptMeta};
use casescript_contracts::settings::RunSettings;
use casescript_contracts::spine::FactSpine;
use serde_json::Value;

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct Run {
    pub store: RunStore,
    pub events: EventLog,
    pub settings: RunSettings,
    pub brief: Option<ThumbnailBrief>,
    pub candidates: Option<Vec<CaseCandidate>>,
    pub chosen: Option<CaseCandidate>,
    pub spine: Option<FactSpine>,
    pub script: Option<String>,
    pub script_meta: Option<ScriptMeta>,
    pub acts: Option<ActMap>,
    pub scores: Option<ScoreMap>,
    pub patch_log: Option<PatchLog>,
}

impl Run {
    fn empty(store: RunStore, settings: RunSettings) -> Self {
        let events = EventLog::new(store.path(Artifact::Events), store.run_id());
        Self {
            store,
            events,
            settings,
            brief: None,
            candidates: None,
            chosen: None,
            spine: None,
            script: None,
            script_meta: None,
            acts: None,
            scores: None,
            patch_log: None,
        }
    }

    /// Claims a new run directory under `root` and records its settings.
    pub fn create(root: &Path, settings: RunSettings) -> Result<Self> {
        settings.validate().map_err(anyhow::Error::msg)?;
        let store = RunStore::create_now(root)?;
        let run = Self::empty(store, settings);
        run.store.save_json(Artifact::Settings, &run.settings)?;

        let mut payload = EventPayload::new();
        payload.insert(
            "out_dir".to_string(),
            Value::String(run.store.dir().to_string_lossy().to_string()),
        );
        payload.insert("settings".to_string(), serde_json::to_value(&run.settings)?);
        run.events.emit("run_started", payload)?;
        Ok(run)
    }

    /// Rebuilds the aggregate from whatever is on disk. Missing artifacts
    /// are `None`; a corrupt one is an error naming the file.
    pub fn load(store: RunStore) -> Result<Self> {
        let settings = RunSettings::load_or_default(&store.path(Artifact::Settings))?;
        let mut run = Self::empty(store, settings);
        run.brief = run.store.load_json(Artifact::ThumbnailBrief)?;
        run.candidates = run.store.load_json(Artifact::CaseCandidates)?;
        run.chosen = run.store.load_json(Artifact::ChosenCase)?;
        run.spine = run.store.load_json(Artifact::FactSpine)?;
        run.script = run.store.load_text(Artifact::Script)?;
        run.script_meta = run.store.load_json(Artifact::ScriptMeta)?;
        run.acts = run.store.load_json(Artifact::Acts)?;
        run.scores = run.store.load_json(Artifact::Scores)?;
        run.patch_log = run.store.load_json(Artifact::PatchLog)?;
        Ok(run)
    }

    /// Opens `run_id`, or the most recent run when `None`.
    pub fn open(root: &Path, run_id: Option<&str>) -> Result<Self> {
        let store = match run_id {
            Some(run_id) => RunStore::open(root, run_id)?,
            None => RunStore::latest(root)?.with_context(|| {
                format!(
                    "no runs under {}; start one with `casescript new`",
                    root.display()
                )
            })?,
        };
        Self::load(store)
    }

    pub fn run_id(&self) -> &str {
        self.store.run_id()
    }

    pub fn save_settings(&self) -> Result<()> {
        self.settings.validate().map_err(anyhow::Error::msg)?;
        self.store.save_json(Artifact::Settings, &self.settings)?;
        Ok(())
    }

    /// Deletes every pipeline artifact after `artifact`, on disk and in
    /// memory, since they were derived from the old value.
    pub fn invalidate_after(&mut self, artifact: Artifact) -> Result<()> {
        let Some(position) = Artifact::PIPELINE.iter().position(|item| *item == artifact) else {
            return Ok(());
        };
        for stale in &Artifact::PIPELINE[position + 1..] {
            self.store.remove(*stale)?;
            match stale {
                Artifact::CaseCandidates => self.candidates = None,
                Artifact::ChosenCase => self.chosen = None,
                Artifact::FactSpine => self.spine = None,
                Artifact::Script => self.script = None,
                Artifact::ScriptMeta => self.script_meta = None,
                Artifact::Acts => self.acts = None,
                Artifact::Scores => self.scores = None,
                Artifact::PatchLog => self.patch_log = None,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn require_brief(&self, action: &str) -> Result<&ThumbnailBrief> {
        self.brief
            .as_ref()
            .ok_or_else(|| PipelineError::missing(action, "build thumbnail brief").into())
    }

    pub fn require_candidates(&self, action: &str) -> Result<&[CaseCandidate]> {
        self.candidates
            .as_deref()
            .ok_or_else(|| PipelineError::missing(action, "find case candidates").into())
    }

    pub fn require_chosen(&self, action: &str) -> Result<&CaseCandidate> {
        self.chosen
            .as_ref()
            .ok_or_else(|| PipelineError::missing(action, "select a case").into())
    }

    pub fn require_spine(&self, action: &str) -> Result<&FactSpine> {
        self.spine
            .as_ref()
            .ok_or_else(|| PipelineError::missing(action, "build fact spine").into())
    }

    pub fn require_script(&self, action: &str) -> Result<&str> {
        self.script
            .as_deref()
            .ok_or_else(|| PipelineError::missing(action, "draft script").into())
    }

    pub fn require_acts(&self, action: &str) -> Result<&ActMap> {
        self.acts
            .as_ref()
            .ok_or_else(|| PipelineError::missing(action, "split acts").into())
    }

    pub fn require_scores(&self, action: &str) -> Result<&ScoreMap> {
        self.scores
            .as_ref()
            .ok_or_else(|| PipelineError::missing(action, "score acts").into())
    }

    /// Writes `run_summary.json` and returns it.
    pub fn write_summary(&self) -> Result<RunSummary> {
        let summary = RunSummary::collect(&self.store)?;
        let mut extra = serde_json::Map::new();
        extra.insert("settings".to_string(), serde_json::to_value(&self.settings)?);
        if let Some(log) = &self.patch_log {
            extra.insert("patch_stop".to_string(), serde_json::to_value(log.stop)?);
            extra.insert("patched_acts".to_string(), Value::from(log.patched_acts()));
        }
        write_summary(&self.store.path(Artifact::Summary), &summary, Some(&extra))?;
        Ok(summary)
    }
}
