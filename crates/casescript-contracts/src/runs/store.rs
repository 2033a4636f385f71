use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const RUN_PREFIX: &str = "run_";

/// Files a run directory may hold. Each is written independently; a crash
/// mid-run leaves whatever subset was already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Settings,
    ThumbnailBrief,
    CaseCandidates,
    ChosenCase,
    FactSpine,
    Script,
    ScriptMeta,
    Acts,
    Scores,
    PatchLog,
    FinalDocument,
    Summary,
    Events,
}

impl Artifact {
    pub const PIPELINE: [Artifact; 10] = [
        Artifact::ThumbnailBrief,
        Artifact::CaseCandidates,
        Artifact::ChosenCase,
        Artifact::FactSpine,
        Artifact::Script,
        Artifact::ScriptMeta,
        Artifact::Acts,
        Artifact::Scores,
        Artifact::PatchLog,
        Artifact::FinalDocument,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::Settings => "settings.json",
            Artifact::ThumbnailBrief => "thumbnail_brief.json",
            Artifact::CaseCandidates => "case_candidates.json",
            Artifact::ChosenCase => "chosen_case.json",
            Artifact::FactSpine => "fact_spine.json",
            Artifact::Script => "script.txt",
            Artifact::ScriptMeta => "script_meta.json",
            Artifact::Acts => "acts.json",
            Artifact::Scores => "scores.json",
            Artifact::PatchLog => "patch_log.json",
            Artifact::FinalDocument => "final_script.docx",
            Artifact::Summary => "run_summary.json",
            Artifact::Events => "events.jsonl",
        }
    }
}

/// One `run_<unix-seconds>` directory under the runs root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStore {
    run_id: String,
    dir: PathBuf,
}

impl RunStore {
    /// Claims a fresh run directory. The timestamp is bumped until an unused
    /// name is found, so runs started in the same second stay apart.
    pub fn create(root: &Path, unix_seconds: u64) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create runs root {}", root.display()))?;
        let mut stamp = unix_seconds;
        loop {
            let run_id = format!("{RUN_PREFIX}{stamp}");
            let dir = root.join(&run_id);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok(Self { run_id, dir }),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    stamp += 1;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to create {}", dir.display()))
                }
            }
        }
    }

    pub fn create_now(root: &Path) -> anyhow::Result<Self> {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        Self::create(root, seconds)
    }

    pub fn open(root: &Path, run_id: &str) -> anyhow::Result<Self> {
        let dir = root.join(run_id);
        if !dir.is_dir() {
            bail!("run '{run_id}' not found under {}", root.display());
        }
        Ok(Self {
            run_id: run_id.to_string(),
            dir,
        })
    }

    /// Most recent run by numeric timestamp, if any.
    pub fn latest(root: &Path) -> anyhow::Result<Option<Self>> {
        let Some(run_id) = list_run_ids(root).pop() else {
            return Ok(None);
        };
        Self::open(root, &run_id).map(Some)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.dir.join("receipts")
    }

    pub fn exists(&self, artifact: Artifact) -> bool {
        self.path(artifact).is_file()
    }

    pub fn save_json<T: Serialize + ?Sized>(
        &self,
        artifact: Artifact,
        value: &T,
    ) -> anyhow::Result<PathBuf> {
        let path = self.path(artifact);
        let encoded = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, encoded)
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(path)
    }

    pub fn load_json<T: DeserializeOwned>(&self, artifact: Artifact) -> anyhow::Result<Option<T>> {
        let path = self.path(artifact);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let parsed = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt artifact {}", artifact.file_name()))?;
        Ok(Some(parsed))
    }

    pub fn save_text(&self, artifact: Artifact, text: &str) -> anyhow::Result<PathBuf> {
        let path = self.path(artifact);
        std::fs::write(&path, text)
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(path)
    }

    pub fn load_text(&self, artifact: Artifact) -> anyhow::Result<Option<String>> {
        let path = self.path(artifact);
        if !path.is_file() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("failed reading {}", path.display()))
    }

    /// Drops a downstream artifact whose inputs changed.
    pub fn remove(&self, artifact: Artifact) -> anyhow::Result<()> {
        let path = self.path(artifact);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
        }
    }
}

/// Run ids under `root`, oldest first.
pub fn list_run_ids(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut runs: Vec<(u64, String)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter_map(|name| {
            let stamp = name.strip_prefix(RUN_PREFIX)?.parse::<u64>().ok()?;
            Some((stamp, name))
        })
        .collect();
    runs.sort();
    runs.into_iter().map(|(_, name)| name).collect()
}
