use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only `events.jsonl` for one run.
///
/// Every line carries `type`, `run_id` and `ts`; the caller payload is merged
/// last so a step can override them when replaying.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    run_id: String,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(serde_json::to_string(&event)?.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(Value::Object(event))
    }

    pub fn step_started(&self, step: &str) -> anyhow::Result<Value> {
        self.emit("step_started", step_payload(step))
    }

    pub fn step_finished(&self, step: &str, mut detail: EventPayload) -> anyhow::Result<Value> {
        detail.insert("step".to_string(), Value::String(step.to_string()));
        self.emit("step_finished", detail)
    }

    pub fn step_failed(&self, step: &str, error: &str) -> anyhow::Result<Value> {
        let mut payload = step_payload(step);
        payload.insert("error".to_string(), Value::String(error.to_string()));
        self.emit("step_failed", payload)
    }

    pub fn artifact_written(&self, name: &str, path: &Path) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert("artifact".to_string(), Value::String(name.to_string()));
        payload.insert(
            "path".to_string(),
            Value::String(path.to_string_lossy().to_string()),
        );
        self.emit("artifact_written", payload)
    }

    /// Parses every line back; unreadable lines are skipped.
    pub fn read_all(&self) -> Vec<Value> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        raw.lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect()
    }
}

fn step_payload(step: &str) -> EventPayload {
    let mut payload = EventPayload::new();
    payload.insert("step".to_string(), Value::String(step.to_string()));
    payload
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
