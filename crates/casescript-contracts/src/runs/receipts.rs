use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Audit record for one call to an external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub schema_version: u64,
    pub step: String,
    pub provider: String,
    pub model: String,
    pub request: Value,
    pub response: Value,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub latency_s: f64,
    pub ts: String,
}

impl ProviderReceipt {
    pub fn new(
        step: &str,
        provider: &str,
        model: &str,
        request: &Map<String, Value>,
        response: &Map<String, Value>,
        warnings: &[String],
        latency_s: f64,
    ) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            step: step.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            request: sanitize_payload(&Value::Object(request.clone())),
            response: sanitize_payload(&Value::Object(response.clone())),
            warnings: warnings.to_vec(),
            latency_s,
            ts: crate::events::now_utc_iso(),
        }
    }

    /// Writes `<dir>/<step>-<millis>.json`, suffixing on name clashes.
    pub fn write(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stamp = chrono::Utc::now().timestamp_millis();
        let mut path = dir.join(format!("{}-{stamp}.json", self.step));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("{}-{stamp}-{suffix}.json", self.step));
            suffix += 1;
        }
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase().replace('-', "_");
                if matches!(
                    lowered.as_str(),
                    "api_key" | "x_api_key" | "authorization" | "key"
                ) {
                    out.insert(key.clone(), Value::String("<redacted>".to_string()));
                    continue;
                }
                if matches!(lowered.as_str(), "data" | "inlinedata" | "inline_data") {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{ProviderReceipt, RECEIPT_SCHEMA_VERSION};

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn receipt_redacts_credentials_and_inline_data() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let request = obj(json!({
            "endpoint": "https://api.example/v1/messages",
            "headers": {"x-api-key": "sk-secret", "anthropic-version": "2023-06-01"},
            "payload": {"contents": [{"parts": [{"inlineData": {"data": "AAAA"}}]}]},
        }));
        let response = obj(json!({"status": 200, "chars": 1200}));
        let receipt = ProviderReceipt::new(
            "draft",
            "anthropic",
            "claude-opus-4-1",
            &request,
            &response,
            &["note".to_string()],
            1.25,
        );
        let path = receipt.write(&temp.path().join("receipts"))?;
        assert!(path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
            .starts_with("draft-"));

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["request"]["headers"]["x-api-key"], json!("<redacted>"));
        assert_eq!(
            parsed["request"]["headers"]["anthropic-version"],
            json!("2023-06-01")
        );
        assert_eq!(
            parsed["request"]["payload"]["contents"][0]["parts"][0]["inlineData"],
            json!("<omitted>")
        );
        assert_eq!(parsed["response"]["chars"], json!(1200));
        assert_eq!(parsed["warnings"], json!(["note"]));
        Ok(())
    }

    #[test]
    fn receipts_written_back_to_back_do_not_overwrite() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let receipt = ProviderReceipt::new(
            "patch",
            "dryrun",
            "dryrun-script-1",
            &Map::new(),
            &Map::new(),
            &[],
            0.0,
        );
        let first = receipt.write(temp.path())?;
        let second = receipt.write(temp.path())?;
        assert_ne!(first, second);
        Ok(())
    }
}
