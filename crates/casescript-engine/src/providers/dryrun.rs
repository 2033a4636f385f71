//! Deterministic offline stand-ins for the research and generation services.

use anyhow::Result;
use casescript_contracts::brief::{SceneType, ThumbnailBrief};
use casescript_contracts::cases::CaseCandidate;
use casescript_contracts::script::word_count;
use serde_json::json;

use super::{
    map_object, ActRewriteRequest, CallContext, CaseResearcher, NamedProvider, ScriptRequest,
    ScriptWriter, ServiceCall,
};

const FILLER: [&str; 6] = [
    "The records from that night are thinner than anyone admits.",
    "Every witness remembers the same door, but not the same hour.",
    "Investigators logged the scene twice and the two reports disagree.",
    "Nobody in the building wanted to be the first to speak.",
    "The paperwork moved faster than the people it described.",
    "By morning the story had already hardened into something else.",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunResearcher;

impl NamedProvider for DryrunResearcher {
    fn name(&self) -> &str {
        "dryrun"
    }
}

impl CaseResearcher for DryrunResearcher {
    fn find_cases(
        &self,
        ctx: &CallContext<'_>,
        brief: &ThumbnailBrief,
    ) -> Result<ServiceCall<Vec<CaseCandidate>>> {
        let setting = match brief.scene_type {
            SceneType::Courtroom => "Courtroom",
            SceneType::Prison => "Cell Block",
            SceneType::Footage => "Camera",
            SceneType::Residential => "Basement",
            SceneType::Interrogation => "Interview Room",
            SceneType::Unknown => "Quiet Town",
        };
        let confidences = ["high", "medium", "low"];
        let cases: Vec<CaseCandidate> = confidences
            .iter()
            .enumerate()
            .map(|(idx, confidence)| CaseCandidate {
                title: format!("The {setting} Case #{}", idx + 1),
                summary: format!(
                    "Offline placeholder case {} for a {} scene with a {} mood.",
                    idx + 1,
                    brief.scene_type,
                    brief.vibe.join("/")
                ),
                confidence: (*confidence).to_string(),
                sources: vec![format!("dryrun://case/{}", idx + 1)],
            })
            .collect();

        Ok(ServiceCall {
            provider_request: map_object(json!({
                "endpoint": "dryrun-native",
                "model": ctx.model,
                "brief": brief.describe(),
            })),
            provider_response: map_object(json!({
                "status": "ok",
                "count": cases.len(),
            })),
            warnings: Vec::new(),
            output: cases,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunWriter;

impl DryrunWriter {
    fn act_body(act: usize, case_title: &str) -> String {
        let opener = match act {
            1 => format!("It starts the way {case_title} always starts: with a phone call."),
            2 => "Then the evidence begins to argue with itself.".to_string(),
            _ => "In the end the verdict answers one question and opens another.".to_string(),
        };
        let mut lines = vec![opener];
        for offset in 0..3 {
            lines.push(FILLER[(act + offset) % FILLER.len()].to_string());
        }
        lines.join("\n")
    }
}

impl NamedProvider for DryrunWriter {
    fn name(&self) -> &str {
        "dryrun"
    }
}

impl ScriptWriter for DryrunWriter {
    fn write_script(
        &self,
        ctx: &CallContext<'_>,
        request: &ScriptRequest<'_>,
    ) -> Result<ServiceCall<String>> {
        let title = request.spine.case_title.trim();
        let mut sections = vec![format!(
            "COLD OPEN\n[DRYRUN tone={}, target={}-{} words]\n{}",
            request.tone.label(),
            request.min_words,
            request.max_words,
            if title.is_empty() { "Untitled case" } else { title }
        )];
        for (act, heading) in ["The Call", "The Evidence", "The Verdict"].iter().enumerate() {
            sections.push(format!(
                "ACT {}: {heading}\n{}",
                act + 1,
                Self::act_body(act + 1, title)
            ));
        }
        let script = sections.join("\n\n") + "\n";

        Ok(ServiceCall {
            provider_request: map_object(json!({
                "endpoint": "dryrun-native",
                "model": ctx.model,
                "tone": request.tone.label(),
                "min_words": request.min_words,
                "max_words": request.max_words,
            })),
            provider_response: map_object(json!({
                "status": "ok",
                "words": word_count(&script),
            })),
            warnings: vec!["dryrun script is a fixed outline, not a full-length draft".to_string()],
            output: script,
        })
    }

    /// Keeps the header and body, pads toward the target length, then adds a
    /// line of dialogue and an open question.
    fn rewrite_act(
        &self,
        ctx: &CallContext<'_>,
        request: &ActRewriteRequest<'_>,
    ) -> Result<ServiceCall<String>> {
        let mut lines: Vec<String> = request
            .act_text
            .lines()
            .map(str::to_string)
            .collect();
        let closing = [
            "\"You already knew,\" the detective said.".to_string(),
            "So why did it take three years to ask?".to_string(),
        ];
        let closing_words: usize = closing.iter().map(|line| word_count(line)).sum();
        let target = request.target_words as usize;
        let mut words = word_count(request.act_text) + closing_words;
        let mut idx = 0;
        while words < target {
            let line = FILLER[idx % FILLER.len()];
            words += word_count(line);
            lines.push(line.to_string());
            idx += 1;
        }
        lines.extend(closing);
        let text = lines.join("\n");

        Ok(ServiceCall {
            provider_request: map_object(json!({
                "endpoint": "dryrun-native",
                "model": ctx.model,
                "act": request.label,
                "target_words": request.target_words,
                "notes": request.notes,
            })),
            provider_response: map_object(json!({
                "status": "ok",
                "words": word_count(&text),
            })),
            warnings: Vec::new(),
            output: text,
        })
    }
}
