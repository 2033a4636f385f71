use casescript_contracts::brief::ThumbnailBrief;
use casescript_contracts::cases::{MAX_CANDIDATES, MIN_CANDIDATES};

use super::{ActRewriteRequest, RubricRequest, ScriptRequest};

pub fn research_prompt(brief: &ThumbnailBrief) -> String {
    format!(
        "You research real criminal cases for a documentary-style story channel.\n\
         Find {MIN_CANDIDATES} to {MAX_CANDIDATES} real, well-documented cases that match this \
         thumbnail brief.\n\n\
         {}\n\n\
         Answer with a JSON array only. Each item: \
         {{\"title\": str, \"summary\": str, \"confidence\": str, \"sources\": [url]}}.",
        brief.describe()
    )
}

pub fn script_prompt(request: &ScriptRequest<'_>) -> String {
    format!(
        "Write a long-form narrated story script based on this fact spine.\n\n\
         {}\n\n\
         Tone preset: {} ({})\n\
         Length: {} to {} words.\n\
         Structure the script as three acts. Start each act on its own line with a header \
         of the form \"ACT <number>: <title>\". Never contradict the real spine.",
        request.spine.as_prompt_block(),
        request.tone.label(),
        request.tone.direction(),
        request.min_words,
        request.max_words,
    )
}

pub fn rewrite_prompt(request: &ActRewriteRequest<'_>) -> String {
    let notes = if request.notes.is_empty() {
        "(none)".to_string()
    } else {
        request
            .notes
            .iter()
            .map(|note| format!("- {note}"))
            .collect::<Vec<String>>()
            .join("\n")
    };
    format!(
        "Rewrite {label} of a narrated story script. Keep every fact consistent with the \
         fact spine below.\n\n\
         {spine}\n\n\
         Tone preset: {tone} ({direction})\n\
         Target length: about {target} words.\n\
         Reviewer notes:\n{notes}\n\n\
         Current text:\n{text}\n\n\
         Return only the rewritten act, starting with its \"{label}\" header line.",
        label = request.label,
        spine = request.spine.as_prompt_block(),
        tone = request.tone.label(),
        direction = request.tone.direction(),
        target = request.target_words,
        text = request.act_text,
    )
}

pub fn rubric_prompt(request: &RubricRequest<'_>) -> String {
    let acts = request
        .acts
        .iter()
        .map(|(label, text)| format!("=== {label} ===\n{text}"))
        .collect::<Vec<String>>()
        .join("\n\n");
    format!(
        "Score each act of this script from 0 to 10 for hook strength, pacing, dialogue and \
         the closing beat. The whole script should land between {} and {} words.\n\n\
         {acts}\n\n\
         Answer with a JSON object only, keyed by act label: \
         {{\"ACT 1\": {{\"score\": number, \"notes\": [str]}}}}.",
        request.min_words, request.max_words,
    )
}

#[cfg(test)]
mod tests {
    use casescript_contracts::cases::CaseCandidate;
    use casescript_contracts::script::ActMap;
    use casescript_contracts::settings::TonePreset;
    use casescript_contracts::spine::FactSpine;

    use super::{rewrite_prompt, rubric_prompt, script_prompt};
    use crate::providers::{ActRewriteRequest, RubricRequest, ScriptRequest};

    fn spine() -> FactSpine {
        FactSpine::from_case(&CaseCandidate {
            title: "The Night Shift".to_string(),
            summary: String::new(),
            confidence: "medium".to_string(),
            sources: Vec::new(),
        })
    }

    #[test]
    fn script_prompt_carries_spine_tone_and_range() {
        let spine = spine();
        let prompt = script_prompt(&ScriptRequest {
            spine: &spine,
            tone: TonePreset::HardCliffhanger,
            min_words: 7000,
            max_words: 10000,
        });
        assert!(prompt.contains("CASE: The Night Shift"));
        assert!(prompt.contains("Tone preset: Hard Cliffhanger"));
        assert!(prompt.contains("7000 to 10000 words"));
    }

    #[test]
    fn rewrite_prompt_lists_notes() {
        let spine = spine();
        let notes = vec!["too short".to_string()];
        let prompt = rewrite_prompt(&ActRewriteRequest {
            label: "ACT 2",
            act_text: "ACT 2: middle\ntext",
            spine: &spine,
            tone: TonePreset::Strict,
            target_words: 2400,
            notes: &notes,
        });
        assert!(prompt.starts_with("Rewrite ACT 2"));
        assert!(prompt.contains("- too short"));
        assert!(prompt.contains("about 2400 words"));
    }

    #[test]
    fn rubric_prompt_inlines_each_act() {
        let mut acts = ActMap::new();
        acts.insert("ACT 1".to_string(), "ACT 1: a".to_string());
        acts.insert("ACT 2".to_string(), "ACT 2: b".to_string());
        let prompt = rubric_prompt(&RubricRequest {
            acts: &acts,
            min_words: 10,
            max_words: 20,
        });
        assert!(prompt.contains("=== ACT 1 ===\nACT 1: a"));
        assert!(prompt.contains("=== ACT 2 ===\nACT 2: b"));
    }
}
