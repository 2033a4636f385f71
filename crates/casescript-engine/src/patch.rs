//! Bounded rewrite loop over weak acts.
//!
//! Each pass picks at most three weak acts (lowest score first), asks the
//! writer for a replacement of each, and splices them into the script at the
//! acts' trimmed byte ranges. Bytes outside those ranges are never touched.
//! The script is re-scored after every pass.

use std::time::Instant;

use anyhow::Result;
use casescript_contracts::script::{
    act_diff, weak_acts, word_count, ActMap, PatchEntry, PatchLog, PatchPass, PatchStop, ScoreMap,
};
use casescript_contracts::settings::{SplitMode, TonePreset};
use casescript_contracts::spine::FactSpine;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::providers::{
    ActRewriteRequest, ActScorer, CallContext, CallRecord, RubricRequest, ScriptWriter,
};
use crate::split::{classify_line, split_acts, ActSplit, HeaderLine};

pub const MAX_ACTS_PER_PASS: usize = 3;

pub struct PatchInput<'a> {
    pub script: &'a str,
    pub acts: &'a ActMap,
    pub scores: &'a ScoreMap,
    pub spine: &'a FactSpine,
    pub tone: TonePreset,
    pub min_words: u32,
    pub max_words: u32,
    pub max_passes: u32,
    pub split_mode: SplitMode,
}

/// Writer and scorer resolved for this run, with their call contexts.
pub struct PatchServices<'a> {
    pub writer: &'a dyn ScriptWriter,
    pub writer_ctx: CallContext<'a>,
    pub scorer: &'a dyn ActScorer,
    pub scorer_ctx: CallContext<'a>,
}

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub script: String,
    pub acts: ActMap,
    pub scores: ScoreMap,
    pub log: PatchLog,
    pub calls: Vec<CallRecord>,
}

struct PassResult {
    script: String,
    acts: ActMap,
    scores: ScoreMap,
    pass: PatchPass,
    calls: Vec<CallRecord>,
}

pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Runs up to `max_passes` passes. A failure in the first pass is returned
/// as an error; a later failure stops the loop, keeps the last completed
/// pass and is recorded in `PatchLog::aborted`.
pub fn run_patch_loop(input: &PatchInput<'_>, services: &PatchServices<'_>) -> Result<PatchOutcome> {
    let words_before = word_count(input.script);
    if input.max_passes == 0 {
        return Ok(PatchOutcome {
            script: input.script.to_string(),
            acts: input.acts.clone(),
            scores: input.scores.clone(),
            log: PatchLog {
                max_passes: 0,
                passes: Vec::new(),
                stop: PatchStop::NoPassesRequested,
                aborted: None,
                words_before,
                words_after: words_before,
            },
            calls: Vec::new(),
        });
    }

    let fresh = split_acts(input.script, input.split_mode)?;
    if fresh.to_map(input.script) != *input.acts
        || input
            .scores
            .keys()
            .any(|label| !input.acts.contains_key(label))
    {
        return Err(PipelineError::StaleActs.into());
    }

    let mut script = input.script.to_string();
    let mut acts = input.acts.clone();
    let mut scores = input.scores.clone();
    let mut passes = Vec::new();
    let mut calls = Vec::new();
    let mut stop = PatchStop::MaxPassesReached;
    let mut aborted = None;

    for pass in 1..=input.max_passes {
        let weak = weak_acts(&scores);
        if weak.is_empty() {
            stop = PatchStop::AllAcceptable;
            break;
        }
        match run_pass(pass, &script, &scores, &weak, input, services) {
            Ok(result) => {
                info!(
                    pass,
                    patched = result.pass.entries.len(),
                    "patch pass completed"
                );
                script = result.script;
                acts = result.acts;
                scores = result.scores;
                passes.push(result.pass);
                calls.extend(result.calls);
            }
            Err(err) if pass == 1 => return Err(err),
            Err(err) => {
                warn!(pass, error = %format!("{err:#}"), "patch pass aborted");
                aborted = Some(format!("pass {pass}: {err:#}"));
                stop = PatchStop::Aborted;
                break;
            }
        }
    }
    if stop == PatchStop::MaxPassesReached && weak_acts(&scores).is_empty() {
        stop = PatchStop::AllAcceptable;
    }

    let words_after = word_count(&script);
    Ok(PatchOutcome {
        log: PatchLog {
            max_passes: input.max_passes,
            passes,
            stop,
            aborted,
            words_before,
            words_after,
        },
        script,
        acts,
        scores,
        calls,
    })
}

fn run_pass(
    pass: u32,
    script: &str,
    scores: &ScoreMap,
    weak: &[String],
    input: &PatchInput<'_>,
    services: &PatchServices<'_>,
) -> Result<PassResult> {
    let split = split_acts(script, input.split_mode)?;
    let target_words = input.min_words / split.acts.len().max(1) as u32;
    let selected: Vec<String> = weak.iter().take(MAX_ACTS_PER_PASS).cloned().collect();

    let mut calls = Vec::new();
    let mut entries = Vec::new();
    let mut replacements: Vec<(usize, usize, String)> = Vec::new();
    for label in &selected {
        let act = split.find(label).ok_or(PipelineError::StaleActs)?;
        let old_text = act.text(script);
        let score = scores.get(label).ok_or(PipelineError::StaleActs)?;

        let started = Instant::now();
        let call = services.writer.rewrite_act(
            &services.writer_ctx,
            &ActRewriteRequest {
                label,
                act_text: old_text,
                spine: input.spine,
                tone: input.tone,
                target_words,
                notes: &score.notes,
            },
        )?;
        let (rewritten, record) = call.into_parts(
            "patch_rewrite",
            services.writer.name(),
            services.writer_ctx.model,
            started.elapsed().as_secs_f64(),
        );
        calls.push(record);

        let new_text = with_header(label, old_text, rewritten.trim())?;
        entries.push(PatchEntry {
            act: label.clone(),
            score_before: score.score,
            threshold: score.threshold,
            old_sha256: sha256_hex(old_text),
            new_sha256: sha256_hex(&new_text),
            old_words: word_count(old_text),
            new_words: word_count(&new_text),
            diff: act_diff(label, old_text, &new_text),
        });
        replacements.push((act.start, act.end, new_text));
    }

    let patched = splice(script, replacements);
    let resplit = split_acts(&patched, input.split_mode)?;
    ensure_same_acts(&split, &resplit, &selected)?;
    let acts = resplit.to_map(&patched);

    let started = Instant::now();
    let call = services.scorer.score(
        &services.scorer_ctx,
        &RubricRequest {
            acts: &acts,
            min_words: input.min_words,
            max_words: input.max_words,
        },
    )?;
    let (new_scores, record) = call.into_parts(
        "patch_score",
        services.scorer.name(),
        services.scorer_ctx.model,
        started.elapsed().as_secs_f64(),
    );
    calls.push(record);

    Ok(PassResult {
        script: patched,
        acts,
        scores: new_scores,
        pass: PatchPass {
            pass,
            weak_acts: selected,
            entries,
        },
        calls,
    })
}

/// Replacement text must open with this act's header and contain no other.
/// A missing header gets the original header line back.
fn with_header(label: &str, old_text: &str, replacement: &str) -> Result<String> {
    let original_header = old_text.lines().next().unwrap_or(label).trim_end();
    let first_line = replacement.lines().next().unwrap_or("");
    let text = match classify_line(first_line) {
        HeaderLine::NotHeader => format!("{original_header}\n{replacement}"),
        HeaderLine::WellFormed(found) if found == label => replacement.to_string(),
        HeaderLine::Malformed if first_line.trim() == original_header.trim() => {
            replacement.to_string()
        }
        _ => {
            return Err(PipelineError::MalformedReplacement {
                label: label.to_string(),
            }
            .into())
        }
    };
    let extra_headers = text
        .lines()
        .skip(1)
        .any(|line| classify_line(line) != HeaderLine::NotHeader);
    if extra_headers {
        return Err(PipelineError::MalformedReplacement {
            label: label.to_string(),
        }
        .into());
    }
    Ok(text)
}

fn splice(script: &str, mut replacements: Vec<(usize, usize, String)>) -> String {
    replacements.sort_by(|left, right| right.0.cmp(&left.0));
    let mut patched = script.to_string();
    for (start, end, text) in replacements {
        patched.replace_range(start..end, &text);
    }
    patched
}

fn ensure_same_acts(before: &ActSplit, after: &ActSplit, selected: &[String]) -> Result<()> {
    if before.labels() == after.labels() {
        return Ok(());
    }
    let label = selected
        .first()
        .cloned()
        .unwrap_or_else(|| "unknown act".to_string());
    Err(PipelineError::MalformedReplacement { label }.into())
}
