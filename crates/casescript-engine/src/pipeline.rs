//! One method per pipeline action over an explicit [`Run`].
//!
//! Every action emits `step_started` then `step_finished` or `step_failed`
//! to the run's event log, writes its artifact, and drops artifacts derived
//! from the old value. Model and credential resolution happens before any
//! external call or write, so a refused action leaves the run untouched.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Result};
use casescript_contracts::brief::ThumbnailBrief;
use casescript_contracts::cases::{CaseCandidate, MAX_CANDIDATES, MIN_CANDIDATES};
use casescript_contracts::events::{EventLog, EventPayload};
use casescript_contracts::models::{Capability, ModelSelector, ModelSpec};
use casescript_contracts::runs::summary::RunSummary;
use casescript_contracts::runs::Artifact;
use casescript_contracts::script::{word_count, ActMap, PatchLog, ScoreMap, ScriptMeta};
use casescript_contracts::settings::{BriefMode, RunSettings};
use casescript_contracts::spine::FactSpine;
use image::DynamicImage;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::export::export_docx;
use crate::patch::{run_patch_loop, sha256_hex, PatchInput, PatchServices};
use crate::providers::{
    CallContext, CallRecord, Credentials, EnvCredentials, RubricRequest, ScriptRequest, Services,
};
use crate::run::Run;
use crate::split::split_acts;
use crate::thumbnail;

/// A model picked for one capability, with its credential if it needs one.
#[derive(Debug, Clone)]
struct Resolved {
    model: ModelSpec,
    api_key: Option<String>,
    fallback_reason: Option<String>,
}

impl Resolved {
    fn ctx(&self) -> CallContext<'_> {
        CallContext {
            model: &self.model.name,
            api_key: self.api_key.as_deref(),
        }
    }

    fn describe(&self, detail: &mut EventPayload) {
        detail.insert("model".to_string(), json!(self.model.name));
        detail.insert("provider".to_string(), json!(self.model.provider));
        if let Some(reason) = &self.fallback_reason {
            detail.insert("model_fallback".to_string(), json!(reason));
        }
    }
}

pub struct Pipeline {
    services: Services,
    selector: ModelSelector,
    credentials: Box<dyn Credentials>,
}

impl Pipeline {
    pub fn new(
        services: Services,
        selector: ModelSelector,
        credentials: impl Credentials + 'static,
    ) -> Self {
        Self {
            services,
            selector,
            credentials: Box::new(credentials),
        }
    }

    /// Built-in providers, default model registry, credentials from the
    /// process environment.
    pub fn standard() -> Self {
        Self::new(
            Services::standard(),
            ModelSelector::new(None),
            EnvCredentials,
        )
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    fn resolve(&self, requested: Option<&str>, capability: Capability) -> Result<Resolved> {
        let selection = self
            .selector
            .select(requested, capability)
            .map_err(anyhow::Error::msg)?;
        if let Some(reason) = &selection.fallback_reason {
            if selection.requested.is_some() {
                warn!(capability = %capability, model = %selection.model.name, "{reason}");
            } else {
                debug!(capability = %capability, model = %selection.model.name, "{reason}");
            }
        }
        let model = selection.model;
        let api_key = if model.needs_credential() {
            let Some(key) = self.credentials.first_of(&model.credential_env) else {
                return Err(PipelineError::MissingCredential {
                    provider: model.provider.clone(),
                    env_keys: model.credential_env.clone(),
                }
                .into());
            };
            Some(key)
        } else {
            None
        };
        Ok(Resolved {
            model,
            api_key,
            fallback_reason: selection.fallback_reason,
        })
    }

    /// Whether `capability` can run right now with the run's settings.
    pub fn capability_ready(
        &self,
        settings: &RunSettings,
        capability: Capability,
    ) -> Result<String> {
        let requested = match capability {
            Capability::Research => settings.research_model.as_deref(),
            Capability::Script => settings.script_model.as_deref(),
            Capability::Rubric => settings.rubric_model.as_deref(),
        };
        self.resolve(requested, capability)
            .map(|resolved| resolved.model.name)
    }

    pub fn build_brief(
        &self,
        run: &mut Run,
        image: Option<&DynamicImage>,
        hint: &str,
        text_on_thumbnail: Option<String>,
    ) -> Result<ThumbnailBrief> {
        let events = run.events.clone();
        run_step(&events, "build_brief", || {
            let mode = run.settings.brief_mode;
            let mut brief = match image {
                Some(image) => thumbnail::build_brief(image, hint, mode)?,
                None if mode == BriefMode::FixedTemplate => thumbnail::fixed_template_brief(hint),
                None => {
                    return Err(PipelineError::missing("build_brief", "set a thumbnail image").into())
                }
            };
            brief.text_on_thumbnail = text_on_thumbnail
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty());

            let path = run.store.save_json(Artifact::ThumbnailBrief, &brief)?;
            events.artifact_written(Artifact::ThumbnailBrief.file_name(), &path)?;
            run.invalidate_after(Artifact::ThumbnailBrief)?;
            run.brief = Some(brief.clone());

            let mut detail = EventPayload::new();
            detail.insert("scene_type".to_string(), json!(brief.scene_type));
            detail.insert("brightness".to_string(), json!(brief.brightness));
            detail.insert("contrast".to_string(), json!(brief.contrast));
            detail.insert("brief_mode".to_string(), json!(mode));
            Ok((brief, detail))
        })
    }

    pub fn build_brief_from_path(
        &self,
        run: &mut Run,
        image_path: Option<&Path>,
        hint: &str,
        text_on_thumbnail: Option<String>,
    ) -> Result<ThumbnailBrief> {
        let image = image_path.map(thumbnail::load_thumbnail).transpose()?;
        self.build_brief(run, image.as_ref(), hint, text_on_thumbnail)
    }

    pub fn find_cases(&self, run: &mut Run) -> Result<Vec<CaseCandidate>> {
        let events = run.events.clone();
        run_step(&events, "find_cases", || {
            let brief = run.require_brief("find_cases")?.clone();
            let resolved =
                self.resolve(run.settings.research_model.as_deref(), Capability::Research)?;
            let researcher = self
                .services
                .researchers
                .get(&resolved.model.provider)
                .ok_or_else(|| unknown_provider(&resolved.model))?;

            let started = Instant::now();
            let call = researcher.find_cases(&resolved.ctx(), &brief)?;
            let (mut cases, record) = call.into_parts(
                "find_cases",
                researcher.name(),
                &resolved.model.name,
                started.elapsed().as_secs_f64(),
            );
            write_receipts(run, &[record])?;

            if cases.is_empty() {
                return Err(PipelineError::NoCandidates.into());
            }
            let mut warnings = Vec::new();
            if cases.len() > MAX_CANDIDATES {
                warnings.push(format!(
                    "research returned {} candidates; keeping the first {MAX_CANDIDATES}",
                    cases.len()
                ));
                cases.truncate(MAX_CANDIDATES);
            }
            if cases.len() < MIN_CANDIDATES {
                warnings.push(format!(
                    "research returned only {} candidate(s); expected at least {MIN_CANDIDATES}",
                    cases.len()
                ));
            }
            for message in &warnings {
                emit_warning(&events, "find_cases", message)?;
            }

            let path = run.store.save_json(Artifact::CaseCandidates, &cases)?;
            events.artifact_written(Artifact::CaseCandidates.file_name(), &path)?;
            run.invalidate_after(Artifact::CaseCandidates)?;
            run.candidates = Some(cases.clone());

            let mut detail = EventPayload::new();
            detail.insert("count".to_string(), json!(cases.len()));
            resolved.describe(&mut detail);
            Ok((cases, detail))
        })
    }

    /// `index` is 1-based, matching the candidate listing.
    pub fn select_case(&self, run: &mut Run, index: usize) -> Result<CaseCandidate> {
        let events = run.events.clone();
        run_step(&events, "select_case", || {
            let candidates = run.require_candidates("select_case")?;
            let available = candidates.len();
            let chosen = index
                .checked_sub(1)
                .and_then(|idx| candidates.get(idx))
                .cloned()
                .ok_or(PipelineError::CandidateIndexOutOfRange { index, available })?;

            let path = run.store.save_json(Artifact::ChosenCase, &chosen)?;
            events.artifact_written(Artifact::ChosenCase.file_name(), &path)?;
            run.invalidate_after(Artifact::ChosenCase)?;
            run.chosen = Some(chosen.clone());

            let mut detail = EventPayload::new();
            detail.insert("index".to_string(), json!(index));
            detail.insert("title".to_string(), json!(chosen.title));
            Ok((chosen, detail))
        })
    }

    pub fn build_spine(&self, run: &mut Run) -> Result<FactSpine> {
        let events = run.events.clone();
        run_step(&events, "build_spine", || {
            let spine = FactSpine::from_case(run.require_chosen("build_spine")?);
            let path = run.store.save_json(Artifact::FactSpine, &spine)?;
            events.artifact_written(Artifact::FactSpine.file_name(), &path)?;
            run.invalidate_after(Artifact::FactSpine)?;
            run.spine = Some(spine.clone());

            let mut detail = EventPayload::new();
            detail.insert("case_title".to_string(), json!(spine.case_title));
            Ok((spine, detail))
        })
    }

    pub fn draft_script(&self, run: &mut Run) -> Result<String> {
        let events = run.events.clone();
        run_step(&events, "draft_script", || {
            let spine = run.require_spine("draft_script")?.clone();
            let resolved =
                self.resolve(run.settings.script_model.as_deref(), Capability::Script)?;
            let writer = self
                .services
                .writers
                .get(&resolved.model.provider)
                .ok_or_else(|| unknown_provider(&resolved.model))?;

            let started = Instant::now();
            let call = writer.write_script(
                &resolved.ctx(),
                &ScriptRequest {
                    spine: &spine,
                    tone: run.settings.tone_preset,
                    min_words: run.settings.min_words,
                    max_words: run.settings.max_words,
                },
            )?;
            let (script, record) = call.into_parts(
                "draft_script",
                writer.name(),
                &resolved.model.name,
                started.elapsed().as_secs_f64(),
            );
            write_receipts(run, &[record])?;
            if script.trim().is_empty() {
                bail!("script generation returned no text");
            }

            let meta = script_meta(&script, &run.settings, &resolved.model.name);
            let words = meta.word_count;
            if words < run.settings.min_words as usize || words > run.settings.max_words as usize {
                emit_warning(
                    &events,
                    "draft_script",
                    &format!(
                        "draft has {words} words; target is {}-{}",
                        run.settings.min_words, run.settings.max_words
                    ),
                )?;
            }
            save_script(run, &events, &script, meta)?;
            run.invalidate_after(Artifact::ScriptMeta)?;

            let mut detail = EventPayload::new();
            detail.insert("word_count".to_string(), json!(words));
            resolved.describe(&mut detail);
            Ok((script, detail))
        })
    }

    pub fn split(&self, run: &mut Run) -> Result<ActMap> {
        let events = run.events.clone();
        run_step(&events, "split_acts", || {
            let script = run.require_script("split_acts")?;
            let split = split_acts(script, run.settings.split_mode)?;
            split.validate(script).map_err(anyhow::Error::msg)?;
            if split.fallback {
                emit_warning(
                    &events,
                    "split_acts",
                    "no act headers found; the whole script is ACT 1",
                )?;
            }
            let acts = split.to_map(script);

            let path = run.store.save_json(Artifact::Acts, &acts)?;
            events.artifact_written(Artifact::Acts.file_name(), &path)?;
            run.invalidate_after(Artifact::Acts)?;
            run.acts = Some(acts.clone());

            let mut detail = EventPayload::new();
            detail.insert("labels".to_string(), json!(split.labels()));
            detail.insert("fallback".to_string(), json!(split.fallback));
            Ok((acts, detail))
        })
    }

    pub fn score(&self, run: &mut Run) -> Result<ScoreMap> {
        let events = run.events.clone();
        run_step(&events, "score_acts", || {
            let acts = run.require_acts("score_acts")?.clone();
            let resolved =
                self.resolve(run.settings.rubric_model.as_deref(), Capability::Rubric)?;
            let scorer = self
                .services
                .scorers
                .get(&resolved.model.provider)
                .ok_or_else(|| unknown_provider(&resolved.model))?;

            let started = Instant::now();
            let call = scorer.score(
                &resolved.ctx(),
                &RubricRequest {
                    acts: &acts,
                    min_words: run.settings.min_words,
                    max_words: run.settings.max_words,
                },
            )?;
            let (scores, record) = call.into_parts(
                "score_acts",
                scorer.name(),
                &resolved.model.name,
                started.elapsed().as_secs_f64(),
            );
            write_receipts(run, &[record])?;

            let path = run.store.save_json(Artifact::Scores, &scores)?;
            events.artifact_written(Artifact::Scores.file_name(), &path)?;
            run.invalidate_after(Artifact::Scores)?;
            run.scores = Some(scores.clone());

            let mut detail = EventPayload::new();
            detail.insert(
                "scores".to_string(),
                Value::Object(
                    scores
                        .iter()
                        .map(|(label, score)| (label.clone(), json!(score.score)))
                        .collect(),
                ),
            );
            resolved.describe(&mut detail);
            Ok((scores, detail))
        })
    }

    /// Runs the patch loop. Both the writer and the scorer are resolved
    /// first; a missing credential refuses the whole action.
    pub fn patch(&self, run: &mut Run) -> Result<PatchLog> {
        let events = run.events.clone();
        run_step(&events, "patch_acts", || {
            let script = run.require_script("patch_acts")?.to_string();
            let acts = run.require_acts("patch_acts")?.clone();
            let scores = run.require_scores("patch_acts")?.clone();
            let spine = run.require_spine("patch_acts")?.clone();

            let writer_model =
                self.resolve(run.settings.script_model.as_deref(), Capability::Script)?;
            let scorer_model =
                self.resolve(run.settings.rubric_model.as_deref(), Capability::Rubric)?;
            let writer = self
                .services
                .writers
                .get(&writer_model.model.provider)
                .ok_or_else(|| unknown_provider(&writer_model.model))?;
            let scorer = self
                .services
                .scorers
                .get(&scorer_model.model.provider)
                .ok_or_else(|| unknown_provider(&scorer_model.model))?;

            let outcome = run_patch_loop(
                &PatchInput {
                    script: &script,
                    acts: &acts,
                    scores: &scores,
                    spine: &spine,
                    tone: run.settings.tone_preset,
                    min_words: run.settings.min_words,
                    max_words: run.settings.max_words,
                    max_passes: run.settings.max_patch_passes,
                    split_mode: run.settings.split_mode,
                },
                &PatchServices {
                    writer,
                    writer_ctx: writer_model.ctx(),
                    scorer,
                    scorer_ctx: scorer_model.ctx(),
                },
            )?;
            write_receipts(run, &outcome.calls)?;

            for pass in &outcome.log.passes {
                let mut payload = EventPayload::new();
                payload.insert("pass".to_string(), json!(pass.pass));
                payload.insert("weak_acts".to_string(), json!(pass.weak_acts));
                payload.insert("patched".to_string(), json!(pass.entries.len()));
                events.emit("patch_pass", payload)?;
            }
            if let Some(reason) = &outcome.log.aborted {
                emit_warning(&events, "patch_acts", reason)?;
            }

            if !outcome.log.passes.is_empty() {
                let meta = script_meta(&outcome.script, &run.settings, &writer_model.model.name);
                save_script(run, &events, &outcome.script, meta)?;
                let path = run.store.save_json(Artifact::Acts, &outcome.acts)?;
                events.artifact_written(Artifact::Acts.file_name(), &path)?;
                let path = run.store.save_json(Artifact::Scores, &outcome.scores)?;
                events.artifact_written(Artifact::Scores.file_name(), &path)?;
                run.acts = Some(outcome.acts.clone());
                run.scores = Some(outcome.scores.clone());
            }
            let path = run.store.save_json(Artifact::PatchLog, &outcome.log)?;
            events.artifact_written(Artifact::PatchLog.file_name(), &path)?;
            run.invalidate_after(Artifact::PatchLog)?;
            run.patch_log = Some(outcome.log.clone());

            let mut detail = EventPayload::new();
            detail.insert("passes".to_string(), json!(outcome.log.passes.len()));
            detail.insert("patched_acts".to_string(), json!(outcome.log.patched_acts()));
            detail.insert("stop".to_string(), json!(outcome.log.stop));
            detail.insert("words_before".to_string(), json!(outcome.log.words_before));
            detail.insert("words_after".to_string(), json!(outcome.log.words_after));
            Ok((outcome.log, detail))
        })
    }

    /// Writes the document to `out`, or `final_script.docx` in the run.
    pub fn export(&self, run: &mut Run, out: Option<&Path>) -> Result<PathBuf> {
        let events = run.events.clone();
        run_step(&events, "export_docx", || {
            let script = run.require_script("export_docx")?;
            let path = out
                .map(Path::to_path_buf)
                .unwrap_or_else(|| run.store.path(Artifact::FinalDocument));
            let paragraphs = export_docx(script, &path)?;
            events.artifact_written(Artifact::FinalDocument.file_name(), &path)?;

            let mut payload = EventPayload::new();
            payload.insert("path".to_string(), json!(path.to_string_lossy()));
            payload.insert("paragraphs".to_string(), json!(paragraphs));
            events.emit("export_finished", payload)?;
            run.write_summary()?;

            let mut detail = EventPayload::new();
            detail.insert("paragraphs".to_string(), json!(paragraphs));
            Ok((path, detail))
        })
    }

    pub fn status(&self, run: &Run) -> Result<RunSummary> {
        run.write_summary()
    }
}

fn run_step<T>(
    events: &EventLog,
    step: &str,
    body: impl FnOnce() -> Result<(T, EventPayload)>,
) -> Result<T> {
    events.step_started(step)?;
    match body() {
        Ok((value, detail)) => {
            events.step_finished(step, detail)?;
            info!(step, run_id = events.run_id(), "step finished");
            Ok(value)
        }
        Err(err) => {
            let message = format!("{err:#}");
            warn!(step, run_id = events.run_id(), error = %message, "step failed");
            if let Err(log_err) = events.step_failed(step, &message) {
                warn!(error = %log_err, "failed to record step failure");
            }
            Err(err)
        }
    }
}

fn emit_warning(events: &EventLog, step: &str, message: &str) -> Result<()> {
    warn!(step, "{message}");
    let mut payload = EventPayload::new();
    payload.insert("step".to_string(), json!(step));
    payload.insert("message".to_string(), json!(message));
    events.emit("warning", payload)?;
    Ok(())
}

fn write_receipts(run: &Run, calls: &[CallRecord]) -> Result<()> {
    let dir = run.store.receipts_dir();
    for call in calls {
        let path = call.to_receipt().write(&dir)?;
        debug!(step = %call.step, path = %path.display(), "receipt written");
    }
    Ok(())
}

fn unknown_provider(model: &ModelSpec) -> anyhow::Error {
    PipelineError::UnknownProvider {
        provider: model.provider.clone(),
        model: model.name.clone(),
    }
    .into()
}

fn script_meta(script: &str, settings: &RunSettings, model: &str) -> ScriptMeta {
    ScriptMeta {
        word_count: word_count(script),
        tone_preset: settings.tone_preset.label().to_string(),
        min_words: settings.min_words,
        max_words: settings.max_words,
        model: Some(model.to_string()),
        sha256: sha256_hex(script),
    }
}

fn save_script(run: &mut Run, events: &EventLog, script: &str, meta: ScriptMeta) -> Result<()> {
    let path = run.store.save_text(Artifact::Script, script)?;
    events.artifact_written(Artifact::Script.file_name(), &path)?;
    let path = run.store.save_json(Artifact::ScriptMeta, &meta)?;
    events.artifact_written(Artifact::ScriptMeta.file_name(), &path)?;
    run.script = Some(script.to_string());
    run.script_meta = Some(meta);
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use casescript_contracts::brief::ThumbnailBrief;
    use casescript_contracts::cases::CaseCandidate;
    use casescript_contracts::models::{Capability, ModelRegistry, ModelSelector, ModelSpec};
    use casescript_contracts::runs::Artifact;
    use casescript_contracts::script::PatchStop;
    use casescript_contracts::settings::{BriefMode, RunSettings};
    use image::{DynamicImage, Rgb, RgbImage};
    use indexmap::IndexMap;
    use serde_json::{json, Map, Value};

    use super::Pipeline;
    use crate::error::PipelineError;
    use crate::export::read_docx_paragraphs;
    use crate::providers::{
        CallContext, CaseResearcher, GeminiResearcher, NamedProvider, ServiceCall, Services,
        StaticCredentials,
    };
    use crate::run::Run;

    fn dryrun_settings() -> RunSettings {
        RunSettings {
            min_words: 300,
            max_words: 600,
            research_model: Some("dryrun-research-1".to_string()),
            script_model: Some("dryrun-script-1".to_string()),
            ..RunSettings::default()
        }
    }

    fn offline_pipeline() -> Pipeline {
        Pipeline::new(
            Services::standard(),
            ModelSelector::new(None),
            StaticCredentials::new(),
        )
    }

    fn thumbnail() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(48, 27, |x, _| {
            if x < 24 {
                Rgb([20, 20, 30])
            } else {
                Rgb([150, 40, 40])
            }
        }))
    }

    fn receipt_count(run: &Run) -> usize {
        std::fs::read_dir(run.store.receipts_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn error_kind(result: Result<impl Sized>) -> Option<PipelineError> {
        result
            .err()
            .and_then(|err| err.downcast_ref::<PipelineError>().cloned())
    }

    #[test]
    fn dryrun_pipeline_runs_end_to_end() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = offline_pipeline();
        let mut run = Run::create(temp.path(), dryrun_settings())?;

        let brief = pipeline.build_brief(&mut run, Some(&thumbnail()), "judge in court", None)?;
        assert_eq!(brief.visible_elements, vec!["courtroom", "defendant"]);
        let cases = pipeline.find_cases(&mut run)?;
        assert_eq!(cases.len(), 3);
        pipeline.select_case(&mut run, 2)?;
        let spine = pipeline.build_spine(&mut run)?;
        assert_eq!(spine.case_title, cases[1].title);

        let draft = pipeline.draft_script(&mut run)?;
        let acts = pipeline.split(&mut run)?;
        assert_eq!(
            acts.keys().map(String::as_str).collect::<Vec<&str>>(),
            vec!["ACT 1", "ACT 2", "ACT 3"]
        );
        let scores = pipeline.score(&mut run)?;
        assert!(scores.values().all(|score| score.is_weak()));

        let log = pipeline.patch(&mut run)?;
        assert_eq!(log.stop, PatchStop::AllAcceptable);
        assert_eq!(log.patched_acts(), 3);
        let patched = run.script.clone().unwrap_or_default();
        let preamble_end = draft.find("ACT 1").unwrap_or(0);
        assert_eq!(&patched[..preamble_end], &draft[..preamble_end]);
        assert!(run.store.exists(Artifact::PatchLog));

        let path = pipeline.export(&mut run, None)?;
        assert_eq!(path, run.store.path(Artifact::FinalDocument));
        let paragraphs = read_docx_paragraphs(&path)?;
        assert_eq!(paragraphs, patched.split('\n').collect::<Vec<&str>>());

        // find_cases, draft, score, 3 rewrites and a re-score
        assert_eq!(receipt_count(&run), 7);
        let events = run.events.read_all();
        let types: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(types.first(), Some(&"run_started"));
        assert!(types.contains(&"patch_pass"));
        assert!(types.contains(&"export_finished"));
        assert!(!types.contains(&"step_failed"));

        let reloaded = Run::load(run.store.clone())?;
        assert_eq!(reloaded.script, run.script);
        assert_eq!(reloaded.scores, run.scores);
        Ok(())
    }

    #[test]
    fn actions_require_their_prerequisites() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = offline_pipeline();
        let mut run = Run::create(temp.path(), dryrun_settings())?;
        assert_eq!(
            error_kind(pipeline.find_cases(&mut run)),
            Some(PipelineError::missing("find_cases", "build thumbnail brief"))
        );
        assert_eq!(
            error_kind(pipeline.patch(&mut run)),
            Some(PipelineError::missing("patch_acts", "draft script"))
        );
        let failures = run
            .events
            .read_all()
            .into_iter()
            .filter(|event| event["type"] == json!("step_failed"))
            .count();
        assert_eq!(failures, 2);
        Ok(())
    }

    #[test]
    fn heuristic_brief_needs_an_image_but_fixed_template_does_not() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = offline_pipeline();
        let mut run = Run::create(temp.path(), dryrun_settings())?;
        assert!(pipeline.build_brief(&mut run, None, "", None).is_err());

        run.settings.brief_mode = BriefMode::FixedTemplate;
        let brief = pipeline.build_brief(&mut run, None, "hint", Some(" GUILTY? ".to_string()))?;
        assert_eq!(brief.text_on_thumbnail.as_deref(), Some("GUILTY?"));
        Ok(())
    }

    #[test]
    fn research_without_credential_is_refused_before_any_write() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = offline_pipeline();
        let settings = RunSettings {
            research_model: None,
            ..dryrun_settings()
        };
        let mut run = Run::create(temp.path(), settings)?;
        pipeline.build_brief(&mut run, Some(&thumbnail()), "", None)?;

        assert_eq!(
            error_kind(pipeline.find_cases(&mut run)),
            Some(PipelineError::MissingCredential {
                provider: "gemini".to_string(),
                env_keys: vec!["GEMINI_API_KEY".to_string(), "GOOGLE_API_KEY".to_string()],
            })
        );
        assert!(!run.store.exists(Artifact::CaseCandidates));
        assert_eq!(receipt_count(&run), 0);
        Ok(())
    }

    #[test]
    fn failed_research_request_keeps_the_key_out_of_logs() -> Result<()> {
        const KEY: &str = "gm-live-7731-do-not-log";
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let api_base = format!("http://{}/v1beta", listener.local_addr()?);
        drop(listener);

        let mut services = Services::default();
        services
            .researchers
            .register(Box::new(GeminiResearcher::with_api_base(api_base)));
        let pipeline = Pipeline::new(
            services,
            ModelSelector::new(None),
            StaticCredentials::new().with("GEMINI_API_KEY", KEY),
        );
        let settings = RunSettings {
            research_model: Some("gemini-2.5-flash".to_string()),
            ..dryrun_settings()
        };
        let temp = tempfile::tempdir()?;
        let mut run = Run::create(temp.path(), settings)?;
        pipeline.build_brief(&mut run, Some(&thumbnail()), "", None)?;

        let message = pipeline
            .find_cases(&mut run)
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        assert!(message.contains("Gemini request"));
        assert!(!message.contains(KEY));

        let events = std::fs::read_to_string(run.events.path())?;
        assert!(events.contains("step_failed"));
        assert!(!events.contains(KEY));
        assert!(!run.store.exists(Artifact::CaseCandidates));
        Ok(())
    }

    #[test]
    fn patch_without_credential_leaves_script_untouched() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = offline_pipeline();
        let mut run = Run::create(temp.path(), dryrun_settings())?;
        pipeline.build_brief(&mut run, Some(&thumbnail()), "", None)?;
        pipeline.find_cases(&mut run)?;
        pipeline.select_case(&mut run, 1)?;
        pipeline.build_spine(&mut run)?;
        pipeline.draft_script(&mut run)?;
        pipeline.split(&mut run)?;
        pipeline.score(&mut run)?;
        let script_before = std::fs::read_to_string(run.store.path(Artifact::Script))?;
        let receipts_before = receipt_count(&run);

        run.settings.script_model = Some("claude-sonnet-4-5".to_string());
        let err = error_kind(pipeline.patch(&mut run));
        assert!(matches!(err, Some(PipelineError::MissingCredential { .. })));
        assert_eq!(
            std::fs::read_to_string(run.store.path(Artifact::Script))?,
            script_before
        );
        assert!(!run.store.exists(Artifact::PatchLog));
        assert_eq!(receipt_count(&run), receipts_before);
        Ok(())
    }

    #[test]
    fn select_case_checks_range() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = offline_pipeline();
        let mut run = Run::create(temp.path(), dryrun_settings())?;
        pipeline.build_brief(&mut run, Some(&thumbnail()), "", None)?;
        pipeline.find_cases(&mut run)?;
        for index in [0, 4] {
            assert_eq!(
                error_kind(pipeline.select_case(&mut run, index)),
                Some(PipelineError::CandidateIndexOutOfRange {
                    index,
                    available: 3,
                })
            );
        }
        Ok(())
    }

    #[test]
    fn rebuilding_the_brief_drops_downstream_artifacts() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let pipeline = offline_pipeline();
        let mut run = Run::create(temp.path(), dryrun_settings())?;
        pipeline.build_brief(&mut run, Some(&thumbnail()), "", None)?;
        pipeline.find_cases(&mut run)?;
        pipeline.select_case(&mut run, 1)?;
        pipeline.build_brief(&mut run, Some(&thumbnail()), "prison", None)?;
        assert!(run.candidates.is_none());
        assert!(!run.store.exists(Artifact::ChosenCase));
        Ok(())
    }

    struct CountingResearcher(usize);

    impl NamedProvider for CountingResearcher {
        fn name(&self) -> &str {
            "counting"
        }
    }

    impl CaseResearcher for CountingResearcher {
        fn find_cases(
            &self,
            _ctx: &CallContext<'_>,
            _brief: &ThumbnailBrief,
        ) -> Result<ServiceCall<Vec<CaseCandidate>>> {
            Ok(ServiceCall {
                output: (0..self.0)
                    .map(|idx| CaseCandidate {
                        title: format!("Case {idx}"),
                        summary: String::new(),
                        confidence: "medium".to_string(),
                        sources: Vec::new(),
                    })
                    .collect(),
                provider_request: Map::new(),
                provider_response: Map::new(),
                warnings: Vec::new(),
            })
        }
    }

    fn counting_pipeline(count: usize) -> Pipeline {
        let mut models = IndexMap::new();
        models.insert(
            "counting-1".to_string(),
            ModelSpec {
                name: "counting-1".to_string(),
                provider: "counting".to_string(),
                capabilities: vec![Capability::Research],
                context_window: None,
                credential_env: Vec::new(),
            },
        );
        let mut services = Services::default();
        services
            .researchers
            .register(Box::new(CountingResearcher(count)));
        Pipeline::new(
            services,
            ModelSelector::new(Some(ModelRegistry::new(Some(models)))),
            StaticCredentials::new(),
        )
    }

    #[test]
    fn research_results_are_capped_and_short_lists_warn() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let settings = RunSettings {
            research_model: None,
            ..dryrun_settings()
        };

        let mut run = Run::create(temp.path(), settings.clone())?;
        let pipeline = counting_pipeline(8);
        pipeline.build_brief(&mut run, Some(&thumbnail()), "", None)?;
        assert_eq!(pipeline.find_cases(&mut run)?.len(), 5);

        let pipeline = counting_pipeline(2);
        assert_eq!(pipeline.find_cases(&mut run)?.len(), 2);
        let warnings: Vec<Value> = run
            .events
            .read_all()
            .into_iter()
            .filter(|event| event["type"] == json!("warning"))
            .collect();
        assert_eq!(warnings.len(), 2);

        let pipeline = counting_pipeline(0);
        assert_eq!(
            error_kind(pipeline.find_cases(&mut run)),
            Some(PipelineError::NoCandidates)
        );
        Ok(())
    }
}
