use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::Result;
use casescript_contracts::session::{parse_command, SessionCommand, SESSION_HELP_COMMANDS};
use casescript_contracts::settings::{BriefMode, TonePreset};
use casescript_engine::{Pipeline, Run};
use tracing::{debug, warn};

use crate::{print_candidates, print_scores, print_status};

/// What the interactive session remembers between commands.
pub struct SessionState {
    pipeline: Pipeline,
    root: PathBuf,
    run: Run,
    thumbnail: Option<PathBuf>,
    hint: String,
    text_on_thumbnail: Option<String>,
}

impl SessionState {
    pub fn new(pipeline: Pipeline, root: PathBuf, run: Run) -> Self {
        Self {
            pipeline,
            root,
            run,
            thumbnail: None,
            hint: String::new(),
            text_on_thumbnail: None,
        }
    }

    #[cfg(test)]
    pub fn run(&self) -> &Run {
        &self.run
    }
}

enum Flow {
    Continue,
    Quit,
}

/// Reads slash commands until `/quit` or end of input. Step failures are
/// reported and the session keeps going.
pub fn run_session<R: BufRead, W: Write>(
    state: &mut SessionState,
    mut input: R,
    out: &mut W,
) -> Result<()> {
    writeln!(
        out,
        "Session on {} ({}). Type /help for commands.",
        state.run.run_id(),
        state.run.store.dir().display()
    )?;
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
        let command = parse_command(&line);
        if command.action == "noop" {
            continue;
        }
        debug!(action = %command.action, "session command");
        match dispatch(state, &command, out) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(err) => {
                warn!(action = %command.action, "session step failed: {err:#}");
                writeln!(out, "Error: {err:#}")?;
            }
        }
    }
    Ok(())
}

fn dispatch<W: Write>(
    state: &mut SessionState,
    command: &SessionCommand,
    out: &mut W,
) -> Result<Flow> {
    let pipeline = &state.pipeline;
    match command.action.as_str() {
        "quit" => return Ok(Flow::Quit),
        "help" => {
            writeln!(out, "Commands:")?;
            for usage in SESSION_HELP_COMMANDS {
                writeln!(out, "  {usage}")?;
            }
        }
        "invalid" => {
            writeln!(out, "{}", command.arg_str("message").unwrap_or("invalid command"))?;
        }
        "unknown" => {
            writeln!(
                out,
                "Unknown command /{}. Type /help for commands.",
                command.arg_str("command").unwrap_or_default()
            )?;
        }
        "new_run" => {
            let run = Run::create(&state.root, state.run.settings.clone())?;
            writeln!(out, "Started {} at {}", run.run_id(), run.store.dir().display())?;
            state.run = run;
            state.thumbnail = None;
            state.hint.clear();
            state.text_on_thumbnail = None;
        }
        "set_thumbnail" => {
            let path = PathBuf::from(command.arg_str("path").unwrap_or_default());
            state.hint = command.arg_str("hint").unwrap_or_default().to_string();
            writeln!(out, "Thumbnail set to {}", path.display())?;
            state.thumbnail = Some(path);
        }
        "set_thumbnail_text" => {
            let text = command.arg_str("text").unwrap_or_default().to_string();
            writeln!(out, "On-image text: {text}")?;
            state.text_on_thumbnail = Some(text);
        }
        "set_brief_mode" => {
            let mode: BriefMode = command
                .arg_str("mode")
                .unwrap_or_default()
                .parse()
                .map_err(anyhow::Error::msg)?;
            state.run.settings.brief_mode = mode;
            state.run.save_settings()?;
            writeln!(out, "Brief mode: {mode:?}")?;
        }
        "set_tone" => {
            let tone: TonePreset = command
                .arg_str("tone")
                .unwrap_or_default()
                .parse()
                .map_err(anyhow::Error::msg)?;
            state.run.settings.tone_preset = tone;
            state.run.save_settings()?;
            writeln!(out, "Tone: {tone}")?;
        }
        "set_word_range" => {
            let mut settings = state.run.settings.clone();
            settings.min_words = word_arg(command, "min")?;
            settings.max_words = word_arg(command, "max")?;
            settings.validate().map_err(anyhow::Error::msg)?;
            state.run.settings = settings;
            state.run.save_settings()?;
            writeln!(
                out,
                "Word range: {}-{}",
                state.run.settings.min_words, state.run.settings.max_words
            )?;
        }
        "set_max_passes" => {
            state.run.settings.max_patch_passes = word_arg(command, "passes")?;
            state.run.save_settings()?;
            writeln!(out, "Max patch passes: {}", state.run.settings.max_patch_passes)?;
        }
        "build_brief" => {
            let brief = pipeline.build_brief_from_path(
                &mut state.run,
                state.thumbnail.as_deref(),
                &state.hint,
                state.text_on_thumbnail.clone(),
            )?;
            writeln!(out, "Brief: {}", brief.describe())?;
        }
        "find_cases" => {
            let cases = pipeline.find_cases(&mut state.run)?;
            print_candidates(out, &cases)?;
        }
        "select_case" => {
            let index = command.arg_u64("index").unwrap_or_default() as usize;
            let chosen = pipeline.select_case(&mut state.run, index)?;
            writeln!(out, "Chosen: {}", chosen.display_title())?;
        }
        "build_spine" => {
            let spine = pipeline.build_spine(&mut state.run)?;
            writeln!(out, "{}", spine.as_prompt_block())?;
        }
        "draft_script" => {
            pipeline.draft_script(&mut state.run)?;
            if let Some(meta) = &state.run.script_meta {
                writeln!(out, "Drafted {} words", meta.word_count)?;
            }
        }
        "split_acts" => {
            let acts = pipeline.split(&mut state.run)?;
            let labels = acts.keys().cloned().collect::<Vec<String>>();
            writeln!(out, "Acts: {}", labels.join(", "))?;
        }
        "score_acts" => {
            let scores = pipeline.score(&mut state.run)?;
            print_scores(out, &scores)?;
        }
        "patch_acts" => {
            let log = pipeline.patch(&mut state.run)?;
            writeln!(
                out,
                "Patched {} act(s) over {} pass(es); stop: {:?}",
                log.patched_acts(),
                log.passes.len(),
                log.stop
            )?;
            if let Some(reason) = &log.aborted {
                writeln!(out, "Aborted: {reason}")?;
            }
        }
        "export_docx" => {
            let path = pipeline.export(&mut state.run, None)?;
            writeln!(out, "Wrote {}", path.display())?;
        }
        "status" => {
            let summary = pipeline.status(&state.run)?;
            print_status(out, pipeline, &state.run, &summary)?;
        }
        other => {
            writeln!(out, "Unhandled action {other}")?;
        }
    }
    Ok(Flow::Continue)
}

fn word_arg(command: &SessionCommand, key: &str) -> io::Result<u32> {
    command
        .arg_u64(key)
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, format!("{key} is out of range")))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::Result;
    use casescript_contracts::models::ModelSelector;
    use casescript_contracts::runs::Artifact;
    use casescript_contracts::settings::{BriefMode, RunSettings};
    use casescript_engine::providers::{Services, StaticCredentials};
    use casescript_engine::{Pipeline, Run};

    use super::{run_session, SessionState};

    fn offline_session(root: &std::path::Path) -> Result<SessionState> {
        let settings = RunSettings {
            min_words: 300,
            max_words: 600,
            brief_mode: BriefMode::FixedTemplate,
            research_model: Some("dryrun-research-1".to_string()),
            script_model: Some("dryrun-script-1".to_string()),
            ..RunSettings::default()
        };
        let run = Run::create(root, settings)?;
        let pipeline = Pipeline::new(
            Services::standard(),
            ModelSelector::new(None),
            StaticCredentials::new(),
        );
        Ok(SessionState::new(pipeline, root.to_path_buf(), run))
    }

    #[test]
    fn scripted_session_reaches_export() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = offline_session(temp.path())?;
        let script = "/text NOT GUILTY?\n/brief\n/research\n/pick 2\n/spine\n/tone aggressive\n/draft\n/split\n/score\n/passes 1\n/patch\n/export\n/quit\n/status\n";
        let mut out = Vec::new();
        run_session(&mut state, Cursor::new(script), &mut out)?;

        let printed = String::from_utf8(out)?;
        assert!(printed.contains("Chosen:"));
        assert!(printed.contains("Tone: Aggressive"));
        assert!(printed.contains("final_script.docx"));
        assert!(!printed.contains("Error:"));
        assert!(!printed.contains("Receipts:"));

        let run = state.run();
        assert!(run.store.exists(Artifact::FinalDocument));
        assert!(run.store.exists(Artifact::PatchLog));
        assert_eq!(run.settings.max_patch_passes, 1);
        Ok(())
    }

    #[test]
    fn failures_are_reported_and_the_session_continues() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = offline_session(temp.path())?;
        let script = "/draft\nhello\n/frobnicate\n/words 900 100\n/help\n";
        let mut out = Vec::new();
        run_session(&mut state, Cursor::new(script), &mut out)?;

        let printed = String::from_utf8(out)?;
        assert!(printed.contains("Error:"));
        assert!(printed.contains("commands start with '/'"));
        assert!(printed.contains("Unknown command /frobnicate"));
        assert!(printed.contains("/pick <n>"));
        assert_eq!(state.run().settings.min_words, 300);
        Ok(())
    }
}
