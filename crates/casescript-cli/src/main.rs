mod session;

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use casescript_contracts::cases::CaseCandidate;
use casescript_contracts::models::Capability;
use casescript_contracts::runs::summary::RunSummary;
use casescript_contracts::script::ScoreMap;
use casescript_contracts::settings::{BriefMode, RunSettings, SplitMode, TonePreset};
use casescript_engine::{Pipeline, Run};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const RUNS_DIR_ENV: &str = "CASESCRIPT_RUNS_DIR";
const DEFAULT_RUNS_DIR: &str = "runs";

#[derive(Debug, Parser)]
#[command(
    name = "casescript",
    version,
    about = "Thumbnail to case-based story script, one step at a time"
)]
struct Cli {
    /// Root directory holding run_<unix-seconds> directories.
    #[arg(long, global = true)]
    runs_dir: Option<PathBuf>,
    /// Run id to act on; defaults to the most recent run.
    #[arg(long, global = true)]
    run: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new run.
    New(SettingsArgs),
    /// Build the thumbnail brief.
    Brief(BriefArgs),
    /// Ask the research service for candidate cases.
    Research(SettingsArgs),
    /// Choose a candidate (1-based).
    Select(SelectArgs),
    /// Build the fact spine from the chosen case.
    Spine,
    /// Draft the full script.
    Draft(SettingsArgs),
    /// Split the script into acts.
    Split(SettingsArgs),
    /// Score each act.
    Score(SettingsArgs),
    /// Rewrite weak acts.
    Patch(SettingsArgs),
    /// Write the script to a DOCX document.
    Export(ExportArgs),
    /// Show which artifacts exist.
    Status,
    /// List known models and whether their credentials are set.
    Models,
    /// Interactive slash-command session.
    Session,
}

#[derive(Debug, Args, Default)]
struct SettingsArgs {
    #[arg(long, value_parser = parse_tone)]
    tone: Option<TonePreset>,
    #[arg(long)]
    min_words: Option<u32>,
    #[arg(long)]
    max_words: Option<u32>,
    #[arg(long)]
    max_passes: Option<u32>,
    #[arg(long, value_parser = parse_brief_mode)]
    brief_mode: Option<BriefMode>,
    #[arg(long, value_parser = parse_split_mode)]
    split_mode: Option<SplitMode>,
    #[arg(long)]
    research_model: Option<String>,
    #[arg(long)]
    script_model: Option<String>,
    #[arg(long)]
    rubric_model: Option<String>,
}

impl SettingsArgs {
    /// Applies the flags that were given; returns whether anything changed.
    fn apply(&self, settings: &mut RunSettings) -> bool {
        let before = settings.clone();
        if let Some(tone) = self.tone {
            settings.tone_preset = tone;
        }
        if let Some(min_words) = self.min_words {
            settings.min_words = min_words;
        }
        if let Some(max_words) = self.max_words {
            settings.max_words = max_words;
        }
        if let Some(passes) = self.max_passes {
            settings.max_patch_passes = passes;
        }
        if let Some(mode) = self.brief_mode {
            settings.brief_mode = mode;
        }
        if let Some(mode) = self.split_mode {
            settings.split_mode = mode;
        }
        if let Some(model) = &self.research_model {
            settings.research_model = Some(model.clone());
        }
        if let Some(model) = &self.script_model {
            settings.script_model = Some(model.clone());
        }
        if let Some(model) = &self.rubric_model {
            settings.rubric_model = Some(model.clone());
        }
        *settings != before
    }
}

#[derive(Debug, Args)]
struct BriefArgs {
    /// Thumbnail image; optional in fixed-template mode.
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value = "")]
    hint: String,
    /// Text printed on the thumbnail, entered by hand.
    #[arg(long)]
    text: Option<String>,
    #[arg(long, value_parser = parse_brief_mode)]
    mode: Option<BriefMode>,
}

#[derive(Debug, Args)]
struct SelectArgs {
    #[arg(long)]
    index: usize,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Destination; defaults to final_script.docx in the run directory.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn parse_tone(raw: &str) -> Result<TonePreset, String> {
    raw.parse()
}

fn parse_brief_mode(raw: &str) -> Result<BriefMode, String> {
    raw.parse()
}

fn parse_split_mode(raw: &str) -> Result<SplitMode, String> {
    raw.parse()
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("casescript error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("casescript=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn runs_root(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| {
        env::var(RUNS_DIR_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    })
    .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNS_DIR))
}

/// Opens the run and persists any settings overrides before the step runs.
fn open_with(root: &Path, run_id: Option<&str>, overrides: &SettingsArgs) -> Result<Run> {
    let mut run = Run::open(root, run_id)?;
    if overrides.apply(&mut run.settings) {
        run.save_settings()?;
    }
    Ok(run)
}

fn run() -> Result<i32> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let root = runs_root(cli.runs_dir);
    let run_id = cli.run.as_deref();
    let pipeline = Pipeline::standard();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::New(args) => {
            let mut settings = RunSettings::default();
            args.apply(&mut settings);
            let run = Run::create(&root, settings)?;
            writeln!(out, "Started {} at {}", run.run_id(), run.store.dir().display())?;
        }
        Command::Brief(args) => {
            let mut run = Run::open(&root, run_id)?;
            if let Some(mode) = args.mode {
                run.settings.brief_mode = mode;
                run.save_settings()?;
            }
            let brief = pipeline.build_brief_from_path(
                &mut run,
                args.image.as_deref(),
                &args.hint,
                args.text,
            )?;
            writeln!(out, "Brief: {}", brief.describe())?;
        }
        Command::Research(args) => {
            let mut run = open_with(&root, run_id, &args)?;
            let cases = pipeline.find_cases(&mut run)?;
            print_candidates(&mut out, &cases)?;
        }
        Command::Select(args) => {
            let mut run = Run::open(&root, run_id)?;
            let chosen = pipeline.select_case(&mut run, args.index)?;
            writeln!(out, "Chosen: {}", chosen.display_title())?;
        }
        Command::Spine => {
            let mut run = Run::open(&root, run_id)?;
            let spine = pipeline.build_spine(&mut run)?;
            writeln!(out, "{}", spine.as_prompt_block())?;
        }
        Command::Draft(args) => {
            let mut run = open_with(&root, run_id, &args)?;
            pipeline.draft_script(&mut run)?;
            if let Some(meta) = &run.script_meta {
                writeln!(
                    out,
                    "Drafted {} words ({}, target {}-{})",
                    meta.word_count, meta.tone_preset, meta.min_words, meta.max_words
                )?;
            }
        }
        Command::Split(args) => {
            let mut run = open_with(&root, run_id, &args)?;
            let acts = pipeline.split(&mut run)?;
            for (label, text) in &acts {
                writeln!(out, "{label}: {} words", text.split_whitespace().count())?;
            }
        }
        Command::Score(args) => {
            let mut run = open_with(&root, run_id, &args)?;
            let scores = pipeline.score(&mut run)?;
            print_scores(&mut out, &scores)?;
        }
        Command::Patch(args) => {
            let mut run = open_with(&root, run_id, &args)?;
            let log = pipeline.patch(&mut run)?;
            writeln!(
                out,
                "Patched {} act(s) over {} pass(es); stop: {:?}; words {} -> {}",
                log.patched_acts(),
                log.passes.len(),
                log.stop,
                log.words_before,
                log.words_after
            )?;
            if let Some(reason) = &log.aborted {
                writeln!(out, "Aborted: {reason}")?;
            }
        }
        Command::Export(args) => {
            let mut run = Run::open(&root, run_id)?;
            let path = pipeline.export(&mut run, args.out.as_deref())?;
            writeln!(out, "Wrote {}", path.display())?;
        }
        Command::Status => {
            let run = Run::open(&root, run_id)?;
            let summary = pipeline.status(&run)?;
            print_status(&mut out, &pipeline, &run, &summary)?;
        }
        Command::Models => {
            for model in pipeline.selector().registry.list() {
                let capabilities = model
                    .capabilities
                    .iter()
                    .map(|capability| capability.as_str())
                    .collect::<Vec<&str>>()
                    .join(",");
                let credential = if !model.needs_credential() {
                    "no credential".to_string()
                } else if model
                    .credential_env
                    .iter()
                    .any(|key| env::var(key).map(|v| !v.trim().is_empty()).unwrap_or(false))
                {
                    "credential set".to_string()
                } else {
                    format!("needs {}", model.credential_env.join(" or "))
                };
                writeln!(
                    out,
                    "{:<28} {:<10} {:<22} {credential}",
                    model.name, model.provider, capabilities
                )?;
            }
        }
        Command::Session => {
            let run = match run_id {
                Some(run_id) => Run::open(&root, Some(run_id))?,
                None => Run::create(&root, RunSettings::default())?,
            };
            let stdin = io::stdin();
            let mut state = session::SessionState::new(pipeline, root, run);
            session::run_session(&mut state, stdin.lock(), &mut out)?;
        }
    }
    Ok(0)
}

fn print_candidates(out: &mut impl Write, cases: &[CaseCandidate]) -> io::Result<()> {
    for (idx, case) in cases.iter().enumerate() {
        writeln!(out, "{}", case.headline(idx + 1))?;
        if !case.summary.trim().is_empty() {
            writeln!(out, "  {}", case.summary.trim())?;
        }
        for source in &case.sources {
            writeln!(out, "  - {source}")?;
        }
    }
    Ok(())
}

fn print_scores(out: &mut impl Write, scores: &ScoreMap) -> io::Result<()> {
    for (label, score) in scores {
        let verdict = if score.is_weak() { "weak" } else { "ok" };
        writeln!(
            out,
            "{label}: {:.1} / threshold {:.1} ({verdict})",
            score.score, score.threshold
        )?;
        for note in &score.notes {
            writeln!(out, "  - {note}")?;
        }
    }
    Ok(())
}

fn print_status(
    out: &mut impl Write,
    pipeline: &Pipeline,
    run: &Run,
    summary: &RunSummary,
) -> io::Result<()> {
    writeln!(out, "Run {} ({})", run.run_id(), run.store.dir().display())?;
    writeln!(
        out,
        "Settings: tone={} words={}-{} passes={} brief={:?} split={:?}",
        run.settings.tone_preset,
        run.settings.min_words,
        run.settings.max_words,
        run.settings.max_patch_passes,
        run.settings.brief_mode,
        run.settings.split_mode
    )?;
    writeln!(out, "Present: {}", summary.present.join(", "))?;
    writeln!(out, "Missing: {}", summary.missing.join(", "))?;
    if let Some(words) = summary.word_count {
        writeln!(out, "Script: {words} words")?;
    }
    writeln!(out, "Receipts: {}", summary.receipts)?;
    for capability in [Capability::Research, Capability::Script, Capability::Rubric] {
        match pipeline.capability_ready(&run.settings, capability) {
            Ok(model) => writeln!(out, "{capability}: ready ({model})")?,
            Err(err) => writeln!(out, "{capability}: blocked ({err})")?,
        }
    }
    Ok(())
}
