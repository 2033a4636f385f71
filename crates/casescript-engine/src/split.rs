//! Act splitting over byte ranges of the script.
//!
//! A header is a line whose first token is `ACT <ASCII digits>` (after optional
//! indentation and markdown `#`/`*` markers) followed by `:`, whitespace or
//! end of line. Each act runs from its header line to the next header line
//! or the end of the text; its text is that span trimmed. Text before the
//! first header is preamble and belongs to no act.

use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::Result;
use casescript_contracts::script::ActMap;
use casescript_contracts::settings::SplitMode;
use regex::Regex;

use crate::error::PipelineError;

pub const FALLBACK_LABEL: &str = "ACT 1";

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^ACT[ \t]+([0-9]+)(?:[:\s]|$)").expect("act header pattern compiles")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Act {
    pub label: String,
    /// Byte offset of the header line (start of the span).
    pub header_start: usize,
    /// Trimmed text range.
    pub start: usize,
    pub end: usize,
    /// End of the untrimmed span (next header line or end of text).
    pub span_end: usize,
}

impl Act {
    pub fn text<'a>(&self, script: &'a str) -> &'a str {
        &script[self.start..self.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActSplit {
    pub acts: Vec<Act>,
    /// True when no header was found and the whole input became `ACT 1`.
    pub fallback: bool,
}

impl ActSplit {
    pub fn to_map(&self, script: &str) -> ActMap {
        self.acts
            .iter()
            .map(|act| (act.label.clone(), act.text(script).to_string()))
            .collect()
    }

    pub fn find(&self, label: &str) -> Option<&Act> {
        self.acts.iter().find(|act| act.label == label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.acts.iter().map(|act| act.label.clone()).collect()
    }

    /// Spans ascend, do not overlap, tile the text after the preamble, and
    /// labels are unique.
    pub fn validate(&self, script: &str) -> Result<(), String> {
        let mut seen = HashSet::new();
        let mut cursor: Option<usize> = None;
        for act in &self.acts {
            if !seen.insert(act.label.as_str()) {
                return Err(format!("duplicate act label {}", act.label));
            }
            if let Some(previous_end) = cursor {
                if act.header_start != previous_end {
                    return Err(format!("gap or overlap before {}", act.label));
                }
            }
            if !(act.header_start <= act.start
                && act.start <= act.end
                && act.end <= act.span_end
                && act.span_end <= script.len())
            {
                return Err(format!("inconsistent span for {}", act.label));
            }
            cursor = Some(act.span_end);
        }
        if let Some(last_end) = cursor {
            if last_end != script.len() {
                return Err("last act does not reach the end of the script".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderLine {
    WellFormed(String),
    Malformed,
    NotHeader,
}

pub fn classify_line(line: &str) -> HeaderLine {
    let stripped = line
        .trim_start()
        .trim_start_matches(['#', '*'])
        .trim_start();
    if let Some(caps) = header_re().captures(stripped) {
        return HeaderLine::WellFormed(format!("ACT {}", &caps[1]));
    }
    match stripped.strip_prefix("ACT") {
        Some(rest) if rest.chars().next().map_or(true, |ch| !ch.is_alphanumeric()) => {
            HeaderLine::Malformed
        }
        _ => HeaderLine::NotHeader,
    }
}

/// Splits `script` into acts. See the module docs for the header grammar.
///
/// Strict mode rejects malformed headers and duplicate labels; lenient mode
/// gives those acts a synthetic `ACT_<n>` label, `n` being the act's
/// 1-based position.
pub fn split_acts(script: &str, mode: SplitMode) -> Result<ActSplit> {
    let mut headers: Vec<(usize, Option<String>, usize)> = Vec::new();
    let mut offset = 0;
    for (line_idx, line) in script.split_inclusive('\n').enumerate() {
        match classify_line(line) {
            HeaderLine::WellFormed(label) => headers.push((offset, Some(label), line_idx + 1)),
            HeaderLine::Malformed => match mode {
                SplitMode::Strict => {
                    return Err(PipelineError::MalformedActHeader {
                        line: line_idx + 1,
                        text: line.trim().to_string(),
                    }
                    .into())
                }
                SplitMode::Lenient => headers.push((offset, None, line_idx + 1)),
            },
            HeaderLine::NotHeader => {}
        }
        offset += line.len();
    }

    if headers.is_empty() {
        return Ok(ActSplit {
            acts: vec![Act {
                label: FALLBACK_LABEL.to_string(),
                header_start: 0,
                start: 0,
                end: script.len(),
                span_end: script.len(),
            }],
            fallback: true,
        });
    }

    let mut seen = HashSet::new();
    let mut acts = Vec::with_capacity(headers.len());
    for (position, (header_start, label, _)) in headers.iter().enumerate() {
        let span_end = headers
            .get(position + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(script.len());
        let synthetic = format!("ACT_{}", position + 1);
        let label = match label {
            Some(label) if seen.contains(label) => match mode {
                SplitMode::Strict => {
                    return Err(PipelineError::DuplicateActLabel {
                        label: label.clone(),
                    }
                    .into())
                }
                SplitMode::Lenient => synthetic,
            },
            Some(label) => label.clone(),
            None => synthetic,
        };
        seen.insert(label.clone());

        let span = &script[*header_start..span_end];
        let leading = span.len() - span.trim_start().len();
        let trimmed_len = span.trim().len();
        acts.push(Act {
            label,
            header_start: *header_start,
            start: header_start + leading,
            end: header_start + leading + trimmed_len,
            span_end,
        });
    }

    Ok(ActSplit {
        acts,
        fallback: false,
    })
}
