//! Paragraph-per-line DOCX writer and the matching reader.
//!
//! Each `\n`-separated script line becomes one unstyled paragraph. Inside a
//! line, tabs become `w:tab` elements, a trailing `\r` is dropped (CRLF
//! input) and other C0 control characters are dropped, since XML 1.0
//! cannot carry them. Everything else round-trips unchanged.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use docx_rs::{read_docx, DocumentChild, Docx, Paragraph, ParagraphChild, Run, RunChild};

fn line_paragraph(line: &str) -> Paragraph {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let paragraph = Paragraph::new();
    if line.is_empty() {
        return paragraph;
    }
    let mut run = Run::new();
    for (idx, segment) in line.split('\t').enumerate() {
        if idx > 0 {
            run = run.add_tab();
        }
        let text: String = segment
            .chars()
            .filter(|ch| (*ch as u32) >= 0x20)
            .collect();
        if !text.is_empty() {
            run = run.add_text(text);
        }
    }
    paragraph.add_run(run)
}

/// Writes `script` to `path` and returns the paragraph count.
pub fn export_docx(script: &str, path: &Path) -> Result<usize> {
    let lines: Vec<&str> = script.split('\n').collect();
    let docx = lines
        .iter()
        .fold(Docx::new(), |docx, line| docx.add_paragraph(line_paragraph(line)));
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    docx.build()
        .pack(file)
        .map_err(|err| anyhow!("failed to write {}: {err}", path.display()))?;
    Ok(lines.len())
}

fn run_text(run: &Run) -> String {
    let mut text = String::new();
    for child in &run.children {
        match child {
            RunChild::Text(part) => text.push_str(&part.text),
            RunChild::Tab(_) => text.push('\t'),
            _ => {}
        }
    }
    text
}

/// Paragraph texts of a DOCX file, in document order.
pub fn read_docx_paragraphs(path: &Path) -> Result<Vec<String>> {
    let bytes = fs::read(path).with_context(|| format!("failed to open {}", path.display()))?;
    let docx = read_docx(&bytes)
        .map_err(|err| anyhow!("{} is not a readable DOCX package: {err}", path.display()))?;
    Ok(docx
        .document
        .children
        .iter()
        .filter_map(|child| match child {
            DocumentChild::Paragraph(paragraph) => Some(
                paragraph
                    .children
                    .iter()
                    .filter_map(|child| match child {
                        ParagraphChild::Run(run) => Some(run_text(run)),
                        _ => None,
                    })
                    .collect::<String>(),
            ),
            _ => None,
        })
        .collect())
}
