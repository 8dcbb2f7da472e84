//! Notes: the demo app served by `busker demo`.
//!
//! Keeps an in-memory list of notes, runs helper shell commands under the
//! call timeout, and exports notes as a file for out-of-band download.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{bail, Context};
use busker::state::CommandRecord;
use busker::{App, AppMetadata, Args, CallContext, CommandHistory, FileHandle, SharedLog, ToolDef};

pub struct NotesApp {
    notes: SharedLog<String>,
    history: CommandHistory,
}

impl Default for NotesApp {
    fn default() -> Self {
        Self::new()
    }
}

impl NotesApp {
    pub fn new() -> Self {
        Self {
            notes: SharedLog::new(),
            history: CommandHistory::new(),
        }
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes.snapshot()
    }

    pub fn history(&self) -> Vec<CommandRecord> {
        self.history.snapshot()
    }
}

impl App for NotesApp {
    fn metadata(&self) -> AppMetadata {
        AppMetadata::new("Notes", "Keeps notes and runs small helper commands").with_icon("note")
    }

    fn tools() -> Vec<ToolDef<Self>> {
        vec![
            ToolDef::new("AddNote", "Store a note and return how many are kept")
                .icon("plus")
                .param::<String>("text")
                .hint("text", "the note body")
                .handler(add_note),
            ToolDef::new("ListNotes", "Every note, oldest first")
                .icon("list")
                .blocking_handler(list_notes),
            ToolDef::new("WordCount", "Count word occurrences across texts")
                .param::<Vec<String>>("texts")
                .param::<bool>("ignore_case")
                .hints([
                    ("ignore_case", "fold case before counting"),
                    ("texts", "the texts to count"),
                ])
                .blocking_handler(word_count),
            ToolDef::new("Average", "Arithmetic mean of some numbers")
                .param::<Vec<f64>>("values")
                .hint("values", "at least one number")
                .blocking_handler(average),
            ToolDef::new("RunCommand", "Run a shell command and return its output")
                .icon("terminal")
                .param::<String>("command")
                .hint("command", "passed to /bin/sh -c")
                .handler(run_command),
            ToolDef::new("ExportNotes", "Write all notes to a file")
                .icon("download")
                .param::<String>("filename")
                .hint("filename", "plain file name, no directories")
                .handler(export_notes),
        ]
    }
}

async fn add_note(app: Arc<NotesApp>, mut args: Args, _ctx: CallContext) -> anyhow::Result<usize> {
    let text: String = args.take("text")?;
    if text.trim().is_empty() {
        bail!("note text is empty");
    }
    Ok(app.notes.append(text))
}

fn list_notes(app: &NotesApp, _args: Args, _ctx: &CallContext) -> anyhow::Result<Vec<String>> {
    Ok(app.notes.snapshot())
}

fn word_count(
    _app: &NotesApp,
    mut args: Args,
    _ctx: &CallContext,
) -> anyhow::Result<BTreeMap<String, u64>> {
    let texts: Vec<String> = args.take("texts")?;
    let ignore_case: bool = args.take("ignore_case")?;

    let mut counts = BTreeMap::new();
    for word in texts.iter().flat_map(|t| t.split_whitespace()) {
        let word = if ignore_case {
            word.to_lowercase()
        } else {
            word.to_string()
        };
        *counts.entry(word).or_insert(0) += 1;
    }
    Ok(counts)
}

fn average(_app: &NotesApp, mut args: Args, _ctx: &CallContext) -> anyhow::Result<f64> {
    let values: Vec<f64> = args.take("values")?;
    if values.is_empty() {
        bail!("cannot average zero values");
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

async fn run_command(app: Arc<NotesApp>, mut args: Args, ctx: CallContext) -> anyhow::Result<String> {
    let command: String = args.take("command")?;
    let result = ctx.run_shell(&command).await;

    let (exit_code, timed_out, elapsed) = match &result {
        Ok(out) => (out.code(), false, out.elapsed),
        Err(e) => (None, e.is_timeout(), ctx.elapsed()),
    };
    app.history.append(CommandRecord {
        command: command.clone(),
        exit_code,
        timed_out,
        elapsed,
        at: SystemTime::now(),
    });

    let out = result?;
    if !out.success() {
        bail!(
            "`{}` exited with {:?}: {}",
            command,
            out.code(),
            out.stderr.trim()
        );
    }
    Ok(out.stdout)
}

async fn export_notes(
    app: Arc<NotesApp>,
    mut args: Args,
    ctx: CallContext,
) -> anyhow::Result<FileHandle> {
    let filename: String = args.take("filename")?;
    if filename.is_empty() || filename.contains(['/', '\\']) || filename.starts_with('.') {
        bail!("invalid file name {:?}", filename);
    }

    let mut body = app.notes.snapshot().join("\n");
    body.push('\n');
    ctx.write_file(&filename, body)
        .await
        .with_context(|| format!("writing {} under {}", filename, ctx.output_dir().display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use busker::extract;
    use busker::ValueKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn catalog_shape() {
        let app = NotesApp::new();
        let extracted = extract(&app).unwrap();
        let catalog = &extracted.catalog;

        assert_eq!(
            catalog.names().collect::<Vec<_>>(),
            vec!["AddNote", "ListNotes", "WordCount", "Average", "RunCommand", "ExportNotes"]
        );

        let wc = catalog.get("WordCount").unwrap();
        assert_eq!(wc.params[0].name, "texts");
        assert_eq!(wc.params[0].hint, "the texts to count");
        assert_eq!(wc.params[1].name, "ignore_case");
        assert_eq!(wc.returns, ValueKind::map_of(ValueKind::Integer));

        assert_eq!(catalog.get("ExportNotes").unwrap().returns, ValueKind::File);
    }
}
