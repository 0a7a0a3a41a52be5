//! The interactive loop: stream a response, parse it into edits, let the
//! user review and apply them, then go again.
//!
//! Each edit moves through `Pending -> Previewing -> {Applied, Skipped,
//! Retried, Failed}`. Edits sent back with "retry" become a revision request
//! in the same conversation.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::core::apply::WriteEngine;
use crate::core::backup::{BackupSession, latest_session, restore_session};
use crate::core::diff::DiffPreview;
use crate::core::parser::{EditSet, ParsedFileEdit, ResponseParser};
use crate::core::prompt::{build_followup_prompt, build_revision_prompt};
use crate::core::snapshot::{FileSnapshot, Snapshot};
use crate::infra::llm::{ChatMessage, ModelClient, Role, StreamError};
use crate::infra::ui::{Prompter, Styler};
use crate::infra::walk::FileWalker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditState {
    Pending,
    Previewing,
    Applied,
    Skipped,
    Retried,
    Failed(String),
}

impl EditState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditState::Pending => "pending",
            EditState::Previewing => "previewing",
            EditState::Applied => "applied",
            EditState::Skipped => "skipped",
            EditState::Retried => "retry",
            EditState::Failed(_) => "failed",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, EditState::Pending | EditState::Previewing)
    }
}

#[derive(Debug, Clone)]
pub struct RoundEdit {
    pub edit: ParsedFileEdit,
    pub state: EditState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Some edits still need a decision
    Reviewing,
    AwaitingNextRequirements,
}

/// One prompt/response cycle and the edits it produced.
#[derive(Debug)]
pub struct Round {
    pub number: usize,
    /// What the model was shown
    pub snapshot: Snapshot,
    pub response: String,
    pub edits: Vec<RoundEdit>,
}

impl Round {
    pub fn new(number: usize, snapshot: Snapshot) -> Self {
        Self {
            number,
            snapshot,
            response: String::new(),
            edits: Vec::new(),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        if self.edits.iter().all(|e| e.state.is_resolved()) {
            RoundPhase::AwaitingNextRequirements
        } else {
            RoundPhase::Reviewing
        }
    }

    fn pending(&self) -> Vec<usize> {
        self.edits
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state == EditState::Pending)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    ApplyAll,
    Review,
    Summary,
    Regenerate,
    Continue,
    Undo,
    Exit,
}

impl MenuChoice {
    pub const ALL: [MenuChoice; 7] = [
        MenuChoice::ApplyAll,
        MenuChoice::Review,
        MenuChoice::Summary,
        MenuChoice::Regenerate,
        MenuChoice::Continue,
        MenuChoice::Undo,
        MenuChoice::Exit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuChoice::ApplyAll => "Apply all edits",
            MenuChoice::Review => "Review edits one by one",
            MenuChoice::Summary => "Show diff summary",
            MenuChoice::Regenerate => "Regenerate the response",
            MenuChoice::Continue => "Continue with new requirements",
            MenuChoice::Undo => "Undo last applied batch",
            MenuChoice::Exit => "Exit",
        }
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|c| *c == self).unwrap_or(0)
    }
}

/// Per-file review answers, in menu order
const REVIEW_CHOICES: [&str; 3] = ["Apply", "Skip", "Retry (ask the model to redo it)"];

/// What the main loop does after a menu action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Menu,
    Stream,
    Exit,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub root: PathBuf,
    pub force: bool,
    pub backups: bool,
    pub context_lines: usize,
    pub quiet: bool,
    pub style: Styler,
}

pub struct Session<'a> {
    client: &'a dyn ModelClient,
    prompter: &'a mut dyn Prompter,
    walker: FileWalker,
    engine: WriteEngine,
    opts: SessionOptions,
    messages: Vec<ChatMessage>,
    round: Round,
    cancel: Arc<AtomicBool>,
}

impl<'a> Session<'a> {
    /// `messages` must already hold the first request; `snapshot` is what
    /// it was built from.
    pub fn new(
        client: &'a dyn ModelClient,
        prompter: &'a mut dyn Prompter,
        walker: FileWalker,
        opts: SessionOptions,
        snapshot: Snapshot,
        messages: Vec<ChatMessage>,
    ) -> Result<Self> {
        let engine = WriteEngine::new(&opts.root)
            .with_context(|| format!("open project root {}", opts.root.display()))?
            .with_force(opts.force);
        Ok(Self {
            client,
            prompter,
            walker,
            engine,
            opts,
            messages,
            round: Round::new(1, snapshot),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that aborts a running stream when set (e.g. from SIGINT).
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Stream, review, repeat until the user exits.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if let Err(err) = self.stream_round() {
                self.say(&self.opts.style.error(&format!("Request failed: {err}")));
            }

            loop {
                match self.menu()? {
                    Flow::Menu => continue,
                    Flow::Stream => break,
                    Flow::Exit => {
                        self.say(&self.opts.style.heading("Good day!"));
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Send the conversation and parse the streamed reply into this
    /// round's edits. On failure the round has no edits and nothing on
    /// disk was touched.
    pub fn stream_round(&mut self) -> Result<(), StreamError> {
        self.cancel.store(false, Ordering::Relaxed);
        self.round.edits.clear();
        self.round.response.clear();

        let quiet = self.opts.quiet;
        let spinner = waiting_spinner(quiet);

        let mut parser = ResponseParser::with_snapshot(&self.round.snapshot);
        let mut completed: Vec<ParsedFileEdit> = Vec::new();
        let mut first_token = true;

        let result = self.client.stream_chat(
            &self.messages,
            &mut |delta: &str| {
                if first_token {
                    spinner.finish_and_clear();
                    first_token = false;
                }
                if !quiet {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
                for edit in parser.feed(delta) {
                    tracing::debug!(path = %edit.path, "edit parsed while streaming");
                    completed.push(edit);
                }
            },
            &self.cancel,
        );
        spinner.finish_and_clear();
        if !quiet {
            println!();
        }

        let text = match result {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(%err, round = self.round.number, "round abandoned");
                return Err(err);
            }
        };
        completed.extend(parser.finish());

        let set: EditSet = completed.into_iter().collect();
        self.round.edits = set
            .into_vec()
            .into_iter()
            .map(|edit| RoundEdit {
                edit,
                state: EditState::Pending,
            })
            .collect();
        self.messages.push(ChatMessage::assistant(text.clone()));
        self.round.response = text;

        self.print_edit_list();
        Ok(())
    }

    fn menu(&mut self) -> Result<Flow> {
        let items: Vec<String> = MenuChoice::ALL.iter().map(|c| c.label().to_string()).collect();
        let default = match self.round.phase() {
            RoundPhase::Reviewing => MenuChoice::ApplyAll,
            RoundPhase::AwaitingNextRequirements => MenuChoice::Continue,
        };
        let idx = self
            .prompter
            .select("What next?", &items, default.index())?;

        match MenuChoice::ALL.get(idx).copied().unwrap_or(MenuChoice::Exit) {
            MenuChoice::ApplyAll => self.apply_all().map(|_| Flow::Menu),
            MenuChoice::Review => self.review(),
            MenuChoice::Summary => {
                self.print_summary();
                Ok(Flow::Menu)
            }
            MenuChoice::Regenerate => {
                if self.messages.last().is_some_and(|m| m.role == Role::Assistant) {
                    self.messages.pop();
                }
                Ok(Flow::Stream)
            }
            MenuChoice::Continue => self.continue_with_new_requirements(),
            MenuChoice::Undo => self.undo().map(|_| Flow::Menu),
            MenuChoice::Exit => Ok(Flow::Exit),
        }
    }

    fn begin_backup(&self) -> Result<Option<BackupSession>> {
        if !self.opts.backups {
            return Ok(None);
        }
        let session = BackupSession::begin(self.engine.root())
            .context("start backup session")?
            .with_round(self.round.number);
        Ok(Some(session))
    }

    fn finish_backup(&self, backup: Option<BackupSession>) -> Result<()> {
        if let Some(mut session) = backup {
            session.finalize().context("finalize backup session")?;
            if !session.is_empty() {
                tracing::debug!(id = session.id(), "batch recorded for undo");
            }
        }
        Ok(())
    }

    /// Apply every pending edit; non-clean ones need a confirmation.
    pub fn apply_all(&mut self) -> Result<()> {
        let pending = self.round.pending();
        if pending.is_empty() {
            self.say("Nothing left to apply.");
            return Ok(());
        }

        let mut backup = self.begin_backup()?;
        for i in pending {
            let edit = &self.round.edits[i].edit;
            if !edit.is_clean() {
                let question = format!(
                    "{} is {} ({}). Apply anyway?",
                    edit.path,
                    edit.status.as_str(),
                    describe_issues(edit)
                );
                if !self.prompter.confirm(&question, false)? {
                    self.round.edits[i].state = EditState::Skipped;
                    continue;
                }
            }
            self.apply_one(i, backup.as_mut());
        }
        self.finish_backup(backup)
    }

    fn apply_one(&mut self, i: usize, backup: Option<&mut BackupSession>) {
        let result = {
            let edit = &self.round.edits[i].edit;
            let seen = self
                .round
                .snapshot
                .get(&edit.path)
                .cloned()
                .unwrap_or_else(|| FileSnapshot::missing(edit.path.clone()));
            self.engine.apply(edit, Some(&seen), backup)
        };

        let style = self.opts.style;
        match result {
            Ok(outcome) => {
                let note = if outcome.unchanged {
                    "unchanged".to_string()
                } else if outcome.created {
                    format!("created, {} lines", outcome.lines_written)
                } else {
                    format!("{} lines", outcome.lines_written)
                };
                self.say(&format!("{} {} ({note})", style.ok("applied"), outcome.path));
                self.round.edits[i].state = EditState::Applied;
            }
            Err(err) => {
                self.say(&style.error(&err.to_string()));
                self.round.edits[i].state = EditState::Failed(err.to_string());
            }
        }
    }

    fn preview(&self, edit: &ParsedFileEdit) -> Result<DiffPreview, crate::core::apply::ApplyError> {
        let current = self.engine.read_current(&edit.path)?;
        DiffPreview::compute_with_context(
            edit,
            current.as_ref().map(|c| c.lines.as_slice()),
            self.opts.context_lines,
        )
    }

    /// Walk pending edits one at a time.
    fn review(&mut self) -> Result<Flow> {
        let pending = self.round.pending();
        if pending.is_empty() {
            self.say("No pending edits to review.");
            return Ok(Flow::Menu);
        }

        let style = self.opts.style;
        let choices: Vec<String> = REVIEW_CHOICES.iter().map(|s| s.to_string()).collect();
        let mut backup = self.begin_backup()?;

        for i in pending {
            self.round.edits[i].state = EditState::Previewing;
            let edit = self.round.edits[i].edit.clone();

            match self.preview(&edit) {
                Ok(preview) => self.say(&preview.render_styled(&style)),
                Err(err) => {
                    self.say(&style.error(&err.to_string()));
                    self.round.edits[i].state = EditState::Failed(err.to_string());
                    continue;
                }
            }
            if !edit.issues.is_empty() {
                self.say(&style.warn(&format!("warning: {}", describe_issues(&edit))));
            }

            let default = if edit.is_clean() { 0 } else { 1 };
            let prompt = format!("{} [{}]", edit.path, edit.kind.label());
            match self.prompter.select(&prompt, &choices, default)? {
                0 => self.apply_one(i, backup.as_mut()),
                1 => self.round.edits[i].state = EditState::Skipped,
                _ => self.round.edits[i].state = EditState::Retried,
            }
        }
        self.finish_backup(backup)?;

        self.request_revision()
    }

    /// Ask the model to redo edits marked for retry.
    fn request_revision(&mut self) -> Result<Flow> {
        let retried: Vec<&ParsedFileEdit> = self
            .round
            .edits
            .iter()
            .filter(|e| e.state == EditState::Retried)
            .map(|e| &e.edit)
            .collect();
        if retried.is_empty() {
            return Ok(Flow::Menu);
        }

        let question = format!("Send {} file(s) back to the model for revision?", retried.len());
        let to_revise: Vec<ParsedFileEdit> = retried.into_iter().cloned().collect();
        if !self.prompter.confirm(&question, true)? {
            return Ok(Flow::Menu);
        }
        let notes = self.prompter.input("Notes for the model (optional)")?;

        let refs: Vec<&ParsedFileEdit> = to_revise.iter().collect();
        self.messages
            .push(ChatMessage::user(build_revision_prompt(&refs, &notes)));
        Ok(Flow::Stream)
    }

    /// Start the next round with a fresh snapshot in the same conversation.
    fn continue_with_new_requirements(&mut self) -> Result<Flow> {
        let requirements = self.prompter.input("What are your new requirements?")?;
        if requirements.trim().is_empty() {
            return Ok(Flow::Menu);
        }

        let snapshot = Snapshot::scan(self.engine.root(), &self.walker)?;
        let prompt = build_followup_prompt(&snapshot, &self.round.snapshot, &requirements);
        self.messages.push(ChatMessage::user(prompt));
        self.round = Round::new(self.round.number + 1, snapshot);
        Ok(Flow::Stream)
    }

    /// Restore the most recent backup session.
    pub fn undo(&mut self) -> Result<()> {
        let root = self.engine.root().to_path_buf();
        let Some(entry) = latest_session(&root)? else {
            self.say("Nothing to undo.");
            return Ok(());
        };

        let question = format!("Undo batch {} ({} file(s))?", entry.id, entry.files);
        if !self.prompter.confirm(&question, true)? {
            return Ok(());
        }

        let report = restore_session(&root, &entry.id)?;
        let style = self.opts.style;
        for path in &report.restored {
            self.say(&format!("{} {path}", style.ok("restored")));
        }
        for path in &report.removed {
            self.say(&format!("{} {path}", style.warn("removed")));
        }

        for e in &mut self.round.edits {
            let touched = report.restored.contains(&e.edit.path) || report.removed.contains(&e.edit.path);
            if touched && e.state == EditState::Applied {
                e.state = EditState::Pending;
            }
        }
        Ok(())
    }

    fn print_edit_list(&self) {
        let style = self.opts.style;
        if self.round.edits.is_empty() {
            self.say(&style.warn("The response contained no file edits."));
            return;
        }
        self.say(&style.heading(&format!("Proposed edits ({}):", self.round.edits.len())));
        for e in &self.round.edits {
            let status = if e.edit.is_clean() {
                String::new()
            } else {
                format!(" {}", style.warn(e.edit.status.as_str()))
            };
            self.say(&format!("  {} [{}]{status}", e.edit.path, e.edit.kind.label()));
        }
    }

    /// Table of path, kind, +/- and state.
    pub fn summary_table(&self) -> String {
        #[derive(Tabled)]
        struct Row {
            #[tabled(rename = "#")]
            index: usize,
            path: String,
            kind: String,
            #[tabled(rename = "+/-")]
            delta: String,
            parsed: &'static str,
            state: &'static str,
        }

        let rows: Vec<Row> = self
            .round
            .edits
            .iter()
            .enumerate()
            .map(|(i, e)| Row {
                index: i + 1,
                path: e.edit.path.clone(),
                kind: e.edit.kind.label(),
                delta: self
                    .preview(&e.edit)
                    .map(|p| format!("+{} -{}", p.added_lines, p.removed_lines))
                    .unwrap_or_else(|_| "n/a".to_string()),
                parsed: e.edit.status.as_str(),
                state: e.state.as_str(),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }

    fn print_summary(&self) {
        if self.round.edits.is_empty() {
            self.say("No edits in this round.");
        } else {
            println!("{}", self.summary_table());
        }
    }

    fn say(&self, msg: &str) {
        if !self.opts.quiet {
            println!("{msg}");
        }
    }
}

fn describe_issues(edit: &ParsedFileEdit) -> String {
    if edit.issues.is_empty() {
        return "no details".to_string();
    }
    edit.issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn waiting_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Waiting for the model...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_indices_are_stable() {
        assert_eq!(MenuChoice::ApplyAll.index(), 0);
        assert_eq!(MenuChoice::Exit.index(), 6);
    }

    #[test]
    fn phase_follows_edit_states() {
        let mut round = Round::new(1, Snapshot::default());
        assert_eq!(round.phase(), RoundPhase::AwaitingNextRequirements);

        round.edits.push(RoundEdit {
            edit: crate::core::parser::parse_response("### FILE: a ###\nx\n### END FILE ###\n", None)
                .into_vec()
                .remove(0),
            state: EditState::Pending,
        });
        assert_eq!(round.phase(), RoundPhase::Reviewing);

        round.edits[0].state = EditState::Failed("boom".into());
        assert_eq!(round.phase(), RoundPhase::AwaitingNextRequirements);
    }
}
