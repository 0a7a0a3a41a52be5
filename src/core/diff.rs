//! Line-level previews of proposed edits.

use std::fmt::Write as _;

use similar::{Algorithm, ChangeTag, TextDiff};

use crate::core::apply::{ApplyError, validate_range};
use crate::core::parser::{EditKind, ParsedFileEdit};
use crate::infra::ui::Styler;

/// Context lines around each hunk unless configured otherwise
pub const DEFAULT_CONTEXT: usize = 3;

/// A hunk of changes, numbered against the whole file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize, // 1-based line number in old file
    pub old_count: usize,
    pub new_start: usize, // 1-based line number in new file
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

impl Hunk {
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }
}

/// What applying an edit would change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffPreview {
    pub path: String,
    pub added_lines: usize,
    pub removed_lines: usize,
    pub hunks: Vec<Hunk>,
    pub is_new_file: bool,
}

impl DiffPreview {
    /// Diff `edit` against the file's current lines (`None` when the file
    /// does not exist).
    pub fn compute(edit: &ParsedFileEdit, current: Option<&[String]>) -> Result<Self, ApplyError> {
        Self::compute_with_context(edit, current, DEFAULT_CONTEXT)
    }

    pub fn compute_with_context(
        edit: &ParsedFileEdit,
        current: Option<&[String]>,
        context: usize,
    ) -> Result<Self, ApplyError> {
        let existing = current.unwrap_or(&[]);
        validate_range(&edit.path, edit.kind, existing.len())?;

        // Slice of the old file being compared, and its line offset
        let (old, offset): (&[String], usize) = match edit.kind {
            EditKind::FullReplace => (existing, 0),
            EditKind::MidFileSplice {
                start_line,
                end_line,
            } => (&existing[start_line - 1..end_line], start_line - 1),
            EditKind::Append => (&[], existing.len()),
        };

        let hunks = diff_lines(old, &edit.new_content, offset, context);
        let (added_lines, removed_lines) = hunks
            .iter()
            .flat_map(|h| &h.lines)
            .fold((0, 0), |(a, r), l| match l {
                HunkLine::Add(_) => (a + 1, r),
                HunkLine::Remove(_) => (a, r + 1),
                HunkLine::Context(_) => (a, r),
            });

        Ok(Self {
            path: edit.path.clone(),
            added_lines,
            removed_lines,
            hunks,
            is_new_file: current.is_none(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Unified-diff text.
    pub fn render(&self) -> String {
        self.render_styled(&Styler::plain())
    }

    /// Unified-diff text, colored when `style` is enabled.
    pub fn render_styled(&self, style: &Styler) -> String {
        let mut out = String::new();
        let old_name = if self.is_new_file {
            "/dev/null".to_string()
        } else {
            format!("a/{}", self.path)
        };
        let _ = writeln!(out, "{}", style.heading(&format!("--- {old_name}")));
        let _ = writeln!(out, "{}", style.heading(&format!("+++ b/{}", self.path)));

        if self.hunks.is_empty() {
            let _ = writeln!(out, "{}", style.dim("(no changes)"));
            return out;
        }

        for hunk in &self.hunks {
            let _ = writeln!(out, "{}", style.dim(&hunk.header()));
            for line in &hunk.lines {
                let _ = match line {
                    HunkLine::Context(s) => writeln!(out, " {s}"),
                    HunkLine::Remove(s) => writeln!(out, "{}", style.error(&format!("-{s}"))),
                    HunkLine::Add(s) => writeln!(out, "{}", style.ok(&format!("+{s}"))),
                };
            }
        }
        out
    }
}

/// LCS line diff of `old` vs `new`, grouped into hunks. Line numbers are
/// shifted by `offset` so they refer to the whole file.
fn diff_lines(old: &[String], new: &[String], offset: usize, context: usize) -> Vec<Hunk> {
    let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
    let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Lcs)
        .diff_slices(&old_refs, &new_refs);

    diff.grouped_ops(context)
        .iter()
        .filter_map(|group| {
            let first = group.first()?;
            let last = group.last()?;
            let old_range = first.old_range().start..last.old_range().end;
            let new_range = first.new_range().start..last.new_range().end;

            let lines = group
                .iter()
                .flat_map(|op| diff.iter_changes(op))
                .map(|change| {
                    let text = change.value().to_string();
                    match change.tag() {
                        ChangeTag::Equal => HunkLine::Context(text),
                        ChangeTag::Delete => HunkLine::Remove(text),
                        ChangeTag::Insert => HunkLine::Add(text),
                    }
                })
                .collect();

            // Unified diff numbers an empty side by the line before it
            let start = |r: &std::ops::Range<usize>| {
                offset + if r.is_empty() { r.start } else { r.start + 1 }
            };

            Some(Hunk {
                old_start: start(&old_range),
                old_count: old_range.len(),
                new_start: start(&new_range),
                new_count: new_range.len(),
                lines,
            })
        })
        .collect()
}
