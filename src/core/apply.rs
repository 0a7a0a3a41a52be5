//! Writing approved edits to disk.
//!
//! Every write is confined to the project root, re-checks the file against
//! what the model saw, keeps the file's newline conventions, records the
//! original in the backup session, and lands through an atomic rename.

use std::fs;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use crate::core::backup::BackupSession;
use crate::core::parser::{EditKind, ParsedFileEdit};
use crate::core::snapshot::{FileSnapshot, generate_cid};
use crate::infra::io::{TextLayout, looks_binary, write_atomic};

/// Top-level directories no edit may write into
const RESERVED_DIRS: &[&str] = &[".git", ".arcode"];

/// Per-file apply failures. The file is left untouched in every case.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("{path}: lines {start}-{end} are outside the file ({line_count} lines)")]
    OutOfRange {
        path: String,
        start: usize,
        end: usize,
        line_count: usize,
    },

    #[error("{path}: path escapes the project root")]
    PathTraversalRejected { path: String },

    #[error("{path}: refusing to write inside {dir}/")]
    ReservedPath { path: String, dir: String },

    #[error("{path}: file changed since it was sent to the model (use --force to apply anyway)")]
    Drift { path: String },

    #[error("{path}: write failed: {source}")]
    WriteFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: could not back up the original: {reason}")]
    BackupFailed { path: String, reason: String },
}

impl ApplyError {
    fn write(path: &str, source: std::io::Error) -> Self {
        ApplyError::WriteFailure {
            path: path.to_string(),
            source,
        }
    }
}

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub path: String,
    pub created: bool,
    /// Content already matched; nothing was written
    pub unchanged: bool,
    pub lines_written: usize,
    pub bytes_written: usize,
}

/// Check that `kind` fits a file of `line_count` lines.
pub fn validate_range(path: &str, kind: EditKind, line_count: usize) -> Result<(), ApplyError> {
    match kind {
        EditKind::MidFileSplice {
            start_line,
            end_line,
        } if start_line == 0 || start_line > end_line || end_line > line_count => {
            Err(ApplyError::OutOfRange {
                path: path.to_string(),
                start: start_line,
                end: end_line,
                line_count,
            })
        }
        _ => Ok(()),
    }
}

/// Replace lines `start..=end` (1-based) with `new`, keeping everything
/// before and after.
pub fn splice_lines(
    path: &str,
    lines: &[String],
    start: usize,
    end: usize,
    new: &[String],
) -> Result<Vec<String>, ApplyError> {
    validate_range(
        path,
        EditKind::MidFileSplice {
            start_line: start,
            end_line: end,
        },
        lines.len(),
    )?;

    let mut out = Vec::with_capacity(lines.len() - (end - start + 1) + new.len());
    out.extend_from_slice(&lines[..start - 1]);
    out.extend_from_slice(new);
    out.extend_from_slice(&lines[end..]);
    Ok(out)
}

/// 0-based range of existing lines that `kind` replaces.
fn target_range(kind: EditKind, line_count: usize) -> Range<usize> {
    match kind {
        EditKind::FullReplace => 0..line_count,
        EditKind::MidFileSplice {
            start_line,
            end_line,
        } => start_line - 1..end_line,
        EditKind::Append => line_count..line_count,
    }
}

#[derive(Debug, Clone)]
pub struct WriteEngine {
    root: PathBuf,
    force: bool,
}

impl WriteEngine {
    /// Engine confined to `root`, which must exist.
    pub fn new(root: &Path) -> std::io::Result<Self> {
        Ok(Self {
            root: dunce::canonicalize(root)?,
            force: false,
        })
    }

    /// Apply partial edits even when the file drifted.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute target for a root-relative path, refusing anything that
    /// would land outside the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, ApplyError> {
        let reject = || ApplyError::PathTraversalRejected {
            path: rel.to_string(),
        };

        let p = Path::new(rel);
        if rel.is_empty() || p.is_absolute() || p.has_root() {
            return Err(reject());
        }
        let mut first = true;
        for c in p.components() {
            match c {
                Component::Normal(s) => {
                    let name = s.to_string_lossy();
                    // `C:` style drive prefixes on non-Windows hosts
                    if first && name.ends_with(':') {
                        return Err(reject());
                    }
                    if first
                        && let Some(dir) = RESERVED_DIRS.iter().find(|d| name.eq_ignore_ascii_case(d))
                    {
                        return Err(ApplyError::ReservedPath {
                            path: rel.to_string(),
                            dir: dir.to_string(),
                        });
                    }
                    first = false;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(reject());
                }
            }
        }

        let target = self.root.join(p);

        // Symlinks anywhere on the way must not lead out of the root
        let mut probe = target.as_path();
        loop {
            if fs::symlink_metadata(probe).is_ok() {
                let real = dunce::canonicalize(probe).map_err(|_| reject())?;
                if !real.starts_with(&self.root) {
                    tracing::warn!(path = rel, real = %real.display(), "symlink escape rejected");
                    return Err(reject());
                }
                break;
            }
            match probe.parent() {
                Some(parent) => probe = parent,
                None => return Err(reject()),
            }
        }

        Ok(target)
    }

    /// Current text of `rel`, or `None` when the file does not exist.
    pub fn read_current(&self, rel: &str) -> Result<Option<TextLayout>, ApplyError> {
        let target = self.resolve(rel)?;
        read_layout(rel, &target)
    }

    /// Apply one edit.
    ///
    /// `seen` is the snapshot entry the model was shown, used for the drift
    /// check. `backup` receives the original before anything is written.
    #[tracing::instrument(skip_all, fields(path = %edit.path, kind = %edit.kind.label()))]
    pub fn apply(
        &self,
        edit: &ParsedFileEdit,
        seen: Option<&FileSnapshot>,
        backup: Option<&mut BackupSession>,
    ) -> Result<ApplyOutcome, ApplyError> {
        let rel = edit.path.as_str();
        let target = self.resolve(rel)?;
        let current = read_layout(rel, &target)?;

        if let Some(seen) = seen {
            let now_cid = generate_cid(&current.as_ref().map(TextLayout::render).unwrap_or_default());
            let drifted = seen.exists != current.is_some() || seen.cid != now_cid;
            if drifted {
                match edit.kind {
                    EditKind::FullReplace => {
                        tracing::warn!(path = rel, "file changed since snapshot; replacing anyway")
                    }
                    _ if self.force => {
                        tracing::warn!(path = rel, "file changed since snapshot; forced")
                    }
                    _ => return Err(ApplyError::Drift { path: rel.to_string() }),
                }
            }
        }

        let line_count = current.as_ref().map_or(0, |l| l.lines.len());
        validate_range(rel, edit.kind, line_count)?;
        let range = target_range(edit.kind, line_count);

        let next = match &current {
            Some(layout) => layout.replace_range(range, edit.new_content.clone()),
            None => TextLayout::fresh(edit.new_content.clone()),
        };
        let text = next.render();
        let created = current.is_none();

        let outcome = ApplyOutcome {
            path: rel.to_string(),
            created,
            unchanged: false,
            lines_written: next.lines.len(),
            bytes_written: text.len(),
        };

        if current.as_ref().is_some_and(|c| c.render() == text) {
            tracing::debug!(path = rel, "content unchanged; skipping write");
            return Ok(ApplyOutcome {
                unchanged: true,
                bytes_written: 0,
                ..outcome
            });
        }

        if let Some(session) = backup {
            session
                .record(rel, !created)
                .map_err(|e| ApplyError::BackupFailed {
                    path: rel.to_string(),
                    reason: format!("{e:#}"),
                })?;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ApplyError::write(rel, e))?;
        }
        write_atomic(&target, text.as_bytes()).map_err(|e| ApplyError::write(rel, e))?;

        tracing::info!(
            path = rel,
            created,
            lines = outcome.lines_written,
            bytes = outcome.bytes_written,
            "file written"
        );
        Ok(outcome)
    }
}

fn read_layout(rel: &str, target: &Path) -> Result<Option<TextLayout>, ApplyError> {
    let bytes = match fs::read(target) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ApplyError::write(rel, e)),
    };
    if looks_binary(&bytes) {
        return Err(ApplyError::write(
            rel,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "refusing to edit a binary file"),
        ));
    }
    let text = String::from_utf8(bytes).map_err(|e| {
        ApplyError::write(rel, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    Ok(Some(TextLayout::parse(&text)))
}
