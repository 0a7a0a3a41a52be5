//! Streaming parser that turns model output into per-file edits.
//!
//! The parser is an explicit two-state machine over complete lines:
//!
//! ```text
//!   Idle --start marker--> InFile --end marker--> Idle   (emit Complete)
//!                          InFile --start marker--> InFile (emit Malformed)
//!                          InFile --end of stream--> Idle  (emit Incomplete)
//! ```
//!
//! Text arrives in arbitrary chunks. Only complete lines are tokenized; the
//! trailing partial line waits in a buffer, so any chunking of the same
//! text produces the same edits.

use indexmap::IndexMap;
use memchr::memchr;

use crate::core::marker::{
    EditMarker, MarkerRole, RangeSpec, classify_line, companion_hint, interpret_hint,
    strip_outer_fence,
};
use crate::core::snapshot::Snapshot;

/// Recoverable problems found while parsing. They are attached to the
/// affected edit and never abort a round.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIssue {
    #[error("block for {path} was not closed before the response ended")]
    UnterminatedBlock { path: String },

    #[error("range hint {hint:?} for {path} is not a valid line range; treating as a full replacement")]
    MalformedRangeHint { path: String, hint: String },

    #[error("unrecognized edit kind {hint:?} for {path}; treating as a full replacement")]
    UnknownMarkerKind { path: String, hint: String },

    #[error("block for {path} was cut short by a new file marker on response line {line}")]
    NestedStartMarker { path: String, line: usize },

    #[error("end marker names {found} but the open block is {path}")]
    MismatchedEndMarker { path: String, found: String },
}

/// How the new content is placed into the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// The content is the whole file
    FullReplace,
    /// Replace lines `start_line..=end_line` (1-based, inclusive)
    MidFileSplice { start_line: usize, end_line: usize },
    /// Add the content after the last existing line
    Append,
}

impl EditKind {
    pub fn label(&self) -> String {
        match self {
            EditKind::FullReplace => "full".to_string(),
            EditKind::MidFileSplice {
                start_line,
                end_line,
            } => format!("lines {start_line}-{end_line}"),
            EditKind::Append => "append".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Complete,
    Malformed,
    Incomplete,
}

impl BlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockStatus::Complete => "complete",
            BlockStatus::Malformed => "malformed",
            BlockStatus::Incomplete => "incomplete",
        }
    }
}

/// One proposed file edit extracted from the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileEdit {
    pub path: String,
    pub kind: EditKind,
    pub new_content: Vec<String>,
    pub status: BlockStatus,
    pub issues: Vec<ParseIssue>,
}

impl ParsedFileEdit {
    /// Complete blocks are safe to apply without asking again.
    pub fn is_clean(&self) -> bool {
        self.status == BlockStatus::Complete
    }
}

#[derive(Debug)]
struct OpenBlock {
    path: String,
    kind: EditKind,
    body: Vec<String>,
    issues: Vec<ParseIssue>,
    malformed: bool,
    /// True until the first body line; that line may carry the range hint
    awaiting_hint: bool,
}

impl OpenBlock {
    fn new(path: String, hint: Option<&str>) -> Self {
        let mut block = Self {
            path,
            kind: EditKind::FullReplace,
            body: Vec::new(),
            issues: Vec::new(),
            malformed: false,
            awaiting_hint: hint.is_none(),
        };
        if let Some(hint) = hint {
            block.apply_hint(hint);
        }
        block
    }

    fn apply_hint(&mut self, hint: &str) {
        match interpret_hint(hint) {
            RangeSpec::Full => self.kind = EditKind::FullReplace,
            RangeSpec::Append => self.kind = EditKind::Append,
            RangeSpec::Lines { start, end } => {
                self.kind = EditKind::MidFileSplice {
                    start_line: start,
                    end_line: end,
                }
            }
            RangeSpec::Malformed(hint) => {
                tracing::warn!(path = %self.path, %hint, "malformed range hint");
                self.kind = EditKind::FullReplace;
                self.malformed = true;
                self.issues.push(ParseIssue::MalformedRangeHint {
                    path: self.path.clone(),
                    hint,
                });
            }
            RangeSpec::Unknown(hint) => {
                tracing::warn!(path = %self.path, %hint, "unknown edit kind");
                self.kind = EditKind::FullReplace;
                self.issues.push(ParseIssue::UnknownMarkerKind {
                    path: self.path.clone(),
                    hint,
                });
            }
        }
    }

    fn close(self, status: BlockStatus) -> ParsedFileEdit {
        let status = match status {
            BlockStatus::Complete if self.malformed => BlockStatus::Malformed,
            other => other,
        };
        tracing::debug!(
            path = %self.path,
            status = status.as_str(),
            lines = self.body.len(),
            "block closed"
        );
        ParsedFileEdit {
            path: self.path,
            kind: self.kind,
            new_content: strip_outer_fence(self.body),
            status,
            issues: self.issues,
        }
    }
}

#[derive(Debug, Default)]
enum ScanState {
    #[default]
    Idle,
    InFile(OpenBlock),
}

/// Incremental response parser.
#[derive(Debug, Default)]
pub struct ResponseParser<'a> {
    state: ScanState,
    /// Trailing text not yet terminated by a newline
    pending: String,
    /// 1-based number of the last line processed
    line_no: usize,
    snapshot: Option<&'a Snapshot>,
}

impl<'a> ResponseParser<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile paths against existing files, so `src/main.PY` in the
    /// response maps onto `src/main.py` on disk.
    pub fn with_snapshot(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Self::default()
        }
    }

    /// Append a chunk and return every block it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParsedFileEdit> {
        self.pending.push_str(chunk);

        let mut out = Vec::new();
        let mut consumed = 0;
        while let Some(nl) = memchr(b'\n', &self.pending.as_bytes()[consumed..]) {
            let end = consumed + nl;
            let line = self.pending[consumed..end].trim_end_matches('\r').to_string();
            consumed = end + 1;
            if let Some(edit) = self.process_line(&line) {
                out.push(edit);
            }
        }
        self.pending.drain(..consumed);
        out
    }

    /// End of stream: flush the partial last line and close any open block
    /// as `Incomplete`.
    pub fn finish(mut self) -> Vec<ParsedFileEdit> {
        let mut out = Vec::new();

        let tail = std::mem::take(&mut self.pending);
        if !tail.is_empty()
            && let Some(edit) = self.process_line(tail.trim_end_matches('\r'))
        {
            out.push(edit);
        }

        if let ScanState::InFile(mut block) = std::mem::take(&mut self.state) {
            tracing::warn!(path = %block.path, "response ended inside a file block");
            block.issues.push(ParseIssue::UnterminatedBlock {
                path: block.path.clone(),
            });
            out.push(block.close(BlockStatus::Incomplete));
        }
        out
    }

    fn resolve_path(&self, raw: &str) -> Option<String> {
        let normalized = normalize_path(raw);
        if normalized.is_empty() {
            return None;
        }
        let resolved = self
            .snapshot
            .and_then(|s| s.resolve(&normalized))
            .map(str::to_string);
        Some(resolved.unwrap_or(normalized))
    }

    fn process_line(&mut self, line: &str) -> Option<ParsedFileEdit> {
        self.line_no += 1;
        let marker = classify_line(line);

        match std::mem::take(&mut self.state) {
            ScanState::Idle => {
                if let Some(EditMarker {
                    role: MarkerRole::Start,
                    path: Some(raw),
                    range_hint,
                    ..
                }) = marker
                {
                    self.open(&raw, range_hint.as_deref());
                } else if marker.is_some() {
                    tracing::debug!(line = self.line_no, "end marker outside a block ignored");
                }
                None
            }
            ScanState::InFile(mut block) => {
                if block.awaiting_hint {
                    block.awaiting_hint = false;
                    if marker.is_none()
                        && let Some(hint) = companion_hint(line)
                    {
                        block.apply_hint(&hint);
                        self.state = ScanState::InFile(block);
                        return None;
                    }
                }

                match marker {
                    Some(EditMarker {
                        role: MarkerRole::End,
                        path,
                        ..
                    }) => {
                        let found = path.and_then(|p| self.resolve_path(&p));
                        match found {
                            Some(found) if !found.eq_ignore_ascii_case(&block.path) => {
                                tracing::warn!(open = %block.path, %found, "mismatched end marker");
                                block.issues.push(ParseIssue::MismatchedEndMarker {
                                    path: block.path.clone(),
                                    found,
                                });
                                Some(block.close(BlockStatus::Malformed))
                            }
                            _ => Some(block.close(BlockStatus::Complete)),
                        }
                    }
                    Some(EditMarker {
                        role: MarkerRole::Start,
                        path: Some(raw),
                        range_hint,
                        ..
                    }) if self.resolve_path(&raw).is_some() => {
                        tracing::warn!(
                            open = %block.path,
                            line = self.line_no,
                            "new file marker before end marker"
                        );
                        block.issues.push(ParseIssue::NestedStartMarker {
                            path: block.path.clone(),
                            line: self.line_no,
                        });
                        let closed = block.close(BlockStatus::Malformed);
                        self.open(&raw, range_hint.as_deref());
                        Some(closed)
                    }
                    _ => {
                        block.body.push(line.to_string());
                        self.state = ScanState::InFile(block);
                        None
                    }
                }
            }
        }
    }

    fn open(&mut self, raw: &str, hint: Option<&str>) {
        let Some(path) = self.resolve_path(raw) else {
            tracing::debug!(line = self.line_no, "start marker without a usable path ignored");
            return;
        };
        tracing::debug!(%path, hint, line = self.line_no, "block opened");
        self.state = ScanState::InFile(OpenBlock::new(path, hint));
    }
}

/// The edits of one response, one per path.
///
/// A later block for the same path replaces the earlier one but keeps the
/// position where the path first appeared.
#[derive(Debug, Clone, Default)]
pub struct EditSet {
    edits: IndexMap<String, ParsedFileEdit>,
}

impl EditSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, edit: ParsedFileEdit) {
        if self.edits.contains_key(&edit.path) {
            tracing::debug!(path = %edit.path, "later block supersedes earlier one");
        }
        self.edits.insert(edit.path.clone(), edit);
    }

    pub fn get(&self, path: &str) -> Option<&ParsedFileEdit> {
        self.edits.get(path)
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParsedFileEdit> {
        self.edits.values()
    }

    pub fn into_vec(self) -> Vec<ParsedFileEdit> {
        self.edits.into_values().collect()
    }
}

impl Extend<ParsedFileEdit> for EditSet {
    fn extend<T: IntoIterator<Item = ParsedFileEdit>>(&mut self, iter: T) {
        for edit in iter {
            self.insert(edit);
        }
    }
}

impl FromIterator<ParsedFileEdit> for EditSet {
    fn from_iter<T: IntoIterator<Item = ParsedFileEdit>>(iter: T) -> Self {
        let mut set = EditSet::new();
        set.extend(iter);
        set
    }
}

/// Parse a complete response in one go.
pub fn parse_response(text: &str, snapshot: Option<&Snapshot>) -> EditSet {
    let mut parser = match snapshot {
        Some(s) => ResponseParser::with_snapshot(s),
        None => ResponseParser::new(),
    };
    let mut set: EditSet = parser.feed(text).into_iter().collect();
    set.extend(parser.finish());
    set
}

/// Normalize a path as written by the model.
///
/// Trims whitespace and quoting, converts `\` to `/`, drops `.` components
/// and repeated separators. `..` and a leading `/` are kept so the write
/// engine can reject them.
pub fn normalize_path(raw: &str) -> String {
    let s = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim()
        .replace('\\', "/");

    let absolute = s.starts_with('/');
    let joined = s
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/");

    if absolute { format!("/{joined}") } else { joined }
}
