//! Recognition of file-block delimiter lines in model output.
//!
//! Start:  `### FILE: src/main.py (lines 3-5) ###`
//! End:    `### END FILE: src/main.py ###`
//!
//! A path-less end marker must be fenced on both sides (`### END FILE ###`);
//! a bare `## End of file` heading is body text.
//!
//! Fences of `#` (2+), `-` (3+) or `=` (3+) are accepted, as are `**bold**`
//! and backtick wrapping. Keywords are case-insensitive. A range hint may
//! sit in `(...)`/`[...]` after the path or on a companion line directly
//! under the start marker (`@@ lines 3-5 @@`, `LINES: 3-5`).

use std::sync::LazyLock;

use regex::Regex;

static START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:#{2,}|-{3,}|={3,})\s*(?:\*\*|`)?\s*FILE\s*:\s*(?P<rest>.+?)\s*(?:\*\*|`)?\s*(?:#{2,}|-{3,}|={3,})?$",
    )
    .expect("start marker regex")
});

static END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:#{2,}|-{3,}|={3,})\s*(?:\*\*|`)?\s*END\s+(?:OF\s+)?FILE\b\s*(?::\s*(?P<path>.*?))?\s*(?:\*\*|`)?\s*(?P<tail>#{2,}|-{3,}|={3,})?$",
    )
    .expect("end marker regex")
});

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^l?\s*(?P<a>\d+)\s*(?:-|–|\.\.=?|\bto\b)\s*l?\s*(?P<b>\d+)$").expect("range regex")
});

static SINGLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^l?\s*(?P<a>\d+)$").expect("single line regex"));

static COMPANION_AT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@\s*(?P<hint>.+?)\s*@@$").expect("companion regex"));

static COMPANION_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:LINES|RANGE)\s*:\s*(?P<hint>.+?)$").expect("companion label regex")
});

const FULL_HINTS: &[&str] = &[
    "full",
    "full file",
    "replace-all",
    "replace all",
    "entire file",
    "whole file",
    "new file",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRole {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    FullFile,
    PartialRange,
    Append,
    Unknown,
}

/// A recognized delimiter line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditMarker {
    pub role: MarkerRole,
    pub path: Option<String>,
    pub range_hint: Option<String>,
    pub kind: MarkerKind,
}

/// Meaning of a range hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSpec {
    Full,
    /// 1-based inclusive
    Lines { start: usize, end: usize },
    Append,
    /// Not a hint we understand
    Unknown(String),
    /// Looked like a line range but was not a valid one
    Malformed(String),
}

impl RangeSpec {
    pub fn kind(&self) -> MarkerKind {
        match self {
            RangeSpec::Full => MarkerKind::FullFile,
            RangeSpec::Lines { .. } | RangeSpec::Malformed(_) => MarkerKind::PartialRange,
            RangeSpec::Append => MarkerKind::Append,
            RangeSpec::Unknown(_) => MarkerKind::Unknown,
        }
    }
}

/// Interpret a range hint such as `lines 3-5`, `L3-L5`, `append`, `full`.
pub fn interpret_hint(hint: &str) -> RangeSpec {
    let lower = hint.trim().to_lowercase();

    if FULL_HINTS.contains(&lower.as_str()) {
        return RangeSpec::Full;
    }
    if lower == "append" || lower == "append to end" {
        return RangeSpec::Append;
    }

    let mut body = lower.as_str();
    let mut labelled = false;
    for prefix in ["lines", "line", "range"] {
        if let Some(rest) = body.strip_prefix(prefix) {
            body = rest.trim_start_matches([':', ' ']).trim();
            labelled = true;
            break;
        }
    }

    if let Some(caps) = RANGE_RE.captures(body) {
        return match (caps["a"].parse::<usize>(), caps["b"].parse::<usize>()) {
            (Ok(start), Ok(end)) if start >= 1 && start <= end => RangeSpec::Lines { start, end },
            _ => RangeSpec::Malformed(hint.trim().to_string()),
        };
    }
    if let Some(caps) = SINGLE_RE.captures(body) {
        return match caps["a"].parse::<usize>() {
            Ok(n) if n >= 1 => RangeSpec::Lines { start: n, end: n },
            _ => RangeSpec::Malformed(hint.trim().to_string()),
        };
    }

    let numeric_start = body.starts_with(|c: char| c.is_ascii_digit() || c == '-');
    if labelled || numeric_start {
        RangeSpec::Malformed(hint.trim().to_string())
    } else {
        RangeSpec::Unknown(hint.trim().to_string())
    }
}

/// Peel `**...**` and single-backtick wrapping off a trimmed line.
fn unwrap_emphasis(mut s: &str) -> &str {
    loop {
        let inner = if s.len() > 4 && s.starts_with("**") && s.ends_with("**") {
            &s[2..s.len() - 2]
        } else if s.len() > 2 && s.starts_with('`') && s.ends_with('`') && !s.starts_with("```") {
            &s[1..s.len() - 1]
        } else {
            return s;
        };
        s = inner.trim();
    }
}

/// Split `path (hint)` / `path [hint]` into its parts.
fn split_hint(rest: &str) -> (&str, Option<&str>) {
    let rest = rest.trim();
    for (open, close) in [('(', ')'), ('[', ']')] {
        if rest.ends_with(close)
            && let Some(idx) = rest.rfind(open)
        {
            let hint = rest[idx + 1..rest.len() - 1].trim();
            let path = rest[..idx].trim();
            if !path.is_empty() {
                return (path, (!hint.is_empty()).then_some(hint));
            }
        }
    }
    (rest, None)
}

fn clean_path(raw: &str) -> Option<String> {
    let p = raw
        .trim()
        .trim_matches(|c: char| c == '*' || c == '`' || c == '"' || c == '\'')
        .trim();
    // A bare fence run such as `### FILE: ###` leaves no real path behind
    let has_name = p.chars().any(|c| c.is_alphanumeric() || c == '.' || c == '_');
    has_name.then(|| p.to_string())
}

/// Classify one line of model output. Returns `None` for prose and code.
pub fn classify_line(line: &str) -> Option<EditMarker> {
    let trimmed = unwrap_emphasis(line.trim());
    if trimmed.len() < 6 {
        return None;
    }

    if let Some(caps) = END_RE.captures(trimmed) {
        let path = caps.name("path").and_then(|m| clean_path(m.as_str()));
        if path.is_none() && caps.name("tail").is_none() {
            return None;
        }
        return Some(EditMarker {
            role: MarkerRole::End,
            path,
            range_hint: None,
            kind: MarkerKind::FullFile,
        });
    }

    let caps = START_RE.captures(trimmed)?;
    let (raw_path, hint) = split_hint(&caps["rest"]);
    let path = clean_path(raw_path)?;
    let kind = hint.map_or(MarkerKind::FullFile, |h| interpret_hint(h).kind());

    Some(EditMarker {
        role: MarkerRole::Start,
        path: Some(path),
        range_hint: hint.map(str::to_string),
        kind,
    })
}

/// Range hint carried on the line directly below a start marker.
pub fn companion_hint(line: &str) -> Option<String> {
    let trimmed = line.trim();
    COMPANION_AT_RE
        .captures(trimmed)
        .or_else(|| COMPANION_LABEL_RE.captures(trimmed))
        .map(|caps| caps["hint"].trim().to_string())
}

/// Opening Markdown fence: returns the fence char and run length.
fn fence_open(line: &str) -> Option<(char, usize)> {
    let t = line.trim_start();
    let ch = t.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let run = t.chars().take_while(|c| *c == ch).count();
    (run >= 3).then_some((ch, run))
}

fn is_fence_close(line: &str, ch: char, run: usize) -> bool {
    let t = line.trim();
    t.chars().count() >= run && t.chars().all(|c| c == ch)
}

/// Drop a balanced outer code fence around a block body.
///
/// Only applies when the first non-empty line opens a fence and the last
/// non-empty line closes it; otherwise the body is returned untouched.
pub fn strip_outer_fence(lines: Vec<String>) -> Vec<String> {
    let first = lines.iter().position(|l| !l.trim().is_empty());
    let last = lines.iter().rposition(|l| !l.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return lines;
    };
    if first >= last {
        return lines;
    }
    let Some((ch, run)) = fence_open(&lines[first]) else {
        return lines;
    };
    if !is_fence_close(&lines[last], ch, run) {
        return lines;
    }
    lines
        .into_iter()
        .skip(first + 1)
        .take(last - first - 1)
        .collect()
}
