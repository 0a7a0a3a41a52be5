//! Text-file I/O shared by the scanner and the write engine.
//!
//! - Binary sniffing (NUL byte in the first 8 KiB) and UTF-8 validation
//! - Line splitting that remembers each line's terminator and the EOF newline
//! - Atomic replace through a same-directory temporary file

use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use memchr::memchr;

/// Bytes inspected when deciding whether a file is binary
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Line terminator used by a text file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewlineStyle {
    Lf,
    Crlf,
}

impl NewlineStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            NewlineStyle::Lf => "\n",
            NewlineStyle::Crlf => "\r\n",
        }
    }

    /// Style of the first line break in `s`; LF when there is none.
    pub fn detect(s: &str) -> Self {
        match memchr(b'\n', s.as_bytes()) {
            Some(i) if i > 0 && s.as_bytes()[i - 1] == b'\r' => NewlineStyle::Crlf,
            _ => NewlineStyle::Lf,
        }
    }

    /// Majority style of `s`; ties go to the first line break.
    pub fn dominant(s: &str) -> Self {
        let lf_total = memchr::memchr_iter(b'\n', s.as_bytes()).count();
        let crlf = s.matches("\r\n").count();
        let lf = lf_total - crlf;
        match crlf.cmp(&lf) {
            std::cmp::Ordering::Greater => NewlineStyle::Crlf,
            std::cmp::Ordering::Less => NewlineStyle::Lf,
            std::cmp::Ordering::Equal => NewlineStyle::detect(s),
        }
    }
}

/// File text split into lines. Each line keeps its own terminator, so lines
/// an edit does not touch are written back byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLayout {
    pub lines: Vec<String>,
    /// Terminator per line; empty on a last line without EOF newline
    endings: Vec<&'static str>,
    /// Style given to inserted lines
    pub newline: NewlineStyle,
}

impl TextLayout {
    pub fn parse(text: &str) -> Self {
        let mut lines = Vec::new();
        let mut endings = Vec::new();
        for piece in text.split_inclusive('\n') {
            let (line, ending) = if let Some(l) = piece.strip_suffix("\r\n") {
                (l, "\r\n")
            } else if let Some(l) = piece.strip_suffix('\n') {
                (l, "\n")
            } else {
                (piece, "")
            };
            lines.push(line.to_string());
            endings.push(ending);
        }
        Self {
            lines,
            endings,
            newline: NewlineStyle::dominant(text),
        }
    }

    /// Layout for a file that does not exist yet: LF with a final newline.
    pub fn fresh(lines: Vec<String>) -> Self {
        let endings = vec!["\n"; lines.len()];
        Self {
            lines,
            endings,
            newline: NewlineStyle::Lf,
        }
    }

    pub fn trailing_newline(&self) -> bool {
        self.endings.last().is_none_or(|e| !e.is_empty())
    }

    /// Replace the 0-based line range `range` with `new`.
    ///
    /// Lines outside the range keep their terminators. Inserted lines use
    /// the dominant style, and a missing EOF newline stays missing.
    pub fn replace_range(&self, range: Range<usize>, new: Vec<String>) -> Self {
        let nl = self.newline.as_str();
        // An empty file has no EOF newline to preserve; new content gets one
        let eof_newline = self.trailing_newline();

        let mut lines = Vec::with_capacity(self.lines.len() - range.len() + new.len());
        let mut endings = Vec::with_capacity(lines.capacity());

        lines.extend_from_slice(&self.lines[..range.start]);
        endings.extend_from_slice(&self.endings[..range.start]);
        // The old last line now has lines after it
        if let Some(last) = endings.last_mut()
            && last.is_empty()
        {
            *last = nl;
        }

        endings.extend(std::iter::repeat_n(nl, new.len()));
        lines.extend(new);

        lines.extend_from_slice(&self.lines[range.end..]);
        endings.extend_from_slice(&self.endings[range.end..]);

        if !eof_newline && let Some(last) = endings.last_mut() {
            *last = "";
        }

        Self {
            lines,
            endings,
            newline: self.newline,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (line, ending) in self.lines.iter().zip(&self.endings) {
            out.push_str(line);
            out.push_str(ending);
        }
        out
    }
}

/// True when the leading bytes contain a NUL byte.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    memchr(0, head).is_some()
}

/// Read a file as UTF-8 text. Binary and non-UTF-8 files yield `Ok(None)`.
pub fn read_text_file(path: &Path) -> Result<Option<String>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if looks_binary(&bytes) {
        return Ok(None);
    }
    Ok(String::from_utf8(bytes).ok())
}

/// Atomic write with a same-directory temp file.
///
/// The destination either keeps its old bytes or holds all of `data`;
/// a failure at any step leaves it untouched.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    // Preserve original permissions; new files get the usual 0644
    #[cfg(unix)]
    let perms = Some(
        fs::metadata(path)
            .map(|m| m.permissions())
            .unwrap_or_else(|_| std::os::unix::fs::PermissionsExt::from_mode(0o644)),
    );
    #[cfg(not(unix))]
    let perms = fs::metadata(path).map(|m| m.permissions()).ok();

    let mut tmp = tempfile::Builder::new()
        .prefix(".arcode-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;

    if let Some(perms) = perms {
        fs::set_permissions(tmp.path(), perms)?;
    }

    // Rename over the destination; the temp file is removed on error
    tmp.persist(path).map_err(|e| e.error)?;

    // fsync parent dir so the rename survives a crash
    #[cfg(unix)]
    {
        if let Ok(parent) = fs::File::open(dir) {
            let _ = parent.sync_all();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_round_trips_crlf_and_eof() {
        for text in ["a\r\nb\r\n", "a\nb", "a\n\n", "", "single"] {
            assert_eq!(TextLayout::parse(text).render(), text, "text: {text:?}");
        }
    }

    #[test]
    fn empty_file_gains_trailing_newline() {
        let layout = TextLayout::parse("");
        let next = layout.replace_range(0..0, vec!["x".into()]);
        assert_eq!(next.render(), "x\n");
    }

    #[test]
    fn mixed_endings_outside_the_range_are_kept() {
        let layout = TextLayout::parse("a\r\nb\nc\nd\n");
        assert_eq!(layout.newline, NewlineStyle::Lf);

        let next = layout.replace_range(3..4, vec!["D".into()]);
        assert_eq!(next.render(), "a\r\nb\nc\nD\n");

        let next = layout.replace_range(1..2, vec!["B".into(), "B2".into()]);
        assert_eq!(next.render(), "a\r\nB\nB2\nc\nd\n");
    }

    #[test]
    fn append_after_missing_eof_newline() {
        let layout = TextLayout::parse("one\r\ntwo");
        assert_eq!(layout.newline, NewlineStyle::Crlf);
        let next = layout.replace_range(2..2, vec!["three".into()]);
        assert_eq!(next.render(), "one\r\ntwo\r\nthree");
    }

    #[test]
    fn dominant_style_counts_breaks() {
        assert_eq!(NewlineStyle::dominant("a\nb\r\nc\r\n"), NewlineStyle::Crlf);
        assert_eq!(NewlineStyle::dominant("a\r\nb\nc\n"), NewlineStyle::Lf);
        assert_eq!(NewlineStyle::dominant("a\r\nb\n"), NewlineStyle::Crlf);
        assert_eq!(NewlineStyle::dominant("none"), NewlineStyle::Lf);
    }

    #[test]
    fn binary_detection() {
        assert!(looks_binary(b"abc\0def"));
        assert!(!looks_binary("plain text\n".as_bytes()));
    }

    #[test]
    fn write_atomic_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new contents").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new contents");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".arcode-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn write_atomic_modes() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let fresh = dir.path().join("new.txt");
        write_atomic(&fresh, b"x")?;
        assert_eq!(fs::metadata(&fresh)?.permissions().mode() & 0o777, 0o644);

        let script = dir.path().join("run.sh");
        fs::write(&script, "old")?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
        write_atomic(&script, b"new")?;
        assert_eq!(fs::metadata(&script)?.permissions().mode() & 0o777, 0o755);
        Ok(())
    }

    #[test]
    fn read_text_file_skips_binary() -> Result<()> {
        let dir = tempdir()?;
        let bin = dir.path().join("x.bin");
        fs::write(&bin, [0u8, 1, 2, 3])?;
        assert_eq!(read_text_file(&bin)?, None);

        let txt = dir.path().join("x.txt");
        fs::write(&txt, "hi\n")?;
        assert_eq!(read_text_file(&txt)?, Some("hi\n".to_string()));
        Ok(())
    }
}
