//! Point-in-time capture of the project's text files.
//!
//! A [`Snapshot`] is taken at the start of every round. It is what the
//! model sees, and what the write engine compares against to detect drift.

use std::collections::HashMap;
use std::path::{Component, Path};

use anyhow::Result;
use indexmap::IndexMap;
use rayon::prelude::*;

use crate::infra::io::read_text_file;
use crate::infra::walk::FileWalker;

/// Content hash type for drift detection
pub type ContentId = String;

/// Normalize content for content-id generation.
///
/// Trailing whitespace and line-ending style do not count as drift.
pub fn normalize_for_cid(s: &str) -> String {
    s.lines()
        .map(|l| l.trim_end_matches([' ', '\t', '\r']))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic content id: xxh64 of the normalized text, fixed seed.
pub fn generate_cid(content: &str) -> ContentId {
    let normalized = normalize_for_cid(content);
    let h = xxhash_rust::xxh64::xxh64(normalized.as_bytes(), 0);
    format!("{h:016x}")
}

/// One file as the model saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Root-relative path with `/` separators
    pub path: String,
    pub lines: Vec<String>,
    pub exists: bool,
    pub cid: ContentId,
}

impl FileSnapshot {
    pub fn from_text(path: impl Into<String>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_string).collect(),
            exists: true,
            cid: generate_cid(text),
        }
    }

    /// Placeholder for a path that is not on disk.
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lines: Vec::new(),
            exists: false,
            cid: generate_cid(""),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}

/// Ordered set of file snapshots for one round.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    files: IndexMap<String, FileSnapshot>,

    /// Lowercased path -> canonical path; `None` marks an ambiguous key
    folded: HashMap<String, Option<String>>,

    /// Files the walker found but that were not readable text
    skipped: Vec<String>,
}

impl Snapshot {
    /// Walk `root` and read every text file the walker yields.
    #[tracing::instrument(skip(walker), fields(root = %root.display()))]
    pub fn scan(root: &Path, walker: &FileWalker) -> Result<Self> {
        let paths = walker.walk_files(root);

        let read: Vec<(String, Option<String>)> = paths
            .par_iter()
            .filter_map(|abs| {
                let rel = abs.strip_prefix(root).ok()?;
                let rel = rel_to_string(rel)?;
                match read_text_file(abs) {
                    Ok(text) => Some((rel, text)),
                    Err(err) => {
                        tracing::warn!(path = %rel, %err, "unreadable file left out of snapshot");
                        Some((rel, None))
                    }
                }
            })
            .collect();

        let mut snap = Snapshot::default();
        for (rel, text) in read {
            match text {
                Some(text) => snap.insert(FileSnapshot::from_text(rel, &text)),
                None => {
                    tracing::debug!(path = %rel, "skipping binary or non-UTF-8 file");
                    snap.skipped.push(rel);
                }
            }
        }

        tracing::debug!(files = snap.len(), skipped = snap.skipped.len(), "snapshot taken");
        Ok(snap)
    }

    /// Build from in-memory `(path, text)` pairs, in order.
    pub fn from_files<I, P, T>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, T)>,
        P: Into<String>,
        T: AsRef<str>,
    {
        let mut snap = Snapshot::default();
        for (path, text) in files {
            snap.insert(FileSnapshot::from_text(path, text.as_ref()));
        }
        snap
    }

    fn insert(&mut self, file: FileSnapshot) {
        let key = file.path.to_lowercase();
        self.folded
            .entry(key)
            .and_modify(|slot| {
                if slot.as_deref() != Some(file.path.as_str()) {
                    *slot = None;
                }
            })
            .or_insert_with(|| Some(file.path.clone()));
        self.files.insert(file.path.clone(), file);
    }

    pub fn get(&self, path: &str) -> Option<&FileSnapshot> {
        self.files.get(path)
    }

    /// Canonical spelling of `path`: exact match first, then a unique
    /// case-insensitive match.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        if let Some((key, _)) = self.files.get_key_value(path) {
            return Some(key.as_str());
        }
        self.folded
            .get(&path.to_lowercase())
            .and_then(|slot| slot.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileSnapshot> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Files that are new or whose content id differs from `previous`.
    pub fn changed_since<'a>(&'a self, previous: &Snapshot) -> Vec<&'a FileSnapshot> {
        self.iter()
            .filter(|f| previous.get(&f.path).is_none_or(|p| p.cid != f.cid))
            .collect()
    }

    /// Paths present in `previous` but gone now.
    pub fn removed_since(&self, previous: &Snapshot) -> Vec<String> {
        previous
            .iter()
            .filter(|f| !self.files.contains_key(&f.path))
            .map(|f| f.path.clone())
            .collect()
    }
}

/// Root-relative path as a `/`-separated string; `None` for anything that
/// is not a plain relative path.
fn rel_to_string(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for c in rel.components() {
        match c {
            Component::Normal(s) => parts.push(s.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() { None } else { Some(parts.join("/")) }
}
