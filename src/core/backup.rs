//! Backup sessions that make applied batches reversible.
//!
//! Each applied batch gets `.arcode/backups/<ID>/` holding a mirrored copy of
//! every file it overwrote, a `manifest.json`, and a `DONE` marker written on
//! finalize. Finalized sessions are appended to `index.jsonl`. Restoring a
//! session puts originals back and removes files the batch created.

use anyhow::{Context, Result, bail};
use blake3::Hasher as Blake3;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Read, Write},
    path::{Component, Path, PathBuf},
};

use crate::infra::io::write_atomic;

/// Store for sessions, relative to the project root
pub const BACKUP_DIR: &str = ".arcode/backups";

/// One file touched by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub path: String,          // root-relative, `/`-separated
    pub existed: bool,         // false: the batch created this file
    pub checksum: Option<String>, // blake3:<hex> of the backed-up copy
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: String,        // e.g., 2026-10-16T10-30-15Z_a9Jh5xQ2Lm
    pub timestamp: String, // RFC3339 creation time
    pub round: Option<usize>,
    pub files: Vec<BackupEntry>,
}

/// Lightweight index record for quick session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub id: String,
    pub timestamp: String,
    pub files: usize,
}

/// What a restore did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub removed: Vec<String>,
}

/// Collects originals for one batch of writes.
#[derive(Debug)]
pub struct BackupSession {
    root: PathBuf,
    dir: PathBuf,
    manifest: SessionManifest,
    finalized: bool,
}

impl BackupSession {
    /// Start a new session under `<root>/.arcode/backups/<ID>`.
    pub fn begin(root: &Path) -> Result<Self> {
        let sessions_dir = root.join(BACKUP_DIR);
        let id = generate_session_id();
        let dir = sessions_dir.join(&id);

        fs::create_dir_all(&dir)
            .with_context(|| format!("create backup session: {}", dir.display()))?;

        Ok(Self {
            root: root.to_path_buf(),
            dir,
            manifest: SessionManifest {
                id,
                timestamp: Utc::now().to_rfc3339(),
                round: None,
                files: Vec::new(),
            },
            finalized: false,
        })
    }

    pub fn with_round(mut self, round: usize) -> Self {
        self.manifest.round = Some(round);
        self
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.files.is_empty()
    }

    pub fn files(&self) -> &[BackupEntry] {
        &self.manifest.files
    }

    /// Record `rel` before it is written. Existing files are copied into the
    /// session; new files are only noted so restore can remove them. A path
    /// recorded twice keeps its first (oldest) copy.
    pub fn record(&mut self, rel: &str, existed: bool) -> Result<()> {
        if self.finalized {
            bail!("backup session {} is already finalized", self.manifest.id);
        }
        if self.manifest.files.iter().any(|f| f.path == rel) {
            return Ok(());
        }

        let rel_path = validate_rel(Path::new(rel))?;

        let (checksum, size_bytes) = if existed {
            let source = self.root.join(&rel_path);
            let dest = self.dir.join(&rel_path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create backup parent: {}", parent.display()))?;
            }
            fs::copy(&source, &dest)
                .with_context(|| format!("copy {} to backup", source.display()))?;
            let size = fs::metadata(&dest)
                .with_context(|| format!("stat backup: {}", dest.display()))?
                .len();
            (Some(stream_blake3(&dest)?), size)
        } else {
            (None, 0)
        };

        self.manifest.files.push(BackupEntry {
            path: rel.to_string(),
            existed,
            checksum,
            size_bytes,
        });
        Ok(())
    }

    /// Write the manifest and DONE marker and append to the index. An empty
    /// session is removed instead.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        if self.manifest.files.is_empty() {
            let _ = fs::remove_dir_all(&self.dir);
            return Ok(());
        }

        let manifest_text =
            serde_json::to_string_pretty(&self.manifest).context("serialize manifest")?;
        write_atomic(&self.dir.join("manifest.json"), manifest_text.as_bytes())
            .with_context(|| format!("write manifest in {}", self.dir.display()))?;

        let done_path = self.dir.join("DONE");
        fs::write(&done_path, "").with_context(|| format!("create DONE: {}", done_path.display()))?;

        append_to_index(
            &self.root,
            &SessionIndexEntry {
                id: self.manifest.id.clone(),
                timestamp: self.manifest.timestamp.clone(),
                files: self.manifest.files.len(),
            },
        )?;

        tracing::debug!(id = %self.manifest.id, files = self.manifest.files.len(), "backup finalized");
        Ok(())
    }
}

impl Drop for BackupSession {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.finalize(); // best-effort
        }
    }
}

fn append_to_index(root: &Path, entry: &SessionIndexEntry) -> Result<()> {
    let index_path = root.join(BACKUP_DIR).join("index.jsonl");
    let line = serde_json::to_string(entry).context("serialize index entry")?;

    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&index_path)
        .with_context(|| format!("open index: {}", index_path.display()))?;
    writeln!(f, "{line}").context("append index")?;
    f.sync_all().ok();
    Ok(())
}

/// Generate a sortable, filesystem-safe session ID.
fn generate_session_id() -> String {
    let ts = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let alphabet = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..10)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect();
    format!("{ts}_{suffix}")
}

/// Stream a file into a blake3 digest as `blake3:<hex>`.
fn stream_blake3(path: &Path) -> Result<String> {
    let mut f =
        File::open(path).with_context(|| format!("open for checksum: {}", path.display()))?;
    let mut hasher = Blake3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Read the append-only index; ignores malformed lines.
pub fn list_sessions(root: &Path) -> Result<Vec<SessionIndexEntry>> {
    let index_path = root.join(BACKUP_DIR).join("index.jsonl");
    if !index_path.exists() {
        return Ok(Vec::new());
    }

    let file =
        File::open(&index_path).with_context(|| format!("open index: {}", index_path.display()))?;

    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read index line {}", i + 1))?;
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionIndexEntry>(t) {
            Ok(e) => out.push(e),
            Err(_) => continue, // tolerate partial/corrupt lines
        }
    }
    Ok(out)
}

/// Most recent session that has not been restored yet.
pub fn latest_session(root: &Path) -> Result<Option<SessionIndexEntry>> {
    let base = root.join(BACKUP_DIR);
    Ok(list_sessions(root)?
        .into_iter()
        .rev()
        .find(|e| base.join(&e.id).join("DONE").exists() && !base.join(&e.id).join("RESTORED").exists()))
}

/// Load a session manifest; requires DONE to be present.
pub fn read_session_manifest(root: &Path, session_id: &str) -> Result<SessionManifest> {
    let base = root.join(BACKUP_DIR).join(session_id);
    if !base.join("DONE").exists() {
        bail!("Session {} is incomplete (missing DONE)", session_id);
    }
    let manifest_path = base.join("manifest.json");
    let s = fs::read_to_string(&manifest_path)
        .with_context(|| format!("read manifest: {}", manifest_path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parse manifest: {}", manifest_path.display()))
}

/// Undo a session: put backed-up originals back and delete files the
/// session created. Every checksum is verified before anything is touched.
pub fn restore_session(root: &Path, session_id: &str) -> Result<RestoreReport> {
    let manifest = read_session_manifest(root, session_id)?;
    let base = root.join(BACKUP_DIR).join(session_id);
    if base.join("RESTORED").exists() {
        bail!("Session {} was already restored", session_id);
    }

    for entry in manifest.files.iter().filter(|e| e.existed) {
        let rel = validate_rel(Path::new(&entry.path))?;
        let copy = base.join(&rel);
        let actual = stream_blake3(&copy)?;
        if entry.checksum.as_deref() != Some(actual.as_str()) {
            bail!("Backup of {} is corrupt (checksum mismatch)", entry.path);
        }
    }

    let mut report = RestoreReport::default();
    for entry in &manifest.files {
        let rel = validate_rel(Path::new(&entry.path))?;
        let target = root.join(&rel);
        if entry.existed {
            let bytes = fs::read(base.join(&rel))
                .with_context(|| format!("read backup of {}", entry.path))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic(&target, &bytes).with_context(|| format!("restore {}", entry.path))?;
            report.restored.push(entry.path.clone());
        } else {
            match fs::remove_file(&target) {
                Ok(()) => report.removed.push(entry.path.clone()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("remove {}", entry.path)));
                }
            }
        }
    }

    fs::write(base.join("RESTORED"), Utc::now().to_rfc3339())
        .with_context(|| format!("mark {} restored", session_id))?;
    tracing::info!(
        id = session_id,
        restored = report.restored.len(),
        removed = report.removed.len(),
        "backup session restored"
    );
    Ok(report)
}

/// Validate that the given path is root-relative and non-escaping.
fn validate_rel(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        bail!("path must be root-relative: {}", p.display());
    }
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::ParentDir => bail!("path escapes root: {}", p.display()),
            Component::CurDir => {}
            Component::Prefix(_) | Component::RootDir => {
                bail!("path must be root-relative: {}", p.display())
            }
            _ => out.push(c.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("empty path");
    }
    Ok(out)
}
