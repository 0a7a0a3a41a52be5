//! Filepath: src/infra/walk.rs
//! Gitignore-aware file walker used to build the project snapshot.
//! - Respects .gitignore, .git/info/exclude, and global gitignore,
//!   with or without an enclosing git repository
//! - Extra ignore globs (early prune + late filter)
//! - Optional hidden file policy and max depth
//! - Deterministic ordering for stable prompts and tests
//!
//! Backed by ripgrep's `ignore` crate and `globset`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};

/// Directories that are never part of a snapshot: VCS metadata and our own
/// backup store.
pub const ALWAYS_IGNORED: &[&str] = &[".git/", ".arcode/"];

/// Gitignore-aware walker with optional extra ignore globs.
/// Extra globs are applied in two places:
///   1) Early: prune directories during traversal (filter_entry).
///   2) Late: filter out files that still slipped through.
pub struct FileWalker
{
    /// Compiled set of additional ignore patterns
    ignore_patterns: GlobSet,

    /// Include hidden (dot) files; default false
    include_hidden: bool,

    /// Maximum recursion depth; default None (unbounded)
    max_depth: Option<usize>,
}

impl FileWalker
{
    /// Build a walker with additional ignore patterns. Patterns use
    /// gitignore-like shorthand: `target/` ignores a directory anywhere in
    /// the tree, `*.pyc` matches at any depth, `src/gen/**` is anchored.
    pub fn new(additional_ignores: &[String]) -> Result<Self>
    {
        let mut builder = GlobSetBuilder::new();

        let patterns = ALWAYS_IGNORED
            .iter()
            .map(|s| s.to_string())
            .chain(additional_ignores.iter().cloned());

        for pattern in patterns
        {
            for expanded in expand_pattern(&pattern)
            {
                builder.add(Glob::new(&expanded)?);
            }
        }

        Ok(Self { ignore_patterns: builder.build()?, include_hidden: false, max_depth: None })
    }

    /// (Optional) Include or exclude hidden files (dotfiles).
    pub fn with_include_hidden(
        mut self,
        include_hidden: bool,
    ) -> Self
    {
        self.include_hidden = include_hidden;
        self
    }

    /// (Optional) Limit recursion depth (`None` = unbounded).
    pub fn with_max_depth(
        mut self,
        depth: Option<usize>,
    ) -> Self
    {
        self.max_depth = depth;
        self
    }

    /// True when `rel` (a root-relative path) matches an extra ignore glob.
    pub fn is_ignored(
        &self,
        rel: &Path,
    ) -> bool
    {
        self.ignore_patterns
            .is_match(rel)
    }

    /// Internal: construct a configured WalkBuilder for `root`.
    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // WalkBuilder::hidden(true) => *skip* dotfiles
        b.hidden(!self.include_hidden);

        // Respect .ignore/.gitignore/.git/info/exclude and global gitignore,
        // even when the root is not inside a git checkout
        b.git_ignore(true);
        b.git_global(true);
        b.git_exclude(true);
        b.require_git(false);

        b.follow_links(false);
        b.max_depth(self.max_depth);

        // Early directory pruning using extra ignores, matched on the
        // root-relative path so anchored globs behave.
        let extra = self
            .ignore_patterns
            .clone();
        let root_owned = root.to_path_buf();
        b.filter_entry(move |ent: &DirEntry| {
            let is_dir = ent
                .file_type()
                .map(|ft| ft.is_dir())
                .unwrap_or(false);

            if !is_dir
            {
                return true;
            }
            let rel = ent
                .path()
                .strip_prefix(&root_owned)
                .unwrap_or(ent.path());
            rel.as_os_str()
                .is_empty()
                || !extra.is_match(rel)
        });

        b
    }

    /// Traverse files under `root`, respecting ignore rules and extra globs.
    /// Returns a **sorted** list of absolute file paths for determinism.
    pub fn walk_files<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<PathBuf>
    {
        let root_path = root.as_ref();
        let walker = self
            .build_walk(root_path)
            .build();

        let mut out: Vec<PathBuf> = walker
            .filter_map(|res| match res
            {
                Ok(entry) => Some(entry),
                Err(err) =>
                {
                    tracing::debug!(%err, "skipping unreadable entry");
                    None
                }
            })
            // Keep only regular files
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_file())
            })
            .map(|entry| entry.into_path())
            // Late file-level extra ignore filtering using RELATIVE path
            .filter(|abs| {
                let rel = abs
                    .strip_prefix(root_path)
                    .unwrap_or(abs);
                !self.is_ignored(rel)
            })
            .collect();

        out.sort();

        out
    }
}

/// Expand gitignore-like shorthand into globset patterns.
fn expand_pattern(pattern: &str) -> Vec<String>
{
    let p = pattern
        .trim()
        .trim_start_matches("./");

    if p.is_empty()
    {
        return Vec::new();
    }

    // "dir/" => the directory itself and everything below it, at any depth
    if let Some(dir) = p.strip_suffix('/')
    {
        let dir = dir.trim_start_matches('/');
        return vec![
            dir.to_string(),
            format!("{dir}/**"),
            format!("**/{dir}"),
            format!("**/{dir}/**"),
        ];
    }

    // Leading "/" anchors to the root
    if let Some(anchored) = p.strip_prefix('/')
    {
        return vec![anchored.to_string()];
    }

    // Bare names match at any depth
    if !p.contains('/')
    {
        return vec![p.to_string(), format!("**/{p}")];
    }

    vec![p.to_string()]
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    /// Create a file with parent dirs as needed
    fn write_file(
        root: &Path,
        rel: &str,
        contents: &str,
    ) -> Result<()>
    {
        let path = root.join(rel);
        if let Some(parent) = path.parent()
        {
            std::fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn relative(
        root: &Path,
        files: Vec<PathBuf>,
    ) -> Vec<PathBuf>
    {
        files
            .into_iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_path_buf()
            })
            .collect()
    }

    #[test]
    fn test_file_walking_simple() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "test.rs", "fn main() {}")?;
        write_file(root, "README.md", "# Test")?;

        let walker = FileWalker::new(&[])?;
        let files = walker.walk_files(root);

        assert_eq!(files.len(), 2);
        assert!(
            files
                .windows(2)
                .all(|w| w[0] <= w[1])
        );
        Ok(())
    }

    #[test]
    fn test_respects_gitignore_without_repo() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, ".gitignore", "README.md\n")?;
        write_file(root, "README.md", "# Ignored by gitignore")?;
        write_file(root, "keep.txt", "keep")?;

        let walker = FileWalker::new(&[])?;
        let files = relative(root, walker.walk_files(root));

        assert_eq!(files, vec![PathBuf::from("keep.txt")]);
        Ok(())
    }

    #[test]
    fn test_additional_globs_prune_and_filter() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "target/build/a.o", "bin")?;
        write_file(root, "web/node_modules/pkg/index.js", "js")?;
        write_file(root, "src/lib.rs", "pub fn x() {}")?;
        write_file(root, "src/cache.pyc", "junk")?;

        let ignores =
            vec!["target/".to_string(), "node_modules/".to_string(), "*.pyc".to_string()];
        let walker = FileWalker::new(&ignores)?;
        let files = relative(root, walker.walk_files(root));

        assert_eq!(files, vec![PathBuf::from("src/lib.rs")], "unexpected files: {files:?}");
        Ok(())
    }

    #[test]
    fn test_backup_store_is_never_walked() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, ".arcode/backups/s1/main.py", "old")?;
        write_file(root, "main.py", "new")?;

        let walker = FileWalker::new(&[])?.with_include_hidden(true);
        let files = relative(root, walker.walk_files(root));

        assert_eq!(files, vec![PathBuf::from("main.py")]);
        Ok(())
    }

    #[test]
    fn test_hidden_files_policy() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, ".hidden.txt", "h")?;
        write_file(root, "visible.txt", "v")?;

        let files = relative(root, FileWalker::new(&[])?.walk_files(root));
        assert!(!files.contains(&PathBuf::from(".hidden.txt")));
        assert!(files.contains(&PathBuf::from("visible.txt")));

        let files = relative(
            root,
            FileWalker::new(&[])?
                .with_include_hidden(true)
                .walk_files(root),
        );
        assert!(files.contains(&PathBuf::from(".hidden.txt")));
        Ok(())
    }

    #[test]
    fn test_max_depth() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let root = tmp.path();

        write_file(root, "a.txt", "a")?;
        write_file(root, "sub/b.txt", "b")?;

        let walker = FileWalker::new(&[])?.with_max_depth(Some(1));
        let files = relative(root, walker.walk_files(root));
        assert!(files.contains(&PathBuf::from("a.txt")));
        assert!(!files.contains(&PathBuf::from("sub/b.txt")));
        Ok(())
    }

    #[test]
    fn test_expand_pattern_shorthand()
    {
        assert_eq!(expand_pattern("*.pyc"), vec!["*.pyc", "**/*.pyc"]);
        assert_eq!(expand_pattern("/build"), vec!["build"]);
        assert_eq!(expand_pattern("src/gen/**"), vec!["src/gen/**"]);
        assert!(expand_pattern("  ").is_empty());
    }
}
