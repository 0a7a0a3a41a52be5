//! Tree view of a snapshot with per-file line counts as `name:lines`,
//! e.g. `main.py:100`. Used both in the prompt (plain) and on screen
//! (colored). Uses BTreeMap for deterministic ordering.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use ptree::TreeBuilder;
use ptree::print_config::PrintConfig;
use std::collections::BTreeMap;

use crate::core::snapshot::Snapshot;

#[derive(Debug, Default)]
struct TreeNode {
    /// For files, total line count; None for directories.
    line_count: Option<usize>,
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn is_dir(&self) -> bool {
        self.line_count.is_none()
    }

    /// Insert a `/`-separated path, creating intermediate directories.
    fn insert_path(&mut self, rel: &str, lines: usize) {
        let mut node = self;
        let mut parts = rel.split('/').peekable();
        while let Some(part) = parts.next() {
            node = node.children.entry(part.to_string()).or_default();
            if parts.peek().is_none() {
                node.line_count = Some(lines);
            }
        }
    }
}

fn build_tree(snapshot: &Snapshot) -> TreeNode {
    let mut root = TreeNode::default();
    for file in snapshot.iter() {
        root.insert_path(&file.path, file.line_count());
    }
    root
}

/// Render the snapshot as a tree rooted at `root_name`.
pub fn render_tree(root_name: &str, snapshot: &Snapshot, color: bool) -> Result<String> {
    let tree = build_tree(snapshot);

    let mut builder = TreeBuilder::new(format!("{root_name}/"));
    add_children_to_builder(&mut builder, &tree.children, color);
    let tree = builder.build();

    let mut buf = Vec::new();
    ptree::write_tree_with(&tree, &mut buf, &PrintConfig::default()).context("render tree")?;
    String::from_utf8(buf).context("tree output is not UTF-8")
}

fn add_children_to_builder(
    builder: &mut TreeBuilder,
    children: &BTreeMap<String, TreeNode>,
    color: bool,
) {
    for (name, child) in children {
        let label = format_node_label(name, child, color);
        if child.children.is_empty() {
            builder.add_empty_child(label);
        } else {
            builder.begin_child(label);
            add_children_to_builder(builder, &child.children, color);
            builder.end_child();
        }
    }
}

/// Format node label, optionally colored; files get `:lines` appended.
fn format_node_label(name: &str, node: &TreeNode, color: bool) -> String {
    if node.is_dir() {
        return if color { format!("{}/", name.blue()) } else { format!("{name}/") };
    }
    let shown = if color { color_by_ext(name) } else { name.to_string() };
    match node.line_count {
        Some(n) => format!("{shown}:{n}"),
        None => shown,
    }
}

fn color_by_ext(name: &str) -> String {
    if let Some(ext) = std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
    {
        match ext {
            "rs" => name.yellow().to_string(),
            "py" => name.green().to_string(),
            "js" | "jsx" | "ts" | "tsx" => name.cyan().to_string(),
            "go" => name.magenta().to_string(),
            "c" | "cpp" | "cc" | "cxx" | "h" | "hpp" => name.red().to_string(),
            "toml" | "yaml" | "yml" | "json" => name.bright_blue().to_string(),
            _ => name.to_string(),
        }
    } else {
        name.to_string()
    }
}
