//! Prompt assembly: instructions, project tree, file blocks, requirements.

use std::fmt::Write as _;

use crate::core::parser::ParsedFileEdit;
use crate::core::snapshot::{FileSnapshot, Snapshot};
use crate::infra::llm::ChatMessage;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Output contract given to the model. Must stay in sync with
/// `core::marker`.
pub const FORMAT_INSTRUCTIONS: &str = "\
You are editing the project below. Every file is shown between a start \
marker `### FILE: <path> ###` and an end marker `### END FILE: <path> ###`, \
with the file's line count on the line above the start marker.

Reply with the files you want to create or change using the same markers:

### FILE: <path> ###
<complete new file content>
### END FILE: <path> ###

To replace only some lines of an existing file, put the 1-based inclusive \
line range in the start marker; the block then holds just the replacement \
for those lines:

### FILE: <path> (lines 12-18) ###
<replacement for lines 12 to 18>
### END FILE: <path> ###

To add lines at the end of a file use `(append)` instead of a range.

Rules:
- Paths are relative to the project root and use `/`.
- Never put anything but file content between the markers.
- Only include files you are changing. Explanations go outside the blocks.
- When unsure about line numbers, send the complete file.";

/// One file in marker form, preceded by its line count.
pub fn render_file_block(file: &FileSnapshot) -> String {
    let mut out = String::new();
    let count = file.lines.len();
    let _ = writeln!(out, "{}: {count} line{}", file.path, if count == 1 { "" } else { "s" });
    let _ = writeln!(out, "### FILE: {} ###", file.path);
    for line in &file.lines {
        out.push_str(line);
        out.push('\n');
    }
    let _ = writeln!(out, "### END FILE: {} ###", file.path);
    out
}

/// First-round prompt: format rules, tree, every file, requirements.
pub fn build_prompt(tree: &str, snapshot: &Snapshot, requirements: &str) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(FORMAT_INSTRUCTIONS);
    out.push_str("\n\n## Project tree\n\n");
    out.push_str(tree.trim_end());
    out.push_str("\n\n## Files\n\n");
    for file in snapshot.iter() {
        out.push_str(&render_file_block(file));
        out.push('\n');
    }
    let _ = write!(out, "## Requirements\n\n{}\n", requirements.trim());
    out
}

/// Prompt for a later round in the same conversation. Only files that are
/// new or changed since `previous` are re-sent.
pub fn build_followup_prompt(snapshot: &Snapshot, previous: &Snapshot, requirements: &str) -> String {
    let changed = snapshot.changed_since(previous);
    let removed = snapshot.removed_since(previous);

    let mut out = String::new();
    if changed.is_empty() && removed.is_empty() {
        out.push_str("No files changed since the last message.\n\n");
    } else {
        if !changed.is_empty() {
            out.push_str("These files changed since the last message; current content:\n\n");
            for file in changed {
                out.push_str(&render_file_block(file));
                out.push('\n');
            }
        }
        if !removed.is_empty() {
            out.push_str("These files no longer exist:\n");
            for path in removed {
                let _ = writeln!(out, "- {path}");
            }
            out.push('\n');
        }
    }
    let _ = write!(
        out,
        "## New requirements\n\n{}\n\nUse the same file markers as before.\n",
        requirements.trim()
    );
    out
}

/// Ask the model to redo the edits the user sent back.
pub fn build_revision_prompt(edits: &[&ParsedFileEdit], notes: &str) -> String {
    let mut out = String::from("Please revise your changes to these files:\n");
    for edit in edits {
        let _ = write!(out, "- {} ({})", edit.path, edit.kind.label());
        if !edit.issues.is_empty() {
            let problems: Vec<String> = edit.issues.iter().map(|i| i.to_string()).collect();
            let _ = write!(out, ": {}", problems.join("; "));
        }
        out.push('\n');
    }
    if !notes.trim().is_empty() {
        let _ = write!(out, "\nNotes: {}\n", notes.trim());
    }
    out.push_str("\nReply with the complete corrected blocks using the same file markers.\n");
    out
}

/// System + first user message.
pub fn initial_messages(system_prompt: &str, user_content: String) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_content),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_response;

    #[test]
    fn prompt_blocks_parse_back_to_the_same_files() {
        let snap = Snapshot::from_files([("main.py", "print('hi')\n"), ("lib/util.py", "x = 1\n")]);
        let prompt = build_prompt("proj/\n", &snap, "make it better");

        let files = prompt.split("## Files").nth(1).unwrap();
        let set = parse_response(files, None);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("main.py").unwrap().new_content, vec!["print('hi')"]);
        assert!(prompt.ends_with("## Requirements\n\nmake it better\n"));
    }

    #[test]
    fn file_blocks_state_their_line_count() {
        let file = FileSnapshot::from_text("main.py", "a\nb\nc\n");
        assert!(render_file_block(&file).starts_with("main.py: 3 lines\n### FILE: main.py ###\n"));

        let one = FileSnapshot::from_text("x.txt", "only");
        assert!(render_file_block(&one).starts_with("x.txt: 1 line\n"));
    }

    #[test]
    fn followup_only_resends_changed_files() {
        let before = Snapshot::from_files([("a.py", "1\n"), ("b.py", "2\n")]);
        let after = Snapshot::from_files([("a.py", "1\n"), ("b.py", "22\n")]);
        let p = build_followup_prompt(&after, &before, "next");
        assert!(p.contains("### FILE: b.py ###"));
        assert!(!p.contains("### FILE: a.py ###"));

        let p = build_followup_prompt(&before, &before, "next");
        assert!(p.starts_with("No files changed"));
    }
}
