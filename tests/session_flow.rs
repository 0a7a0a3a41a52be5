//! End-to-end runs of the interactive loop against a scripted model and
//! scripted user answers.

mod util;

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use arcode::core::backup::{latest_session, list_sessions};
use arcode::core::prompt::{DEFAULT_SYSTEM_PROMPT, build_prompt, initial_messages};
use arcode::core::session::{EditState, MenuChoice, Session};
use arcode::core::snapshot::Snapshot;
use arcode::infra::llm::{ChatMessage, Role};
use arcode::infra::walk::FileWalker;
use util::{FakeClient, ScriptedPrompter, lines, make_python_fixture, session_options};

const SPLICE_AND_CREATE: &str = "\
Sure, here are the changes.

### FILE: main.py (lines 2-3) ###
a
b
c
d
e
### END FILE ###

And a helper module:

### FILE: util.py ###
def helper():
    return 42
### END FILE ###
";

fn canonical(tmp: &assert_fs::TempDir) -> PathBuf {
    dunce::canonicalize(tmp.path()).expect("canonical root")
}

fn first_messages(snapshot: &Snapshot) -> Vec<ChatMessage> {
    initial_messages(DEFAULT_SYSTEM_PROMPT, build_prompt("tree", snapshot, "make changes"))
}

#[test]
fn apply_all_splices_and_creates() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    let client = FakeClient::new([SPLICE_AND_CREATE]);
    let mut prompter = ScriptedPrompter::new()
        .then_select(MenuChoice::ApplyAll.index())
        .then_select(MenuChoice::Exit.index());

    {
        let mut session =
            Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
        session.run()?;

        let states: Vec<EditState> = session.round().edits.iter().map(|e| e.state.clone()).collect();
        assert_eq!(states, vec![EditState::Applied, EditState::Applied]);

        // reply recorded as assistant turn
        let last = session.messages().last().expect("assistant message");
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, SPLICE_AND_CREATE);
    }

    let main = fs::read_to_string(root.join("main.py"))?;
    assert_eq!(
        lines(&main),
        lines("line1\na\nb\nc\nd\ne\nline4\nline5")
    );
    assert!(main.ends_with('\n'));
    assert_eq!(fs::read_to_string(root.join("util.py"))?, "def helper():\n    return 42\n");

    let latest = latest_session(&root)?.expect("backup session recorded");
    assert_eq!(latest.files, 2);
    assert!(prompter.selects.is_empty());
    Ok(())
}

#[test]
fn undo_restores_originals_and_removes_created_files() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    let client = FakeClient::new([SPLICE_AND_CREATE]);
    let mut prompter = ScriptedPrompter::new()
        .then_select(MenuChoice::ApplyAll.index())
        .then_select(MenuChoice::Undo.index())
        .then_confirm(true)
        .then_select(MenuChoice::Exit.index());

    {
        let mut session =
            Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
        session.run()?;

        assert!(
            session
                .round()
                .edits
                .iter()
                .all(|e| e.state == EditState::Pending)
        );
    }

    assert_eq!(
        fs::read_to_string(root.join("main.py"))?,
        "line1\nline2\nline3\nline4\nline5\n"
    );
    assert!(!root.join("util.py").exists());

    // A restored session is not offered again
    assert!(latest_session(&root)?.is_none());
    Ok(())
}

#[test]
fn review_applies_one_and_sends_the_other_back() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    let revised = "### FILE: util.py ###\ndef helper():\n\treturn 7\n### END FILE ###\n";
    let client = FakeClient::new([SPLICE_AND_CREATE, revised]);
    let mut prompter = ScriptedPrompter::new()
        .then_select(MenuChoice::Review.index())
        .then_select(0) // apply main.py
        .then_select(2) // retry util.py
        .then_confirm(true)
        .then_input("use tabs")
        .then_select(MenuChoice::Exit.index());

    {
        let mut session =
            Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
        session.run()?;

        // The revision round holds only the re-sent file
        let edits = &session.round().edits;
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].edit.path, "util.py");
        assert_eq!(edits[0].state, EditState::Pending);
    }

    assert_eq!(client.request_count(), 2);
    let requests = client.requests.borrow();
    let second = &requests[1];
    assert_eq!(second.len(), 4);
    assert_eq!(second[2].role, Role::Assistant);
    let revision = &second[3];
    assert_eq!(revision.role, Role::User);
    assert!(revision.content.contains("util.py"));
    assert!(revision.content.contains("Notes: use tabs"));
    assert!(!revision.content.contains("main.py"));

    assert_eq!(lines(&fs::read_to_string(root.join("main.py"))?).len(), 8);
    assert!(!root.join("util.py").exists());
    Ok(())
}

#[test]
fn regenerate_replaces_the_last_reply() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    let client = FakeClient::new(["Nothing to change.", SPLICE_AND_CREATE]);
    let mut prompter = ScriptedPrompter::new()
        .then_select(MenuChoice::Regenerate.index())
        .then_select(MenuChoice::Exit.index());

    {
        let mut session =
            Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
        session.run()?;
        assert_eq!(session.round().edits.len(), 2);
        assert_eq!(session.messages().len(), 3);
    }

    let requests = client.requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);

    // Nothing applied
    assert_eq!(
        fs::read_to_string(root.join("main.py"))?,
        "line1\nline2\nline3\nline4\nline5\n"
    );
    Ok(())
}

#[test]
fn continue_sends_only_changed_files() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    fs::write(root.join("other.py"), "untouched = True\n")?;
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    let client = FakeClient::new([SPLICE_AND_CREATE, "All done."]);
    let mut prompter = ScriptedPrompter::new()
        .then_select(MenuChoice::ApplyAll.index())
        .then_select(MenuChoice::Continue.index())
        .then_input("now add docs")
        .then_select(MenuChoice::Exit.index());

    {
        let mut session =
            Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
        session.run()?;
        assert_eq!(session.round().number, 2);
        assert!(session.round().edits.is_empty());
        assert!(session.round().snapshot.get("util.py").is_some());
    }

    let requests = client.requests.borrow();
    let followup = &requests[1].last().expect("follow-up message").content;
    assert!(followup.contains("main.py"));
    assert!(followup.contains("util.py"));
    assert!(!followup.contains("other.py"));
    assert!(followup.contains("now add docs"));
    Ok(())
}

#[test]
fn drifted_splice_is_refused() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    // Changed on disk after the model saw it
    fs::write(root.join("main.py"), "line1\nline2\nEDITED\nline4\nline5\n")?;

    let client = FakeClient::new([SPLICE_AND_CREATE]);
    let mut prompter = ScriptedPrompter::new();
    let mut session =
        Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
    session.stream_round()?;
    session.apply_all()?;

    let edits = &session.round().edits;
    assert!(matches!(edits[0].state, EditState::Failed(_)));
    assert_eq!(edits[1].state, EditState::Applied);
    drop(session);

    assert_eq!(
        fs::read_to_string(root.join("main.py"))?,
        "line1\nline2\nEDITED\nline4\nline5\n"
    );
    Ok(())
}

#[test]
fn incomplete_block_needs_confirmation() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    let truncated = "### FILE: main.py ###\nprint('half')\n";
    let client = FakeClient::new([truncated]);
    let mut prompter = ScriptedPrompter::new().then_confirm(false);
    {
        let mut session =
            Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
        session.stream_round()?;
        session.apply_all()?;
        assert_eq!(session.round().edits[0].state, EditState::Skipped);
    }

    assert!(prompter.asked[0].contains("incomplete"));
    assert_eq!(
        fs::read_to_string(root.join("main.py"))?,
        "line1\nline2\nline3\nline4\nline5\n"
    );
    assert!(list_sessions(&root)?.is_empty());
    Ok(())
}

#[test]
fn failed_stream_leaves_files_alone() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    let client = FakeClient::new(Vec::<String>::new());
    let mut prompter = ScriptedPrompter::new().then_select(MenuChoice::Exit.index());
    {
        let mut session =
            Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
        session.run()?;
        assert!(session.round().edits.is_empty());
        assert_eq!(session.messages().len(), 2);
    }

    assert_eq!(
        fs::read_to_string(root.join("main.py"))?,
        "line1\nline2\nline3\nline4\nline5\n"
    );
    Ok(())
}

#[test]
fn summary_table_lists_every_edit() -> Result<()> {
    let tmp = make_python_fixture();
    let root = canonical(&tmp);
    let walker = FileWalker::new(&[])?;
    let snapshot = Snapshot::scan(&root, &walker)?;
    let messages = first_messages(&snapshot);

    let client = FakeClient::new([SPLICE_AND_CREATE]);
    let mut prompter = ScriptedPrompter::new();
    let mut session =
        Session::new(&client, &mut prompter, walker, session_options(&root), snapshot, messages)?;
    session.stream_round()?;

    let table = session.summary_table();
    assert!(table.contains("main.py"));
    assert!(table.contains("util.py"));
    assert!(table.contains("+5 -2"));
    assert!(table.contains("+2 -0"));
    assert!(table.contains("pending"));
    Ok(())
}
