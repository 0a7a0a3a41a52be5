//! Shared test utilities for integration tests
//!
//! Scripted stand-ins for the terminal and the model endpoint, plus
//! fixture helpers, used across multiple test files.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use arcode::core::session::SessionOptions;
use arcode::infra::llm::{ChatMessage, ModelClient, StreamError};
use arcode::infra::ui::{Prompter, Styler};
use assert_fs::prelude::*;

/// Answers questions from pre-recorded queues and logs every prompt.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    pub selects: VecDeque<usize>,
    pub confirms: VecDeque<bool>,
    pub inputs: VecDeque<String>,
    pub asked: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_select(mut self, idx: usize) -> Self {
        self.selects.push_back(idx);
        self
    }

    pub fn then_confirm(mut self, answer: bool) -> Self {
        self.confirms.push_back(answer);
        self
    }

    pub fn then_input(mut self, answer: &str) -> Self {
        self.inputs.push_back(answer.to_string());
        self
    }
}

impl Prompter for ScriptedPrompter {
    fn select(&mut self, prompt: &str, _items: &[String], _default: usize) -> Result<usize> {
        self.asked.push(prompt.to_string());
        self.selects
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected select: {prompt}"))
    }

    fn confirm(&mut self, prompt: &str, _default: bool) -> Result<bool> {
        self.asked.push(prompt.to_string());
        self.confirms
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected confirm: {prompt}"))
    }

    fn input(&mut self, prompt: &str) -> Result<String> {
        self.asked.push(prompt.to_string());
        self.inputs
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected input: {prompt}"))
    }
}

/// Model client that replays canned replies, one per request.
pub struct FakeClient {
    replies: RefCell<VecDeque<String>>,
    /// Every conversation sent, in order
    pub requests: RefCell<Vec<Vec<ChatMessage>>>,
    /// Deliver replies a character at a time
    pub char_chunks: bool,
    pub models: Vec<String>,
}

impl FakeClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
            char_chunks: true,
            models: vec!["fake-large".to_string(), "fake-mini".to_string(), "other".to_string()],
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl ModelClient for FakeClient {
    fn stream_chat(
        &self,
        messages: &[ChatMessage],
        on_delta: &mut dyn FnMut(&str),
        cancel: &AtomicBool,
    ) -> Result<String, StreamError> {
        self.requests.borrow_mut().push(messages.to_vec());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| StreamError::Decode("no scripted reply left".to_string()))?;

        if self.char_chunks {
            let mut buf = [0u8; 4];
            for c in reply.chars() {
                if cancel.load(Ordering::Relaxed) {
                    return Err(StreamError::Cancelled);
                }
                on_delta(c.encode_utf8(&mut buf));
            }
        } else {
            on_delta(&reply);
        }
        Ok(reply)
    }

    fn list_models(&self) -> Result<Vec<String>, StreamError> {
        Ok(self.models.clone())
    }

    fn model(&self) -> &str {
        "fake-large"
    }
}

/// Quiet, uncolored session options rooted at `root`.
pub fn session_options(root: &Path) -> SessionOptions {
    SessionOptions {
        root: root.to_path_buf(),
        force: false,
        backups: true,
        context_lines: 3,
        quiet: true,
        style: Styler::plain(),
    }
}

/// `main.py` with five numbered lines.
pub fn make_python_fixture() -> assert_fs::TempDir {
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    tmp.child("main.py")
        .write_str("line1\nline2\nline3\nline4\nline5\n")
        .expect("write main.py");
    tmp
}

/// Lines of `text` without terminators.
pub fn lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}
