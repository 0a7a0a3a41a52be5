//! **arcode** - send a project snapshot and a change request to an LLM,
//! stream the answer, and apply the proposed file edits after review.
//!
//! Gitignore-aware scanning, a resumable response parser, LCS diff previews,
//! and atomic, reversible writes.

/// Command-line interface with clap integration
pub mod cli;

/// Startup sequence and exit codes
pub mod app;

/// Core pipeline - snapshot, prompt, parse, diff, apply, undo
pub mod core {
    /// Project snapshot and content ids for drift detection
    pub mod snapshot;
    pub use snapshot::{FileSnapshot, Snapshot, generate_cid};

    /// File-block marker recognition and range hints
    pub mod marker;

    /// Streaming response parser (Idle/InFile state machine)
    pub mod parser;
    pub use parser::{
        BlockStatus, EditKind, EditSet, ParseIssue, ParsedFileEdit, ResponseParser,
        normalize_path, parse_response,
    };

    /// Line-level previews of proposed edits
    pub mod diff;
    pub use diff::DiffPreview;

    /// Guarded, atomic writes of approved edits
    pub mod apply;
    pub use apply::{ApplyError, ApplyOutcome, WriteEngine, splice_lines};

    /// Backup sessions and undo
    pub mod backup;
    pub use backup::{BackupSession, restore_session};

    /// Prompt assembly
    pub mod prompt;

    /// Directory tree rendering with per-file line counts
    pub mod tree;

    /// Interactive review loop
    pub mod session;
    pub use session::{EditState, Session, SessionOptions};
}

/// Infrastructure - configuration, I/O, transport, and terminal helpers
pub mod infra {
    /// Layered configuration (file + environment)
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Text-file reading, newline handling, atomic writes
    pub mod io;

    /// Gitignore-aware directory walking
    pub mod walk;
    pub use walk::FileWalker;

    /// Token estimates with tiktoken-rs
    pub mod tokens;

    /// Streaming chat-completions client
    pub mod llm;
    pub use llm::{ChatMessage, ModelClient, ModelConfig, OpenAiClient, StreamError};

    /// Menus, confirmations, and colored output
    pub mod ui;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli};
pub use infra::{Config, FileWalker, load_config};
