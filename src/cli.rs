use clap::Parser;
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser, Debug)]
#[command(name = "arcode")]
#[command(
    about = "Describe a change, let an LLM write it, review the diffs, apply what you like"
)]
#[command(version, long_about = None)]
pub struct Cli {
    /// What you want changed; read from stdin or asked for when omitted
    pub requirements: Vec<String>,

    /// Project root to scan and edit
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Model id (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Additional glob patterns to ignore
    #[arg(short, long)]
    pub ignore: Vec<String>,

    /// Tokenizer for the pre-flight estimate (e.g., o200k_base, cl100k_base)
    #[arg(long)]
    pub token_encoding: Option<String>,

    /// Cap on completion tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// List available models (optionally filtered) and exit
    #[arg(long, value_name = "FILTER", num_args = 0..=1)]
    pub models: Option<Option<String>>,

    /// Skip the token confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Do not keep backups of overwritten files (disables undo)
    #[arg(long)]
    pub no_backup: bool,

    /// Apply line-range edits even if the file changed since it was sent;
    /// with --init, overwrite an existing config
    #[arg(long)]
    pub force: bool,

    /// Write a default arcode.toml into the project root and exit
    #[arg(long)]
    pub init: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress spinners and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Print configuration, tree and token estimate without calling the model
    #[arg(long, global = true)]
    pub dry_run: bool,
}

impl Cli {
    /// Build a context once, pass everywhere
    pub fn context(&self) -> AppContext {
        AppContext {
            quiet: self.quiet,
            no_color: self.no_color,
            dry_run: self.dry_run,
        }
    }

    /// Positional requirements joined into one string.
    pub fn requirements_text(&self) -> String {
        self.requirements.join(" ").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_flag_takes_optional_filter() {
        let cli = Cli::parse_from(["arcode", "--models"]);
        assert_eq!(cli.models, Some(None));

        let cli = Cli::parse_from(["arcode", "--models", "gpt"]);
        assert_eq!(cli.models, Some(Some("gpt".to_string())));

        let cli = Cli::parse_from(["arcode", "add", "a", "test"]);
        assert_eq!(cli.models, None);
        assert_eq!(cli.requirements_text(), "add a test");
    }

    #[test]
    fn flags_and_ignores() {
        let cli = Cli::parse_from(["arcode", "-d", "proj", "-i", "*.log", "-i", "tmp/", "-y", "--quiet", "fix"]);
        assert_eq!(cli.dir, PathBuf::from("proj"));
        assert_eq!(cli.ignore, vec!["*.log", "tmp/"]);
        assert!(cli.yes);
        assert!(cli.context().quiet);
    }
}
