//! Terminal interaction: menus, confirmations, and colored output.
//!
//! The session talks to the user only through [`Prompter`], so tests can
//! script the answers.

use std::io::IsTerminal;

use anyhow::{Context, Result};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};
use owo_colors::OwoColorize;

/// User-facing questions asked by the interaction loop.
pub trait Prompter {
    /// Pick one of `items`; returns its index.
    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize>;

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool>;

    /// Free-form text. An empty answer is allowed.
    fn input(&mut self, prompt: &str) -> Result<String>;
}

/// dialoguer-backed prompter
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize> {
        Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(default.min(items.len().saturating_sub(1)))
            .interact()
            .context("menu selection failed")
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()
            .context("confirmation failed")
    }

    fn input(&mut self, prompt: &str) -> Result<String> {
        Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .context("input failed")
    }
}

/// Color on/off switch shared by every printer.
#[derive(Debug, Clone, Copy)]
pub struct Styler {
    enabled: bool,
}

impl Styler {
    /// Color unless disabled by flag, `NO_COLOR`, or a non-terminal stdout.
    pub fn detect(no_color: bool) -> Self {
        let enabled =
            !no_color && std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();
        Self { enabled }
    }

    pub fn plain() -> Self {
        Self { enabled: false }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn heading(&self, s: &str) -> String {
        if self.enabled { s.bold().cyan().to_string() } else { s.to_string() }
    }

    pub fn ok(&self, s: &str) -> String {
        if self.enabled { s.green().to_string() } else { s.to_string() }
    }

    pub fn warn(&self, s: &str) -> String {
        if self.enabled { s.yellow().to_string() } else { s.to_string() }
    }

    pub fn error(&self, s: &str) -> String {
        if self.enabled { s.red().bold().to_string() } else { s.to_string() }
    }

    pub fn dim(&self, s: &str) -> String {
        if self.enabled { s.dimmed().to_string() } else { s.to_string() }
    }
}

/// Print the resolved run configuration.
pub fn print_configuration(
    style: &Styler,
    root: &std::path::Path,
    model: &str,
    encoding: &str,
    ignores: &[String],
) {
    println!("{}", style.heading("Configuration"));
    println!("  Directory:       {}", root.display());
    println!("  Model:           {model}");
    println!("  Token encoding:  {encoding}");
    if ignores.is_empty() {
        println!("  Ignore patterns: {}", style.dim("(none)"));
    } else {
        println!("  Ignore patterns: {}", ignores.join(", "));
    }
}

/// Print the pre-flight token estimate.
pub fn print_tokens(style: &Styler, files: usize, tokens: usize) {
    println!(
        "{} {} files, ~{} prompt tokens",
        style.heading("Snapshot:"),
        files,
        tokens
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_styler_leaves_text_alone() {
        let s = Styler::plain();
        assert!(!s.enabled());
        assert_eq!(s.ok("done"), "done");
        assert_eq!(s.error("boom"), "boom");
    }
}
