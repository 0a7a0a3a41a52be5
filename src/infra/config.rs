use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::AppContext;

/// File names probed in the project root, first match wins
pub const CONFIG_FILES: &[&str] = &["arcode.toml", "arcode.yaml", "arcode.json", ".arcode.toml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Default ignore patterns (in addition to .gitignore)
    pub ignore_patterns: Vec<String>,

    /// Include dotfiles in the snapshot
    pub include_hidden: bool,

    /// Maximum directory depth to scan
    pub max_depth: Option<usize>,

    /// Tokenizer used for the pre-flight estimate; derived from the model
    /// when unset
    pub token_encoding: Option<String>,

    /// Replaces the built-in system prompt
    pub system_prompt: Option<String>,

    /// Model endpoint settings
    pub model: ModelSettings,

    /// Apply behaviour
    pub apply: ApplySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings
{
    /// Model identifier sent to the endpoint
    pub name: String,

    /// OpenAI-compatible base URL (without `/chat/completions`)
    pub endpoint: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Completion token cap
    pub max_tokens: Option<u32>,

    pub temperature: Option<f32>,

    /// HTTP timeout for a whole request, in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplySettings
{
    /// Context lines shown around each diff hunk
    pub context_lines: usize,

    /// Keep originals under .arcode/backups for undo
    pub backups: bool,

    /// Apply partial edits even when the file drifted since the snapshot
    pub force: bool,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            ignore_patterns: vec![
                "target/".to_string(),
                "node_modules/".to_string(),
                "dist/".to_string(),
                "build/".to_string(),
                "__pycache__/".to_string(),
                "*.pyc".to_string(),
                "*.lock".to_string(),
                "package-lock.json".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
            ],
            include_hidden: false,
            max_depth: None,
            token_encoding: None,
            system_prompt: None,
            model: ModelSettings::default(),
            apply: ApplySettings::default(),
        }
    }
}

impl Default for ModelSettings
{
    fn default() -> Self
    {
        Self {
            name: "gpt-4o".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: Some(4096),
            temperature: None,
            timeout_secs: 600,
        }
    }
}

impl Default for ApplySettings
{
    fn default() -> Self
    {
        Self { context_lines: 3, backups: true, force: false }
    }
}

/// Locate the config file for `root`, if any.
pub fn find_config_file(root: &Path) -> Option<PathBuf>
{
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
}

/// Load layered configuration: built-in defaults, then the first config
/// file found in `root`, then `ARCODE__*` environment variables
/// (e.g. `ARCODE__MODEL__NAME=gpt-4o-mini`).
pub fn load_config(root: &Path) -> Result<Config>
{
    let mut builder = config::Config::builder();

    if let Some(path) = find_config_file(root)
    {
        tracing::debug!(path = %path.display(), "loading config file");
        builder = builder.add_source(config::File::from(path.as_path()));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ARCODE")
            .prefix_separator("__")
            .separator("__"),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

/// Write a default `arcode.toml` into `root`.
pub fn init(
    root: &Path,
    force: bool,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = root.join("arcode.toml");

    if config_path.exists() && !force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
