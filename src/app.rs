//! Startup: resolve configuration, take the first snapshot, confirm the
//! token cost, then hand over to the interactive session.

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};

use crate::cli::{AppContext, Cli};
use crate::core::prompt::{DEFAULT_SYSTEM_PROMPT, build_prompt, initial_messages};
use crate::core::session::{Session, SessionOptions};
use crate::core::snapshot::Snapshot;
use crate::core::tree::render_tree;
use crate::infra::config::{self, Config, load_config};
use crate::infra::llm::{ModelClient, ModelConfig, OpenAiClient};
use crate::infra::tokens::TokenCounter;
use crate::infra::ui::{Prompter, Styler, TerminalPrompter, print_configuration, print_tokens};
use crate::infra::walk::FileWalker;

pub const EXIT_OK: i32 = 0;
/// The user declined the token confirmation
pub const EXIT_DECLINED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Entry point used by the binary.
pub fn run(cli: Cli) -> Result<i32> {
    let root = resolve_root(&cli.dir)?;

    if cli.init {
        config::init(&root, cli.force, &cli.context())?;
        return Ok(EXIT_OK);
    }

    let cfg = load_config(&root)?;
    let client = OpenAiClient::new(model_config(&cli, &cfg)).context("create HTTP client")?;
    let mut prompter = TerminalPrompter::new();

    let cancel = Arc::new(AtomicBool::new(false));
    // First Ctrl-C cancels the stream; a second one while it is still set exits
    signal_hook::flag::register_conditional_shutdown(
        signal_hook::consts::SIGINT,
        130,
        Arc::clone(&cancel),
    )
    .context("install SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&cancel))
        .context("install SIGINT handler")?;

    run_with(&cli, &root, cfg, &client, &mut prompter, cancel)
}

/// Everything after client construction, with injectable I/O.
pub fn run_with(
    cli: &Cli,
    root: &Path,
    cfg: Config,
    client: &dyn ModelClient,
    prompter: &mut dyn Prompter,
    cancel: Arc<AtomicBool>,
) -> Result<i32> {
    let ctx = cli.context();
    let style = Styler::detect(ctx.no_color);

    if let Some(filter) = &cli.models {
        list_models(client, filter.as_deref(), &style)?;
        return Ok(EXIT_OK);
    }

    let mut ignores = cfg.ignore_patterns.clone();
    ignores.extend(cli.ignore.iter().cloned());
    let walker = FileWalker::new(&ignores)
        .context("invalid ignore pattern")?
        .with_include_hidden(cfg.include_hidden)
        .with_max_depth(cfg.max_depth);

    let requirements = gather_requirements(cli, &ctx, prompter)?;

    let snapshot = Snapshot::scan(root, &walker)?;
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.display().to_string());
    let tree = render_tree(&root_name, &snapshot, false)?;

    let system_prompt = cfg.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let messages = initial_messages(system_prompt, build_prompt(&tree, &snapshot, &requirements));

    let encoding = cli
        .token_encoding
        .clone()
        .or_else(|| cfg.token_encoding.clone())
        .unwrap_or_else(|| client.model().to_string());
    let counter = TokenCounter::new(&encoding)?;
    let tokens = counter.count_messages(&messages);

    if !ctx.quiet {
        print_configuration(&style, root, client.model(), counter.encoding(), &ignores);
        println!();
        print!("{}", render_tree(&root_name, &snapshot, style.enabled())?);
        println!();
        print_tokens(&style, snapshot.len(), tokens);
        for skipped in snapshot.skipped() {
            println!("  {}", style.dim(&format!("skipped non-text file {skipped}")));
        }
    }

    if ctx.dry_run {
        return Ok(EXIT_OK);
    }

    if !cli.yes {
        let question = format!("This will use ~{tokens} tokens before output - are you sure?");
        if !prompter.confirm(&question, true)? {
            if !ctx.quiet {
                println!("{}", style.heading("Good day!"));
            }
            return Ok(EXIT_DECLINED);
        }
    }
    if !ctx.quiet {
        println!("{}", style.heading("Let's do this."));
    }

    let opts = SessionOptions {
        root: root.to_path_buf(),
        force: cli.force || cfg.apply.force,
        backups: cfg.apply.backups && !cli.no_backup,
        context_lines: cfg.apply.context_lines,
        quiet: ctx.quiet,
        style,
    };
    let mut session =
        Session::new(client, prompter, walker, opts, snapshot, messages)?.with_cancel_flag(cancel);
    session.run()?;
    Ok(EXIT_OK)
}

/// Expand `~` and canonicalize the project root.
pub fn resolve_root(dir: &Path) -> Result<PathBuf> {
    let raw = dir.to_string_lossy();
    let expanded = shellexpand::tilde(&raw);
    let path = PathBuf::from(expanded.as_ref());
    dunce::canonicalize(&path).with_context(|| format!("directory not found: {}", path.display()))
}

/// Resolve model settings once: CLI over config, key from the environment.
pub fn model_config(cli: &Cli, cfg: &Config) -> ModelConfig {
    let api_key = std::env::var(&cfg.model.api_key_env).ok();
    ModelConfig {
        endpoint: cfg.model.endpoint.clone(),
        model: cli.model.clone().unwrap_or_else(|| cfg.model.name.clone()),
        api_key,
        api_key_env: cfg.model.api_key_env.clone(),
        max_tokens: cli.max_tokens.or(cfg.model.max_tokens),
        temperature: cfg.model.temperature,
        timeout_secs: cfg.model.timeout_secs,
    }
}

fn list_models(client: &dyn ModelClient, filter: Option<&str>, style: &Styler) -> Result<()> {
    let needle = filter.map(str::to_lowercase);
    let models = client.list_models()?;
    println!("{}", style.heading("Available models:"));
    for model in models
        .iter()
        .filter(|m| needle.as_ref().is_none_or(|n| m.to_lowercase().contains(n)))
    {
        println!("- {model}");
    }
    Ok(())
}

/// Requirements from arguments, else piped stdin, else asked for.
fn gather_requirements(cli: &Cli, ctx: &AppContext, prompter: &mut dyn Prompter) -> Result<String> {
    let from_args = cli.requirements_text();
    if !from_args.is_empty() {
        return Ok(from_args);
    }

    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        let mut buf = String::new();
        stdin.lock().read_to_string(&mut buf).context("read requirements from stdin")?;
        let piped = buf.trim().to_string();
        if !piped.is_empty() {
            return Ok(piped);
        }
    }

    if ctx.dry_run {
        return Ok(String::new());
    }

    loop {
        let answer = prompter.input("What are your requirements?")?;
        if !answer.trim().is_empty() {
            return Ok(answer.trim().to_string());
        }
    }
}
