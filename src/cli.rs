use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DrainOrder};
use crate::message::CompareModels;
use crate::tabs::{SendOptions, TabKind};

#[derive(Parser, Debug)]
#[command(name = "multichat")]
#[command(version)]
#[command(about = "Multi-mode chat client: Q&A, document retrieval, model comparison and answer enhancement")]
pub struct Args {
    /// Config file (defaults to ./multichat.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter for stderr output (e.g. info, multichat=debug)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Override the model backend origin
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP proxy in the foreground
    Serve {
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Interactive chat session
    Chat {
        #[command(flatten)]
        mode: ModeArgs,

        /// Do not start the proxy in-process (use one already running)
        #[arg(long)]
        no_proxy: bool,
    },

    /// Send a single prompt and print the answer
    Ask {
        prompt: String,

        #[command(flatten)]
        mode: ModeArgs,

        /// PDF files to embed before asking (retrieval tab)
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,

        /// Also print an enhanced version of the answer; implies the quality tab
        #[arg(long, conflicts_with = "files")]
        enhance: bool,

        /// Do not start the proxy in-process (use one already running)
        #[arg(long)]
        no_proxy: bool,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Mode configuration shared by `chat` and `ask`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ModeArgs {
    /// Tab to start in
    #[arg(long, value_enum, default_value = "qna")]
    pub tab: TabKind,

    /// Model for Q&A and retrieval
    #[arg(long)]
    pub model: Option<String>,

    /// Use the OpenAI provider instead of the local one
    #[arg(long)]
    pub openai: bool,

    /// Comparison models as model1,model2,model3
    #[arg(long, value_parser = parse_models)]
    pub models: Option<CompareModels>,

    /// Order in which comparison answers are applied
    #[arg(long, value_enum)]
    pub drain: Option<DrainOrder>,
}

impl ModeArgs {
    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            use_openai: self.openai,
            model: self.model.clone(),
            compare_models: self.models.clone(),
        }
    }
}

impl Args {
    /// Fold CLI overrides into a loaded config.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(url) = &self.backend_url {
            config.backend_url = url.clone();
        }
        match &self.command {
            Command::Serve { bind, port } => {
                if let Some(bind) = bind {
                    config.proxy_bind = bind.clone();
                }
                if let Some(port) = port {
                    config.proxy_port = *port;
                }
            }
            Command::Chat { mode, .. } | Command::Ask { mode, .. } => {
                if let Some(drain) = mode.drain {
                    config.compare_drain = drain;
                }
            }
            Command::Completions { .. } => {}
        }
    }
}

/// Tab a one-shot `ask` runs in: `--enhance` needs the quality tab and
/// attached files need the retrieval tab; otherwise `--tab` decides.
pub fn ask_tab(mode: &ModeArgs, files: &[PathBuf], enhance: bool) -> TabKind {
    if enhance {
        TabKind::Quality
    } else if !files.is_empty() {
        TabKind::Rag
    } else {
        mode.tab
    }
}

/// Log filter from `RUST_LOG` when set and valid, else from `--log-level`.
pub fn log_filter(rust_log: Option<&str>, log_level: &str) -> EnvFilter {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_new(log_level).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

/// Parse `a,b,c` into three comparison models.
pub fn parse_models(s: &str) -> Result<CompareModels, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [a, b, c] if !a.is_empty() && !b.is_empty() && !c.is_empty() => {
            Ok(CompareModels::new(*a, *b, *c))
        }
        _ => Err(format!("expected three comma-separated model names, got '{s}'")),
    }
}

// -- Chat REPL commands -------------------------------------------------------

pub const REPL_HELP: &str = "\
/tab <qna|rag|compare|quality>  switch tab
/clear                          clear the current tab
/files [PATH..]                 list selected files, or add PDFs
/rmfile <N>                     remove file N from the selection
/embed                          embed the selected files
/key [KEY|clear]                show, set or clear the retrieval key
/model [NAME]                   show or set the model
/openai [on|off]                toggle the OpenAI provider
/models <a,b,c>                 set the comparison models
/enhance                        enhance the latest quality answer
/history                        reprint the current tab
/help                           this text
/quit                           leave";

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Say(String),
    Tab(TabKind),
    Clear,
    Files(Vec<PathBuf>),
    RemoveFile(usize),
    Embed,
    ShowKey,
    SetKey(String),
    ClearKey,
    Model(Option<String>),
    OpenAi(Option<bool>),
    Models(CompareModels),
    Enhance,
    History,
    Help,
    Quit,
    Empty,
}

/// Parse a REPL line. Lines not starting with `/` are prompts.
pub fn parse_repl_line(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ReplCommand::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(ReplCommand::Say(line.to_string()));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (rest, ""),
    };
    let cmd = match (name, arg) {
        ("tab", a) => TabKind::parse(a)
            .map(ReplCommand::Tab)
            .ok_or_else(|| format!("unknown tab '{a}' (qna, rag, compare, quality)"))?,
        ("clear", _) => ReplCommand::Clear,
        ("files", a) => ReplCommand::Files(a.split_whitespace().map(PathBuf::from).collect()),
        ("rmfile", a) => match a.parse::<usize>() {
            Ok(n) if n > 0 => ReplCommand::RemoveFile(n - 1),
            _ => return Err("usage: /rmfile <N> (1-based)".to_string()),
        },
        ("embed", _) => ReplCommand::Embed,
        ("key", "") => ReplCommand::ShowKey,
        ("key", "clear") => ReplCommand::ClearKey,
        ("key", a) => ReplCommand::SetKey(a.to_string()),
        ("model", "") => ReplCommand::Model(None),
        ("model", a) => ReplCommand::Model(Some(a.to_string())),
        ("openai", "") => ReplCommand::OpenAi(None),
        ("openai", "on") => ReplCommand::OpenAi(Some(true)),
        ("openai", "off") => ReplCommand::OpenAi(Some(false)),
        ("models", a) => ReplCommand::Models(parse_models(a)?),
        ("enhance", _) => ReplCommand::Enhance,
        ("history", _) => ReplCommand::History,
        ("help", _) => ReplCommand::Help,
        ("quit" | "exit", _) => ReplCommand::Quit,
        _ => return Err(format!("unknown command '{line}'; try /help")),
    };
    Ok(cmd)
}
