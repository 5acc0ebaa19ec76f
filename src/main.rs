use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use multichat::cli::{
    ask_tab, log_filter, parse_repl_line, Args, Command, ModeArgs, ReplCommand, REPL_HELP,
};
use multichat::message::Role;
use multichat::proxy;
use multichat::render::{render_comparison, render_enhancement, render_event, render_message};
use multichat::upload::UploadFile;
use multichat::{ChatError, ChatEvent, ChatHub, Config, EventSink, HttpBackend, Reply, SendOptions, TabKind};

type Hub = ChatHub<HttpBackend>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(rust_log.as_deref(), &args.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Command::Completions { shell } = &args.command {
        clap_complete::generate(*shell, &mut Args::command(), "multichat", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref())?;
    args.apply_to(&mut config);

    match args.command {
        Command::Serve { .. } => {
            eprintln!(
                "{}",
                format!(
                    "  Proxy on http://{}:{} -> {}",
                    config.proxy_bind, config.proxy_port, config.backend_url
                )
                .bright_green()
            );
            eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
            proxy::serve(&config).await?;
        }
        Command::Chat { mode, no_proxy } => run_chat(config, mode, no_proxy).await?,
        Command::Ask {
            prompt,
            mode,
            files,
            enhance,
            no_proxy,
        } => run_ask(config, &prompt, mode, files, enhance, no_proxy).await?,
        Command::Completions { .. } => {}
    }
    Ok(())
}

fn print_flush(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

fn prompt(hub: &Hub) {
    print_flush(&format!("{} ", format!("[{}]>", hub.active()).bright_blue().bold()));
}

fn report(err: &ChatError) {
    eprintln!("{}", format!("  {err}").bright_red());
}

/// Start the proxy in-process and point Q&A at it. A bind failure leaves
/// `proxy_url` as configured, on the assumption that a proxy is already up.
async fn start_proxy(config: &mut Config) {
    match proxy::spawn_local(config).await {
        Ok(addr) => config.proxy_url = proxy::local_url(addr),
        Err(e) => warn!(error = %e, "proxy not started; assuming one is already running"),
    }
}

async fn load_files(paths: &[PathBuf]) -> Result<Vec<UploadFile>, ChatError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(UploadFile::from_path(path).await?);
    }
    Ok(files)
}

// -- One-shot ------------------------------------------------------------------

async fn run_ask(
    mut config: Config,
    prompt: &str,
    mode: ModeArgs,
    files: Vec<PathBuf>,
    enhance: bool,
    no_proxy: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let tab = ask_tab(&mode, &files, enhance);
    // Only Q&A goes through the proxy.
    if tab == TabKind::Qna && !no_proxy {
        start_proxy(&mut config).await;
    }

    let (events, mut rx) = EventSink::channel();
    let mut hub = ChatHub::new(Arc::new(HttpBackend::new(&config)?), config, events);
    hub.set_active(tab);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(text) = render_event(&event) {
                print_flush(&text);
            }
        }
    });

    let outcome = async {
        if !files.is_empty() {
            hub.rag().select_files(load_files(&files).await?)?;
            hub.rag().embed().await?;
        }
        let reply = hub.send(prompt, &mode.send_options()).await?;
        if enhance {
            if let Reply::Message(message) = &reply {
                hub.quality().enhance_message(&message.id).await?;
            }
        }
        Ok::<_, ChatError>(())
    }
    .await;

    // Dropping the hub closes every event sender, which ends the printer.
    drop(hub);
    let _ = printer.await;
    outcome?;
    Ok(())
}

// -- Interactive ---------------------------------------------------------------

async fn run_chat(
    mut config: Config,
    mode: ModeArgs,
    no_proxy: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !no_proxy {
        start_proxy(&mut config).await;
    }

    let (events, mut rx) = EventSink::channel();
    let mut hub = ChatHub::new(Arc::new(HttpBackend::new(&config)?), config, events);
    hub.set_active(mode.tab);
    let mut options = mode.send_options();

    println!("{}", "MULTICHAT".bright_cyan().bold());
    println!("{}", "Type a question, or /help for commands.".bright_black());
    prompt(&hub);

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                let settled = matches!(event, ChatEvent::LoadingChanged { loading: false, .. });
                if let Some(text) = render_event(&event) {
                    print_flush(&format!("\r{text}"));
                }
                if settled {
                    prompt(&hub);
                }
            }
            line = lines.next() => {
                let Some(line) = line else { break };
                let command = match parse_repl_line(&line?) {
                    Ok(c) => c,
                    Err(msg) => {
                        eprintln!("{}", format!("  {msg}").bright_red());
                        prompt(&hub);
                        continue;
                    }
                };
                if command == ReplCommand::Quit {
                    break;
                }
                handle_command(&mut hub, &mut options, command).await;
                prompt(&hub);
            }
        }
    }
    Ok(())
}

/// Run a send in the background. Backend failures already show up as failure
/// indicators through the event stream, so only local rejections are printed.
fn spawn_send(hub: &Hub, text: String, options: SendOptions) {
    let hub = hub.clone();
    tokio::spawn(async move {
        if let Err(err) = hub.send(&text, &options).await {
            if err.is_precondition() {
                report(&err);
            }
        }
    });
}

async fn handle_command(hub: &mut Hub, options: &mut SendOptions, command: ReplCommand) {
    match command {
        ReplCommand::Empty | ReplCommand::Quit => {}
        ReplCommand::Say(text) => spawn_send(hub, text, options.clone()),
        ReplCommand::Tab(tab) => {
            hub.set_active(tab);
            println!("{}", format!("  switched to {}", tab.title()).bright_black());
        }
        ReplCommand::Clear => hub.clear(),
        ReplCommand::Files(paths) if paths.is_empty() => {
            let files = hub.rag().files();
            if files.is_empty() {
                println!("{}", "  no files selected".bright_black());
            }
            for (i, f) in files.iter().enumerate() {
                println!("  {}. {} ({} bytes)", i + 1, f.file_name, f.data.len());
            }
        }
        ReplCommand::Files(paths) => {
            let result = match load_files(&paths).await {
                Ok(files) => hub.rag().select_files(files).map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                report(&e);
            }
        }
        ReplCommand::RemoveFile(index) => {
            if hub.rag().remove_file(index).is_none() {
                eprintln!("{}", format!("  no file #{}", index + 1).bright_red());
            }
        }
        ReplCommand::Embed => {
            let hub = hub.clone();
            tokio::spawn(async move {
                if let Err(e) = hub.rag().embed().await {
                    if !matches!(e, ChatError::Cancelled) {
                        report(&e);
                    }
                }
            });
        }
        ReplCommand::ShowKey => {
            let key = hub.rag().rag_key();
            if key.is_empty() {
                println!("{}", "  no retrieval key".bright_black());
            } else {
                println!("  {key}");
            }
        }
        ReplCommand::SetKey(key) => hub.rag().set_rag_key(key),
        ReplCommand::ClearKey => hub.rag().clear_rag_key(),
        ReplCommand::Model(None) => {
            let model = options
                .model
                .clone()
                .unwrap_or_else(|| hub.config().model_for(options.use_openai).to_string());
            println!("  {model}");
        }
        ReplCommand::Model(Some(model)) => options.model = Some(model),
        ReplCommand::OpenAi(value) => {
            options.use_openai = value.unwrap_or(!options.use_openai);
            let provider = if options.use_openai { "OpenAI" } else { "local" };
            println!("{}", format!("  provider: {provider}").bright_black());
        }
        ReplCommand::Models(models) => options.compare_models = Some(models),
        ReplCommand::Enhance => {
            let latest = hub
                .quality()
                .messages()
                .into_iter()
                .rev()
                .find(|m| m.role == Role::Assistant && !m.is_failure());
            match latest {
                Some(message) => {
                    let hub = hub.clone();
                    tokio::spawn(async move {
                        if let Err(e) = hub.quality().enhance_message(&message.id).await {
                            if !matches!(e, ChatError::Cancelled) {
                                report(&e);
                            }
                        }
                    });
                }
                None => eprintln!("{}", "  no quality answer to enhance yet".bright_red()),
            }
        }
        ReplCommand::History => print_history(hub),
        ReplCommand::Help => println!("{REPL_HELP}"),
    }
}

fn print_history(hub: &Hub) {
    if hub.active() == TabKind::Compare {
        for comparison in hub.compare().comparisons() {
            print_flush(&render_comparison(&comparison));
        }
        return;
    }
    for message in hub.messages() {
        print_flush(&render_message(&message));
        if hub.active() == TabKind::Quality {
            if let Some(enhancement) = hub.quality().enhancement(&message.id) {
                print_flush(&render_enhancement(&enhancement));
            }
        }
    }
}
