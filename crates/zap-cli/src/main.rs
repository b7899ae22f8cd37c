//! zap - streaming chat client with branchable conversations

mod commands;
mod config;
mod tools;

use clap::Parser;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zap_session::{ConfigStore, PersistedConversation, Session, SessionConfig, WriterSink};
use zap_stream::Transport;
use zap_stream::transports::{
    completions::ChatCompletionsTransport,
    direct::DirectTransport,
    payload::{DEFAULT_MODEL, Endpoint},
};

use crate::commands::CommandResult;
use crate::config::{Backend, Config, FileStore};

/// zap - streaming chat client with branchable conversations
#[derive(Parser, Debug)]
#[command(name = "zap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend dialect
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// API root of the backend
    #[arg(long)]
    base_url: Option<String>,

    /// Model name
    #[arg(short, long)]
    model: Option<String>,

    /// Bearer token (overrides config and ZAP_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Continue an existing conversation by id
    #[arg(long, conflicts_with = "new")]
    conversation: Option<String>,

    /// Start a new conversation instead of the saved one
    #[arg(long)]
    new: bool,

    /// Tool to activate (e.g. file)
    #[arg(short, long)]
    tool: Option<String>,

    /// Attachment ids for the first message (comma separated)
    #[arg(short, long, value_delimiter = ',')]
    attach: Vec<String>,

    /// Exchange timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("zap_cli=debug,zap_session=debug,zap_stream=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_transport(args: &Args, cfg: &Config) -> zap_stream::Result<Arc<dyn Transport>> {
    let backend = args.backend.or(cfg.backend).unwrap_or_default();
    let base_url = args.base_url.clone().or_else(|| cfg.base_url.clone());
    let model = args.model.clone().or_else(|| cfg.model.clone());
    let api_key = args.api_key.clone().or_else(|| cfg.api_key());

    match backend {
        Backend::AppChat => {
            let endpoint = Endpoint::new(
                base_url.unwrap_or_else(|| config::DEFAULT_APP_CHAT_URL.to_string()),
            )
            .with_origin(
                cfg.origin
                    .clone()
                    .unwrap_or_else(|| config::DEFAULT_ORIGIN.to_string()),
            )
            .with_model(model.unwrap_or_else(|| DEFAULT_MODEL.to_string()));
            endpoint.validate()?;
            let mut transport = DirectTransport::new(endpoint);
            if let Some(key) = api_key {
                transport = transport.with_api_key(key);
            }
            Ok(Arc::new(transport))
        }
        Backend::ChatCompletions => {
            let mut transport = ChatCompletionsTransport::new(
                base_url.unwrap_or_else(|| config::DEFAULT_COMPLETIONS_URL.to_string()),
                model.unwrap_or_else(|| config::DEFAULT_COMPLETIONS_MODEL.to_string()),
            );
            transport.validate()?;
            if let Some(key) = api_key {
                transport = transport.with_api_key(key);
            }
            Ok(Arc::new(transport))
        }
    }
}

/// Write the persistable part of the session back to the store
fn persist(session: &Session, store: &dyn ConfigStore) {
    if let Err(e) = session.snapshot().save(store) {
        tracing::warn!("Failed to persist conversation: {}", e);
        eprintln!("Warning: could not save conversation state: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = Config::load();
    let transport = build_transport(&args, &cfg)?;

    let session_config = SessionConfig {
        exchange_timeout: args
            .timeout
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| cfg.exchange_timeout()),
    };
    let mut session = Session::new(session_config, transport);
    session.set_tools(tools::builtin());

    if let Some(name) = args.tool.as_deref().or(cfg.default_tool.as_deref()) {
        session.set_active_tool(Some(name))?;
    }

    // Restore the persisted conversation
    let store = FileStore::new(Config::config_dir());
    match PersistedConversation::load(&store) {
        Ok(Some(record)) => session.restore(record),
        Ok(None) => {}
        Err(e) => eprintln!("Warning: ignoring saved conversation state: {}", e),
    }

    if args.new {
        session.start_new();
        persist(&session, &store);
    } else {
        let target = args
            .conversation
            .clone()
            .or_else(|| session.conversation_id().map(str::to_string));
        if let Some(id) = target {
            match session.resume(&id).await {
                Ok(()) => {
                    if args.conversation.is_some() {
                        persist(&session, &store);
                    }
                }
                Err(e) => eprintln!("Warning: could not resume conversation {}: {}", id, e),
            }
        }
    }

    if !args.attach.is_empty() {
        session.set_attachments(args.attach.clone());
    }

    // Ctrl-C aborts the exchange in flight, or exits when idle
    let handle = session.handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.is_running() {
                handle.abort();
            } else {
                std::process::exit(130);
            }
        }
    });

    // Non-interactive mode
    if let Some(command) = args.command {
        let ok = run_exchange(&mut session, &store, &command).await;
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    run_interactive(&mut session, &store).await
}

/// Run one exchange, streaming tokens to stdout. Returns whether it completed.
async fn run_exchange(session: &mut Session, store: &dyn ConfigStore, input: &str) -> bool {
    let conversation_before = session.conversation_id().map(str::to_string);
    let mut sink = WriterSink::new(io::stdout());

    let result = session.stream_exchange(input, &mut sink).await;
    session.clear_attachments();

    match result {
        Ok(outcome) => {
            if let Some(e) = outcome.tool_error {
                eprintln!("Tool error: {}", e);
            }
            if session.conversation_id() != conversation_before.as_deref() {
                persist(session, store);
            }
            true
        }
        Err(e) if e.is_aborted() => {
            eprintln!("[Aborted]");
            false
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_retryable() {
                eprintln!("(temporary failure, send the message again to retry)");
            }
            false
        }
    }
}

async fn run_interactive(session: &mut Session, store: &dyn ConfigStore) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        match session.conversation_id() {
            Some(id) => eprintln!("zap conversation: {}", id),
            None => eprintln!("zap (new conversation)"),
        }
        eprintln!("Type : for commands, \\q to quit.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input, session) {
            match result {
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::Changed(msg) => {
                    persist(session, store);
                    println!("{}", msg);
                }
                CommandResult::Failed(msg) => eprintln!("{}", msg),
                CommandResult::Exit => break,
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: :{}", cmd);
                    println!("Type : for available commands.");
                }
            }
            continue;
        }

        run_exchange(session, store, input).await;
    }

    Ok(())
}
