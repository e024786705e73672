//! `ChatSync` headless smoke client for the chat synchronization engine.
//!
//! Wires the engine against a real chat room server and REST service and
//! drives it from stdin. Intents map to slash commands; everything else is
//! sent as a message to the current chat.
//!
//! ```bash
//! chatsync --ws-url ws://chat.example.net:8080/api/v1/ws \
//!     --rest-url http://chat.example.net:8080/api \
//!     --session-id 42 --display-name Ada --token "$TOKEN"
//! ```
//!
//! Commands: `/chats`, `/select <id>`, `/new`, `/invite a,b,c`,
//! `/name <name>`, `/quit`.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_appender::non_blocking::WorkerGuard;

use chatsync::auth::{AuthGate, FileTokenStore};
use chatsync::backend::HttpBackend;
use chatsync::config::{CliArgs, ClientConfig};
use chatsync::session::Session;
use chatsync::store::{ChatStore, StoreEvent};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("chatsync starting");

    let Some(ws_url) = config.ws_url.clone() else {
        eprintln!("error: no WebSocket URL configured (--ws-url or [network] ws_url)");
        return ExitCode::FAILURE;
    };
    let Some(rest_url) = config.rest_url.clone() else {
        eprintln!("error: no REST URL configured (--rest-url or [network] rest_url)");
        return ExitCode::FAILURE;
    };

    let session = Arc::new(Session::new(
        cli.session_id.clone(),
        cli.display_name.clone(),
        cli.token.clone(),
    ));
    let backend = Arc::new(HttpBackend::new(rest_url));
    let tokens = match config.token_file.as_ref() {
        Some(path) => FileTokenStore::new(path),
        None => FileTokenStore::default_location()
            .unwrap_or_else(|| FileTokenStore::new("refresh-token")),
    };
    let gate = AuthGate::new(Arc::clone(&backend), tokens, Arc::clone(&session));

    let (store, mut events) = ChatStore::new(backend, gate, session, config.event_buffer);

    store.load_chats().await;
    if let Err(e) = store.connect(&ws_url).await {
        eprintln!("error: could not connect: {e}");
        return ExitCode::FAILURE;
    }

    // Print engine updates as they land.
    let event_store = Arc::clone(&store);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                StoreEvent::MessagesChanged => {
                    let snapshot = event_store.snapshot().await;
                    if let Some(last) = snapshot.messages.last() {
                        println!("[{}] {}: {}", last.timestamp, last.sender, last.message_text);
                    }
                }
                StoreEvent::ChatsChanged => {
                    let snapshot = event_store.snapshot().await;
                    if let Some(current) = snapshot.current_chat {
                        let name = if current.name.is_empty() {
                            "<unnamed>"
                        } else {
                            current.name.as_str()
                        };
                        println!("-- chat: {name} ({} members)", current.members.len());
                    }
                }
                StoreEvent::RosterChanged => {
                    let members = event_store.active_members();
                    println!("-- roster: {} member(s) present", members.len());
                }
                StoreEvent::ConnectionError(reason) => {
                    eprintln!("!! connection error: {reason}");
                }
            }
        }
    });

    run_input_loop(&store).await;

    store.disconnect().await;
    tracing::info!("chatsync exiting");
    ExitCode::SUCCESS
}

/// Reads stdin lines and maps them to engine intents.
async fn run_input_loop(
    store: &Arc<ChatStore<HttpBackend, HttpBackend, FileTokenStore>>,
) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(err = %e, "stdin read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            let (command, argument) = rest.split_once(' ').unwrap_or((rest, ""));
            match command {
                "chats" => {
                    let snapshot = store.snapshot().await;
                    for chat in snapshot.chats.iter() {
                        let marker = if snapshot
                            .current_chat
                            .as_ref()
                            .is_some_and(|current| current.id == chat.id)
                        {
                            "*"
                        } else {
                            " "
                        };
                        println!("{marker} {} {}", chat.id, chat.name);
                    }
                }
                "select" => store.select_chat(argument.trim()).await,
                "new" => match store.create_chat().await {
                    Ok(chat) => println!("-- created pending chat {}", chat.id),
                    Err(e) => eprintln!("error: {e}"),
                },
                "invite" => {
                    if let Err(e) = store.add_members(argument).await {
                        eprintln!("error: {e}");
                    }
                }
                "name" => match store.commit_chat_name(argument.trim()).await {
                    Ok(chat) => println!("-- chat saved as {} ({})", chat.name, chat.id),
                    Err(e) => eprintln!("error: {e}"),
                },
                "quit" => break,
                other => eprintln!("unknown command: /{other}"),
            }
            continue;
        }

        if let Err(rejection) = store.send_message(line).await {
            println!("{rejection}");
        }
    }
}

/// Initialize logging to stderr, or to a file when `--log-file` is given.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Some(path) = file_path {
        let dir = path.parent()?;
        let file_name = path.file_name()?.to_str()?;
        let file_appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_env_filter(env_filter)
            .with_ansi(false)
            .init();
        return Some(guard);
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();
    None
}
