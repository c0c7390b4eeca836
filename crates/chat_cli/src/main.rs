use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use chat_backend::{Role, StaticIdentity};
use chat_engine::{init_tracing, ChatController, EnvConfig, LogEvent, Turn, ViewContext};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::info;

mod backends;
mod commands;

use commands::{parse_slash_command, SlashCommand, HELP_TEXT};

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    let config = EnvConfig::from_env();
    init_tracing(config.log_filter.as_deref());

    let backend = backends::backend_from_config(&config).map_err(io::Error::other)?;
    info!(backend = backends::backend_id(&config), "starting chat");
    let identity = Arc::new(StaticIdentity::new(
        config.api_token.clone(),
        config.user_id.clone().or_else(|| {
            config
                .use_mock
                .then(|| "local-user".to_string())
        }),
    ));
    let controller = ChatController::new(backend, identity);
    let printer = tokio::spawn(print_events(controller.subscribe()));

    report(controller.resolve_session(&startup_context()).await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_slash_command(&line) else {
            if line.trim().is_empty() {
                continue;
            }
            if let Err(error) = controller.send_message(&line).await {
                eprintln!("{error}");
            }
            tokio::task::yield_now().await;
            continue;
        };

        match command {
            SlashCommand::Help => println!("{HELP_TEXT}"),
            SlashCommand::New => match controller.start_new_conversation().await {
                Ok(session_id) => println!("[new conversation {session_id}]"),
                Err(error) => eprintln!("{error}"),
            },
            SlashCommand::Open(session_id) => {
                report(controller.open_conversation(&session_id).await);
            }
            SlashCommand::History => match controller.list_conversations().await {
                Ok(sessions) if sessions.is_empty() => println!("[no stored conversations]"),
                Ok(sessions) => {
                    for session in sessions {
                        println!(
                            "{}  {}",
                            session.id,
                            session.title.as_deref().unwrap_or("(untitled)")
                        );
                    }
                }
                Err(error) => eprintln!("{error}"),
            },
            SlashCommand::Delete(session_id) => {
                match controller.delete_conversation(&session_id).await {
                    Ok(()) => println!("[deleted {session_id}]"),
                    Err(error) => eprintln!("{error}"),
                }
            }
            SlashCommand::Idea => match controller.convert_to_idea().await {
                Ok(Some(idea_id)) => println!("[converted to idea {idea_id}]"),
                Ok(None) => println!("[converted to idea]"),
                Err(error) => eprintln!("{error}"),
            },
            SlashCommand::Retry => {
                report(controller.retry_resolution(&startup_context()).await);
            }
            SlashCommand::Quit => break,
            SlashCommand::Usage(usage) => eprintln!("usage: {usage}"),
            SlashCommand::Unknown(command) => {
                eprintln!("unknown command {command}; try /help");
            }
        }
    }

    printer.abort();
    Ok(())
}

/// `chat [<session id> | --new]`
fn startup_context() -> ViewContext {
    match std::env::args().nth(1).as_deref() {
        Some("--new") => ViewContext::fresh(),
        Some(session_id) => ViewContext::resume(session_id),
        None => ViewContext::default(),
    }
}

fn report<T, E: std::fmt::Display>(result: Result<T, E>) {
    if let Err(error) = result {
        eprintln!("{error}");
    }
}

async fn print_events(mut events: broadcast::Receiver<LogEvent>) {
    // Streamed text per open turn, so a fallback reply can be shown in full.
    let mut streamed: HashMap<String, String> = HashMap::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let mut stdout = io::stdout().lock();
        let _ = match event {
            LogEvent::Reset {
                conversation_id,
                turns,
            } => {
                streamed.clear();
                match conversation_id {
                    Some(id) => writeln!(stdout, "[conversation {id}]"),
                    None => writeln!(stdout, "[no conversation]"),
                }
                .and_then(|()| {
                    turns
                        .iter()
                        .try_for_each(|turn| writeln!(stdout, "{}", format_turn(turn)))
                })
            }
            LogEvent::TurnAdded(turn) if turn.is_open() => {
                streamed.insert(turn.id, String::new());
                write!(stdout, "assistant> ")
            }
            LogEvent::TurnAdded(_) => Ok(()),
            LogEvent::TokenAppended { turn_id, token } => {
                streamed.entry(turn_id).or_default().push_str(&token);
                write!(stdout, "{token}")
            }
            LogEvent::TurnFinalized { turn_id, content } => {
                match streamed.remove(&turn_id) {
                    Some(text) if text == content => writeln!(stdout),
                    Some(text) if text.is_empty() => writeln!(stdout, "{content}"),
                    _ => writeln!(stdout, "\nassistant> {content}"),
                }
            }
        };
        let _ = stdout.flush();
    }
}

fn format_turn(turn: &Turn) -> String {
    let speaker = match turn.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    format!("{speaker}> {}", turn.content)
}
