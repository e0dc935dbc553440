use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use url::Url;

use parley::config::{ResponderSettings, Settings, SettingsService};
use parley::models::Notice;
use parley::providers::{CannedResponder, LocalProvider, LocalProviderConfig, ResponseSource};
use parley::services::export::export_to_markdown;
use parley::{
    ChatError, ChatSession, ConversationRegistry, CoordinatorSettings, CyclePhase,
    MessageLedger, ResponseCoordinator, ResponseStatus,
};

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Send(&'a str),
    New,
    List,
    Switch(&'a str),
    Rename(&'a str),
    Delete(Option<&'a str>),
    Export,
    Notices,
    Help,
    Quit,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Send(line);
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };
        match (name, arg) {
            ("new", _) => Command::New,
            ("list", _) => Command::List,
            ("switch", Some(id)) => Command::Switch(id),
            ("rename", Some(title)) => Command::Rename(title),
            ("delete", id) => Command::Delete(id),
            ("export", _) => Command::Export,
            ("notices", _) => Command::Notices,
            ("help", _) => Command::Help,
            ("quit", _) | ("exit", _) => Command::Quit,
            _ => Command::Unknown(line),
        }
    }
}

fn build_source(settings: &Settings) -> Result<Arc<dyn ResponseSource>> {
    let source: Arc<dyn ResponseSource> = match &settings.responder {
        ResponderSettings::Canned { responses } => match responses {
            Some(responses) => Arc::new(CannedResponder::with_responses(
                settings.fetch_delay(),
                responses.clone(),
            )),
            None => Arc::new(CannedResponder::new(settings.fetch_delay())),
        },
        ResponderSettings::Local {
            base_url,
            model,
            api_key,
            system_prompt,
            temperature,
        } => Arc::new(LocalProvider::new(LocalProviderConfig {
            base_url: Url::parse(base_url)
                .with_context(|| format!("Invalid base_url: {}", base_url))?,
            model: model.clone(),
            api_key: api_key.clone(),
            system_prompt: system_prompt.clone(),
            temperature: *temperature,
        })),
    };
    Ok(source)
}

/// Notices pushed after `last_seen`, or all of them once `last_seen` has
/// been cleared away.
fn unseen_notices<'a>(notices: &'a [Notice], last_seen: Option<&str>) -> &'a [Notice] {
    let start = last_seen
        .and_then(|id| notices.iter().position(|n| n.id == id))
        .map_or(0, |i| i + 1);
    &notices[start..]
}

/// Echo the in-flight reply to stdout as it grows, and report failures once
/// the cycle settles.
async fn render_status(
    ledger: MessageLedger,
    mut status: watch::Receiver<ResponseStatus>,
    mut phase: watch::Receiver<CyclePhase>,
) {
    let mut printed = 0usize;
    let mut was_thinking = false;
    let mut last_notice: Option<String> = None;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                let mut out = std::io::stdout();

                if current.is_thinking && !was_thinking {
                    let _ = write!(out, "assistant> ...");
                    printed = 0;
                }

                if !current.scratchpad.is_empty() {
                    if printed == 0 {
                        let _ = write!(out, "\rassistant> ");
                    }
                    match current.scratchpad.get(printed..) {
                        Some(tail) => {
                            let _ = write!(out, "{}", tail);
                        }
                        None => {
                            let _ = write!(out, "\rassistant> {}", current.scratchpad);
                        }
                    }
                    printed = current.scratchpad.len();
                } else if printed > 0 || (was_thinking && !current.is_thinking) {
                    let _ = writeln!(out);
                    printed = 0;
                }

                was_thinking = current.is_thinking;
                let _ = out.flush();
            }
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
                if *phase.borrow_and_update() != CyclePhase::Idle {
                    continue;
                }
                // Failed cycles push their notice before going idle
                let notices = ledger.notices();
                let fresh = unseen_notices(&notices, last_notice.as_deref());
                for notice in fresh {
                    println!("error: {}", notice.text);
                }
                if let Some(last) = notices.last() {
                    last_notice = Some(last.id.clone());
                }
            }
        }
    }
}

fn print_help() {
    println!("Type a message to chat. Commands:");
    println!("  /new              start a new chat");
    println!("  /list             list conversations");
    println!("  /switch <id>      switch conversation");
    println!("  /rename <title>   rename the current conversation");
    println!("  /delete [id]      delete a conversation (default: current)");
    println!("  /export           print the current conversation as markdown");
    println!("  /notices          show and clear errors");
    println!("  /quit             exit");
}

fn handle(session: &ChatSession, command: Command<'_>) {
    match command {
        Command::Send(text) => match session.send_message(text) {
            Ok(_) => {}
            Err(ChatError::Validation(_)) => {}
            Err(e) => eprintln!("{}", e),
        },
        Command::New => session.start_new_chat(),
        Command::List => {
            let current = session.registry().current_id();
            for conv in session.conversations() {
                let marker = if current.as_deref() == Some(conv.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {}  {}  ({})",
                    marker,
                    conv.id,
                    conv.title,
                    conv.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Switch(id) => {
            if session.registry().get(id).is_none() {
                println!("No conversation {}", id);
            } else {
                session.select_conversation(id);
                for msg in session.current_messages() {
                    println!("{}> {}", msg.role.as_str(), msg.content);
                }
            }
        }
        Command::Rename(title) => match session.registry().current_id() {
            Some(id) => session.rename_conversation(&id, title),
            None => println!("No conversation selected"),
        },
        Command::Delete(id) => {
            match id
                .map(str::to_string)
                .or_else(|| session.registry().current_id())
            {
                Some(id) => {
                    session.delete_conversation(&id);
                }
                None => println!("No conversation selected"),
            }
        }
        Command::Export => match session.registry().current() {
            Some(conv) => print!("{}", export_to_markdown(&conv, &session.current_messages())),
            None => println!("No conversation selected"),
        },
        Command::Notices => {
            for notice in session.ledger().notices() {
                println!("[{}] {}", notice.created_at.format("%H:%M:%S"), notice.text);
            }
            session.ledger().clear_notices();
        }
        Command::Help => print_help(),
        Command::Unknown(line) => println!("Unknown command: {}", line),
        Command::Quit => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = match SettingsService::default_path() {
        Some(path) => SettingsService::load(&path),
        None => Settings::default(),
    };
    settings.validate()?;

    let source = build_source(&settings)?;
    let session = ChatSession::new(ConversationRegistry::new(), MessageLedger::new());
    session.seed_conversations(&settings.default_conversations);

    let coordinator = ResponseCoordinator::new(
        session.registry().clone(),
        session.ledger().clone(),
        source,
        CoordinatorSettings::from(&settings),
    )
    .spawn();
    let renderer = tokio::spawn(render_status(
        session.ledger().clone(),
        session.ledger().subscribe_status(),
        coordinator.subscribe_phase(),
    ));

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = Command::parse(&line);
        if command == Command::Quit {
            break;
        }
        handle(&session, command);
    }

    coordinator.shutdown().await;
    renderer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("hello there"), Command::Send("hello there"));
        assert_eq!(Command::parse(" /new "), Command::New);
        assert_eq!(Command::parse("/switch abc"), Command::Switch("abc"));
        assert_eq!(Command::parse("/rename My  chat"), Command::Rename("My  chat"));
        assert_eq!(Command::parse("/delete"), Command::Delete(None));
        assert_eq!(Command::parse("/delete c1"), Command::Delete(Some("c1")));
        assert_eq!(Command::parse("/exit"), Command::Quit);
        assert_eq!(Command::parse("/switch"), Command::Unknown("/switch"));
    }

    #[test]
    fn test_default_settings_build_canned_source() {
        let source = build_source(&Settings::default()).unwrap();
        assert_eq!(source.name(), "canned");
        assert!(!source.supports_streaming());
    }

    #[test]
    fn test_unseen_notices_follow_last_shown() {
        let ledger = MessageLedger::new();
        let first = ledger.push_notice("Response failed: one");
        ledger.push_notice("Response failed: two");

        let notices = ledger.notices();
        assert_eq!(unseen_notices(&notices, None).len(), 2);
        let fresh = unseen_notices(&notices, Some(&first.id));
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].text, "Response failed: two");
        assert!(unseen_notices(&notices, Some(&notices[1].id)).is_empty());

        ledger.clear_notices();
        let third = ledger.push_notice("Response failed: three");
        let notices = ledger.notices();
        assert_eq!(unseen_notices(&notices, Some(&first.id)), &[third][..]);
    }
}
