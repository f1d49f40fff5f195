pub mod render;

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::api::{Backend, HttpBackend, SessionSummary, sort_newest_first};
use crate::channel::ChannelManager;
use crate::config::ClientConfig;
use crate::controller::{ControllerOptions, SessionController, SessionState};
use render::Renderer;
use task_convo::SessionId;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    New(Option<String>),
    Cancel,
    Open(String),
    Sessions,
    End,
    Help,
    Quit,
    /// A slash command that needs an argument it did not get.
    Usage(&'static str),
    Unknown(String),
    /// Plain text: a session name while creating, otherwise a command.
    Text(String),
}

pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Text(trimmed.to_string());
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, Some(rest.trim()).filter(|r| !r.is_empty())),
        None => (command, None),
    };
    match name {
        "new" => Input::New(arg.map(str::to_string)),
        "cancel" => Input::Cancel,
        "open" => match arg {
            Some(id) => Input::Open(id.to_string()),
            None => Input::Usage("usage: /open <id|n>"),
        },
        "sessions" | "ls" => Input::Sessions,
        "end" => Input::End,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

/// Resolves `/open` arguments: an exact id from the list, else a 1-based
/// list number, else the argument taken as an id.
pub fn resolve_session(sessions: &[SessionSummary], arg: &str) -> (SessionId, Option<String>) {
    if let Some(row) = sessions.iter().find(|row| row.session_id.as_str() == arg) {
        return (row.session_id.clone(), row.title.clone());
    }
    if let Ok(n) = arg.parse::<usize>()
        && let Some(row) = n.checked_sub(1).and_then(|i| sessions.get(i))
    {
        return (row.session_id.clone(), row.title.clone());
    }
    (SessionId::from(arg), None)
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Interactive chat. Opens the push channel once, runs until `/quit` or
/// end of input, then closes it.
pub async fn chat_command(config: &ClientConfig, session: Option<String>) -> Result<()> {
    let backend = Arc::new(HttpBackend::new(config).context("Failed to build HTTP client")?);

    let mut channels = config
        .channel
        .enabled
        .then(|| ChannelManager::new(&config.channel.url));
    let handle = match channels.as_mut() {
        Some(manager) => match manager.open().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(url = %manager.url(), error = %e, "push channel unavailable, continuing without live updates");
                None
            }
        },
        None => None,
    };

    let (mut controller, mut events) =
        SessionController::new(backend, handle, ControllerOptions::from_config(config));
    let mut renderer = Renderer::new(io::stdout(), config.display_name.as_str());

    info!(base_url = %config.base_url, "chat started");
    renderer.help()?;
    controller.refresh_sessions();
    if let Some(id) = session {
        controller.select_session(SessionId::from(id), None);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        renderer.render(&controller)?;
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else { break };
                if handle_line(&mut controller, &mut renderer, &line)? == Flow::Quit {
                    break;
                }
            }
            Some(event) = events.recv() => {
                let applied = controller.apply(event);
                renderer.applied(&applied, &controller)?;
            }
        }
    }
    renderer.render(&controller)?;

    if let Some(manager) = channels.as_mut() {
        manager.close();
    }
    Ok(())
}

fn handle_line<B: Backend, W: Write>(
    controller: &mut SessionController<B>,
    renderer: &mut Renderer<W>,
    line: &str,
) -> io::Result<Flow> {
    let outcome = match parse_input(line) {
        Input::Empty => Ok(()),
        Input::Quit => return Ok(Flow::Quit),
        Input::Help => return renderer.help().map(|_| Flow::Continue),
        Input::New(name) => {
            controller.begin_create();
            match name {
                Some(name) => controller.submit_name(&name),
                None => Ok(()),
            }
        }
        Input::Cancel => controller.cancel_create(),
        Input::Open(arg) => {
            let (id, title) = resolve_session(controller.sessions(), &arg);
            if !controller.select_session(id, title) {
                renderer.notice("already open")?;
            }
            Ok(())
        }
        Input::Sessions => {
            renderer.request_sessions();
            controller.refresh_sessions();
            Ok(())
        }
        Input::End => {
            if !controller.end_session() {
                renderer.notice("no active session")?;
            }
            Ok(())
        }
        Input::Usage(usage) => {
            renderer.notice(usage)?;
            Ok(())
        }
        Input::Unknown(name) => {
            renderer.notice(&format!("unknown command /{name}, try /help"))?;
            Ok(())
        }
        Input::Text(text) => match controller.state() {
            SessionState::Creating { .. } => controller.submit_name(&text),
            _ => controller.send_command(&text),
        },
    };
    if let Err(e) = outcome {
        renderer.notice(&format!("! {e}"))?;
    }
    Ok(Flow::Continue)
}

/// Prints the session list and exits.
pub async fn sessions_command(config: &ClientConfig, json: bool) -> Result<()> {
    let backend = HttpBackend::new(config).context("Failed to build HTTP client")?;
    let mut sessions = backend
        .list_sessions()
        .await
        .context("Failed to list sessions")?;
    sort_newest_first(&mut sessions);

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
    } else {
        let mut renderer = Renderer::new(io::stdout(), config.display_name.as_str());
        renderer.sessions(&sessions)?;
        println!("\n{} session(s)", sessions.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeBackend;

    // -- parse_input --

    #[test]
    fn parse_plain_text() {
        assert_eq!(parse_input("  run it  "), Input::Text("run it".into()));
        assert_eq!(parse_input("   "), Input::Empty);
    }

    #[test]
    fn parse_commands() {
        assert_eq!(parse_input("/new"), Input::New(None));
        assert_eq!(
            parse_input("/new  Email Task "),
            Input::New(Some("Email Task".into()))
        );
        assert_eq!(parse_input("/cancel"), Input::Cancel);
        assert_eq!(parse_input("/open s1"), Input::Open("s1".into()));
        assert!(matches!(parse_input("/open"), Input::Usage(_)));
        assert_eq!(parse_input("/sessions"), Input::Sessions);
        assert_eq!(parse_input("/end"), Input::End);
        assert_eq!(parse_input("/help"), Input::Help);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/frobnicate"), Input::Unknown("frobnicate".into()));
    }

    // -- resolve_session --

    fn rows() -> Vec<SessionSummary> {
        serde_json::from_value(serde_json::json!([
            { "session_id": "abc", "title": "First" },
            { "session_id": "2", "title": "Numeric id" },
        ]))
        .unwrap()
    }

    #[test]
    fn resolve_prefers_exact_id() {
        let (id, title) = resolve_session(&rows(), "2");
        assert_eq!(id, SessionId::from("2"));
        assert_eq!(title.as_deref(), Some("Numeric id"));
    }

    #[test]
    fn resolve_by_list_number() {
        let (id, title) = resolve_session(&rows(), "1");
        assert_eq!(id, SessionId::from("abc"));
        assert_eq!(title.as_deref(), Some("First"));
    }

    #[test]
    fn resolve_unknown_passes_through() {
        assert_eq!(resolve_session(&rows(), "zzz"), (SessionId::from("zzz"), None));
        assert_eq!(resolve_session(&rows(), "0"), (SessionId::from("0"), None));
    }

    // -- handle_line --

    #[tokio::test]
    async fn text_goes_to_name_then_to_session() {
        let backend = Arc::new(FakeBackend::new());
        let (mut ctrl, mut rx) =
            SessionController::new(Arc::clone(&backend), None, ControllerOptions::default());
        let mut renderer = Renderer::new(Vec::new(), "You");

        handle_line(&mut ctrl, &mut renderer, "/new").unwrap();
        handle_line(&mut ctrl, &mut renderer, "Email Task").unwrap();
        let event = rx.recv().await.unwrap();
        ctrl.apply(event);
        assert_eq!(ctrl.current_session().unwrap().title, "Email Task");

        handle_line(&mut ctrl, &mut renderer, "run it").unwrap();
        assert_eq!(ctrl.store().len(), 1);
        assert_eq!(
            handle_line(&mut ctrl, &mut renderer, "/quit").unwrap(),
            Flow::Quit
        );
    }

    #[tokio::test]
    async fn validation_errors_print_inline() {
        let backend = Arc::new(FakeBackend::new());
        let (mut ctrl, _rx) = SessionController::new(backend, None, ControllerOptions::default());
        let mut renderer = Renderer::new(Vec::new(), "You");

        handle_line(&mut ctrl, &mut renderer, "hello").unwrap();
        handle_line(&mut ctrl, &mut renderer, "/end").unwrap();

        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(out, "! no active session\nno active session\n");
    }
}
