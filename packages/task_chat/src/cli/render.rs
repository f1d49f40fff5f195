use std::io::{self, Write};

use crate::api::{Backend, SessionSummary};
use crate::controller::{Applied, SessionController, SessionState};
use task_convo::{Message, Role, SessionId};

/// Prints controller state as plain lines, emitting only what changed since
/// the last call to [`Renderer::render`].
pub struct Renderer<W: Write> {
    out: W,
    display_name: String,
    session: Option<SessionId>,
    creating: bool,
    printed: usize,
    loading: bool,
    typing: bool,
    error: Option<String>,
    sessions_requested: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, display_name: impl Into<String>) -> Self {
        Self {
            out,
            display_name: display_name.into(),
            session: None,
            creating: false,
            printed: 0,
            loading: false,
            typing: false,
            error: None,
            sessions_requested: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn render<B: Backend>(&mut self, controller: &SessionController<B>) -> io::Result<()> {
        let store = controller.store();

        let creating = matches!(controller.state(), SessionState::Creating { .. });
        if creating && !self.creating {
            writeln!(self.out, "new session: type a name (/cancel to abort)")?;
        }
        self.creating = creating;

        if store.session_id() != self.session.as_ref() {
            self.session = store.session_id().cloned();
            self.printed = 0;
            self.loading = false;
            self.typing = false;
            self.error = None;
            match controller.current_session() {
                Some(session) => writeln!(self.out, "── {} ({}) ──", session.title, session.id)?,
                None => writeln!(self.out, "── home ──")?,
            }
        }

        if store.loading() != self.loading {
            if store.loading() {
                writeln!(self.out, "… loading history")?;
            } else if store.is_seeded() && self.printed > 0 && store.history_len() > 0 {
                // History was placed ahead of lines already shown.
                writeln!(self.out, "── history ──")?;
                self.printed = 0;
            }
            self.loading = store.loading();
        }

        for message in &store.messages()[self.printed.min(store.len())..] {
            self.message(message)?;
        }
        self.printed = store.len();

        if store.typing() != self.typing {
            if store.typing() {
                writeln!(self.out, "… assistant is working")?;
            }
            self.typing = store.typing();
        }

        if store.error() != self.error.as_deref() {
            if let Some(error) = store.error() {
                writeln!(self.out, "! {error}")?;
            }
            self.error = store.error().map(str::to_string);
        }

        self.out.flush()
    }

    /// Reports event outcomes the store does not carry.
    pub fn applied<B: Backend>(
        &mut self,
        applied: &Applied,
        controller: &SessionController<B>,
    ) -> io::Result<()> {
        match applied {
            Applied::CreationFailed(error) => {
                writeln!(self.out, "! could not create session: {error}")?;
            }
            Applied::SessionsFailed(error) if self.sessions_requested => {
                self.sessions_requested = false;
                writeln!(self.out, "! could not list sessions: {error}")?;
            }
            Applied::SessionsUpdated if self.sessions_requested => {
                self.sessions_requested = false;
                self.sessions(controller.sessions())?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Prints the session list the next time one arrives.
    pub fn request_sessions(&mut self) {
        self.sessions_requested = true;
    }

    pub fn sessions(&mut self, sessions: &[SessionSummary]) -> io::Result<()> {
        if sessions.is_empty() {
            writeln!(self.out, "No sessions.")?;
            return Ok(());
        }
        for (index, row) in sessions.iter().enumerate() {
            writeln!(
                self.out,
                "{:>3}. {:<32} {}",
                index + 1,
                row.display_title(),
                row.session_id
            )?;
        }
        Ok(())
    }

    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    pub fn help(&mut self) -> io::Result<()> {
        writeln!(
            self.out,
            "\
/new [name]   start a new session
/cancel       abandon session creation
/open <id|n>  open a session by id or list number
/sessions     list sessions
/end          close the current session
/help         show this help
/quit         exit
Anything else is sent to the active session."
        )
    }

    fn message(&mut self, message: &Message) -> io::Result<()> {
        let label = match message.role {
            Role::User => self.display_name.as_str(),
            Role::Assistant => "assistant",
        };
        let mut lines = message.text.lines();
        if let Some(first) = lines.next() {
            writeln!(self.out, "{label}> {first}")?;
        }
        let indent = " ".repeat(label.len() + 2);
        for line in lines {
            writeln!(self.out, "{indent}{line}")?;
        }
        Ok(())
    }
}
