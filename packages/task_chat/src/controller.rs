//! Session lifecycle: creation, selection, teardown, and sending.
//!
//! The controller and its [`ConversationStore`] live on one event loop.
//! Network calls run on spawned tasks whose only effect is to post an
//! [`Event`] back; the loop feeds each event to [`SessionController::apply`].
//! Results are tagged with a [`Ticket`] and dropped if the session they were
//! issued for is no longer the current activation.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, Backend, SessionSummary, sort_newest_first};
use crate::channel::{ChannelHandle, Subscription};
use crate::config::ClientConfig;
use crate::history::HistoryLoader;
use task_convo::{
    ConversationStore, DEFAULT_DISPLAY_NAME, Message, NormalizeContext, OutgoingEnvelope, Role,
    Session, SessionId, normalize,
};

/// Identifies one activation of a session. The epoch changes on every
/// change of session identity, including a re-visit of the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub session_id: SessionId,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session.
    Home,
    /// Name entry in progress. `previous` is restored on cancel.
    Creating {
        previous: Option<Session>,
        pending: bool,
    },
    Active(Session),
}

/// Results posted back to the event loop.
#[derive(Debug)]
pub enum Event {
    /// Inbound payload from the duplex channel.
    Push(Value),
    HistoryLoaded {
        ticket: Ticket,
        result: Result<Vec<Message>, ApiError>,
    },
    SessionCreated {
        attempt: u64,
        title: String,
        result: Result<SessionId, ApiError>,
    },
    ReplyReceived {
        ticket: Ticket,
        result: Result<Value, ApiError>,
    },
    SessionsListed {
        result: Result<Vec<SessionSummary>, ApiError>,
    },
}

/// What applying an [`Event`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The event belonged to an abandoned activation or was undeliverable.
    Discarded,
    /// The conversation store changed.
    Conversation,
    SessionActivated(Session),
    CreationFailed(String),
    SessionsUpdated,
    SessionsFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("session name cannot be empty")]
    EmptyName,

    #[error("message cannot be empty")]
    EmptyMessage,

    #[error("no active session")]
    NoActiveSession,

    #[error("not creating a session")]
    NotCreating,

    #[error("session creation already in progress")]
    CreationPending,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Sender label that marks the local user's messages
    pub display_name: String,
    /// Also emit outgoing drafts on the duplex channel
    pub mirror_sends: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            mirror_sends: true,
        }
    }
}

impl ControllerOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            display_name: config.display_name.clone(),
            mirror_sends: config.channel.mirror_sends,
        }
    }
}

pub struct SessionController<B> {
    backend: Arc<B>,
    history: HistoryLoader<B>,
    channel: Option<ChannelHandle>,
    _subscription: Option<Subscription>,
    events: mpsc::UnboundedSender<Event>,
    options: ControllerOptions,
    state: SessionState,
    store: ConversationStore,
    epoch: u64,
    create_attempt: u64,
    sessions: Vec<SessionSummary>,
    sessions_revision: u64,
}

impl<B: Backend> SessionController<B> {
    /// Builds a controller and the receiver its events arrive on. When a
    /// channel is given, inbound payloads are posted as [`Event::Push`].
    pub fn new(
        backend: Arc<B>,
        channel: Option<ChannelHandle>,
        options: ControllerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, events_rx) = mpsc::unbounded_channel();

        let subscription = channel.as_ref().map(|handle| {
            let tx = events.clone();
            handle.subscribe(move |payload| {
                let _ = tx.send(Event::Push(payload));
            })
        });

        let controller = Self {
            history: HistoryLoader::new(Arc::clone(&backend), options.display_name.as_str()),
            backend,
            channel,
            _subscription: subscription,
            events,
            options,
            state: SessionState::Home,
            store: ConversationStore::new(),
            epoch: 0,
            create_attempt: 0,
            sessions: Vec::new(),
            sessions_revision: 0,
        };
        (controller, events_rx)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn current_session(&self) -> Option<&Session> {
        match &self.state {
            SessionState::Active(session) => Some(session),
            _ => None,
        }
    }

    /// Last fetched session list, newest first.
    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    /// Bumped every time [`Self::sessions`] is replaced.
    pub fn sessions_revision(&self) -> u64 {
        self.sessions_revision
    }

    // -- creation --

    /// Enters name entry. The active session, if any, is remembered so that
    /// [`Self::cancel_create`] can return to it.
    pub fn begin_create(&mut self) {
        let previous = match &self.state {
            SessionState::Creating { .. } => return,
            SessionState::Home => None,
            SessionState::Active(session) => Some(session.clone()),
        };
        self.state = SessionState::Creating {
            previous,
            pending: false,
        };
    }

    /// Leaves name entry for whatever was active before. A creation
    /// response still in flight is discarded when it arrives.
    pub fn cancel_create(&mut self) -> Result<(), ValidationError> {
        let SessionState::Creating { previous, .. } = &self.state else {
            return Err(ValidationError::NotCreating);
        };
        self.state = match previous.clone() {
            Some(session) => SessionState::Active(session),
            None => SessionState::Home,
        };
        self.create_attempt += 1;
        Ok(())
    }

    /// Submits a session name to the backend.
    pub fn submit_name(&mut self, name: &str) -> Result<(), ValidationError> {
        let SessionState::Creating { pending, .. } = &mut self.state else {
            return Err(ValidationError::NotCreating);
        };
        if *pending {
            return Err(ValidationError::CreationPending);
        }
        let title = name.trim().to_string();
        if title.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        *pending = true;

        let attempt = self.create_attempt;
        let backend = Arc::clone(&self.backend);
        self.spawn(async move {
            let result = backend.create_session(&title).await;
            Event::SessionCreated {
                attempt,
                title,
                result,
            }
        });
        Ok(())
    }

    // -- selection --

    /// Activates `session_id`, loading its history. Re-selecting the active
    /// session is a no-op and returns `false`.
    pub fn select_session(&mut self, session_id: SessionId, title: Option<String>) -> bool {
        if self
            .current_session()
            .is_some_and(|session| session.id == session_id)
        {
            return false;
        }
        if matches!(self.state, SessionState::Creating { .. }) {
            self.create_attempt += 1;
        }
        let title = title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                self.sessions
                    .iter()
                    .find(|row| row.session_id == session_id)
                    .map(|row| row.display_title().to_string())
            })
            .unwrap_or_else(|| session_id.to_string());
        self.activate(Session::new(session_id, title));
        true
    }

    /// Returns to Home. No backend call.
    pub fn end_session(&mut self) -> bool {
        let SessionState::Active(session) = &self.state else {
            return false;
        };
        info!(session_id = %session.id, "session ended");
        self.epoch += 1;
        self.store.reset(None);
        self.state = SessionState::Home;
        true
    }

    fn activate(&mut self, session: Session) {
        self.epoch += 1;
        info!(session_id = %session.id, title = %session.title, "session active");
        self.store.reset(Some(session.id.clone()));
        self.store.begin_load();

        let ticket = Ticket {
            session_id: session.id.clone(),
            epoch: self.epoch,
        };
        self.state = SessionState::Active(session);

        let loader = self.history.clone();
        self.spawn(async move {
            let result = loader.load(&ticket.session_id).await;
            Event::HistoryLoaded { ticket, result }
        });
    }

    // -- sending --

    /// Appends the draft optimistically and sends it to the backend. The
    /// reply arrives later as [`Event::ReplyReceived`].
    pub fn send_command(&mut self, text: &str) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let Some(session) = self.current_session() else {
            return Err(ValidationError::NoActiveSession);
        };
        let ticket = Ticket {
            session_id: session.id.clone(),
            epoch: self.epoch,
        };

        let envelope = OutgoingEnvelope::new(ticket.session_id.clone(), text);
        let draft = envelope.to_value();
        let ctx = NormalizeContext::new(&self.options.display_name).for_session(&ticket.session_id);
        let message = normalize(&draft, &ctx).map_err(|_| ValidationError::EmptyMessage)?;
        self.store.append(message);
        self.store.set_typing(true);

        if self.options.mirror_sends
            && let Some(channel) = self.channel.as_ref().filter(|c| c.is_open())
        {
            channel.send(&draft);
        }

        let backend = Arc::clone(&self.backend);
        let text = envelope.text;
        self.spawn(async move {
            let result = backend.send_command(&ticket.session_id, &text).await;
            Event::ReplyReceived { ticket, result }
        });
        Ok(())
    }

    // -- session list --

    pub fn refresh_sessions(&self) {
        let backend = Arc::clone(&self.backend);
        self.spawn(async move {
            let result = backend.list_sessions().await;
            Event::SessionsListed { result }
        });
    }

    // -- event loop --

    pub fn apply(&mut self, event: Event) -> Applied {
        match event {
            Event::Push(payload) => self.apply_push(payload),
            Event::HistoryLoaded { ticket, result } => {
                if !self.is_current(&ticket) {
                    debug!(session_id = %ticket.session_id, epoch = ticket.epoch, "discarding stale history");
                    return Applied::Discarded;
                }
                match result {
                    Ok(messages) => {
                        if !self.store.seed(&ticket.session_id, messages) {
                            return Applied::Discarded;
                        }
                    }
                    Err(e) => {
                        error!(session_id = %ticket.session_id, error = %e, "history load failed");
                        self.store.fail_load(e.to_string());
                    }
                }
                Applied::Conversation
            }
            Event::SessionCreated {
                attempt,
                title,
                result,
            } => {
                let creating = matches!(self.state, SessionState::Creating { pending: true, .. });
                if attempt != self.create_attempt || !creating {
                    debug!(attempt, "discarding abandoned session creation");
                    return Applied::Discarded;
                }
                match result {
                    Ok(session_id) => {
                        self.create_attempt += 1;
                        let session = Session::new(session_id, title);
                        self.activate(session.clone());
                        Applied::SessionActivated(session)
                    }
                    Err(e) => {
                        error!(error = %e, "session creation failed");
                        if let SessionState::Creating { pending, .. } = &mut self.state {
                            *pending = false;
                        }
                        Applied::CreationFailed(e.to_string())
                    }
                }
            }
            Event::ReplyReceived { ticket, result } => {
                if !self.is_current(&ticket) {
                    debug!(session_id = %ticket.session_id, "discarding reply for inactive session");
                    return Applied::Discarded;
                }
                self.store.set_typing(false);
                match result {
                    Ok(body) => {
                        let ctx = NormalizeContext::new(&self.options.display_name)
                            .for_session(&ticket.session_id);
                        match normalize(&body, &ctx) {
                            Ok(reply) => {
                                self.store.append(reply);
                            }
                            Err(rejection) => debug!(%rejection, "dropping reply"),
                        }
                    }
                    Err(e) => {
                        error!(session_id = %ticket.session_id, error = %e, "send failed");
                        self.store.set_error(e.to_string());
                    }
                }
                Applied::Conversation
            }
            Event::SessionsListed { result } => match result {
                Ok(mut rows) => {
                    sort_newest_first(&mut rows);
                    self.sessions = rows;
                    self.sessions_revision += 1;
                    Applied::SessionsUpdated
                }
                Err(e) => {
                    warn!(error = %e, "session list unavailable");
                    Applied::SessionsFailed(e.to_string())
                }
            },
        }
    }

    fn apply_push(&mut self, payload: Value) -> Applied {
        // The store keeps its owner during name entry, so pushes for the
        // session being returned to still land.
        let Some(session_id) = self.store.session_id().cloned() else {
            debug!("dropping push with no active session");
            return Applied::Discarded;
        };
        let ctx = NormalizeContext::new(&self.options.display_name).for_session(&session_id);
        let message = match normalize(&payload, &ctx) {
            Ok(message) => message,
            Err(rejection) => {
                debug!(%rejection, "dropping push");
                return Applied::Discarded;
            }
        };
        let role = message.role;
        if !self.store.append(message) {
            return Applied::Discarded;
        }
        if role == Role::Assistant {
            self.store.set_typing(false);
        }
        Applied::Conversation
    }

    /// Matches against the store owner rather than [`Self::current_session`],
    /// which is `None` while a name is being entered over an open session.
    fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.epoch == self.epoch && self.store.session_id() == Some(&ticket.session_id)
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events.send(task.await);
        });
    }
}
