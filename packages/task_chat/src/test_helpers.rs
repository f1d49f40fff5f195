use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

use crate::api::{ApiError, Backend, SessionSummary};
use task_convo::SessionId;

/// In-memory [`Backend`] with scripted responses.
///
/// History fetches can be gated: a gated fetch suspends until the test
/// releases it, which lets tests resolve loads out of order.
#[derive(Default)]
pub struct FakeBackend {
    sessions: Mutex<Vec<SessionSummary>>,
    histories: Mutex<HashMap<SessionId, Value>>,
    failing_histories: Mutex<HashSet<SessionId>>,
    gates: Mutex<HashMap<SessionId, oneshot::Receiver<()>>>,
    next_session_id: Mutex<Option<String>>,
    fail_create: Mutex<bool>,
    fail_send: Mutex<bool>,
    reply: Mutex<Option<Value>>,
    pub create_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sessions(&self, rows: Vec<SessionSummary>) {
        *self.sessions.lock().unwrap() = rows;
    }

    pub fn set_history(&self, id: &str, body: Value) {
        self.histories
            .lock()
            .unwrap()
            .insert(SessionId::from(id), body);
    }

    pub fn fail_history(&self, id: &str) {
        self.failing_histories
            .lock()
            .unwrap()
            .insert(SessionId::from(id));
    }

    /// Holds the next history fetch for `id` until the returned sender fires
    /// (or is dropped).
    pub fn gate_history(&self, id: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(SessionId::from(id), rx);
        tx
    }

    pub fn set_next_session_id(&self, id: &str) {
        *self.next_session_id.lock().unwrap() = Some(id.to_string());
    }

    pub fn set_fail_create(&self, fail: bool) {
        *self.fail_create.lock().unwrap() = fail;
    }

    pub fn set_fail_send(&self, fail: bool) {
        *self.fail_send.lock().unwrap() = fail;
    }

    pub fn set_reply(&self, reply: Value) {
        *self.reply.lock().unwrap() = Some(reply);
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }
}

impl Backend for FakeBackend {
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn create_session(&self, _name: &str) -> Result<SessionId, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_create.lock().unwrap() {
            return Err(ApiError::Unavailable);
        }
        let id = self
            .next_session_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "s1".to_string());
        Ok(SessionId::new(id))
    }

    async fn fetch_history(&self, session_id: &SessionId) -> Result<Value, ApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().remove(session_id);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.failing_histories.lock().unwrap().contains(session_id) {
            return Err(ApiError::Unavailable);
        }
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| json!([])))
    }

    async fn send_command(&self, _session_id: &SessionId, text: &str) -> Result<Value, ApiError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_send.lock().unwrap() {
            return Err(ApiError::Unavailable);
        }
        Ok(self
            .reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| json!({ "message": format!("ack: {text}") })))
    }
}
