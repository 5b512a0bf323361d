//! In-memory chat backend
//!
//! Keeps a bounded history and rebroadcasts every inbound message to all
//! registered sessions, sender included.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ChatBackend, EnvelopeSink};
use crate::{
    models::{ChatMessage, SessionId},
    Result,
};

pub struct InMemoryChat {
    history: Mutex<VecDeque<ChatMessage>>,
    history_limit: usize,
    clients: DashMap<SessionId, Arc<dyn EnvelopeSink>>,
}

impl InMemoryChat {
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(history_limit)),
            history_limit,
            clients: DashMap::new(),
        }
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().iter().cloned().collect()
    }

    fn remember(&self, message: ChatMessage) {
        if self.history_limit == 0 {
            return;
        }
        let mut history = self.history.lock();
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(message);
    }
}

impl ChatBackend for InMemoryChat {
    fn register(&self, session_id: SessionId, sink: Arc<dyn EnvelopeSink>) {
        debug!(session_id = %session_id, "Chat client registered");
        self.clients.insert(session_id, sink);
    }

    fn unregister(&self, session_id: &SessionId) {
        if self.clients.remove(session_id).is_some() {
            debug!(session_id = %session_id, "Chat client unregistered");
        }
    }

    fn send_history(&self, session_id: &SessionId) {
        let Some(sink) = self.clients.get(session_id).map(|entry| Arc::clone(entry.value())) else {
            return;
        };

        let history = self.history();
        for message in history {
            if let Err(e) = sink.send(message.to_envelope()) {
                warn!(session_id = %session_id, error = %e, "Failed to replay chat history");
                break;
            }
        }
    }

    fn submit(&self, message: ChatMessage) -> Result<()> {
        let envelope = message.to_envelope();
        self.remember(message);

        // Snapshot recipients so no shard lock is held while sending
        let recipients: Vec<(SessionId, Arc<dyn EnvelopeSink>)> = self
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (session_id, sink) in recipients {
            if let Err(e) = sink.send(envelope.clone()) {
                debug!(session_id = %session_id, error = %e, "Dropped chat broadcast");
            }
        }

        Ok(())
    }
}
