//! Session-scoped conversation memory.
//!
//! # Responsibilities
//! - Append user and assistant messages to the current session
//! - Serve the most recent messages of the current session as agent context
//! - Archive the current session and start a fresh one
//! - Mirror every append to the session store when persistence is enabled
//!
//! # Design Decisions
//! - The current session is an `ArcSwap` pointer; starting a session swaps it atomically
//! - Archiving marks the old session under its write lock, so an append racing the
//!   swap either lands before the archive or retries against the new session
//! - Archived sessions stay readable and are never deleted
//! - Cross-session readers hold the rotation lock, so a session being archived
//!   is always visible in exactly one of current and archived
//! - A failed disk write is logged; the in-memory history remains authoritative

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::memory::persistence::SessionStore;
use crate::memory::types::{
    ContextEntry, MemoryResult, MemoryStats, Message, MessageId, Role, SessionId,
};

struct SessionData {
    messages: Vec<Message>,
    archived: bool,
}

struct SessionLog {
    id: SessionId,
    created_at: DateTime<Utc>,
    data: RwLock<SessionData>,
}

impl SessionLog {
    fn new(id: SessionId, messages: Vec<Message>) -> Self {
        let created_at = messages.first().map(|m| m.created_at).unwrap_or_else(Utc::now);
        Self {
            id,
            created_at,
            data: RwLock::new(SessionData {
                messages,
                archived: false,
            }),
        }
    }

    fn messages(&self) -> Vec<Message> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .clone()
    }

    fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).messages.len()
    }
}

/// Conversation history grouped into sessions.
pub struct ConversationMemory {
    current: ArcSwap<SessionLog>,
    archived: DashMap<SessionId, Arc<SessionLog>>,
    store: Option<SessionStore>,
    rotation: Mutex<()>,
}

impl ConversationMemory {
    /// Memory that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            current: ArcSwap::from_pointee(SessionLog::new(SessionId::new(), Vec::new())),
            archived: DashMap::new(),
            store: None,
            rotation: Mutex::new(()),
        }
    }

    /// Memory backed by a [`SessionStore`].
    ///
    /// Every stored session is loaded. The session named by the store's
    /// current pointer is resumed; without one a new session is started.
    pub fn open(store: SessionStore) -> MemoryResult<Self> {
        let pointer = store.read_current()?;
        let archived = DashMap::new();
        let mut current = None;

        for stored in store.load_all()? {
            let log = Arc::new(SessionLog::new(stored.id.clone(), stored.messages));
            if pointer.as_ref() == Some(&stored.id) {
                current = Some(log);
            } else {
                log.data.write().unwrap_or_else(PoisonError::into_inner).archived = true;
                archived.insert(stored.id, log);
            }
        }

        let current = match current {
            Some(log) => {
                tracing::info!(
                    session_id = %log.id,
                    messages = log.len(),
                    "Resumed conversation session"
                );
                log
            }
            None => {
                let id = SessionId::new();
                store.create_session(&id)?;
                store.write_current(&id)?;
                tracing::info!(session_id = %id, "Started conversation session");
                Arc::new(SessionLog::new(id, Vec::new()))
            }
        };

        tracing::debug!(
            dir = ?store.dir(),
            archived_sessions = archived.len(),
            "Conversation memory loaded"
        );

        Ok(Self {
            current: ArcSwap::new(current),
            archived,
            store: Some(store),
            rotation: Mutex::new(()),
        })
    }

    pub fn current_session_id(&self) -> SessionId {
        self.current.load().id.clone()
    }

    pub fn store_user_message(&self, content: impl Into<String>) -> MessageId {
        let message = Message::new(Role::User, content);
        let id = message.id;
        self.store_message(message);
        id
    }

    pub fn store_assistant_message(&self, content: impl Into<String>) -> MessageId {
        let message = Message::new(Role::Assistant, content);
        let id = message.id;
        self.store_message(message);
        id
    }

    /// Append an already-built message, keeping its id.
    ///
    /// Returns the session the message landed in.
    pub fn store_message(&self, message: Message) -> SessionId {
        self.append(vec![message])
    }

    /// Append a query and its reply to the same session.
    ///
    /// A concurrent `start_new_session` lands either before both or after
    /// both; the pair is never split across sessions.
    pub fn store_exchange(&self, user: Message, reply: Message) -> SessionId {
        self.append(vec![user, reply])
    }

    fn append(&self, messages: Vec<Message>) -> SessionId {
        loop {
            let session = self.current.load_full();
            let mut data = session.data.write().unwrap_or_else(PoisonError::into_inner);
            if data.archived {
                // Lost a race with start_new_session.
                continue;
            }

            for message in &messages {
                if let Some(store) = &self.store {
                    if let Err(e) = store.append(&session.id, message) {
                        tracing::warn!(
                            session_id = %session.id,
                            error = %e,
                            "Failed to persist message"
                        );
                    }
                }
                tracing::trace!(
                    session_id = %session.id,
                    message_id = %message.id,
                    role = %message.role,
                    "Message stored"
                );
            }
            data.messages.extend(messages);
            return session.id.clone();
        }
    }

    /// The last `limit` messages of the current session, oldest first.
    pub fn get_conversation_context(&self, limit: usize) -> Vec<Message> {
        let session = self.current.load();
        let data = session.data.read().unwrap_or_else(PoisonError::into_inner);
        let start = data.messages.len().saturating_sub(limit);
        data.messages[start..].to_vec()
    }

    /// Context in the shape sent to the agent.
    pub fn context_entries(&self, limit: usize) -> Vec<ContextEntry> {
        self.get_conversation_context(limit)
            .iter()
            .map(ContextEntry::from)
            .collect()
    }

    /// Archive the current session and make a fresh one current.
    pub fn start_new_session(&self) -> SessionId {
        let _rotation = self.rotation.lock().unwrap_or_else(PoisonError::into_inner);

        let id = SessionId::new();
        if let Some(store) = &self.store {
            if let Err(e) = store.create_session(&id).and_then(|_| store.write_current(&id)) {
                tracing::warn!(session_id = %id, error = %e, "Failed to persist new session");
            }
        }

        let previous = self.current.swap(Arc::new(SessionLog::new(id.clone(), Vec::new())));
        previous.data.write().unwrap_or_else(PoisonError::into_inner).archived = true;

        tracing::info!(
            session_id = %id,
            archived_session_id = %previous.id,
            archived_messages = previous.len(),
            "Started new conversation session"
        );
        self.archived.insert(previous.id.clone(), previous);
        id
    }

    /// Messages of any session, current or archived.
    pub fn session_messages(&self, id: &SessionId) -> Option<Vec<Message>> {
        let _rotation = self.rotation.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load();
        if &current.id == id {
            return Some(current.messages());
        }
        self.archived.get(id).map(|log| log.messages())
    }

    /// Every session id, oldest first; the current session is last.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let _rotation = self.rotation.lock().unwrap_or_else(PoisonError::into_inner);
        let mut archived: Vec<(DateTime<Utc>, SessionId)> = self
            .archived
            .iter()
            .map(|entry| (entry.value().created_at, entry.key().clone()))
            .collect();
        archived.sort();
        let mut ids: Vec<SessionId> = archived.into_iter().map(|(_, id)| id).collect();
        ids.push(self.current_session_id());
        ids
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        let _rotation = self.rotation.lock().unwrap_or_else(PoisonError::into_inner);
        let current_session_messages = self.current.load().len();
        let archived_messages: usize = self.archived.iter().map(|entry| entry.value().len()).sum();
        MemoryStats {
            total_messages: current_session_messages + archived_messages,
            sessions: self.archived.len() + 1,
            archived_sessions: self.archived.len(),
            current_session_messages,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::in_memory()
    }
}
