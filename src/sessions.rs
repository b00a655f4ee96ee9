//! Chat session log persisted as a JSON file
//!
//! The whole list is rewritten after every mutation. Mutation and flush happen
//! under one lock so writers never interleave their files.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::unix_timestamp;
use crate::{Error, Result};

/// Maximum characters taken from a first prompt as the session title
const TITLE_CHARS: usize = 40;

/// One question/answer pair inside a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub input: String,
    pub response: String,
    pub timestamp: f64,
}

/// A titled conversation shown in the sidebar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,

    /// Last modification, unix seconds
    pub timestamp: f64,

    #[serde(default)]
    pub pinned: bool,

    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Process-wide list of chat sessions backed by a JSON file
#[derive(Debug)]
pub struct ChatStore {
    path: PathBuf,
    sessions: Mutex<Vec<ChatSession>>,
}

impl ChatStore {
    /// Load the log at `path`, starting empty if it is missing or unreadable
    ///
    /// # Errors
    ///
    /// Returns error if the parent directory cannot be created
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let sessions = load(&path);
        tracing::debug!(path = %path.display(), count = sessions.len(), "chat log loaded");

        Ok(Self {
            path,
            sessions: Mutex::new(sessions),
        })
    }

    /// All sessions, most recently modified first
    #[must_use]
    pub fn list(&self) -> Vec<ChatSession> {
        let mut sessions = self.sessions.lock().clone();
        sessions.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        sessions
    }

    /// Look up one session
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ChatSession> {
        self.sessions.lock().iter().find(|s| s.id == id).cloned()
    }

    /// Messages of a session; empty for an unknown id
    #[must_use]
    pub fn messages(&self, id: &str) -> Vec<ChatMessage> {
        self.get(id).map(|s| s.messages).unwrap_or_default()
    }

    /// Create an empty session
    ///
    /// A missing or blank title becomes `"Session <n>"`.
    ///
    /// # Errors
    ///
    /// Returns error if the log cannot be written
    pub fn create(&self, title: Option<&str>) -> Result<ChatSession> {
        let mut sessions = self.sessions.lock();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or_else(|| format!("Session {}", sessions.len() + 1), str::to_string);

        let session = new_session(title);
        sessions.push(session.clone());
        self.flush(&sessions)?;

        tracing::info!(id = %session.id, title = %session.title, "chat session created");
        Ok(session)
    }

    /// Append an exchange to `chat_id`, creating the session if it is unknown
    ///
    /// A created session is titled after the first characters of `input`.
    /// Returns the id of the session that received the message.
    ///
    /// # Errors
    ///
    /// Returns error if the log cannot be written
    pub fn append(&self, chat_id: Option<&str>, input: &str, response: &str) -> Result<String> {
        let mut sessions = self.sessions.lock();
        let now = unix_timestamp();

        let index = match chat_id.and_then(|id| sessions.iter().position(|s| s.id == id)) {
            Some(index) => index,
            None => {
                let title: String = input.chars().take(TITLE_CHARS).collect();
                sessions.push(new_session(title));
                sessions.len() - 1
            }
        };

        let session = &mut sessions[index];
        session.messages.push(ChatMessage {
            input: input.to_string(),
            response: response.to_string(),
            timestamp: now,
        });
        session.timestamp = now;
        let id = session.id.clone();

        self.flush(&sessions)?;
        Ok(id)
    }

    /// Retitle a session; a blank title keeps the current one
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, or error if the log cannot be
    /// written
    pub fn rename(&self, id: &str, title: &str) -> Result<ChatSession> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("chat {id}")))?;

        let title = title.trim();
        if !title.is_empty() {
            session.title = title.to_string();
        }
        session.timestamp = unix_timestamp();
        let updated = session.clone();

        self.flush(&sessions)?;
        Ok(updated)
    }

    /// Remove a session
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, or error if the log cannot be
    /// written
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Err(Error::NotFound(format!("chat {id}")));
        }

        self.flush(&sessions)?;
        tracing::info!(id, "chat session deleted");
        Ok(())
    }

    /// Flip the pinned flag; returns the new value
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id, or error if the log cannot be
    /// written
    pub fn toggle_pin(&self, id: &str) -> Result<bool> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("chat {id}")))?;

        session.pinned = !session.pinned;
        let pinned = session.pinned;

        self.flush(&sessions)?;
        Ok(pinned)
    }

    /// Write the full list next to the target, then rename over it
    fn flush(&self, sessions: &[ChatSession]) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, sessions)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

fn new_session(title: String) -> ChatSession {
    ChatSession {
        id: Uuid::new_v4().to_string(),
        title,
        timestamp: unix_timestamp(),
        pinned: false,
        messages: Vec::new(),
    }
}

fn load(path: &Path) -> Vec<ChatSession> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read chat log");
            return Vec::new();
        }
    };

    serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "chat log is corrupt, starting empty");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ChatStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatStore::open(dir.path().join("chats.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_default_title() {
        let (_dir, store) = store();
        assert_eq!(store.create(None).unwrap().title, "Session 1");
        assert_eq!(store.create(Some("  ")).unwrap().title, "Session 2");
        assert_eq!(store.create(Some("Retirement")).unwrap().title, "Retirement");
    }

    #[test]
    fn test_append_creates_with_truncated_title() {
        let (_dir, store) = store();
        let prompt = "How should I split my savings between a Roth IRA and a brokerage account?";
        let id = store.append(None, prompt, "It depends.").unwrap();

        let session = store.get(&id).unwrap();
        assert_eq!(session.title.chars().count(), 40);
        assert!(prompt.starts_with(&session.title));
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_append_to_existing_and_unknown() {
        let (_dir, store) = store();
        let id = store.append(None, "first", "a").unwrap();
        assert_eq!(store.append(Some(&id), "second", "b").unwrap(), id);
        assert_eq!(store.messages(&id).len(), 2);

        let other = store.append(Some("missing"), "third", "c").unwrap();
        assert_ne!(other, id);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_rename_blank_keeps_title() {
        let (_dir, store) = store();
        let session = store.create(Some("Taxes")).unwrap();
        assert_eq!(store.rename(&session.id, "").unwrap().title, "Taxes");
        assert_eq!(store.rename(&session.id, "Tax 2026").unwrap().title, "Tax 2026");
        assert!(matches!(store.rename("nope", "x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_pin_toggles_without_touching_timestamp() {
        let (_dir, store) = store();
        let session = store.create(None).unwrap();
        assert!(store.toggle_pin(&session.id).unwrap());
        assert!(!store.toggle_pin(&session.id).unwrap());

        let after = store.get(&session.id).unwrap();
        assert!((after.timestamp - session.timestamp).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = store();
        let session = store.create(None).unwrap();
        store.delete(&session.id).unwrap();
        assert!(store.list().is_empty());
        assert!(matches!(store.delete(&session.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_unknown_messages_empty() {
        let (_dir, store) = store();
        assert!(store.messages("nope").is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chats.json");

        let id = {
            let store = ChatStore::open(&path).unwrap();
            let id = store.append(None, "budgeting", "50/30/20").unwrap();
            store.toggle_pin(&id).unwrap();
            id
        };

        let reopened = ChatStore::open(&path).unwrap();
        let session = reopened.get(&id).unwrap();
        assert!(session.pinned);
        assert_eq!(session.messages[0].response, "50/30/20");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chats.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = ChatStore::open(&path).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_list_newest_first() {
        let (_dir, store) = store();
        let a = store.create(Some("a")).unwrap();
        let b = store.create(Some("b")).unwrap();
        store.append(Some(&a.id), "bump", "x").unwrap();

        let ids: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }
}
