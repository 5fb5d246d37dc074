use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::debug;

use super::SaveHandler;
use crate::error::SaveHandlerError;

#[derive(Debug, Clone)]
struct StoredSession {
    data: String,
    written_at: i64,
}

/// In-process save handler. Clones share the same sessions, which lets
/// several request-scoped managers see one another's writes.
#[derive(Debug, Clone, Default)]
pub struct MemorySaveHandler {
    sessions: Arc<Mutex<HashMap<String, StoredSession>>>,
}

impl MemorySaveHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, StoredSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Pretend `id` was last written at `written_at`.
    pub fn backdate(&self, id: &str, written_at: i64) {
        if let Some(session) = self.sessions().get_mut(id) {
            session.written_at = written_at;
        }
    }
}

impl SaveHandler for MemorySaveHandler {
    fn open(&mut self, _save_path: &str, _session_name: &str) -> Result<bool, SaveHandlerError> {
        Ok(true)
    }

    fn close(&mut self) -> Result<bool, SaveHandlerError> {
        Ok(true)
    }

    fn read(&mut self, id: &str) -> Result<String, SaveHandlerError> {
        Ok(self
            .sessions()
            .get(id)
            .map(|session| session.data.clone())
            .unwrap_or_default())
    }

    fn write(&mut self, id: &str, data: &str) -> Result<bool, SaveHandlerError> {
        self.sessions().insert(
            id.to_string(),
            StoredSession {
                data: data.to_string(),
                written_at: Utc::now().timestamp(),
            },
        );
        Ok(true)
    }

    fn destroy(&mut self, id: &str) -> Result<bool, SaveHandlerError> {
        self.sessions().remove(id);
        Ok(true)
    }

    fn gc(&mut self, max_lifetime: u64) -> Result<bool, SaveHandlerError> {
        let cutoff = Utc::now().timestamp() - max_lifetime as i64;
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, session| session.written_at >= cutoff);
        debug!("Memory gc removed {} sessions", before - sessions.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_sessions() {
        let mut handler = MemorySaveHandler::new();
        let observer = handler.clone();
        handler.write("abc", "{}").unwrap();
        assert!(observer.contains("abc"));
        assert_eq!(handler.read("abc").unwrap(), "{}");
        assert_eq!(handler.read("missing").unwrap(), "");
    }

    #[test]
    fn test_gc_drops_stale_sessions() {
        let mut handler = MemorySaveHandler::new();
        handler.write("old", "{}").unwrap();
        handler.write("new", "{}").unwrap();
        handler.backdate("old", Utc::now().timestamp() - 10_000);

        handler.gc(1440).unwrap();
        assert!(!handler.contains("old"));
        assert!(handler.contains("new"));
    }
}
