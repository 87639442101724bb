//! Process-local memory store for tests and ephemeral runs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use orja_core::{Message, PipelineEvent, Role};

use super::{MemoryError, MemoryStore};

#[derive(Debug, Default)]
struct Tables {
    messages: Vec<Message>,
    events: Vec<PipelineEvent>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, oldest first.
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.tables.lock().events.clone()
    }
}

impl MemoryStore for InMemoryStore {
    fn append_message(
        &self,
        role: Role,
        content: &str,
        session_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, MemoryError> {
        let mut tables = self.tables.lock();
        let id = tables.messages.len() as i64 + 1;
        tables.messages.push(Message {
            id,
            timestamp,
            role,
            content: content.to_string(),
            session_id: session_id.to_string(),
        });
        Ok(id)
    }

    fn append_event(&self, event: &PipelineEvent) -> Result<(), MemoryError> {
        self.tables.lock().events.push(event.clone());
        Ok(())
    }

    fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, MemoryError> {
        Ok(self
            .tables
            .lock()
            .messages
            .iter()
            .rev()
            .filter(|m| m.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn recent_events(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<PipelineEvent>, MemoryError> {
        Ok(self
            .tables
            .lock()
            .events
            .iter()
            .rev()
            .filter(|e| e.session_id == session_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_messages_filters_and_limits() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .append_message(Role::User, &format!("m{i}"), "a", Utc::now())
                .unwrap();
        }
        store.append_message(Role::User, "x", "b", Utc::now()).unwrap();

        let recent = store.recent_messages("a", 3).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);
        assert_eq!(store.recent_messages("b", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_events_recorded_in_order() {
        let store = InMemoryStore::new();
        store
            .append_event(&PipelineEvent::new("s", "evaluator", "", "", true, Some(1.0)))
            .unwrap();
        store
            .append_event(&PipelineEvent::new("s", "router", "", "", true, Some(2.0)))
            .unwrap();

        let names: Vec<String> = store.events().into_iter().map(|e| e.step_name).collect();
        assert_eq!(names, vec!["evaluator", "router"]);
        assert_eq!(store.recent_events("s", 1).unwrap()[0].step_name, "router");
    }
}
