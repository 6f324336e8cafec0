//! # Session Store Module
//!
//! Per-chat mutable state and the synchronized store that owns it. The
//! inbound-message handler and both polling loops all go through this
//! store; nothing outside it ever holds a reference into a session.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use teloxide::types::ChatId;
use tokio::sync::Mutex;

use crate::dialogue::FlowState;

/// Per-chat state. Lives for the process lifetime; re-registration via
/// `/start` replaces the whole thing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Session {
    pub driver_name: String,
    pub flow: FlowState,
    /// True when the chat is idle and eligible for a task push
    pub waiting: bool,

    // Trip/fuel/parcel scratch fields
    pub machine: Option<String>,
    pub trip_date: Option<String>,
    pub start_odometer: Option<i64>,
    pub refuel_odometer: Option<i64>,
    pub branch: Option<String>,
    pub parcel_count: Option<String>,
    /// Machines offered by the last machine keyboard
    pub machine_choices: Vec<String>,

    // Task dispatch state
    /// 1-based sheet row of the active task, if any
    pub current_row: Option<usize>,
    /// Task rows already pushed to this chat
    pub sent_tasks: HashSet<usize>,
    /// (row, slot) sub-task keys already pushed to this chat
    pub sent_subtasks: HashSet<(usize, usize)>,
}

impl Session {
    pub fn new(driver_name: String) -> Self {
        Self {
            driver_name,
            flow: FlowState::Idle,
            waiting: true,
            ..Self::default()
        }
    }

    /// A route is open once a machine was picked and not yet closed.
    pub fn route_open(&self) -> bool {
        self.machine.is_some()
    }

    /// Return to the main menu. The chat becomes eligible for task pushes
    /// again unless a task is still assigned to it.
    pub fn enter_idle(&mut self) {
        self.flow = FlowState::Idle;
        self.waiting = self.current_row.is_none();
    }

    /// Drop the active task and every sent-set entry belonging to its row,
    /// so the row can be matched again if it is reused.
    pub fn release_task(&mut self, row: usize) {
        self.sent_tasks.remove(&row);
        self.sent_subtasks.retain(|(r, _)| *r != row);
        if self.current_row == Some(row) {
            self.current_row = None;
        }
        self.enter_idle();
    }
}

/// Synchronized map of chat id → session.
///
/// One async mutex guards the whole map; handler and poller access is
/// serialized through it, and the pollers' match-and-mark steps run as a
/// single closure under the lock so they cannot race with handlers.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<ChatId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a session, if the chat has one.
    pub async fn get(&self, chat: ChatId) -> Option<Session> {
        self.inner.lock().await.get(&chat).cloned()
    }

    /// Create (or replace) the session for a chat.
    pub async fn create(&self, chat: ChatId, session: Session) -> Session {
        let mut map = self.inner.lock().await;
        map.insert(chat, session.clone());
        session
    }

    /// Mutate a session in place; returns `None` when the chat is unknown.
    pub async fn update<F, R>(&self, chat: ChatId, mutator: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut map = self.inner.lock().await;
        map.get_mut(&chat).map(mutator)
    }

    /// Run a closure over the whole map under the lock. Used by the polling
    /// loops for their atomic scan-and-mark pass.
    pub async fn with_all<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut HashMap<ChatId, Session>) -> R,
    {
        let mut map = self.inner.lock().await;
        f(&mut map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SessionStore::new();
        let chat = ChatId(1);
        assert!(store.get(chat).await.is_none());

        store.create(chat, Session::new("Ivan".to_string())).await;
        let s = store.get(chat).await.unwrap();
        assert_eq!(s.driver_name, "Ivan");
        assert!(s.waiting);
        assert!(matches!(s.flow, FlowState::Idle));
    }

    #[tokio::test]
    async fn test_update_unknown_chat_is_none() {
        let store = SessionStore::new();
        let r = store.update(ChatId(5), |s| s.driver_name.clone()).await;
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn test_release_task_clears_tracking() {
        let store = SessionStore::new();
        let chat = ChatId(1);
        store.create(chat, Session::new("Ivan".to_string())).await;

        store
            .update(chat, |s| {
                s.current_row = Some(4);
                s.waiting = false;
                s.sent_tasks.insert(4);
                s.sent_subtasks.insert((4, 0));
                s.sent_subtasks.insert((4, 2));
                s.sent_subtasks.insert((7, 1));
            })
            .await;

        store.update(chat, |s| s.release_task(4)).await;
        let s = store.get(chat).await.unwrap();
        assert!(s.current_row.is_none());
        assert!(s.waiting);
        assert!(!s.sent_tasks.contains(&4));
        assert!(!s.sent_subtasks.contains(&(4, 0)));
        // Entries for other rows survive
        assert!(s.sent_subtasks.contains(&(7, 1)));
    }

    #[tokio::test]
    async fn test_enter_idle_with_active_task_not_waiting() {
        let mut s = Session::new("Ivan".to_string());
        s.current_row = Some(3);
        s.enter_idle();
        assert!(!s.waiting);

        s.current_row = None;
        s.enter_idle();
        assert!(s.waiting);
    }
}
