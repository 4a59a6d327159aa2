//! Session open/close boundaries and the lifecycle records they emit.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::requests::{RequestPayload, RequestRecord, UserId};

/// A usage session. Exactly one session is open at a time; opening a new one implicitly closes
/// the previous one first.
#[derive(Debug, Clone)]
pub struct Session {
    /// The user the session belongs to.
    pub user: UserId,
    /// When the session was opened.
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct SessionManager {
    current: Mutex<Option<Session>>,
}

impl SessionManager {
    pub(crate) fn new() -> SessionManager {
        SessionManager::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.current
            .lock()
            .expect("thread holding session lock should not panic")
    }

    /// Opens a session for `user`, implicitly closing any open session first.
    ///
    /// Returns the lifecycle records to enqueue: the summary of the closed session (if one was
    /// open) followed by a feed refresh for the new user.
    pub(crate) fn open(&self, user: UserId) -> Vec<RequestRecord> {
        let mut current = self.lock();
        let mut records = Vec::with_capacity(2);
        if let Some(prior) = current.take() {
            records.push(summary_record(prior));
        }
        log::debug!(target: "beacon", "opening session for user {}", user);
        *current = Some(Session {
            user: user.clone(),
            started_at: Utc::now(),
        });
        records.push(RequestRecord::new(user, RequestPayload::FeedRefresh));
        records
    }

    /// Closes the open session, returning its summary record.
    pub(crate) fn close(&self) -> Option<RequestRecord> {
        self.lock().take().map(|session| {
            log::debug!(target: "beacon", "closing session for user {}", session.user);
            summary_record(session)
        })
    }

    pub(crate) fn current(&self) -> Option<Session> {
        self.lock().clone()
    }
}

fn summary_record(session: Session) -> RequestRecord {
    let Session { user, started_at } = session;
    RequestRecord::new(
        user,
        RequestPayload::SessionEnd {
            started_at,
            ended_at: Utc::now(),
        },
    )
}
