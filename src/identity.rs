//! User identity and the anonymous-to-identified transition rules.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::requests::UserId;

/// The runtime's notion of who the current user is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No host-assigned id yet; the device-generated id stands in.
    Anonymous(UserId),
    /// A host-assigned id.
    Identified(UserId),
}

impl Identity {
    /// The id outbound requests are attributed to.
    pub fn user_id(&self) -> &UserId {
        match self {
            Identity::Anonymous(id) | Identity::Identified(id) => id,
        }
    }
}

/// Outcome of a `change_user` call.
#[derive(Debug)]
pub(crate) enum UserChange {
    /// The id is already current; nothing to do.
    Unchanged,
    Changed {
        previous: UserId,
        /// The device's anonymous history moves to the new id.
        merge_history: bool,
    },
}

pub(crate) struct IdentityManager {
    inner: Mutex<IdentityInner>,
}

struct IdentityInner {
    current: Identity,
    /// Ids that have been identified on this device at some point.
    known_ids: HashSet<UserId>,
}

impl IdentityManager {
    pub(crate) fn new() -> IdentityManager {
        let device_id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let anonymous = UserId::from(format!("anon-{}", device_id.to_lowercase()));
        log::debug!(target: "beacon", "starting with anonymous user {}", anonymous);
        IdentityManager {
            inner: Mutex::new(IdentityInner {
                current: Identity::Anonymous(anonymous),
                known_ids: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdentityInner> {
        self.inner
            .lock()
            .expect("thread holding identity lock should not panic")
    }

    pub(crate) fn identity(&self) -> Identity {
        self.lock().current.clone()
    }

    pub(crate) fn current_user(&self) -> UserId {
        self.lock().current.user_id().clone()
    }

    /// Applies the identity-transition rules: an anonymous device identifying a never-seen id
    /// carries its local history over; any other change starts from a fresh profile. Once a
    /// device has identified, it never returns to anonymous.
    pub(crate) fn change_user(&self, new_id: UserId) -> UserChange {
        let mut inner = self.lock();
        if inner.current.user_id() == &new_id {
            return UserChange::Unchanged;
        }
        let merge_history = matches!(inner.current, Identity::Anonymous(_))
            && !inner.known_ids.contains(&new_id);
        let previous = inner.current.user_id().clone();
        inner.known_ids.insert(new_id.clone());
        inner.current = Identity::Identified(new_id);
        UserChange::Changed {
            previous,
            merge_history,
        }
    }
}
