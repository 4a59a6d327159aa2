//! Tracks the active card set behind message delivery and broadcasts refreshes to registered
//! observers.
//!
//! Card rendering lives in the host; the runtime only keeps the counters the host surface needs
//! (total active cards, cards not yet viewed) and fires a payload-free signal whenever the data
//! set is refreshed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::transport::FeedUpdate;
use crate::Str;

/// Handle returned by `subscribe_feed_updates`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedObserverId(u64);

#[derive(Debug)]
struct Card {
    id: Str,
    viewed: bool,
}

type Observer = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct FeedTracker {
    cards: Mutex<Vec<Card>>,
    observers: Mutex<Vec<(FeedObserverId, Observer)>>,
    next_observer: AtomicU64,
}

impl FeedTracker {
    pub(crate) fn new() -> FeedTracker {
        FeedTracker::default()
    }

    pub(crate) fn card_count(&self) -> usize {
        self.lock_cards().len()
    }

    pub(crate) fn unread_card_count(&self) -> usize {
        self.lock_cards().iter().filter(|card| !card.viewed).count()
    }

    /// The first impression marks the card viewed; re-presentation does not re-count.
    pub(crate) fn record_impression(&self, card_id: &str) {
        let mut cards = self.lock_cards();
        if let Some(card) = cards.iter_mut().find(|card| &*card.id == card_id) {
            card.viewed = true;
        }
    }

    /// Replaces the active card set, preserving viewed state by id, then notifies every observer
    /// registered at this moment.
    pub(crate) fn apply_update(&self, update: FeedUpdate) {
        {
            let mut cards = self.lock_cards();
            let old = std::mem::take(&mut *cards);
            *cards = update
                .cards
                .into_iter()
                .map(|incoming| Card {
                    viewed: old
                        .iter()
                        .any(|card| card.id == incoming.id && card.viewed),
                    id: incoming.id,
                })
                .collect();
        }
        log::debug!(target: "beacon", "feed updated, notifying observers");
        let snapshot: Vec<Observer> = self
            .lock_observers()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in snapshot {
            observer();
        }
    }

    pub(crate) fn subscribe(&self, observer: impl Fn() + Send + Sync + 'static) -> FeedObserverId {
        let id = FeedObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.lock_observers().push((id, Arc::new(observer)));
        id
    }

    pub(crate) fn unsubscribe(&self, id: FeedObserverId) {
        self.lock_observers()
            .retain(|(observer_id, _)| *observer_id != id);
    }

    /// Cards belong to the previous user after an identity change.
    pub(crate) fn clear(&self) {
        self.lock_cards().clear();
    }

    fn lock_cards(&self) -> std::sync::MutexGuard<'_, Vec<Card>> {
        self.cards
            .lock()
            .expect("thread holding feed card lock should not panic")
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<(FeedObserverId, Observer)>> {
        self.observers
            .lock()
            .expect("thread holding feed observer lock should not panic")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::transport::CardUpdate;

    fn update(ids: &[&str]) -> FeedUpdate {
        FeedUpdate {
            cards: ids
                .iter()
                .map(|id| CardUpdate { id: (*id).into() })
                .collect(),
        }
    }

    #[test]
    fn impressions_count_a_card_as_read_once() {
        let feed = FeedTracker::new();
        feed.apply_update(update(&["a", "b"]));
        assert_eq!(feed.card_count(), 2);
        assert_eq!(feed.unread_card_count(), 2);

        feed.record_impression("a");
        feed.record_impression("a");
        assert_eq!(feed.unread_card_count(), 1);
    }

    #[test]
    fn refresh_preserves_viewed_state_by_id() {
        let feed = FeedTracker::new();
        feed.apply_update(update(&["a", "b"]));
        feed.record_impression("a");

        feed.apply_update(update(&["a", "c"]));
        assert_eq!(feed.card_count(), 2);
        // "a" stays read, "c" is new and unread.
        assert_eq!(feed.unread_card_count(), 1);
    }

    #[test]
    fn observers_fire_per_refresh_until_unsubscribed() {
        let feed = FeedTracker::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = feed.subscribe({
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });

        feed.apply_update(update(&["a"]));
        feed.apply_update(update(&["a"]));
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        feed.unsubscribe(id);
        feed.apply_update(update(&["a"]));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
