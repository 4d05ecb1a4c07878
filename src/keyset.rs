//! Folds add/delete actions into the set of currently held keys.

use std::cell::RefCell;
use std::collections::BTreeSet;

use crate::signal::{Signal, Subject, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Delete,
}

/// One transition for a key.
pub type KeyAction<K> = (Action, K);

/// Reducer state for one input source.
///
/// Consecutive identical `(action, key)` pairs are dropped so auto-repeat does
/// not re-emit. With [`KeySetReducer::quiet_when_idle`] a transition that leaves
/// an already empty set empty is swallowed as well.
#[derive(Debug, Clone)]
pub struct KeySetReducer<K> {
    keys: BTreeSet<K>,
    last: Option<KeyAction<K>>,
    quiet_when_idle: bool,
}

impl<K: Ord + Clone> KeySetReducer<K> {
    pub fn new() -> Self {
        Self {
            keys: BTreeSet::new(),
            last: None,
            quiet_when_idle: false,
        }
    }

    /// Reducer for pointer input: never reports "nothing held" twice in a row.
    pub fn quiet_when_idle() -> Self {
        Self {
            quiet_when_idle: true,
            ..Self::new()
        }
    }

    /// Applies one action. Returns the new snapshot, or `None` when the action
    /// was filtered out.
    pub fn apply(&mut self, action: Action, key: K) -> Option<BTreeSet<K>> {
        if let Some((last_action, last_key)) = &self.last {
            if *last_action == action && *last_key == key {
                return None;
            }
        }

        let before = self.keys.len();
        match action {
            Action::Add => {
                self.keys.insert(key.clone());
            }
            Action::Delete => {
                self.keys.remove(&key);
            }
        }
        self.last = Some((action, key));

        if self.quiet_when_idle && before == 0 && self.keys.is_empty() {
            return None;
        }
        Some(self.keys.clone())
    }

    pub fn keys(&self) -> &BTreeSet<K> {
        &self.keys
    }
}

impl<K: Ord + Clone> Default for KeySetReducer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone + 'static> KeySetReducer<K> {
    /// Feeds every action from `actions` through the reducer and publishes each
    /// accepted snapshot. The signal starts out empty.
    pub fn bind(self, actions: &Subject<KeyAction<K>>) -> (Signal<BTreeSet<K>>, Subscription) {
        let keys = Signal::new(BTreeSet::new());
        let output = keys.clone();
        let reducer = RefCell::new(self);
        let subscription = actions.subscribe(move |(action, key)| {
            let snapshot = reducer.borrow_mut().apply(*action, key.clone());
            if let Some(snapshot) = snapshot {
                output.replace(snapshot);
            }
        });
        (keys, subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::rc::Rc;

    /// Replays `actions` through a fresh reducer and returns the final set.
    fn reduce<K: Ord + Clone>(actions: impl IntoIterator<Item = KeyAction<K>>) -> BTreeSet<K> {
        let mut reducer = KeySetReducer::new();
        for (action, key) in actions {
            reducer.apply(action, key);
        }
        reducer.keys
    }

    /// Plain fold over the sequence with consecutive repeats removed.
    fn fold_deduplicated<K: Ord + Clone>(actions: &[KeyAction<K>]) -> BTreeSet<K> {
        let mut expected = BTreeSet::new();
        let mut last: Option<&KeyAction<K>> = None;
        for entry in actions {
            if last == Some(entry) {
                continue;
            }
            last = Some(entry);
            match &entry.0 {
                Action::Add => expected.insert(entry.1.clone()),
                Action::Delete => expected.remove(&entry.1),
            };
        }
        expected
    }

    fn set(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn add_and_delete_fold_into_set() {
        let mut reducer = KeySetReducer::new();
        assert_eq!(reducer.apply(Action::Add, "a".to_string()), Some(set(&["a"])));
        assert_eq!(
            reducer.apply(Action::Add, "s".to_string()),
            Some(set(&["a", "s"]))
        );
        assert_eq!(reducer.apply(Action::Delete, "a".to_string()), Some(set(&["s"])));
    }

    #[test]
    fn consecutive_duplicates_are_dropped() {
        let mut reducer = KeySetReducer::new();
        assert!(reducer.apply(Action::Add, 'a').is_some());
        assert!(reducer.apply(Action::Add, 'a').is_none());
        assert!(reducer.apply(Action::Add, 'a').is_none());
        // same key, different action passes
        assert!(reducer.apply(Action::Delete, 'a').is_some());
        assert!(reducer.keys().is_empty());
    }

    #[test]
    fn membership_is_idempotent() {
        let mut reducer = KeySetReducer::new();
        reducer.apply(Action::Add, 1);
        reducer.apply(Action::Add, 2);
        // re-adding a present key after another action is still a no-op on the set
        assert_eq!(reducer.apply(Action::Add, 1), Some(BTreeSet::from([1, 2])));
        // deleting an absent key leaves the set alone
        assert_eq!(reducer.apply(Action::Delete, 9), Some(BTreeSet::from([1, 2])));
    }

    #[test]
    fn replay_matches_deduplicated_sequence() {
        let actions = vec![
            (Action::Add, 4),
            (Action::Add, 4),
            (Action::Add, 6),
            (Action::Delete, 4),
            (Action::Delete, 4),
            (Action::Delete, 7),
            (Action::Add, 8),
        ];
        let expected = fold_deduplicated(&actions);
        assert_eq!(reduce(actions), expected);
    }

    #[test]
    fn generated_sequences_match_plain_fold() {
        for seed in 0..500 {
            let mut rng = StdRng::seed_from_u64(seed);
            let len = rng.gen_range(0..60);
            let actions: Vec<KeyAction<u8>> = (0..len)
                .map(|_| {
                    let action = if rng.gen_bool(0.55) { Action::Add } else { Action::Delete };
                    (action, rng.gen_range(0..6))
                })
                .collect();
            let expected = fold_deduplicated(&actions);
            assert_eq!(reduce(actions.clone()), expected, "seed {seed}: {actions:?}");

            // the published snapshot agrees with the final state
            let mut reducer = KeySetReducer::new();
            let mut published = BTreeSet::new();
            for (action, key) in actions {
                if let Some(snapshot) = reducer.apply(action, key) {
                    published = snapshot;
                }
            }
            assert_eq!(published, expected, "seed {seed}");
        }
    }

    #[test]
    fn quiet_reducer_skips_repeated_empty_snapshots() {
        let mut reducer = KeySetReducer::quiet_when_idle();
        assert!(reducer.apply(Action::Delete, 1).is_none());
        assert_eq!(reducer.apply(Action::Add, 1), Some(BTreeSet::from([1])));
        // the release itself is still reported
        assert_eq!(reducer.apply(Action::Delete, 1), Some(BTreeSet::new()));
        assert!(reducer.apply(Action::Delete, 2).is_none());
    }

    #[test]
    fn bound_reducer_publishes_snapshots() {
        let actions = Subject::new();
        let (keys, _sub) = KeySetReducer::new().bind(&actions);
        let sizes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&sizes);
        let _watch = keys.subscribe(move |k: &BTreeSet<u8>| sink.borrow_mut().push(k.len()));

        actions.emit((Action::Add, 1));
        actions.emit((Action::Add, 1));
        actions.emit((Action::Add, 2));
        actions.emit((Action::Delete, 1));

        assert_eq!(*sizes.borrow(), vec![0, 1, 2, 1]);
        assert_eq!(keys.get(), BTreeSet::from([2]));
    }
}
