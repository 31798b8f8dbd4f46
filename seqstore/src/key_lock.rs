use std::sync::{Mutex, MutexGuard, PoisonError};

use seqstore_common::util::get_key_id;

/// Fixed set of mutexes that keys are hashed onto.
///
/// The same key always maps to the same stripe, so holding a key's stripe
/// excludes every other writer of that key. Distinct keys only contend when
/// they happen to share a stripe.
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_of(&self, key: &str) -> usize {
        (get_key_id(key) % self.stripes.len() as u64) as usize
    }

    /// Block until the stripe owning `key` is free.
    // The mutex guards no data, so a panic in another holder leaves nothing to repair.
    pub fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}
