//! The Nose table: an append-only sequence of hostnames under policy,
//! indexed by an opaque integer embedded into synthesized DNS answers.
//!
//! Element 0 is reserved for the sentinel `phantom.socks`. Appends are
//! serialized by a mutex; reads snapshot the current `Arc<Vec<_>>` without
//! taking any lock — a standard read-copy pattern.
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

const SENTINEL: &str = "phantom.socks";

pub struct Nose {
    names: ArcSwap<Vec<Arc<str>>>,
    append_lock: Mutex<()>,
}

impl Default for Nose {
    fn default() -> Self {
        Self::new()
    }
}

impl Nose {
    pub fn new() -> Self {
        Nose {
            names: ArcSwap::from_pointee(vec![Arc::from(SENTINEL)]),
            append_lock: Mutex::new(()),
        }
    }

    /// Append `name`, returning its 1-based index. Indices, once issued, are
    /// stable for the process lifetime.
    pub fn append(&self, name: &str) -> usize {
        let _guard = self.append_lock.lock().unwrap();
        let current = self.names.load();
        let mut next: Vec<Arc<str>> = (**current).clone();
        next.push(Arc::from(name));
        let index = next.len() - 1;
        self.names.store(Arc::new(next));
        index
    }

    /// Look up the name at `index`, if any. Lock-free.
    pub fn get(&self, index: usize) -> Option<Arc<str>> {
        self.names.load().get(index).cloned()
    }

    /// Number of entries, including the sentinel at index 0.
    pub fn len(&self) -> usize {
        self.names.load().len()
    }

    pub fn is_empty(&self) -> bool {
        false // the sentinel is always present
    }
}
