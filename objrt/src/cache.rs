use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{Imp, Method, Selector};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty = 0,
    Populated = 1,
    /// Entries were flushed by a method-table mutation since the last fill.
    Stale = 2,
}

impl CacheState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Populated,
            2 => Self::Stale,
            _ => Self::Empty,
        }
    }
}

/// Per-class selector → method cache.
///
/// Entries hold the [`Method`] itself rather than its implementation, so
/// replacing or exchanging an implementation never needs a flush. Adding
/// a method that shadows an inherited one does: the runtime flushes that
/// selector from the class and every descendant.
#[derive(Debug)]
pub struct MethodCache {
    entries: RwLock<FxHashMap<Selector, Method>>,
    state: AtomicU8,
}

impl MethodCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::with_capacity_and_hasher(
                capacity,
                Default::default(),
            )),
            state: AtomicU8::new(CacheState::Empty as u8),
        }
    }

    pub fn state(&self) -> CacheState {
        CacheState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, selector: Selector) -> Option<Method> {
        self.entries.read().get(&selector).cloned()
    }

    /// Hit path: reads the implementation without cloning the entry.
    pub fn get_imp(&self, selector: Selector) -> Option<Imp> {
        self.entries
            .read()
            .get(&selector)
            .map(Method::implementation)
    }

    /// Insert the result of a hierarchy walk.
    ///
    /// `walk_epoch` is the mutation epoch read before the walk started.
    /// If a method table changed since then the walk may have missed a
    /// new override, so the fill is dropped; the next lookup walks again.
    pub(crate) fn fill(
        &self,
        selector: Selector,
        method: Method,
        walk_epoch: u64,
        epoch: &AtomicU64,
    ) -> bool {
        let mut entries = self.entries.write();
        if epoch.load(Ordering::Acquire) != walk_epoch {
            log::trace!("dropping fill for {selector:?}: method tables changed");
            return false;
        }
        entries.insert(selector, method);
        self.state
            .store(CacheState::Populated as u8, Ordering::Release);
        true
    }

    /// Remove one selector. Returns whether an entry was present.
    pub fn flush_selector(&self, selector: Selector) -> bool {
        let mut entries = self.entries.write();
        let removed = entries.remove(&selector).is_some();
        if removed {
            self.state.store(CacheState::Stale as u8, Ordering::Release);
        }
        removed
    }

    pub fn flush(&self) {
        let mut entries = self.entries.write();
        if !entries.is_empty() {
            entries.clear();
            self.state.store(CacheState::Stale as u8, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Class, SelectorTable};

    fn method(sels: &SelectorTable, name: &str, addr: usize) -> Method {
        Method::new(
            sels.register_name(name),
            Imp::from_addr(addr).expect("non-null"),
            Arc::from("v@:"),
            Class::from_index(0),
        )
    }

    #[test]
    fn state_transitions() {
        let sels = SelectorTable::new();
        let epoch = AtomicU64::new(0);
        let cache = MethodCache::with_capacity(4);
        assert_eq!(cache.state(), CacheState::Empty);

        let m = method(&sels, "a", 0x10);
        assert!(cache.fill(m.name(), m.clone(), 0, &epoch));
        assert_eq!(cache.state(), CacheState::Populated);
        assert_eq!(cache.get_imp(m.name()), Some(m.implementation()));

        assert!(cache.flush_selector(m.name()));
        assert_eq!(cache.state(), CacheState::Stale);
        assert!(cache.get(m.name()).is_none());

        assert!(cache.fill(m.name(), m.clone(), 0, &epoch));
        assert_eq!(cache.state(), CacheState::Populated);
    }

    #[test]
    fn flushing_a_missing_selector_keeps_state() {
        let sels = SelectorTable::new();
        let epoch = AtomicU64::new(0);
        let cache = MethodCache::with_capacity(4);
        let m = method(&sels, "a", 0x10);
        cache.fill(m.name(), m, 0, &epoch);
        assert!(!cache.flush_selector(sels.register_name("b")));
        assert_eq!(cache.state(), CacheState::Populated);
    }

    #[test]
    fn fill_after_mutation_is_dropped() {
        let sels = SelectorTable::new();
        let epoch = AtomicU64::new(3);
        let cache = MethodCache::with_capacity(4);
        let m = method(&sels, "a", 0x10);
        assert!(!cache.fill(m.name(), m, 2, &epoch));
        assert!(cache.is_empty());
        assert_eq!(cache.state(), CacheState::Empty);
    }

    #[test]
    fn cached_entries_observe_swapped_implementations() {
        let sels = SelectorTable::new();
        let epoch = AtomicU64::new(0);
        let cache = MethodCache::with_capacity(4);
        let m = method(&sels, "a", 0x10);
        cache.fill(m.name(), m.clone(), 0, &epoch);

        let new_imp = Imp::from_addr(0x20).expect("non-null");
        m.swap_implementation(new_imp);
        assert_eq!(cache.get_imp(m.name()), Some(new_imp));
    }
}
