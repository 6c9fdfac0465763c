use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Source of table ids, so a handle can tell which table produced it.
static NEXT_TABLE_ID: AtomicU32 = AtomicU32::new(1);

/// Interned method name. Equal names from the same table always yield
/// equal handles, so `==` is identity comparison.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector {
    table: u32,
    index: u32,
}

impl Selector {
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({}:{})", self.table, self.index)
    }
}

struct SelectorTableImpl {
    names: Vec<Arc<str>>,
    mappings: FxHashMap<Arc<str>, u32>,
}

impl SelectorTableImpl {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            names: Vec::with_capacity(capacity),
            mappings: FxHashMap::with_capacity_and_hasher(
                capacity,
                Default::default(),
            ),
        }
    }

    fn get_or_add(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.mappings.get(value) {
            return index;
        }
        let index = u32::try_from(self.names.len())
            .expect("selector table exhausted the u32 index space");
        let interned = Arc::<str>::from(value);
        self.names.push(interned.clone());
        self.mappings.insert(interned, index);
        index
    }
}

/// Append-only selector interning table.
///
/// Reads take the shared lock; only a miss upgrades to the exclusive
/// lock, re-checking before inserting so racing registrations of the
/// same text agree on one handle.
pub struct SelectorTable {
    id: u32,
    inner: RwLock<SelectorTableImpl>,
}

impl SelectorTable {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            inner: RwLock::new(SelectorTableImpl::with_capacity(capacity)),
        }
    }

    pub fn register_name(&self, name: &str) -> Selector {
        if let Some(&index) = self.inner.read().mappings.get(name) {
            return Selector {
                table: self.id,
                index,
            };
        }
        let index = self.inner.write().get_or_add(name);
        log::trace!("interned selector {name:?} as {index}");
        Selector {
            table: self.id,
            index,
        }
    }

    /// Existing selector for `name` without interning it.
    pub fn lookup(&self, name: &str) -> Option<Selector> {
        let index = *self.inner.read().mappings.get(name)?;
        Some(Selector {
            table: self.id,
            index,
        })
    }

    pub fn is_mapped(&self, selector: Selector) -> bool {
        selector.table == self.id
            && (selector.index as usize) < self.inner.read().names.len()
    }

    pub fn name(&self, selector: Selector) -> Option<Arc<str>> {
        if selector.table != self.id {
            return None;
        }
        self.inner.read().names.get(selector.index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Barrier, thread};

    #[test]
    fn registration_is_idempotent() {
        let table = SelectorTable::new();
        let a = table.register_name("init");
        let b = table.register_name("init");
        let c = table.register_name("dealloc");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
        assert_eq!(table.name(c).as_deref(), Some("dealloc"));
    }

    #[test]
    fn lookup_does_not_intern() {
        let table = SelectorTable::new();
        assert!(table.lookup("missing").is_none());
        assert!(table.is_empty());
        let sel = table.register_name("present");
        assert_eq!(table.lookup("present"), Some(sel));
    }

    #[test]
    fn foreign_handles_are_not_mapped() {
        let a = SelectorTable::new();
        let b = SelectorTable::new();
        let sel = a.register_name("count");
        assert!(a.is_mapped(sel));
        assert!(!b.is_mapped(sel));
        assert!(b.name(sel).is_none());
    }

    #[test]
    fn concurrent_registration_agrees() {
        let table = Arc::new(SelectorTable::new());
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let table = table.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    (0..64)
                        .map(|i| table.register_name(&format!("sel{i}:")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<Selector>> = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .collect();

        for other in &results[1..] {
            assert_eq!(&results[0], other);
        }
        assert_eq!(table.len(), 64);
    }
}
