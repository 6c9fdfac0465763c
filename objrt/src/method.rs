use std::{
    fmt,
    hash::{Hash, Hasher},
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use encoding::{EncodingError, MethodSignature};
use rustc_hash::FxHashMap;

use crate::{Class, Selector};

/// Address of a callable implementation. Never null.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Imp(NonZeroUsize);

impl Imp {
    pub const fn new(addr: NonZeroUsize) -> Self {
        Self(addr)
    }

    pub fn from_addr(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        Self::from_addr(ptr as usize)
    }

    pub fn addr(self) -> usize {
        self.0.get()
    }

    pub fn as_ptr(self) -> *const () {
        self.0.get() as *const ()
    }
}

impl fmt::Debug for Imp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Imp({:#x})", self.0.get())
    }
}

/// Selector plus type encoding, without an implementation. Used by
/// protocols and by [`Method::description`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescription {
    pub name: Selector,
    pub types: Arc<str>,
}

pub(crate) struct MethodEntry {
    selector: Selector,
    imp: AtomicUsize,
    types: Arc<str>,
    owner: Class,
}

/// A method entry owned by a class's method table.
///
/// Two handles are equal when they refer to the same entry. The
/// implementation is swapped in place, so caches holding the handle see
/// replacements without being flushed.
#[derive(Clone)]
pub struct Method(Arc<MethodEntry>);

impl Method {
    pub(crate) fn new(selector: Selector, imp: Imp, types: Arc<str>, owner: Class) -> Self {
        Self(Arc::new(MethodEntry {
            selector,
            imp: AtomicUsize::new(imp.addr()),
            types,
            owner,
        }))
    }

    pub fn name(&self) -> Selector {
        self.0.selector
    }

    pub fn implementation(&self) -> Imp {
        let addr = self.0.imp.load(Ordering::Acquire);
        // SAFETY: only ever stored from an `Imp`
        Imp(unsafe { NonZeroUsize::new_unchecked(addr) })
    }

    pub fn type_encoding(&self) -> &str {
        &self.0.types
    }

    /// The class whose method table holds this entry.
    pub fn owner(&self) -> Class {
        self.0.owner
    }

    pub fn description(&self) -> MethodDescription {
        MethodDescription {
            name: self.0.selector,
            types: self.0.types.clone(),
        }
    }

    /// Callers serialize swaps through the runtime's method lock.
    pub(crate) fn swap_implementation(&self, imp: Imp) -> Imp {
        let old = self.0.imp.swap(imp.addr(), Ordering::AcqRel);
        // SAFETY: only ever stored from an `Imp`
        Imp(unsafe { NonZeroUsize::new_unchecked(old) })
    }

    pub fn signature(&self) -> Result<MethodSignature, EncodingError> {
        MethodSignature::parse(&self.0.types)
    }

    /// Argument count including the receiver and selector; 0 when the
    /// type encoding does not parse.
    pub fn number_of_arguments(&self) -> usize {
        self.signature().map(|sig| sig.argument_count()).unwrap_or(0)
    }

    pub fn copy_return_type(&self) -> Option<String> {
        let sig = self.signature().ok()?;
        Some(sig.return_type().text.clone())
    }

    pub fn copy_argument_type(&self, index: usize) -> Option<String> {
        let sig = self.signature().ok()?;
        sig.argument(index).map(|arg| arg.text.clone())
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Method {}

impl Hash for Method {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("selector", &self.0.selector)
            .field("imp", &self.implementation())
            .field("types", &self.0.types)
            .field("owner", &self.0.owner)
            .finish()
    }
}

/// Per-class method table: insertion order for listing, hashed index for
/// lookup. At most one entry per selector.
#[derive(Default)]
pub(crate) struct MethodTable {
    entries: Vec<Method>,
    index: FxHashMap<Selector, usize>,
}

impl MethodTable {
    pub(crate) fn get(&self, selector: Selector) -> Option<&Method> {
        self.index.get(&selector).map(|&i| &self.entries[i])
    }

    /// Returns `false` without inserting if the selector is taken.
    pub(crate) fn insert(&mut self, method: Method) -> bool {
        let selector = method.name();
        if self.index.contains_key(&selector) {
            return false;
        }
        self.index.insert(selector, self.entries.len());
        self.entries.push(method);
        true
    }

    pub(crate) fn methods(&self) -> &[Method] {
        &self.entries
    }
}
