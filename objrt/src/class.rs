use std::{
    fmt,
    mem,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering},
    },
};

use bitflags::bitflags;
use parking_lot::RwLock;

use crate::{
    Imp, Method, MethodCache, MethodTable, Object, Property, PropertyAttribute,
    Protocol, Runtime, RuntimeError, Selector, Storage,
};

/// Every instance starts with one word naming its class.
pub const HEADER_SIZE: usize = mem::size_of::<usize>();

/// Largest accepted `alignment_log2` for `class_add_ivar`.
const MAX_ALIGNMENT_LOG2: u8 = 12;

/// Largest instance size a class may describe; `Layout` rejects more.
const MAX_INSTANCE_SIZE: usize = isize::MAX as usize;

/// `None` on overflow.
#[inline]
pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// Handle to a class or metaclass: an index into the runtime's class
/// table. Indices are never reused, so a handle to a disposed class
/// simply stops resolving.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Class(u32);

impl Class {
    pub(crate) fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class({})", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u8 {
        const META = 1 << 0;
        const ROOT = 1 << 1;
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    /// Allocated, not yet visible to lookup; ivars may still be added.
    Constructing = 0,
    Registered = 1,
    Disposed = 2,
}

impl ClassState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Constructing,
            1 => Self::Registered,
            _ => Self::Disposed,
        }
    }
}

/// Class-defined teardown run by `destruct_instance`.
pub type Teardown = Arc<dyn Fn(Object) + Send + Sync>;

/// An instance variable. Immutable once added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ivar {
    name: Arc<str>,
    offset: usize,
    size: usize,
    alignment: usize,
    types: Arc<str>,
}

impl Ivar {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte offset from the start of the instance.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn type_encoding(&self) -> &str {
        &self.types
    }
}

pub(crate) struct InstanceLayout {
    /// Unaligned end of the last ivar.
    pub(crate) size: usize,
    pub(crate) ivars: Vec<Ivar>,
}

pub(crate) struct ClassData {
    pub(crate) id: Class,
    pub(crate) name: Arc<str>,
    pub(crate) flags: ClassFlags,
    pub(crate) superclass: Option<Class>,
    /// Metaclass for a class; the root metaclass for a metaclass.
    pub(crate) isa: Class,
    state: AtomicU8,
    pub(crate) layout: RwLock<InstanceLayout>,
    pub(crate) methods: RwLock<MethodTable>,
    pub(crate) protocols: RwLock<Vec<Protocol>>,
    pub(crate) properties: RwLock<Vec<Property>>,
    pub(crate) subclasses: RwLock<Vec<Class>>,
    pub(crate) version: AtomicI32,
    pub(crate) cache: MethodCache,
    pub(crate) live_instances: AtomicUsize,
    pub(crate) teardown: RwLock<Option<Teardown>>,
    /// Extra bytes requested at allocation, zeroed.
    pub(crate) indexed: Option<Storage>,
}

pub(crate) struct ClassInit {
    pub(crate) id: Class,
    pub(crate) name: Arc<str>,
    pub(crate) flags: ClassFlags,
    pub(crate) superclass: Option<Class>,
    pub(crate) isa: Class,
    pub(crate) instance_start: usize,
    pub(crate) cache_capacity: usize,
    pub(crate) indexed: Option<Storage>,
}

impl ClassData {
    pub(crate) fn new(init: ClassInit) -> Self {
        Self {
            id: init.id,
            name: init.name,
            flags: init.flags,
            superclass: init.superclass,
            isa: init.isa,
            state: AtomicU8::new(ClassState::Constructing as u8),
            layout: RwLock::new(InstanceLayout {
                size: init.instance_start,
                ivars: Vec::new(),
            }),
            methods: RwLock::new(MethodTable::default()),
            protocols: RwLock::new(Vec::new()),
            properties: RwLock::new(Vec::new()),
            subclasses: RwLock::new(Vec::new()),
            version: AtomicI32::new(0),
            cache: MethodCache::with_capacity(init.cache_capacity),
            live_instances: AtomicUsize::new(0),
            teardown: RwLock::new(None),
            indexed: init.indexed,
        }
    }

    pub(crate) fn state(&self) -> ClassState {
        ClassState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ClassState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn is_meta(&self) -> bool {
        self.flags.contains(ClassFlags::META)
    }

    /// Instance size rounded up to a word.
    pub(crate) fn instance_size(&self) -> usize {
        // `class_add_ivar` keeps the rounded size within MAX_INSTANCE_SIZE
        align_up(self.layout.read().size, HEADER_SIZE).unwrap_or(usize::MAX)
    }
}

/// Walks a class and then each superclass.
pub(crate) struct Ancestors<'a> {
    runtime: &'a Runtime,
    next: Option<Class>,
}

impl Iterator for Ancestors<'_> {
    type Item = Arc<ClassData>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.runtime.class_data(self.next?)?;
        self.next = data.superclass;
        Some(data)
    }
}

impl Runtime {
    pub(crate) fn ancestors(&self, cls: Class) -> Ancestors<'_> {
        Ancestors {
            runtime: self,
            next: Some(cls),
        }
    }

    pub(crate) fn live_class(&self, cls: Class) -> Result<Arc<ClassData>, RuntimeError> {
        self.class_data(cls).ok_or(RuntimeError::NotAClass)
    }

    // ── Identity ───────────────────────────────────────────────────

    pub fn class_get_name(&self, cls: Class) -> Option<Arc<str>> {
        Some(self.class_data(cls)?.name.clone())
    }

    pub fn class_get_superclass(&self, cls: Class) -> Option<Class> {
        self.class_data(cls)?.superclass
    }

    pub fn class_is_meta_class(&self, cls: Class) -> bool {
        self.class_data(cls).is_some_and(|data| data.is_meta())
    }

    /// The class of `cls` itself: its metaclass, or the root metaclass
    /// when `cls` is a metaclass.
    pub fn class_get_meta_class(&self, cls: Class) -> Option<Class> {
        Some(self.class_data(cls)?.isa)
    }

    pub fn class_is_registered(&self, cls: Class) -> bool {
        self.class_data(cls)
            .is_some_and(|data| data.state() == ClassState::Registered)
    }

    pub fn class_get_version(&self, cls: Class) -> i32 {
        self.class_data(cls)
            .map_or(0, |data| data.version.load(Ordering::Relaxed))
    }

    pub fn class_set_version(&self, cls: Class, version: i32) {
        if let Some(data) = self.class_data(cls) {
            data.version.store(version, Ordering::Relaxed);
        }
    }

    pub fn class_get_instance_size(&self, cls: Class) -> Option<usize> {
        Some(self.class_data(cls)?.instance_size())
    }

    /// The zeroed extra bytes requested when the class was allocated.
    pub fn class_get_indexed_ivars(&self, cls: Class) -> Option<NonNull<u8>> {
        self.class_data(cls)?.indexed.as_ref().map(Storage::ptr)
    }

    pub fn class_set_teardown(
        &self,
        cls: Class,
        teardown: Option<Teardown>,
    ) -> Result<(), RuntimeError> {
        let data = self.live_class(cls)?;
        *data.teardown.write() = teardown;
        Ok(())
    }

    // ── Methods ────────────────────────────────────────────────────

    /// Add a method to `cls` itself. Fails if `cls` already has an entry
    /// for `selector`; an inherited entry does not block the override.
    pub fn class_add_method(
        &self,
        cls: Class,
        selector: Selector,
        imp: Imp,
        types: &str,
    ) -> Result<(), RuntimeError> {
        if !self.selectors.is_mapped(selector) {
            return Err(RuntimeError::ForeignSelector);
        }
        let data = self.live_class(cls)?;
        let inserted = data
            .methods
            .write()
            .insert(Method::new(selector, imp, Arc::from(types), cls));
        if !inserted {
            return Err(RuntimeError::DuplicateMethod {
                selector: self.describe_selector(selector),
            });
        }

        self.flush_selector_in_hierarchy(cls, selector);
        log::debug!(
            "{}: added {} -> {imp:?}",
            data.name,
            self.describe_selector(selector)
        );
        Ok(())
    }

    /// Add the method if absent, otherwise swap in `imp` and return the
    /// previous implementation. `types` is ignored when replacing.
    pub fn class_replace_method(
        &self,
        cls: Class,
        selector: Selector,
        imp: Imp,
        types: &str,
    ) -> Result<Option<Imp>, RuntimeError> {
        if !self.selectors.is_mapped(selector) {
            return Err(RuntimeError::ForeignSelector);
        }
        let data = self.live_class(cls)?;

        {
            let mut methods = data.methods.write();
            if let Some(existing) = methods.get(selector) {
                let _guard = self.imp_lock.lock();
                let previous = existing.swap_implementation(imp);
                log::debug!(
                    "{}: replaced {} {previous:?} -> {imp:?}",
                    data.name,
                    self.describe_selector(selector)
                );
                return Ok(Some(previous));
            }
            methods.insert(Method::new(selector, imp, Arc::from(types), cls));
        }

        self.flush_selector_in_hierarchy(cls, selector);
        log::debug!(
            "{}: added {} -> {imp:?} via replace",
            data.name,
            self.describe_selector(selector)
        );
        Ok(None)
    }

    /// Methods defined by `cls` itself, in insertion order.
    pub fn class_copy_method_list(&self, cls: Class) -> Vec<Method> {
        self.class_data(cls)
            .map(|data| data.methods.read().methods().to_vec())
            .unwrap_or_default()
    }

    pub fn method_set_implementation(&self, method: &Method, imp: Imp) -> Imp {
        let _guard = self.imp_lock.lock();
        method.swap_implementation(imp)
    }

    /// Swap two entries' implementations as one step with respect to
    /// every other swap.
    pub fn method_exchange_implementations(&self, a: &Method, b: &Method) {
        if a == b {
            return;
        }
        let _guard = self.imp_lock.lock();
        let imp_a = a.implementation();
        let imp_b = b.implementation();
        a.swap_implementation(imp_b);
        b.swap_implementation(imp_a);
        log::debug!(
            "exchanged {} and {}",
            self.describe_selector(a.name()),
            self.describe_selector(b.name())
        );
    }

    /// Drop `selector` from the cache of `cls` and every descendant after
    /// a new entry appeared in `cls`'s method table.
    pub(crate) fn flush_selector_in_hierarchy(&self, cls: Class, selector: Selector) {
        self.method_epoch.fetch_add(1, Ordering::SeqCst);

        let mut pending = vec![cls];
        let mut flushed = 0usize;
        while let Some(next) = pending.pop() {
            let Some(data) = self.class_data(next) else {
                continue;
            };
            if data.cache.flush_selector(selector) {
                flushed += 1;
            }
            pending.extend(data.subclasses.read().iter().copied());
        }
        log::trace!(
            "flushed {} from {flushed} cache(s)",
            self.describe_selector(selector)
        );
    }

    // ── Ivars ──────────────────────────────────────────────────────

    /// Append an ivar. Only legal while the class is under construction,
    /// and never on a metaclass.
    pub fn class_add_ivar(
        &self,
        cls: Class,
        name: &str,
        size: usize,
        alignment_log2: u8,
        types: &str,
    ) -> Result<(), RuntimeError> {
        let data = self.live_class(cls)?;
        if data.is_meta() {
            return Err(RuntimeError::MetaclassIvar);
        }
        if alignment_log2 > MAX_ALIGNMENT_LOG2 {
            return Err(RuntimeError::InvalidAlignment {
                log2: alignment_log2,
            });
        }

        // registration flips the state while holding this lock
        let mut layout = data.layout.write();
        if data.state() != ClassState::Constructing {
            log::warn!("refusing to add ivar {name} to registered class {}", data.name);
            return Err(RuntimeError::NotMutable {
                class: data.name.to_string(),
            });
        }
        if layout.ivars.iter().any(|ivar| &*ivar.name == name) {
            return Err(RuntimeError::DuplicateIvar {
                name: name.to_owned(),
            });
        }

        let alignment = 1usize << alignment_log2;
        let Some((offset, end)) = align_up(layout.size, alignment)
            .and_then(|offset| Some((offset, offset.checked_add(size)?)))
            .filter(|&(_, end)| {
                align_up(end, HEADER_SIZE).is_some_and(|total| total <= MAX_INSTANCE_SIZE)
            })
        else {
            log::warn!("ivar {name} ({size} bytes) overflows the layout of {}", data.name);
            return Err(RuntimeError::OutOfMemory { size: usize::MAX });
        };
        layout.ivars.push(Ivar {
            name: Arc::from(name),
            offset,
            size,
            alignment,
            types: Arc::from(types),
        });
        layout.size = end;
        log::trace!("{}: ivar {name} at offset {offset}", data.name);
        Ok(())
    }

    /// Ivars declared by `cls` itself, in offset order.
    pub fn class_copy_ivar_list(&self, cls: Class) -> Vec<Ivar> {
        self.class_data(cls)
            .map(|data| data.layout.read().ivars.clone())
            .unwrap_or_default()
    }

    /// Search `cls` and its superclasses for an ivar named `name`.
    pub fn class_get_instance_variable(&self, cls: Class, name: &str) -> Option<Ivar> {
        self.ancestors(cls).find_map(|data| {
            data.layout
                .read()
                .ivars
                .iter()
                .find(|ivar| &*ivar.name == name)
                .cloned()
        })
    }

    /// Ivar lookup on the class's metaclass.
    pub fn class_get_class_variable(&self, cls: Class, name: &str) -> Option<Ivar> {
        let data = self.class_data(cls)?;
        let meta = if data.is_meta() { cls } else { data.isa };
        self.class_get_instance_variable(meta, name)
    }

    // ── Protocols ──────────────────────────────────────────────────

    pub fn class_add_protocol(&self, cls: Class, protocol: Protocol) -> Result<(), RuntimeError> {
        let data = self.live_class(cls)?;
        let proto_name = self
            .protocol_get_name(protocol)
            .ok_or(RuntimeError::UnknownProtocol)?;

        let mut protocols = data.protocols.write();
        if protocols.contains(&protocol) {
            return Err(RuntimeError::AlreadyConforms {
                protocol: proto_name.to_string(),
            });
        }
        protocols.push(protocol);
        log::debug!("{} adopts {proto_name}", data.name);
        Ok(())
    }

    /// Whether `cls` itself adopts `protocol`, directly or through a
    /// protocol it adopts. Superclasses are not consulted.
    pub fn class_conforms_to_protocol(&self, cls: Class, protocol: Protocol) -> bool {
        let Some(data) = self.class_data(cls) else {
            return false;
        };
        let adopted = data.protocols.read().clone();
        adopted
            .into_iter()
            .any(|p| self.protocol_conforms_to_protocol(p, protocol))
    }

    pub fn class_copy_protocol_list(&self, cls: Class) -> Vec<Protocol> {
        self.class_data(cls)
            .map(|data| data.protocols.read().clone())
            .unwrap_or_default()
    }

    // ── Properties ─────────────────────────────────────────────────

    /// Fails if `cls` or a superclass already declares `name`.
    pub fn class_add_property(
        &self,
        cls: Class,
        name: &str,
        attributes: &[PropertyAttribute],
    ) -> Result<(), RuntimeError> {
        let data = self.live_class(cls)?;
        if self.class_get_property(cls, name).is_some() {
            return Err(RuntimeError::DuplicateProperty {
                name: name.to_owned(),
            });
        }

        let mut properties = data.properties.write();
        if properties.iter().any(|p| p.name() == name) {
            return Err(RuntimeError::DuplicateProperty {
                name: name.to_owned(),
            });
        }
        properties.push(Property::new(name, attributes));
        Ok(())
    }

    /// Replace the attributes of `cls`'s own property `name`, adding it
    /// if `cls` does not declare it.
    pub fn class_replace_property(
        &self,
        cls: Class,
        name: &str,
        attributes: &[PropertyAttribute],
    ) -> Result<(), RuntimeError> {
        let data = self.live_class(cls)?;
        let mut properties = data.properties.write();
        match properties.iter_mut().find(|p| p.name() == name) {
            Some(existing) => existing.set_attributes(attributes),
            None => properties.push(Property::new(name, attributes)),
        }
        Ok(())
    }

    /// Search `cls` and its superclasses for property `name`.
    pub fn class_get_property(&self, cls: Class, name: &str) -> Option<Property> {
        self.ancestors(cls).find_map(|data| {
            data.properties
                .read()
                .iter()
                .find(|p| p.name() == name)
                .cloned()
        })
    }

    pub fn class_copy_property_list(&self, cls: Class) -> Vec<Property> {
        self.class_data(cls)
            .map(|data| data.properties.read().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imp(addr: usize) -> Imp {
        Imp::from_addr(addr).expect("non-null")
    }

    fn root(rt: &Runtime, name: &str) -> Class {
        rt.allocate_class_pair(None, name, 0).expect("allocate")
    }

    // ── Layout ─────────────────────────────────────────────────────

    #[test]
    fn ivar_offsets_are_aligned_and_increasing() {
        let rt = Runtime::default();
        let cls = root(&rt, "Layout");
        rt.class_add_ivar(cls, "flag", 1, 0, "c").expect("flag");
        rt.class_add_ivar(cls, "count", 4, 2, "i").expect("count");
        rt.class_add_ivar(cls, "ratio", 8, 3, "d").expect("ratio");
        rt.class_add_ivar(cls, "tail", 2, 1, "s").expect("tail");
        rt.register_class_pair(cls).expect("register");

        let ivars = rt.class_copy_ivar_list(cls);
        let offsets: Vec<_> = ivars.iter().map(Ivar::offset).collect();
        assert_eq!(offsets, vec![HEADER_SIZE, HEADER_SIZE + 4, HEADER_SIZE + 8, HEADER_SIZE + 16]);

        for pair in ivars.windows(2) {
            assert!(pair[0].offset() + pair[0].size() <= pair[1].offset());
        }
        for ivar in &ivars {
            assert_eq!(ivar.offset() % ivar.alignment(), 0);
        }

        let size = rt.class_get_instance_size(cls).expect("size");
        let sum: usize = ivars.iter().map(Ivar::size).sum();
        assert!(size >= HEADER_SIZE + sum);
        assert_eq!(size, HEADER_SIZE + 24);
    }

    #[test]
    fn subclass_ivars_start_after_superclass() {
        let rt = Runtime::default();
        let base = root(&rt, "Base");
        rt.class_add_ivar(base, "a", 4, 2, "i").expect("a");
        rt.register_class_pair(base).expect("register");

        let sub = rt.allocate_class_pair(Some(base), "Sub", 0).expect("sub");
        rt.class_add_ivar(sub, "b", 8, 3, "q").expect("b");
        rt.register_class_pair(sub).expect("register");

        let b = rt.class_get_instance_variable(sub, "b").expect("b");
        assert_eq!(b.offset(), HEADER_SIZE + 8);
        let inherited = rt.class_get_instance_variable(sub, "a").expect("a");
        assert_eq!(inherited.offset(), HEADER_SIZE);
        assert!(rt.class_copy_ivar_list(sub).iter().all(|iv| iv.name() != "a"));
        assert!(rt.class_get_class_variable(sub, "a").is_none());
    }

    #[test]
    fn ivar_misuse_is_rejected() {
        let rt = Runtime::default();
        let cls = root(&rt, "Frozen");
        rt.class_add_ivar(cls, "x", 4, 2, "i").expect("x");
        assert_eq!(
            rt.class_add_ivar(cls, "x", 4, 2, "i"),
            Err(RuntimeError::DuplicateIvar { name: "x".into() })
        );
        assert_eq!(
            rt.class_add_ivar(cls, "y", 4, 40, "i"),
            Err(RuntimeError::InvalidAlignment { log2: 40 })
        );
        let meta = rt.class_get_meta_class(cls).expect("meta");
        assert_eq!(
            rt.class_add_ivar(meta, "z", 4, 2, "i"),
            Err(RuntimeError::MetaclassIvar)
        );

        rt.register_class_pair(cls).expect("register");
        assert_eq!(
            rt.class_add_ivar(cls, "late", 4, 2, "i"),
            Err(RuntimeError::NotMutable { class: "Frozen".into() })
        );
    }

    #[test]
    fn oversized_ivars_are_rejected() {
        let rt = Runtime::default();
        let cls = root(&rt, "Huge");
        rt.class_add_ivar(cls, "x", 4, 2, "i").expect("x");
        assert_eq!(
            rt.class_add_ivar(cls, "wrap", usize::MAX, 0, "c"),
            Err(RuntimeError::OutOfMemory { size: usize::MAX })
        );
        assert_eq!(
            rt.class_add_ivar(cls, "big", isize::MAX as usize, 3, "c"),
            Err(RuntimeError::OutOfMemory { size: usize::MAX })
        );
        assert!(rt.class_get_instance_variable(cls, "wrap").is_none());

        rt.class_add_ivar(cls, "y", 8, 3, "q").expect("layout untouched");
        rt.register_class_pair(cls).expect("register");
        assert_eq!(rt.class_get_instance_size(cls), Some(HEADER_SIZE + 16));
    }

    // ── Methods ────────────────────────────────────────────────────

    #[test]
    fn add_method_rejects_duplicates_but_allows_overrides() {
        let rt = Runtime::default();
        let base = root(&rt, "Shape");
        rt.register_class_pair(base).expect("register");
        let sub = rt.allocate_class_pair(Some(base), "Circle", 0).expect("sub");
        rt.register_class_pair(sub).expect("register");

        let area = rt.sel_register_name("area");
        rt.class_add_method(base, area, imp(0x100), "d@:").expect("base");
        assert_eq!(
            rt.class_add_method(base, area, imp(0x200), "d@:"),
            Err(RuntimeError::DuplicateMethod { selector: "area".into() })
        );
        rt.class_add_method(sub, area, imp(0x300), "d@:").expect("override");

        assert_eq!(rt.class_copy_method_list(base).len(), 1);
        assert_eq!(rt.class_copy_method_list(sub).len(), 1);
    }

    #[test]
    fn foreign_selectors_are_rejected() {
        let rt = Runtime::default();
        let other = Runtime::default();
        let cls = root(&rt, "Local");
        let foreign = other.sel_register_name("area");
        assert_eq!(
            rt.class_add_method(cls, foreign, imp(1), "v@:"),
            Err(RuntimeError::ForeignSelector)
        );
    }

    #[test]
    fn replace_method_adds_then_swaps() {
        let rt = Runtime::default();
        let cls = root(&rt, "Counter");
        let inc = rt.sel_register_name("increment");
        assert_eq!(rt.class_replace_method(cls, inc, imp(0x10), "v@:"), Ok(None));
        assert_eq!(
            rt.class_replace_method(cls, inc, imp(0x20), "ignored"),
            Ok(Some(imp(0x10)))
        );
        let methods = rt.class_copy_method_list(cls);
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].implementation(), imp(0x20));
        assert_eq!(methods[0].type_encoding(), "v@:");
    }

    #[test]
    fn exchange_swaps_across_classes() {
        let rt = Runtime::default();
        let a = root(&rt, "A");
        let b = root(&rt, "B");
        let foo = rt.sel_register_name("foo");
        let bar = rt.sel_register_name("bar");
        rt.class_add_method(a, foo, imp(0xA), "v@:").expect("a");
        rt.class_add_method(b, bar, imp(0xB), "v@:").expect("b");

        let ma = rt.class_get_instance_method(a, foo).expect("ma");
        let mb = rt.class_get_instance_method(b, bar).expect("mb");
        rt.method_exchange_implementations(&ma, &mb);
        assert_eq!(ma.implementation(), imp(0xB));
        assert_eq!(mb.implementation(), imp(0xA));

        assert_eq!(rt.method_set_implementation(&ma, imp(0xC)), imp(0xB));
        assert_eq!(rt.lookup_imp(a, foo), Some(imp(0xC)));
    }

    // ── Protocols and properties ───────────────────────────────────

    #[test]
    fn protocol_adoption() {
        let rt = Runtime::default();
        let copying = rt.allocate_protocol("Copying").expect("proto");
        rt.register_protocol(copying).expect("register");
        let cls = root(&rt, "Doc");

        assert!(!rt.class_conforms_to_protocol(cls, copying));
        rt.class_add_protocol(cls, copying).expect("adopt");
        assert!(rt.class_conforms_to_protocol(cls, copying));
        assert_eq!(
            rt.class_add_protocol(cls, copying),
            Err(RuntimeError::AlreadyConforms { protocol: "Copying".into() })
        );
        assert_eq!(rt.class_copy_protocol_list(cls), vec![copying]);
    }

    #[test]
    fn properties_are_inherited_and_replaceable() {
        let rt = Runtime::default();
        let base = root(&rt, "Person");
        rt.register_class_pair(base).expect("register");
        let sub = rt.allocate_class_pair(Some(base), "Employee", 0).expect("sub");

        let attrs = [
            PropertyAttribute::new("T", "@\"NSString\""),
            PropertyAttribute::flag("C"),
        ];
        rt.class_add_property(base, "name", &attrs).expect("add");
        assert_eq!(
            rt.class_add_property(sub, "name", &attrs),
            Err(RuntimeError::DuplicateProperty { name: "name".into() })
        );
        assert_eq!(
            rt.class_get_property(sub, "name").map(|p| p.attributes()),
            Some("T@\"NSString\",C".to_owned())
        );

        rt.class_replace_property(sub, "name", &[PropertyAttribute::flag("R")])
            .expect("replace");
        assert_eq!(rt.class_copy_property_list(sub).len(), 1);
        assert_eq!(
            rt.class_get_property(sub, "name").map(|p| p.attributes()),
            Some("R".to_owned())
        );
        assert_eq!(
            rt.class_get_property(base, "name").map(|p| p.attributes()),
            Some("T@\"NSString\",C".to_owned())
        );
    }

    // ── Misc ───────────────────────────────────────────────────────

    #[test]
    fn version_and_indexed_ivars() {
        let rt = Runtime::default();
        let cls = rt.allocate_class_pair(None, "Versioned", 16).expect("alloc");
        assert_eq!(rt.class_get_version(cls), 0);
        rt.class_set_version(cls, 7);
        assert_eq!(rt.class_get_version(cls), 7);

        let extra = rt.class_get_indexed_ivars(cls).expect("extra bytes");
        // SAFETY: the class owns 16 zeroed bytes
        let bytes = unsafe { std::slice::from_raw_parts(extra.as_ptr(), 16) };
        assert!(bytes.iter().all(|&b| b == 0));

        let plain = root(&rt, "Plain");
        assert!(rt.class_get_indexed_ivars(plain).is_none());
    }
}
