use std::sync::{Arc, atomic::Ordering};

use rustc_hash::FxHashMap;

use crate::{
    Class, ClassData, ClassFlags, ClassInit, ClassState, HEADER_SIZE, Method,
    Runtime, RuntimeError, Storage,
};

/// Lazy class-resolution callback consulted by [`Runtime::get_class`] on
/// a miss. Returns whether it may have materialized the class.
pub type ClassHandler = Arc<dyn Fn(&Runtime, &str) -> bool + Send + Sync>;

/// Arena of class descriptors. Slots are never reused: disposing a class
/// empties its slot so stale handles resolve to nothing.
///
/// `names` holds classes under construction as well as registered ones,
/// so a pending name cannot be allocated twice.
pub(crate) struct ClassTable {
    slots: Vec<Option<Arc<ClassData>>>,
    names: FxHashMap<Arc<str>, Class>,
}

impl ClassTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity * 2),
            names: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    fn get(&self, cls: Class) -> Option<&Arc<ClassData>> {
        self.slots.get(cls.index() as usize)?.as_ref()
    }

    fn next_class(&self) -> Class {
        let index = u32::try_from(self.slots.len())
            .expect("class table exhausted the u32 index space");
        Class::from_index(index)
    }

    fn registered(&self, name: &str) -> Option<Class> {
        let cls = *self.names.get(name)?;
        let data = self.get(cls)?;
        (data.state() == ClassState::Registered).then_some(cls)
    }
}

struct PairShape {
    flags: ClassFlags,
    meta_flags: ClassFlags,
    instance_start: usize,
    meta_superclass: Option<Class>,
    /// `None` for a new root: its metaclass is its own class.
    root_meta: Option<Class>,
}

impl Runtime {
    pub(crate) fn class_data(&self, cls: Class) -> Option<Arc<ClassData>> {
        self.classes.read().get(cls).cloned()
    }

    // ── Lookup ─────────────────────────────────────────────────────

    /// Registered class named `name`, without side effects.
    pub fn lookup_class(&self, name: &str) -> Option<Class> {
        self.classes.read().registered(name)
    }

    /// Like [`Runtime::lookup_class`], but on a miss gives the class
    /// handler one chance to materialize the class.
    pub fn get_class(&self, name: &str) -> Option<Class> {
        if let Some(cls) = self.lookup_class(name) {
            return Some(cls);
        }
        let handler = self.class_handler.read().clone()?;
        log::trace!("class {name} missing, consulting class handler");
        if handler(self, name) {
            return self.lookup_class(name);
        }
        None
    }

    /// Aborts the process when `name` cannot be resolved.
    pub fn get_required_class(&self, name: &str) -> Class {
        match self.get_class(name) {
            Some(cls) => cls,
            None => {
                log::error!("required class {name} is not registered");
                std::process::abort();
            }
        }
    }

    pub fn get_meta_class(&self, name: &str) -> Option<Class> {
        let cls = self.get_class(name)?;
        self.class_get_meta_class(cls)
    }

    /// Install the class handler, returning the previous one.
    pub fn set_class_handler(&self, handler: Option<ClassHandler>) -> Option<ClassHandler> {
        std::mem::replace(&mut *self.class_handler.write(), handler)
    }

    /// Snapshot of every registered class, metaclasses excluded.
    pub fn copy_class_list(&self) -> Vec<Class> {
        let table = self.classes.read();
        table
            .slots
            .iter()
            .flatten()
            .filter(|data| !data.is_meta() && data.state() == ClassState::Registered)
            .map(|data| data.id)
            .collect()
    }

    pub fn class_count(&self) -> usize {
        self.copy_class_list().len()
    }

    // ── Construction ───────────────────────────────────────────────

    /// Create an unregistered class and its metaclass. `extra_bytes` of
    /// zeroed storage are attached to the class itself.
    pub fn allocate_class_pair(
        &self,
        superclass: Option<Class>,
        name: &str,
        extra_bytes: usize,
    ) -> Result<Class, RuntimeError> {
        let indexed = match extra_bytes {
            0 => None,
            size => Some(
                Storage::zeroed(size, HEADER_SIZE)
                    .ok_or(RuntimeError::OutOfMemory { size })?,
            ),
        };

        let mut table = self.classes.write();
        if table.names.contains_key(name) {
            return Err(RuntimeError::ClassExists {
                name: name.to_owned(),
            });
        }

        let shape = match superclass {
            None => PairShape {
                flags: ClassFlags::ROOT,
                meta_flags: ClassFlags::META | ClassFlags::ROOT,
                instance_start: HEADER_SIZE,
                meta_superclass: None,
                root_meta: None,
            },
            Some(sup) => {
                let sup_data = table
                    .get(sup)
                    .filter(|d| !d.is_meta() && d.state() == ClassState::Registered)
                    .ok_or(RuntimeError::SuperclassNotRegistered)?;
                let sup_meta = table
                    .get(sup_data.isa)
                    .ok_or(RuntimeError::SuperclassNotRegistered)?;
                PairShape {
                    flags: ClassFlags::empty(),
                    meta_flags: ClassFlags::META,
                    instance_start: sup_data.layout.read().size,
                    meta_superclass: Some(sup_meta.id),
                    root_meta: Some(sup_meta.isa),
                }
            }
        };

        let cls = table.next_class();
        let meta = Class::from_index(cls.index() + 1);
        let name: Arc<str> = Arc::from(name);
        let cache_capacity = self.settings.cache_capacity;

        let class_data = Arc::new(ClassData::new(ClassInit {
            id: cls,
            name: name.clone(),
            flags: shape.flags,
            superclass,
            isa: meta,
            instance_start: shape.instance_start,
            cache_capacity,
            indexed,
        }));
        let meta_data = Arc::new(ClassData::new(ClassInit {
            id: meta,
            name: name.clone(),
            flags: shape.meta_flags,
            // a root metaclass inherits from its root class
            superclass: shape.meta_superclass.or(Some(cls)),
            isa: shape.root_meta.unwrap_or(meta),
            instance_start: HEADER_SIZE,
            cache_capacity,
            indexed: None,
        }));

        match superclass {
            Some(sup) => {
                if let Some(sup_data) = table.get(sup) {
                    sup_data.subclasses.write().push(cls);
                }
                if let Some(sup_meta) = shape.meta_superclass.and_then(|m| table.get(m)) {
                    sup_meta.subclasses.write().push(meta);
                }
            }
            None => class_data.subclasses.write().push(meta),
        }

        table.slots.push(Some(class_data));
        table.slots.push(Some(meta_data));
        table.names.insert(name.clone(), cls);
        log::debug!("allocated class pair {name} as {cls:?}/{meta:?}");
        Ok(cls)
    }

    /// Publish a class allocated by [`Runtime::allocate_class_pair`].
    /// Its ivar layout is frozen from here on.
    pub fn register_class_pair(&self, cls: Class) -> Result<(), RuntimeError> {
        let data = self.live_class(cls)?;
        if data.is_meta() {
            return Err(RuntimeError::NotAClass);
        }
        let meta = self.live_class(data.isa)?;

        let _table = self.classes.write();
        {
            // excludes concurrent `class_add_ivar`
            let _layout = data.layout.write();
            if data.state() != ClassState::Constructing {
                return Err(RuntimeError::AlreadyRegistered {
                    name: data.name.to_string(),
                });
            }
            data.set_state(ClassState::Registered);
        }
        meta.set_state(ClassState::Registered);
        log::debug!(
            "registered class {} ({} bytes)",
            data.name,
            data.instance_size()
        );
        Ok(())
    }

    /// Remove a class and its metaclass. Refused while the class has
    /// subclasses or live instances.
    pub fn dispose_class_pair(&self, cls: Class) -> Result<(), RuntimeError> {
        let data = self.live_class(cls)?;
        if data.is_meta() {
            return Err(RuntimeError::NotAClass);
        }

        let mut table = self.classes.write();
        let has_subclasses = data
            .subclasses
            .read()
            .iter()
            .any(|&sub| table.get(sub).is_some_and(|d| !d.is_meta()));
        if has_subclasses {
            return Err(RuntimeError::HasSubclasses {
                class: data.name.to_string(),
            });
        }
        let count = data.live_instances.load(Ordering::Acquire);
        if count > 0 {
            log::warn!("refusing to dispose {}: {count} live instance(s)", data.name);
            return Err(RuntimeError::LiveInstances {
                class: data.name.to_string(),
                count,
            });
        }

        let meta = data.isa;
        if let Some(sup) = data.superclass.and_then(|s| table.get(s)) {
            sup.subclasses.write().retain(|&c| c != cls);
        }
        let meta_superclass = table.get(meta).and_then(|m| m.superclass);
        if let Some(sup_meta) = meta_superclass.and_then(|m| table.get(m)) {
            sup_meta.subclasses.write().retain(|&c| c != meta);
        }

        if table.names.get(&*data.name) == Some(&cls) {
            table.names.remove(&*data.name);
        }
        for slot in [cls, meta] {
            if let Some(entry) = table.slots.get_mut(slot.index() as usize).and_then(Option::take) {
                entry.set_state(ClassState::Disposed);
            }
        }
        log::debug!("disposed class pair {}", data.name);
        Ok(())
    }

    /// Registered copy of `original` under `name`: same superclass, ivar
    /// layout, methods (both sides), protocols, properties and version.
    pub fn duplicate_class(
        &self,
        original: Class,
        name: &str,
        extra_bytes: usize,
    ) -> Result<Class, RuntimeError> {
        let source = self.live_class(original)?;
        if source.is_meta() {
            return Err(RuntimeError::NotAClass);
        }
        let source_meta = self.live_class(source.isa)?;

        let copy = self.allocate_class_pair(source.superclass, name, extra_bytes)?;
        let data = self.live_class(copy)?;
        let meta = self.live_class(data.isa)?;

        {
            let from = source.layout.read();
            let mut to = data.layout.write();
            to.size = from.size;
            to.ivars = from.ivars.clone();
        }
        copy_methods(&source, &data);
        copy_methods(&source_meta, &meta);
        *data.protocols.write() = source.protocols.read().clone();
        *data.properties.write() = source.properties.read().clone();
        data.version
            .store(source.version.load(Ordering::Relaxed), Ordering::Relaxed);
        *data.teardown.write() = source.teardown.read().clone();

        self.register_class_pair(copy)?;
        log::debug!("duplicated {} as {name}", source.name);
        Ok(copy)
    }
}

fn copy_methods(from: &ClassData, to: &ClassData) {
    let methods: Vec<Method> = from.methods.read().methods().to_vec();
    let mut table = to.methods.write();
    for method in methods {
        table.insert(Method::new(
            method.name(),
            method.implementation(),
            Arc::from(method.type_encoding()),
            to.id,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::Imp;

    fn imp(addr: usize) -> Imp {
        Imp::from_addr(addr).expect("non-null")
    }

    // ── Allocation and registration ────────────────────────────────

    #[test]
    fn unregistered_classes_are_invisible() {
        let rt = Runtime::default();
        let cls = rt.allocate_class_pair(None, "Pending", 0).expect("alloc");
        assert!(rt.lookup_class("Pending").is_none());
        assert!(rt.copy_class_list().is_empty());

        rt.register_class_pair(cls).expect("register");
        assert_eq!(rt.lookup_class("Pending"), Some(cls));
        assert_eq!(rt.copy_class_list(), vec![cls]);
        assert_eq!(rt.class_count(), 1);
    }

    #[test]
    fn duplicate_allocation_fails_until_disposed() {
        let rt = Runtime::default();
        let first = rt.allocate_class_pair(None, "Widget", 0).expect("first");
        assert_eq!(
            rt.allocate_class_pair(None, "Widget", 0),
            Err(RuntimeError::ClassExists { name: "Widget".into() })
        );

        rt.register_class_pair(first).expect("register");
        assert!(rt.allocate_class_pair(None, "Widget", 0).is_err());

        rt.dispose_class_pair(first).expect("dispose");
        assert!(rt.lookup_class("Widget").is_none());
        assert!(rt.class_get_name(first).is_none());
        let second = rt.allocate_class_pair(None, "Widget", 0).expect("second");
        assert_ne!(first, second);
    }

    #[test]
    fn double_registration_is_rejected() {
        let rt = Runtime::default();
        let cls = rt.allocate_class_pair(None, "Once", 0).expect("alloc");
        rt.register_class_pair(cls).expect("register");
        assert_eq!(
            rt.register_class_pair(cls),
            Err(RuntimeError::AlreadyRegistered { name: "Once".into() })
        );
    }

    #[test]
    fn superclass_must_be_registered() {
        let rt = Runtime::default();
        let base = rt.allocate_class_pair(None, "Base", 0).expect("base");
        assert_eq!(
            rt.allocate_class_pair(Some(base), "Sub", 0),
            Err(RuntimeError::SuperclassNotRegistered)
        );
    }

    #[test]
    fn metaclass_shape() {
        let rt = Runtime::default();
        let root = rt.allocate_class_pair(None, "Root", 0).expect("root");
        rt.register_class_pair(root).expect("register");
        let sub = rt.allocate_class_pair(Some(root), "Leaf", 0).expect("leaf");
        rt.register_class_pair(sub).expect("register");

        let root_meta = rt.class_get_meta_class(root).expect("root meta");
        let sub_meta = rt.get_meta_class("Leaf").expect("leaf meta");
        assert!(rt.class_is_meta_class(root_meta));
        assert!(!rt.class_is_meta_class(root));

        assert_eq!(rt.class_get_superclass(root), None);
        assert_eq!(rt.class_get_superclass(root_meta), Some(root));
        assert_eq!(rt.class_get_superclass(sub_meta), Some(root_meta));
        assert_eq!(rt.class_get_meta_class(sub_meta), Some(root_meta));
        assert_eq!(rt.class_get_meta_class(root_meta), Some(root_meta));
        assert_eq!(rt.class_get_name(sub_meta).as_deref(), Some("Leaf"));
    }

    // ── Disposal ───────────────────────────────────────────────────

    #[test]
    fn dispose_refuses_parents_and_live_instances() {
        let rt = Runtime::default();
        let base = rt.allocate_class_pair(None, "Parent", 0).expect("base");
        rt.register_class_pair(base).expect("register");
        let child = rt.allocate_class_pair(Some(base), "Child", 0).expect("child");
        rt.register_class_pair(child).expect("register");

        assert_eq!(
            rt.dispose_class_pair(base),
            Err(RuntimeError::HasSubclasses { class: "Parent".into() })
        );

        let obj = rt.create_instance(child, 0).expect("instance");
        assert_eq!(
            rt.dispose_class_pair(child),
            Err(RuntimeError::LiveInstances { class: "Child".into(), count: 1 })
        );

        // SAFETY: `obj` came from `create_instance` and is not used again
        unsafe { rt.dispose_instance(obj) };
        rt.dispose_class_pair(child).expect("child");
        rt.dispose_class_pair(base).expect("base");
        assert_eq!(rt.class_count(), 0);
    }

    // ── Class handler ──────────────────────────────────────────────

    #[test]
    fn class_handler_materializes_on_demand() {
        let rt = Runtime::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        rt.set_class_handler(Some(Arc::new(move |rt: &Runtime, name: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            if name != "Lazy" {
                return false;
            }
            rt.allocate_class_pair(None, name, 0)
                .and_then(|cls| rt.register_class_pair(cls))
                .is_ok()
        })));

        assert!(rt.lookup_class("Lazy").is_none());
        let lazy = rt.get_class("Lazy").expect("materialized");
        assert_eq!(rt.get_required_class("Lazy"), lazy);
        assert!(rt.get_class("Missing").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(rt.set_class_handler(None).is_some());
        assert!(rt.get_class("Missing").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // ── Duplication ────────────────────────────────────────────────

    #[test]
    fn duplicate_copies_tables() {
        let rt = Runtime::default();
        let cls = rt.allocate_class_pair(None, "Original", 0).expect("alloc");
        rt.class_add_ivar(cls, "count", 4, 2, "i").expect("ivar");
        rt.register_class_pair(cls).expect("register");
        rt.class_set_version(cls, 3);

        let run = rt.sel_register_name("run");
        let make = rt.sel_register_name("make");
        rt.class_add_method(cls, run, imp(0x10), "v@:").expect("run");
        let meta = rt.class_get_meta_class(cls).expect("meta");
        rt.class_add_method(meta, make, imp(0x20), "@@:").expect("make");

        let copy = rt.duplicate_class(cls, "Copy", 0).expect("duplicate");
        assert_eq!(rt.lookup_class("Copy"), Some(copy));
        assert_eq!(rt.class_get_version(copy), 3);
        assert_eq!(rt.class_get_instance_size(copy), rt.class_get_instance_size(cls));
        assert_eq!(rt.class_copy_ivar_list(copy), rt.class_copy_ivar_list(cls));
        assert_eq!(rt.lookup_imp(copy, run), Some(imp(0x10)));
        assert_eq!(rt.class_get_class_method(copy, make).map(|m| m.implementation()), Some(imp(0x20)));

        // entries are independent
        rt.class_replace_method(copy, run, imp(0x30), "v@:").expect("replace");
        assert_eq!(rt.lookup_imp(cls, run), Some(imp(0x10)));
        let method = rt.class_get_instance_method(copy, run).expect("method");
        assert_eq!(method.owner(), copy);
    }
}
