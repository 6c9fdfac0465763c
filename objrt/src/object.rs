use std::{
    fmt,
    mem,
    ptr::{self, NonNull},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{Class, ClassState, HEADER_SIZE, Ivar, Runtime, RuntimeError};

/// Identity of an instance: the address of its block. The first word of
/// the block holds the index of the instance's class.
///
/// A handle stays valid until the instance is disposed; using any copy of
/// it afterwards is undefined behaviour.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Object(NonNull<u8>);

// SAFETY: an `Object` is an address; the header word is atomic and ivar
// access goes through the runtime's raw accessors
unsafe impl Send for Object {}
// SAFETY: see above
unsafe impl Sync for Object {}

impl Object {
    /// # Safety
    ///
    /// `ptr` must point to a block initialized by
    /// [`Runtime::construct_instance`] that is still alive.
    pub unsafe fn from_ptr(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> NonNull<u8> {
        self.0
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    fn header(&self) -> &AtomicUsize {
        // SAFETY: every live instance starts with a word-aligned header
        unsafe { &*self.0.as_ptr().cast::<AtomicUsize>() }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:p})", self.0)
    }
}

impl Runtime {
    fn adjust_live_instances(&self, cls: Class, delta: isize) {
        let Some(data) = self.class_data(cls) else {
            return;
        };
        if delta > 0 {
            data.live_instances.fetch_add(delta.unsigned_abs(), Ordering::AcqRel);
        } else {
            let _ = data
                .live_instances
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    n.checked_sub(delta.unsigned_abs())
                });
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Allocate a zeroed instance of `cls` with `extra_bytes` trailing
    /// bytes. `cls` must be registered.
    pub fn create_instance(&self, cls: Class, extra_bytes: usize) -> Result<Object, RuntimeError> {
        let data = self.live_class(cls)?;
        if data.is_meta() {
            return Err(RuntimeError::NotAClass);
        }
        if data.state() != ClassState::Registered {
            return Err(RuntimeError::NotRegistered {
                class: data.name.to_string(),
            });
        }
        let size = data
            .instance_size()
            .checked_add(extra_bytes)
            .ok_or(RuntimeError::OutOfMemory { size: usize::MAX })?;
        let block = self
            .allocator
            .allocate(size)
            .ok_or(RuntimeError::OutOfMemory { size })?;

        // SAFETY: the block is freshly allocated, zeroed and large enough
        match unsafe { self.construct_instance(cls, block) } {
            Some(obj) => Ok(obj),
            None => {
                self.allocator.release(block);
                Err(RuntimeError::NotAClass)
            }
        }
    }

    /// Turn caller-provided storage into an instance of `cls`. Returns
    /// `None` if `cls` is not a live, registered class.
    ///
    /// # Safety
    ///
    /// `block` must be zero-filled, word-aligned and at least
    /// `class_get_instance_size(cls)` bytes, and must outlive the instance.
    pub unsafe fn construct_instance(&self, cls: Class, block: NonNull<u8>) -> Option<Object> {
        let data = self.class_data(cls)?;
        if data.is_meta() || data.state() != ClassState::Registered {
            return None;
        }
        let obj = Object(block);
        obj.header().store(cls.index() as usize, Ordering::Release);
        data.live_instances.fetch_add(1, Ordering::AcqRel);
        Some(obj)
    }

    /// Run the teardown of every class in the chain, most derived first,
    /// then drop the object's associations. The storage is left alone.
    ///
    /// # Safety
    ///
    /// `obj` must be a live instance that is destructed at most once.
    pub unsafe fn destruct_instance(&self, obj: Object) {
        let Some(cls) = self.object_get_class(obj) else {
            self.remove_associated_objects(obj);
            return;
        };

        let teardowns: Vec<_> = self
            .ancestors(cls)
            .filter_map(|data| data.teardown.read().clone())
            .collect();
        for teardown in teardowns {
            teardown(obj);
        }

        self.remove_associated_objects(obj);
        self.adjust_live_instances(cls, -1);
    }

    /// Destruct `obj` and free its storage if this runtime allocated it.
    ///
    /// # Safety
    ///
    /// Same as [`Runtime::destruct_instance`]; no copy of `obj` may be
    /// used afterwards.
    pub unsafe fn dispose_instance(&self, obj: Object) {
        // SAFETY: forwarded caller contract
        unsafe { self.destruct_instance(obj) };
        if !self.allocator.release(obj.as_ptr()) {
            log::debug!("{obj:?} uses caller storage; not freed");
        }
    }

    /// Bitwise copy of `obj` into a new instance with `extra_bytes`
    /// trailing bytes. Associations are not copied.
    pub fn object_copy(&self, obj: Object, extra_bytes: usize) -> Result<Object, RuntimeError> {
        let cls = self.object_get_class(obj).ok_or(RuntimeError::NotAClass)?;
        let copy = self.create_instance(cls, extra_bytes)?;

        let source_size = self
            .allocator
            .block_size(obj.as_ptr())
            .or_else(|| self.class_get_instance_size(cls))
            .unwrap_or(HEADER_SIZE);
        let target_size = self.allocator.block_size(copy.as_ptr()).unwrap_or(HEADER_SIZE);
        let len = source_size.min(target_size) - HEADER_SIZE;
        // SAFETY: both blocks hold at least `HEADER_SIZE + len` bytes and
        // are distinct allocations
        unsafe {
            ptr::copy_nonoverlapping(
                obj.as_ptr().as_ptr().add(HEADER_SIZE),
                copy.as_ptr().as_ptr().add(HEADER_SIZE),
                len,
            );
        }
        Ok(copy)
    }

    // ── Class ──────────────────────────────────────────────────────

    pub fn object_get_class(&self, obj: Object) -> Option<Class> {
        let index = u32::try_from(obj.header().load(Ordering::Acquire)).ok()?;
        let cls = Class::from_index(index);
        self.class_data(cls).map(|_| cls)
    }

    /// Point `obj` at a new class, returning the previous one.
    ///
    /// Refused when `cls` is not registered or its instances need more
    /// bytes than `obj`'s storage holds.
    pub fn object_set_class(&self, obj: Object, cls: Class) -> Option<Class> {
        let data = self.class_data(cls)?;
        if data.is_meta() || data.state() != ClassState::Registered {
            return None;
        }
        let needed = data.instance_size();

        let mut current = obj.header().load(Ordering::Acquire);
        loop {
            let previous = Class::from_index(u32::try_from(current).ok()?);
            let capacity = self
                .allocator
                .block_size(obj.as_ptr())
                .or_else(|| self.class_get_instance_size(previous))?;
            if needed > capacity {
                log::debug!(
                    "{obj:?}: {} needs {needed} bytes, storage holds {capacity}",
                    data.name
                );
                return None;
            }
            match obj.header().compare_exchange_weak(
                current,
                cls.index() as usize,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if previous != cls {
                        self.adjust_live_instances(previous, -1);
                        self.adjust_live_instances(cls, 1);
                    }
                    return Some(previous);
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn object_get_class_name(&self, obj: Object) -> Option<Arc<str>> {
        self.class_get_name(self.object_get_class(obj)?)
    }

    /// Whether `obj`'s class is a metaclass.
    pub fn object_is_class(&self, obj: Object) -> bool {
        self.object_get_class(obj)
            .is_some_and(|cls| self.class_is_meta_class(cls))
    }

    // ── Storage ────────────────────────────────────────────────────

    /// Bytes of `obj` that ivar access may touch: the class layout,
    /// clipped to the block when this runtime allocated it.
    fn storage_limit(&self, obj: Object) -> Option<usize> {
        let size = self.class_get_instance_size(self.object_get_class(obj)?)?;
        Some(
            self.allocator
                .block_size(obj.as_ptr())
                .map_or(size, |block| block.min(size)),
        )
    }

    /// Start of the trailing bytes requested at creation; word aligned.
    /// Only meaningful when the instance was created with extra bytes.
    pub fn indexed_ivars(&self, obj: Object) -> Option<NonNull<u8>> {
        let size = self.class_get_instance_size(self.object_get_class(obj)?)?;
        if self
            .allocator
            .block_size(obj.as_ptr())
            .is_some_and(|block| size > block)
        {
            return None;
        }
        // SAFETY: one past the fixed layout, at most one past the block
        Some(unsafe { obj.as_ptr().add(size) })
    }

    /// Raw address of `ivar` inside `obj`, if it lies within both the
    /// layout of `obj`'s class and its storage.
    pub fn ivar_pointer(&self, obj: Object, ivar: &Ivar) -> Option<NonNull<u8>> {
        let limit = self.storage_limit(obj)?;
        let end = ivar.offset().checked_add(ivar.size())?;
        if ivar.offset() < HEADER_SIZE || end > limit {
            return None;
        }
        // SAFETY: in bounds of the instance block
        Some(unsafe { obj.as_ptr().add(ivar.offset()) })
    }

    /// Read a word-sized ivar.
    pub fn object_get_ivar(&self, obj: Object, ivar: &Ivar) -> Option<usize> {
        let ptr = self.word_ivar(obj, ivar)?;
        // SAFETY: in bounds and word aligned
        Some(unsafe { ptr::read(ptr.as_ptr()) })
    }

    /// Write a word-sized ivar. Returns `false` if `ivar` is not a word
    /// inside `obj`'s layout.
    pub fn object_set_ivar(&self, obj: Object, ivar: &Ivar, value: usize) -> bool {
        let Some(ptr) = self.word_ivar(obj, ivar) else {
            return false;
        };
        // SAFETY: in bounds and word aligned
        unsafe { ptr::write(ptr.as_ptr(), value) };
        true
    }

    /// Read the word-sized ivar `name` from `obj`'s class chain.
    pub fn object_get_instance_variable(&self, obj: Object, name: &str) -> Option<(Ivar, usize)> {
        let ivar = self.class_get_instance_variable(self.object_get_class(obj)?, name)?;
        let value = self.object_get_ivar(obj, &ivar)?;
        Some((ivar, value))
    }

    /// Write the word-sized ivar `name`, returning it on success.
    pub fn object_set_instance_variable(&self, obj: Object, name: &str, value: usize) -> Option<Ivar> {
        let ivar = self.class_get_instance_variable(self.object_get_class(obj)?, name)?;
        self.object_set_ivar(obj, &ivar, value).then_some(ivar)
    }

    fn word_ivar(&self, obj: Object, ivar: &Ivar) -> Option<NonNull<usize>> {
        if ivar.size() != mem::size_of::<usize>() || ivar.offset() % mem::align_of::<usize>() != 0 {
            return None;
        }
        Some(self.ivar_pointer(obj, ivar)?.cast::<usize>())
    }
}
