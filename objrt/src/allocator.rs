use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::HEADER_SIZE;

/// An owned, zero-initialized heap block.
pub struct Storage {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: `Storage` uniquely owns its block; access to the bytes is
// synchronized by whoever hands out the pointer
unsafe impl Send for Storage {}
// SAFETY: see above
unsafe impl Sync for Storage {}

impl Storage {
    /// `None` if the layout is invalid or the allocator fails.
    pub fn zeroed(size: usize, align: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size.max(1), align).ok()?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).map(|ptr| Self { ptr, layout })
    }

    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Owner of the instance blocks handed out by `create_instance`, keyed
/// by address. Blocks supplied by callers to `construct_instance` are
/// never tracked here.
#[derive(Default)]
pub(crate) struct InstanceAllocator {
    blocks: Mutex<FxHashMap<usize, Storage>>,
}

impl InstanceAllocator {
    /// A zeroed, word-aligned block of `size` bytes.
    pub(crate) fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let storage = Storage::zeroed(size, HEADER_SIZE)?;
        let ptr = storage.ptr();
        self.blocks.lock().insert(ptr.as_ptr() as usize, storage);
        log::trace!("allocated {size} byte instance at {ptr:p}");
        Some(ptr)
    }

    /// Free a block produced by [`InstanceAllocator::allocate`]. Returns
    /// `false` for foreign blocks.
    pub(crate) fn release(&self, ptr: NonNull<u8>) -> bool {
        let storage = self.blocks.lock().remove(&(ptr.as_ptr() as usize));
        storage.is_some()
    }

    /// Size of an owned block.
    pub(crate) fn block_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.blocks
            .lock()
            .get(&(ptr.as_ptr() as usize))
            .map(Storage::size)
    }

    #[cfg(test)]
    pub(crate) fn live_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}
