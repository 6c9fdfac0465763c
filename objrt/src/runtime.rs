use std::sync::{
    Arc, OnceLock,
    atomic::AtomicU64,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    AssociationStore, ClassHandler, ClassTable, ForwardHandler, InstanceAllocator,
    ProtocolTable, Selector, SelectorTable, SentinelForwarder,
};

// TODO: let the association shard count grow with the number of live
// objects instead of being fixed at creation
#[derive(Debug, Default, Clone)]
pub struct RuntimeCreateInfo {
    pub selector_capacity: Option<usize>,
    pub class_capacity: Option<usize>,
    /// Initial entries reserved in each class's method cache.
    pub cache_capacity: Option<usize>,
    /// Rounded up to a power of two.
    pub association_shards: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub selector_capacity: usize,
    pub class_capacity: usize,
    pub cache_capacity: usize,
    pub association_shards: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            selector_capacity: 1024,
            class_capacity: 256,
            cache_capacity: 8,
            association_shards: 16,
        }
    }
}

impl RuntimeSettings {
    fn from_info(info: &RuntimeCreateInfo) -> Self {
        let mut settings = Self::default();
        info.selector_capacity
            .inspect(|&val| settings.selector_capacity = val);
        info.class_capacity.inspect(|&val| settings.class_capacity = val);
        info.cache_capacity.inspect(|&val| settings.cache_capacity = val);
        info.association_shards
            .inspect(|&val| settings.association_shards = val.max(1).next_power_of_two());
        settings
    }
}

/// The object-model runtime: selector table, class and protocol
/// registries, associated objects and the instance allocator.
///
/// Every piece of state lives in an instance, so tests build isolated
/// runtimes with [`Runtime::new`]; [`Runtime::global`] is the process-wide
/// one that load-time metadata and message dispatch share.
pub struct Runtime {
    pub(crate) settings: RuntimeSettings,
    pub(crate) selectors: SelectorTable,
    pub(crate) classes: RwLock<ClassTable>,
    pub(crate) protocols: RwLock<ProtocolTable>,
    pub(crate) associations: AssociationStore,
    pub(crate) allocator: InstanceAllocator,
    /// Bumped whenever a method table gains an entry; see `MethodCache::fill`.
    pub(crate) method_epoch: AtomicU64,
    /// Serializes implementation swaps so exchanges are pairwise atomic.
    pub(crate) imp_lock: Mutex<()>,
    pub(crate) forward_handler: RwLock<Arc<dyn ForwardHandler>>,
    pub(crate) class_handler: RwLock<Option<ClassHandler>>,
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    pub fn new(info: RuntimeCreateInfo) -> Self {
        let settings = RuntimeSettings::from_info(&info);
        log::debug!("creating runtime with {settings:?}");

        Self {
            selectors: SelectorTable::with_capacity(settings.selector_capacity),
            classes: RwLock::new(ClassTable::with_capacity(settings.class_capacity)),
            protocols: RwLock::new(ProtocolTable::default()),
            associations: AssociationStore::with_shards(settings.association_shards),
            allocator: InstanceAllocator::default(),
            method_epoch: AtomicU64::new(0),
            imp_lock: Mutex::new(()),
            forward_handler: RwLock::new(Arc::new(SentinelForwarder)),
            class_handler: RwLock::new(None),
            settings,
        }
    }

    /// The process-wide runtime, created with default settings on first
    /// use and never torn down.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| Runtime::new(RuntimeCreateInfo::default()))
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn selectors(&self) -> &SelectorTable {
        &self.selectors
    }

    pub fn associations(&self) -> &AssociationStore {
        &self.associations
    }

    pub fn sel_register_name(&self, name: &str) -> Selector {
        self.selectors.register_name(name)
    }

    pub fn sel_get_uid(&self, name: &str) -> Selector {
        self.selectors.register_name(name)
    }

    pub fn sel_get_name(&self, selector: Selector) -> Option<Arc<str>> {
        self.selectors.name(selector)
    }

    pub fn sel_is_mapped(&self, selector: Selector) -> bool {
        self.selectors.is_mapped(selector)
    }

    pub fn sel_is_equal(&self, a: Selector, b: Selector) -> bool {
        a == b
    }

    /// Selector name for log messages.
    pub(crate) fn describe_selector(&self, selector: Selector) -> String {
        self.selectors
            .name(selector)
            .map_or_else(|| format!("{selector:?}"), |name| name.to_string())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeCreateInfo::default())
    }
}
