use std::{
    any::Any,
    sync::{Arc, Weak},
};

use bitflags::bitflags;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::{Object, Runtime};

bitflags! {
    /// Raw policy bits as they appear in compiled metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct PolicyBits: usize {
        const SETTER_RETAIN = 1;
        const SETTER_COPY = 1 << 1;
        const GETTER_RETAIN = 1 << 8;
        const GETTER_AUTORELEASE = 1 << 9;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationPolicy {
    /// Weak reference; the store does not keep the value alive.
    Assign,
    RetainNonatomic,
    CopyNonatomic,
    Retain,
    Copy,
}

impl AssociationPolicy {
    pub fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(Self::Assign),
            1 => Some(Self::RetainNonatomic),
            3 => Some(Self::CopyNonatomic),
            0o1401 => Some(Self::Retain),
            0o1403 => Some(Self::Copy),
            _ => None,
        }
    }

    pub fn raw(self) -> usize {
        self.bits().bits()
    }

    fn bits(self) -> PolicyBits {
        let atomic = PolicyBits::GETTER_RETAIN | PolicyBits::GETTER_AUTORELEASE;
        let retain = PolicyBits::SETTER_RETAIN;
        let copy = PolicyBits::SETTER_RETAIN | PolicyBits::SETTER_COPY;
        match self {
            Self::Assign => PolicyBits::empty(),
            Self::RetainNonatomic => retain,
            Self::CopyNonatomic => copy,
            Self::Retain => retain | atomic,
            Self::Copy => copy | atomic,
        }
    }

    pub fn is_atomic(self) -> bool {
        self.bits().contains(PolicyBits::GETTER_RETAIN)
    }

    pub fn is_copy(self) -> bool {
        self.bits().contains(PolicyBits::SETTER_COPY)
    }

    pub fn is_strong(self) -> bool {
        self.bits().contains(PolicyBits::SETTER_RETAIN)
    }
}

/// Opaque association key, conventionally the address of a static.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociationKey(usize);

impl AssociationKey {
    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub fn of<T>(anchor: &'static T) -> Self {
        Self(anchor as *const T as usize)
    }
}

/// A value that can be attached to an object. Copy policies clone it
/// through [`AssociatedValue::copy_value`] when it is set.
pub trait AssociatedValue: Any + Send + Sync {
    fn copy_value(&self) -> Arc<dyn AssociatedValue>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Clone + Send + Sync> AssociatedValue for T {
    fn copy_value(&self) -> Arc<dyn AssociatedValue> {
        Arc::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AssociatedValue {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }
}

enum Stored {
    Strong(Arc<dyn AssociatedValue>),
    Weak(Weak<dyn AssociatedValue>),
}

struct Association {
    policy: AssociationPolicy,
    value: Stored,
}

impl Association {
    fn new(value: &Arc<dyn AssociatedValue>, policy: AssociationPolicy) -> Self {
        let value = if policy.is_copy() {
            Stored::Strong((**value).copy_value())
        } else if policy.is_strong() {
            Stored::Strong(value.clone())
        } else {
            Stored::Weak(Arc::downgrade(value))
        };
        Self { policy, value }
    }

    fn value(&self) -> Option<Arc<dyn AssociatedValue>> {
        match &self.value {
            Stored::Strong(value) => Some(value.clone()),
            Stored::Weak(value) => value.upgrade(),
        }
    }
}

type KeyMap = FxHashMap<AssociationKey, Association>;
type ObjectMap = FxHashMap<usize, KeyMap>;

/// Side table of per-object key/value attachments.
///
/// Objects are spread over a fixed number of mutex-guarded shards by
/// address. Every policy goes through its shard's lock, so set and get
/// on the same key are exclusive even for the nonatomic policies.
/// Replaced values are dropped after the lock is released.
pub struct AssociationStore {
    shards: Box<[Mutex<ObjectMap>]>,
    mask: usize,
}

impl AssociationStore {
    /// `shards` is rounded up to a power of two, and to at least one.
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1).next_power_of_two();
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(ObjectMap::default()))
                .collect(),
            mask: shards - 1,
        }
    }

    fn shard(&self, object: Object) -> &Mutex<ObjectMap> {
        let addr = object.addr();
        &self.shards[((addr >> 4) ^ (addr >> 12)) & self.mask]
    }

    /// Attach `value` under `key`, or detach the key when `value` is
    /// `None`.
    pub fn set(
        &self,
        object: Object,
        key: AssociationKey,
        value: Option<Arc<dyn AssociatedValue>>,
        policy: AssociationPolicy,
    ) {
        let association = value.as_ref().map(|value| Association::new(value, policy));

        let previous = {
            let mut shard = self.shard(object).lock();
            match association {
                Some(association) => shard
                    .entry(object.addr())
                    .or_default()
                    .insert(key, association),
                None => {
                    let keys = shard.get_mut(&object.addr());
                    let removed = keys.and_then(|keys| keys.remove(&key));
                    if shard.get(&object.addr()).is_some_and(KeyMap::is_empty) {
                        shard.remove(&object.addr());
                    }
                    removed
                }
            }
        };

        if let Some(previous) = previous {
            log::trace!(
                "{object:?}: replaced association {key:?} ({:?})",
                previous.policy
            );
        }
    }

    /// Current value for `key`. A weak value whose owner is gone reads
    /// as `None`.
    pub fn get(&self, object: Object, key: AssociationKey) -> Option<Arc<dyn AssociatedValue>> {
        self.shard(object)
            .lock()
            .get(&object.addr())?
            .get(&key)?
            .value()
    }

    /// Drop every association of `object`. Returns how many were removed.
    pub fn remove_all(&self, object: Object) -> usize {
        let removed = self.shard(object).lock().remove(&object.addr());
        removed.map_or(0, |keys| keys.len())
    }

    pub fn has_associations(&self, object: Object) -> bool {
        self.shard(object).lock().contains_key(&object.addr())
    }
}

impl Runtime {
    pub fn set_associated_object(
        &self,
        object: Object,
        key: AssociationKey,
        value: Option<Arc<dyn AssociatedValue>>,
        policy: AssociationPolicy,
    ) {
        self.associations.set(object, key, value, policy);
    }

    pub fn get_associated_object(
        &self,
        object: Object,
        key: AssociationKey,
    ) -> Option<Arc<dyn AssociatedValue>> {
        self.associations.get(object, key)
    }

    /// Detach every value from `object`, whoever attached it. Meant for
    /// returning an instance to a pristine state.
    pub fn remove_associated_objects(&self, object: Object) {
        let removed = self.associations.remove_all(object);
        if removed > 0 {
            log::trace!("{object:?}: removed {removed} association(s)");
        }
    }
}
