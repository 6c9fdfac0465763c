//! # objrt
//!
//! A dynamic object-model runtime: interned selectors, classes and
//! metaclasses built and registered at run time, per-class method caches,
//! protocols, properties, associated objects and instance allocation.
//!
//! ```text
//!  send(obj, sel)
//!     │ object_get_class
//!     ▼
//!  MethodCache ──hit──▶ Imp
//!     │ miss
//!     ▼
//!  class ─▶ superclass ─▶ … ─▶ root ──found──▶ fill cache ─▶ Imp
//!                                   └─none──▶ ForwardHandler ─▶ Imp
//! ```
//!
//! All state lives in a [`Runtime`]. Tests build isolated ones with
//! [`Runtime::new`]; [`Runtime::global`] is the process-wide instance.
//!
//! ```rust
//! use objrt::{Imp, Runtime};
//!
//! let rt = Runtime::default();
//! let animal = rt.allocate_class_pair(None, "Animal", 0).unwrap();
//! rt.class_add_ivar(animal, "legs", 4, 2, "i").unwrap();
//! rt.register_class_pair(animal).unwrap();
//!
//! let speak = rt.sel_register_name("speak");
//! let imp = Imp::from_addr(0x1000).unwrap();
//! rt.class_add_method(animal, speak, imp, "v@:").unwrap();
//! assert_eq!(rt.get_method_implementation(animal, speak), imp);
//! ```

mod allocator;
mod association;
mod cache;
mod class;
mod error;
mod lookup;
mod method;
mod object;
mod property;
mod protocol;
mod registry;
mod runtime;
mod selector;

pub use allocator::Storage;
pub use association::{AssociatedValue, AssociationKey, AssociationPolicy, AssociationStore};
pub use cache::{CacheState, MethodCache};
pub use class::{Class, ClassFlags, ClassState, HEADER_SIZE, Ivar, Teardown};
pub use error::RuntimeError;
pub use lookup::{FORWARD_SENTINEL, ForwardHandler, SentinelForwarder};
pub use method::{Imp, Method, MethodDescription};
pub use object::Object;
pub use property::{Property, PropertyAttribute, parse_attributes};
pub use protocol::Protocol;
pub use registry::ClassHandler;
pub use runtime::{Runtime, RuntimeCreateInfo, RuntimeSettings};
pub use selector::{Selector, SelectorTable};

pub(crate) use allocator::InstanceAllocator;
pub(crate) use class::{ClassData, ClassInit};
pub(crate) use method::MethodTable;
pub(crate) use protocol::ProtocolTable;
pub(crate) use registry::ClassTable;
