use std::{
    num::NonZeroUsize,
    sync::{Arc, atomic::Ordering},
};

use crate::{Class, Imp, Method, Runtime, Selector};

/// Implementation returned by [`SentinelForwarder`]. Dispatch recognizes
/// it and routes the send into its forwarding path.
pub const FORWARD_SENTINEL: Imp = Imp::new(NonZeroUsize::MIN);

/// Strategy consulted when no class in the chain implements a selector.
pub trait ForwardHandler: Send + Sync {
    fn forwarding_imp(&self, class: Class, selector: Selector) -> Imp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SentinelForwarder;

impl ForwardHandler for SentinelForwarder {
    fn forwarding_imp(&self, _class: Class, _selector: Selector) -> Imp {
        FORWARD_SENTINEL
    }
}

impl Runtime {
    /// Resolve `selector` for instances of `cls`: cache first, then the
    /// class and each superclass in order. The first entry found wins
    /// and is cached on `cls`.
    pub fn lookup_method(&self, cls: Class, selector: Selector) -> Option<Method> {
        let data = self.class_data(cls)?;
        if let Some(method) = data.cache.get(selector) {
            return Some(method);
        }

        let epoch = self.method_epoch.load(Ordering::Acquire);
        let method = self
            .ancestors(cls)
            .find_map(|class| class.methods.read().get(selector).cloned())?;
        log::trace!(
            "{}: {} resolved in {:?}",
            data.name,
            self.describe_selector(selector),
            method.owner()
        );
        data.cache.fill(selector, method.clone(), epoch, &self.method_epoch);
        Some(method)
    }

    pub fn lookup_imp(&self, cls: Class, selector: Selector) -> Option<Imp> {
        if let Some(imp) = self.class_data(cls)?.cache.get_imp(selector) {
            return Some(imp);
        }
        self.lookup_method(cls, selector)
            .map(|method| method.implementation())
    }

    /// Never fails: a total miss yields the forward handler's
    /// implementation.
    pub fn get_method_implementation(&self, cls: Class, selector: Selector) -> Imp {
        self.lookup_imp(cls, selector).unwrap_or_else(|| {
            log::trace!(
                "{cls:?} does not respond to {}, forwarding",
                self.describe_selector(selector)
            );
            let handler = self.forward_handler.read().clone();
            handler.forwarding_imp(cls, selector)
        })
    }

    pub fn class_get_instance_method(&self, cls: Class, selector: Selector) -> Option<Method> {
        self.lookup_method(cls, selector)
    }

    /// Instance-method lookup on the class's metaclass.
    pub fn class_get_class_method(&self, cls: Class, selector: Selector) -> Option<Method> {
        let meta = self.class_get_meta_class(cls)?;
        self.lookup_method(meta, selector)
    }

    pub fn class_responds_to_selector(&self, cls: Class, selector: Selector) -> bool {
        self.lookup_imp(cls, selector).is_some()
    }

    /// Install the forwarding strategy, returning the previous one.
    pub fn set_forward_handler(
        &self,
        handler: Arc<dyn ForwardHandler>,
    ) -> Arc<dyn ForwardHandler> {
        std::mem::replace(&mut *self.forward_handler.write(), handler)
    }
}
