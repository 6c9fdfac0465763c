use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;

use crate::{MethodDescription, Property, PropertyAttribute, Runtime, RuntimeError, Selector};

/// Handle to a protocol: an index into the runtime's protocol table.
/// Protocols are never disposed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Protocol(u32);

impl Protocol {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protocol({})", self.0)
    }
}

/// Index into the four method and property lists of a protocol.
const fn slot(required: bool, instance: bool) -> usize {
    ((required as usize) << 1) | instance as usize
}

pub(crate) struct ProtocolData {
    name: Arc<str>,
    registered: bool,
    methods: [Vec<MethodDescription>; 4],
    properties: [Vec<Property>; 4],
    /// Incorporated protocols.
    protocols: Vec<Protocol>,
}

#[derive(Default)]
pub(crate) struct ProtocolTable {
    entries: Vec<ProtocolData>,
    names: FxHashMap<Arc<str>, Protocol>,
}

impl ProtocolTable {
    fn get(&self, proto: Protocol) -> Option<&ProtocolData> {
        self.entries.get(proto.0 as usize)
    }

    fn get_mut(&mut self, proto: Protocol) -> Option<&mut ProtocolData> {
        self.entries.get_mut(proto.0 as usize)
    }

    /// Mutable access to a protocol that is still under construction.
    fn pending_mut(&mut self, proto: Protocol) -> Result<&mut ProtocolData, RuntimeError> {
        let data = self.get_mut(proto).ok_or(RuntimeError::UnknownProtocol)?;
        if data.registered {
            return Err(RuntimeError::ProtocolRegistered {
                name: data.name.to_string(),
            });
        }
        Ok(data)
    }

    /// Depth-first over `proto` and everything it incorporates, stopping
    /// at the first `Some`.
    fn find<T>(
        &self,
        proto: Protocol,
        f: &mut impl FnMut(Protocol, &ProtocolData) -> Option<T>,
    ) -> Option<T> {
        let mut pending = vec![proto];
        let mut seen = Vec::new();
        while let Some(next) = pending.pop() {
            if seen.contains(&next) {
                continue;
            }
            seen.push(next);
            let Some(data) = self.get(next) else {
                continue;
            };
            if let Some(found) = f(next, data) {
                return Some(found);
            }
            pending.extend(data.protocols.iter().rev().copied());
        }
        None
    }

    fn conforms(&self, proto: Protocol, other: Protocol) -> bool {
        self.find(proto, &mut |p, _| (p == other).then_some(()))
            .is_some()
    }
}

impl Runtime {
    // ── Registry ───────────────────────────────────────────────────

    /// Create an unregistered protocol. Fails if any protocol, pending or
    /// registered, already has this name.
    pub fn allocate_protocol(&self, name: &str) -> Result<Protocol, RuntimeError> {
        let mut table = self.protocols.write();
        if table.names.contains_key(name) {
            return Err(RuntimeError::ProtocolExists {
                name: name.to_owned(),
            });
        }
        let index = u32::try_from(table.entries.len())
            .expect("protocol table exhausted the u32 index space");
        let proto = Protocol(index);
        let name: Arc<str> = Arc::from(name);
        table.entries.push(ProtocolData {
            name: name.clone(),
            registered: false,
            methods: Default::default(),
            properties: Default::default(),
            protocols: Vec::new(),
        });
        table.names.insert(name, proto);
        Ok(proto)
    }

    /// Freeze a protocol and make it visible to [`Runtime::get_protocol`].
    pub fn register_protocol(&self, proto: Protocol) -> Result<(), RuntimeError> {
        let mut table = self.protocols.write();
        let data = table.pending_mut(proto)?;
        data.registered = true;
        log::debug!("registered protocol {}", data.name);
        Ok(())
    }

    pub fn get_protocol(&self, name: &str) -> Option<Protocol> {
        let table = self.protocols.read();
        let proto = *table.names.get(name)?;
        table.get(proto)?.registered.then_some(proto)
    }

    /// Snapshot of every registered protocol.
    pub fn copy_protocol_list(&self) -> Vec<Protocol> {
        let table = self.protocols.read();
        (0..table.entries.len() as u32)
            .map(Protocol)
            .filter(|&p| table.get(p).is_some_and(|data| data.registered))
            .collect()
    }

    // ── Construction ───────────────────────────────────────────────

    pub fn protocol_add_method_description(
        &self,
        proto: Protocol,
        selector: Selector,
        types: &str,
        required: bool,
        instance: bool,
    ) -> Result<(), RuntimeError> {
        if !self.selectors.is_mapped(selector) {
            return Err(RuntimeError::ForeignSelector);
        }
        let mut table = self.protocols.write();
        let data = table.pending_mut(proto)?;
        let list = &mut data.methods[slot(required, instance)];
        if list.iter().any(|desc| desc.name == selector) {
            return Err(RuntimeError::DuplicateMethod {
                selector: self.describe_selector(selector),
            });
        }
        list.push(MethodDescription {
            name: selector,
            types: Arc::from(types),
        });
        Ok(())
    }

    /// Incorporate the registered protocol `addition` into `proto`.
    pub fn protocol_add_protocol(
        &self,
        proto: Protocol,
        addition: Protocol,
    ) -> Result<(), RuntimeError> {
        let mut table = self.protocols.write();
        let added = table.get(addition).ok_or(RuntimeError::UnknownProtocol)?;
        if !added.registered {
            return Err(RuntimeError::ProtocolNotRegistered {
                name: added.name.to_string(),
            });
        }
        let added_name = added.name.to_string();

        let data = table.pending_mut(proto)?;
        if data.protocols.contains(&addition) {
            return Err(RuntimeError::AlreadyConforms {
                protocol: added_name,
            });
        }
        data.protocols.push(addition);
        Ok(())
    }

    pub fn protocol_add_property(
        &self,
        proto: Protocol,
        name: &str,
        attributes: &[PropertyAttribute],
        required: bool,
        instance: bool,
    ) -> Result<(), RuntimeError> {
        let mut table = self.protocols.write();
        let data = table.pending_mut(proto)?;
        let list = &mut data.properties[slot(required, instance)];
        if list.iter().any(|p| p.name() == name) {
            return Err(RuntimeError::DuplicateProperty {
                name: name.to_owned(),
            });
        }
        list.push(Property::new(name, attributes));
        Ok(())
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn protocol_get_name(&self, proto: Protocol) -> Option<Arc<str>> {
        Some(self.protocols.read().get(proto)?.name.clone())
    }

    /// Identical handles, or two protocols that each conform to the other.
    pub fn protocol_is_equal(&self, a: Protocol, b: Protocol) -> bool {
        if a == b {
            return self.protocols.read().get(a).is_some();
        }
        let table = self.protocols.read();
        table.conforms(a, b) && table.conforms(b, a)
    }

    /// Reflexive; follows incorporated protocols transitively.
    pub fn protocol_conforms_to_protocol(&self, proto: Protocol, other: Protocol) -> bool {
        self.protocols.read().conforms(proto, other)
    }

    /// Search `proto` and the protocols it incorporates.
    pub fn protocol_get_method_description(
        &self,
        proto: Protocol,
        selector: Selector,
        required: bool,
        instance: bool,
    ) -> Option<MethodDescription> {
        let slot = slot(required, instance);
        self.protocols.read().find(proto, &mut |_, data: &ProtocolData| {
            data.methods[slot]
                .iter()
                .find(|desc| desc.name == selector)
                .cloned()
        })
    }

    /// Descriptions declared by `proto` itself.
    pub fn protocol_copy_method_description_list(
        &self,
        proto: Protocol,
        required: bool,
        instance: bool,
    ) -> Vec<MethodDescription> {
        self.protocols
            .read()
            .get(proto)
            .map(|data| data.methods[slot(required, instance)].clone())
            .unwrap_or_default()
    }

    /// Search `proto` and the protocols it incorporates.
    pub fn protocol_get_property(
        &self,
        proto: Protocol,
        name: &str,
        required: bool,
        instance: bool,
    ) -> Option<Property> {
        let slot = slot(required, instance);
        self.protocols.read().find(proto, &mut |_, data: &ProtocolData| {
            data.properties[slot]
                .iter()
                .find(|p| p.name() == name)
                .cloned()
        })
    }

    /// Required instance properties declared by `proto` itself.
    pub fn protocol_copy_property_list(&self, proto: Protocol) -> Vec<Property> {
        self.protocols
            .read()
            .get(proto)
            .map(|data| data.properties[slot(true, true)].clone())
            .unwrap_or_default()
    }

    pub fn protocol_copy_protocol_list(&self, proto: Protocol) -> Vec<Protocol> {
        self.protocols
            .read()
            .get(proto)
            .map(|data| data.protocols.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(rt: &Runtime, name: &str) -> Protocol {
        let proto = rt.allocate_protocol(name).expect("allocate");
        rt.register_protocol(proto).expect("register");
        proto
    }

    #[test]
    fn only_registered_protocols_are_visible() {
        let rt = Runtime::default();
        let pending = rt.allocate_protocol("Pending").expect("allocate");
        assert!(rt.get_protocol("Pending").is_none());
        assert!(rt.copy_protocol_list().is_empty());
        assert_eq!(
            rt.allocate_protocol("Pending"),
            Err(RuntimeError::ProtocolExists { name: "Pending".into() })
        );

        rt.register_protocol(pending).expect("register");
        assert_eq!(rt.get_protocol("Pending"), Some(pending));
        assert_eq!(rt.copy_protocol_list(), vec![pending]);
        assert_eq!(rt.protocol_get_name(pending).as_deref(), Some("Pending"));
    }

    #[test]
    fn registered_protocols_are_frozen() {
        let rt = Runtime::default();
        let proto = registered(&rt, "Frozen");
        let sel = rt.sel_register_name("thaw");
        assert_eq!(
            rt.protocol_add_method_description(proto, sel, "v@:", true, true),
            Err(RuntimeError::ProtocolRegistered { name: "Frozen".into() })
        );
        assert_eq!(
            rt.register_protocol(proto),
            Err(RuntimeError::ProtocolRegistered { name: "Frozen".into() })
        );
    }

    #[test]
    fn conformance_is_reflexive_and_transitive() {
        let rt = Runtime::default();
        let base = registered(&rt, "Base");
        let middle = rt.allocate_protocol("Middle").expect("middle");
        rt.protocol_add_protocol(middle, base).expect("incorporate");
        rt.register_protocol(middle).expect("register");
        let top = rt.allocate_protocol("Top").expect("top");
        rt.protocol_add_protocol(top, middle).expect("incorporate");
        assert_eq!(
            rt.protocol_add_protocol(top, middle),
            Err(RuntimeError::AlreadyConforms { protocol: "Middle".into() })
        );
        rt.register_protocol(top).expect("register");

        assert!(rt.protocol_conforms_to_protocol(top, top));
        assert!(rt.protocol_conforms_to_protocol(top, base));
        assert!(!rt.protocol_conforms_to_protocol(base, top));
        assert!(rt.protocol_is_equal(base, base));
        assert!(!rt.protocol_is_equal(base, top));
        assert_eq!(rt.protocol_copy_protocol_list(top), vec![middle]);

        let cls = rt.allocate_class_pair(None, "Impl", 0).expect("class");
        rt.class_add_protocol(cls, top).expect("adopt");
        assert!(rt.class_conforms_to_protocol(cls, base));
    }

    #[test]
    fn incorporating_requires_registration() {
        let rt = Runtime::default();
        let pending = rt.allocate_protocol("Pending").expect("pending");
        let outer = rt.allocate_protocol("Outer").expect("outer");
        assert_eq!(
            rt.protocol_add_protocol(outer, pending),
            Err(RuntimeError::ProtocolNotRegistered { name: "Pending".into() })
        );
    }

    #[test]
    fn method_descriptions_by_kind() {
        let rt = Runtime::default();
        let base = rt.allocate_protocol("Coding").expect("coding");
        let encode = rt.sel_register_name("encodeWithCoder:");
        let version = rt.sel_register_name("version");
        rt.protocol_add_method_description(base, encode, "v24@0:8@16", true, true)
            .expect("encode");
        rt.protocol_add_method_description(base, version, "i16@0:8", false, false)
            .expect("version");
        rt.protocol_add_property(base, "coder", &[PropertyAttribute::new("T", "@")], true, true)
            .expect("property");
        rt.register_protocol(base).expect("register");

        let secure = rt.allocate_protocol("SecureCoding").expect("secure");
        rt.protocol_add_protocol(secure, base).expect("incorporate");
        rt.register_protocol(secure).expect("register");

        let found = rt
            .protocol_get_method_description(secure, encode, true, true)
            .expect("inherited description");
        assert_eq!(&*found.types, "v24@0:8@16");
        assert!(rt.protocol_get_method_description(secure, encode, false, true).is_none());
        assert!(rt.protocol_get_method_description(base, version, false, false).is_some());

        assert_eq!(rt.protocol_copy_method_description_list(base, true, true).len(), 1);
        assert!(rt.protocol_copy_method_description_list(secure, true, true).is_empty());

        assert!(rt.protocol_get_property(secure, "coder", true, true).is_some());
        assert_eq!(rt.protocol_copy_property_list(base).len(), 1);
        assert!(rt.protocol_copy_property_list(secure).is_empty());
    }
}
