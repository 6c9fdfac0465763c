use std::fmt;

/// Conflicts and checked misuse reported by mutating runtime operations.
///
/// Absence is never an error here: lookups return `Option`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    ClassExists { name: String },
    SuperclassNotRegistered,
    /// The handle is stale (disposed), foreign, or the wrong kind.
    NotAClass,
    /// The instance layout is frozen once the class is registered.
    NotMutable { class: String },
    /// Instances need a registered class.
    NotRegistered { class: String },
    AlreadyRegistered { name: String },
    MetaclassIvar,
    DuplicateIvar { name: String },
    InvalidAlignment { log2: u8 },
    DuplicateMethod { selector: String },
    DuplicateProperty { name: String },
    AlreadyConforms { protocol: String },
    ProtocolExists { name: String },
    ProtocolRegistered { name: String },
    ProtocolNotRegistered { name: String },
    UnknownProtocol,
    LiveInstances { class: String, count: usize },
    HasSubclasses { class: String },
    ForeignSelector,
    OutOfMemory { size: usize },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClassExists { name } => {
                write!(f, "a class named {name} already exists")
            }
            Self::SuperclassNotRegistered => {
                write!(f, "superclass is not a registered class")
            }
            Self::NotAClass => write!(f, "handle does not name a live class"),
            Self::NotMutable { class } => {
                write!(f, "class {class} is registered; its layout is frozen")
            }
            Self::NotRegistered { class } => {
                write!(f, "class {class} is not registered; its size is not fixed")
            }
            Self::AlreadyRegistered { name } => {
                write!(f, "{name} is already registered")
            }
            Self::MetaclassIvar => {
                write!(f, "instance variables cannot be added to a metaclass")
            }
            Self::DuplicateIvar { name } => {
                write!(f, "instance variable {name} already exists")
            }
            Self::InvalidAlignment { log2 } => {
                write!(f, "alignment 2^{log2} is out of range")
            }
            Self::DuplicateMethod { selector } => {
                write!(f, "class already implements {selector}")
            }
            Self::DuplicateProperty { name } => {
                write!(f, "property {name} already exists")
            }
            Self::AlreadyConforms { protocol } => {
                write!(f, "already conforms to {protocol}")
            }
            Self::ProtocolExists { name } => {
                write!(f, "a protocol named {name} already exists")
            }
            Self::ProtocolRegistered { name } => {
                write!(f, "protocol {name} is registered and immutable")
            }
            Self::ProtocolNotRegistered { name } => {
                write!(f, "protocol {name} is still under construction")
            }
            Self::UnknownProtocol => write!(f, "handle does not name a protocol"),
            Self::LiveInstances { class, count } => {
                write!(f, "{count} live instance(s) of {class} or its subclasses")
            }
            Self::HasSubclasses { class } => {
                write!(f, "class {class} still has subclasses")
            }
            Self::ForeignSelector => {
                write!(f, "selector was not produced by this runtime")
            }
            Self::OutOfMemory { size } => {
                write!(f, "failed to allocate {size} bytes")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
