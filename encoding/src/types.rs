use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Method-argument qualifiers that may prefix a type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Qualifiers: u8 {
        const CONST = 1 << 0;
        const IN = 1 << 1;
        const INOUT = 1 << 2;
        const OUT = 1 << 3;
        const BYCOPY = 1 << 4;
        const BYREF = 1 << 5;
        const ONEWAY = 1 << 6;
    }
}

/// Qualifier characters in the order they are written back out.
pub(crate) const QUALIFIER_CHARS: [(u8, Qualifiers); 7] = [
    (b'r', Qualifiers::CONST),
    (b'n', Qualifiers::IN),
    (b'N', Qualifiers::INOUT),
    (b'o', Qualifiers::OUT),
    (b'O', Qualifiers::BYCOPY),
    (b'R', Qualifiers::BYREF),
    (b'V', Qualifiers::ONEWAY),
];

impl Qualifiers {
    pub(crate) fn from_char(c: u8) -> Option<Self> {
        QUALIFIER_CHARS
            .iter()
            .find(|(ch, _)| *ch == c)
            .map(|(_, q)| *q)
    }
}

/// A single member of a struct or union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Present when the encoding carried `"name"` before the member type.
    pub name: Option<String>,
    pub ty: Encoding,
}

impl Field {
    pub fn new(ty: Encoding) -> Self {
        Self { name: None, ty }
    }

    pub fn named(name: impl Into<String>, ty: Encoding) -> Self {
        Self {
            name: Some(name.into()),
            ty,
        }
    }
}

/// Typed form of a type-encoding string.
///
/// The string grammar is only the external serialization: parse with
/// [`crate::parse`], write back with `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// `@`
    Id,
    /// `@"ClassName"`
    NamedId(String),
    /// `@?`
    Block,
    /// `#`
    Class,
    /// `:`
    Selector,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Bool,
    Void,
    /// `?`, usually a function pointer target.
    Unknown,
    /// `*`
    CString,
    /// `%`
    Atom,
    /// `bN`, a bitfield of `N` bits.
    BitField(u32),
    Pointer(Box<Encoding>),
    Array {
        len: usize,
        element: Box<Encoding>,
    },
    /// `{name=...}`; `fields` is `None` for the name-only form `{name}`.
    Struct {
        name: String,
        fields: Option<Vec<Field>>,
    },
    Union {
        name: String,
        fields: Option<Vec<Field>>,
    },
    Qualified {
        qualifiers: Qualifiers,
        inner: Box<Encoding>,
    },
}

impl Encoding {
    pub(crate) fn primitive(c: u8) -> Option<Self> {
        let ty = match c {
            b'#' => Self::Class,
            b':' => Self::Selector,
            b'c' => Self::Char,
            b'C' => Self::UChar,
            b's' => Self::Short,
            b'S' => Self::UShort,
            b'i' => Self::Int,
            b'I' => Self::UInt,
            b'l' => Self::Long,
            b'L' => Self::ULong,
            b'q' => Self::LongLong,
            b'Q' => Self::ULongLong,
            b'f' => Self::Float,
            b'd' => Self::Double,
            b'B' => Self::Bool,
            b'v' => Self::Void,
            b'?' => Self::Unknown,
            b'*' => Self::CString,
            b'%' => Self::Atom,
            _ => return None,
        };
        Some(ty)
    }

    fn primitive_char(&self) -> Option<char> {
        let c = match self {
            Self::Id => '@',
            Self::Class => '#',
            Self::Selector => ':',
            Self::Char => 'c',
            Self::UChar => 'C',
            Self::Short => 's',
            Self::UShort => 'S',
            Self::Int => 'i',
            Self::UInt => 'I',
            Self::Long => 'l',
            Self::ULong => 'L',
            Self::LongLong => 'q',
            Self::ULongLong => 'Q',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Bool => 'B',
            Self::Void => 'v',
            Self::Unknown => '?',
            Self::CString => '*',
            Self::Atom => '%',
            _ => return None,
        };
        Some(c)
    }

    /// Strips any qualifiers.
    pub fn unqualified(&self) -> &Encoding {
        match self {
            Self::Qualified { inner, .. } => inner.unqualified(),
            other => other,
        }
    }

    /// True for the object-like encodings (`@`, `@"X"`, `@?`, `#`).
    pub fn is_object(&self) -> bool {
        matches!(
            self.unqualified(),
            Self::Id | Self::NamedId(_) | Self::Block | Self::Class
        )
    }

    pub fn is_void(&self) -> bool {
        matches!(self.unqualified(), Self::Void)
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[Field]) -> fmt::Result {
    for field in fields {
        if let Some(name) = &field.name {
            write!(f, "\"{name}\"")?;
        }
        write!(f, "{}", field.ty)?;
    }
    Ok(())
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(c) = self.primitive_char() {
            return write!(f, "{c}");
        }
        match self {
            Self::NamedId(name) => write!(f, "@\"{name}\""),
            Self::Block => write!(f, "@?"),
            Self::BitField(bits) => write!(f, "b{bits}"),
            Self::Pointer(inner) => write!(f, "^{inner}"),
            Self::Array { len, element } => write!(f, "[{len}{element}]"),
            Self::Struct { name, fields } => {
                write!(f, "{{{name}")?;
                if let Some(fields) = fields {
                    write!(f, "=")?;
                    write_fields(f, fields)?;
                }
                write!(f, "}}")
            }
            Self::Union { name, fields } => {
                write!(f, "({name}")?;
                if let Some(fields) = fields {
                    write!(f, "=")?;
                    write_fields(f, fields)?;
                }
                write!(f, ")")
            }
            Self::Qualified { qualifiers, inner } => {
                for (c, q) in QUALIFIER_CHARS {
                    if qualifiers.contains(q) {
                        write!(f, "{}", c as char)?;
                    }
                }
                write!(f, "{inner}")
            }
            _ => unreachable!("primitive encodings are written above"),
        }
    }
}
