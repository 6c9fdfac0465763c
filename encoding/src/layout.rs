use crate::types::{Encoding, Field};

const POINTER: usize = std::mem::size_of::<usize>();

/// `None` on overflow.
#[inline]
fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// `(size, alignment)` of every member, or `None` if any member has no
/// known layout.
fn field_layouts(fields: &[Field]) -> Option<Vec<(usize, usize)>> {
    fields.iter().map(|field| field.ty.layout()).collect()
}

impl Encoding {
    /// C layout of the encoded type as `(size, alignment)` on an LP64
    /// target.
    ///
    /// Returns `None` for `void`, `?`, and aggregates declared by name
    /// only, which have no size, and for types too large to address.
    /// Bitfields are treated as whole bytes
    /// rather than packed into their neighbours.
    pub fn layout(&self) -> Option<(usize, usize)> {
        let layout = match self {
            Self::Id
            | Self::NamedId(_)
            | Self::Block
            | Self::Class
            | Self::Selector
            | Self::CString
            | Self::Atom
            | Self::Pointer(_) => (POINTER, POINTER),
            Self::Char | Self::UChar | Self::Bool => (1, 1),
            Self::Short | Self::UShort => (2, 2),
            Self::Int | Self::UInt | Self::Float => (4, 4),
            Self::Long | Self::ULong => (POINTER, POINTER),
            Self::LongLong | Self::ULongLong | Self::Double => (8, 8),
            Self::Void | Self::Unknown => return None,
            Self::BitField(bits) => ((*bits as usize).div_ceil(8).max(1), 1),
            Self::Array { len, element } => {
                let (size, align) = element.layout()?;
                (size.checked_mul(*len)?, align)
            }
            Self::Struct { fields, .. } => {
                let layouts = field_layouts(fields.as_deref()?)?;
                let mut offset = 0usize;
                let mut max_align = 1usize;
                for (size, align) in layouts {
                    offset = align_up(offset, align)?.checked_add(size)?;
                    max_align = max_align.max(align);
                }
                (align_up(offset, max_align)?, max_align)
            }
            Self::Union { fields, .. } => {
                let layouts = field_layouts(fields.as_deref()?)?;
                let size = layouts.iter().map(|(s, _)| *s).max().unwrap_or(0);
                let align = layouts.iter().map(|(_, a)| *a).max().unwrap_or(1);
                (align_up(size, align)?, align)
            }
            Self::Qualified { inner, .. } => return inner.layout(),
        };
        Some(layout)
    }

    pub fn size(&self) -> Option<usize> {
        self.layout().map(|(size, _)| size)
    }

    pub fn alignment(&self) -> Option<usize> {
        self.layout().map(|(_, align)| align)
    }
}

#[cfg(test)]
mod tests {
    use crate::parse;

    fn layout(text: &str) -> Option<(usize, usize)> {
        parse(text).expect("valid encoding").layout()
    }

    #[test]
    fn primitive_layouts() {
        assert_eq!(layout("c"), Some((1, 1)));
        assert_eq!(layout("s"), Some((2, 2)));
        assert_eq!(layout("i"), Some((4, 4)));
        assert_eq!(layout("d"), Some((8, 8)));
        assert_eq!(layout("@"), Some((8, 8)));
        assert_eq!(layout("^v"), Some((8, 8)));
        assert_eq!(layout("v"), None);
    }

    #[test]
    fn struct_padding_follows_c_rules() {
        // char, then int aligned to 4, then char, rounded to 4
        assert_eq!(layout("{S=cic}"), Some((12, 4)));
        assert_eq!(layout("{CGRect={CGPoint=dd}{CGSize=dd}}"), Some((32, 8)));
        assert_eq!(layout("{opaque}"), None);
    }

    #[test]
    fn arrays_and_unions() {
        assert_eq!(layout("[3s]"), Some((6, 2)));
        assert_eq!(layout("(u=ci[3c])"), Some((4, 4)));
        assert_eq!(layout("(u=cd)"), Some((8, 8)));
    }

    #[test]
    fn unaddressable_sizes_have_no_layout() {
        assert_eq!(layout("[18446744073709551615c]"), Some((usize::MAX, 1)));
        assert_eq!(layout("{S=[18446744073709551615c]c}"), None);
        assert_eq!(layout("{S=c[18446744073709551615c]}"), None);
        assert_eq!(layout("{S=[18446744073709551615c]i}"), None);
        assert_eq!(layout("(U=[18446744073709551615c]i)"), None);
        assert_eq!(layout("[2[18446744073709551615c]]"), None);
    }

    #[test]
    fn qualifiers_do_not_change_layout() {
        assert_eq!(layout("r^c"), layout("^c"));
        assert_eq!(layout("ni"), Some((4, 4)));
    }
}
