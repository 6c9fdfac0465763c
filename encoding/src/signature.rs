use crate::parser::{Cursor, EncodingError, EncodingErrorKind};
use crate::types::Encoding;

/// One entry of a method signature: the parsed type, the exact text it
/// was parsed from (qualifiers included, offset excluded), and its frame
/// offset if one was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureItem {
    pub ty: Encoding,
    pub text: String,
    pub offset: Option<isize>,
}

/// A method type encoding such as `v24@0:8i16`: return type first, then
/// every argument, the receiver and selector included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    ret: SignatureItem,
    args: Vec<SignatureItem>,
}

impl MethodSignature {
    pub fn parse(text: &str) -> Result<Self, EncodingError> {
        let mut cursor = Cursor::new(text);
        if cursor.at_end() {
            return Err(cursor.error(EncodingErrorKind::EmptySignature));
        }

        let ret = next_item(&mut cursor, text)?;
        let mut args = Vec::new();
        while !cursor.at_end() {
            args.push(next_item(&mut cursor, text)?);
        }
        Ok(Self { ret, args })
    }

    pub fn return_type(&self) -> &SignatureItem {
        &self.ret
    }

    pub fn arguments(&self) -> &[SignatureItem] {
        &self.args
    }

    pub fn argument(&self, index: usize) -> Option<&SignatureItem> {
        self.args.get(index)
    }

    pub fn argument_count(&self) -> usize {
        self.args.len()
    }

    /// Total frame size recorded after the return type, if any.
    pub fn frame_size(&self) -> Option<isize> {
        self.ret.offset
    }
}

fn next_item(cursor: &mut Cursor<'_>, text: &str) -> Result<SignatureItem, EncodingError> {
    let start = cursor.pos();
    let ty = cursor.parse_type()?;
    let end = cursor.pos();
    let offset = cursor.parse_offset();
    Ok(SignatureItem {
        ty,
        text: text[start..end].to_owned(),
        offset,
    })
}
