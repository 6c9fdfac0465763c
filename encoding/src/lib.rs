//! # Type encodings
//!
//! Parser and serializer for the compact one-character-per-primitive
//! grammar used to describe ivar, method and property types.
//!
//! ```text
//!  "{CGPoint=dd}" ──parse──▶ Encoding::Struct { .. } ──Display──▶ "{CGPoint=dd}"
//!                                   │
//!                                   └─ layout() ──▶ (16, 8)
//! ```
//!
//! ```rust
//! use encoding::{Encoding, MethodSignature, parse};
//!
//! let ty = parse("^{CGPoint=dd}").unwrap();
//! assert_eq!(ty.size(), Some(8));
//!
//! let sig = MethodSignature::parse("v24@0:8i16").unwrap();
//! assert_eq!(sig.argument_count(), 3);
//! assert_eq!(sig.return_type().ty, Encoding::Void);
//! ```
//!
//! Everything here is pure and stateless; the runtime stores the
//! serialized text and parses on demand.

mod layout;
mod parser;
mod signature;
mod types;

pub use parser::{EncodingError, EncodingErrorKind, parse};
pub use signature::{MethodSignature, SignatureItem};
pub use types::{Encoding, Field, Qualifiers};
