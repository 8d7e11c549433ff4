//! Data model: primitive types, runtime values, bounded byte-strings.

pub mod bstr;
pub mod types;
pub mod value;

pub use bstr::{bstr_field_size, ByteStr, ByteStrBuf, BSTR_MAX_LEN};
pub use types::PrimType;
pub use value::Value;
