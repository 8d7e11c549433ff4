//! Primitive type registry
//!
//! Each type maps to a fixed wire index used by the table binary format,
//! a byte width, and typed little-endian read/write against the shared
//! region. Unknown wire indices are rejected when a table is opened.

use super::value::Value;
use crate::heap::region::SharedRegion;
use crate::{EngineError, Result};
use ahash::AHashMap;
use once_cell::sync::Lazy;

/// Fixed-width primitive column types.
///
/// Discriminants are the wire indices of the table format and must never
/// be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PrimType {
    U32 = 0,
    I32 = 1,
    F32 = 2,
    U16 = 3,
    I16 = 4,
    U8 = 5,
    I8 = 6,
    /// Length-prefixed ASCII string, at most 255 content bytes.
    Bstr = 7,
    /// 1-byte opaque placeholder with no typed read or write.
    Void = 8,
}

/// Name -> type lookup, registered once at startup.
static REGISTRY: Lazy<AHashMap<&'static str, PrimType>> = Lazy::new(|| {
    let mut map = AHashMap::with_capacity(9);
    for ty in PrimType::ALL {
        map.insert(ty.name(), ty);
    }
    map
});

impl PrimType {
    pub const ALL: [PrimType; 9] = [
        PrimType::U32,
        PrimType::I32,
        PrimType::F32,
        PrimType::U16,
        PrimType::I16,
        PrimType::U8,
        PrimType::I8,
        PrimType::Bstr,
        PrimType::Void,
    ];

    /// Wire index in the table binary format.
    #[inline]
    pub fn index(self) -> u32 {
        self as u32
    }

    /// Resolve a wire index, rejecting unknown values.
    pub fn from_index(index: u32) -> Result<Self> {
        match index {
            0 => Ok(PrimType::U32),
            1 => Ok(PrimType::I32),
            2 => Ok(PrimType::F32),
            3 => Ok(PrimType::U16),
            4 => Ok(PrimType::I16),
            5 => Ok(PrimType::U8),
            6 => Ok(PrimType::I8),
            7 => Ok(PrimType::Bstr),
            8 => Ok(PrimType::Void),
            other => Err(EngineError::MalformedTable(format!(
                "unknown column type index {}",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimType::U32 => "U32",
            PrimType::I32 => "I32",
            PrimType::F32 => "F32",
            PrimType::U16 => "U16",
            PrimType::I16 => "I16",
            PrimType::U8 => "U8",
            PrimType::I8 => "I8",
            PrimType::Bstr => "BSTR",
            PrimType::Void => "VOID",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        REGISTRY.get(name).copied()
    }

    /// Fixed byte width; `None` for BSTR, whose width is declared per
    /// column.
    pub fn byte_size(self) -> Option<usize> {
        match self {
            PrimType::U32 | PrimType::I32 | PrimType::F32 => Some(4),
            PrimType::U16 | PrimType::I16 => Some(2),
            PrimType::U8 | PrimType::I8 | PrimType::Void => Some(1),
            PrimType::Bstr => None,
        }
    }

    pub fn bit_size(self) -> Option<usize> {
        self.byte_size().map(|b| b * 8)
    }

    /// Numeric scalar types; BSTR and VOID are not primitive.
    pub fn is_primitive(self) -> bool {
        !matches!(self, PrimType::Bstr | PrimType::Void)
    }

    #[inline]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PrimType::U32
                | PrimType::I32
                | PrimType::U16
                | PrimType::I16
                | PrimType::U8
                | PrimType::I8
        )
    }

    #[inline]
    pub fn is_float(self) -> bool {
        self == PrimType::F32
    }

    /// Widened integer load. Callers guarantee `is_integer()`.
    #[inline]
    pub(crate) fn load_i64(self, region: &SharedRegion, offset: usize) -> i64 {
        match self {
            PrimType::U32 => region.read_u32(offset) as i64,
            PrimType::I32 => region.read_i32(offset) as i64,
            PrimType::U16 => region.read_u16(offset) as i64,
            PrimType::I16 => region.read_i16(offset) as i64,
            PrimType::U8 => region.read_u8(offset) as i64,
            PrimType::I8 => region.read_i8(offset) as i64,
            PrimType::F32 | PrimType::Bstr | PrimType::Void => {
                unreachable!("load_i64 on non-integer type")
            }
        }
    }

    /// Typed read, widened to the runtime representation. `None` for BSTR
    /// (read through the cursor's string view) and VOID.
    pub(crate) fn read_value(self, region: &SharedRegion, offset: usize) -> Option<Value> {
        match self {
            PrimType::F32 => Some(Value::Float(region.read_f32(offset) as f64)),
            ty if ty.is_integer() => Some(Value::Int(ty.load_i64(region, offset))),
            _ => None,
        }
    }

    /// Typed write of the value's low bytes, little-endian. `false` when the
    /// value's class does not match the column type.
    pub(crate) fn write_value(self, region: &SharedRegion, offset: usize, value: &Value) -> bool {
        match (self, value) {
            (PrimType::U32, Value::Int(v)) => region.write_u32(offset, *v as u32),
            (PrimType::I32, Value::Int(v)) => region.write_i32(offset, *v as i32),
            (PrimType::U16, Value::Int(v)) => region.write_u16(offset, *v as u16),
            (PrimType::I16, Value::Int(v)) => region.write_i16(offset, *v as i16),
            (PrimType::U8, Value::Int(v)) => region.write_u8(offset, *v as u8),
            (PrimType::I8, Value::Int(v)) => region.write_i8(offset, *v as i8),
            (PrimType::F32, Value::Float(v)) => region.write_f32(offset, *v as f32),
            _ => return false,
        }
        true
    }
}

impl std::fmt::Display for PrimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
