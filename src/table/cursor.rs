//! Row cursor
//!
//! A moving typed view over one row. Positioning resolves the row's base
//! offset once (row-major) or leaves per-column stripe addressing to the
//! field accessors (column-major, stride = the column's own field length).
//! Field access dispatches on the column's type tag; there is no per-access
//! name lookup or parsing.

use super::schema::{Column, TableLayout};
use super::table::Table;
use crate::data::{ByteStr, PrimType, Value};
use crate::{EngineError, Result};

/// A cursor positioned on one row of a table.
pub struct RowCursor<'a> {
    table: &'a Table,
    index: u32,
    /// Row base for row-major layouts; unused for column-major.
    row_base: usize,
}

impl<'a> RowCursor<'a> {
    pub(crate) fn new(table: &'a Table, index: u32) -> Result<Self> {
        let mut cursor = RowCursor {
            table,
            index: 0,
            row_base: table.data_offset(),
        };
        cursor.seek(index)?;
        Ok(cursor)
    }

    /// Current row index.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Move to `index`, rebasing every field pointer.
    pub fn seek(&mut self, index: u32) -> Result<()> {
        if index >= self.table.row_count() {
            return Err(EngineError::OutOfBounds(format!(
                "row {} out of {}",
                index,
                self.table.row_count()
            )));
        }
        self.index = index;
        self.row_base = self.table.data_offset()
            + index as usize * self.table.schema().row_step() as usize;
        Ok(())
    }

    /// Advance to the next row; `false` at the end of the table.
    pub fn advance(&mut self) -> bool {
        self.seek(self.index + 1).is_ok()
    }

    #[inline]
    fn field_offset(&self, col: &Column) -> usize {
        match self.table.layout() {
            TableLayout::RowMajor => self.row_base + col.offset as usize,
            TableLayout::ColumnMajor => {
                self.table.data_offset()
                    + col.data_offset as usize
                    + self.index as usize * col.size as usize
            }
        }
    }

    /// Read a field, widened to its runtime value. BSTR fields materialize
    /// a string copy; use [`RowCursor::bstr`] for the zero-copy view.
    pub fn get(&self, column: usize) -> Result<Value> {
        let col = self.table.schema().column(column)?;
        match col.ty {
            PrimType::Bstr => Ok(Value::Str(self.bstr(column)?.to_utf8_string())),
            PrimType::Void => Err(EngineError::SchemaMismatch(format!(
                "column '{}' is VOID and has no typed read",
                col.name
            ))),
            ty => {
                let offset = self.field_offset(col);
                Ok(ty
                    .read_value(self.table.block().region(), offset)
                    .expect("numeric read"))
            }
        }
    }

    /// Read a field by column name.
    pub fn get_named(&self, name: &str) -> Result<Value> {
        self.get(self.resolve(name)?)
    }

    /// Live view over a BSTR field; re-reads the row bytes on each access.
    pub fn bstr(&self, column: usize) -> Result<ByteStr<'a>> {
        let col = self.table.schema().column(column)?;
        if col.ty != PrimType::Bstr {
            return Err(EngineError::SchemaMismatch(format!(
                "column '{}' is {}, not BSTR",
                col.name, col.ty
            )));
        }
        let offset = self.field_offset(col);
        Ok(ByteStr::from_field(
            self.table
                .block()
                .region()
                .bytes(offset, col.size as usize),
        ))
    }

    pub fn bstr_named(&self, name: &str) -> Result<ByteStr<'a>> {
        self.bstr(self.resolve(name)?)
    }

    /// Write a field from a runtime value, little-endian low bytes.
    ///
    /// A BSTR value longer than the field's content capacity is an error in
    /// debug builds and is truncated in release builds.
    pub fn set(&mut self, column: usize, value: &Value) -> Result<()> {
        let col = self.table.schema().column(column)?;
        let offset = self.field_offset(col);
        let region = self.table.block().region();
        match (col.ty, value) {
            (PrimType::Bstr, Value::Str(s)) => {
                let cap = col.size as usize - 1;
                if s.len() > cap && cfg!(debug_assertions) {
                    return Err(EngineError::OutOfBounds(format!(
                        "value of {} bytes exceeds '{}' field capacity {}",
                        s.len(),
                        col.name,
                        cap
                    )));
                }
                let content = &s.as_bytes()[..s.len().min(cap)];
                region.write_u8(offset, content.len() as u8);
                region.write_bytes(offset + 1, content);
                region.fill_zero(offset + 1 + content.len(), cap - content.len());
                Ok(())
            }
            (PrimType::Void, _) => Err(EngineError::SchemaMismatch(format!(
                "column '{}' is VOID and has no typed write",
                col.name
            ))),
            (ty, value) => {
                if ty.write_value(region, offset, value) {
                    Ok(())
                } else {
                    Err(EngineError::SchemaMismatch(format!(
                        "value {:?} does not fit column '{}' of type {}",
                        value, col.name, ty
                    )))
                }
            }
        }
    }

    pub fn set_named(&mut self, name: &str, value: &Value) -> Result<()> {
        let column = self.resolve(name)?;
        self.set(column, value)
    }

    fn resolve(&self, name: &str) -> Result<usize> {
        self.table.schema().column_index(name).ok_or_else(|| {
            EngineError::SchemaMismatch(format!("unknown column '{}'", name))
        })
    }
}
