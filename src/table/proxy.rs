//! Proxy table
//!
//! A proxy projects a computed index table (one U32 column of row indices)
//! back onto its source: consumers see the source's schema and row shape,
//! positioned indirectly through the index column. Destroying a proxy
//! releases only the index table.

use super::cursor::RowCursor;
use super::schema::TableSchema;
use super::table::Table;
use crate::data::{PrimType, Value};
use crate::{EngineError, Result};

/// An index-only result projected onto its source table.
pub struct ProxyTable<'a> {
    source: &'a Table,
    indices: Table,
}

impl<'a> ProxyTable<'a> {
    /// Wrap an index table over `source`. The index table must consist of a
    /// single U32 column.
    pub(crate) fn new(source: &'a Table, indices: Table) -> Result<Self> {
        let ok = indices.schema().column_count() == 1
            && indices.schema().columns()[0].ty == PrimType::U32;
        if !ok {
            return Err(EngineError::MalformedTable(
                "proxy index table must hold a single U32 column".to_string(),
            ));
        }
        Ok(ProxyTable { source, indices })
    }

    /// The projected source table.
    #[inline]
    pub fn source(&self) -> &'a Table {
        self.source
    }

    /// The underlying index table.
    #[inline]
    pub fn index_table(&self) -> &Table {
        &self.indices
    }

    /// Number of projected rows.
    #[inline]
    pub fn row_count(&self) -> u32 {
        self.indices.row_count()
    }

    /// The schema consumers see: the source's.
    #[inline]
    pub fn schema(&self) -> &TableSchema {
        self.source.schema()
    }

    /// The source row index behind proxy row `k`.
    pub fn source_index(&self, k: u32) -> Result<u32> {
        let index_cursor = self.indices.row(k)?;
        match index_cursor.get(0)? {
            Value::Int(v) => Ok(v as u32),
            _ => unreachable!("index column is U32"),
        }
    }

    /// Cursor over proxy row `k`, positioned on the source row it names.
    /// Fields read through it present the source schema.
    pub fn row(&self, k: u32) -> Result<RowCursor<'a>> {
        let source_row = self.source_index(k)?;
        self.source.row(source_row)
    }

    /// Sorted copy of all projected source indices.
    pub fn source_indices(&self) -> Result<Vec<u32>> {
        let mut out = Vec::with_capacity(self.row_count() as usize);
        for k in 0..self.row_count() {
            out.push(self.source_index(k)?);
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Release the index table; the source is left untouched.
    pub fn destroy(self) -> Result<()> {
        self.indices.free()
    }
}

impl std::fmt::Debug for ProxyTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyTable")
            .field("rows", &self.row_count())
            .field("source_rows", &self.source.row_count())
            .finish()
    }
}
