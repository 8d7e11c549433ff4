//! Table over a heap block
//!
//! A table is one allocated block laid out as `[header][data]`. The header
//! is read-only after construction except for its `row_count` and
//! `data_length` words, which move through atomic adds so appenders and
//! readers can overlap: a reader that observes a row count is guaranteed
//! the bytes of every row below it, provided the writer published them
//! before the add.

use super::cursor::RowCursor;
use super::schema::{ColumnSpec, TableLayout, TableSchema, HDR_DATA_LENGTH, HDR_ROW_COUNT};
use crate::heap::{Block, Heap};
use crate::{EngineError, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A typed table bound to an allocated block.
pub struct Table {
    block: Block,
    schema: TableSchema,
}

impl Table {
    /// Open a table over a block whose payload already holds a serialized
    /// header followed by data.
    pub fn open(block: Block) -> Result<Table> {
        let (schema, _row_count, data_length) = TableSchema::parse(block.bytes(0, block.len()))?;
        let data_capacity = block.len() - schema.header_len() as usize;
        if data_length as usize > data_capacity {
            return Err(EngineError::MalformedTable(format!(
                "data length {} exceeds the block's data capacity {}",
                data_length, data_capacity
            )));
        }
        Ok(Table { block, schema })
    }

    /// Allocate a block in `heap` and lay out a fresh table.
    ///
    /// Row-major tables start empty with room for `capacity_rows` appended
    /// rows. Column-major tables are created at their full extent:
    /// `capacity_rows` rows, stripes packed tight, every field zeroed.
    pub fn create_in(
        heap: &Arc<Heap>,
        specs: &[ColumnSpec],
        capacity_rows: usize,
        layout: TableLayout,
    ) -> Result<Table> {
        let row_length: usize = specs.iter().map(|s| s.size()).sum();
        let memory_length = match layout {
            TableLayout::RowMajor => capacity_rows * ((row_length + 3) & !3),
            TableLayout::ColumnMajor => capacity_rows * row_length,
        };
        let (schema, initial_rows) = TableSchema::build(specs, memory_length, layout)?;

        let block = heap.allocate_zeroed(schema.header_len() as usize + memory_length)?;
        let header = schema.header_bytes(initial_rows, initial_rows * schema.row_length());
        block.region().write_bytes(block.addr(), &header);
        Ok(Table { block, schema })
    }

    #[inline]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    #[inline]
    pub fn layout(&self) -> TableLayout {
        self.schema.layout()
    }

    /// Current row count, read from the header word.
    #[inline]
    pub fn row_count(&self) -> u32 {
        self.block
            .region()
            .atomic_u32(self.block.addr() + HDR_ROW_COUNT)
            .load(Ordering::SeqCst)
    }

    /// Bytes of the data region in use, read from the header word.
    #[inline]
    pub fn data_length(&self) -> u32 {
        self.block
            .region()
            .atomic_u32(self.block.addr() + HDR_DATA_LENGTH)
            .load(Ordering::SeqCst)
    }

    /// Absolute region offset where the data region starts.
    #[inline]
    pub(crate) fn data_offset(&self) -> usize {
        self.block.addr() + self.schema.header_len() as usize
    }

    /// Bytes available for data in this block.
    #[inline]
    pub fn data_capacity(&self) -> usize {
        self.block.len() - self.schema.header_len() as usize
    }

    /// Physical row capacity of the data region: the highest row index
    /// whose bytes the block actually backs, plus one. The header's row
    /// count can sit above this transiently while an over-full
    /// reservation rolls back (see [`Table::add_rows`]).
    pub fn row_capacity(&self) -> u32 {
        let cap = self.data_capacity() as u64;
        let row_length = u64::from(self.schema.row_length());
        let rows = match self.layout() {
            TableLayout::RowMajor => {
                if cap < row_length {
                    0
                } else {
                    (cap - row_length) / u64::from(self.schema.row_step()) + 1
                }
            }
            TableLayout::ColumnMajor => cap / row_length,
        };
        rows.min(u64::from(u32::MAX)) as u32
    }

    /// Reserve `n` append slots, returning the first reserved row index.
    ///
    /// `data_length` is bumped before `row_count` so no reader can observe
    /// a count whose bytes are not yet accounted for. Rows must fit the
    /// block; a reservation past capacity is rolled back and rejected.
    pub fn add_rows(&self, n: u32) -> Result<u32> {
        if n == 0 {
            return Ok(self.row_count());
        }
        if self.layout() == TableLayout::ColumnMajor {
            return Err(EngineError::OutOfBounds(
                "column-major tables are created at full extent".to_string(),
            ));
        }
        let region = self.block.region();
        let row_length = self.schema.row_length();

        let data_len = region.atomic_u32(self.block.addr() + HDR_DATA_LENGTH);
        let row_count = region.atomic_u32(self.block.addr() + HDR_ROW_COUNT);

        data_len.fetch_add(n * row_length, Ordering::SeqCst);
        let old = row_count.fetch_add(n, Ordering::SeqCst);

        let last = u64::from(old) + u64::from(n);
        if last > u64::from(self.row_capacity()) {
            row_count.fetch_sub(n, Ordering::SeqCst);
            data_len.fetch_sub(n * row_length, Ordering::SeqCst);
            return Err(EngineError::OutOfBounds(format!(
                "append of {} rows past capacity ({} already present)",
                n, old
            )));
        }
        Ok(old)
    }

    /// Cursor positioned at `index`.
    pub fn row(&self, index: u32) -> Result<RowCursor<'_>> {
        RowCursor::new(self, index)
    }

    /// Iterate cursors over every row.
    pub fn iter(&self) -> impl Iterator<Item = RowCursor<'_>> {
        (0..self.row_count()).filter_map(move |i| self.row(i).ok())
    }

    #[inline]
    pub(crate) fn block(&self) -> &Block {
        &self.block
    }

    /// Overwrite the mutable header words. Engine finalization only; not
    /// for use while workers are writing.
    pub(crate) fn set_row_state(&self, rows: u32, data_length: u32) {
        let region = self.block.region();
        region
            .atomic_u32(self.block.addr() + HDR_DATA_LENGTH)
            .store(data_length, Ordering::SeqCst);
        region
            .atomic_u32(self.block.addr() + HDR_ROW_COUNT)
            .store(rows, Ordering::SeqCst);
    }

    /// Shrink the backing block down to `rows` physical rows.
    pub(crate) fn trim_to(&mut self, rows: u32) -> Result<()> {
        let needed =
            self.schema.header_len() as usize + rows as usize * self.schema.row_step() as usize;
        if needed < self.block.len() {
            let heap = Arc::clone(self.block.heap());
            heap.shrink(&mut self.block, needed)?;
        }
        Ok(())
    }

    /// Release the table's block back to its heap.
    pub fn free(self) -> Result<()> {
        let heap = Arc::clone(self.block.heap());
        heap.free(&self.block)
    }

    /// Surrender the underlying block.
    pub fn into_block(self) -> Block {
        self.block
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("columns", &self.schema.column_count())
            .field("rows", &self.row_count())
            .field("layout", &self.layout())
            .finish()
    }
}
