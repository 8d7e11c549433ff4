//! Parallel filter engine
//!
//! Workers cooperatively drain the source table in 1024-row batches
//! reserved by atomic add on a shared batch counter, evaluate the compiled
//! predicate per row, and claim output slots by atomic add on a shared slot
//! counter. Matching rows are written field-by-field into a freshly
//! allocated result table; a result consisting of the single row-index
//! field comes back as a proxy over the source instead of a materialized
//! copy.

use super::compile::{CompiledExpr, FieldLoc};
use super::expr::{Expression, NormalForm};
use crate::data::PrimType;
use crate::heap::Heap;
use crate::table::schema::{ColumnSpec, TableLayout};
use crate::table::{ProxyTable, Table};
use crate::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Rows reserved per worker batch.
pub const FILTER_BATCH_ROWS: u32 = 1024;

/// Column name of the synthesized row-index result field.
pub const ROW_INDEX_FIELD: &str = "row_index";

/// One field of the result description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultField {
    /// The matching row's index in the source table, as a U32 column.
    RowIndex,
    /// A projected source column, optionally renamed.
    Column { name: String, alias: Option<String> },
}

impl ResultField {
    pub fn column(name: impl Into<String>) -> Self {
        ResultField::Column {
            name: name.into(),
            alias: None,
        }
    }

    pub fn column_as(name: impl Into<String>, alias: impl Into<String>) -> Self {
        ResultField::Column {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }
}

/// A filter run's output: a materialized table, or a proxy when the only
/// result field is the row index.
#[derive(Debug)]
pub enum FilterOutput<'a> {
    Table(Table),
    Proxy(ProxyTable<'a>),
}

impl<'a> FilterOutput<'a> {
    pub fn row_count(&self) -> u32 {
        match self {
            FilterOutput::Table(t) => t.row_count(),
            FilterOutput::Proxy(p) => p.row_count(),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, FilterOutput::Proxy(_))
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            FilterOutput::Table(t) => Some(t),
            FilterOutput::Proxy(_) => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&ProxyTable<'a>> {
        match self {
            FilterOutput::Proxy(p) => Some(p),
            FilterOutput::Table(_) => None,
        }
    }

    pub fn into_table(self) -> Option<Table> {
        match self {
            FilterOutput::Table(t) => Some(t),
            FilterOutput::Proxy(_) => None,
        }
    }

    pub fn into_proxy(self) -> Option<ProxyTable<'a>> {
        match self {
            FilterOutput::Proxy(p) => Some(p),
            FilterOutput::Table(_) => None,
        }
    }

    /// Release the run's allocation (the result table, or the proxy's
    /// index table). The source is never touched.
    pub fn destroy(self) -> Result<()> {
        match self {
            FilterOutput::Table(t) => t.free(),
            FilterOutput::Proxy(p) => p.destroy(),
        }
    }
}

/// Pre-specialized per-field result writer; no per-row dispatch beyond the
/// variant branch.
enum FieldWriter {
    RowIndex { dst_offset: u32 },
    Copy { src: FieldLoc, len: u32, dst_offset: u32 },
}

/// Filter runs over one bound source table.
pub struct FilterEngine<'a> {
    table: &'a Table,
    workers: usize,
    out_heap: Arc<Heap>,
    fields: Vec<ResultField>,
}

impl<'a> FilterEngine<'a> {
    /// Bind an engine to `table`. Defaults: one worker, results allocated
    /// in the source's heap, result description `[RowIndex]`.
    pub fn new(table: &'a Table) -> Self {
        FilterEngine {
            table,
            workers: 1,
            out_heap: Arc::clone(table.block().heap()),
            fields: vec![ResultField::RowIndex],
        }
    }

    /// Worker-pool size. One worker executes inline on the calling thread,
    /// which is also the portability fallback where no real pool exists.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Heap receiving the result allocation (default: the source's).
    pub fn output_heap(mut self, heap: &Arc<Heap>) -> Self {
        self.out_heap = Arc::clone(heap);
        self
    }

    /// Result description, in field order.
    pub fn fields(mut self, fields: Vec<ResultField>) -> Self {
        self.fields = fields;
        self
    }

    /// Compile `expr` under `mode` and evaluate it over every source row.
    pub fn run(&self, expr: &Expression, mode: NormalForm) -> Result<FilterOutput<'a>> {
        // Everything that can be rejected is rejected before any allocation
        // or worker dispatch.
        let compiled = CompiledExpr::compile(self.table, expr, mode)?;
        let (specs, sources) = self.result_layout()?;
        let proxy_eligible = self.fields == [ResultField::RowIndex];

        let rows = self.table.row_count();
        let mut result =
            Table::create_in(&self.out_heap, &specs, rows as usize, TableLayout::RowMajor)?;
        let writers = self.result_writers(&result, &sources);

        let counters = match self.out_heap.allocate_zeroed(8) {
            Ok(block) => block,
            Err(e) => {
                let _ = result.free();
                return Err(e);
            }
        };

        log::debug!(
            "filter run: {} rows, {} workers, {} clauses, {} result fields",
            rows,
            self.workers,
            expr.clauses.len(),
            self.fields.len()
        );

        let failed = AtomicBool::new(false);
        let first_err: Mutex<Option<EngineError>> = Mutex::new(None);
        {
            let src_region = self.table.block().region();
            let dst_region = result.block().region();
            let counter_region = counters.region();
            let next_row = counter_region.atomic_u32(counters.addr());
            let next_slot = counter_region.atomic_u32(counters.addr() + 4);
            let dst_base = result.data_offset();
            let dst_step = result.schema().row_step() as usize;
            let src_base = self.table.data_offset();
            let src_step = self.table.schema().row_step() as usize;
            // Rows past this index have no backing bytes: the source's row
            // counter can sit above it while an over-full reservation is
            // mid-rollback, and a snapshot taken in that window must not
            // be scanned.
            let scan_limit = self.table.row_capacity();

            let worker = || -> Result<()> {
                loop {
                    if failed.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    let start = next_row.fetch_add(FILTER_BATCH_ROWS, Ordering::SeqCst);
                    if start >= rows {
                        return Ok(());
                    }
                    let end = (start + FILTER_BATCH_ROWS).min(rows);
                    if end > scan_limit {
                        return Err(EngineError::OutOfBounds(format!(
                            "source row count {} exceeds the block's {}-row capacity",
                            rows, scan_limit
                        )));
                    }
                    for row in start..end {
                        if !compiled.matches(src_region, row as usize) {
                            continue;
                        }
                        let slot = next_slot.fetch_add(1, Ordering::SeqCst) as usize;
                        let dst_row = dst_base + slot * dst_step;
                        for writer in &writers {
                            match writer {
                                FieldWriter::RowIndex { dst_offset } => {
                                    dst_region.write_u32(dst_row + *dst_offset as usize, row);
                                }
                                FieldWriter::Copy {
                                    src,
                                    len,
                                    dst_offset,
                                } => {
                                    dst_region.copy_from(
                                        dst_row + *dst_offset as usize,
                                        src_region,
                                        src.resolve(src_base, src_step, row as usize),
                                        *len as usize,
                                    );
                                }
                            }
                        }
                    }
                }
            };

            let record = |e: EngineError| {
                failed.store(true, Ordering::Relaxed);
                first_err.lock().get_or_insert(e);
            };
            if self.workers == 1 {
                if let Err(e) = worker() {
                    record(e);
                }
            } else {
                rayon::scope(|scope| {
                    for _ in 0..self.workers {
                        scope.spawn(|_| {
                            if let Err(e) = worker() {
                                record(e);
                            }
                        });
                    }
                });
            }
        }

        let matched = counters.region().atomic_u32(counters.addr() + 4).load(Ordering::SeqCst);
        self.out_heap.free(&counters)?;

        if let Some(err) = first_err.into_inner() {
            let _ = result.free();
            return Err(EngineError::WorkerFailure(Box::new(err)));
        }

        result.set_row_state(matched, matched * result.schema().row_length());
        result.trim_to(matched)?;
        log::debug!("filter run matched {} of {} rows", matched, rows);

        if proxy_eligible {
            Ok(FilterOutput::Proxy(ProxyTable::new(self.table, result)?))
        } else {
            Ok(FilterOutput::Table(result))
        }
    }

    /// Resolve the result description into column specs plus, per field,
    /// the projected source column (None for the row index).
    fn result_layout(&self) -> Result<(Vec<ColumnSpec>, Vec<Option<usize>>)> {
        if self.fields.is_empty() {
            return Err(EngineError::SchemaMismatch(
                "result description needs at least one field".to_string(),
            ));
        }
        let schema = self.table.schema();
        let mut specs = Vec::with_capacity(self.fields.len());
        let mut sources = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match field {
                ResultField::RowIndex => {
                    specs.push(ColumnSpec::new(ROW_INDEX_FIELD, PrimType::U32));
                    sources.push(None);
                }
                ResultField::Column { name, alias } => {
                    let index = schema.column_index(name).ok_or_else(|| {
                        EngineError::SchemaMismatch(format!(
                            "result projects unknown column '{}'",
                            name
                        ))
                    })?;
                    let col = &schema.columns()[index];
                    let out_name = alias.as_deref().unwrap_or(name);
                    specs.push(match col.ty {
                        PrimType::Bstr => ColumnSpec::bstr(out_name, col.size as usize - 1),
                        ty => ColumnSpec::new(out_name, ty),
                    });
                    sources.push(Some(index));
                }
            }
        }
        Ok((specs, sources))
    }

    /// Pair every result column with its writer against the freshly laid
    /// out (type-sorted) result schema.
    fn result_writers(&self, result: &Table, sources: &[Option<usize>]) -> Vec<FieldWriter> {
        let src_schema = self.table.schema();
        let src_layout = src_schema.layout();
        self.fields
            .iter()
            .zip(sources)
            .map(|(field, source)| {
                let out_name = match field {
                    ResultField::RowIndex => ROW_INDEX_FIELD,
                    ResultField::Column { name, alias } => alias.as_deref().unwrap_or(name),
                };
                let dst = result
                    .schema()
                    .column_index(out_name)
                    .expect("result column just laid out");
                let dst_offset = result.schema().columns()[dst].offset;
                match source {
                    None => FieldWriter::RowIndex { dst_offset },
                    Some(src_index) => {
                        let col = &src_schema.columns()[*src_index];
                        FieldWriter::Copy {
                            src: FieldLoc::of(col, src_layout),
                            len: col.size,
                            dst_offset,
                        }
                    }
                }
            })
            .collect()
    }
}
