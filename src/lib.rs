//! HeapTable Core Engine
//!
//! An in-process, in-memory tabular engine for bulk analytical filtering
//! over wide, row-heavy datasets. One contiguous byte region (the heap) is
//! shared across worker threads; tables are packed into it with a
//! self-describing binary layout; boolean rule expressions are compiled and
//! evaluated in parallel, writing matches into freshly allocated result
//! tables or compact index-only proxies over the source.

pub mod data;
pub mod heap;
pub mod query;
pub mod table;

// Re-export main types
pub use data::{ByteStr, ByteStrBuf, PrimType, Value};
pub use heap::{Block, Heap};
pub use query::{
    Expression, FilterEngine, FilterOp, FilterOutput, Literal, NormalForm, ResultField, Rule,
};
pub use table::{ColumnSpec, ProxyTable, RowCursor, Table, TableLayout, TableSchema};

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("malformed table: {0}")]
    MalformedTable(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("worker failure: {0}")]
    WorkerFailure(#[source] Box<EngineError>),
}

impl EngineError {
    /// Short stable tag for the error kind, independent of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::AllocationFailure(_) => "allocation_failure",
            EngineError::InvalidBlock(_) => "invalid_block",
            EngineError::MalformedTable(_) => "malformed_table",
            EngineError::SchemaMismatch(_) => "schema_mismatch",
            EngineError::OutOfBounds(_) => "out_of_bounds",
            EngineError::WorkerFailure(_) => "worker_failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
