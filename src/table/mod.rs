//! Tables: binary header schema, block-backed tables, row cursors, and
//! index proxies.

pub mod cursor;
pub mod proxy;
pub mod schema;
pub mod table;

pub use cursor::RowCursor;
pub use proxy::ProxyTable;
pub use schema::{Column, ColumnSpec, TableLayout, TableSchema};
pub use table::Table;
