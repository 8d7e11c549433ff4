//! Table header definition
//!
//! Every table starts with a self-describing binary header, little-endian
//! throughout:
//!
//! ```text
//! u32 header_length            ; padded to a multiple of 4
//! u32 column_count
//! u32 row_count
//! u32 row_length               ; sum of column field lengths
//! u32 row_step                 ; row stride (row-major) / first column width
//! u32 data_length              ; bytes of the data region in use
//! u32 layout                   ; 0 = row-major, 1 = column-major
//! column_count x { u32 field_length, u32 data_offset, u32 field_offset, u32 type_index }
//! column_count x { u8 name_length, name bytes }
//! zero padding to the next multiple of 4
//! ```
//!
//! `row_count` and `data_length` are the only mutable words after
//! construction; they move through atomic adds (see `Table::add_rows`).

use crate::data::{bstr_field_size, PrimType, BSTR_MAX_LEN};
use crate::{EngineError, Result};
use ahash::AHashMap;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Fixed leading words of the header, before the column descriptors.
pub(crate) const HEADER_FIXED_SIZE: usize = 28;

/// Header byte offsets of the two mutable words.
pub(crate) const HDR_ROW_COUNT: usize = 8;
pub(crate) const HDR_DATA_LENGTH: usize = 20;

/// Physical data layout of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TableLayout {
    /// Rows stored contiguously, `row_step` bytes apart.
    RowMajor = 0,
    /// Each column stored as one contiguous stripe.
    ColumnMajor = 1,
}

impl TableLayout {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(TableLayout::RowMajor),
            1 => Ok(TableLayout::ColumnMajor),
            other => Err(EngineError::MalformedTable(format!(
                "unknown layout code {}",
                other
            ))),
        }
    }
}

/// A column as requested by a table builder.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    name: String,
    ty: PrimType,
    size: usize,
}

impl ColumnSpec {
    /// A fixed-width column. For BSTR columns use [`ColumnSpec::bstr`].
    pub fn new(name: impl Into<String>, ty: PrimType) -> Self {
        let size = ty
            .byte_size()
            .expect("fixed-width column spec needs a sized type");
        ColumnSpec {
            name: name.into(),
            ty,
            size,
        }
    }

    /// A bounded string column holding up to `max_len` content bytes
    /// (capped at 255). The field footprint is the aligned prefix+content.
    pub fn bstr(name: impl Into<String>, max_len: usize) -> Self {
        ColumnSpec {
            name: name.into(),
            ty: PrimType::Bstr,
            size: bstr_field_size(max_len.min(BSTR_MAX_LEN)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> PrimType {
        self.ty
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// A column as laid out in a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: PrimType,
    /// Field footprint in bytes.
    pub size: u32,
    /// Stripe start within the data region (column-major); 0 for row-major.
    pub data_offset: u32,
    /// Offset within a row (row-major); 0 for column-major.
    pub offset: u32,
}

/// Parsed, validated table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    header_len: u32,
    row_length: u32,
    row_step: u32,
    layout: TableLayout,
    columns: Vec<Column>,
    index: AHashMap<String, usize>,
}

#[inline]
fn round4(v: usize) -> usize {
    (v + 3) & !3
}

impl TableSchema {
    /// Lay out a table from column specs over a data region of
    /// `memory_length` bytes.
    ///
    /// Columns are sorted by type index, which groups equal widths together
    /// and keeps BSTR fields last. Returns the schema and the initial row
    /// count: zero for row-major tables (rows are appended), the region's
    /// full capacity for column-major tables (stripes span the region).
    pub fn build(
        specs: &[ColumnSpec],
        memory_length: usize,
        layout: TableLayout,
    ) -> Result<(TableSchema, u32)> {
        if specs.is_empty() {
            return Err(EngineError::MalformedTable(
                "table needs at least one column".to_string(),
            ));
        }
        let mut seen = AHashMap::with_capacity(specs.len());
        for spec in specs {
            Self::validate_column(&spec.name, spec.ty, spec.size)?;
            if seen.insert(spec.name.clone(), ()).is_some() {
                return Err(EngineError::MalformedTable(format!(
                    "duplicate column name '{}'",
                    spec.name
                )));
            }
        }

        let mut ordered: Vec<ColumnSpec> = specs.to_vec();
        ordered.sort_by_key(|s| s.ty.index());

        let row_length: usize = ordered.iter().map(|s| s.size).sum();

        let (columns, row_step, initial_rows) = match layout {
            TableLayout::RowMajor => {
                let mut offset = 0u32;
                let columns = ordered
                    .into_iter()
                    .map(|s| {
                        let col = Column {
                            name: s.name,
                            ty: s.ty,
                            size: s.size as u32,
                            data_offset: 0,
                            offset,
                        };
                        offset += s.size as u32;
                        col
                    })
                    .collect::<Vec<_>>();
                (columns, round4(row_length) as u32, 0u32)
            }
            TableLayout::ColumnMajor => {
                let rows = memory_length / row_length;
                if rows == 0 {
                    return Err(EngineError::MalformedTable(format!(
                        "column-major region of {} bytes holds no {}-byte row",
                        memory_length, row_length
                    )));
                }
                let mut stripe = 0u32;
                let row_step = ordered[0].size as u32;
                let columns = ordered
                    .into_iter()
                    .map(|s| {
                        let col = Column {
                            name: s.name,
                            ty: s.ty,
                            size: s.size as u32,
                            data_offset: stripe,
                            offset: 0,
                        };
                        stripe += (s.size * rows) as u32;
                        col
                    })
                    .collect::<Vec<_>>();
                (columns, row_step, rows as u32)
            }
        };

        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        let header_len = Self::header_len_for(&columns) as u32;
        Ok((
            TableSchema {
                header_len,
                row_length: row_length as u32,
                row_step,
                layout,
                columns,
                index,
            },
            initial_rows,
        ))
    }

    fn header_len_for(columns: &[Column]) -> usize {
        let names: usize = columns.iter().map(|c| 1 + c.name.len()).sum();
        round4(HEADER_FIXED_SIZE + 16 * columns.len() + names)
    }

    fn validate_column(name: &str, ty: PrimType, size: usize) -> Result<()> {
        if name.is_empty() || name.len() > 255 || !name.is_ascii() {
            return Err(EngineError::MalformedTable(format!(
                "column name '{}' must be 1-255 ASCII bytes",
                name
            )));
        }
        match ty {
            PrimType::Bstr => {
                if size < 4 || size > 256 || size % 4 != 0 {
                    return Err(EngineError::MalformedTable(format!(
                        "BSTR column '{}' has field size {}, expected a multiple of 4 in 4..=256",
                        name, size
                    )));
                }
            }
            other => {
                let expected = other.byte_size().expect("sized type");
                if size != expected {
                    return Err(EngineError::MalformedTable(format!(
                        "column '{}' of type {} has field size {}, expected {}",
                        name, other, size, expected
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize the header with the given mutable-word values.
    pub fn header_bytes(&self, row_count: u32, data_length: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.header_len as usize);
        buf.extend_from_slice(&self.header_len.to_le_bytes());
        buf.extend_from_slice(&(self.columns.len() as u32).to_le_bytes());
        buf.extend_from_slice(&row_count.to_le_bytes());
        buf.extend_from_slice(&self.row_length.to_le_bytes());
        buf.extend_from_slice(&self.row_step.to_le_bytes());
        buf.extend_from_slice(&data_length.to_le_bytes());
        buf.extend_from_slice(&self.layout.code().to_le_bytes());
        for col in &self.columns {
            buf.extend_from_slice(&col.size.to_le_bytes());
            buf.extend_from_slice(&col.data_offset.to_le_bytes());
            buf.extend_from_slice(&col.offset.to_le_bytes());
            buf.extend_from_slice(&col.ty.index().to_le_bytes());
        }
        for col in &self.columns {
            buf.push(col.name.len() as u8);
            buf.extend_from_slice(col.name.as_bytes());
        }
        buf.resize(self.header_len as usize, 0);
        buf
    }

    /// Parse and validate a header from the start of a table's payload.
    /// Returns the schema plus the stored `(row_count, data_length)`.
    pub fn parse(bytes: &[u8]) -> Result<(TableSchema, u32, u32)> {
        let malformed = |what: &str| EngineError::MalformedTable(what.to_string());
        if bytes.len() < HEADER_FIXED_SIZE {
            return Err(malformed("payload shorter than the fixed header"));
        }
        let mut cursor = Cursor::new(bytes);
        let read_u32 = |c: &mut Cursor<&[u8]>| -> Result<u32> {
            c.read_u32::<LittleEndian>()
                .map_err(|_| EngineError::MalformedTable("truncated header".to_string()))
        };

        let header_len = read_u32(&mut cursor)?;
        let column_count = read_u32(&mut cursor)?;
        let row_count = read_u32(&mut cursor)?;
        let row_length = read_u32(&mut cursor)?;
        let row_step = read_u32(&mut cursor)?;
        let data_length = read_u32(&mut cursor)?;
        let layout = TableLayout::from_code(read_u32(&mut cursor)?)?;

        if header_len as usize > bytes.len() || header_len % 4 != 0 {
            return Err(malformed("header length inconsistent with payload"));
        }
        if column_count == 0 {
            return Err(malformed("table needs at least one column"));
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let size = read_u32(&mut cursor)?;
            let data_offset = read_u32(&mut cursor)?;
            let offset = read_u32(&mut cursor)?;
            let ty = PrimType::from_index(read_u32(&mut cursor)?)?;
            columns.push(Column {
                name: String::new(),
                ty,
                size,
                data_offset,
                offset,
            });
        }
        for col in &mut columns {
            let name_len = cursor
                .read_u8()
                .map_err(|_| malformed("truncated column names"))?
                as usize;
            let pos = cursor.position() as usize;
            if pos + name_len > header_len as usize {
                return Err(malformed("column name runs past the header"));
            }
            let name = &bytes[pos..pos + name_len];
            if name_len == 0 || !name.is_ascii() {
                return Err(malformed("column name must be 1-255 ASCII bytes"));
            }
            col.name = String::from_utf8_lossy(name).into_owned();
            cursor.set_position((pos + name_len) as u64);
        }
        if cursor.position() as usize > header_len as usize {
            return Err(malformed("descriptors run past the declared header length"));
        }

        // Cross-field validation.
        let mut index = AHashMap::with_capacity(columns.len());
        let mut width_sum = 0u64;
        for (i, col) in columns.iter().enumerate() {
            Self::validate_column(&col.name, col.ty, col.size as usize)?;
            if index.insert(col.name.clone(), i).is_some() {
                return Err(EngineError::MalformedTable(format!(
                    "duplicate column name '{}'",
                    col.name
                )));
            }
            width_sum += col.size as u64;
            match layout {
                TableLayout::RowMajor => {
                    if u64::from(col.offset) + u64::from(col.size) > u64::from(row_length) {
                        return Err(malformed("column field extends past the row"));
                    }
                }
                TableLayout::ColumnMajor => {
                    if col.offset != 0 {
                        return Err(malformed(
                            "column-major tables carry no in-row field offset",
                        ));
                    }
                }
            }
        }
        if width_sum != row_length as u64 {
            return Err(malformed("row length does not match the column widths"));
        }
        let expected_step = match layout {
            TableLayout::RowMajor => round4(row_length as usize) as u32,
            TableLayout::ColumnMajor => columns[0].size,
        };
        if row_step != expected_step {
            return Err(malformed("row step inconsistent with layout"));
        }
        if u64::from(row_count) * u64::from(row_length) > u64::from(data_length) {
            return Err(malformed("row count exceeds the data length"));
        }
        if Self::header_len_for(&columns) as u32 != header_len {
            return Err(malformed("header length inconsistent with descriptors"));
        }

        Ok((
            TableSchema {
                header_len,
                row_length,
                row_step,
                layout,
                columns,
                index,
            },
            row_count,
            data_length,
        ))
    }

    #[inline]
    pub fn header_len(&self) -> u32 {
        self.header_len
    }

    #[inline]
    pub fn row_length(&self) -> u32 {
        self.row_length
    }

    #[inline]
    pub fn row_step(&self) -> u32 {
        self.row_step
    }

    #[inline]
    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Result<&Column> {
        self.columns.get(index).ok_or_else(|| {
            EngineError::OutOfBounds(format!(
                "column index {} out of {}",
                index,
                self.columns.len()
            ))
        })
    }

    /// Interned column lookup; resolve names once, then address by index.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flight_specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::bstr("origin", 4),
            ColumnSpec::bstr("dest", 4),
            ColumnSpec::new("passengers", PrimType::U32),
            ColumnSpec::bstr("date", 12),
            ColumnSpec::new("distance", PrimType::F32),
        ]
    }

    #[test]
    fn test_build_sorts_by_type_index() {
        let (schema, rows) =
            TableSchema::build(&flight_specs(), 0, TableLayout::RowMajor).unwrap();
        assert_eq!(rows, 0);
        let names: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
        // U32 < F32 < BSTR; BSTR columns keep their declared order.
        assert_eq!(names, ["passengers", "distance", "origin", "dest", "date"]);
        assert_eq!(schema.row_length(), 4 + 4 + 8 + 8 + 16);
        assert_eq!(schema.row_step(), 40);
    }

    #[test]
    fn test_row_major_offsets() {
        let (schema, _) = TableSchema::build(&flight_specs(), 0, TableLayout::RowMajor).unwrap();
        let mut expected = 0;
        for col in schema.columns() {
            assert_eq!(col.offset, expected);
            assert_eq!(col.data_offset, 0);
            expected += col.size;
        }
    }

    #[test]
    fn test_row_step_rounds_to_word() {
        let specs = vec![
            ColumnSpec::new("a", PrimType::U16),
            ColumnSpec::new("b", PrimType::U8),
        ];
        let (schema, _) = TableSchema::build(&specs, 0, TableLayout::RowMajor).unwrap();
        assert_eq!(schema.row_length(), 3);
        assert_eq!(schema.row_step(), 4);
    }

    #[test]
    fn test_column_major_stripes() {
        let specs = vec![
            ColumnSpec::new("id", PrimType::U32),
            ColumnSpec::new("flag", PrimType::U8),
        ];
        // row_length 5, 100 bytes -> 20 rows
        let (schema, rows) = TableSchema::build(&specs, 100, TableLayout::ColumnMajor).unwrap();
        assert_eq!(rows, 20);
        assert_eq!(schema.row_step(), 4);
        assert_eq!(schema.columns()[0].data_offset, 0);
        assert_eq!(schema.columns()[1].data_offset, 80);
        assert!(schema.columns().iter().all(|c| c.offset == 0));
    }

    #[test]
    fn test_column_major_needs_one_row() {
        let specs = vec![ColumnSpec::new("id", PrimType::U32)];
        assert!(TableSchema::build(&specs, 3, TableLayout::ColumnMajor).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let specs = vec![
            ColumnSpec::new("id", PrimType::U32),
            ColumnSpec::new("id", PrimType::I32),
        ];
        assert!(TableSchema::build(&specs, 0, TableLayout::RowMajor).is_err());
    }

    #[test]
    fn test_header_round_trip() {
        let (schema, _) = TableSchema::build(&flight_specs(), 0, TableLayout::RowMajor).unwrap();
        let bytes = schema.header_bytes(3, 120);
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(bytes.len(), schema.header_len() as usize);

        let (parsed, row_count, data_length) = TableSchema::parse(&bytes).unwrap();
        assert_eq!(parsed, schema);
        assert_eq!(row_count, 3);
        assert_eq!(data_length, 120);
    }

    #[test]
    fn test_parse_rejects_unknown_type_index() {
        let (schema, _) = TableSchema::build(&flight_specs(), 0, TableLayout::RowMajor).unwrap();
        let mut bytes = schema.header_bytes(0, 0);
        // First column descriptor's type index word.
        bytes[HEADER_FIXED_SIZE + 12..HEADER_FIXED_SIZE + 16]
            .copy_from_slice(&99u32.to_le_bytes());
        assert!(TableSchema::parse(&bytes).is_err());
    }

    #[test]
    fn test_parse_rejects_inconsistent_counts() {
        let (schema, _) = TableSchema::build(&flight_specs(), 0, TableLayout::RowMajor).unwrap();
        // row_count * row_length > data_length
        let bytes = schema.header_bytes(10, 39);
        assert!(TableSchema::parse(&bytes).is_err());
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let (schema, _) = TableSchema::build(&flight_specs(), 0, TableLayout::RowMajor).unwrap();
        let bytes = schema.header_bytes(0, 0);
        assert!(TableSchema::parse(&bytes[..20]).is_err());
    }

    #[test]
    fn test_column_lookup() {
        let (schema, _) = TableSchema::build(&flight_specs(), 0, TableLayout::RowMajor).unwrap();
        let idx = schema.column_index("distance").unwrap();
        assert_eq!(schema.column(idx).unwrap().ty, PrimType::F32);
        assert!(schema.column_index("altitude").is_none());
        assert!(schema.column(99).is_err());
    }
}
