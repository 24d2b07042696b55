//! # List Files
//!
//! Disk-backed spillable tuple sequences used for sort, distinct, and
//! temporary materialization. Rows are bincode-encoded onto a tempfile;
//! column domains start `Variable` and bind lazily to the first non-null
//! value observed, after which every incoming value is coerced to the
//! resolved domain before serialization.

use crate::error::{EngineError, EngineResult};
use crate::value::{self, DbValue, Domain};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// One sort key of a list-file sort: 0-based column and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: usize,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: usize) -> Self {
        SortKey {
            column,
            descending: false,
        }
    }
}

type Row = Vec<DbValue>;

/// A disk-backed tuple sequence with lazily resolved column domains.
#[derive(Debug)]
pub struct ListFile {
    domains: Vec<Domain>,
    /// Opened for distinct processing; duplicates removed at sort time
    distinct: bool,
    backing: NamedTempFile,
    writer: Option<BufWriter<File>>,
    tuple_cnt: usize,
}

impl ListFile {
    /// Open a list file with the given column domains.
    pub fn open(
        domains: Vec<Domain>,
        distinct: bool,
        spill_dir: Option<&Path>,
    ) -> EngineResult<Self> {
        let backing = match spill_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(|e| EngineError::OutOfMemory(format!("list file allocation failed: {e}")))?;
        let writer = BufWriter::new(backing.reopen()?);

        Ok(ListFile {
            domains,
            distinct,
            backing,
            writer: Some(writer),
            tuple_cnt: 0,
        })
    }

    /// Open a single-column list file with an unresolved domain, the
    /// shape used by DISTINCT/ordered accumulators.
    pub fn open_single(distinct: bool, spill_dir: Option<&Path>) -> EngineResult<Self> {
        ListFile::open(vec![Domain::variable()], distinct, spill_dir)
    }

    pub fn column_count(&self) -> usize {
        self.domains.len()
    }

    pub fn domain(&self, column: usize) -> &Domain {
        &self.domains[column]
    }

    pub fn tuple_count(&self) -> usize {
        self.tuple_cnt
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Bind a still-`Variable` column domain to the value's domain, or
    /// coerce the value to the already-resolved domain.
    pub fn resolve_or_coerce(&mut self, column: usize, value: &DbValue) -> EngineResult<DbValue> {
        let domain = &mut self.domains[column];
        if domain.is_variable() {
            if !value.is_null() {
                *domain = value.resolve_domain();
            }
            return Ok(value.clone());
        }
        value::coerce_to_domain(value, domain)
    }

    /// Append a pre-serialized row payload.
    pub fn add_item(&mut self, bytes: &[u8]) -> EngineResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(EngineError::InvariantViolation("append to a closed list file"))?;
        let len = bytes.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(bytes)?;
        self.tuple_cnt += 1;
        Ok(())
    }

    /// Resolve domains for a whole row and append it.
    pub fn add_row(&mut self, row: Row) -> EngineResult<()> {
        if row.len() != self.domains.len() {
            return Err(EngineError::InvariantViolation("row arity mismatch"));
        }
        let mut resolved = Vec::with_capacity(row.len());
        for (i, v) in row.iter().enumerate() {
            resolved.push(self.resolve_or_coerce(i, v)?);
        }
        let bytes = bincode::serialize(&resolved)?;
        self.add_item(&bytes)
    }

    /// Single-column convenience append.
    pub fn add_value(&mut self, value: DbValue) -> EngineResult<()> {
        self.add_row(vec![value])
    }

    /// Flush pending writes. Idempotent.
    pub fn close(&mut self) -> EngineResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn read_all_rows(&mut self) -> EngineResult<Vec<Row>> {
        self.close()?;
        let mut scan = self.scan()?;
        let mut rows = Vec::with_capacity(self.tuple_cnt);
        while let Some(row) = scan.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn rewrite(&mut self, rows: &[Row]) -> EngineResult<()> {
        let file = File::create(self.backing.path())?;
        let mut writer = BufWriter::new(file);
        for row in rows {
            let bytes = bincode::serialize(row)?;
            let len = bytes.len() as u32;
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&bytes)?;
        }
        writer.flush()?;
        self.tuple_cnt = rows.len();
        self.writer = None;
        Ok(())
    }

    fn compare_rows(a: &Row, b: &Row, sort: Option<&[SortKey]>) -> Ordering {
        match sort {
            Some(keys) => {
                for key in keys {
                    let (x, y) = (&a[key.column], &b[key.column]);
                    let ord = value::sort_compare(x, y);
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
            None => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = value::sort_compare(x, y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
        }
    }

    /// Sort the file in place, optionally removing duplicate rows.
    ///
    /// Without an explicit sort list the whole row is the key. A failed
    /// rewrite leaves the file destroyed rather than half-written.
    pub fn sort(&mut self, sort: Option<&[SortKey]>, distinct: bool) -> EngineResult<()> {
        let mut rows = self.read_all_rows()?;
        rows.sort_by(|a, b| Self::compare_rows(a, b, sort));
        if distinct {
            rows.dedup_by(|a, b| Self::compare_rows(a, b, None) == Ordering::Equal);
        }
        self.rewrite(&rows)
    }

    /// Sort and keep only the first `limit` rows: the materialization
    /// step of a sort-limit plan.
    pub fn sort_with_limit(&mut self, sort: &[SortKey], limit: usize) -> EngineResult<()> {
        let mut rows = self.read_all_rows()?;
        rows.sort_by(|a, b| Self::compare_rows(a, b, Some(sort)));
        rows.truncate(limit);
        self.rewrite(&rows)
    }

    /// Open a sequential scan over the file's current contents.
    pub fn scan(&self) -> EngineResult<ListScan> {
        let file = File::open(self.backing.path())?;
        Ok(ListScan {
            reader: BufReader::new(file),
        })
    }

    /// Release the backing file.
    pub fn destroy(self) -> EngineResult<()> {
        self.backing.close().map_err(EngineError::Io)
    }
}

/// Sequential reader over a list file.
#[derive(Debug)]
pub struct ListScan {
    reader: BufReader<File>,
}

impl ListScan {
    /// Read the next row, or `None` at end of file.
    pub fn next_row(&mut self) -> EngineResult<Option<Vec<DbValue>>> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;
        let row: Vec<DbValue> = bincode::deserialize(&payload)?;
        Ok(Some(row))
    }
}
