//! Migration row copy.
//!
//! Relocating a migration group moves its rows from a source node to a
//! destination node in primary-key-ordered batches. The copy driver
//! checks the session interrupt flag between batches and reports copy
//! statistics through tracing when it finishes.

use crate::error::EngineResult;
use crate::session::SessionContext;
use crate::shard::SqlExecutor;
use crate::value::DbValue;
use std::time::Instant;

/// Rows fetched per batch from the source node.
pub const DEFAULT_COPY_BATCH: usize = 1000;

/// Counters for one group copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCopyStats {
    pub rows_copied: u64,
    pub batches: u64,
    pub tables: u64,
}

/// Driver state for copying one migration group's rows.
pub struct RowCopyContext<'a> {
    session: &'a SessionContext,
    gid: i32,
    batch_limit: usize,
    stats: RowCopyStats,
    started: Instant,
}

impl<'a> RowCopyContext<'a> {
    pub fn new(session: &'a SessionContext, gid: i32) -> Self {
        RowCopyContext {
            session,
            gid,
            batch_limit: DEFAULT_COPY_BATCH,
            stats: RowCopyStats::default(),
            started: Instant::now(),
        }
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    pub fn gid(&self) -> i32 {
        self.gid
    }

    pub fn stats(&self) -> RowCopyStats {
        self.stats
    }

    /// Copy one shard table's rows for this group, in `pk_col` order,
    /// `batch_limit` rows at a time. Returns the number of rows copied.
    ///
    /// The interrupt flag is honored at batch boundaries; a partially
    /// copied group is the caller's responsibility to roll back.
    pub fn copy_table_rows(
        &mut self,
        src: &mut dyn SqlExecutor,
        dst: &mut dyn SqlExecutor,
        table: &str,
        pk_col: &str,
        columns: &[&str],
    ) -> EngineResult<u64> {
        let column_list = columns.join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let select_sql = format!(
            "SELECT {column_list} FROM {table} \
             WHERE gid = ? AND {pk_col} > ? ORDER BY {pk_col} LIMIT {limit};",
            limit = self.batch_limit
        );
        let insert_sql = format!("INSERT INTO {table} ({column_list}) VALUES ({placeholders});");

        let pk_index = columns
            .iter()
            .position(|c| *c == pk_col)
            .unwrap_or(0);

        let mut copied = 0u64;
        let mut last_pk = DbValue::Bigint(i64::MIN);
        loop {
            self.session.check_interrupt()?;

            let rows = src.query(&select_sql, &[DbValue::Int(self.gid), last_pk.clone()])?;
            if rows.is_empty() {
                break;
            }
            let short_batch = rows.len() < self.batch_limit;

            for row in &rows {
                dst.update(&insert_sql, row)?;
            }
            copied += rows.len() as u64;
            self.stats.rows_copied += rows.len() as u64;
            self.stats.batches += 1;

            if let Some(row) = rows.last() {
                if let Some(pk) = row.get(pk_index) {
                    last_pk = pk.clone();
                }
            }
            if short_batch {
                break;
            }
        }

        self.stats.tables += 1;
        Ok(copied)
    }

    /// Log the copy counters for this group.
    pub fn dump_stats(&self) {
        tracing::info!(
            gid = self.gid,
            rows_copied = self.stats.rows_copied,
            batches = self.stats.batches,
            tables = self.stats.tables,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "group row copy finished"
        );
    }
}
