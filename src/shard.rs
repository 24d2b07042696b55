//! Shard catalog bookkeeping.
//!
//! Two system tables track migration-group membership and removal:
//! `ct_shard_gid_skey_info(gid, skey)` and
//! `ct_shard_gid_removed_info(gid, rem_dt)`. All operations issue
//! parameterized SQL through the [`SqlExecutor`] collaborator with
//! authorization suspended, since catalog bookkeeping runs as system.

use crate::error::{EngineError, EngineResult};
use crate::value::{Collation, DbValue};
use chrono::NaiveDateTime;

/// Group id designating non-shard (global) tables.
pub const GLOBAL_GROUPID: i32 = 0;

/// Maximum shard key length in bytes.
pub const SHARD_SKEY_LENGTH: usize = 255;

pub const CT_SHARD_GID_SKEY_INFO_NAME: &str = "ct_shard_gid_skey_info";
pub const CT_SHARD_GID_REMOVED_INFO_NAME: &str = "ct_shard_gid_removed_info";

/// The slice of the SQL layer the catalog bookkeeping and the migration
/// row copy drive.
pub trait SqlExecutor {
    /// Execute a parameterized query; returns the result rows.
    fn query(&mut self, sql: &str, params: &[DbValue]) -> EngineResult<Vec<Vec<DbValue>>>;

    /// Execute a parameterized DML statement; returns the affected row
    /// count.
    fn update(&mut self, sql: &str, params: &[DbValue]) -> EngineResult<usize>;

    /// Suspend or restore authorization checks for system-run
    /// statements. Default: authorization is not modeled.
    fn set_authorization(&mut self, _enabled: bool) {}
}

/// One (group id, shard key) membership row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GidSkeyInfo {
    pub gid: i32,
    pub skey: String,
}

/// One removal-queue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GidRemovedInfo {
    pub gid: i32,
    pub rem_dt: NaiveDateTime,
}

fn clamp_skey(skey: &str) -> &str {
    crate::value::truncate_on_char_boundary(skey, SHARD_SKEY_LENGTH)
}

fn reject_global_gid(gid: i32) -> EngineResult<()> {
    if gid == GLOBAL_GROUPID {
        return Err(EngineError::Executor(
            "the global group id cannot appear in the shard catalog".into(),
        ));
    }
    Ok(())
}

fn update_as_system(
    executor: &mut dyn SqlExecutor,
    sql: &str,
    params: &[DbValue],
) -> EngineResult<usize> {
    executor.set_authorization(false);
    let result = executor.update(sql, params);
    executor.set_authorization(true);
    result
}

/// Register a (gid, skey) membership row.
pub fn insert_gid_skey_info(
    executor: &mut dyn SqlExecutor,
    gid: i32,
    skey: &str,
) -> EngineResult<()> {
    reject_global_gid(gid)?;
    let sql = format!(
        "INSERT INTO {CT_SHARD_GID_SKEY_INFO_NAME} (gid, skey) VALUES (?, ?);"
    );
    update_as_system(
        executor,
        &sql,
        &[
            DbValue::Int(gid),
            DbValue::Varchar(clamp_skey(skey).to_string(), Collation::default()),
        ],
    )?;
    Ok(())
}

/// Drop every membership row of a group.
pub fn delete_gid_skey_info_by_gid(
    executor: &mut dyn SqlExecutor,
    gid: i32,
) -> EngineResult<usize> {
    let sql = format!("DELETE FROM {CT_SHARD_GID_SKEY_INFO_NAME} WHERE gid = ?;");
    update_as_system(executor, &sql, &[DbValue::Int(gid)])
}

/// Look up one membership row by (gid, skey).
pub fn select_gid_skey_info(
    executor: &mut dyn SqlExecutor,
    gid: i32,
    skey: &str,
) -> EngineResult<Option<GidSkeyInfo>> {
    let sql = format!(
        "SELECT gid, skey FROM {CT_SHARD_GID_SKEY_INFO_NAME} WHERE gid = ? AND skey = ?;"
    );
    let rows = executor.query(
        &sql,
        &[
            DbValue::Int(gid),
            DbValue::Varchar(clamp_skey(skey).to_string(), Collation::default()),
        ],
    )?;

    let Some(row) = rows.into_iter().next() else {
        return Ok(None);
    };
    let gid = match row.first() {
        Some(DbValue::Int(g)) => *g,
        _ => return Err(EngineError::Executor("malformed gid column".into())),
    };
    let skey = match row.get(1) {
        Some(DbValue::Varchar(s, _)) => s.clone(),
        _ => return Err(EngineError::Executor("malformed skey column".into())),
    };
    Ok(Some(GidSkeyInfo { gid, skey }))
}

/// Queue a group for removal, stamping the current datetime.
pub fn insert_gid_removed_info(executor: &mut dyn SqlExecutor, gid: i32) -> EngineResult<()> {
    reject_global_gid(gid)?;
    let sql = format!(
        "INSERT INTO {CT_SHARD_GID_REMOVED_INFO_NAME} (gid, rem_dt) VALUES (?, SYS_DATETIME);"
    );
    update_as_system(executor, &sql, &[DbValue::Int(gid)])?;
    Ok(())
}

/// Unqueue a group from removal.
pub fn delete_gid_removed_info_by_gid(
    executor: &mut dyn SqlExecutor,
    gid: i32,
) -> EngineResult<usize> {
    let sql = format!("DELETE FROM {CT_SHARD_GID_REMOVED_INFO_NAME} WHERE gid = ?;");
    update_as_system(executor, &sql, &[DbValue::Int(gid)])
}

/// Look up a group's removal record.
pub fn select_gid_removed_info(
    executor: &mut dyn SqlExecutor,
    gid: i32,
) -> EngineResult<Option<GidRemovedInfo>> {
    let sql = format!(
        "SELECT gid, rem_dt FROM {CT_SHARD_GID_REMOVED_INFO_NAME} WHERE gid = ?;"
    );
    let rows = executor.query(&sql, &[DbValue::Int(gid)])?;

    let Some(row) = rows.into_iter().next() else {
        return Ok(None);
    };
    let gid = match row.first() {
        Some(DbValue::Int(g)) => *g,
        _ => return Err(EngineError::Executor("malformed gid column".into())),
    };
    let rem_dt = match row.get(1) {
        Some(DbValue::Datetime(dt)) => *dt,
        _ => return Err(EngineError::Executor("malformed rem_dt column".into())),
    };
    Ok(Some(GidRemovedInfo { gid, rem_dt }))
}
