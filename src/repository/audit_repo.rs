// ==========================================
// 纸卷流转管控系统 - 审计日志仓储
// ==========================================
// 红线: 只追加,核心逻辑从不回读 (查询接口仅供报表层)
// 对齐: audit_log 表
// ==========================================

use crate::domain::audit_log::AuditLog;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use rusqlite::{params, Connection, Transaction};
use std::sync::{Arc, Mutex};

pub struct AuditLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加审计日志
    pub fn insert(&self, log: &AuditLog) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, log)
    }

    /// 事务内追加审计日志
    pub fn insert_tx(tx: &Transaction<'_>, log: &AuditLog) -> RepositoryResult<()> {
        Self::insert_with(tx, log)
    }

    fn insert_with(conn: &Connection, log: &AuditLog) -> RepositoryResult<()> {
        conn.execute(
            "INSERT INTO audit_log
             (audit_id, event_type, order_id, transfer_id, actor, payload_json, detail, event_ts)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                log.audit_id,
                log.event_type,
                log.order_id,
                log.transfer_id,
                log.actor,
                log.payload_json.as_ref().map(|v| v.to_string()),
                log.detail,
                format_ts(log.event_ts),
            ],
        )?;
        Ok(())
    }

    /// 按调拨单查询 (报表层用)
    pub fn list_by_transfer(&self, transfer_id: &str) -> RepositoryResult<Vec<AuditLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT audit_id, event_type, order_id, transfer_id, actor, payload_json, detail, event_ts
             FROM audit_log WHERE transfer_id = ?1 ORDER BY event_ts, audit_id",
        )?;
        let rows = stmt.query_map(params![transfer_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut logs = Vec::new();
        for row in rows {
            let (audit_id, event_type, order_id, transfer_id, actor, payload, detail, ts) = row?;
            logs.push(AuditLog {
                audit_id,
                event_type,
                order_id,
                transfer_id,
                actor,
                payload_json: payload.and_then(|p| serde_json::from_str(&p).ok()),
                detail,
                event_ts: parse_ts(&ts)?,
            });
        }
        Ok(logs)
    }
}
