// ==========================================
// 纸卷流转管控系统 - 订单/阶段处理仓储
// ==========================================
// 红线: stage_transition_log 只追加,无 UPDATE/DELETE 接口
// 对齐: pipeline_order / stage_processing / stage_transition_log 表
// ==========================================

use crate::domain::order::{PipelineOrder, StageProcessing, StageTransitionLog};
use crate::domain::types::{OrderStatus, Stage, StageStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts, parse_ts_opt};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex};

pub struct OrderRepository {
    conn: Arc<Mutex<Connection>>,
}

fn map_order(row: &Row<'_>) -> rusqlite::Result<(PipelineOrder, String, String, String, String)> {
    Ok((
        PipelineOrder {
            order_id: row.get(0)?,
            order_no: row.get(1)?,
            current_stage: Stage::Reservation, // 占位
            status: OrderStatus::Active,       // 占位
            urgent_flag: row.get::<_, i64>(4)? != 0,
            payment_received: row.get::<_, i64>(5)? != 0,
            created_at: chrono::Utc::now(), // 占位
            updated_at: chrono::Utc::now(),
        },
        row.get::<_, String>(2)?, // current_stage
        row.get::<_, String>(3)?, // status
        row.get::<_, String>(6)?, // created_at
        row.get::<_, String>(7)?, // updated_at
    ))
}

fn finish_order(
    raw: (PipelineOrder, String, String, String, String),
) -> RepositoryResult<PipelineOrder> {
    let (mut order, stage, status, created, updated) = raw;
    order.current_stage = Stage::from_db_str(&stage).ok_or_else(|| RepositoryError::FieldValueError {
        field: "current_stage".to_string(),
        message: format!("无法解析的值: {}", stage),
    })?;
    order.status = OrderStatus::from_db_str(&status).ok_or_else(|| RepositoryError::FieldValueError {
        field: "status".to_string(),
        message: format!("无法解析的值: {}", status),
    })?;
    order.created_at = parse_ts(&created)?;
    order.updated_at = parse_ts(&updated)?;
    Ok(order)
}

impl OrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 订单
    // ==========================================

    /// 插入订单 (含预留阶段处理行)
    pub fn insert(&self, order: &PipelineOrder) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        tx.execute(
            "INSERT INTO pipeline_order
             (order_id, order_no, current_stage, status, urgent_flag, payment_received, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                order.order_id,
                order.order_no,
                order.current_stage.to_db_str(),
                order.status.to_db_str(),
                order.urgent_flag as i64,
                order.payment_received as i64,
                format_ts(order.created_at),
                format_ts(order.updated_at),
            ],
        )?;
        // 起始阶段处理行同步创建
        Self::upsert_processing_tx(&tx, &order.order_id, order.current_stage, StageStatus::InProgress)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 按ID读取订单
    pub fn get(&self, order_id: &str) -> RepositoryResult<PipelineOrder> {
        let conn = self.get_conn()?;
        Self::get_with(&conn, order_id)
    }

    /// 事务内按ID读取
    pub fn get_tx(tx: &Transaction<'_>, order_id: &str) -> RepositoryResult<PipelineOrder> {
        Self::get_with(tx, order_id)
    }

    fn get_with(conn: &Connection, order_id: &str) -> RepositoryResult<PipelineOrder> {
        let raw = conn
            .query_row(
                "SELECT order_id, order_no, current_stage, status, urgent_flag, payment_received,
                        created_at, updated_at
                 FROM pipeline_order WHERE order_id = ?1",
                params![order_id],
                map_order,
            )
            .optional()?;
        match raw {
            Some(r) => finish_order(r),
            None => Err(RepositoryError::NotFound {
                entity: "PipelineOrder".to_string(),
                id: order_id.to_string(),
            }),
        }
    }

    /// 更新订单状态 (取消/交付)
    pub fn set_status(&self, order_id: &str, status: OrderStatus) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE pipeline_order SET status = ?2, updated_at = datetime('now') WHERE order_id = ?1",
            params![order_id, status.to_db_str()],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "PipelineOrder".to_string(),
                id: order_id.to_string(),
            });
        }
        Ok(())
    }

    /// 设置结算完成标志
    pub fn set_payment_received(&self, order_id: &str, received: bool) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE pipeline_order SET payment_received = ?2, updated_at = datetime('now')
             WHERE order_id = ?1",
            params![order_id, received as i64],
        )?;
        Ok(())
    }

    /// 事务内推进订单当前阶段指针
    pub fn move_to_stage_tx(
        tx: &Transaction<'_>,
        order_id: &str,
        stage: Stage,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            "UPDATE pipeline_order SET current_stage = ?2, updated_at = datetime('now')
             WHERE order_id = ?1",
            params![order_id, stage.to_db_str()],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "PipelineOrder".to_string(),
                id: order_id.to_string(),
            });
        }
        Ok(())
    }

    /// 事务内更新订单状态
    pub fn set_status_tx(
        tx: &Transaction<'_>,
        order_id: &str,
        status: OrderStatus,
    ) -> RepositoryResult<()> {
        tx.execute(
            "UPDATE pipeline_order SET status = ?2, updated_at = datetime('now') WHERE order_id = ?1",
            params![order_id, status.to_db_str()],
        )?;
        Ok(())
    }

    // ==========================================
    // 阶段处理记录
    // ==========================================

    /// 读取阶段处理记录
    pub fn get_processing(
        &self,
        order_id: &str,
        stage: Stage,
    ) -> RepositoryResult<Option<StageProcessing>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                "SELECT order_id, stage, status, started_at, completed_at
                 FROM stage_processing WHERE order_id = ?1 AND stage = ?2",
                params![order_id, stage.to_db_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        match raw {
            Some((order_id, stage_s, status_s, started, completed)) => {
                let stage =
                    Stage::from_db_str(&stage_s).ok_or_else(|| RepositoryError::FieldValueError {
                        field: "stage".to_string(),
                        message: format!("无法解析的值: {}", stage_s),
                    })?;
                let status = StageStatus::from_db_str(&status_s).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "status".to_string(),
                        message: format!("无法解析的值: {}", status_s),
                    }
                })?;
                Ok(Some(StageProcessing {
                    order_id,
                    stage,
                    status,
                    started_at: parse_ts_opt(started)?,
                    completed_at: parse_ts_opt(completed)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// 事务内写入/激活阶段处理记录
    pub fn upsert_processing_tx(
        tx: &Transaction<'_>,
        order_id: &str,
        stage: Stage,
        status: StageStatus,
    ) -> RepositoryResult<()> {
        let started = if status == StageStatus::InProgress {
            Some(format_ts(chrono::Utc::now()))
        } else {
            None
        };
        tx.execute(
            "INSERT INTO stage_processing (order_id, stage, status, started_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(order_id, stage)
             DO UPDATE SET status = ?3,
                           started_at = COALESCE(stage_processing.started_at, ?4)",
            params![order_id, stage.to_db_str(), status.to_db_str(), started],
        )?;
        Ok(())
    }

    /// 标记阶段完成
    pub fn complete_processing(&self, order_id: &str, stage: Stage) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE stage_processing
             SET status = 'COMPLETED', completed_at = datetime('now')
             WHERE order_id = ?1 AND stage = ?2 AND status != 'COMPLETED'",
            params![order_id, stage.to_db_str()],
        )?;
        if rows == 0 {
            return Err(RepositoryError::ConditionalUpdateFailed {
                entity: "stage_processing".to_string(),
                id: format!("{}#{}", order_id, stage),
            });
        }
        Ok(())
    }

    // ==========================================
    // 阶段迁移日志 (只追加)
    // ==========================================

    /// 事务内追加迁移日志
    pub fn append_transition_tx(
        tx: &Transaction<'_>,
        log: &StageTransitionLog,
    ) -> RepositoryResult<()> {
        tx.execute(
            "INSERT INTO stage_transition_log
             (log_id, order_id, previous_stage, new_stage, actor, transitioned_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                log.log_id,
                log.order_id,
                log.previous_stage.to_db_str(),
                log.new_stage.to_db_str(),
                log.actor,
                format_ts(log.transitioned_at),
            ],
        )?;
        Ok(())
    }

    /// 订单迁移日志 (时间升序)
    pub fn list_transitions(&self, order_id: &str) -> RepositoryResult<Vec<StageTransitionLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT log_id, order_id, previous_stage, new_stage, actor, transitioned_at
             FROM stage_transition_log WHERE order_id = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![order_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut logs = Vec::new();
        for row in rows {
            let (log_id, order_id, prev, next, actor, ts) = row?;
            logs.push(StageTransitionLog {
                log_id,
                order_id,
                previous_stage: Stage::from_db_str(&prev).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "previous_stage".to_string(),
                        message: format!("无法解析的值: {}", prev),
                    }
                })?,
                new_stage: Stage::from_db_str(&next).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "new_stage".to_string(),
                        message: format!("无法解析的值: {}", next),
                    }
                })?,
                actor,
                transitioned_at: parse_ts(&ts)?,
            });
        }
        Ok(logs)
    }
}
