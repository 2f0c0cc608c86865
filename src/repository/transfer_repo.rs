// ==========================================
// 纸卷流转管控系统 - 调拨/审批仓储
// ==========================================
// 红线: 状态推进一律条件 UPDATE (WHERE status=期望值),
//       0 行受影响即并发冲突或非法转换,绝不覆盖终态
// 对齐: weight_transfer / transfer_approval 表
// ==========================================

use crate::domain::transfer::{TransferApproval, WeightTransfer};
use crate::domain::types::{ApprovalStatus, Role, Stage, TransferCategory, TransferStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts, parse_ts_opt};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex};

// ==========================================
// TransferRepository - 调拨单仓储
// ==========================================
pub struct TransferRepository {
    conn: Arc<Mutex<Connection>>,
}

fn map_transfer(row: &Row<'_>) -> rusqlite::Result<(WeightTransfer, String, String, String, String)> {
    // 枚举解析延后到 map 之外,便于返回结构化错误
    Ok((
        WeightTransfer {
            transfer_id: row.get(0)?,
            order_id: row.get(1)?,
            requirement_id: row.get(2)?,
            output_id: row.get(3)?,
            from_stage: Stage::Reservation, // 占位,由调用方回填
            to_stage: Stage::Reservation,
            weight_kg: row.get(6)?,
            category: TransferCategory::Waste, // 占位
            source_warehouse_id: row.get(8)?,
            destination_warehouse_id: row.get(9)?,
            transfer_group_id: row.get(10)?,
            requires_sequential_approval: row.get::<_, i64>(11)? != 0,
            current_approval_sequence: row.get(12)?,
            status: TransferStatus::Pending, // 占位
            created_at: chrono::Utc::now(),  // 占位
            updated_at: chrono::Utc::now(),
        },
        row.get::<_, String>(4)?,  // from_stage
        row.get::<_, String>(5)?,  // to_stage
        row.get::<_, String>(7)?,  // category
        row.get::<_, String>(13)?, // status
    ))
}

const TRANSFER_COLS: &str = "transfer_id, order_id, requirement_id, output_id, from_stage, to_stage, \
     weight_kg, category, source_warehouse_id, destination_warehouse_id, transfer_group_id, \
     requires_sequential_approval, current_approval_sequence, status, created_at, updated_at";

fn finish_transfer(
    raw: (WeightTransfer, String, String, String, String),
    created_at: String,
    updated_at: String,
) -> RepositoryResult<WeightTransfer> {
    let (mut transfer, from_stage, to_stage, category, status) = raw;
    transfer.from_stage = Stage::from_db_str(&from_stage).ok_or_else(|| field_err("from_stage", &from_stage))?;
    transfer.to_stage = Stage::from_db_str(&to_stage).ok_or_else(|| field_err("to_stage", &to_stage))?;
    transfer.category =
        TransferCategory::from_db_str(&category).ok_or_else(|| field_err("category", &category))?;
    transfer.status =
        TransferStatus::from_db_str(&status).ok_or_else(|| field_err("status", &status))?;
    transfer.created_at = parse_ts(&created_at)?;
    transfer.updated_at = parse_ts(&updated_at)?;
    Ok(transfer)
}

fn field_err(field: &str, value: &str) -> RepositoryError {
    RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("无法解析的值: {}", value),
    }
}

fn query_transfers(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> RepositoryResult<Vec<WeightTransfer>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, |row| {
        let raw = map_transfer(row)?;
        let created: String = row.get(14)?;
        let updated: String = row.get(15)?;
        Ok((raw, created, updated))
    })?;

    let mut transfers = Vec::new();
    for row in rows {
        let (raw, created, updated) = row?;
        transfers.push(finish_transfer(raw, created, updated)?);
    }
    Ok(transfers)
}

impl TransferRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 事务内插入调拨单
    pub fn insert_tx(tx: &Transaction<'_>, transfer: &WeightTransfer) -> RepositoryResult<()> {
        tx.execute(
            &format!(
                "INSERT INTO weight_transfer ({}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
                TRANSFER_COLS
            ),
            params![
                transfer.transfer_id,
                transfer.order_id,
                transfer.requirement_id,
                transfer.output_id,
                transfer.from_stage.to_db_str(),
                transfer.to_stage.to_db_str(),
                transfer.weight_kg,
                transfer.category.to_db_str(),
                transfer.source_warehouse_id,
                transfer.destination_warehouse_id,
                transfer.transfer_group_id,
                transfer.requires_sequential_approval as i64,
                transfer.current_approval_sequence,
                transfer.status.to_db_str(),
                format_ts(transfer.created_at),
                format_ts(transfer.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 事务内条件推进状态: 仅当当前状态为 expected 时更新
    ///
    /// 0 行受影响 → ConditionalUpdateFailed (并发方已推进或非法转换)
    pub fn transition_status_tx(
        tx: &Transaction<'_>,
        transfer_id: &str,
        expected: TransferStatus,
        next: TransferStatus,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            "UPDATE weight_transfer
             SET status = ?3, updated_at = datetime('now')
             WHERE transfer_id = ?1 AND status = ?2",
            params![transfer_id, expected.to_db_str(), next.to_db_str()],
        )?;
        if rows == 0 {
            return Err(RepositoryError::ConditionalUpdateFailed {
                entity: "weight_transfer".to_string(),
                id: transfer_id.to_string(),
            });
        }
        Ok(())
    }

    /// 事务内推进当前待决审批序号 (展示口径)
    pub fn bump_approval_sequence_tx(
        tx: &Transaction<'_>,
        transfer_id: &str,
        sequence: i32,
    ) -> RepositoryResult<()> {
        tx.execute(
            "UPDATE weight_transfer
             SET current_approval_sequence = ?2, updated_at = datetime('now')
             WHERE transfer_id = ?1",
            params![transfer_id, sequence],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按ID读取调拨单
    pub fn get(&self, transfer_id: &str) -> RepositoryResult<WeightTransfer> {
        let conn = self.get_conn()?;
        Self::get_with(&conn, transfer_id)
    }

    /// 事务内按ID读取
    pub fn get_tx(tx: &Transaction<'_>, transfer_id: &str) -> RepositoryResult<WeightTransfer> {
        Self::get_with(tx, transfer_id)
    }

    fn get_with(conn: &Connection, transfer_id: &str) -> RepositoryResult<WeightTransfer> {
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM weight_transfer WHERE transfer_id = ?1", TRANSFER_COLS),
                params![transfer_id],
                |row| {
                    let raw = map_transfer(row)?;
                    let created: String = row.get(14)?;
                    let updated: String = row.get(15)?;
                    Ok((raw, created, updated))
                },
            )
            .optional()?;

        match raw {
            Some((raw, created, updated)) => finish_transfer(raw, created, updated),
            None => Err(RepositoryError::NotFound {
                entity: "WeightTransfer".to_string(),
                id: transfer_id.to_string(),
            }),
        }
    }

    /// 同组全部调拨单 (组完成校验依据)
    pub fn list_by_group(&self, transfer_group_id: &str) -> RepositoryResult<Vec<WeightTransfer>> {
        let conn = self.get_conn()?;
        Self::list_by_group_with(&conn, transfer_group_id)
    }

    /// 事务内同组查询
    pub fn list_by_group_tx(
        tx: &Transaction<'_>,
        transfer_group_id: &str,
    ) -> RepositoryResult<Vec<WeightTransfer>> {
        Self::list_by_group_with(tx, transfer_group_id)
    }

    fn list_by_group_with(
        conn: &Connection,
        transfer_group_id: &str,
    ) -> RepositoryResult<Vec<WeightTransfer>> {
        query_transfers(
            conn,
            &format!(
                "SELECT {} FROM weight_transfer WHERE transfer_group_id = ?1 ORDER BY created_at, transfer_id",
                TRANSFER_COLS
            ),
            &[&transfer_group_id],
        )
    }

    /// 订单全部调拨历史 (按创建时间)
    pub fn list_by_order(&self, order_id: &str) -> RepositoryResult<Vec<WeightTransfer>> {
        let conn = self.get_conn()?;
        query_transfers(
            &conn,
            &format!(
                "SELECT {} FROM weight_transfer WHERE order_id = ?1 ORDER BY created_at, transfer_id",
                TRANSFER_COLS
            ),
            &[&order_id],
        )
    }

    /// 指向指定阶段的待审批调拨数 (流转推进阻断判定)
    pub fn count_pending_targeting(&self, order_id: &str, stage: Stage) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM weight_transfer
             WHERE order_id = ?1 AND to_stage = ?2 AND status = 'PENDING'",
            params![order_id, stage.to_db_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 订单在指定类别下已完成的调拨重量合计
    pub fn sum_completed_weight(
        &self,
        order_id: &str,
        category: TransferCategory,
    ) -> RepositoryResult<f64> {
        let conn = self.get_conn()?;
        let sum: Option<f64> = conn.query_row(
            "SELECT SUM(weight_kg) FROM weight_transfer
             WHERE order_id = ?1 AND category = ?2 AND status = 'COMPLETED'",
            params![order_id, category.to_db_str()],
            |row| row.get(0),
        )?;
        Ok(sum.unwrap_or(0.0))
    }
}

// ==========================================
// ApprovalRepository - 审批行仓储
// ==========================================
pub struct ApprovalRepository {
    conn: Arc<Mutex<Connection>>,
}

const APPROVAL_COLS: &str = "approval_id, transfer_id, warehouse_id, required_role, approval_sequence, \
     is_final_approval, status, approver, decided_at, notes, created_at";

fn map_approval(row: &Row<'_>) -> rusqlite::Result<(TransferApproval, String, String, Option<String>, String)> {
    Ok((
        TransferApproval {
            approval_id: row.get(0)?,
            transfer_id: row.get(1)?,
            warehouse_id: row.get(2)?,
            required_role: Role::WarehouseManager, // 占位
            approval_sequence: row.get(4)?,
            is_final_approval: row.get::<_, i64>(5)? != 0,
            status: ApprovalStatus::Pending, // 占位
            approver: row.get(7)?,
            decided_at: None, // 占位
            notes: row.get(9)?,
            created_at: chrono::Utc::now(), // 占位
        },
        row.get::<_, String>(3)?,         // required_role
        row.get::<_, String>(6)?,         // status
        row.get::<_, Option<String>>(8)?, // decided_at
        row.get::<_, String>(10)?,        // created_at
    ))
}

fn finish_approval(
    raw: (TransferApproval, String, String, Option<String>, String),
) -> RepositoryResult<TransferApproval> {
    let (mut approval, role, status, decided_at, created_at) = raw;
    approval.required_role = Role::from_db_str(&role).ok_or_else(|| field_err("required_role", &role))?;
    approval.status =
        ApprovalStatus::from_db_str(&status).ok_or_else(|| field_err("status", &status))?;
    approval.decided_at = parse_ts_opt(decided_at)?;
    approval.created_at = parse_ts(&created_at)?;
    Ok(approval)
}

impl ApprovalRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 事务内插入审批行
    pub fn insert_tx(tx: &Transaction<'_>, approval: &TransferApproval) -> RepositoryResult<()> {
        tx.execute(
            &format!(
                "INSERT INTO transfer_approval ({}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                APPROVAL_COLS
            ),
            params![
                approval.approval_id,
                approval.transfer_id,
                approval.warehouse_id,
                approval.required_role.to_db_str(),
                approval.approval_sequence,
                approval.is_final_approval as i64,
                approval.status.to_db_str(),
                approval.approver,
                approval.decided_at.map(format_ts),
                approval.notes,
                format_ts(approval.created_at),
            ],
        )?;
        Ok(())
    }

    /// 调拨的完整审批链 (按序号升序)
    pub fn list_for_transfer(&self, transfer_id: &str) -> RepositoryResult<Vec<TransferApproval>> {
        let conn = self.get_conn()?;
        Self::list_for_transfer_with(&conn, transfer_id)
    }

    /// 事务内完整审批链
    pub fn list_for_transfer_tx(
        tx: &Transaction<'_>,
        transfer_id: &str,
    ) -> RepositoryResult<Vec<TransferApproval>> {
        Self::list_for_transfer_with(tx, transfer_id)
    }

    fn list_for_transfer_with(
        conn: &Connection,
        transfer_id: &str,
    ) -> RepositoryResult<Vec<TransferApproval>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfer_approval WHERE transfer_id = ?1 ORDER BY approval_sequence",
            APPROVAL_COLS
        ))?;
        let rows = stmt.query_map(params![transfer_id], map_approval)?;

        let mut approvals = Vec::new();
        for row in rows {
            approvals.push(finish_approval(row?)?);
        }
        Ok(approvals)
    }

    /// 最低的未决审批行 (下一个待决层级)
    pub fn next_pending(&self, transfer_id: &str) -> RepositoryResult<Option<TransferApproval>> {
        let conn = self.get_conn()?;
        Self::next_pending_with(&conn, transfer_id)
    }

    /// 事务内最低未决审批行
    pub fn next_pending_tx(
        tx: &Transaction<'_>,
        transfer_id: &str,
    ) -> RepositoryResult<Option<TransferApproval>> {
        Self::next_pending_with(tx, transfer_id)
    }

    fn next_pending_with(
        conn: &Connection,
        transfer_id: &str,
    ) -> RepositoryResult<Option<TransferApproval>> {
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM transfer_approval
                     WHERE transfer_id = ?1 AND status = 'PENDING'
                     ORDER BY approval_sequence LIMIT 1",
                    APPROVAL_COLS
                ),
                params![transfer_id],
                map_approval,
            )
            .optional()?;
        match raw {
            Some(r) => Ok(Some(finish_approval(r)?)),
            None => Ok(None),
        }
    }

    /// 事务内裁决审批行: 仅当该行仍为 PENDING 时落决定
    ///
    /// 两个审批人竞争同一层级时,条件 UPDATE 保证只有一人成功
    pub fn decide_tx(
        tx: &Transaction<'_>,
        transfer_id: &str,
        approval_sequence: i32,
        decision: ApprovalStatus,
        approver: &str,
        notes: Option<&str>,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            "UPDATE transfer_approval
             SET status = ?3, approver = ?4, notes = ?5, decided_at = datetime('now')
             WHERE transfer_id = ?1 AND approval_sequence = ?2 AND status = 'PENDING'",
            params![
                transfer_id,
                approval_sequence,
                decision.to_db_str(),
                approver,
                notes
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::ConditionalUpdateFailed {
                entity: "transfer_approval".to_string(),
                id: format!("{}#{}", transfer_id, approval_sequence),
            });
        }
        Ok(())
    }

    /// 用户的待办审批 (下一层级恰好要求该用户所在仓库+角色)
    ///
    /// 只返回"轮到该用户"的行: 序号等于该调拨当前最小未决序号
    pub fn pending_for_user(&self, user_id: &str) -> RepositoryResult<Vec<TransferApproval>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfer_approval ta
             WHERE ta.status = 'PENDING'
               AND ta.approval_sequence = (
                   SELECT MIN(approval_sequence) FROM transfer_approval
                   WHERE transfer_id = ta.transfer_id AND status = 'PENDING')
               AND EXISTS (
                   SELECT 1 FROM weight_transfer wt
                   WHERE wt.transfer_id = ta.transfer_id AND wt.status = 'PENDING')
               AND EXISTS (
                   SELECT 1 FROM user_role ur
                   WHERE ur.user_id = ?1
                     AND ur.role = ta.required_role
                     AND ur.warehouse_id = ta.warehouse_id)
             ORDER BY ta.created_at, ta.approval_sequence",
            APPROVAL_COLS
        ))?;
        let rows = stmt.query_map(params![user_id], map_approval)?;

        let mut approvals = Vec::new();
        for row in rows {
            approvals.push(finish_approval(row?)?);
        }
        Ok(approvals)
    }
}
