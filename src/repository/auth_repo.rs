// ==========================================
// 纸卷流转管控系统 - 授权/前置核验仓储
// ==========================================
// 职责: 用户角色-仓库指派查询 + 调拨前置核验请求
// 对齐: user_role / verification_request 表
// ==========================================

use crate::domain::types::Role;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Transaction};
use std::sync::{Arc, Mutex};

// ==========================================
// UserRoleRepository - 用户角色仓储
// ==========================================
pub struct UserRoleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl UserRoleRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 授予角色 (幂等)
    pub fn grant(&self, user_id: &str, role: Role, warehouse_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO user_role (user_id, role, warehouse_id) VALUES (?1, ?2, ?3)",
            params![user_id, role.to_db_str(), warehouse_id],
        )?;
        Ok(())
    }

    /// 用户是否持有角色 (任意仓库)
    pub fn has_role(&self, user_id: &str, role: Role) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_role WHERE user_id = ?1 AND role = ?2",
            params![user_id, role.to_db_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 用户是否指派到仓库
    pub fn is_assigned_to_warehouse(&self, user_id: &str, warehouse_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_role WHERE user_id = ?1 AND warehouse_id = ?2",
            params![user_id, warehouse_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 用户在指定仓库是否持有指定角色 (审批匹配口径)
    pub fn holds_role_at(
        &self,
        user_id: &str,
        role: Role,
        warehouse_id: &str,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM user_role
             WHERE user_id = ?1 AND role = ?2 AND warehouse_id = ?3",
            params![user_id, role.to_db_str(), warehouse_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

// ==========================================
// VerificationRequestRepository - 前置核验请求仓储
// ==========================================
// 外部库存核验等前置请求未完成时,审批动作被 RequestsPending 阻断
pub struct VerificationRequestRepository {
    conn: Arc<Mutex<Connection>>,
}

impl VerificationRequestRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建前置核验请求
    pub fn create(
        &self,
        request_id: &str,
        transfer_id: &str,
        request_type: &str,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO verification_request (request_id, transfer_id, request_type, status, created_at)
             VALUES (?1, ?2, ?3, 'PENDING', datetime('now'))",
            params![request_id, transfer_id, request_type],
        )?;
        Ok(())
    }

    /// 完成核验请求
    pub fn complete(&self, request_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE verification_request
             SET status = 'COMPLETED', completed_at = datetime('now')
             WHERE request_id = ?1 AND status = 'PENDING'",
            params![request_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::ConditionalUpdateFailed {
                entity: "verification_request".to_string(),
                id: request_id.to_string(),
            });
        }
        Ok(())
    }

    /// 调拨未完成的核验请求数
    pub fn count_open_for_transfer(&self, transfer_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM verification_request
             WHERE transfer_id = ?1 AND status = 'PENDING'",
            params![transfer_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 事务内查询未完成核验请求数
    pub fn count_open_for_transfer_tx(
        tx: &Transaction<'_>,
        transfer_id: &str,
    ) -> RepositoryResult<i64> {
        Self::count_open_with(tx, transfer_id)
    }

    fn count_open_with(conn: &Connection, transfer_id: &str) -> RepositoryResult<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM verification_request
             WHERE transfer_id = ?1 AND status = 'PENDING'",
            params![transfer_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
