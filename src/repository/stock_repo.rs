// ==========================================
// 纸卷流转管控系统 - 库存台账仓储
// ==========================================
// 红线: 可用量判定与扣减必须是同一条条件 UPDATE (CAS 语义),
//       禁止先读后写的两步操作
// 口径: available = quantity - reserved
// 对齐: stock_ledger 表
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// 浮点可用量判定的比较余量,仅用于 SQL 内的 >= 判定,
/// 防止重复加减的二进制误差误杀恰好相等的扣减
const EPSILON_KG: f64 = 1e-9;

// ==========================================
// StockEntry - 库存行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockEntry {
    pub warehouse_id: String,
    pub material_id: String,
    pub quantity_kg: f64,
    pub reserved_kg: f64,
}

impl StockEntry {
    pub fn available_kg(&self) -> f64 {
        self.quantity_kg - self.reserved_kg
    }
}

// ==========================================
// StockLedgerRepository - 库存台账仓储
// ==========================================
pub struct StockLedgerRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StockLedgerRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 读取库存行
    pub fn get(&self, warehouse_id: &str, material_id: &str) -> RepositoryResult<Option<StockEntry>> {
        let conn = self.get_conn()?;
        Self::get_with(&conn, warehouse_id, material_id)
    }

    /// 可用量 (quantity - reserved),无库存行视为 0
    pub fn available_quantity(&self, warehouse_id: &str, material_id: &str) -> RepositoryResult<f64> {
        Ok(self
            .get(warehouse_id, material_id)?
            .map(|e| e.available_kg())
            .unwrap_or(0.0))
    }

    fn get_with(
        conn: &Connection,
        warehouse_id: &str,
        material_id: &str,
    ) -> RepositoryResult<Option<StockEntry>> {
        let entry = conn
            .query_row(
                "SELECT warehouse_id, material_id, quantity_kg, reserved_kg
                 FROM stock_ledger WHERE warehouse_id = ?1 AND material_id = ?2",
                params![warehouse_id, material_id],
                |row| {
                    Ok(StockEntry {
                        warehouse_id: row.get(0)?,
                        material_id: row.get(1)?,
                        quantity_kg: row.get(2)?,
                        reserved_kg: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// 事务内读取可用量 (组完成校验用)
    pub fn available_quantity_tx(
        tx: &Transaction<'_>,
        warehouse_id: &str,
        material_id: &str,
    ) -> RepositoryResult<f64> {
        Ok(Self::get_with(tx, warehouse_id, material_id)?
            .map(|e| e.available_kg())
            .unwrap_or(0.0))
    }

    // ==========================================
    // 写入操作 (全部条件 UPDATE,原子判定)
    // ==========================================

    /// 入库 (UPSERT)
    pub fn add(&self, warehouse_id: &str, material_id: &str, qty_kg: f64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::add_with(&conn, warehouse_id, material_id, qty_kg)
    }

    fn add_with(
        conn: &Connection,
        warehouse_id: &str,
        material_id: &str,
        qty_kg: f64,
    ) -> RepositoryResult<()> {
        if qty_kg < 0.0 {
            return Err(RepositoryError::FieldValueError {
                field: "qty_kg".to_string(),
                message: format!("入库数量不可为负: {}", qty_kg),
            });
        }
        conn.execute(
            "INSERT INTO stock_ledger (warehouse_id, material_id, quantity_kg, reserved_kg, updated_at)
             VALUES (?1, ?2, ?3, 0, datetime('now'))
             ON CONFLICT(warehouse_id, material_id)
             DO UPDATE SET quantity_kg = quantity_kg + ?3, updated_at = datetime('now')",
            params![warehouse_id, material_id, qty_kg],
        )?;
        Ok(())
    }

    /// 预留: reserved += qty,要求 available >= qty (单条条件 UPDATE)
    pub fn reserve(&self, warehouse_id: &str, material_id: &str, qty_kg: f64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE stock_ledger
             SET reserved_kg = reserved_kg + ?3, updated_at = datetime('now')
             WHERE warehouse_id = ?1 AND material_id = ?2
               AND quantity_kg - reserved_kg >= ?3 - ?4",
            params![warehouse_id, material_id, qty_kg, EPSILON_KG],
        )?;
        if rows == 0 {
            let available = Self::get_with(&conn, warehouse_id, material_id)?
                .map(|e| e.available_kg())
                .unwrap_or(0.0);
            return Err(RepositoryError::InsufficientStock {
                warehouse_id: warehouse_id.to_string(),
                material_id: material_id.to_string(),
                requested_kg: qty_kg,
                available_kg: available,
            });
        }
        Ok(())
    }

    /// 提取: reserved -= qty, quantity -= qty,要求 reserved >= qty
    pub fn extract(&self, warehouse_id: &str, material_id: &str, qty_kg: f64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE stock_ledger
             SET reserved_kg = reserved_kg - ?3,
                 quantity_kg = quantity_kg - ?3,
                 updated_at = datetime('now')
             WHERE warehouse_id = ?1 AND material_id = ?2
               AND reserved_kg >= ?3 - ?4 AND quantity_kg >= ?3 - ?4",
            params![warehouse_id, material_id, qty_kg, EPSILON_KG],
        )?;
        if rows == 0 {
            let entry = Self::get_with(&conn, warehouse_id, material_id)?;
            return Err(RepositoryError::InsufficientStock {
                warehouse_id: warehouse_id.to_string(),
                material_id: material_id.to_string(),
                requested_kg: qty_kg,
                available_kg: entry.map(|e| e.reserved_kg).unwrap_or(0.0),
            });
        }
        Ok(())
    }

    /// 出库 (废料处置等): quantity -= qty,要求 available >= qty
    pub fn remove(&self, warehouse_id: &str, material_id: &str, qty_kg: f64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::remove_tx_inner(&conn, warehouse_id, material_id, qty_kg)
    }

    /// 事务内出库
    pub fn remove_tx(
        tx: &Transaction<'_>,
        warehouse_id: &str,
        material_id: &str,
        qty_kg: f64,
    ) -> RepositoryResult<()> {
        Self::remove_tx_inner(tx, warehouse_id, material_id, qty_kg)
    }

    fn remove_tx_inner(
        conn: &Connection,
        warehouse_id: &str,
        material_id: &str,
        qty_kg: f64,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE stock_ledger
             SET quantity_kg = quantity_kg - ?3, updated_at = datetime('now')
             WHERE warehouse_id = ?1 AND material_id = ?2
               AND quantity_kg - reserved_kg >= ?3 - ?4",
            params![warehouse_id, material_id, qty_kg, EPSILON_KG],
        )?;
        if rows == 0 {
            let available = Self::get_with(conn, warehouse_id, material_id)?
                .map(|e| e.available_kg())
                .unwrap_or(0.0);
            return Err(RepositoryError::InsufficientStock {
                warehouse_id: warehouse_id.to_string(),
                material_id: material_id.to_string(),
                requested_kg: qty_kg,
                available_kg: available,
            });
        }
        Ok(())
    }

    /// 事务内仓库间调拨: 源仓条件扣减 + 目的仓 UPSERT 加量
    ///
    /// 扣减失败时返回 InsufficientStock,由持有事务的服务层整体回滚
    pub fn transfer_tx(
        tx: &Transaction<'_>,
        from_warehouse_id: &str,
        to_warehouse_id: &str,
        material_id: &str,
        qty_kg: f64,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            "UPDATE stock_ledger
             SET quantity_kg = quantity_kg - ?3, updated_at = datetime('now')
             WHERE warehouse_id = ?1 AND material_id = ?2
               AND quantity_kg - reserved_kg >= ?3 - ?4",
            params![from_warehouse_id, material_id, qty_kg, EPSILON_KG],
        )?;
        if rows == 0 {
            let available = Self::get_with(tx, from_warehouse_id, material_id)?
                .map(|e| e.available_kg())
                .unwrap_or(0.0);
            return Err(RepositoryError::InsufficientStock {
                warehouse_id: from_warehouse_id.to_string(),
                material_id: material_id.to_string(),
                requested_kg: qty_kg,
                available_kg: available,
            });
        }
        Self::add_with(tx, to_warehouse_id, material_id, qty_kg)?;
        Ok(())
    }
}
