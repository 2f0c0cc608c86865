// ==========================================
// 纸卷流转管控系统 - 物料需求仓储
// ==========================================
// 红线: 累计重量只通过 add_stage_weight_tx 原子追加,
//       禁止读出-修改-写回
// 对齐: order_material 表
// ==========================================

use crate::domain::material::{MaterialRequirement, RollSpec};
use crate::domain::types::Stage;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex};

pub struct MaterialRequirementRepository {
    conn: Arc<Mutex<Connection>>,
}

const REQUIREMENT_COLS: &str = "requirement_id, order_id, material_id, requested_weight_kg, \
     extracted_weight_kg, sorted_weight_kg, cut_weight_kg, delivered_weight_kg, waste_weight_kg, \
     roll_width_mm, roll_grammage_gsm, roll_quality_grade, roll_length_m, roll_batch_no, \
     roll_number, created_at, updated_at";

fn map_requirement(row: &Row<'_>) -> rusqlite::Result<(MaterialRequirement, String, String)> {
    Ok((
        MaterialRequirement {
            requirement_id: row.get(0)?,
            order_id: row.get(1)?,
            material_id: row.get(2)?,
            requested_weight_kg: row.get(3)?,
            extracted_weight_kg: row.get(4)?,
            sorted_weight_kg: row.get(5)?,
            cut_weight_kg: row.get(6)?,
            delivered_weight_kg: row.get(7)?,
            waste_weight_kg: row.get(8)?,
            roll_spec: RollSpec {
                width_mm: row.get(9)?,
                grammage_gsm: row.get(10)?,
                quality_grade: row.get(11)?,
                length_m: row.get(12)?,
                batch_no: row.get(13)?,
                roll_number: row.get(14)?,
            },
            created_at: chrono::Utc::now(), // 占位
            updated_at: chrono::Utc::now(),
        },
        row.get::<_, String>(15)?,
        row.get::<_, String>(16)?,
    ))
}

fn finish_requirement(
    raw: (MaterialRequirement, String, String),
) -> RepositoryResult<MaterialRequirement> {
    let (mut req, created, updated) = raw;
    req.created_at = parse_ts(&created)?;
    req.updated_at = parse_ts(&updated)?;
    Ok(req)
}

impl MaterialRequirementRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入物料需求行
    pub fn insert(&self, req: &MaterialRequirement) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO order_material ({}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
                REQUIREMENT_COLS
            ),
            params![
                req.requirement_id,
                req.order_id,
                req.material_id,
                req.requested_weight_kg,
                req.extracted_weight_kg,
                req.sorted_weight_kg,
                req.cut_weight_kg,
                req.delivered_weight_kg,
                req.waste_weight_kg,
                req.roll_spec.width_mm,
                req.roll_spec.grammage_gsm,
                req.roll_spec.quality_grade,
                req.roll_spec.length_m,
                req.roll_spec.batch_no,
                req.roll_spec.roll_number,
                format_ts(req.created_at),
                format_ts(req.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 按ID读取
    pub fn get(&self, requirement_id: &str) -> RepositoryResult<MaterialRequirement> {
        let conn = self.get_conn()?;
        Self::get_with(&conn, requirement_id)
    }

    /// 事务内按ID读取
    pub fn get_tx(tx: &Transaction<'_>, requirement_id: &str) -> RepositoryResult<MaterialRequirement> {
        Self::get_with(tx, requirement_id)
    }

    fn get_with(conn: &Connection, requirement_id: &str) -> RepositoryResult<MaterialRequirement> {
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM order_material WHERE requirement_id = ?1",
                    REQUIREMENT_COLS
                ),
                params![requirement_id],
                map_requirement,
            )
            .optional()?;
        match raw {
            Some(r) => finish_requirement(r),
            None => Err(RepositoryError::NotFound {
                entity: "MaterialRequirement".to_string(),
                id: requirement_id.to_string(),
            }),
        }
    }

    /// 订单全部物料行
    pub fn list_by_order(&self, order_id: &str) -> RepositoryResult<Vec<MaterialRequirement>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM order_material WHERE order_id = ?1 ORDER BY created_at, requirement_id",
            REQUIREMENT_COLS
        ))?;
        let rows = stmt.query_map(params![order_id], map_requirement)?;

        let mut requirements = Vec::new();
        for row in rows {
            requirements.push(finish_requirement(row?)?);
        }
        Ok(requirements)
    }

    /// 事务内原子追加阶段累计重量
    ///
    /// stage → 对应列: SORTING→sorted, CUTTING→cut, DELIVERY→delivered
    /// 废料走 add_waste_weight_tx
    pub fn add_stage_weight_tx(
        tx: &Transaction<'_>,
        requirement_id: &str,
        stage: Stage,
        delta_kg: f64,
    ) -> RepositoryResult<()> {
        let column = match stage {
            Stage::Sorting => "sorted_weight_kg",
            Stage::Cutting => "cut_weight_kg",
            Stage::Delivery => "delivered_weight_kg",
            other => {
                return Err(RepositoryError::FieldValueError {
                    field: "stage".to_string(),
                    message: format!("阶段{}无累计重量列", other),
                })
            }
        };
        // column 来自上方白名单,不存在注入面
        let rows = tx.execute(
            &format!(
                "UPDATE order_material SET {} = {} + ?2, updated_at = datetime('now')
                 WHERE requirement_id = ?1",
                column, column
            ),
            params![requirement_id, delta_kg],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "MaterialRequirement".to_string(),
                id: requirement_id.to_string(),
            });
        }
        Ok(())
    }

    /// 事务内原子追加废料累计重量
    pub fn add_waste_weight_tx(
        tx: &Transaction<'_>,
        requirement_id: &str,
        delta_kg: f64,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            "UPDATE order_material
             SET waste_weight_kg = waste_weight_kg + ?2, updated_at = datetime('now')
             WHERE requirement_id = ?1",
            params![requirement_id, delta_kg],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "MaterialRequirement".to_string(),
                id: requirement_id.to_string(),
            });
        }
        Ok(())
    }

    /// 事务内原子追加已提取重量
    pub fn add_extracted_weight_tx(
        tx: &Transaction<'_>,
        requirement_id: &str,
        delta_kg: f64,
    ) -> RepositoryResult<()> {
        let rows = tx.execute(
            "UPDATE order_material
             SET extracted_weight_kg = extracted_weight_kg + ?2, updated_at = datetime('now')
             WHERE requirement_id = ?1",
            params![requirement_id, delta_kg],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "MaterialRequirement".to_string(),
                id: requirement_id.to_string(),
            });
        }
        Ok(())
    }
}
