// ==========================================
// 纸卷流转管控系统 - 阶段产出仓储
// ==========================================
// 对齐: stage_output 表
// ==========================================

use crate::domain::stage_output::StageOutput;
use crate::domain::types::Stage;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex};

pub struct StageOutputRepository {
    conn: Arc<Mutex<Connection>>,
}

const OUTPUT_COLS: &str = "output_id, order_id, requirement_id, stage, input_weight_kg, \
     roll1_weight_kg, roll2_weight_kg, cut_weight_kg, remainder_weight_kg, waste_weight_kg, \
     quality_grade, approved, recorded_by, recorded_at";

fn map_output(row: &Row<'_>) -> rusqlite::Result<(StageOutput, String, String)> {
    Ok((
        StageOutput {
            output_id: row.get(0)?,
            order_id: row.get(1)?,
            requirement_id: row.get(2)?,
            stage: Stage::Sorting, // 占位
            input_weight_kg: row.get(4)?,
            roll1_weight_kg: row.get(5)?,
            roll2_weight_kg: row.get(6)?,
            cut_weight_kg: row.get(7)?,
            remainder_weight_kg: row.get(8)?,
            waste_weight_kg: row.get(9)?,
            quality_grade: row.get(10)?,
            approved: row.get::<_, i64>(11)? != 0,
            recorded_by: row.get(12)?,
            recorded_at: chrono::Utc::now(), // 占位
        },
        row.get::<_, String>(3)?,  // stage
        row.get::<_, String>(13)?, // recorded_at
    ))
}

fn finish_output(raw: (StageOutput, String, String)) -> RepositoryResult<StageOutput> {
    let (mut output, stage, recorded_at) = raw;
    output.stage = Stage::from_db_str(&stage).ok_or_else(|| RepositoryError::FieldValueError {
        field: "stage".to_string(),
        message: format!("无法解析的值: {}", stage),
    })?;
    output.recorded_at = parse_ts(&recorded_at)?;
    Ok(output)
}

impl StageOutputRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 事务内插入阶段产出
    pub fn insert_tx(tx: &Transaction<'_>, output: &StageOutput) -> RepositoryResult<()> {
        tx.execute(
            &format!(
                "INSERT INTO stage_output ({}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                OUTPUT_COLS
            ),
            params![
                output.output_id,
                output.order_id,
                output.requirement_id,
                output.stage.to_db_str(),
                output.input_weight_kg,
                output.roll1_weight_kg,
                output.roll2_weight_kg,
                output.cut_weight_kg,
                output.remainder_weight_kg,
                output.waste_weight_kg,
                output.quality_grade,
                output.approved as i64,
                output.recorded_by,
                format_ts(output.recorded_at),
            ],
        )?;
        Ok(())
    }

    /// 按ID读取产出
    pub fn get(&self, output_id: &str) -> RepositoryResult<StageOutput> {
        let conn = self.get_conn()?;
        Self::get_with(&conn, output_id)
    }

    /// 事务内按ID读取
    pub fn get_tx(tx: &Transaction<'_>, output_id: &str) -> RepositoryResult<StageOutput> {
        Self::get_with(tx, output_id)
    }

    fn get_with(conn: &Connection, output_id: &str) -> RepositoryResult<StageOutput> {
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM stage_output WHERE output_id = ?1", OUTPUT_COLS),
                params![output_id],
                map_output,
            )
            .optional()?;
        match raw {
            Some(r) => finish_output(r),
            None => Err(RepositoryError::NotFound {
                entity: "StageOutput".to_string(),
                id: output_id.to_string(),
            }),
        }
    }

    /// 订单在指定阶段的全部产出
    pub fn list_by_order_stage(
        &self,
        order_id: &str,
        stage: Stage,
    ) -> RepositoryResult<Vec<StageOutput>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stage_output WHERE order_id = ?1 AND stage = ?2
             ORDER BY recorded_at, output_id",
            OUTPUT_COLS
        ))?;
        let rows = stmt.query_map(params![order_id, stage.to_db_str()], map_output)?;

        let mut outputs = Vec::new();
        for row in rows {
            outputs.push(finish_output(row?)?);
        }
        Ok(outputs)
    }
}
