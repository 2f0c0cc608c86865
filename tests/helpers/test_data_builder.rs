// ==========================================
// 测试数据构造器
// ==========================================
// 职责: 直接落库构造调拨/审批/产出,用于覆盖 API 不会产生的异常形态
// ==========================================

#![allow(dead_code)]

use chrono::Utc;
use paper_flow_mes::domain::stage_output::StageOutput;
use paper_flow_mes::domain::transfer::{TransferApproval, WeightTransfer};
use paper_flow_mes::domain::types::{Role, Stage, TransferCategory, TransferStatus};
use paper_flow_mes::repository::{
    ApprovalRepository, StageOutputRepository, TransferRepository,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// 落库一条裁切产出记录
pub fn insert_cutting_output(
    conn: &Arc<Mutex<Connection>>,
    order_id: &str,
    requirement_id: &str,
    input_kg: f64,
    cut_kg: f64,
    remainder_kg: f64,
    waste_kg: f64,
    approved: bool,
) -> String {
    let output = StageOutput {
        output_id: Uuid::new_v4().to_string(),
        order_id: order_id.to_string(),
        requirement_id: requirement_id.to_string(),
        stage: Stage::Cutting,
        input_weight_kg: input_kg,
        roll1_weight_kg: None,
        roll2_weight_kg: None,
        cut_weight_kg: Some(cut_kg),
        remainder_weight_kg: Some(remainder_kg),
        waste_weight_kg: waste_kg,
        quality_grade: None,
        approved,
        recorded_by: "U-CUT-KEEPER".to_string(),
        recorded_at: Utc::now(),
    };

    let mut guard = conn.lock().unwrap();
    let tx = guard.transaction().unwrap();
    StageOutputRepository::insert_tx(&tx, &output).unwrap();
    tx.commit().unwrap();
    output.output_id
}

/// 落库一条调拨单 + 顺序审批链
///
/// levels: (仓库, 是否末级) 有序列表,序号自动 1..N
pub fn insert_transfer_with_chain(
    conn: &Arc<Mutex<Connection>>,
    order_id: &str,
    requirement_id: &str,
    output_id: Option<&str>,
    category: TransferCategory,
    weight_kg: f64,
    source_warehouse: &str,
    destination_warehouse: Option<&str>,
    group_id: &str,
    status: TransferStatus,
    levels: &[&str],
) -> String {
    let now = Utc::now();
    let transfer = WeightTransfer {
        transfer_id: Uuid::new_v4().to_string(),
        order_id: order_id.to_string(),
        requirement_id: requirement_id.to_string(),
        output_id: output_id.map(|s| s.to_string()),
        from_stage: Stage::Cutting,
        to_stage: Stage::Packaging,
        weight_kg,
        category,
        source_warehouse_id: source_warehouse.to_string(),
        destination_warehouse_id: destination_warehouse.map(|s| s.to_string()),
        transfer_group_id: group_id.to_string(),
        requires_sequential_approval: !levels.is_empty(),
        current_approval_sequence: 1,
        status,
        created_at: now,
        updated_at: now,
    };

    let mut guard = conn.lock().unwrap();
    let tx = guard.transaction().unwrap();
    TransferRepository::insert_tx(&tx, &transfer).unwrap();
    for (i, warehouse) in levels.iter().enumerate() {
        let approval = TransferApproval::pending(
            Uuid::new_v4().to_string(),
            transfer.transfer_id.clone(),
            warehouse.to_string(),
            Role::WarehouseManager,
            (i as i32) + 1,
            i == levels.len() - 1,
        );
        ApprovalRepository::insert_tx(&tx, &approval).unwrap();
    }
    tx.commit().unwrap();
    transfer.transfer_id
}
