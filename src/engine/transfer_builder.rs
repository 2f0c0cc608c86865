// ==========================================
// 纸卷流转管控系统 - 调拨派生引擎
// ==========================================
// 职责: 从已验收阶段产出派生调拨单与审批链,纯构造无持久化
// 红线: 只有非零桶派生调拨; 同一阶段事件共享 transfer_group_id
// 红线: 废料自动审批并记录系统审批行,永不阻塞流水线
// ==========================================

use crate::domain::stage_output::StageOutput;
use crate::domain::transfer::{TransferApproval, WeightTransfer};
use crate::domain::types::{
    Actor, ApprovalStatus, Role, Stage, TransferCategory, TransferStatus,
};
use chrono::Utc;
use uuid::Uuid;

// ==========================================
// PlannedTransfer - 待持久化的调拨计划
// ==========================================
#[derive(Debug, Clone)]
pub struct PlannedTransfer {
    pub transfer: WeightTransfer,
    pub approvals: Vec<TransferApproval>,
    /// 废料类别: 创建即审批通过,随创建事务完成库存处置
    pub auto_approved: bool,
}

// ==========================================
// TransferBuilder - 调拨派生引擎
// ==========================================
pub struct TransferBuilder {
    // 无状态引擎,不需要注入依赖
}

impl TransferBuilder {
    pub fn new() -> Self {
        Self {}
    }

    /// 从阶段产出派生调拨计划
    ///
    /// # 参数
    /// - output: 已验收的阶段产出 (分拣或裁切)
    /// - source_warehouse_id: 产出所在仓
    /// - destination_warehouse_id: 下一阶段仓 (生产性桶的去向)
    ///
    /// # 返回
    /// 非零桶对应的调拨计划列表,共享同一 transfer_group_id
    pub fn plan_from_output(
        &self,
        output: &StageOutput,
        source_warehouse_id: &str,
        destination_warehouse_id: &str,
    ) -> Vec<PlannedTransfer> {
        let group_id = Uuid::new_v4().to_string();
        let mut planned = Vec::new();

        for (category, weight_kg) in Self::categorized_buckets(output) {
            if weight_kg <= 0.0 {
                continue;
            }
            planned.push(self.plan_single(
                output,
                category,
                weight_kg,
                source_warehouse_id,
                destination_warehouse_id,
                &group_id,
            ));
        }
        planned
    }

    /// 产出桶 → 调拨类别映射
    ///
    /// 分拣: roll1→分拣成卷, roll2→分拣余卷
    /// 裁切: cut→裁切成品, remainder→裁切余料
    fn categorized_buckets(output: &StageOutput) -> Vec<(TransferCategory, f64)> {
        let mut buckets = Vec::new();
        if let Some(w) = output.roll1_weight_kg {
            buckets.push((TransferCategory::SortedMaterial, w));
        }
        if let Some(w) = output.roll2_weight_kg {
            buckets.push((TransferCategory::RemainingRoll, w));
        }
        if let Some(w) = output.cut_weight_kg {
            buckets.push((TransferCategory::CutMaterial, w));
        }
        if let Some(w) = output.remainder_weight_kg {
            buckets.push((TransferCategory::CuttingRemainder, w));
        }
        buckets.push((TransferCategory::Waste, output.waste_weight_kg));
        buckets
    }

    fn plan_single(
        &self,
        output: &StageOutput,
        category: TransferCategory,
        weight_kg: f64,
        source_warehouse_id: &str,
        destination_warehouse_id: &str,
        group_id: &str,
    ) -> PlannedTransfer {
        let now = Utc::now();
        let transfer_id = Uuid::new_v4().to_string();
        let is_waste = category.is_waste();

        // 产出阶段 → 下一物料阶段; 废料不进入下一阶段
        let to_stage = if is_waste {
            output.stage
        } else {
            match output.stage {
                Stage::Sorting => Stage::Cutting,
                Stage::Cutting => Stage::Packaging,
                other => other,
            }
        };

        let transfer = WeightTransfer {
            transfer_id: transfer_id.clone(),
            order_id: output.order_id.clone(),
            requirement_id: output.requirement_id.clone(),
            output_id: Some(output.output_id.clone()),
            from_stage: output.stage,
            to_stage,
            weight_kg,
            category,
            source_warehouse_id: source_warehouse_id.to_string(),
            destination_warehouse_id: if is_waste {
                None
            } else {
                Some(destination_warehouse_id.to_string())
            },
            transfer_group_id: group_id.to_string(),
            requires_sequential_approval: !is_waste,
            current_approval_sequence: 1,
            status: if is_waste {
                TransferStatus::Approved
            } else {
                TransferStatus::Pending
            },
            created_at: now,
            updated_at: now,
        };

        let approvals = if is_waste {
            // 系统自动审批行 (显式 System 哨兵,非魔法用户ID)
            let mut approval = TransferApproval::pending(
                Uuid::new_v4().to_string(),
                transfer_id,
                source_warehouse_id.to_string(),
                Role::WarehouseManager,
                1,
                true,
            );
            approval.status = ApprovalStatus::Approved;
            approval.approver = Some(Actor::System.as_audit_str().to_string());
            approval.decided_at = Some(now);
            approval.notes = Some("废料自动审批".to_string());
            vec![approval]
        } else {
            self.build_approval_chain(&transfer_id, source_warehouse_id, destination_warehouse_id)
        };

        PlannedTransfer {
            transfer,
            approvals,
            auto_approved: is_waste,
        }
    }

    /// 审批链构造: 源仓主管 → 目的仓主管 (同仓合并为单级)
    ///
    /// 每级一行 PENDING,序号 1..N,末级 is_final_approval
    fn build_approval_chain(
        &self,
        transfer_id: &str,
        source_warehouse_id: &str,
        destination_warehouse_id: &str,
    ) -> Vec<TransferApproval> {
        let mut warehouses = vec![source_warehouse_id];
        if destination_warehouse_id != source_warehouse_id {
            warehouses.push(destination_warehouse_id);
        }

        let last = warehouses.len() - 1;
        warehouses
            .into_iter()
            .enumerate()
            .map(|(i, warehouse_id)| {
                TransferApproval::pending(
                    Uuid::new_v4().to_string(),
                    transfer_id.to_string(),
                    warehouse_id.to_string(),
                    Role::WarehouseManager,
                    (i as i32) + 1,
                    i == last,
                )
            })
            .collect()
    }
}

impl Default for TransferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorting_output(roll1: f64, roll2: f64, waste: f64) -> StageOutput {
        StageOutput {
            output_id: "OUT-1".into(),
            order_id: "ORD-1".into(),
            requirement_id: "REQ-1".into(),
            stage: Stage::Sorting,
            input_weight_kg: roll1 + roll2 + waste,
            roll1_weight_kg: Some(roll1),
            roll2_weight_kg: Some(roll2),
            cut_weight_kg: None,
            remainder_weight_kg: None,
            waste_weight_kg: waste,
            quality_grade: Some("A".into()),
            approved: true,
            recorded_by: "U-KEEPER".into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_sorting_plan_three_transfers() {
        // 100 = 60 + 35 + 5: 两个生产性 PENDING + 一个废料自动审批
        let builder = TransferBuilder::new();
        let planned = builder.plan_from_output(&sorting_output(60.0, 35.0, 5.0), "WH-SORT", "WH-CUT");

        assert_eq!(planned.len(), 3);
        let productive: Vec<_> = planned.iter().filter(|p| !p.auto_approved).collect();
        assert_eq!(productive.len(), 2);
        for p in &productive {
            assert_eq!(p.transfer.status, TransferStatus::Pending);
            assert!(p.transfer.requires_sequential_approval);
            assert_eq!(p.transfer.to_stage, Stage::Cutting);
            assert_eq!(p.approvals.len(), 2);
            assert_eq!(p.approvals[0].warehouse_id, "WH-SORT");
            assert_eq!(p.approvals[1].warehouse_id, "WH-CUT");
            assert!(p.approvals[1].is_final_approval);
        }

        let waste: Vec<_> = planned.iter().filter(|p| p.auto_approved).collect();
        assert_eq!(waste.len(), 1);
        assert_eq!(waste[0].transfer.status, TransferStatus::Approved);
        assert_eq!(waste[0].transfer.destination_warehouse_id, None);
        assert_eq!(waste[0].approvals.len(), 1);
        assert_eq!(waste[0].approvals[0].approver.as_deref(), Some("SYSTEM"));
    }

    #[test]
    fn test_zero_bucket_skipped() {
        let builder = TransferBuilder::new();
        let planned = builder.plan_from_output(&sorting_output(95.0, 0.0, 5.0), "WH-SORT", "WH-CUT");
        // roll2=0 不派生调拨
        assert_eq!(planned.len(), 2);
    }

    #[test]
    fn test_shared_group_id() {
        let builder = TransferBuilder::new();
        let planned = builder.plan_from_output(&sorting_output(60.0, 35.0, 5.0), "WH-SORT", "WH-CUT");
        let group = &planned[0].transfer.transfer_group_id;
        assert!(planned.iter().all(|p| &p.transfer.transfer_group_id == group));
    }

    #[test]
    fn test_same_warehouse_single_level_chain() {
        let builder = TransferBuilder::new();
        let planned = builder.plan_from_output(&sorting_output(95.0, 0.0, 5.0), "WH-SORT", "WH-SORT");
        let productive = planned.iter().find(|p| !p.auto_approved).unwrap();
        assert_eq!(productive.approvals.len(), 1);
        assert!(productive.approvals[0].is_final_approval);
    }
}
