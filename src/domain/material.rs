// ==========================================
// 纸卷流转管控系统 - 物料需求领域模型
// ==========================================
// 红线: 各阶段累计重量只增不减,由调拨完成操作写入
// 用途: 订单展开为物料行时创建,逐阶段记录重量台账
// 对齐: order_material 表
// ==========================================

use crate::domain::types::Stage;
use crate::engine::weight;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// RollSpec - 纸卷规格
// ==========================================
// 用途: 物料行绑定的物理纸卷规格 (影子字段,不独立建表)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollSpec {
    pub width_mm: f64,                // 卷宽 (mm)
    pub grammage_gsm: f64,            // 克重 (g/m²)
    pub quality_grade: String,        // 质量等级
    pub length_m: Option<f64>,        // 卷长 (m)
    pub batch_no: Option<String>,     // 批次号
    pub roll_number: Option<String>,  // 卷号
}

// ==========================================
// MaterialRequirement - 物料需求行
// ==========================================
// 一条订单物料需求,携带每个阶段的累计重量
// 不删除,仅由阶段状态推进覆盖语义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialRequirement {
    // ===== 主键与关联 =====
    pub requirement_id: String, // 物料行ID (UUID)
    pub order_id: String,       // 关联订单
    pub material_id: String,    // 物料编码 (原纸品种)

    // ===== 阶段累计重量 (kg) =====
    pub requested_weight_kg: f64, // 需求重量
    pub extracted_weight_kg: f64, // 已提取重量
    pub sorted_weight_kg: f64,    // 已分拣重量
    pub cut_weight_kg: f64,       // 已裁切重量
    pub delivered_weight_kg: f64, // 已交付重量
    pub waste_weight_kg: f64,     // 累计废料重量

    // ===== 纸卷规格 =====
    pub roll_spec: RollSpec,

    // ===== 审计字段 =====
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MaterialRequirement {
    /// 创建新的物料需求行
    pub fn new(
        requirement_id: String,
        order_id: String,
        material_id: String,
        requested_weight_kg: f64,
        roll_spec: RollSpec,
    ) -> Self {
        let now = Utc::now();
        Self {
            requirement_id,
            order_id,
            material_id,
            requested_weight_kg,
            extracted_weight_kg: 0.0,
            sorted_weight_kg: 0.0,
            cut_weight_kg: 0.0,
            delivered_weight_kg: 0.0,
            waste_weight_kg: 0.0,
            roll_spec,
            created_at: now,
            updated_at: now,
        }
    }

    /// 指定阶段的累计重量读数
    ///
    /// 预留/结算阶段无独立重量口径,返回 None
    pub fn cumulative_weight_for(&self, stage: Stage) -> Option<f64> {
        match stage {
            Stage::Reservation => Some(self.requested_weight_kg),
            Stage::Sorting => Some(self.sorted_weight_kg),
            Stage::Cutting => Some(self.cut_weight_kg),
            Stage::Delivery => Some(self.delivered_weight_kg),
            Stage::Packaging | Stage::Billing => None,
        }
    }

    /// 分拣阶段守恒检查: 分拣产出 + 分拣废料 ≈ 提取投入
    pub fn sorting_balanced(&self, tolerance_kg: f64) -> bool {
        // 分拣尚未开始时不判为失衡
        if self.sorted_weight_kg == 0.0 && self.waste_weight_kg == 0.0 {
            return true;
        }
        weight::approximately_equal(
            self.sorted_weight_kg + self.waste_weight_kg,
            self.extracted_weight_kg,
            tolerance_kg,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RollSpec {
        RollSpec {
            width_mm: 2100.0,
            grammage_gsm: 120.0,
            quality_grade: "A".to_string(),
            length_m: Some(6000.0),
            batch_no: Some("B2026-08".to_string()),
            roll_number: Some("R-0042".to_string()),
        }
    }

    #[test]
    fn test_new_requirement_zeroed_stages() {
        let req = MaterialRequirement::new(
            "REQ-1".into(),
            "ORD-1".into(),
            "KRAFT-120".into(),
            100.0,
            spec(),
        );
        assert_eq!(req.extracted_weight_kg, 0.0);
        assert_eq!(req.sorted_weight_kg, 0.0);
        assert_eq!(req.cumulative_weight_for(Stage::Reservation), Some(100.0));
        assert_eq!(req.cumulative_weight_for(Stage::Packaging), None);
    }

    #[test]
    fn test_sorting_balance_check() {
        let mut req = MaterialRequirement::new(
            "REQ-1".into(),
            "ORD-1".into(),
            "KRAFT-120".into(),
            100.0,
            spec(),
        );
        req.extracted_weight_kg = 100.0;
        // 未分拣 → 视为平衡
        assert!(req.sorting_balanced(0.01));

        req.sorted_weight_kg = 95.0;
        req.waste_weight_kg = 5.0;
        assert!(req.sorting_balanced(0.01));

        req.sorted_weight_kg = 90.0;
        assert!(!req.sorting_balanced(0.01));
    }
}
