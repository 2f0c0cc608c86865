// ==========================================
// 纸卷流转管控系统 - 重量平衡报表 API
// ==========================================
// 职责: 只读查询,按物料/阶段汇总守恒情况
// ==========================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::domain::types::{Stage, TransferCategory};
use crate::engine::weight::approximately_equal;
use crate::repository::material_repo::MaterialRequirementRepository;
use crate::repository::output_repo::StageOutputRepository;
use crate::repository::transfer_repo::TransferRepository;

// ==========================================
// StageBalance - 单阶段守恒摘要
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBalance {
    pub stage: Stage,
    pub output_id: String,
    pub input_weight_kg: f64,
    pub output_weight_kg: f64,
    pub difference_kg: f64,
    pub is_balanced: bool,
}

// ==========================================
// MaterialBalance - 单物料守恒摘要
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialBalance {
    pub requirement_id: String,
    pub material_id: String,
    pub requested_weight_kg: f64,
    pub extracted_weight_kg: f64,
    pub sorted_weight_kg: f64,
    pub cut_weight_kg: f64,
    pub delivered_weight_kg: f64,
    pub waste_weight_kg: f64,
    pub stage_balances: Vec<StageBalance>,
    pub is_balanced: bool,
}

// ==========================================
// WeightBalanceReport - 订单重量平衡报表
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightBalanceReport {
    pub order_id: String,
    pub materials: Vec<MaterialBalance>,
    /// 各类别已完成调拨重量合计
    pub completed_by_category: Vec<(TransferCategory, f64)>,
    pub is_balanced: bool,
    pub tolerance_kg: f64,
}

// ==========================================
// ReportApi - 报表 API
// ==========================================
pub struct ReportApi {
    material_repo: Arc<MaterialRequirementRepository>,
    output_repo: Arc<StageOutputRepository>,
    transfer_repo: Arc<TransferRepository>,
    tolerance_kg: f64,
}

impl ReportApi {
    pub fn new(
        material_repo: Arc<MaterialRequirementRepository>,
        output_repo: Arc<StageOutputRepository>,
        transfer_repo: Arc<TransferRepository>,
        tolerance_kg: f64,
    ) -> Self {
        Self {
            material_repo,
            output_repo,
            transfer_repo,
            tolerance_kg,
        }
    }

    /// 订单重量平衡报表
    ///
    /// 每条阶段产出一行守恒摘要 (input vs Σbuckets),
    /// 物料平衡 = 其全部阶段产出守恒
    pub fn get_weight_balance_report(&self, order_id: &str) -> ApiResult<WeightBalanceReport> {
        let requirements = self.material_repo.list_by_order(order_id)?;

        let mut outputs = self
            .output_repo
            .list_by_order_stage(order_id, Stage::Sorting)?;
        outputs.extend(self.output_repo.list_by_order_stage(order_id, Stage::Cutting)?);

        let mut materials = Vec::with_capacity(requirements.len());
        let mut all_balanced = true;

        for req in requirements {
            let mut stage_balances = Vec::new();
            for output in outputs.iter().filter(|o| o.requirement_id == req.requirement_id) {
                let output_sum = output.bucket_sum_kg();
                let difference = output.input_weight_kg - output_sum;
                let balanced =
                    approximately_equal(output.input_weight_kg, output_sum, self.tolerance_kg);
                stage_balances.push(StageBalance {
                    stage: output.stage,
                    output_id: output.output_id.clone(),
                    input_weight_kg: output.input_weight_kg,
                    output_weight_kg: output_sum,
                    difference_kg: difference,
                    is_balanced: balanced,
                });
            }

            let is_balanced = stage_balances.iter().all(|b| b.is_balanced);
            all_balanced = all_balanced && is_balanced;

            materials.push(MaterialBalance {
                requirement_id: req.requirement_id.clone(),
                material_id: req.material_id.clone(),
                requested_weight_kg: req.requested_weight_kg,
                extracted_weight_kg: req.extracted_weight_kg,
                sorted_weight_kg: req.sorted_weight_kg,
                cut_weight_kg: req.cut_weight_kg,
                delivered_weight_kg: req.delivered_weight_kg,
                waste_weight_kg: req.waste_weight_kg,
                stage_balances,
                is_balanced,
            });
        }

        let categories = [
            TransferCategory::SortedMaterial,
            TransferCategory::RemainingRoll,
            TransferCategory::CutMaterial,
            TransferCategory::CuttingRemainder,
            TransferCategory::Waste,
        ];
        let mut completed_by_category = Vec::new();
        for category in categories {
            let sum = self.transfer_repo.sum_completed_weight(order_id, category)?;
            if sum > 0.0 {
                completed_by_category.push((category, sum));
            }
        }

        Ok(WeightBalanceReport {
            order_id: order_id.to_string(),
            materials,
            completed_by_category,
            is_balanced: all_balanced,
            tolerance_kg: self.tolerance_kg,
        })
    }
}
