// ==========================================
// 纸卷流转管控系统 - 阶段产出领域模型
// ==========================================
// 红线: 产出录入请求为强类型值对象,边界处一次性校验
// 对齐: stage_output 表
// ==========================================

use crate::domain::types::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// SortingOutputRequest - 分拣产出录入请求
// ==========================================
// 投入重量拆分为: 成卷1 / 成卷2 / 废料
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortingOutputRequest {
    pub order_id: String,
    pub requirement_id: String,
    pub input_weight_kg: f64,
    pub roll1_weight_kg: f64,
    pub roll2_weight_kg: f64,
    pub waste_weight_kg: f64,
    pub quality_grade: Option<String>,
}

// ==========================================
// CuttingOutputRequest - 裁切产出录入请求
// ==========================================
// 投入重量拆分为: 成品 / 余料 / 废料
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuttingOutputRequest {
    pub order_id: String,
    pub requirement_id: String,
    pub input_weight_kg: f64,
    pub cut_weight_kg: f64,
    pub remainder_weight_kg: f64,
    pub waste_weight_kg: f64,
    pub quality_grade: Option<String>,
}

// ==========================================
// StageOutput - 已验收的阶段产出记录
// ==========================================
// 分拣: roll1/roll2 有值, cut/remainder 为 None
// 裁切: cut/remainder 有值, roll1/roll2 为 None
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub output_id: String,
    pub order_id: String,
    pub requirement_id: String,
    pub stage: Stage, // SORTING 或 CUTTING

    pub input_weight_kg: f64,
    pub roll1_weight_kg: Option<f64>,
    pub roll2_weight_kg: Option<f64>,
    pub cut_weight_kg: Option<f64>,
    pub remainder_weight_kg: Option<f64>,
    pub waste_weight_kg: f64,

    pub quality_grade: Option<String>,
    pub approved: bool, // 验收标志 (裁切完成校验依据)

    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

impl StageOutput {
    /// 产出桶重量总和 (守恒校验口径)
    pub fn bucket_sum_kg(&self) -> f64 {
        self.roll1_weight_kg.unwrap_or(0.0)
            + self.roll2_weight_kg.unwrap_or(0.0)
            + self.cut_weight_kg.unwrap_or(0.0)
            + self.remainder_weight_kg.unwrap_or(0.0)
            + self.waste_weight_kg
    }
}
