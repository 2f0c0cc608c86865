// ==========================================
// 纸卷流转管控系统 - 阶段产出校验引擎
// ==========================================
// 职责: 分拣/裁切产出的重量守恒校验,纯函数无副作用
// 红线: 校验不通过绝不派生任何调拨单
// 红线: 所有拒绝必须输出可解释的结构化原因
// ==========================================

use crate::domain::stage_output::{CuttingOutputRequest, SortingOutputRequest};
use crate::engine::weight::{approximately_equal, WeightPolicy};
use thiserror::Error;

// ==========================================
// StageOutputError - 产出校验错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageOutputError {
    #[error("产出桶重量为负: {bucket}={weight_kg}kg")]
    NegativeBucket { bucket: &'static str, weight_kg: f64 },

    #[error("重量不守恒: 期望{expected_kg}kg, 实际{actual_kg}kg")]
    Imbalance { expected_kg: f64, actual_kg: f64 },

    #[error("无有效产出: 所有非废料桶均为零")]
    NoProductiveOutput,

    #[error("废料占比超限: {fraction:.4} > 上限{ceiling:.4}")]
    ExcessiveWaste { fraction: f64, ceiling: f64 },
}

impl StageOutputError {
    /// 稳定错误码 (调用方据此分支)
    pub fn error_code(&self) -> &'static str {
        match self {
            StageOutputError::NegativeBucket { .. } => "NEGATIVE_BUCKET",
            StageOutputError::Imbalance { .. } => "IMBALANCE",
            StageOutputError::NoProductiveOutput => "NO_PRODUCTIVE_OUTPUT",
            StageOutputError::ExcessiveWaste { .. } => "EXCESSIVE_WASTE",
        }
    }
}

// ==========================================
// ValidatedBucket - 已验收的产出桶
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBucket {
    pub name: &'static str,
    pub weight_kg: f64,
    pub is_waste: bool,
}

/// 已通过守恒校验的产出拆分
#[derive(Debug, Clone)]
pub struct ValidatedOutput {
    pub input_weight_kg: f64,
    pub buckets: Vec<ValidatedBucket>,
}

impl ValidatedOutput {
    /// 非零桶 (调拨派生依据)
    pub fn non_zero_buckets(&self) -> impl Iterator<Item = &ValidatedBucket> {
        self.buckets.iter().filter(|b| b.weight_kg > 0.0)
    }
}

// ==========================================
// 通用桶校验
// ==========================================

/// 守恒法则校验: 非负、求和守恒、至少一个生产性桶为正
fn validate_buckets(
    input_weight_kg: f64,
    buckets: Vec<ValidatedBucket>,
    tolerance_kg: f64,
) -> Result<ValidatedOutput, StageOutputError> {
    if input_weight_kg < 0.0 {
        return Err(StageOutputError::NegativeBucket {
            bucket: "input",
            weight_kg: input_weight_kg,
        });
    }
    for bucket in &buckets {
        if bucket.weight_kg < 0.0 {
            return Err(StageOutputError::NegativeBucket {
                bucket: bucket.name,
                weight_kg: bucket.weight_kg,
            });
        }
    }

    let actual: f64 = buckets.iter().map(|b| b.weight_kg).sum();
    if !approximately_equal(input_weight_kg, actual, tolerance_kg) {
        return Err(StageOutputError::Imbalance {
            expected_kg: input_weight_kg,
            actual_kg: actual,
        });
    }

    let productive_sum: f64 = buckets
        .iter()
        .filter(|b| !b.is_waste)
        .map(|b| b.weight_kg)
        .sum();
    if productive_sum <= 0.0 {
        return Err(StageOutputError::NoProductiveOutput);
    }

    Ok(ValidatedOutput {
        input_weight_kg,
        buckets,
    })
}

// ==========================================
// StageOutputValidator - 产出校验器
// ==========================================
pub struct StageOutputValidator {
    policy: WeightPolicy,
}

impl StageOutputValidator {
    pub fn new(policy: WeightPolicy) -> Self {
        Self { policy }
    }

    /// 分拣产出校验: roll1 + roll2 + waste ≈ input
    pub fn validate_sorting(
        &self,
        request: &SortingOutputRequest,
    ) -> Result<ValidatedOutput, StageOutputError> {
        validate_buckets(
            request.input_weight_kg,
            vec![
                ValidatedBucket {
                    name: "roll1",
                    weight_kg: request.roll1_weight_kg,
                    is_waste: false,
                },
                ValidatedBucket {
                    name: "roll2",
                    weight_kg: request.roll2_weight_kg,
                    is_waste: false,
                },
                ValidatedBucket {
                    name: "waste",
                    weight_kg: request.waste_weight_kg,
                    is_waste: true,
                },
            ],
            self.policy.tolerance_kg,
        )
    }

    /// 裁切产出校验: cut + remainder + waste ≈ input
    ///
    /// 守恒之外再查废料占比 (软策略,可配置上限)
    pub fn validate_cutting(
        &self,
        request: &CuttingOutputRequest,
    ) -> Result<ValidatedOutput, StageOutputError> {
        let output = validate_buckets(
            request.input_weight_kg,
            vec![
                ValidatedBucket {
                    name: "cut",
                    weight_kg: request.cut_weight_kg,
                    is_waste: false,
                },
                ValidatedBucket {
                    name: "remainder",
                    weight_kg: request.remainder_weight_kg,
                    is_waste: false,
                },
                ValidatedBucket {
                    name: "waste",
                    weight_kg: request.waste_weight_kg,
                    is_waste: true,
                },
            ],
            self.policy.tolerance_kg,
        )?;

        if request.input_weight_kg > 0.0 {
            let fraction = request.waste_weight_kg / request.input_weight_kg;
            if fraction > self.policy.waste_ceiling {
                return Err(StageOutputError::ExcessiveWaste {
                    fraction,
                    ceiling: self.policy.waste_ceiling,
                });
            }
        }

        Ok(output)
    }
}
