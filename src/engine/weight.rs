// ==========================================
// 纸卷流转管控系统 - 重量比较工具
// ==========================================
// 红线: 全系统唯一的重量容差口径,禁止散落的 ad hoc epsilon
// 守恒容差是硬性物理法则,废料上限是软性业务策略,二者独立配置
// ==========================================

use serde::{Deserialize, Serialize};

/// 重量守恒容差（kg）- 默认值,可由 config_kv 覆盖
pub const WEIGHT_TOLERANCE_KG: f64 = 0.01;

/// 裁切废料占比上限 - 默认值,可由 config_kv 覆盖
pub const DEFAULT_WASTE_CEILING: f64 = 0.5;

/// 重量近似相等判定
///
/// 全系统所有重量比较必须经过这里
pub fn approximately_equal(a: f64, b: f64, tolerance_kg: f64) -> bool {
    (a - b).abs() <= tolerance_kg
}

/// 按默认容差判定
pub fn approximately_equal_default(a: f64, b: f64) -> bool {
    approximately_equal(a, b, WEIGHT_TOLERANCE_KG)
}

// ==========================================
// WeightPolicy - 重量校验策略
// ==========================================
// tolerance_kg: 守恒法则容差 (硬约束)
// waste_ceiling: 裁切废料占比上限 (软策略)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightPolicy {
    pub tolerance_kg: f64,
    pub waste_ceiling: f64,
}

impl Default for WeightPolicy {
    fn default() -> Self {
        Self {
            tolerance_kg: WEIGHT_TOLERANCE_KG,
            waste_ceiling: DEFAULT_WASTE_CEILING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approximately_equal_within_tolerance() {
        assert!(approximately_equal(100.0, 100.009, WEIGHT_TOLERANCE_KG));
        assert!(approximately_equal(100.0, 99.991, WEIGHT_TOLERANCE_KG));
        assert!(approximately_equal(100.0, 100.01, WEIGHT_TOLERANCE_KG));
    }

    #[test]
    fn test_approximately_equal_beyond_tolerance() {
        assert!(!approximately_equal(100.0, 100.02, WEIGHT_TOLERANCE_KG));
        assert!(!approximately_equal(100.0, 95.0, WEIGHT_TOLERANCE_KG));
    }

    #[test]
    fn test_default_policy() {
        let policy = WeightPolicy::default();
        assert_eq!(policy.tolerance_kg, 0.01);
        assert_eq!(policy.waste_ceiling, 0.5);
    }
}
