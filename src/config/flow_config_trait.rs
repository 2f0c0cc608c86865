// ==========================================
// 纸卷流转管控系统 - 流转配置读取 Trait
// ==========================================
// 职责: 定义流转/审批模块所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::Stage;
use async_trait::async_trait;
use std::error::Error;

// ==========================================
// FlowConfigReader Trait
// ==========================================
// 用途: 流转/审批模块所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait FlowConfigReader: Send + Sync {
    // ===== 重量校验配置 =====

    /// 获取重量守恒容差（kg）
    ///
    /// # 默认值
    /// - 0.01
    async fn get_weight_tolerance_kg(&self) -> Result<f64, Box<dyn Error>>;

    /// 获取裁切废料占比上限
    ///
    /// # 默认值
    /// - 0.5
    async fn get_cutting_waste_ceiling(&self) -> Result<f64, Box<dyn Error>>;

    // ===== 审批配置 =====

    /// 获取驳回原因最小长度
    ///
    /// # 默认值
    /// - 5
    async fn get_reject_reason_min_len(&self) -> Result<usize, Box<dyn Error>>;

    // ===== 流转编排配置 =====

    /// 加急快速通道是否启用（跳过结算阶段）
    ///
    /// # 默认值
    /// - true
    async fn get_urgent_fast_path_enabled(&self) -> Result<bool, Box<dyn Error>>;

    /// 阶段对应的仓库（物料阶段才有仓库）
    ///
    /// # 返回
    /// - Some(warehouse_id): 该阶段有对应仓库
    /// - None: 该阶段无仓库（如结算）
    async fn get_stage_warehouse(&self, stage: Stage) -> Result<Option<String>, Box<dyn Error>>;
}
