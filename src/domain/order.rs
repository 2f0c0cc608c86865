// ==========================================
// 纸卷流转管控系统 - 订单流转领域模型
// ==========================================
// 红线: 阶段迁移日志只追加,是全流程审计事实来源
// 对齐: pipeline_order / stage_processing / stage_transition_log 表
// ==========================================

use crate::domain::types::{OrderStatus, Stage, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// PipelineOrder - 流转订单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOrder {
    pub order_id: String,
    pub order_no: String, // 业务单号 (唯一)

    pub current_stage: Stage,
    pub status: OrderStatus,

    pub urgent_flag: bool,       // 加急单 (快速通道跳过结算)
    pub payment_received: bool,  // 结算完成标志 (配送前置条件)

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineOrder {
    pub fn new(order_id: String, order_no: String) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            order_no,
            current_stage: Stage::Reservation,
            status: OrderStatus::Active,
            urgent_flag: false,
            payment_received: false,
            created_at: now,
            updated_at: now,
        }
    }
}

// ==========================================
// StageProcessing - 阶段处理记录
// ==========================================
// 每个订单每个阶段至多一行, PK(order_id, stage)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProcessing {
    pub order_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ==========================================
// StageTransitionLog - 阶段迁移日志 (只追加)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransitionLog {
    pub log_id: String,
    pub order_id: String,
    pub previous_stage: Stage,
    pub new_stage: Stage,
    pub actor: String, // Actor::as_audit_str
    pub transitioned_at: DateTime<Utc>,
}
