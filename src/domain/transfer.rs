// ==========================================
// 纸卷流转管控系统 - 调拨领域模型
// ==========================================
// 红线: 调拨一经终态 (REJECTED/COMPLETED) 不可复活
// 红线: 审批序号在单个调拨内严格递增且无空洞
// 对齐: weight_transfer / transfer_approval 表
// ==========================================

use crate::domain::types::{ApprovalStatus, Role, Stage, TransferCategory, TransferStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// WeightTransfer - 重量调拨单
// ==========================================
// 一次阶段间/仓库间的重量移动申请
// 由阶段产出验收步骤创建,审批服务独占推进
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightTransfer {
    // ===== 主键与关联 =====
    pub transfer_id: String,       // 调拨单ID (UUID)
    pub order_id: String,          // 关联订单
    pub requirement_id: String,    // 关联物料行
    pub output_id: Option<String>, // 来源阶段产出 (裁切完成校验依据)

    // ===== 移动内容 =====
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub weight_kg: f64,
    pub category: TransferCategory,

    // ===== 仓库 =====
    pub source_warehouse_id: String,
    pub destination_warehouse_id: Option<String>, // 废料无目的仓

    // ===== 审批编排 =====
    pub transfer_group_id: String,          // 同一阶段事件派生的调拨共享组ID
    pub requires_sequential_approval: bool, // 生产性类别为 true
    pub current_approval_sequence: i32,     // 当前待决序号 (展示用,裁决以审批行为准)
    pub status: TransferStatus,

    // ===== 审计字段 =====
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WeightTransfer {
    /// 调拨是否仍可被审批动作触达
    pub fn is_decidable(&self) -> bool {
        self.status == TransferStatus::Pending
    }
}

// ==========================================
// TransferApproval - 调拨审批行
// ==========================================
// 每个审批层级一行,序号 1..N,最后一级 is_final_approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferApproval {
    pub approval_id: String, // 审批行ID (UUID)
    pub transfer_id: String, // 关联调拨单

    // ===== 审批要求 =====
    pub warehouse_id: String,    // 要求的仓库
    pub required_role: Role,     // 要求的角色
    pub approval_sequence: i32,  // 序号 (1..N, UNIQUE(transfer_id, approval_sequence))
    pub is_final_approval: bool, // 末级标志

    // ===== 决定 =====
    pub status: ApprovalStatus,
    pub approver: Option<String>, // 实际决定人 (SYSTEM 表示系统自动审批)
    pub decided_at: Option<DateTime<Utc>>,
    pub notes: Option<String>, // 审批备注 / 驳回原因

    pub created_at: DateTime<Utc>,
}

impl TransferApproval {
    /// 创建待决审批行
    pub fn pending(
        approval_id: String,
        transfer_id: String,
        warehouse_id: String,
        required_role: Role,
        approval_sequence: i32,
        is_final_approval: bool,
    ) -> Self {
        Self {
            approval_id,
            transfer_id,
            warehouse_id,
            required_role,
            approval_sequence,
            is_final_approval,
            status: ApprovalStatus::Pending,
            approver: None,
            decided_at: None,
            notes: None,
            created_at: Utc::now(),
        }
    }
}

// ==========================================
// 审批链完整性判定
// ==========================================

/// 调拨是否已获完整审批
///
/// 完整 = 每一行 status=APPROVED,序号连续 1..N 无空洞
pub fn chain_fully_approved(approvals: &[TransferApproval]) -> bool {
    if approvals.is_empty() {
        return false;
    }
    let mut sorted: Vec<&TransferApproval> = approvals.iter().collect();
    sorted.sort_by_key(|a| a.approval_sequence);

    for (i, approval) in sorted.iter().enumerate() {
        if approval.approval_sequence != (i as i32) + 1 {
            return false; // 序号空洞
        }
        if approval.status != ApprovalStatus::Approved {
            return false;
        }
    }
    true
}
