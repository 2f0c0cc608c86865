// ==========================================
// 纸卷流转管控系统 - 审计日志领域模型
// ==========================================
// 红线: 所有审批/完成/推进操作必须落审计
// 用途: 只追加的审计落点,核心逻辑从不回读
// 对齐: audit_log 表
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// AuditEvent - 审计事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    TransferCreated,     // 调拨创建
    TransferApproved,    // 调拨审批通过 (单级)
    TransferRejected,    // 调拨驳回
    TransferCompleted,   // 调拨完成 (库存已变更)
    WasteAutoApproved,   // 废料自动审批
    StageOutputRecorded, // 阶段产出验收
    StageAdvanced,       // 阶段推进
    StageCompleted,      // 阶段完成
    StockExtracted,      // 库存提取
    StockReserved,       // 库存预留
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::TransferCreated => "TransferCreated",
            AuditEvent::TransferApproved => "TransferApproved",
            AuditEvent::TransferRejected => "TransferRejected",
            AuditEvent::TransferCompleted => "TransferCompleted",
            AuditEvent::WasteAutoApproved => "WasteAutoApproved",
            AuditEvent::StageOutputRecorded => "StageOutputRecorded",
            AuditEvent::StageAdvanced => "StageAdvanced",
            AuditEvent::StageCompleted => "StageCompleted",
            AuditEvent::StockExtracted => "StockExtracted",
            AuditEvent::StockReserved => "StockReserved",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TransferCreated" => Some(AuditEvent::TransferCreated),
            "TransferApproved" => Some(AuditEvent::TransferApproved),
            "TransferRejected" => Some(AuditEvent::TransferRejected),
            "TransferCompleted" => Some(AuditEvent::TransferCompleted),
            "WasteAutoApproved" => Some(AuditEvent::WasteAutoApproved),
            "StageOutputRecorded" => Some(AuditEvent::StageOutputRecorded),
            "StageAdvanced" => Some(AuditEvent::StageAdvanced),
            "StageCompleted" => Some(AuditEvent::StageCompleted),
            "StockExtracted" => Some(AuditEvent::StockExtracted),
            "StockReserved" => Some(AuditEvent::StockReserved),
            _ => None,
        }
    }
}

// ==========================================
// AuditLog - 审计日志行
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub audit_id: String,
    pub event_type: String, // AuditEvent::as_str 存储
    pub order_id: Option<String>,
    pub transfer_id: Option<String>,
    pub actor: String,
    pub payload_json: Option<JsonValue>, // 事件参数 (JSON)
    pub detail: Option<String>,
    pub event_ts: DateTime<Utc>,
}

impl AuditLog {
    /// 创建新的审计日志行
    pub fn new(audit_id: String, event: AuditEvent, actor: String) -> Self {
        Self {
            audit_id,
            event_type: event.as_str().to_string(),
            order_id: None,
            transfer_id: None,
            actor,
            payload_json: None,
            detail: None,
            event_ts: Utc::now(),
        }
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_transfer(mut self, transfer_id: impl Into<String>) -> Self {
        self.transfer_id = Some(transfer_id.into());
        self
    }

    /// 设置事件负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
