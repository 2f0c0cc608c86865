// ==========================================
// 纸卷流转管控系统 - 领域类型定义
// ==========================================
// 红线: 阶段/状态一律使用封闭枚举,禁止跨语言字符串比较
// 本地化标签统一走 i18n 查表 (locales/*.yml)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 流转阶段 (Pipeline Stage)
// ==========================================
// 红线: 阶段顺序固定,唯一事实来源是 Stage::ORDERED
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Reservation, // 预留
    Sorting,     // 分拣
    Cutting,     // 裁切
    Packaging,   // 包装
    Billing,     // 结算
    Delivery,    // 配送
}

impl Stage {
    /// 固定阶段顺序 (流转编排唯一依据)
    pub const ORDERED: [Stage; 6] = [
        Stage::Reservation,
        Stage::Sorting,
        Stage::Cutting,
        Stage::Packaging,
        Stage::Billing,
        Stage::Delivery,
    ];

    /// 阶段在流水线中的序号
    pub fn index(&self) -> usize {
        Stage::ORDERED
            .iter()
            .position(|s| s == self)
            .unwrap_or(usize::MAX)
    }

    /// 当前阶段之后的阶段列表 (按顺序)
    pub fn stages_after(&self) -> &'static [Stage] {
        static ORDERED: [Stage; 6] = Stage::ORDERED;
        let idx = self.index();
        if idx + 1 >= ORDERED.len() {
            &[]
        } else {
            &ORDERED[idx + 1..]
        }
    }

    /// 是否为强制阶段 (强制阶段不参与跳过判定)
    ///
    /// 结算阶段可被加急快速通道跳过,其余阶段必经
    pub fn is_mandatory(&self) -> bool {
        !matches!(self, Stage::Billing)
    }

    /// i18n 标签键 (本地化显示走查表,不参与任何相等性判断)
    pub fn label_key(&self) -> &'static str {
        match self {
            Stage::Reservation => "stage.reservation",
            Stage::Sorting => "stage.sorting",
            Stage::Cutting => "stage.cutting",
            Stage::Packaging => "stage.packaging",
            Stage::Billing => "stage.billing",
            Stage::Delivery => "stage.delivery",
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Stage::Reservation => "RESERVATION",
            Stage::Sorting => "SORTING",
            Stage::Cutting => "CUTTING",
            Stage::Packaging => "PACKAGING",
            Stage::Billing => "BILLING",
            Stage::Delivery => "DELIVERY",
        }
    }

    /// 从字符串解析阶段
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RESERVATION" => Some(Stage::Reservation),
            "SORTING" => Some(Stage::Sorting),
            "CUTTING" => Some(Stage::Cutting),
            "PACKAGING" => Some(Stage::Packaging),
            "BILLING" => Some(Stage::Billing),
            "DELIVERY" => Some(Stage::Delivery),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 订单状态 (Order Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Active,    // 流转中
    Cancelled, // 已取消
    Delivered, // 已交付
}

impl OrderStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "ACTIVE",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Delivered => "DELIVERED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(OrderStatus::Active),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "DELIVERED" => Some(OrderStatus::Delivered),
            _ => None,
        }
    }

    /// 终态订单不再参与流转推进
    pub fn is_closed(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Delivered)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 阶段处理状态 (Stage Processing Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,    // 未开始
    InProgress, // 处理中
    Completed,  // 已完成
    Skipped,    // 已跳过 (快速通道)
}

impl StageStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::InProgress => "IN_PROGRESS",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Skipped => "SKIPPED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(StageStatus::Pending),
            "IN_PROGRESS" => Some(StageStatus::InProgress),
            "COMPLETED" => Some(StageStatus::Completed),
            "SKIPPED" => Some(StageStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 调拨状态 (Transfer Status)
// ==========================================
// 红线: 状态单调推进 PENDING → APPROVED → COMPLETED / REJECTED,
// 终态不可复活,由仓储层条件更新强制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,   // 待审批
    Approved,  // 审批通过 (待完成)
    Rejected,  // 已驳回 (终态)
    Completed, // 已完成 (终态)
}

impl TransferStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Approved => "APPROVED",
            TransferStatus::Rejected => "REJECTED",
            TransferStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(TransferStatus::Pending),
            "APPROVED" => Some(TransferStatus::Approved),
            "REJECTED" => Some(TransferStatus::Rejected),
            "COMPLETED" => Some(TransferStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Rejected | TransferStatus::Completed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 审批状态 (Approval Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,  // 待决定
    Approved, // 已通过
    Rejected, // 已驳回
}

impl ApprovalStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(ApprovalStatus::Pending),
            "APPROVED" => Some(ApprovalStatus::Approved),
            "REJECTED" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 调拨类别 (Transfer Category)
// ==========================================
// 分拣产出: SORTED_MATERIAL / REMAINING_ROLL / WASTE
// 裁切产出: CUT_MATERIAL / CUTTING_REMAINDER / WASTE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferCategory {
    SortedMaterial,   // 分拣成卷
    RemainingRoll,    // 分拣余卷
    CutMaterial,      // 裁切成品
    CuttingRemainder, // 裁切余料
    Waste,            // 废料
}

impl TransferCategory {
    /// 废料类别自动审批,不进入人工审批链
    pub fn is_waste(&self) -> bool {
        matches!(self, TransferCategory::Waste)
    }

    /// 生产性类别需要顺序审批
    pub fn is_productive(&self) -> bool {
        !self.is_waste()
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            TransferCategory::SortedMaterial => "SORTED_MATERIAL",
            TransferCategory::RemainingRoll => "REMAINING_ROLL",
            TransferCategory::CutMaterial => "CUT_MATERIAL",
            TransferCategory::CuttingRemainder => "CUTTING_REMAINDER",
            TransferCategory::Waste => "WASTE",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SORTED_MATERIAL" => Some(TransferCategory::SortedMaterial),
            "REMAINING_ROLL" => Some(TransferCategory::RemainingRoll),
            "CUT_MATERIAL" => Some(TransferCategory::CutMaterial),
            "CUTTING_REMAINDER" => Some(TransferCategory::CuttingRemainder),
            "WASTE" => Some(TransferCategory::Waste),
            _ => None,
        }
    }

    pub fn label_key(&self) -> &'static str {
        match self {
            TransferCategory::SortedMaterial => "category.sorted_material",
            TransferCategory::RemainingRoll => "category.remaining_roll",
            TransferCategory::CutMaterial => "category.cut_material",
            TransferCategory::CuttingRemainder => "category.cutting_remainder",
            TransferCategory::Waste => "category.waste",
        }
    }
}

impl fmt::Display for TransferCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 审批角色 (Approval Role)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    WarehouseManager, // 仓库主管 (审批调拨)
    WarehouseKeeper,  // 仓库库管 (录入阶段产出)
}

impl Role {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Role::WarehouseManager => "WAREHOUSE_MANAGER",
            Role::WarehouseKeeper => "WAREHOUSE_KEEPER",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "WAREHOUSE_MANAGER" => Some(Role::WarehouseManager),
            "WAREHOUSE_KEEPER" => Some(Role::WarehouseKeeper),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 操作主体 (Actor)
// ==========================================
// 红线: 系统自动操作使用显式 System 哨兵,禁止魔法用户ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    System,
    User { user_id: String },
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Actor::User {
            user_id: user_id.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Actor::System)
    }

    /// 审计字段使用的标识 (SYSTEM 或用户ID)
    pub fn as_audit_str(&self) -> &str {
        match self {
            Actor::System => "SYSTEM",
            Actor::User { user_id } => user_id.as_str(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_audit_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_fixed() {
        assert_eq!(Stage::Reservation.index(), 0);
        assert_eq!(Stage::Delivery.index(), 5);
        assert_eq!(
            Stage::Sorting.stages_after(),
            &[Stage::Cutting, Stage::Packaging, Stage::Billing, Stage::Delivery]
        );
        assert!(Stage::Delivery.stages_after().is_empty());
    }

    #[test]
    fn test_stage_db_roundtrip() {
        for stage in Stage::ORDERED {
            assert_eq!(Stage::from_db_str(stage.to_db_str()), Some(stage));
        }
        assert_eq!(Stage::from_db_str("sorting"), Some(Stage::Sorting));
        assert_eq!(Stage::from_db_str("未知阶段"), None);
    }

    #[test]
    fn test_billing_is_skippable() {
        assert!(!Stage::Billing.is_mandatory());
        assert!(Stage::Cutting.is_mandatory());
        assert!(Stage::Delivery.is_mandatory());
    }

    #[test]
    fn test_transfer_status_terminality() {
        assert!(TransferStatus::Rejected.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Approved.is_terminal());
    }

    #[test]
    fn test_actor_audit_str() {
        assert_eq!(Actor::System.as_audit_str(), "SYSTEM");
        assert_eq!(Actor::user("U100").as_audit_str(), "U100");
        assert!(Actor::System.is_system());
    }

    #[test]
    fn test_waste_category() {
        assert!(TransferCategory::Waste.is_waste());
        assert!(TransferCategory::SortedMaterial.is_productive());
        assert!(TransferCategory::CuttingRemainder.is_productive());
    }
}
