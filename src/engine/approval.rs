// ==========================================
// 纸卷流转管控系统 - 审批服务引擎
// ==========================================
// 状态机: PENDING → APPROVED → COMPLETED (正常路径)
//         PENDING → REJECTED (终态失败)
// 红线: 生产性调拨的库存变更只发生在完成步骤
// 红线: 完成失败时调拨停留在 APPROVED 可重试,审批行不回滚
// 红线: 多行变更 (审批行+调拨状态+库存+物料累计) 同一事务落盘
// ==========================================

use crate::domain::transfer::{chain_fully_approved, TransferApproval, WeightTransfer};
use crate::domain::types::{
    Actor, ApprovalStatus, Stage, TransferCategory, TransferStatus,
};
use crate::domain::audit_log::{AuditEvent, AuditLog};
use crate::engine::authorization::AuthorizationPort;
use crate::engine::weight::{approximately_equal, WeightPolicy};
use crate::repository::audit_repo::AuditLogRepository;
use crate::repository::auth_repo::VerificationRequestRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::material_repo::MaterialRequirementRepository;
use crate::repository::output_repo::StageOutputRepository;
use crate::repository::stock_repo::StockLedgerRepository;
use crate::repository::transfer_repo::{ApprovalRepository, TransferRepository};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

// ==========================================
// ApprovalError - 审批服务错误
// ==========================================
// 每个变体携带稳定错误码,调用方 (UI/自动任务) 据此分支
#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("审批人无权限: user={user_id}, transfer={transfer_id}")]
    Unauthorized { user_id: String, transfer_id: String },

    #[error("审批顺序违规: transfer={transfer_id}, 当前待决序号{expected_sequence}, 试图裁决序号{attempted_sequence}")]
    SequenceViolation {
        transfer_id: String,
        expected_sequence: i32,
        attempted_sequence: i32,
    },

    #[error("调拨已审批完毕,等待完成: {transfer_id}")]
    AlreadyApproved { transfer_id: String },

    #[error("调拨已驳回: {transfer_id}")]
    AlreadyRejected { transfer_id: String },

    #[error("调拨已完成: {transfer_id}")]
    AlreadyCompleted { transfer_id: String },

    #[error("前置核验请求未完成: {open_count}项")]
    RequestsPending { open_count: i64 },

    #[error("驳回原因过短: 至少{min_len}字符")]
    ReasonTooShort { min_len: usize },

    #[error("审批链缺失或已耗尽: {transfer_id}")]
    ChainMissing { transfer_id: String },

    #[error("调拨尚未审批完毕,不可完成: {transfer_id}")]
    NotYetApproved { transfer_id: String },

    #[error("并发裁决冲突,本次裁决未生效: {transfer_id}")]
    ConcurrentlyDecided { transfer_id: String },

    #[error("完成校验失败-库存不足: warehouse={warehouse_id}, 需要{requested_kg}kg, 可用{available_kg}kg")]
    InsufficientStock {
        warehouse_id: String,
        requested_kg: f64,
        available_kg: f64,
    },

    #[error("裁切完成校验失败: {reason}")]
    CuttingValidationFailed { reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ApprovalError {
    /// 稳定错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            ApprovalError::Unauthorized { .. } => "UNAUTHORIZED",
            ApprovalError::SequenceViolation { .. } => "SEQUENCE_VIOLATION",
            ApprovalError::AlreadyApproved { .. } => "ALREADY_APPROVED",
            ApprovalError::AlreadyRejected { .. } => "ALREADY_REJECTED",
            ApprovalError::AlreadyCompleted { .. } => "ALREADY_COMPLETED",
            ApprovalError::RequestsPending { .. } => "REQUESTS_PENDING",
            ApprovalError::ReasonTooShort { .. } => "REASON_TOO_SHORT",
            ApprovalError::ChainMissing { .. } => "CHAIN_MISSING",
            ApprovalError::NotYetApproved { .. } => "NOT_YET_APPROVED",
            ApprovalError::ConcurrentlyDecided { .. } => "CONCURRENT_DECISION",
            ApprovalError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            ApprovalError::CuttingValidationFailed { .. } => "CUTTING_VALIDATION_FAILED",
            ApprovalError::Repository(_) => "REPOSITORY_ERROR",
        }
    }
}

pub type ApprovalResult<T> = Result<T, ApprovalError>;

// ==========================================
// ApprovalOutcome - 审批动作结果
// ==========================================
#[derive(Debug)]
pub struct ApprovalOutcome {
    pub transfer_id: String,
    pub approved_sequence: i32,
    pub is_final: bool,
    pub transfer_status: TransferStatus,
    /// 末级审批后立即尝试完成;完成失败不回滚审批,错误在此浮出
    pub completion_error: Option<ApprovalError>,
}

// ==========================================
// ApprovalService - 审批服务
// ==========================================
pub struct ApprovalService<A: AuthorizationPort> {
    conn: Arc<Mutex<Connection>>,
    transfer_repo: Arc<TransferRepository>,
    approval_repo: Arc<ApprovalRepository>,
    verification_repo: Arc<VerificationRequestRepository>,
    audit_repo: Arc<AuditLogRepository>,
    authorization: Arc<A>,
    policy: WeightPolicy,
    reject_reason_min_len: usize,
}

impl<A: AuthorizationPort> ApprovalService<A> {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        transfer_repo: Arc<TransferRepository>,
        approval_repo: Arc<ApprovalRepository>,
        verification_repo: Arc<VerificationRequestRepository>,
        audit_repo: Arc<AuditLogRepository>,
        authorization: Arc<A>,
        policy: WeightPolicy,
        reject_reason_min_len: usize,
    ) -> Self {
        Self {
            conn,
            transfer_repo,
            approval_repo,
            verification_repo,
            audit_repo,
            authorization,
            policy,
            reject_reason_min_len,
        }
    }

    fn lock_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 状态前置守卫
    // ==========================================

    fn guard_decidable(transfer: &WeightTransfer) -> ApprovalResult<()> {
        match transfer.status {
            TransferStatus::Pending => Ok(()),
            TransferStatus::Approved => Err(ApprovalError::AlreadyApproved {
                transfer_id: transfer.transfer_id.clone(),
            }),
            TransferStatus::Rejected => Err(ApprovalError::AlreadyRejected {
                transfer_id: transfer.transfer_id.clone(),
            }),
            TransferStatus::Completed => Err(ApprovalError::AlreadyCompleted {
                transfer_id: transfer.transfer_id.clone(),
            }),
        }
    }

    /// 定位"轮到谁"并做授权判定
    ///
    /// - 匹配当前最小未决层级 → Ok
    /// - 匹配链上更靠后的未决层级 → SequenceViolation
    /// - 全不匹配 → Unauthorized
    fn resolve_actionable_level(
        &self,
        transfer_id: &str,
        user_id: &str,
    ) -> ApprovalResult<TransferApproval> {
        let next = self
            .approval_repo
            .next_pending(transfer_id)?
            .ok_or_else(|| ApprovalError::ChainMissing {
                transfer_id: transfer_id.to_string(),
            })?;

        if self
            .authorization
            .holds_role_at(user_id, next.required_role, &next.warehouse_id)?
        {
            return Ok(next);
        }

        // 匹配更靠后层级 → 顺序违规而非无权限
        let chain = self.approval_repo.list_for_transfer(transfer_id)?;
        for approval in chain
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending && a.approval_sequence > next.approval_sequence)
        {
            if self
                .authorization
                .holds_role_at(user_id, approval.required_role, &approval.warehouse_id)?
            {
                return Err(ApprovalError::SequenceViolation {
                    transfer_id: transfer_id.to_string(),
                    expected_sequence: next.approval_sequence,
                    attempted_sequence: approval.approval_sequence,
                });
            }
        }

        Err(ApprovalError::Unauthorized {
            user_id: user_id.to_string(),
            transfer_id: transfer_id.to_string(),
        })
    }

    fn require_user<'a>(&self, actor: &'a Actor, transfer_id: &str) -> ApprovalResult<&'a str> {
        match actor {
            Actor::User { user_id } => Ok(user_id.as_str()),
            // 人工审批链不接受系统哨兵 (系统只出现在废料自动审批)
            Actor::System => Err(ApprovalError::Unauthorized {
                user_id: Actor::System.as_audit_str().to_string(),
                transfer_id: transfer_id.to_string(),
            }),
        }
    }

    // ==========================================
    // Approve - 审批通过
    // ==========================================

    /// 审批通过当前层级;末级通过后立即尝试完成
    pub fn approve(
        &self,
        transfer_id: &str,
        actor: &Actor,
        notes: Option<String>,
    ) -> ApprovalResult<ApprovalOutcome> {
        let user_id = self.require_user(actor, transfer_id)?.to_string();

        let transfer = self.transfer_repo.get(transfer_id)?;
        Self::guard_decidable(&transfer)?;

        // 外部前置核验请求全部完成后才可裁决
        let open = self.verification_repo.count_open_for_transfer(transfer_id)?;
        if open > 0 {
            return Err(ApprovalError::RequestsPending { open_count: open });
        }

        let level = self.resolve_actionable_level(transfer_id, &user_id)?;

        // 裁决事务: 条件更新串行化并发审批人
        {
            let mut conn = self.lock_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

            ApprovalRepository::decide_tx(
                &tx,
                transfer_id,
                level.approval_sequence,
                ApprovalStatus::Approved,
                &user_id,
                notes.as_deref(),
            )
            .map_err(|e| match e {
                RepositoryError::ConditionalUpdateFailed { .. } => {
                    ApprovalError::ConcurrentlyDecided {
                        transfer_id: transfer_id.to_string(),
                    }
                }
                other => ApprovalError::Repository(other),
            })?;

            TransferRepository::bump_approval_sequence_tx(
                &tx,
                transfer_id,
                level.approval_sequence + 1,
            )?;

            if level.is_final_approval {
                TransferRepository::transition_status_tx(
                    &tx,
                    transfer_id,
                    TransferStatus::Pending,
                    TransferStatus::Approved,
                )?;
            }

            AuditLogRepository::insert_tx(
                &tx,
                &AuditLog::new(
                    Uuid::new_v4().to_string(),
                    AuditEvent::TransferApproved,
                    user_id.clone(),
                )
                .with_order(transfer.order_id.clone())
                .with_transfer(transfer_id)
                .with_payload(&json!({
                    "approval_sequence": level.approval_sequence,
                    "is_final": level.is_final_approval,
                })),
            )?;

            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        }

        info!(
            transfer_id = %transfer_id,
            sequence = level.approval_sequence,
            is_final = level.is_final_approval,
            approver = %user_id,
            "审批通过"
        );

        // 末级通过 → 立即尝试完成;失败不回滚审批,调拨停留 APPROVED 可重试
        let mut outcome = ApprovalOutcome {
            transfer_id: transfer_id.to_string(),
            approved_sequence: level.approval_sequence,
            is_final: level.is_final_approval,
            transfer_status: if level.is_final_approval {
                TransferStatus::Approved
            } else {
                TransferStatus::Pending
            },
            completion_error: None,
        };

        if level.is_final_approval {
            match self.complete(transfer_id, actor) {
                Ok(()) => outcome.transfer_status = TransferStatus::Completed,
                Err(e) => {
                    warn!(
                        transfer_id = %transfer_id,
                        error_code = e.error_code(),
                        "末级审批后完成失败,调拨停留 APPROVED 等待重试: {}",
                        e
                    );
                    outcome.completion_error = Some(e);
                }
            }
        }

        Ok(outcome)
    }

    // ==========================================
    // Reject - 驳回
    // ==========================================

    /// 驳回调拨 (终态,不再处理后续审批,永不发生库存变更)
    pub fn reject(&self, transfer_id: &str, actor: &Actor, reason: &str) -> ApprovalResult<()> {
        let user_id = self.require_user(actor, transfer_id)?.to_string();

        if reason.trim().chars().count() < self.reject_reason_min_len {
            return Err(ApprovalError::ReasonTooShort {
                min_len: self.reject_reason_min_len,
            });
        }

        let transfer = self.transfer_repo.get(transfer_id)?;
        Self::guard_decidable(&transfer)?;

        let open = self.verification_repo.count_open_for_transfer(transfer_id)?;
        if open > 0 {
            return Err(ApprovalError::RequestsPending { open_count: open });
        }

        let level = self.resolve_actionable_level(transfer_id, &user_id)?;

        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        ApprovalRepository::decide_tx(
            &tx,
            transfer_id,
            level.approval_sequence,
            ApprovalStatus::Rejected,
            &user_id,
            Some(reason),
        )
        .map_err(|e| match e {
            RepositoryError::ConditionalUpdateFailed { .. } => ApprovalError::ConcurrentlyDecided {
                transfer_id: transfer_id.to_string(),
            },
            other => ApprovalError::Repository(other),
        })?;

        TransferRepository::transition_status_tx(
            &tx,
            transfer_id,
            TransferStatus::Pending,
            TransferStatus::Rejected,
        )?;

        AuditLogRepository::insert_tx(
            &tx,
            &AuditLog::new(
                Uuid::new_v4().to_string(),
                AuditEvent::TransferRejected,
                user_id.clone(),
            )
            .with_order(transfer.order_id.clone())
            .with_transfer(transfer_id)
            .with_payload(&json!({
                "approval_sequence": level.approval_sequence,
                "reason": reason,
            })),
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(
            transfer_id = %transfer_id,
            sequence = level.approval_sequence,
            approver = %user_id,
            "调拨已驳回"
        );
        Ok(())
    }

    // ==========================================
    // Completion - 完成 (唯一的库存变更触发点)
    // ==========================================

    /// 完成已获完整审批的调拨
    ///
    /// 单一事务内:
    /// 1. 复核审批链完整 (防幻影完成)
    /// 2. 复核同组调拨的源仓可用量 (防并发消耗)
    /// 3. 裁切类别: 复核产出已验收、组类别齐全、组重量守恒
    /// 4. 库存调拨 + 物料累计重量追加 + 状态推进
    /// 任一步失败 → 整体回滚,调拨停留 APPROVED 可重试
    pub fn complete(&self, transfer_id: &str, actor: &Actor) -> ApprovalResult<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let transfer = TransferRepository::get_tx(&tx, transfer_id)?;
        match transfer.status {
            TransferStatus::Approved => {}
            TransferStatus::Pending => {
                return Err(ApprovalError::NotYetApproved {
                    transfer_id: transfer_id.to_string(),
                })
            }
            TransferStatus::Rejected => {
                return Err(ApprovalError::AlreadyRejected {
                    transfer_id: transfer_id.to_string(),
                })
            }
            TransferStatus::Completed => {
                return Err(ApprovalError::AlreadyCompleted {
                    transfer_id: transfer_id.to_string(),
                })
            }
        }

        // 防幻影完成: 链上每级均 APPROVED 且序号无空洞
        let chain = ApprovalRepository::list_for_transfer_tx(&tx, transfer_id)?;
        if !chain_fully_approved(&chain) {
            return Err(ApprovalError::NotYetApproved {
                transfer_id: transfer_id.to_string(),
            });
        }

        let requirement = MaterialRequirementRepository::get_tx(&tx, &transfer.requirement_id)?;
        let group = TransferRepository::list_by_group_tx(&tx, &transfer.transfer_group_id)?;

        // 组内未落盘的重量按源仓聚合,复核可用量
        // (同组其他调拨随后完成时也要扣同一源仓)
        let mut pending_by_warehouse: HashMap<&str, f64> = HashMap::new();
        for t in group.iter().filter(|t| !t.status.is_terminal()) {
            *pending_by_warehouse.entry(t.source_warehouse_id.as_str()).or_insert(0.0) +=
                t.weight_kg;
        }
        for (warehouse_id, required_kg) in &pending_by_warehouse {
            let available = StockLedgerRepository::available_quantity_tx(
                &tx,
                warehouse_id,
                &requirement.material_id,
            )?;
            if available + 1e-9 < *required_kg {
                return Err(ApprovalError::InsufficientStock {
                    warehouse_id: warehouse_id.to_string(),
                    requested_kg: *required_kg,
                    available_kg: available,
                });
            }
        }

        // 裁切类别的附加完成校验
        if matches!(
            transfer.category,
            TransferCategory::CutMaterial | TransferCategory::CuttingRemainder
        ) {
            self.validate_cutting_group(&tx, &transfer, &group)?;
        }

        // 库存变更 (生产性调拨必有目的仓)
        match &transfer.destination_warehouse_id {
            Some(destination) => {
                StockLedgerRepository::transfer_tx(
                    &tx,
                    &transfer.source_warehouse_id,
                    destination,
                    &requirement.material_id,
                    transfer.weight_kg,
                )
                .map_err(|e| match e {
                    RepositoryError::InsufficientStock {
                        warehouse_id,
                        requested_kg,
                        available_kg,
                        ..
                    } => ApprovalError::InsufficientStock {
                        warehouse_id,
                        requested_kg,
                        available_kg,
                    },
                    other => ApprovalError::Repository(other),
                })?;
            }
            None => {
                // 废料处置: 源仓直接出库
                StockLedgerRepository::remove_tx(
                    &tx,
                    &transfer.source_warehouse_id,
                    &requirement.material_id,
                    transfer.weight_kg,
                )
                .map_err(|e| match e {
                    RepositoryError::InsufficientStock {
                        warehouse_id,
                        requested_kg,
                        available_kg,
                        ..
                    } => ApprovalError::InsufficientStock {
                        warehouse_id,
                        requested_kg,
                        available_kg,
                    },
                    other => ApprovalError::Repository(other),
                })?;
            }
        }

        // 物料累计重量追加 (与库存变更同事务)
        match transfer.category {
            TransferCategory::SortedMaterial | TransferCategory::RemainingRoll => {
                MaterialRequirementRepository::add_stage_weight_tx(
                    &tx,
                    &transfer.requirement_id,
                    Stage::Sorting,
                    transfer.weight_kg,
                )?;
            }
            TransferCategory::CutMaterial | TransferCategory::CuttingRemainder => {
                MaterialRequirementRepository::add_stage_weight_tx(
                    &tx,
                    &transfer.requirement_id,
                    Stage::Cutting,
                    transfer.weight_kg,
                )?;
            }
            TransferCategory::Waste => {
                MaterialRequirementRepository::add_waste_weight_tx(
                    &tx,
                    &transfer.requirement_id,
                    transfer.weight_kg,
                )?;
            }
        }

        TransferRepository::transition_status_tx(
            &tx,
            transfer_id,
            TransferStatus::Approved,
            TransferStatus::Completed,
        )?;

        AuditLogRepository::insert_tx(
            &tx,
            &AuditLog::new(
                Uuid::new_v4().to_string(),
                AuditEvent::TransferCompleted,
                actor.as_audit_str().to_string(),
            )
            .with_order(transfer.order_id.clone())
            .with_transfer(transfer_id)
            .with_payload(&json!({
                "category": transfer.category.to_db_str(),
                "weight_kg": transfer.weight_kg,
                "source_warehouse": transfer.source_warehouse_id,
                "destination_warehouse": transfer.destination_warehouse_id,
            })),
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(
            transfer_id = %transfer_id,
            weight_kg = transfer.weight_kg,
            category = %transfer.category,
            "调拨完成,库存已变更"
        );
        Ok(())
    }

    /// 裁切组完成校验
    ///
    /// 1. 来源裁切产出必须已验收
    /// 2. 产出记录的非零桶类别必须都已派生调拨 (含废料)
    /// 3. 组内调拨重量合计 ≈ 裁切产出 cut+remainder+waste
    fn validate_cutting_group(
        &self,
        tx: &rusqlite::Transaction<'_>,
        transfer: &WeightTransfer,
        group: &[WeightTransfer],
    ) -> ApprovalResult<()> {
        let output_id = transfer.output_id.as_deref().ok_or_else(|| {
            ApprovalError::CuttingValidationFailed {
                reason: "调拨缺少来源裁切产出".to_string(),
            }
        })?;
        let output = StageOutputRepository::get_tx(tx, output_id)?;

        if !output.approved {
            return Err(ApprovalError::CuttingValidationFailed {
                reason: format!("裁切产出{}未验收", output_id),
            });
        }

        // 期望类别集合来自产出记录的非零桶
        let mut expected: Vec<(TransferCategory, f64)> = Vec::new();
        if output.cut_weight_kg.unwrap_or(0.0) > 0.0 {
            expected.push((TransferCategory::CutMaterial, output.cut_weight_kg.unwrap_or(0.0)));
        }
        if output.remainder_weight_kg.unwrap_or(0.0) > 0.0 {
            expected.push((
                TransferCategory::CuttingRemainder,
                output.remainder_weight_kg.unwrap_or(0.0),
            ));
        }
        if output.waste_weight_kg > 0.0 {
            expected.push((TransferCategory::Waste, output.waste_weight_kg));
        }

        for (category, _) in &expected {
            if !group.iter().any(|t| t.category == *category) {
                return Err(ApprovalError::CuttingValidationFailed {
                    reason: format!("组内缺少{}类别的调拨", category),
                });
            }
        }

        // 驳回的调拨不计入守恒口径
        let group_sum: f64 = group
            .iter()
            .filter(|t| t.status != TransferStatus::Rejected)
            .map(|t| t.weight_kg)
            .sum();
        let expected_sum: f64 = output.cut_weight_kg.unwrap_or(0.0)
            + output.remainder_weight_kg.unwrap_or(0.0)
            + output.waste_weight_kg;
        if !approximately_equal(group_sum, expected_sum, self.policy.tolerance_kg) {
            return Err(ApprovalError::CuttingValidationFailed {
                reason: format!(
                    "组重量{}kg与裁切产出{}kg不守恒",
                    group_sum, expected_sum
                ),
            });
        }

        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 调拨当前审批状态 (调拨 + 全审批链)
    pub fn get_approval_status(
        &self,
        transfer_id: &str,
    ) -> ApprovalResult<(WeightTransfer, Vec<TransferApproval>)> {
        let transfer = self.transfer_repo.get(transfer_id)?;
        let chain = self.approval_repo.list_for_transfer(transfer_id)?;
        Ok((transfer, chain))
    }
}
