// ==========================================
// 纸卷流转管控系统 - 调拨审批 API
// ==========================================
// 职责: 审批/驳回/完成重试 + 审批状态/待办/历史查询
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::config::flow_config_trait::FlowConfigReader;
use crate::domain::transfer::{TransferApproval, WeightTransfer};
use crate::domain::types::Actor;
use crate::engine::approval::{ApprovalOutcome, ApprovalService};
use crate::engine::weight::WeightPolicy;
use crate::repository::audit_repo::AuditLogRepository;
use crate::repository::auth_repo::{UserRoleRepository, VerificationRequestRepository};
use crate::repository::transfer_repo::{ApprovalRepository, TransferRepository};
use uuid::Uuid;

// ==========================================
// ApprovalStatusView - 审批状态视图
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStatusView {
    pub transfer: WeightTransfer,
    pub approvals: Vec<TransferApproval>,
}

// ==========================================
// PendingApprovalView - 待办审批视图
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApprovalView {
    pub approval: TransferApproval,
    pub transfer: WeightTransfer,
}

// ==========================================
// TransferApi - 调拨审批 API
// ==========================================
pub struct TransferApi<C: FlowConfigReader> {
    conn: Arc<Mutex<Connection>>,
    config: Arc<C>,
    transfer_repo: Arc<TransferRepository>,
    approval_repo: Arc<ApprovalRepository>,
    verification_repo: Arc<VerificationRequestRepository>,
    user_role_repo: Arc<UserRoleRepository>,
    audit_repo: Arc<AuditLogRepository>,
}

impl<C: FlowConfigReader> TransferApi<C> {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: Arc<C>,
        transfer_repo: Arc<TransferRepository>,
        approval_repo: Arc<ApprovalRepository>,
        verification_repo: Arc<VerificationRequestRepository>,
        user_role_repo: Arc<UserRoleRepository>,
        audit_repo: Arc<AuditLogRepository>,
    ) -> Self {
        Self {
            conn,
            config,
            transfer_repo,
            approval_repo,
            verification_repo,
            user_role_repo,
            audit_repo,
        }
    }

    /// 按当前配置组装审批服务
    async fn approval_service(&self) -> ApiResult<ApprovalService<UserRoleRepository>> {
        let tolerance_kg = self
            .config
            .get_weight_tolerance_kg()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        let waste_ceiling = self
            .config
            .get_cutting_waste_ceiling()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        let reject_reason_min_len = self
            .config
            .get_reject_reason_min_len()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;

        Ok(ApprovalService::new(
            self.conn.clone(),
            self.transfer_repo.clone(),
            self.approval_repo.clone(),
            self.verification_repo.clone(),
            self.audit_repo.clone(),
            self.user_role_repo.clone(),
            WeightPolicy {
                tolerance_kg,
                waste_ceiling,
            },
            reject_reason_min_len,
        ))
    }

    // ==========================================
    // 审批动作
    // ==========================================

    /// 审批通过 (末级通过后自动尝试完成)
    pub async fn approve_transfer(
        &self,
        transfer_id: &str,
        user_id: &str,
        notes: Option<String>,
    ) -> ApiResult<ApprovalOutcome> {
        if user_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("审批人不能为空".to_string()));
        }
        let service = self.approval_service().await?;
        let outcome = service.approve(transfer_id, &Actor::user(user_id), notes)?;
        Ok(outcome)
    }

    /// 驳回 (终态,原因必填且满足最小长度)
    pub async fn reject_transfer(
        &self,
        transfer_id: &str,
        user_id: &str,
        reason: &str,
    ) -> ApiResult<()> {
        if user_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("审批人不能为空".to_string()));
        }
        let service = self.approval_service().await?;
        service.reject(transfer_id, &Actor::user(user_id), reason)?;
        Ok(())
    }

    /// 完成重试 (完成校验失败后调拨停留 APPROVED,可由任务或人工重试)
    pub async fn complete_transfer(&self, transfer_id: &str, actor: &Actor) -> ApiResult<()> {
        let service = self.approval_service().await?;
        service.complete(transfer_id, actor)?;
        Ok(())
    }

    // ==========================================
    // 前置核验请求
    // ==========================================

    /// 创建库存核验等前置请求 (未完成期间阻断审批)
    pub fn create_verification_request(
        &self,
        transfer_id: &str,
        request_type: &str,
    ) -> ApiResult<String> {
        let request_id = Uuid::new_v4().to_string();
        self.verification_repo
            .create(&request_id, transfer_id, request_type)?;
        Ok(request_id)
    }

    /// 完成前置核验请求
    pub fn complete_verification_request(&self, request_id: &str) -> ApiResult<()> {
        self.verification_repo.complete(request_id)?;
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 调拨审批状态 (调拨 + 全审批链)
    pub fn get_approval_status(&self, transfer_id: &str) -> ApiResult<ApprovalStatusView> {
        let transfer = self.transfer_repo.get(transfer_id)?;
        let approvals = self.approval_repo.list_for_transfer(transfer_id)?;
        Ok(ApprovalStatusView {
            transfer,
            approvals,
        })
    }

    /// 用户待办审批 (只含轮到该用户的层级)
    pub fn get_pending_approvals_for_user(
        &self,
        user_id: &str,
    ) -> ApiResult<Vec<PendingApprovalView>> {
        let approvals = self.approval_repo.pending_for_user(user_id)?;
        let mut views = Vec::with_capacity(approvals.len());
        for approval in approvals {
            let transfer = self.transfer_repo.get(&approval.transfer_id)?;
            views.push(PendingApprovalView { approval, transfer });
        }
        Ok(views)
    }

    /// 订单调拨历史
    pub fn get_transfer_history(&self, order_id: &str) -> ApiResult<Vec<WeightTransfer>> {
        Ok(self.transfer_repo.list_by_order(order_id)?)
    }
}
