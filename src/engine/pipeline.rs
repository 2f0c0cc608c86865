// ==========================================
// 纸卷流转管控系统 - 流转编排引擎
// ==========================================
// 职责: 驱动订单沿固定阶段序推进,推进前判定就绪条件
// 红线: 未决调拨指向当前阶段时禁止推进
// 红线: 每次推进追加不可变迁移日志
// ==========================================

use crate::domain::audit_log::{AuditEvent, AuditLog};
use crate::domain::order::{PipelineOrder, StageTransitionLog};
use crate::domain::types::{Actor, OrderStatus, Stage, StageStatus};
use crate::repository::audit_repo::AuditLogRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::material_repo::MaterialRequirementRepository;
use crate::repository::order_repo::OrderRepository;
use crate::repository::transfer_repo::TransferRepository;
use rusqlite::Connection;
use serde_json::json;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

// ==========================================
// PipelineError - 流转编排错误
// ==========================================
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("订单已关闭 ({status}),不可推进: {order_id}")]
    OrderClosed { order_id: String, status: String },

    #[error("当前阶段{stage}处理未完成,不可推进")]
    StageNotCompleted { stage: Stage },

    #[error("{count}笔未决调拨指向阶段{stage},推进被阻断")]
    PendingTransfers { stage: Stage, count: i64 },

    #[error("无可推进的下一阶段: {order_id}")]
    NoNextStage { order_id: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PipelineError {
    /// 稳定错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            PipelineError::OrderClosed { .. } => "ORDER_CLOSED",
            PipelineError::StageNotCompleted { .. } => "STAGE_NOT_COMPLETED",
            PipelineError::PendingTransfers { .. } => "PENDING_TRANSFERS",
            PipelineError::NoNextStage { .. } => "NO_NEXT_STAGE",
            PipelineError::Repository(_) => "REPOSITORY_ERROR",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

// ==========================================
// AdvanceCheck - 就绪判定结果 (可解释)
// ==========================================
#[derive(Debug, Clone)]
pub struct AdvanceCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

// ==========================================
// PipelineOrchestrator - 流转编排器
// ==========================================
pub struct PipelineOrchestrator {
    conn: Arc<Mutex<Connection>>,
    order_repo: Arc<OrderRepository>,
    material_repo: Arc<MaterialRequirementRepository>,
    transfer_repo: Arc<TransferRepository>,
    audit_repo: Arc<AuditLogRepository>,
    urgent_fast_path_enabled: bool,
}

impl PipelineOrchestrator {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        order_repo: Arc<OrderRepository>,
        material_repo: Arc<MaterialRequirementRepository>,
        transfer_repo: Arc<TransferRepository>,
        audit_repo: Arc<AuditLogRepository>,
        urgent_fast_path_enabled: bool,
    ) -> Self {
        Self {
            conn,
            order_repo,
            material_repo,
            transfer_repo,
            audit_repo,
            urgent_fast_path_enabled,
        }
    }

    fn lock_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 就绪判定
    // ==========================================

    /// 订单当前是否可推进 (带可解释原因)
    pub fn can_advance(&self, order_id: &str) -> PipelineResult<AdvanceCheck> {
        let order = self.order_repo.get(order_id)?;
        match self.check_advance(&order) {
            Ok(()) => Ok(AdvanceCheck {
                allowed: true,
                reason: None,
            }),
            Err(e @ (PipelineError::OrderClosed { .. }
            | PipelineError::StageNotCompleted { .. }
            | PipelineError::PendingTransfers { .. })) => Ok(AdvanceCheck {
                allowed: false,
                reason: Some(e.to_string()),
            }),
            Err(e) => Err(e),
        }
    }

    fn check_advance(&self, order: &PipelineOrder) -> PipelineResult<()> {
        if order.status.is_closed() {
            return Err(PipelineError::OrderClosed {
                order_id: order.order_id.clone(),
                status: order.status.to_db_str().to_string(),
            });
        }

        // 当前阶段处理记录必须已完成
        let processing = self
            .order_repo
            .get_processing(&order.order_id, order.current_stage)?;
        let completed = processing
            .map(|p| p.status == StageStatus::Completed)
            .unwrap_or(false);
        if !completed {
            return Err(PipelineError::StageNotCompleted {
                stage: order.current_stage,
            });
        }

        // 指向当前阶段的未决调拨阻断推进
        let pending = self
            .transfer_repo
            .count_pending_targeting(&order.order_id, order.current_stage)?;
        if pending > 0 {
            return Err(PipelineError::PendingTransfers {
                stage: order.current_stage,
                count: pending,
            });
        }

        Ok(())
    }

    // ==========================================
    // 下一阶段解析
    // ==========================================

    /// 解析下一个可进入的阶段
    ///
    /// 沿固定阶段序向后扫描:
    /// - 非强制阶段且跳过谓词成立 → 跳过
    /// - 返回第一个前置条件成立的阶段
    pub fn next_stage(&self, order: &PipelineOrder) -> PipelineResult<Option<Stage>> {
        for &stage in order.current_stage.stages_after() {
            if self.should_skip(stage, order) && !stage.is_mandatory() {
                debug!(order_id = %order.order_id, stage = %stage, "加急快速通道跳过阶段");
                continue;
            }
            if self.precondition_met(stage, order)? {
                return Ok(Some(stage));
            }
        }
        Ok(None)
    }

    /// 跳过谓词: 加急单走快速通道跳过结算
    fn should_skip(&self, stage: Stage, order: &PipelineOrder) -> bool {
        stage == Stage::Billing && order.urgent_flag && self.urgent_fast_path_enabled
    }

    /// 阶段前置条件
    fn precondition_met(&self, stage: Stage, order: &PipelineOrder) -> PipelineResult<bool> {
        let met = match stage {
            // 起始阶段,不作为推进目标
            Stage::Reservation => false,
            // 分拣: 存在已提取的物料
            Stage::Sorting => self
                .material_repo
                .list_by_order(&order.order_id)?
                .iter()
                .any(|r| r.extracted_weight_kg > 0.0),
            // 裁切: 分拣处理已完成
            Stage::Cutting => self.stage_completed(&order.order_id, Stage::Sorting)?,
            // 包装: 裁切处理已完成
            Stage::Packaging => self.stage_completed(&order.order_id, Stage::Cutting)?,
            // 结算: 无额外前置
            Stage::Billing => true,
            // 配送: 已收款,或加急快速通道免结算
            Stage::Delivery => {
                order.payment_received
                    || (order.urgent_flag && self.urgent_fast_path_enabled)
            }
        };
        Ok(met)
    }

    fn stage_completed(&self, order_id: &str, stage: Stage) -> PipelineResult<bool> {
        Ok(self
            .order_repo
            .get_processing(order_id, stage)?
            .map(|p| p.status == StageStatus::Completed)
            .unwrap_or(false))
    }

    // ==========================================
    // 推进
    // ==========================================

    /// 推进订单到下一阶段
    ///
    /// 单一事务内: 跳过阶段落 SKIPPED 行 + 激活下一阶段处理记录
    /// + 移动订单阶段指针 + 追加不可变迁移日志
    pub fn advance(&self, order_id: &str, actor: &Actor) -> PipelineResult<Stage> {
        let order = self.order_repo.get(order_id)?;
        self.check_advance(&order)?;

        let next = self
            .next_stage(&order)?
            .ok_or_else(|| PipelineError::NoNextStage {
                order_id: order_id.to_string(),
            })?;

        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        // 当前与目标之间被跳过的阶段落 SKIPPED
        for &stage in order.current_stage.stages_after() {
            if stage == next {
                break;
            }
            OrderRepository::upsert_processing_tx(&tx, order_id, stage, StageStatus::Skipped)?;
        }

        OrderRepository::upsert_processing_tx(&tx, order_id, next, StageStatus::InProgress)?;
        OrderRepository::move_to_stage_tx(&tx, order_id, next)?;
        OrderRepository::append_transition_tx(
            &tx,
            &StageTransitionLog {
                log_id: Uuid::new_v4().to_string(),
                order_id: order_id.to_string(),
                previous_stage: order.current_stage,
                new_stage: next,
                actor: actor.as_audit_str().to_string(),
                transitioned_at: chrono::Utc::now(),
            },
        )?;

        AuditLogRepository::insert_tx(
            &tx,
            &AuditLog::new(
                Uuid::new_v4().to_string(),
                AuditEvent::StageAdvanced,
                actor.as_audit_str().to_string(),
            )
            .with_order(order_id)
            .with_payload(&json!({
                "previous_stage": order.current_stage.to_db_str(),
                "new_stage": next.to_db_str(),
            })),
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(
            order_id = %order_id,
            from = %order.current_stage,
            to = %next,
            actor = %actor,
            "订单阶段推进"
        );
        Ok(next)
    }

    // ==========================================
    // 阶段完成
    // ==========================================

    /// 标记订单当前阶段处理完成
    ///
    /// 配送阶段完成时订单转为已交付,并按已裁切口径落交付重量
    pub fn complete_current_stage(&self, order_id: &str, actor: &Actor) -> PipelineResult<()> {
        let order = self.order_repo.get(order_id)?;
        if order.status.is_closed() {
            return Err(PipelineError::OrderClosed {
                order_id: order_id.to_string(),
                status: order.status.to_db_str().to_string(),
            });
        }

        self.order_repo
            .complete_processing(order_id, order.current_stage)?;

        if order.current_stage == Stage::Delivery {
            let requirements = self.material_repo.list_by_order(order_id)?;
            let mut conn = self.lock_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            for req in &requirements {
                if req.cut_weight_kg > 0.0 {
                    MaterialRequirementRepository::add_stage_weight_tx(
                        &tx,
                        &req.requirement_id,
                        Stage::Delivery,
                        req.cut_weight_kg,
                    )?;
                }
            }
            OrderRepository::set_status_tx(&tx, order_id, OrderStatus::Delivered)?;
            tx.commit()
                .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
            info!(order_id = %order_id, "订单已交付");
        }

        self.audit_repo.insert(
            &AuditLog::new(
                Uuid::new_v4().to_string(),
                AuditEvent::StageCompleted,
                actor.as_audit_str().to_string(),
            )
            .with_order(order_id)
            .with_payload(&json!({ "stage": order.current_stage.to_db_str() })),
        )?;

        Ok(())
    }
}
