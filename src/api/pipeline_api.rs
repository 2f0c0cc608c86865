// ==========================================
// 纸卷流转管控系统 - 流转推进 API
// ==========================================
// 职责: 订单创建/推进/阶段完成/取消,委托流转编排引擎
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::flow_config_trait::FlowConfigReader;
use crate::domain::material::{MaterialRequirement, RollSpec};
use crate::domain::order::{PipelineOrder, StageTransitionLog};
use crate::domain::types::{Actor, Stage};
use crate::engine::pipeline::{AdvanceCheck, PipelineOrchestrator};
use crate::repository::audit_repo::AuditLogRepository;
use crate::repository::material_repo::MaterialRequirementRepository;
use crate::repository::order_repo::OrderRepository;
use crate::repository::transfer_repo::TransferRepository;

// ==========================================
// OrderCreateRequest - 建单请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreateRequest {
    pub order_no: String,
    pub urgent_flag: bool,
    pub materials: Vec<MaterialLineRequest>,
}

/// 订单物料行请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialLineRequest {
    pub material_id: String,
    pub requested_weight_kg: f64,
    pub roll_spec: RollSpec,
}

// ==========================================
// PipelineApi - 流转推进 API
// ==========================================
pub struct PipelineApi<C: FlowConfigReader> {
    conn: Arc<Mutex<Connection>>,
    config: Arc<C>,
    order_repo: Arc<OrderRepository>,
    material_repo: Arc<MaterialRequirementRepository>,
    transfer_repo: Arc<TransferRepository>,
    audit_repo: Arc<AuditLogRepository>,
}

impl<C: FlowConfigReader> PipelineApi<C> {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: Arc<C>,
        order_repo: Arc<OrderRepository>,
        material_repo: Arc<MaterialRequirementRepository>,
        transfer_repo: Arc<TransferRepository>,
        audit_repo: Arc<AuditLogRepository>,
    ) -> Self {
        Self {
            conn,
            config,
            order_repo,
            material_repo,
            transfer_repo,
            audit_repo,
        }
    }

    /// 按当前配置组装编排器
    async fn orchestrator(&self) -> ApiResult<PipelineOrchestrator> {
        let fast_path = self
            .config
            .get_urgent_fast_path_enabled()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        Ok(PipelineOrchestrator::new(
            self.conn.clone(),
            self.order_repo.clone(),
            self.material_repo.clone(),
            self.transfer_repo.clone(),
            self.audit_repo.clone(),
            fast_path,
        ))
    }

    // ==========================================
    // 建单
    // ==========================================

    /// 创建订单并展开物料行
    pub fn create_order(&self, request: &OrderCreateRequest) -> ApiResult<PipelineOrder> {
        if request.order_no.trim().is_empty() {
            return Err(ApiError::InvalidInput("订单号不能为空".to_string()));
        }
        if request.materials.is_empty() {
            return Err(ApiError::InvalidInput("订单至少包含一条物料需求".to_string()));
        }
        for line in &request.materials {
            if line.requested_weight_kg <= 0.0 {
                return Err(ApiError::InvalidInput(format!(
                    "物料{}需求重量必须为正",
                    line.material_id
                )));
            }
        }

        let mut order = PipelineOrder::new(Uuid::new_v4().to_string(), request.order_no.clone());
        order.urgent_flag = request.urgent_flag;
        self.order_repo.insert(&order)?;

        for line in &request.materials {
            let requirement = MaterialRequirement::new(
                Uuid::new_v4().to_string(),
                order.order_id.clone(),
                line.material_id.clone(),
                line.requested_weight_kg,
                line.roll_spec.clone(),
            );
            self.material_repo.insert(&requirement)?;
        }

        Ok(order)
    }

    // ==========================================
    // 推进
    // ==========================================

    /// 订单是否可推进 (带可解释原因)
    pub async fn can_advance(&self, order_id: &str) -> ApiResult<AdvanceCheck> {
        Ok(self.orchestrator().await?.can_advance(order_id)?)
    }

    /// 解析下一阶段 (不落盘)
    pub async fn next_stage(&self, order_id: &str) -> ApiResult<Option<Stage>> {
        let order = self.order_repo.get(order_id)?;
        Ok(self.orchestrator().await?.next_stage(&order)?)
    }

    /// 推进订单到下一阶段
    pub async fn advance_order(&self, order_id: &str, actor: &Actor) -> ApiResult<Stage> {
        Ok(self.orchestrator().await?.advance(order_id, actor)?)
    }

    /// 标记当前阶段处理完成
    pub async fn complete_current_stage(&self, order_id: &str, actor: &Actor) -> ApiResult<()> {
        self.orchestrator()
            .await?
            .complete_current_stage(order_id, actor)?;
        Ok(())
    }

    // ==========================================
    // 订单状态
    // ==========================================

    /// 取消订单 (终态)
    pub fn cancel_order(&self, order_id: &str) -> ApiResult<()> {
        let order = self.order_repo.get(order_id)?;
        if order.status.is_closed() {
            return Err(ApiError::InvalidInput(format!(
                "订单已关闭 ({}),不可取消",
                order.status
            )));
        }
        self.order_repo
            .set_status(order_id, crate::domain::types::OrderStatus::Cancelled)?;
        Ok(())
    }

    /// 登记收款 (配送前置条件)
    pub fn mark_payment_received(&self, order_id: &str) -> ApiResult<()> {
        self.order_repo.set_payment_received(order_id, true)?;
        Ok(())
    }

    /// 查询订单
    pub fn get_order(&self, order_id: &str) -> ApiResult<PipelineOrder> {
        Ok(self.order_repo.get(order_id)?)
    }

    /// 订单阶段迁移日志 (审计追踪)
    pub fn get_transition_log(&self, order_id: &str) -> ApiResult<Vec<StageTransitionLog>> {
        Ok(self.order_repo.list_transitions(order_id)?)
    }
}
