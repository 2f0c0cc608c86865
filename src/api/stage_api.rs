// ==========================================
// 纸卷流转管控系统 - 阶段产出 API
// ==========================================
// 职责: 物料预留/提取、分拣/裁切产出验收与调拨派生
// 红线: 校验不通过时零调拨落盘
// 红线: 产出 + 调拨 + 审批链 + 废料处置同一事务
// ==========================================

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::flow_config_trait::FlowConfigReader;
use crate::domain::audit_log::{AuditEvent, AuditLog};
use crate::domain::stage_output::{CuttingOutputRequest, SortingOutputRequest, StageOutput};
use crate::domain::types::{Actor, Stage, TransferStatus};
use crate::engine::stage_validator::StageOutputValidator;
use crate::engine::transfer_builder::{PlannedTransfer, TransferBuilder};
use crate::engine::weight::WeightPolicy;
use crate::repository::audit_repo::AuditLogRepository;
use crate::repository::auth_repo::UserRoleRepository;
use crate::repository::error::RepositoryError;
use crate::repository::material_repo::MaterialRequirementRepository;
use crate::repository::output_repo::StageOutputRepository;
use crate::repository::stock_repo::StockLedgerRepository;
use crate::repository::transfer_repo::{ApprovalRepository, TransferRepository};

// ==========================================
// StageRecordResult - 产出验收结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecordResult {
    pub output_id: String,
    pub transfer_group_id: Option<String>,
    pub transfer_ids: Vec<String>,
    pub pending_transfer_count: usize,
    pub waste_transfer_count: usize,
}

// ==========================================
// StageApi - 阶段产出 API
// ==========================================
pub struct StageApi<C: FlowConfigReader> {
    conn: Arc<Mutex<Connection>>,
    config: Arc<C>,
    material_repo: Arc<MaterialRequirementRepository>,
    stock_repo: Arc<StockLedgerRepository>,
    user_role_repo: Arc<UserRoleRepository>,
    audit_repo: Arc<AuditLogRepository>,
    builder: TransferBuilder,
}

impl<C: FlowConfigReader> StageApi<C> {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        config: Arc<C>,
        material_repo: Arc<MaterialRequirementRepository>,
        stock_repo: Arc<StockLedgerRepository>,
        user_role_repo: Arc<UserRoleRepository>,
        audit_repo: Arc<AuditLogRepository>,
    ) -> Self {
        Self {
            conn,
            config,
            material_repo,
            stock_repo,
            user_role_repo,
            audit_repo,
            builder: TransferBuilder::new(),
        }
    }

    fn lock_conn(&self) -> ApiResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", e)))
    }

    async fn policy(&self) -> ApiResult<WeightPolicy> {
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
        Ok(WeightPolicy {
            tolerance_kg,
            waste_ceiling,
        })
    }

    async fn stage_warehouse(&self, stage: Stage) -> ApiResult<String> {
        self.config
            .get_stage_warehouse(stage)
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?
            .ok_or_else(|| ApiError::InternalError(format!("阶段{}未配置仓库", stage)))
    }

    /// 录入人授权: 必须指派到产出所在仓 (系统哨兵豁免)
    fn guard_recorder(&self, actor: &Actor, warehouse_id: &str) -> ApiResult<()> {
        if let Actor::User { user_id } = actor {
            let assigned = self
                .user_role_repo
                .is_assigned_to_warehouse(user_id, warehouse_id)?;
            if !assigned {
                return Err(ApiError::Forbidden(format!(
                    "用户{}未指派到仓库{}",
                    user_id, warehouse_id
                )));
            }
        }
        Ok(())
    }

    // ==========================================
    // 预留 / 提取
    // ==========================================

    /// 预留原料库存 (预留阶段)
    pub async fn reserve_material(
        &self,
        requirement_id: &str,
        actor: &Actor,
    ) -> ApiResult<()> {
        let requirement = self.material_repo.get(requirement_id)?;
        let raw_warehouse = self.stage_warehouse(Stage::Reservation).await?;

        self.stock_repo.reserve(
            &raw_warehouse,
            &requirement.material_id,
            requirement.requested_weight_kg,
        )?;

        self.audit_repo.insert(
            &AuditLog::new(
                Uuid::new_v4().to_string(),
                AuditEvent::StockReserved,
                actor.as_audit_str().to_string(),
            )
            .with_order(requirement.order_id.clone())
            .with_payload(&json!({
                "requirement_id": requirement_id,
                "warehouse": raw_warehouse,
                "weight_kg": requirement.requested_weight_kg,
            })),
        )?;

        info!(
            requirement_id = %requirement_id,
            weight_kg = requirement.requested_weight_kg,
            "原料库存已预留"
        );
        Ok(())
    }

    /// 提取原料 (原料仓出库 → 分拣仓入库,累计已提取重量)
    pub async fn record_extraction(
        &self,
        requirement_id: &str,
        weight_kg: f64,
        actor: &Actor,
    ) -> ApiResult<()> {
        if weight_kg <= 0.0 {
            return Err(ApiError::InvalidInput(format!(
                "提取重量必须为正: {}",
                weight_kg
            )));
        }

        let requirement = self.material_repo.get(requirement_id)?;
        let raw_warehouse = self.stage_warehouse(Stage::Reservation).await?;
        let sorting_warehouse = self.stage_warehouse(Stage::Sorting).await?;
        self.guard_recorder(actor, &raw_warehouse)?;

        // 提取 (预留与数量同时扣减) + 分拣仓入库 + 累计,同一事务
        {
            let mut conn = self.lock_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;

            let rows = tx
                .execute(
                    "UPDATE stock_ledger
                     SET reserved_kg = reserved_kg - ?3,
                         quantity_kg = quantity_kg - ?3,
                         updated_at = datetime('now')
                     WHERE warehouse_id = ?1 AND material_id = ?2
                       AND reserved_kg >= ?3 - 1e-9 AND quantity_kg >= ?3 - 1e-9",
                    rusqlite::params![raw_warehouse, requirement.material_id, weight_kg],
                )
                .map_err(RepositoryError::from)?;
            if rows == 0 {
                return Err(ApiError::InvalidInput(format!(
                    "预留量不足,无法提取{}kg (warehouse={})",
                    weight_kg, raw_warehouse
                )));
            }

            tx.execute(
                "INSERT INTO stock_ledger (warehouse_id, material_id, quantity_kg, reserved_kg, updated_at)
                 VALUES (?1, ?2, ?3, 0, datetime('now'))
                 ON CONFLICT(warehouse_id, material_id)
                 DO UPDATE SET quantity_kg = quantity_kg + ?3, updated_at = datetime('now')",
                rusqlite::params![sorting_warehouse, requirement.material_id, weight_kg],
            )
            .map_err(RepositoryError::from)?;

            MaterialRequirementRepository::add_extracted_weight_tx(&tx, requirement_id, weight_kg)?;

            AuditLogRepository::insert_tx(
                &tx,
                &AuditLog::new(
                    Uuid::new_v4().to_string(),
                    AuditEvent::StockExtracted,
                    actor.as_audit_str().to_string(),
                )
                .with_order(requirement.order_id.clone())
                .with_payload(&json!({
                    "requirement_id": requirement_id,
                    "from_warehouse": raw_warehouse,
                    "to_warehouse": sorting_warehouse,
                    "weight_kg": weight_kg,
                })),
            )?;

            tx.commit()
                .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;
        }

        info!(
            requirement_id = %requirement_id,
            weight_kg = weight_kg,
            "原料已提取至分拣仓"
        );
        Ok(())
    }

    // ==========================================
    // 分拣产出验收
    // ==========================================

    /// 验收分拣产出并派生调拨
    ///
    /// 校验通过 → 产出落盘 + 生产性调拨 PENDING + 废料自动审批处置
    /// 校验不通过 → 零调拨落盘,返回结构化错误
    pub async fn record_sorting_result(
        &self,
        request: &SortingOutputRequest,
        actor: &Actor,
    ) -> ApiResult<StageRecordResult> {
        let policy = self.policy().await?;
        let validator = StageOutputValidator::new(policy);
        validator.validate_sorting(request)?;

        let requirement = self.material_repo.get(&request.requirement_id)?;
        if requirement.order_id != request.order_id {
            return Err(ApiError::InvalidInput(format!(
                "物料行{}不属于订单{}",
                request.requirement_id, request.order_id
            )));
        }
        // 分拣投入不得超过已提取重量
        if request.input_weight_kg > requirement.extracted_weight_kg + policy.tolerance_kg {
            return Err(ApiError::InvalidInput(format!(
                "分拣投入{}kg超过已提取{}kg",
                request.input_weight_kg, requirement.extracted_weight_kg
            )));
        }

        let source_warehouse = self.stage_warehouse(Stage::Sorting).await?;
        let destination_warehouse = self.stage_warehouse(Stage::Cutting).await?;
        self.guard_recorder(actor, &source_warehouse)?;

        let output = StageOutput {
            output_id: Uuid::new_v4().to_string(),
            order_id: request.order_id.clone(),
            requirement_id: request.requirement_id.clone(),
            stage: Stage::Sorting,
            input_weight_kg: request.input_weight_kg,
            roll1_weight_kg: Some(request.roll1_weight_kg),
            roll2_weight_kg: Some(request.roll2_weight_kg),
            cut_weight_kg: None,
            remainder_weight_kg: None,
            waste_weight_kg: request.waste_weight_kg,
            quality_grade: request.quality_grade.clone(),
            approved: true,
            recorded_by: actor.as_audit_str().to_string(),
            recorded_at: Utc::now(),
        };

        self.persist_output_with_transfers(
            &output,
            &requirement.material_id,
            &source_warehouse,
            &destination_warehouse,
            actor,
        )
    }

    // ==========================================
    // 裁切产出验收
    // ==========================================

    /// 验收裁切产出并派生调拨
    ///
    /// 守恒校验之外附加废料占比上限 (软策略)
    pub async fn record_cutting_result(
        &self,
        request: &CuttingOutputRequest,
        actor: &Actor,
    ) -> ApiResult<StageRecordResult> {
        let policy = self.policy().await?;
        let validator = StageOutputValidator::new(policy);
        validator.validate_cutting(request)?;

        let requirement = self.material_repo.get(&request.requirement_id)?;
        if requirement.order_id != request.order_id {
            return Err(ApiError::InvalidInput(format!(
                "物料行{}不属于订单{}",
                request.requirement_id, request.order_id
            )));
        }
        // 裁切投入不得超过已分拣重量
        if request.input_weight_kg > requirement.sorted_weight_kg + policy.tolerance_kg {
            return Err(ApiError::InvalidInput(format!(
                "裁切投入{}kg超过已分拣{}kg",
                request.input_weight_kg, requirement.sorted_weight_kg
            )));
        }

        let source_warehouse = self.stage_warehouse(Stage::Cutting).await?;
        let destination_warehouse = self.stage_warehouse(Stage::Packaging).await?;
        self.guard_recorder(actor, &source_warehouse)?;

        let output = StageOutput {
            output_id: Uuid::new_v4().to_string(),
            order_id: request.order_id.clone(),
            requirement_id: request.requirement_id.clone(),
            stage: Stage::Cutting,
            input_weight_kg: request.input_weight_kg,
            roll1_weight_kg: None,
            roll2_weight_kg: None,
            cut_weight_kg: Some(request.cut_weight_kg),
            remainder_weight_kg: Some(request.remainder_weight_kg),
            waste_weight_kg: request.waste_weight_kg,
            quality_grade: request.quality_grade.clone(),
            approved: true,
            recorded_by: actor.as_audit_str().to_string(),
            recorded_at: Utc::now(),
        };

        self.persist_output_with_transfers(
            &output,
            &requirement.material_id,
            &source_warehouse,
            &destination_warehouse,
            actor,
        )
    }

    // ==========================================
    // 产出 + 调拨落盘 (单一事务)
    // ==========================================

    fn persist_output_with_transfers(
        &self,
        output: &StageOutput,
        material_id: &str,
        source_warehouse: &str,
        destination_warehouse: &str,
        actor: &Actor,
    ) -> ApiResult<StageRecordResult> {
        let planned = self
            .builder
            .plan_from_output(output, source_warehouse, destination_warehouse);

        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;

        StageOutputRepository::insert_tx(&tx, output)?;

        let mut transfer_ids = Vec::new();
        let mut pending_count = 0;
        let mut waste_count = 0;

        for plan in &planned {
            TransferRepository::insert_tx(&tx, &plan.transfer)?;
            for approval in &plan.approvals {
                ApprovalRepository::insert_tx(&tx, approval)?;
            }
            transfer_ids.push(plan.transfer.transfer_id.clone());

            if plan.auto_approved {
                waste_count += 1;
                self.settle_waste_transfer(&tx, plan, material_id, actor)?;
            } else {
                pending_count += 1;
                AuditLogRepository::insert_tx(
                    &tx,
                    &AuditLog::new(
                        Uuid::new_v4().to_string(),
                        AuditEvent::TransferCreated,
                        actor.as_audit_str().to_string(),
                    )
                    .with_order(output.order_id.clone())
                    .with_transfer(plan.transfer.transfer_id.clone())
                    .with_payload(&json!({
                        "category": plan.transfer.category.to_db_str(),
                        "weight_kg": plan.transfer.weight_kg,
                    })),
                )?;
            }
        }

        AuditLogRepository::insert_tx(
            &tx,
            &AuditLog::new(
                Uuid::new_v4().to_string(),
                AuditEvent::StageOutputRecorded,
                actor.as_audit_str().to_string(),
            )
            .with_order(output.order_id.clone())
            .with_payload(&json!({
                "output_id": output.output_id,
                "stage": output.stage.to_db_str(),
                "input_weight_kg": output.input_weight_kg,
            })),
        )?;

        tx.commit()
            .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;

        info!(
            output_id = %output.output_id,
            stage = %output.stage,
            transfers = transfer_ids.len(),
            pending = pending_count,
            "阶段产出已验收,调拨已派生"
        );

        Ok(StageRecordResult {
            output_id: output.output_id.clone(),
            transfer_group_id: planned.first().map(|p| p.transfer.transfer_group_id.clone()),
            transfer_ids,
            pending_transfer_count: pending_count,
            waste_transfer_count: waste_count,
        })
    }

    /// 废料调拨创建即处置: 源仓出库 + 废料累计 + 状态完成
    ///
    /// 处置失败 (库存不足等) 不阻断验收事务,调拨停留 APPROVED 可重试
    fn settle_waste_transfer(
        &self,
        tx: &rusqlite::Transaction<'_>,
        plan: &PlannedTransfer,
        material_id: &str,
        actor: &Actor,
    ) -> ApiResult<()> {
        let transfer = &plan.transfer;

        let settled = StockLedgerRepository::remove_tx(
            tx,
            &transfer.source_warehouse_id,
            material_id,
            transfer.weight_kg,
        );

        match settled {
            Ok(()) => {
                MaterialRequirementRepository::add_waste_weight_tx(
                    tx,
                    &transfer.requirement_id,
                    transfer.weight_kg,
                )?;
                TransferRepository::transition_status_tx(
                    tx,
                    &transfer.transfer_id,
                    TransferStatus::Approved,
                    TransferStatus::Completed,
                )?;
            }
            Err(RepositoryError::InsufficientStock { .. }) => {
                // 废料永不阻塞流水线: 留在 APPROVED,后续走完成重试
                warn!(
                    transfer_id = %transfer.transfer_id,
                    weight_kg = transfer.weight_kg,
                    "废料处置时库存不足,调拨停留 APPROVED 等待重试"
                );
            }
            Err(e) => return Err(e.into()),
        }

        // 废料审计失败只告警不阻断 (物理上废料已产生,审批非决定性因素)
        let audit = AuditLogRepository::insert_tx(
            tx,
            &AuditLog::new(
                Uuid::new_v4().to_string(),
                AuditEvent::WasteAutoApproved,
                actor.as_audit_str().to_string(),
            )
            .with_order(transfer.order_id.clone())
            .with_transfer(transfer.transfer_id.clone())
            .with_payload(&json!({ "weight_kg": transfer.weight_kg })),
        );
        if let Err(e) = audit {
            warn!(
                transfer_id = %transfer.transfer_id,
                "废料审计写入失败 (不阻断): {}",
                e
            );
        }

        Ok(())
    }
}
