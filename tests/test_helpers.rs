// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时测试数据库初始化、基础数据播种、API/仓储组装
// ==========================================

#![allow(dead_code)]

use paper_flow_mes::api::{PipelineApi, ReportApi, StageApi, TransferApi};
use paper_flow_mes::config::ConfigManager;
use paper_flow_mes::db;
use paper_flow_mes::domain::types::{Actor, Role};
use paper_flow_mes::repository::{
    ApprovalRepository, AuditLogRepository, MaterialRequirementRepository, OrderRepository,
    StageOutputRepository, StockLedgerRepository, TransferRepository, UserRoleRepository,
    VerificationRequestRepository,
};
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 播种基础数据: 五个仓库 + 角色用户 + 原纸仓库存
pub fn seed_base_data(conn: &Connection) -> Result<(), Box<dyn Error>> {
    let warehouses = [
        ("WH-RAW", "原纸仓", "RAW"),
        ("WH-SORT", "分拣仓", "SORTING"),
        ("WH-CUT", "裁切仓", "CUTTING"),
        ("WH-PACK", "包装仓", "PACKAGING"),
        ("WH-SHIP", "发货仓", "SHIPPING"),
    ];
    for (id, name, wh_type) in warehouses {
        conn.execute(
            "INSERT OR IGNORE INTO warehouse (warehouse_id, name, warehouse_type) VALUES (?1, ?2, ?3)",
            params![id, name, wh_type],
        )?;
    }
    Ok(())
}

// ==========================================
// TestContext - 测试上下文
// ==========================================
pub struct TestContext {
    // 临时文件需保持存活,否则数据库被删除
    pub _db_file: NamedTempFile,
    pub conn: Arc<Mutex<Connection>>,
    pub config: Arc<ConfigManager>,
    pub stock_repo: Arc<StockLedgerRepository>,
    pub material_repo: Arc<MaterialRequirementRepository>,
    pub order_repo: Arc<OrderRepository>,
    pub transfer_repo: Arc<TransferRepository>,
    pub approval_repo: Arc<ApprovalRepository>,
    pub output_repo: Arc<StageOutputRepository>,
    pub user_role_repo: Arc<UserRoleRepository>,
    pub verification_repo: Arc<VerificationRequestRepository>,
    pub audit_repo: Arc<AuditLogRepository>,
}

impl TestContext {
    pub fn stage_api(&self) -> StageApi<ConfigManager> {
        StageApi::new(
            self.conn.clone(),
            self.config.clone(),
            self.material_repo.clone(),
            self.stock_repo.clone(),
            self.user_role_repo.clone(),
            self.audit_repo.clone(),
        )
    }

    pub fn transfer_api(&self) -> TransferApi<ConfigManager> {
        TransferApi::new(
            self.conn.clone(),
            self.config.clone(),
            self.transfer_repo.clone(),
            self.approval_repo.clone(),
            self.verification_repo.clone(),
            self.user_role_repo.clone(),
            self.audit_repo.clone(),
        )
    }

    pub fn pipeline_api(&self) -> PipelineApi<ConfigManager> {
        PipelineApi::new(
            self.conn.clone(),
            self.config.clone(),
            self.order_repo.clone(),
            self.material_repo.clone(),
            self.transfer_repo.clone(),
            self.audit_repo.clone(),
        )
    }

    pub fn report_api(&self) -> ReportApi {
        ReportApi::new(
            self.material_repo.clone(),
            self.output_repo.clone(),
            self.transfer_repo.clone(),
            0.01,
        )
    }
}

/// 组装完整测试上下文 (已播种仓库/用户/库存)
pub fn setup() -> TestContext {
    let (db_file, db_path) = create_test_db().expect("创建测试数据库失败");
    let conn_raw = db::open_sqlite_connection(&db_path).expect("打开测试数据库失败");
    seed_base_data(&conn_raw).expect("播种基础数据失败");

    let conn = Arc::new(Mutex::new(conn_raw));
    let config =
        Arc::new(ConfigManager::from_connection(conn.clone()).expect("创建配置管理器失败"));

    let ctx = TestContext {
        _db_file: db_file,
        conn: conn.clone(),
        config,
        stock_repo: Arc::new(StockLedgerRepository::new(conn.clone())),
        material_repo: Arc::new(MaterialRequirementRepository::new(conn.clone())),
        order_repo: Arc::new(OrderRepository::new(conn.clone())),
        transfer_repo: Arc::new(TransferRepository::new(conn.clone())),
        approval_repo: Arc::new(ApprovalRepository::new(conn.clone())),
        output_repo: Arc::new(StageOutputRepository::new(conn.clone())),
        user_role_repo: Arc::new(UserRoleRepository::new(conn.clone())),
        verification_repo: Arc::new(VerificationRequestRepository::new(conn.clone())),
        audit_repo: Arc::new(AuditLogRepository::new(conn)),
    };

    // 角色用户
    let grants = [
        ("U-RAW-KEEPER", Role::WarehouseKeeper, "WH-RAW"),
        ("U-SORT-KEEPER", Role::WarehouseKeeper, "WH-SORT"),
        ("U-SORT-MGR", Role::WarehouseManager, "WH-SORT"),
        ("U-CUT-KEEPER", Role::WarehouseKeeper, "WH-CUT"),
        ("U-CUT-MGR", Role::WarehouseManager, "WH-CUT"),
        ("U-PACK-MGR", Role::WarehouseManager, "WH-PACK"),
    ];
    for (user, role, warehouse) in grants {
        ctx.user_role_repo
            .grant(user, role, warehouse)
            .expect("授予角色失败");
    }

    // 原纸仓初始库存
    ctx.stock_repo
        .add("WH-RAW", "KRAFT-120", 1000.0)
        .expect("初始化库存失败");

    ctx
}

// ==========================================
// 流程快捷函数
// ==========================================

/// 原料仓库管 (提取录入人)
pub fn raw_keeper() -> Actor {
    Actor::user("U-RAW-KEEPER")
}

/// 分拣仓库管 (分拣产出录入人)
pub fn sort_keeper() -> Actor {
    Actor::user("U-SORT-KEEPER")
}

/// 裁切仓库管 (裁切产出录入人)
pub fn cut_keeper() -> Actor {
    Actor::user("U-CUT-KEEPER")
}

/// 创建订单 + 单条物料行 (KRAFT-120)
pub fn create_order_with_material(
    ctx: &TestContext,
    requested_kg: f64,
    urgent: bool,
) -> (String, String) {
    use paper_flow_mes::api::{MaterialLineRequest, OrderCreateRequest};
    use paper_flow_mes::domain::RollSpec;

    let api = ctx.pipeline_api();
    let order = api
        .create_order(&OrderCreateRequest {
            order_no: format!("SO-{}", uuid_suffix()),
            urgent_flag: urgent,
            materials: vec![MaterialLineRequest {
                material_id: "KRAFT-120".to_string(),
                requested_weight_kg: requested_kg,
                roll_spec: RollSpec {
                    width_mm: 2100.0,
                    grammage_gsm: 120.0,
                    quality_grade: "A".to_string(),
                    length_m: Some(6000.0),
                    batch_no: Some("B2026-08".to_string()),
                    roll_number: Some("R-0042".to_string()),
                },
            }],
        })
        .expect("创建订单失败");

    let requirement_id = ctx
        .material_repo
        .list_by_order(&order.order_id)
        .expect("查询物料行失败")
        .first()
        .expect("物料行缺失")
        .requirement_id
        .clone();

    (order.order_id, requirement_id)
}

/// 预留 + 提取 (原纸仓 → 分拣仓)
pub async fn reserve_and_extract(ctx: &TestContext, requirement_id: &str, weight_kg: f64) {
    let api = ctx.stage_api();
    api.reserve_material(requirement_id, &raw_keeper())
        .await
        .expect("预留失败");
    api.record_extraction(requirement_id, weight_kg, &raw_keeper())
        .await
        .expect("提取失败");
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}
