// ==========================================
// 纸卷流转管控系统 - 演示数据库初始化工具
// ==========================================
// 用途: 建表 + 写入演示仓库/用户/配置/库存
// 用法: init_demo_db [db_path]   (默认 ./paper_flow_demo.db)
// ==========================================

use paper_flow_mes::config::{config_keys, ConfigManager};
use paper_flow_mes::db;
use paper_flow_mes::domain::types::Role;
use paper_flow_mes::logging;
use paper_flow_mes::repository::{StockLedgerRepository, UserRoleRepository};
use rusqlite::params;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::info;

fn main() -> Result<(), Box<dyn Error>> {
    logging::init();

    // 未指定路径时落在系统数据目录
    let db_path = std::env::args().nth(1).unwrap_or_else(|| {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("paper-flow-mes");
        std::fs::create_dir_all(&dir).ok();
        dir.join("paper_flow_demo.db").to_string_lossy().into_owned()
    });

    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;
    info!(db_path = %db_path, "数据库已建表");

    // 演示仓库 (阶段仓库映射的默认值)
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

    let conn = Arc::new(Mutex::new(conn));

    // 演示用户: 各仓主管 + 库管
    let user_role_repo = UserRoleRepository::new(conn.clone());
    user_role_repo.grant("U-RAW-KEEPER", Role::WarehouseKeeper, "WH-RAW")?;
    user_role_repo.grant("U-SORT-KEEPER", Role::WarehouseKeeper, "WH-SORT")?;
    user_role_repo.grant("U-SORT-MGR", Role::WarehouseManager, "WH-SORT")?;
    user_role_repo.grant("U-CUT-KEEPER", Role::WarehouseKeeper, "WH-CUT")?;
    user_role_repo.grant("U-CUT-MGR", Role::WarehouseManager, "WH-CUT")?;
    user_role_repo.grant("U-PACK-MGR", Role::WarehouseManager, "WH-PACK")?;

    // 演示库存: 原纸仓一种牛皮纸
    let stock_repo = StockLedgerRepository::new(conn.clone());
    stock_repo.add("WH-RAW", "KRAFT-120", 5_000.0)?;

    // 默认配置
    let config = ConfigManager::from_connection(conn)?;
    config.set_global_config_value(config_keys::WEIGHT_TOLERANCE_KG, "0.01")?;
    config.set_global_config_value(config_keys::CUTTING_WASTE_CEILING, "0.5")?;
    config.set_global_config_value(config_keys::REJECT_REASON_MIN_LEN, "5")?;
    config.set_global_config_value(config_keys::URGENT_FAST_PATH_ENABLED, "true")?;

    info!("演示数据已写入: 5仓库, 6用户, 5000kg KRAFT-120");
    Ok(())
}
