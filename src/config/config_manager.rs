// ==========================================
// 纸卷流转管控系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::flow_config_trait::FlowConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::types::Stage;
use crate::engine::weight::{WeightPolicy, DEFAULT_WASTE_CEILING, WEIGHT_TOLERANCE_KG};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }
        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self
            .get_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 写入 global scope 配置（UPSERT,工具/测试用）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 组装重量校验策略 (同步便捷入口)
    pub fn weight_policy(&self) -> Result<WeightPolicy, Box<dyn Error>> {
        let tolerance = self
            .get_config_or_default(config_keys::WEIGHT_TOLERANCE_KG, "0.01")?
            .parse::<f64>()
            .unwrap_or(WEIGHT_TOLERANCE_KG);
        let ceiling = self
            .get_config_or_default(config_keys::CUTTING_WASTE_CEILING, "0.5")?
            .parse::<f64>()
            .unwrap_or(DEFAULT_WASTE_CEILING);
        Ok(WeightPolicy {
            tolerance_kg: tolerance,
            waste_ceiling: ceiling,
        })
    }
}

// ==========================================
// FlowConfigReader Trait 实现
// ==========================================
#[async_trait]
impl FlowConfigReader for ConfigManager {
    async fn get_weight_tolerance_kg(&self) -> Result<f64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::WEIGHT_TOLERANCE_KG, "0.01")?;
        Ok(value.parse::<f64>().unwrap_or(WEIGHT_TOLERANCE_KG))
    }

    async fn get_cutting_waste_ceiling(&self) -> Result<f64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::CUTTING_WASTE_CEILING, "0.5")?;
        Ok(value.parse::<f64>().unwrap_or(DEFAULT_WASTE_CEILING))
    }

    async fn get_reject_reason_min_len(&self) -> Result<usize, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::REJECT_REASON_MIN_LEN, "5")?;
        Ok(value.parse::<usize>().unwrap_or(5))
    }

    async fn get_urgent_fast_path_enabled(&self) -> Result<bool, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::URGENT_FAST_PATH_ENABLED, "true")?;
        Ok(matches!(value.to_lowercase().as_str(), "true" | "1" | "on"))
    }

    async fn get_stage_warehouse(&self, stage: Stage) -> Result<Option<String>, Box<dyn Error>> {
        let key = format!("{}{}", config_keys::STAGE_WAREHOUSE_PREFIX, stage.to_db_str());
        let configured = self.get_config_value(&key)?;
        if configured.is_some() {
            return Ok(configured);
        }
        // 默认仓库映射 (结算阶段无仓库)
        Ok(match stage {
            Stage::Reservation => Some("WH-RAW".to_string()),
            Stage::Sorting => Some("WH-SORT".to_string()),
            Stage::Cutting => Some("WH-CUT".to_string()),
            Stage::Packaging => Some("WH-PACK".to_string()),
            Stage::Delivery => Some("WH-SHIP".to_string()),
            Stage::Billing => None,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 重量校验
    pub const WEIGHT_TOLERANCE_KG: &str = "weight_tolerance_kg";
    pub const CUTTING_WASTE_CEILING: &str = "cutting_waste_ceiling";

    // 审批
    pub const REJECT_REASON_MIN_LEN: &str = "reject_reason_min_len";

    // 流转编排
    pub const URGENT_FAST_PATH_ENABLED: &str = "urgent_fast_path_enabled";

    // 阶段仓库映射 (key = stage_warehouse/{STAGE})
    pub const STAGE_WAREHOUSE_PREFIX: &str = "stage_warehouse/";
}
