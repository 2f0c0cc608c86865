// ==========================================
// 纸卷流转管控系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - init_schema 为唯一建表入口 (库/工具/测试共用)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化全部业务表 (幂等)
///
/// 说明：
/// - 所有状态/阶段列存储 SCREAMING_SNAKE_CASE 字符串,与领域枚举 to_db_str 对齐
/// - stock_ledger 的 CHECK 约束兜底数量非负,真正的判定在条件 UPDATE 里
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        );

        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global');

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS warehouse (
            warehouse_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            warehouse_type TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS stock_ledger (
            warehouse_id TEXT NOT NULL REFERENCES warehouse(warehouse_id),
            material_id TEXT NOT NULL,
            quantity_kg REAL NOT NULL DEFAULT 0 CHECK (quantity_kg >= 0),
            reserved_kg REAL NOT NULL DEFAULT 0 CHECK (reserved_kg >= 0),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (warehouse_id, material_id)
        );

        CREATE TABLE IF NOT EXISTS user_role (
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            warehouse_id TEXT NOT NULL REFERENCES warehouse(warehouse_id),
            PRIMARY KEY (user_id, role, warehouse_id)
        );

        CREATE TABLE IF NOT EXISTS pipeline_order (
            order_id TEXT PRIMARY KEY,
            order_no TEXT NOT NULL UNIQUE,
            current_stage TEXT NOT NULL DEFAULT 'RESERVATION',
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            urgent_flag INTEGER NOT NULL DEFAULT 0,
            payment_received INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS order_material (
            requirement_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES pipeline_order(order_id),
            material_id TEXT NOT NULL,
            requested_weight_kg REAL NOT NULL,
            extracted_weight_kg REAL NOT NULL DEFAULT 0,
            sorted_weight_kg REAL NOT NULL DEFAULT 0,
            cut_weight_kg REAL NOT NULL DEFAULT 0,
            delivered_weight_kg REAL NOT NULL DEFAULT 0,
            waste_weight_kg REAL NOT NULL DEFAULT 0,
            roll_width_mm REAL NOT NULL,
            roll_grammage_gsm REAL NOT NULL,
            roll_quality_grade TEXT NOT NULL,
            roll_length_m REAL,
            roll_batch_no TEXT,
            roll_number TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stage_processing (
            order_id TEXT NOT NULL REFERENCES pipeline_order(order_id),
            stage TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            started_at TEXT,
            completed_at TEXT,
            PRIMARY KEY (order_id, stage)
        );

        CREATE TABLE IF NOT EXISTS stage_transition_log (
            log_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES pipeline_order(order_id),
            previous_stage TEXT NOT NULL,
            new_stage TEXT NOT NULL,
            actor TEXT NOT NULL,
            transitioned_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stage_output (
            output_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES pipeline_order(order_id),
            requirement_id TEXT NOT NULL REFERENCES order_material(requirement_id),
            stage TEXT NOT NULL,
            input_weight_kg REAL NOT NULL,
            roll1_weight_kg REAL,
            roll2_weight_kg REAL,
            cut_weight_kg REAL,
            remainder_weight_kg REAL,
            waste_weight_kg REAL NOT NULL DEFAULT 0,
            quality_grade TEXT,
            approved INTEGER NOT NULL DEFAULT 0,
            recorded_by TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS weight_transfer (
            transfer_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES pipeline_order(order_id),
            requirement_id TEXT NOT NULL REFERENCES order_material(requirement_id),
            output_id TEXT REFERENCES stage_output(output_id),
            from_stage TEXT NOT NULL,
            to_stage TEXT NOT NULL,
            weight_kg REAL NOT NULL CHECK (weight_kg > 0),
            category TEXT NOT NULL,
            source_warehouse_id TEXT NOT NULL REFERENCES warehouse(warehouse_id),
            destination_warehouse_id TEXT REFERENCES warehouse(warehouse_id),
            transfer_group_id TEXT NOT NULL,
            requires_sequential_approval INTEGER NOT NULL DEFAULT 0,
            current_approval_sequence INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'PENDING',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_weight_transfer_group
            ON weight_transfer(transfer_group_id);
        CREATE INDEX IF NOT EXISTS idx_weight_transfer_order
            ON weight_transfer(order_id, status);

        CREATE TABLE IF NOT EXISTS transfer_approval (
            approval_id TEXT PRIMARY KEY,
            transfer_id TEXT NOT NULL REFERENCES weight_transfer(transfer_id),
            warehouse_id TEXT NOT NULL REFERENCES warehouse(warehouse_id),
            required_role TEXT NOT NULL,
            approval_sequence INTEGER NOT NULL,
            is_final_approval INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'PENDING',
            approver TEXT,
            decided_at TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (transfer_id, approval_sequence)
        );

        CREATE TABLE IF NOT EXISTS verification_request (
            request_id TEXT PRIMARY KEY,
            transfer_id TEXT NOT NULL REFERENCES weight_transfer(transfer_id),
            request_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            created_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            audit_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            order_id TEXT,
            transfer_id TEXT,
            actor TEXT NOT NULL,
            payload_json TEXT,
            detail TEXT,
            event_ts TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}
