// ==========================================
// 纸卷流转管控系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑,只做数据映射
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约束: 跨行工作单元使用 *_tx 关联函数,由服务层持事务
// ==========================================

pub mod audit_repo;
pub mod auth_repo;
pub mod error;
pub mod material_repo;
pub mod order_repo;
pub mod output_repo;
pub mod stock_repo;
pub mod transfer_repo;

// 重导出核心仓储
pub use audit_repo::AuditLogRepository;
pub use auth_repo::{UserRoleRepository, VerificationRequestRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use material_repo::MaterialRequirementRepository;
pub use order_repo::OrderRepository;
pub use output_repo::StageOutputRepository;
pub use stock_repo::{StockEntry, StockLedgerRepository};
pub use transfer_repo::{ApprovalRepository, TransferRepository};

use chrono::{DateTime, NaiveDateTime, Utc};

/// 时间戳统一存储格式
pub(crate) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// DateTime<Utc> → 数据库字符串
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.naive_utc().format(TS_FORMAT).to_string()
}

/// 数据库字符串 → DateTime<Utc>
pub(crate) fn parse_ts(s: &str) -> RepositoryResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|e| RepositoryError::FieldValueError {
            field: "timestamp".to_string(),
            message: e.to_string(),
        })
}

/// 可空时间戳解析
pub(crate) fn parse_ts_opt(s: Option<String>) -> RepositoryResult<Option<DateTime<Utc>>> {
    match s {
        Some(v) => Ok(Some(parse_ts(&v)?)),
        None => Ok(None),
    }
}
