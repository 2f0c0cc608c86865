// ==========================================
// 纸卷流转管控系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型,转换下层错误为用户可分支的结构化错误
// 红线: 每个错误携带稳定错误码 (error_code),调用方据此分支
// ==========================================

use crate::engine::approval::ApprovalError;
use crate::engine::pipeline::PipelineError;
use crate::engine::stage_validator::StageOutputError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
/// 所有错误信息必须包含显式原因（可解释性）
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 校验错误 (不变更任何状态)
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    StageOutput(#[from] StageOutputError),

    // ==========================================
    // 授权/状态冲突错误 (引擎层透传,错误码不变)
    // ==========================================
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("操作被拒绝: {0}")]
    Forbidden(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("配置读取失败: {0}")]
    ConfigError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 稳定错误码 (UI/自动任务分支依据)
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::StageOutput(e) => e.error_code(),
            ApiError::Approval(e) => e.error_code(),
            ApiError::Pipeline(e) => e.error_code(),
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::DatabaseConnectionError(_) => "DATABASE_CONNECTION_ERROR",
            ApiError::DatabaseTransactionError(_) => "DATABASE_TRANSACTION_ERROR",
            ApiError::ConfigError(_) => "CONFIG_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将Repository层的技术错误转换为用户可理解的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::InvalidInput(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::InvalidInput(format!("外键约束违反: {}", msg))
            }
            RepositoryError::InsufficientStock {
                warehouse_id,
                material_id,
                requested_kg,
                available_kg,
            } => ApiError::InvalidInput(format!(
                "库存不足: warehouse={}, material={}, 需要{}kg, 可用{}kg",
                warehouse_id, material_id, requested_kg, available_kg
            )),
            RepositoryError::ConditionalUpdateFailed { entity, id } => {
                ApiError::DatabaseError(format!("并发冲突: {} id={}", entity, id))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidInput(format!("无效的状态转换: {} → {}", from, to))
            }
            RepositoryError::ValidationError(msg) => ApiError::InvalidInput(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_error_codes_pass_through() {
        let err: ApiError = StageOutputError::Imbalance {
            expected_kg: 100.0,
            actual_kg: 95.0,
        }
        .into();
        assert_eq!(err.error_code(), "IMBALANCE");

        let err: ApiError = ApprovalError::SequenceViolation {
            transfer_id: "T-1".into(),
            expected_sequence: 1,
            attempted_sequence: 2,
        }
        .into();
        assert_eq!(err.error_code(), "SEQUENCE_VIOLATION");

        let err: ApiError = ApprovalError::AlreadyCompleted {
            transfer_id: "T-1".into(),
        }
        .into();
        assert_eq!(err.error_code(), "ALREADY_COMPLETED");
    }

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "WeightTransfer".to_string(),
            id: "T-404".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("WeightTransfer"));
                assert!(msg.contains("T-404"));
            }
            _ => panic!("Expected NotFound"),
        }
    }
}
