// ==========================================
// 纸卷流转管控系统 - 引擎层
// ==========================================
// 职责: 实现业务规则引擎
// 红线: 所有规则必须输出可解释的 reason/结构化错误
// 红线: 校验引擎保持纯函数,持久化交由服务编排
// ==========================================

pub mod approval;
pub mod authorization;
pub mod pipeline;
pub mod stage_validator;
pub mod transfer_builder;
pub mod weight;

// 重导出核心引擎
pub use approval::{ApprovalError, ApprovalOutcome, ApprovalResult, ApprovalService};
pub use authorization::AuthorizationPort;
pub use pipeline::{AdvanceCheck, PipelineError, PipelineOrchestrator, PipelineResult};
pub use stage_validator::{StageOutputError, StageOutputValidator, ValidatedBucket, ValidatedOutput};
pub use transfer_builder::{PlannedTransfer, TransferBuilder};
pub use weight::{approximately_equal, WeightPolicy, WEIGHT_TOLERANCE_KG};
