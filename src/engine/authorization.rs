// ==========================================
// 纸卷流转管控系统 - 授权端口
// ==========================================
// 职责: 审批服务消费的角色/仓库指派查询接口
// 红线: 系统哨兵 (Actor::System) 不走人工授权查询
// ==========================================

use crate::domain::types::Role;
use crate::repository::auth_repo::UserRoleRepository;
use crate::repository::error::RepositoryResult;

/// 授权查询端口
///
/// 生产实现由 user_role 表支撑,测试可用内存实现替身
pub trait AuthorizationPort: Send + Sync {
    /// 用户是否持有角色 (任意仓库)
    fn has_role(&self, user_id: &str, role: Role) -> RepositoryResult<bool>;

    /// 用户是否指派到仓库
    fn is_assigned_to_warehouse(&self, user_id: &str, warehouse_id: &str) -> RepositoryResult<bool>;

    /// 用户在指定仓库是否持有指定角色 (审批层级匹配口径)
    fn holds_role_at(&self, user_id: &str, role: Role, warehouse_id: &str) -> RepositoryResult<bool>;
}

impl AuthorizationPort for UserRoleRepository {
    fn has_role(&self, user_id: &str, role: Role) -> RepositoryResult<bool> {
        UserRoleRepository::has_role(self, user_id, role)
    }

    fn is_assigned_to_warehouse(&self, user_id: &str, warehouse_id: &str) -> RepositoryResult<bool> {
        UserRoleRepository::is_assigned_to_warehouse(self, user_id, warehouse_id)
    }

    fn holds_role_at(&self, user_id: &str, role: Role, warehouse_id: &str) -> RepositoryResult<bool> {
        UserRoleRepository::holds_role_at(self, user_id, role, warehouse_id)
    }
}
