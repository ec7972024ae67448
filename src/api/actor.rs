// ==========================================
// 工厂生产排程系统 - 操作人上下文
// ==========================================
// 由调用边界 (HTTP 会话解析) 显式传入每个写操作
// ==========================================

use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};

/// 具备审批权限的角色
pub const APPROVER_ROLES: [&str; 2] = ["APPROVER", "ADMIN"];

/// 系统内部操作人 (定时清扫等)
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR, Vec::new())
    }

    pub fn has_approver_role(&self) -> bool {
        self.roles
            .iter()
            .any(|r| APPROVER_ROLES.iter().any(|a| r.eq_ignore_ascii_case(a)))
    }

    /// 校验操作人非空
    pub fn require_id(&self) -> ApiResult<&str> {
        let id = self.user_id.trim();
        if id.is_empty() {
            return Err(ApiError::Unauthorized("缺少操作人".to_string()));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approver_role_is_case_insensitive() {
        assert!(Actor::new("u1", vec!["approver".to_string()]).has_approver_role());
        assert!(Actor::new("u1", vec!["OPERATOR".to_string(), "Admin".to_string()]).has_approver_role());
        assert!(!Actor::new("u1", vec!["OPERATOR".to_string()]).has_approver_role());
        assert!(Actor::new("  ", vec![]).require_id().is_err());
    }
}
