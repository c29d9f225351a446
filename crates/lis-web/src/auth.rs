//! 调用方身份与权限
//!
//! 身份由前置网关写入请求头 `x-lis-user` / `x-lis-role`，本服务只做角色授权。

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use lis_core::{Actor, LisError, UserRole};

use crate::error::ApiError;

pub const USER_HEADER: &str = "x-lis-user";
pub const ROLE_HEADER: &str = "x-lis-role";

/// 操作权限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    ManagePatient,
    DeletePatient,
    OrderTest,
    ProcessTest,
    CancelTest,
    RecordResult,
    SignOffResult,
    BatchApprove,
    DeleteResult,
}

impl Permission {
    /// 拥有该权限的角色
    pub fn allowed_roles(&self) -> &'static [UserRole] {
        use UserRole::*;

        match self {
            Permission::Read => UserRole::ALL,
            Permission::ManagePatient => &[Admin, Manager, Doctor, Receptionist],
            Permission::DeletePatient => &[Admin, Manager],
            Permission::OrderTest => &[Admin, Manager, Doctor, Receptionist],
            Permission::ProcessTest => &[Admin, Manager, LabTechnician],
            Permission::CancelTest => &[Admin, Manager],
            Permission::RecordResult => &[Admin, Manager, LabTechnician],
            Permission::SignOffResult => &[Admin, Manager, Doctor],
            Permission::BatchApprove => &[Admin, Manager],
            Permission::DeleteResult => &[Admin],
        }
    }

    pub fn allows(&self, role: UserRole) -> bool {
        self.allowed_roles().contains(&role)
    }
}

/// 当前调用方
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

impl CurrentActor {
    /// 校验权限，返回操作人
    pub fn require(&self, permission: Permission) -> Result<&Actor, ApiError> {
        if permission.allows(self.0.role) {
            Ok(&self.0)
        } else {
            tracing::warn!(
                "User {} ({}) denied {:?}",
                self.0.user_id,
                self.0.role,
                permission
            );
            Err(LisError::Permission(format!(
                "角色 {} 无权执行该操作",
                self.0.role
            ))
            .into())
        }
    }
}

/// 从请求头解析调用方
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, LisError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let user_id = header(USER_HEADER)
        .ok_or_else(|| LisError::Unauthenticated(format!("缺少请求头 {}", USER_HEADER)))?;
    let role = header(ROLE_HEADER)
        .ok_or_else(|| LisError::Unauthenticated(format!("缺少请求头 {}", ROLE_HEADER)))?
        .parse::<UserRole>()
        .map_err(|e| LisError::Unauthenticated(e.to_string()))?;

    Ok(Actor::new(user_id, role))
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentActor(actor_from_headers(&parts.headers)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(user: &str, role: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(user).unwrap());
        headers.insert(ROLE_HEADER, HeaderValue::from_str(role).unwrap());
        headers
    }

    #[test]
    fn test_actor_from_headers() {
        let actor = actor_from_headers(&headers("tech-7", "lab_technician")).unwrap();
        assert_eq!(actor, Actor::new("tech-7", UserRole::LabTechnician));

        let err = actor_from_headers(&headers("tech-7", "janitor")).unwrap_err();
        assert!(matches!(err, LisError::Unauthenticated(_)));

        let err = actor_from_headers(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, LisError::Unauthenticated(_)));
    }

    #[test]
    fn test_permission_matrix() {
        assert!(Permission::OrderTest.allows(UserRole::Receptionist));
        assert!(!Permission::OrderTest.allows(UserRole::LabTechnician));
        assert!(Permission::ProcessTest.allows(UserRole::LabTechnician));
        assert!(!Permission::ProcessTest.allows(UserRole::Doctor));
        assert!(Permission::SignOffResult.allows(UserRole::Doctor));
        assert!(!Permission::SignOffResult.allows(UserRole::LabTechnician));
        assert!(Permission::BatchApprove.allows(UserRole::Manager));
        assert!(!Permission::BatchApprove.allows(UserRole::Doctor));
        assert!(Permission::DeleteResult.allows(UserRole::Admin));
        assert!(!Permission::DeleteResult.allows(UserRole::Manager));
        for role in UserRole::ALL {
            assert!(Permission::Read.allows(*role));
        }
    }

    #[test]
    fn test_require_rejects_with_permission_error() {
        let actor = CurrentActor(Actor::new("desk-1", UserRole::Receptionist));
        assert!(actor.require(Permission::OrderTest).is_ok());

        let err = actor.require(Permission::CancelTest).unwrap_err();
        assert!(matches!(err.0, LisError::Permission(_)));
    }
}
