//! 错误定义模块

use thiserror::Error;

/// LIS系统统一错误类型
#[derive(Error, Debug)]
pub enum LisError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效状态转换: {entity} 当前状态 {from}, 请求 {requested}")]
    InvalidTransition {
        entity: String,
        from: String,
        requested: String,
    },

    #[error("数据冲突: {0}")]
    Conflict(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("未认证: {0}")]
    Unauthenticated(String),

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("通知发送失败: {0}")]
    Notification(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl LisError {
    /// 构造状态转换错误
    pub fn invalid_transition(
        entity: impl Into<String>,
        from: impl std::fmt::Display,
        requested: impl std::fmt::Display,
    ) -> Self {
        LisError::InvalidTransition {
            entity: entity.into(),
            from: from.to_string(),
            requested: requested.to_string(),
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        LisError::NotFound(what.to_string())
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for LisError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => LisError::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                LisError::Conflict(db_err.message().to_string())
            }
            _ => LisError::Database(err.to_string()),
        }
    }
}

/// LIS系统统一结果类型
pub type Result<T> = std::result::Result<T, LisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = LisError::invalid_transition("test TEST000001", "ordered", "complete");
        let message = err.to_string();
        assert!(message.contains("ordered"));
        assert!(message.contains("complete"));
        assert!(message.contains("TEST000001"));
    }
}
