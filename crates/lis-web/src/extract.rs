//! 请求体提取

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
};
use lis_core::LisError;
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// 可省略的JSON请求体
///
/// 空请求体得到 `None`；非空但无法解析的请求体返回 400，而不是被当作省略。
#[derive(Debug)]
pub struct OptionalJson<T>(pub Option<T>);

impl<T: Default> OptionalJson<T> {
    pub fn into_inner_or_default(self) -> T {
        self.0.unwrap_or_default()
    }
}

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| LisError::Validation(e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(OptionalJson(None));
        }

        serde_json::from_slice(&bytes)
            .map(|value| OptionalJson(Some(value)))
            .map_err(|e| LisError::Validation(format!("请求体格式错误: {}", e)).into())
    }
}
