//! # LIS Web
//!
//! 实验室信息系统的HTTP接口：路由、处理器、调用方身份解析和错误响应。

pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod server;

pub use auth::{CurrentActor, Permission, ROLE_HEADER, USER_HEADER};
pub use error::{ApiError, ApiResult};
pub use extract::OptionalJson;
pub use server::{create_app, AppState, WebServer};
