//! # LIS Core
//!
//! 实验室信息系统的核心模块，提供基础数据结构、查询条件、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod query;
pub mod utils;

pub use error::{LisError, Result};
pub use models::*;
pub use query::{Page, Pagination, PatientFilter, ResultFilter, SortOrder, TestFilter};
