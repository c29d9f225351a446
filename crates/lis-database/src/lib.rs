//! # LIS数据库模块
//!
//! 负责患者、检验和结果的持久化。对外提供 `LabStore` 接口，
//! 附带PostgreSQL实现和内存实现。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::InMemoryStore;
pub use queries::PgLabStore;
pub use store::{LabStore, TurnaroundSample};
