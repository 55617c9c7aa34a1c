//! 索引构建工具入口：配置 → 解析 → 预分区 → 提交作业 → 收尾

pub mod cli;
pub mod config;
pub mod fixture;
pub mod orchestrator;
pub mod provision;


pub use cli::Cli;
pub use config::IndexToolConfig;
pub use fixture::{Fixture, RowWriter};
pub use orchestrator::IndexTool;
pub use provision::IndexTableProvisioner;

use crate::index::schema::SchemaError;
use crate::storage::{StorageError, Timestamp};

pub const STATUS_SUCCESS: i32 = 0;
/// 租户与索引/数据表不对应
pub const STATUS_MISMATCH: i32 = -1;
pub const STATUS_SETUP: i32 = 1;
pub const STATUS_JOB_FAILED: i32 = 2;

/// 提交前的准备阶段错误
#[derive(Debug, thiserror::Error)]
pub enum IndexToolError {
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("index '{index}' does not correspond to table '{table}' for tenant {tenant:?}")]
    TenantMismatch {
        index: String,
        table: String,
        tenant: Option<String>,
    },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("no verification run {run_ts} for index '{index}'")]
    UnknownRun { run_ts: Timestamp, index: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IndexToolError {
    /// 进程退出码
    pub fn status(&self) -> i32 {
        match self {
            IndexToolError::TenantMismatch { .. } => STATUS_MISMATCH,
            _ => STATUS_SETUP,
        }
    }
}
