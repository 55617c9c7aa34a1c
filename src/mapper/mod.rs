//! Mapper 策略：每个 split 的扫描 → 校验 → 重建 → 再校验
//!
//! 两种执行方式共用 [`page::SplitProcessor`]：
//! - ServerPushed：请求下发到 region 所在的存储端点，在服务端就地处理
//! - DirectApi：在 worker 内经客户端（或还原的快照文件）读取并写回

pub mod direct;
pub mod elide;
pub mod page;
pub mod server;
pub mod source;

pub use direct::DirectApiMapper;
pub use server::{ServerBuildRequest, ServerPushedMapper};

use crate::core::partition::Split;
use crate::index::compare::CompareContext;
use crate::index::schema::{ResolvedIndex, ResolvedTable};
use crate::stats::{Phase, SplitCounters};
use crate::storage::{StorageClient, StorageError, TimeRange, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 校验模式
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
#[value(rename_all = "UPPER")]
pub enum VerifyType {
    /// 只构建
    #[default]
    None,
    /// 先校验，只重建无效/缺失行
    Before,
    /// 全量重建后校验
    After,
    /// 校验 → 重建无效/缺失行 → 再校验
    Both,
    /// 只校验，不写索引表
    Only,
}

impl VerifyType {
    pub fn verifies_before(self) -> bool {
        matches!(self, VerifyType::Before | VerifyType::Both | VerifyType::Only)
    }

    pub fn verifies_after(self) -> bool {
        matches!(self, VerifyType::After | VerifyType::Both)
    }

    pub fn mutates(self) -> bool {
        self != VerifyType::Only
    }

    /// 不依赖前置校验结果，重建全部行
    pub fn rebuild_all(self) -> bool {
        matches!(self, VerifyType::None | VerifyType::After)
    }

    pub fn verifies(self) -> bool {
        self != VerifyType::None
    }

    pub fn value(self) -> &'static str {
        match self {
            VerifyType::None => "NONE",
            VerifyType::Before => "BEFORE",
            VerifyType::After => "AFTER",
            VerifyType::Both => "BOTH",
            VerifyType::Only => "ONLY",
        }
    }
}

/// 关闭某阶段的 Output 记录
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "UPPERCASE")]
#[value(rename_all = "UPPER")]
pub enum DisableLoggingType {
    #[default]
    None,
    Before,
    After,
    Both,
}

impl DisableLoggingType {
    pub fn logs(self, phase: Phase) -> bool {
        !matches!(
            (self, phase),
            (DisableLoggingType::Both, _)
                | (DisableLoggingType::Before, Phase::Before)
                | (DisableLoggingType::After, Phase::After)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapperKind {
    ServerPushed,
    DirectApi,
}

impl MapperKind {
    /// 本地索引或非事务表走服务端；快照读取只能在客户端进行
    pub fn select(local_index: bool, transactional: bool, use_snapshot: bool) -> Self {
        if (local_index || !transactional) && !use_snapshot {
            MapperKind::ServerPushed
        } else {
            MapperKind::DirectApi
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MapperKind::ServerPushed => "ServerPushed",
            MapperKind::DirectApi => "DirectApi",
        }
    }
}

/// 提交时冻结的作业参数（随请求下发到服务端）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildPlan {
    pub data_table: ResolvedTable,
    pub index: ResolvedIndex,
    pub verify: VerifyType,
    pub disable_logging: DisableLoggingType,
    pub run_ts: Timestamp,
    /// 数据扫描窗口 [start_time, as_of]
    pub time: TimeRange,
    pub compare: CompareContext,
    pub page_size_rows: usize,
    pub batch_size: usize,
    pub client_retries: usize,
    /// retry-verify：已有 Result 记录的 split 直接复用
    pub reuse_verified_splits: bool,
}

impl BuildPlan {
    pub fn as_of(&self) -> Timestamp {
        self.time.max
    }

    /// 增量窗口：扫描命中的行需要重新读取完整版本链
    pub fn is_incremental(&self) -> bool {
        self.time.min > 0
    }
}

/// 作业内唯一的 Mapper 变体
pub enum Mapper {
    ServerPushed(ServerPushedMapper),
    DirectApi(DirectApiMapper),
}

impl Mapper {
    pub fn new(kind: MapperKind, client: Arc<dyn StorageClient>, plan: Arc<BuildPlan>) -> Self {
        match kind {
            MapperKind::ServerPushed => Mapper::ServerPushed(ServerPushedMapper::new(client, plan)),
            MapperKind::DirectApi => Mapper::DirectApi(DirectApiMapper::new(client, plan)),
        }
    }

    pub fn kind(&self) -> MapperKind {
        match self {
            Mapper::ServerPushed(_) => MapperKind::ServerPushed,
            Mapper::DirectApi(_) => MapperKind::DirectApi,
        }
    }

    /// 处理一个 split；每次调用从零计数
    pub fn map_split(&self, split: &Split) -> Result<SplitCounters, StorageError> {
        match self {
            Mapper::ServerPushed(m) => m.map_split(split),
            Mapper::DirectApi(m) => m.map_split(split),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapper_selection_follows_table_properties() {
        assert_eq!(MapperKind::select(false, false, false), MapperKind::ServerPushed);
        assert_eq!(MapperKind::select(true, true, false), MapperKind::ServerPushed);
        assert_eq!(MapperKind::select(false, true, false), MapperKind::DirectApi);
        assert_eq!(MapperKind::select(false, false, true), MapperKind::DirectApi);
        assert_eq!(MapperKind::select(true, false, true), MapperKind::DirectApi);
    }

    #[test]
    fn verify_type_phases() {
        assert!(VerifyType::Both.verifies_before() && VerifyType::Both.verifies_after());
        assert!(!VerifyType::Only.mutates());
        assert!(VerifyType::After.rebuild_all());
        assert!(!VerifyType::Before.rebuild_all());
        assert!(!VerifyType::None.verifies());
    }

    #[test]
    fn disable_logging_per_phase() {
        assert!(DisableLoggingType::None.logs(Phase::Before));
        assert!(!DisableLoggingType::Before.logs(Phase::Before));
        assert!(DisableLoggingType::Before.logs(Phase::After));
        assert!(!DisableLoggingType::Both.logs(Phase::After));
    }
}
