pub mod memory;
pub mod region;
pub mod snapshot;

pub use memory::MemoryStore;
pub use region::RegionData;

use crate::mapper::server::ServerBuildRequest;
use crate::stats::SplitCounters;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 毫秒时间戳（与存储引擎的 cell 版本一致）
pub type Timestamp = u64;

pub const LATEST_TIMESTAMP: Timestamp = u64::MAX;

pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Put,
    /// 屏蔽该列所有 ts <= 自身 ts 的版本
    DeleteColumn,
    /// 屏蔽整行所有 ts <= 自身 ts 的 cell
    DeleteFamily,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub family: String,
    pub qualifier: String,
    pub value: Vec<u8>,
    pub ts: Timestamp,
    pub kind: CellKind,
}

impl Cell {
    pub fn put(
        family: impl Into<String>,
        qualifier: impl Into<String>,
        value: impl Into<Vec<u8>>,
        ts: Timestamp,
    ) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            ts,
            kind: CellKind::Put,
        }
    }

    pub fn same_column(&self, family: &str, qualifier: &str) -> bool {
        self.family == family && self.qualifier == qualifier
    }
}

/// 一行：row key + 可见 cell（按 family/qualifier 升序、同列 ts 降序）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub key: Vec<u8>,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(key: Vec<u8>, cells: Vec<Cell>) -> Self {
        Self { key, cells }
    }

    /// 某列最新的可见版本
    pub fn latest(&self, family: &str, qualifier: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .filter(|c| c.kind == CellKind::Put && c.same_column(family, qualifier))
            .max_by_key(|c| c.ts)
    }

    pub fn max_ts(&self) -> Option<Timestamp> {
        self.cells.iter().map(|c| c.ts).max()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// 行键区间 [start, stop)；stop 为空表示无上界
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub stop: Vec<u8>,
}

impl KeyRange {
    pub fn new(start: impl Into<Vec<u8>>, stop: impl Into<Vec<u8>>) -> Self {
        Self {
            start: start.into(),
            stop: stop.into(),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// 所有以 prefix 开头的键
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: prefix.to_vec(),
            stop: prefix_successor(prefix),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && (self.stop.is_empty() || key < self.stop.as_slice())
    }

    pub fn is_unbounded_above(&self) -> bool {
        self.stop.is_empty()
    }

    /// 区间交集；为空时返回 None
    pub fn intersect(&self, other: &KeyRange) -> Option<KeyRange> {
        let start = self.start.clone().max(other.start.clone());
        let stop = match (self.stop.is_empty(), other.stop.is_empty()) {
            (true, true) => Vec::new(),
            (true, false) => other.stop.clone(),
            (false, true) => self.stop.clone(),
            (false, false) => self.stop.clone().min(other.stop.clone()),
        };
        if !stop.is_empty() && start >= stop {
            return None;
        }
        Some(KeyRange { start, stop })
    }
}

/// 大于所有以 prefix 开头的键的最小键；prefix 全为 0xFF 时返回空（无上界）
pub fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != 0xFF {
            out.push(last + 1);
            return out;
        }
    }
    Vec::new()
}

/// 行键的可读形式（日志、region 名）
pub fn key_hex(key: &[u8]) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 闭区间 [min, max] 的版本窗口
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: Timestamp,
    pub max: Timestamp,
}

impl TimeRange {
    pub fn new(min: Timestamp, max: Timestamp) -> Self {
        Self { min, max }
    }

    pub fn all() -> Self {
        Self {
            min: 0,
            max: LATEST_TIMESTAMP,
        }
    }

    pub fn as_of(ts: Timestamp) -> Self {
        Self { min: 0, max: ts }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.min && ts <= self.max
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadMode {
    /// 每列只返回最新可见版本
    Latest,
    /// 返回每列所有可见版本
    AllVersions,
    /// 原样返回（含删除标记与被屏蔽的 put），仍受时间窗口与事务可见性约束
    Raw,
}

#[derive(Clone, Debug)]
pub struct ScanRequest {
    pub range: KeyRange,
    /// 从严格大于该键的位置继续（分页游标）
    pub after: Option<Vec<u8>>,
    pub limit: usize,
    pub time: TimeRange,
    pub mode: ReadMode,
}

impl ScanRequest {
    pub fn new(range: KeyRange, time: TimeRange) -> Self {
        Self {
            range,
            after: None,
            limit: usize::MAX,
            time,
            mode: ReadMode::Latest,
        }
    }

    pub fn after(mut self, key: Option<Vec<u8>>) -> Self {
        self.after = key;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Put {
        row: Vec<u8>,
        cells: Vec<Cell>,
    },
    DeleteRow {
        row: Vec<u8>,
        ts: Timestamp,
    },
    DeleteColumn {
        row: Vec<u8>,
        family: String,
        qualifier: String,
        ts: Timestamp,
    },
}

impl Mutation {
    pub fn row(&self) -> &[u8] {
        match self {
            Mutation::Put { row, .. }
            | Mutation::DeleteRow { row, .. }
            | Mutation::DeleteColumn { row, .. } => row,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub table: String,
    pub name: String,
    pub range: KeyRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub name: String,
    pub table: String,
    pub ts: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("table '{0}' not found")]
    TableNotFound(String),
    #[error("table '{0}' already exists")]
    TableExists(String),
    #[error("table '{0}' is disabled")]
    TableDisabled(String),
    #[error("table '{0}' must be disabled first")]
    TableEnabled(String),
    #[error("region '{0}' is not online")]
    RegionNotFound(String),
    #[error("snapshot '{0}' not found")]
    SnapshotNotFound(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot file: {0}")]
    Snapshot(String),
}

impl StorageError {
    /// 可重试：瞬时不可用 / region 迁移
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::RegionNotFound(_)
        )
    }
}

/// 表管理接口（建表、预分区、快照）
pub trait Admin: Send + Sync {
    fn table_exists(&self, table: &str) -> bool;
    fn create_table(&self, table: &str, split_points: &[Vec<u8>]) -> Result<(), StorageError>;
    fn disable_table(&self, table: &str) -> Result<(), StorageError>;
    fn enable_table(&self, table: &str) -> Result<(), StorageError>;
    fn delete_table(&self, table: &str) -> Result<(), StorageError>;
    fn truncate_table(&self, table: &str, preserve_splits: bool) -> Result<(), StorageError>;
    fn regions(&self, table: &str) -> Result<Vec<RegionInfo>, StorageError>;
    fn create_snapshot(&self, table: &str, name: &str) -> Result<SnapshotRef, StorageError>;
    fn snapshot_regions(&self, snapshot: &SnapshotRef) -> Result<Vec<RegionData>, StorageError>;
}

/// 存储引擎读写路径
pub trait StorageClient: Send + Sync {
    fn scan(&self, table: &str, request: &ScanRequest) -> Result<Vec<Row>, StorageError>;

    /// 按键批量点查；返回与 keys 等长，不存在（或全部不可见）为 None
    fn get_rows(
        &self,
        table: &str,
        keys: &[Vec<u8>],
        time: TimeRange,
        mode: ReadMode,
    ) -> Result<Vec<Option<Row>>, StorageError>;

    /// 单批原子写入
    fn batch_mutate(&self, table: &str, mutations: &[Mutation]) -> Result<(), StorageError>;

    fn admin(&self) -> &dyn Admin;

    /// 服务端构建入口：在 split 所在 region 上执行整段处理，返回该 split 的计数
    fn server_build(&self, request: &ServerBuildRequest) -> Result<SplitCounters, StorageError>;
}

/// 客户端有界重试：仅重试可重试错误，线性退避
pub fn with_retries<T>(
    attempts: usize,
    op: &str,
    mut f: impl FnMut() -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!("{} failed (attempt {}/{}): {}", op, attempt, attempts, e);
                std::thread::sleep(Duration::from_millis(5 * attempt as u64));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
