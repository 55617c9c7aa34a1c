use crate::storage::region::RegionData;
use crate::storage::{
    with_retries, KeyRange, ReadMode, Row, ScanRequest, StorageClient, StorageError, TimeRange,
};
use std::collections::BTreeSet;

/// split 的数据行来源（原始 cell，含删除标记）
pub trait RowSource {
    /// 从游标之后读取至多 `limit` 行；返回空表示 split 已读完
    fn next_page(&mut self, limit: usize) -> Result<Vec<Row>, StorageError>;

    /// 按键重读完整版本链（增量窗口命中的行）
    fn read_full(&self, keys: &[Vec<u8>], time: TimeRange) -> Result<Vec<Option<Row>>, StorageError>;
}

/// 分页游标
#[derive(Default)]
struct Cursor {
    after: Option<Vec<u8>>,
    done: bool,
}

impl Cursor {
    fn advance(&mut self, rows: &[Row], limit: usize) {
        match rows.last() {
            Some(last) if rows.len() >= limit => self.after = Some(last.key.clone()),
            _ => self.done = true,
        }
    }
}

/// 在线表
pub struct LiveSource<'c> {
    client: &'c dyn StorageClient,
    table: String,
    range: KeyRange,
    time: TimeRange,
    retries: usize,
    cursor: Cursor,
}

impl<'c> LiveSource<'c> {
    pub fn new(
        client: &'c dyn StorageClient,
        table: &str,
        range: KeyRange,
        time: TimeRange,
        retries: usize,
    ) -> Self {
        Self {
            client,
            table: table.to_string(),
            range,
            time,
            retries,
            cursor: Cursor::default(),
        }
    }
}

impl RowSource for LiveSource<'_> {
    fn next_page(&mut self, limit: usize) -> Result<Vec<Row>, StorageError> {
        if self.cursor.done {
            return Ok(Vec::new());
        }
        let limit = limit.max(1);
        let request = ScanRequest::new(self.range.clone(), self.time)
            .after(self.cursor.after.clone())
            .limit(limit)
            .mode(ReadMode::Raw);
        let rows = with_retries(self.retries, "data scan", || {
            self.client.scan(&self.table, &request)
        })?;
        self.cursor.advance(&rows, limit);
        Ok(rows)
    }

    fn read_full(&self, keys: &[Vec<u8>], time: TimeRange) -> Result<Vec<Option<Row>>, StorageError> {
        with_retries(self.retries, "data get", || {
            self.client.get_rows(&self.table, keys, time, ReadMode::Raw)
        })
    }
}

/// 还原到本地的快照 region（只读、无未提交事务）
pub struct SnapshotSource {
    region: RegionData,
    range: KeyRange,
    time: TimeRange,
    cursor: Cursor,
}

impl SnapshotSource {
    pub fn new(region: RegionData, range: KeyRange, time: TimeRange) -> Self {
        Self {
            region,
            range,
            time,
            cursor: Cursor::default(),
        }
    }
}

impl RowSource for SnapshotSource {
    fn next_page(&mut self, limit: usize) -> Result<Vec<Row>, StorageError> {
        if self.cursor.done {
            return Ok(Vec::new());
        }
        let limit = limit.max(1);
        let request = ScanRequest::new(self.range.clone(), self.time)
            .after(self.cursor.after.clone())
            .limit(limit)
            .mode(ReadMode::Raw);
        let rows = self.region.scan(&request, &BTreeSet::new());
        self.cursor.advance(&rows, limit);
        Ok(rows)
    }

    fn read_full(&self, keys: &[Vec<u8>], time: TimeRange) -> Result<Vec<Option<Row>>, StorageError> {
        let none = BTreeSet::new();
        Ok(keys
            .iter()
            .map(|k| self.region.read_row(k, time, ReadMode::Raw, &none))
            .collect())
    }
}
