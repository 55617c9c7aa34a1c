use super::region::RegionData;
use super::{
    key_hex, now_ms, Admin, KeyRange, Mutation, ReadMode, RegionInfo, Row, ScanRequest,
    SnapshotRef, StorageClient, StorageError, TimeRange, Timestamp,
};
use crate::mapper::server::{execute_on_region, ServerBuildRequest};
use crate::stats::SplitCounters;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

struct TableState {
    enabled: AtomicBool,
    /// 按 start key 升序，区间首尾相接覆盖整个键空间
    regions: RwLock<Vec<RegionData>>,
}

/// 内存版存储引擎（多表、多 region、版本化 cell、快照、事务可见性）
///
/// 测试夹具与 CLI fixture 模式使用；支持故障注入。
pub struct MemoryStore {
    tables: DashMap<String, Arc<TableState>>,
    snapshots: DashMap<String, (SnapshotRef, Vec<RegionData>)>,
    /// 未提交事务的写入时间戳：对所有读取不可见
    pending_tx: RwLock<BTreeSet<Timestamp>>,
    region_seq: AtomicU64,
    fail_mutations: AtomicUsize,
    fail_server_builds: AtomicUsize,
    mutations_applied: AtomicU64,
    server_builds: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            snapshots: DashMap::new(),
            pending_tx: RwLock::new(BTreeSet::new()),
            region_seq: AtomicU64::new(1),
            fail_mutations: AtomicUsize::new(0),
            fail_server_builds: AtomicUsize::new(0),
            mutations_applied: AtomicU64::new(0),
            server_builds: AtomicU64::new(0),
        }
    }

    fn table(&self, name: &str) -> Result<Arc<TableState>, StorageError> {
        self.tables
            .get(name)
            .map(|t| t.value().clone())
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))
    }

    fn enabled_table(&self, name: &str) -> Result<Arc<TableState>, StorageError> {
        let t = self.table(name)?;
        if !t.enabled.load(Ordering::Acquire) {
            return Err(StorageError::TableDisabled(name.to_string()));
        }
        Ok(t)
    }

    fn region_info(&self, table: &str, range: KeyRange) -> RegionInfo {
        let seq = self.region_seq.fetch_add(1, Ordering::Relaxed);
        RegionInfo {
            table: table.to_string(),
            name: format!("{},{},{}", table, key_hex(&range.start), seq),
            range,
        }
    }

    fn build_regions(&self, table: &str, split_points: &[Vec<u8>]) -> Vec<RegionData> {
        let mut points: Vec<Vec<u8>> = split_points
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        points.sort();
        points.dedup();

        let mut regions = Vec::with_capacity(points.len() + 1);
        let mut start = Vec::new();
        for p in points {
            let range = KeyRange::new(std::mem::replace(&mut start, p.clone()), p);
            regions.push(RegionData::new(self.region_info(table, range)));
        }
        regions.push(RegionData::new(
            self.region_info(table, KeyRange::new(start, Vec::new())),
        ));
        regions
    }

    /// 在线拆分 region（模拟 region split）
    pub fn split_region(&self, table: &str, split_key: &[u8]) -> Result<(), StorageError> {
        let t = self.table(table)?;
        let mut regions = t.regions.write();
        let Some(idx) = regions.iter().position(|r| r.info.range.contains(split_key)) else {
            return Err(StorageError::RegionNotFound(key_hex(split_key)));
        };
        if regions[idx].info.range.start.as_slice() == split_key {
            return Ok(());
        }
        let right_info = self.region_info(
            table,
            KeyRange::new(split_key.to_vec(), regions[idx].info.range.stop.clone()),
        );
        let right = regions[idx].split_off(split_key, right_info);
        regions.insert(idx + 1, right);
        Ok(())
    }

    /// 事务写入（提交前对所有读取不可见）
    pub fn write_uncommitted(
        &self,
        table: &str,
        mutations: &[Mutation],
        tx_ts: Timestamp,
    ) -> Result<(), StorageError> {
        self.pending_tx.write().insert(tx_ts);
        self.apply(table, mutations)
    }

    pub fn commit(&self, tx_ts: Timestamp) {
        self.pending_tx.write().remove(&tx_ts);
    }

    /// 故障注入：接下来 n 次 batch_mutate 返回 Unavailable
    pub fn fail_next_mutations(&self, n: usize) {
        self.fail_mutations.store(n, Ordering::SeqCst);
    }

    /// 故障注入：接下来 n 次 server_build 返回 Unavailable
    pub fn fail_next_server_builds(&self, n: usize) {
        self.fail_server_builds.store(n, Ordering::SeqCst);
    }

    /// 已成功写入的 mutation 总数
    pub fn mutations_applied(&self) -> u64 {
        self.mutations_applied.load(Ordering::Relaxed)
    }

    pub fn server_builds(&self) -> u64 {
        self.server_builds.load(Ordering::Relaxed)
    }

    /// 最新版本下可见的行数
    pub fn visible_row_count(&self, table: &str) -> Result<usize, StorageError> {
        let rows = self.scan(table, &ScanRequest::new(KeyRange::all(), TimeRange::all()))?;
        Ok(rows.len())
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn apply(&self, table: &str, mutations: &[Mutation]) -> Result<(), StorageError> {
        let t = self.enabled_table(table)?;
        let mut regions = t.regions.write();
        // 先定位全部 region，保证整批要么全部写入要么全部拒绝
        let mut targets = Vec::with_capacity(mutations.len());
        for m in mutations {
            let idx = regions
                .iter()
                .position(|r| r.info.range.contains(m.row()))
                .ok_or_else(|| StorageError::RegionNotFound(key_hex(m.row())))?;
            targets.push(idx);
        }
        for (m, idx) in mutations.iter().zip(targets) {
            regions[idx].apply(m);
        }
        self.mutations_applied
            .fetch_add(mutations.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

impl Admin for MemoryStore {
    fn table_exists(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn create_table(&self, table: &str, split_points: &[Vec<u8>]) -> Result<(), StorageError> {
        if self.tables.contains_key(table) {
            return Err(StorageError::TableExists(table.to_string()));
        }
        let regions = self.build_regions(table, split_points);
        tracing::debug!("Created table {} with {} region(s)", table, regions.len());
        self.tables.insert(
            table.to_string(),
            Arc::new(TableState {
                enabled: AtomicBool::new(true),
                regions: RwLock::new(regions),
            }),
        );
        Ok(())
    }

    fn disable_table(&self, table: &str) -> Result<(), StorageError> {
        self.table(table)?.enabled.store(false, Ordering::Release);
        Ok(())
    }

    fn enable_table(&self, table: &str) -> Result<(), StorageError> {
        self.table(table)?.enabled.store(true, Ordering::Release);
        Ok(())
    }

    fn delete_table(&self, table: &str) -> Result<(), StorageError> {
        let t = self.table(table)?;
        if t.enabled.load(Ordering::Acquire) {
            return Err(StorageError::TableEnabled(table.to_string()));
        }
        self.tables.remove(table);
        Ok(())
    }

    fn truncate_table(&self, table: &str, preserve_splits: bool) -> Result<(), StorageError> {
        let t = self.table(table)?;
        if t.enabled.load(Ordering::Acquire) {
            return Err(StorageError::TableEnabled(table.to_string()));
        }
        {
            let mut regions = t.regions.write();
            let points: Vec<Vec<u8>> = if preserve_splits {
                regions.iter().skip(1).map(|r| r.info.range.start.clone()).collect()
            } else {
                Vec::new()
            };
            *regions = self.build_regions(table, &points);
        }
        t.enabled.store(true, Ordering::Release);
        Ok(())
    }

    fn regions(&self, table: &str) -> Result<Vec<RegionInfo>, StorageError> {
        let t = self.table(table)?;
        let regions = t.regions.read();
        Ok(regions.iter().map(|r| r.info.clone()).collect())
    }

    fn create_snapshot(&self, table: &str, name: &str) -> Result<SnapshotRef, StorageError> {
        let t = self.table(table)?;
        let ts = now_ms();
        let hidden = self.pending_tx.read().clone();
        let frozen: Vec<RegionData> = t
            .regions
            .read()
            .iter()
            .map(|r| r.frozen_at(ts, &hidden))
            .collect();
        let snapshot = SnapshotRef {
            name: name.to_string(),
            table: table.to_string(),
            ts,
        };
        tracing::info!(
            "Snapshot {} of {} taken at {} ({} regions)",
            name,
            table,
            ts,
            frozen.len()
        );
        self.snapshots
            .insert(name.to_string(), (snapshot.clone(), frozen));
        Ok(snapshot)
    }

    fn snapshot_regions(&self, snapshot: &SnapshotRef) -> Result<Vec<RegionData>, StorageError> {
        self.snapshots
            .get(&snapshot.name)
            .map(|s| s.value().1.clone())
            .ok_or_else(|| StorageError::SnapshotNotFound(snapshot.name.clone()))
    }
}

impl StorageClient for MemoryStore {
    fn scan(&self, table: &str, request: &ScanRequest) -> Result<Vec<Row>, StorageError> {
        let t = self.enabled_table(table)?;
        let hidden = self.pending_tx.read().clone();
        let regions = t.regions.read();
        let mut out = Vec::new();
        for region in regions.iter() {
            let remaining = request.limit.saturating_sub(out.len());
            if remaining == 0 {
                break;
            }
            let mut req = request.clone();
            req.limit = remaining;
            out.extend(region.scan(&req, &hidden));
        }
        Ok(out)
    }

    fn get_rows(
        &self,
        table: &str,
        keys: &[Vec<u8>],
        time: TimeRange,
        mode: ReadMode,
    ) -> Result<Vec<Option<Row>>, StorageError> {
        let t = self.enabled_table(table)?;
        let hidden = self.pending_tx.read().clone();
        let regions = t.regions.read();
        Ok(keys
            .iter()
            .map(|key| {
                regions
                    .iter()
                    .find(|r| r.info.range.contains(key))
                    .and_then(|r| r.read_row(key, time, mode, &hidden))
            })
            .collect())
    }

    fn batch_mutate(&self, table: &str, mutations: &[Mutation]) -> Result<(), StorageError> {
        if Self::take_fault(&self.fail_mutations) {
            return Err(StorageError::Unavailable(format!(
                "injected write failure on {}",
                table
            )));
        }
        self.apply(table, mutations)
    }

    fn admin(&self) -> &dyn Admin {
        self
    }

    fn server_build(&self, request: &ServerBuildRequest) -> Result<SplitCounters, StorageError> {
        if Self::take_fault(&self.fail_server_builds) {
            return Err(StorageError::Unavailable(format!(
                "injected failure on region {}",
                request.split.region.name
            )));
        }
        let t = self.enabled_table(&request.split.region.table)?;
        let hosted = t.regions.read().iter().any(|r| {
            r.info.name == request.split.region.name
                && r.info.range.intersect(&request.split.range).as_ref() == Some(&request.split.range)
        });
        if !hosted {
            return Err(StorageError::RegionNotFound(request.split.region.name.clone()));
        }
        self.server_builds.fetch_add(1, Ordering::Relaxed);
        execute_on_region(self, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Cell;

    fn put(row: &[u8], ts: Timestamp) -> Mutation {
        Mutation::Put {
            row: row.to_vec(),
            cells: vec![Cell::put("0", "A", b"v".to_vec(), ts)],
        }
    }

    #[test]
    fn create_table_with_split_points() {
        let store = MemoryStore::new();
        store
            .create_table("T", &[b"m".to_vec(), b"c".to_vec(), b"m".to_vec()])
            .unwrap();
        let regions = store.regions("T").unwrap();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].range, KeyRange::new(Vec::new(), b"c".to_vec()));
        assert_eq!(regions[2].range, KeyRange::new(b"m".to_vec(), Vec::new()));
        assert!(matches!(
            store.create_table("T", &[]),
            Err(StorageError::TableExists(_))
        ));
    }

    #[test]
    fn scan_crosses_regions_in_key_order() {
        let store = MemoryStore::new();
        store.create_table("T", &[b"c".to_vec()]).unwrap();
        store
            .batch_mutate("T", &[put(b"d", 1), put(b"a", 1), put(b"b", 1)])
            .unwrap();
        let rows = store
            .scan("T", &ScanRequest::new(KeyRange::all(), TimeRange::all()).limit(2))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].key, b"b".to_vec());
        let rest = store
            .scan(
                "T",
                &ScanRequest::new(KeyRange::all(), TimeRange::all()).after(Some(b"b".to_vec())),
            )
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].key, b"d".to_vec());
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.create_table("T", &[]).unwrap();
        store.fail_next_mutations(1);
        assert!(matches!(
            store.batch_mutate("T", &[put(b"a", 1)]),
            Err(StorageError::Unavailable(_))
        ));
        store.batch_mutate("T", &[put(b"a", 1)]).unwrap();
        assert_eq!(store.mutations_applied(), 1);
    }

    #[test]
    fn uncommitted_writes_become_visible_on_commit() {
        let store = MemoryStore::new();
        store.create_table("T", &[]).unwrap();
        store.write_uncommitted("T", &[put(b"a", 50)], 50).unwrap();
        assert_eq!(store.visible_row_count("T").unwrap(), 0);
        store.commit(50);
        assert_eq!(store.visible_row_count("T").unwrap(), 1);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = MemoryStore::new();
        store.create_table("T", &[]).unwrap();
        store.batch_mutate("T", &[put(b"a", 1)]).unwrap();
        let snap = store.create_snapshot("T", "s1").unwrap();
        store.batch_mutate("T", &[put(b"b", 2)]).unwrap();
        let regions = store.snapshot_regions(&snap).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].rows.len(), 1);
    }

    #[test]
    fn disabled_tables_reject_io_and_truncate_keeps_splits() {
        let store = MemoryStore::new();
        store.create_table("T", &[b"k".to_vec()]).unwrap();
        store.batch_mutate("T", &[put(b"a", 1)]).unwrap();
        assert!(matches!(
            store.truncate_table("T", true),
            Err(StorageError::TableEnabled(_))
        ));
        store.disable_table("T").unwrap();
        assert!(matches!(
            store.batch_mutate("T", &[put(b"a", 1)]),
            Err(StorageError::TableDisabled(_))
        ));
        store.truncate_table("T", true).unwrap();
        assert_eq!(store.regions("T").unwrap().len(), 2);
        assert_eq!(store.visible_row_count("T").unwrap(), 0);
    }

    #[test]
    fn split_region_moves_rows() {
        let store = MemoryStore::new();
        store.create_table("T", &[]).unwrap();
        store
            .batch_mutate("T", &[put(b"a", 1), put(b"x", 1)])
            .unwrap();
        store.split_region("T", b"m").unwrap();
        let regions = store.regions("T").unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].range.start, b"m".to_vec());
        assert_eq!(store.visible_row_count("T").unwrap(), 2);
    }
}
