use super::{column, column_str, column_u64, decode_run_ts, ensure_table, run_prefix};
use super::{RECORD_FAMILY, RESULT_TABLE_NAME, ROW_KEY_SEPARATOR};
use crate::stats::{Counter, SplitCounters};
use crate::storage::{
    with_retries, Cell, KeyRange, Mutation, ReadMode, Row, ScanRequest, StorageClient,
    StorageError, TimeRange, Timestamp,
};
use serde::{Deserialize, Serialize};

pub const REGION_NAME: &str = "REGION_NAME";
pub const SCAN_START_ROW: &str = "SCAN_START_ROW";
pub const SCAN_STOP_ROW: &str = "SCAN_STOP_ROW";
pub const SCAN_MAX_TS: &str = "SCAN_MAX_TS";

/// 一个 split 的校验汇总
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub run_ts: Timestamp,
    pub index_table: String,
    pub region_name: String,
    pub scan_start: Vec<u8>,
    pub scan_stop: Vec<u8>,
    pub scan_max_ts: Timestamp,
    pub counters: SplitCounters,
}

fn result_row_key(
    run_ts: Timestamp,
    index_table: &str,
    region_name: &str,
    start: &[u8],
    stop: &[u8],
) -> Vec<u8> {
    let mut key = run_prefix(run_ts, index_table);
    key.extend_from_slice(region_name.as_bytes());
    key.push(ROW_KEY_SEPARATOR);
    key.extend_from_slice(start);
    key.push(ROW_KEY_SEPARATOR);
    key.extend_from_slice(stop);
    key
}

impl ResultRecord {
    /// `ts | indexTableName | regionName | scanStart | scanStop`
    pub fn row_key(&self) -> Vec<u8> {
        result_row_key(
            self.run_ts,
            &self.index_table,
            &self.region_name,
            &self.scan_start,
            &self.scan_stop,
        )
    }

    fn to_mutation(&self) -> Mutation {
        let cell = |q: &str, v: Vec<u8>| Cell::put(RECORD_FAMILY, q, v, self.run_ts);
        let mut cells = vec![
            cell(REGION_NAME, self.region_name.as_bytes().to_vec()),
            cell(SCAN_START_ROW, self.scan_start.clone()),
            cell(SCAN_STOP_ROW, self.scan_stop.clone()),
            cell(SCAN_MAX_TS, self.scan_max_ts.to_be_bytes().to_vec()),
        ];
        for (c, v) in self.counters.iter() {
            cells.push(cell(c.name(), v.to_be_bytes().to_vec()));
        }
        Mutation::Put {
            row: self.row_key(),
            cells,
        }
    }

    fn from_row(index_table: &str, row: &Row) -> Option<Self> {
        let mut counters = SplitCounters::new();
        for c in Counter::ALL {
            counters.add(c, column_u64(row, c.name()).unwrap_or(0));
        }
        Some(Self {
            run_ts: decode_run_ts(&row.key)?,
            index_table: index_table.to_string(),
            region_name: column_str(row, REGION_NAME)?,
            scan_start: column(row, SCAN_START_ROW)?.to_vec(),
            scan_stop: column(row, SCAN_STOP_ROW)?.to_vec(),
            scan_max_ts: column_u64(row, SCAN_MAX_TS)?,
            counters,
        })
    }
}

/// Result 表仓库
pub struct ResultRepository<'c> {
    client: &'c dyn StorageClient,
    retries: usize,
}

impl<'c> ResultRepository<'c> {
    pub fn new(client: &'c dyn StorageClient, retries: usize) -> Self {
        Self { client, retries }
    }

    pub fn ensure_table(&self) -> Result<(), StorageError> {
        ensure_table(self.client, RESULT_TABLE_NAME)
    }

    pub fn append(&self, record: &ResultRecord) -> Result<(), StorageError> {
        let mutation = record.to_mutation();
        with_retries(self.retries, "result append", || {
            self.client
                .batch_mutate(RESULT_TABLE_NAME, std::slice::from_ref(&mutation))
        })
    }

    /// 某次运行中某个 split 的结果
    pub fn result_for(
        &self,
        run_ts: Timestamp,
        index_table: &str,
        region_name: &str,
        start: &[u8],
        stop: &[u8],
    ) -> Result<Option<ResultRecord>, StorageError> {
        if !self.client.admin().table_exists(RESULT_TABLE_NAME) {
            return Ok(None);
        }
        let key = result_row_key(run_ts, index_table, region_name, start, stop);
        let rows = with_retries(self.retries, "result get", || {
            self.client.get_rows(
                RESULT_TABLE_NAME,
                std::slice::from_ref(&key),
                TimeRange::all(),
                ReadMode::Latest,
            )
        })?;
        Ok(rows
            .into_iter()
            .next()
            .flatten()
            .and_then(|row| ResultRecord::from_row(index_table, &row)))
    }

    pub fn results_for(&self, run_ts: Timestamp, index_table: &str) -> Result<Vec<ResultRecord>, StorageError> {
        if !self.client.admin().table_exists(RESULT_TABLE_NAME) {
            return Ok(Vec::new());
        }
        let request = ScanRequest::new(KeyRange::prefix(&run_prefix(run_ts, index_table)), TimeRange::all());
        let rows = with_retries(self.retries, "result scan", || {
            self.client.scan(RESULT_TABLE_NAME, &request)
        })?;
        Ok(rows
            .iter()
            .filter_map(|row| ResultRecord::from_row(index_table, row))
            .collect())
    }

    pub fn run_exists(&self, run_ts: Timestamp, index_table: &str) -> Result<bool, StorageError> {
        if !self.client.admin().table_exists(RESULT_TABLE_NAME) {
            return Ok(false);
        }
        let request =
            ScanRequest::new(KeyRange::prefix(&run_prefix(run_ts, index_table)), TimeRange::all()).limit(1);
        let rows = with_retries(self.retries, "result scan", || {
            self.client.scan(RESULT_TABLE_NAME, &request)
        })?;
        Ok(!rows.is_empty())
    }
}
