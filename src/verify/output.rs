use super::{column, column_str, column_u64, decode_run_ts, ensure_table, run_prefix};
use super::{OUTPUT_TABLE_NAME, RECORD_FAMILY};
use crate::index::compare::ErrorType;
use crate::stats::Phase;
use crate::storage::{
    with_retries, Cell, KeyRange, Mutation, ReadMode, Row, ScanRequest, StorageClient,
    StorageError, TimeRange, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DATA_TABLE_NAME: &str = "DATA_TABLE_NAME";
pub const INDEX_TABLE_NAME: &str = "INDEX_TABLE_NAME";
pub const DATA_TABLE_ROW_KEY: &str = "DATA_TABLE_ROW_KEY";
pub const INDEX_TABLE_ROW_KEY: &str = "INDEX_TABLE_ROW_KEY";
pub const DATA_TABLE_TS: &str = "DATA_TABLE_TS";
pub const ERROR_MESSAGE: &str = "ERROR_MESSAGE";
pub const ERROR_TYPE: &str = "ERROR_TYPE";
pub const VERIFICATION_PHASE: &str = "VERIFICATION_PHASE";

/// 一条不一致记录
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub run_ts: Timestamp,
    pub data_table: String,
    pub index_table: String,
    pub data_row_key: Vec<u8>,
    pub index_row_key: Option<Vec<u8>>,
    pub data_ts: Timestamp,
    pub error_type: ErrorType,
    pub message: String,
    pub phase: Phase,
}

/// 同一行的 BEFORE / AFTER 记录写在同一行键下的不同 cell 版本
fn phase_cell_ts(run_ts: Timestamp, phase: Phase) -> Timestamp {
    match phase {
        Phase::Before => run_ts,
        Phase::After => run_ts + 1,
    }
}

impl OutputRecord {
    /// `ts | indexTableName | dataRowKey`
    pub fn row_key(&self) -> Vec<u8> {
        let mut key = run_prefix(self.run_ts, &self.index_table);
        key.extend_from_slice(&self.data_row_key);
        key
    }

    fn to_mutation(&self) -> Mutation {
        let ts = phase_cell_ts(self.run_ts, self.phase);
        let cell = |q: &str, v: Vec<u8>| Cell::put(RECORD_FAMILY, q, v, ts);
        let mut cells = vec![
            cell(DATA_TABLE_NAME, self.data_table.as_bytes().to_vec()),
            cell(INDEX_TABLE_NAME, self.index_table.as_bytes().to_vec()),
            cell(DATA_TABLE_ROW_KEY, self.data_row_key.clone()),
            cell(DATA_TABLE_TS, self.data_ts.to_be_bytes().to_vec()),
            cell(ERROR_MESSAGE, self.message.as_bytes().to_vec()),
            cell(ERROR_TYPE, self.error_type.name().as_bytes().to_vec()),
            cell(VERIFICATION_PHASE, self.phase.name().as_bytes().to_vec()),
        ];
        if let Some(k) = &self.index_row_key {
            cells.push(cell(INDEX_TABLE_ROW_KEY, k.clone()));
        }
        Mutation::Put {
            row: self.row_key(),
            cells,
        }
    }

    /// 从单个版本的 cell 还原记录
    fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            run_ts: decode_run_ts(&row.key)?,
            data_table: column_str(row, DATA_TABLE_NAME)?,
            index_table: column_str(row, INDEX_TABLE_NAME)?,
            data_row_key: column(row, DATA_TABLE_ROW_KEY)?.to_vec(),
            index_row_key: column(row, INDEX_TABLE_ROW_KEY).map(<[u8]>::to_vec),
            data_ts: column_u64(row, DATA_TABLE_TS)?,
            error_type: ErrorType::from_name(&column_str(row, ERROR_TYPE)?)?,
            message: column_str(row, ERROR_MESSAGE)?,
            phase: Phase::from_name(&column_str(row, VERIFICATION_PHASE)?)?,
        })
    }
}

/// Output 表仓库（追加写、按前缀读）
pub struct OutputRepository<'c> {
    client: &'c dyn StorageClient,
    retries: usize,
}

impl<'c> OutputRepository<'c> {
    pub fn new(client: &'c dyn StorageClient, retries: usize) -> Self {
        Self { client, retries }
    }

    pub fn ensure_table(&self) -> Result<(), StorageError> {
        ensure_table(self.client, OUTPUT_TABLE_NAME)
    }

    pub fn append(&self, records: &[OutputRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        let mutations: Vec<Mutation> = records.iter().map(OutputRecord::to_mutation).collect();
        with_retries(self.retries, "output append", || {
            self.client.batch_mutate(OUTPUT_TABLE_NAME, &mutations)
        })
    }

    /// 某次运行、某个索引的全部记录（按行键、阶段排序）
    pub fn records_for(&self, run_ts: Timestamp, index_table: &str) -> Result<Vec<OutputRecord>, StorageError> {
        if !self.client.admin().table_exists(OUTPUT_TABLE_NAME) {
            return Ok(Vec::new());
        }
        let request = ScanRequest::new(KeyRange::prefix(&run_prefix(run_ts, index_table)), TimeRange::all())
            .mode(ReadMode::AllVersions);
        let rows = with_retries(self.retries, "output scan", || {
            self.client.scan(OUTPUT_TABLE_NAME, &request)
        })?;

        let mut out = Vec::new();
        for row in rows {
            let mut by_version: BTreeMap<Timestamp, Vec<Cell>> = BTreeMap::new();
            for c in row.cells {
                by_version.entry(c.ts).or_default().push(c);
            }
            for (_, cells) in by_version {
                if let Some(r) = OutputRecord::from_row(&Row::new(row.key.clone(), cells)) {
                    out.push(r);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn record(key: &[u8], phase: Phase) -> OutputRecord {
        OutputRecord {
            run_ts: 1_000,
            data_table: "S.T".into(),
            index_table: "S.I".into(),
            data_row_key: key.to_vec(),
            index_row_key: Some(b"ik".to_vec()),
            data_ts: 7,
            error_type: ErrorType::MissingRow,
            message: "Missing index row".into(),
            phase,
        }
    }

    #[test]
    fn append_and_read_back_both_phases() {
        let store = MemoryStore::new();
        let repo = OutputRepository::new(&store, 1);
        repo.ensure_table().unwrap();
        repo.ensure_table().unwrap();

        // 数据行键中含分隔符也不影响读取
        repo.append(&[record(b"a|b", Phase::Before), record(b"a|b", Phase::After)])
            .unwrap();
        repo.append(&[record(b"z", Phase::Before)]).unwrap();

        let got = repo.records_for(1_000, "S.I").unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0], record(b"a|b", Phase::Before));
        assert_eq!(got[1].phase, Phase::After);
        assert!(repo.records_for(1_000, "S.OTHER").unwrap().is_empty());
        assert!(repo.records_for(999, "S.I").unwrap().is_empty());
    }

    #[test]
    fn row_key_layout() {
        let key = record(b"row", Phase::Before).row_key();
        assert_eq!(key, b"00000000000000001000|S.I|row".to_vec());
    }
}
