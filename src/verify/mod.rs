//! 校验结果持久化：Output 表（逐行不一致记录）与 Result 表（逐 split 计数）

pub mod output;
pub mod result;

pub use output::{OutputRecord, OutputRepository};
pub use result::{ResultRecord, ResultRepository};

use crate::storage::{Row, StorageClient, StorageError, Timestamp};

pub const OUTPUT_TABLE_NAME: &str = "INDEX_TOOL_OUTPUT";
pub const RESULT_TABLE_NAME: &str = "INDEX_TOOL_RESULT";
pub const RECORD_FAMILY: &str = "0";
pub const ROW_KEY_SEPARATOR: u8 = b'|';

/// 运行时间戳的行键编码：20 位补零十进制（定长、保序、不含分隔符）
pub fn encode_run_ts(run_ts: Timestamp) -> String {
    format!("{:020}", run_ts)
}

pub fn decode_run_ts(key: &[u8]) -> Option<Timestamp> {
    let digits = key.get(..20)?;
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// `ts | index |`
pub fn run_prefix(run_ts: Timestamp, index_table: &str) -> Vec<u8> {
    let mut key = encode_run_ts(run_ts).into_bytes();
    key.push(ROW_KEY_SEPARATOR);
    key.extend_from_slice(index_table.as_bytes());
    key.push(ROW_KEY_SEPARATOR);
    key
}

/// 表不存在则创建（并发创建时忽略 TableExists）
fn ensure_table(client: &dyn StorageClient, table: &str) -> Result<(), StorageError> {
    let admin = client.admin();
    if admin.table_exists(table) {
        return Ok(());
    }
    match admin.create_table(table, &[]) {
        Ok(()) => {
            tracing::info!("Created verification table {}", table);
            Ok(())
        }
        Err(StorageError::TableExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn column<'r>(row: &'r Row, qualifier: &str) -> Option<&'r [u8]> {
    row.latest(RECORD_FAMILY, qualifier).map(|c| c.value.as_slice())
}

fn column_str(row: &Row, qualifier: &str) -> Option<String> {
    column(row, qualifier).map(|v| String::from_utf8_lossy(v).into_owned())
}

fn column_u64(row: &Row, qualifier: &str) -> Option<u64> {
    let raw: [u8; 8] = column(row, qualifier)?.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}
