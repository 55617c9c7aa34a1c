use super::page::SplitProcessor;
use super::source::{LiveSource, SnapshotSource};
use super::BuildPlan;
use crate::core::partition::{Split, SplitSource};
use crate::stats::SplitCounters;
use crate::storage::snapshot::SnapshotStore;
use crate::storage::{StorageClient, StorageError};
use std::sync::Arc;

/// 在 worker 内经客户端读写；快照 split 读取本地还原的 region 文件
pub struct DirectApiMapper {
    client: Arc<dyn StorageClient>,
    plan: Arc<BuildPlan>,
}

impl DirectApiMapper {
    pub fn new(client: Arc<dyn StorageClient>, plan: Arc<BuildPlan>) -> Self {
        Self { client, plan }
    }

    pub fn map_split(&self, split: &Split) -> Result<SplitCounters, StorageError> {
        let client = self.client.as_ref();
        let plan = self.plan.as_ref();
        let processor = SplitProcessor::new(client, plan, split);
        match &split.source {
            SplitSource::Live => {
                let mut source = LiveSource::new(
                    client,
                    &plan.data_table.physical_name,
                    split.range.clone(),
                    plan.time,
                    plan.client_retries,
                );
                processor.run(&mut source)
            }
            SplitSource::Snapshot(path) => {
                let region = SnapshotStore::new(path.clone())
                    .load_if_valid()
                    .map_err(|e| StorageError::Snapshot(format!("{:#}", e)))?
                    .ok_or_else(|| {
                        StorageError::Snapshot(format!("{} is missing or incomplete", path.display()))
                    })?;
                let mut source = SnapshotSource::new(region, split.range.clone(), plan.time);
                processor.run(&mut source)
            }
        }
    }
}
