use super::page::SplitProcessor;
use super::source::LiveSource;
use super::BuildPlan;
use crate::core::partition::Split;
use crate::stats::SplitCounters;
use crate::storage::{with_retries, StorageClient, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 下发到存储端点的构建请求
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerBuildRequest {
    pub plan: BuildPlan,
    pub split: Split,
}

/// 存储端点侧入口：在 region 本地扫描并处理整个 split
pub fn execute_on_region(
    client: &dyn StorageClient,
    request: &ServerBuildRequest,
) -> Result<SplitCounters, StorageError> {
    let plan = &request.plan;
    let mut source = LiveSource::new(
        client,
        &plan.data_table.physical_name,
        request.split.range.clone(),
        plan.time,
        plan.client_retries,
    );
    SplitProcessor::new(client, plan, &request.split).run(&mut source)
}

pub struct ServerPushedMapper {
    client: Arc<dyn StorageClient>,
    plan: Arc<BuildPlan>,
}

impl ServerPushedMapper {
    pub fn new(client: Arc<dyn StorageClient>, plan: Arc<BuildPlan>) -> Self {
        Self { client, plan }
    }

    fn push(&self, split: &Split) -> Result<SplitCounters, StorageError> {
        let request = ServerBuildRequest {
            plan: (*self.plan).clone(),
            split: split.clone(),
        };
        with_retries(self.plan.client_retries, "server build", || {
            self.client.server_build(&request)
        })
    }

    pub fn map_split(&self, split: &Split) -> Result<SplitCounters, StorageError> {
        match self.push(split) {
            Err(StorageError::RegionNotFound(name)) => {
                tracing::warn!(
                    "Region {} moved, re-resolving split {} against current regions",
                    name,
                    split.id
                );
                self.map_relocated(split)
            }
            other => other,
        }
    }

    /// region 已拆分/迁移：按当前 region 重新切分后逐段下发
    fn map_relocated(&self, split: &Split) -> Result<SplitCounters, StorageError> {
        let regions = self.client.admin().regions(&split.region.table)?;
        let mut counters = SplitCounters::new();
        for region in regions {
            let Some(range) = region.range.intersect(&split.range) else {
                continue;
            };
            let part = Split {
                id: split.id,
                region,
                range,
                source: split.source.clone(),
            };
            counters.merge(&self.push(&part)?);
        }
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::page::tests::{index_person, live_splits, people_store, person_key, plan, write_person};
    use crate::mapper::VerifyType;
    use crate::stats::Counter;

    #[test]
    fn server_pushed_build_runs_on_region() {
        let store = Arc::new(people_store());
        write_person(&store, 1, "alice", 1, 10);
        write_person(&store, 2, "bob", 2, 10);
        index_person(&store, 1);

        let mapper = ServerPushedMapper::new(store.clone(), Arc::new(plan(VerifyType::Both)));
        let split = live_splits(&store).remove(0);
        let c = mapper.map_split(&split).unwrap();
        assert_eq!(c.get(Counter::BeforeRebuildValid), 1);
        assert_eq!(c.get(Counter::BeforeRebuildMissing), 1);
        assert_eq!(c.get(Counter::AfterRebuildValid), 2);
        assert_eq!(store.server_builds(), 1);
    }

    #[test]
    fn transient_endpoint_failures_are_retried() {
        let store = Arc::new(people_store());
        write_person(&store, 1, "alice", 1, 10);
        store.fail_next_server_builds(1);

        let mapper = ServerPushedMapper::new(store.clone(), Arc::new(plan(VerifyType::None)));
        let split = live_splits(&store).remove(0);
        let c = mapper.map_split(&split).unwrap();
        assert_eq!(c.get(Counter::RebuiltIndexRowCount), 1);
    }

    #[test]
    fn split_region_is_re_resolved() {
        let store = Arc::new(people_store());
        for id in 1..=4 {
            write_person(&store, id, "p", id, 10);
        }
        let split = live_splits(&store).remove(0);
        store.split_region("PEOPLE", &person_key(3)).unwrap();

        let mapper = ServerPushedMapper::new(store.clone(), Arc::new(plan(VerifyType::None)));
        let c = mapper.map_split(&split).unwrap();
        assert_eq!(c.get(Counter::InputRecords), 4);
        assert_eq!(store.server_builds(), 2);
    }
}
