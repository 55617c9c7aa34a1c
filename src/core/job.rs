use crate::core::rdd::{SplitEvent, RDD};
use crate::stats::{Counter, JobCounters, SplitCounters};
use arc_swap::ArcSwap;
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Running { completed: usize, total: usize },
    Succeeded,
    Failed(String),
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobState::Running { .. })
    }
}

/// 已提交作业的句柄
pub struct JobHandle {
    id: String,
    counters: Arc<JobCounters>,
    state: Arc<ArcSwap<JobState>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    events: Receiver<SplitEvent>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> JobState {
        (**self.state.load()).clone()
    }

    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters.get(counter)
    }

    pub fn counter_by_name(&self, name: &str) -> Option<u64> {
        self.counters.get_by_name(name)
    }

    pub fn counters(&self) -> SplitCounters {
        self.counters.snapshot()
    }

    /// 取走目前为止的 split 事件
    pub fn drain_events(&self) -> Vec<SplitEvent> {
        self.events.try_iter().collect()
    }

    pub async fn wait_for_completion(&self) -> JobState {
        let task = self.task.lock().take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    self.state
                        .store(Arc::new(JobState::Failed(format!("job task aborted: {}", e))));
                }
            }
            // 另一个等待者已取走 task
            None => {
                while !self.state.load().is_finished() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
        self.state()
    }
}

/// 作业执行器：每个作业一个独立的 rayon 池，在阻塞线程上运行
pub struct JobRunner {
    parallelism: usize,
}

impl JobRunner {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// 提交作业；只有成功的 split 计数并入作业计数
    pub fn submit<R>(
        &self,
        id: impl Into<String>,
        rdd: R,
        counters: Arc<JobCounters>,
        events: Receiver<SplitEvent>,
    ) -> anyhow::Result<JobHandle>
    where
        R: RDD<SplitCounters> + 'static,
    {
        let id = id.into();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .thread_name(|i| format!("ix-rdd-split-{}", i))
            .build()?;
        let total = rdd.partitions().len();
        let state = Arc::new(ArcSwap::from_pointee(JobState::Running {
            completed: 0,
            total,
        }));

        tracing::info!(
            "Job {} submitted: {} split(s), {} worker(s)",
            id,
            total,
            self.parallelism
        );

        let task = tokio::task::spawn_blocking({
            let id = id.clone();
            let state = state.clone();
            let counters = counters.clone();
            move || {
                let started = Instant::now();
                let done = AtomicUsize::new(0);
                let results = pool.install(|| {
                    rdd.collect_with(|_| {
                        let completed = done.fetch_add(1, Ordering::Relaxed) + 1;
                        state.store(Arc::new(JobState::Running { completed, total }));
                    })
                });

                let mut failure = None;
                for r in results {
                    match r {
                        Ok(c) => counters.merge(&c),
                        Err(e) => {
                            tracing::error!("Job {}: {:#}", id, e);
                            failure.get_or_insert_with(|| format!("{:#}", e));
                        }
                    }
                }
                match failure {
                    None => {
                        tracing::info!(
                            "Job {} succeeded: {} split(s) in {:?}",
                            id,
                            total,
                            started.elapsed()
                        );
                        state.store(Arc::new(JobState::Succeeded));
                    }
                    Some(msg) => state.store(Arc::new(JobState::Failed(msg))),
                }
            }
        });

        Ok(JobHandle {
            id,
            counters,
            state,
            task: Mutex::new(Some(task)),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::partition::{Split, SplitSource};
    use crate::storage::{KeyRange, RegionInfo};

    /// 每个分区贡献 1 条输入；`fail_split` 指定的分区失败
    struct CountingRDD {
        splits: Vec<Split>,
        fail_split: Option<usize>,
    }

    impl CountingRDD {
        fn new(n: usize, fail_split: Option<usize>) -> Self {
            let splits = (0..n)
                .map(|id| Split {
                    id,
                    region: RegionInfo {
                        table: "T".into(),
                        name: format!("T,{},{}", id, id),
                        range: KeyRange::all(),
                    },
                    range: KeyRange::all(),
                    source: SplitSource::Live,
                })
                .collect();
            Self { splits, fail_split }
        }
    }

    impl RDD<SplitCounters> for CountingRDD {
        fn partitions(&self) -> &[Split] {
            &self.splits
        }

        fn compute(&self, split: &Split) -> anyhow::Result<SplitCounters> {
            if Some(split.id) == self.fail_split {
                anyhow::bail!("split {} exploded", split.id);
            }
            let mut c = SplitCounters::new();
            c.incr(Counter::InputRecords);
            Ok(c)
        }
    }

    #[tokio::test]
    async fn successful_job_merges_all_splits() {
        let (_tx, rx) = crossbeam::channel::unbounded();
        let handle = JobRunner::new(2)
            .submit("ok", CountingRDD::new(5, None), Arc::new(JobCounters::new()), rx)
            .unwrap();
        assert_eq!(handle.wait_for_completion().await, JobState::Succeeded);
        assert_eq!(handle.counter(Counter::InputRecords), 5);
        assert_eq!(handle.counter_by_name("INPUT_RECORDS"), Some(5));
        // 第二次等待直接返回最终状态
        assert_eq!(handle.wait_for_completion().await, JobState::Succeeded);
    }

    #[tokio::test]
    async fn failed_split_fails_job_but_keeps_other_counts() {
        let (_tx, rx) = crossbeam::channel::unbounded();
        let handle = JobRunner::new(3)
            .submit("bad", CountingRDD::new(4, Some(2)), Arc::new(JobCounters::new()), rx)
            .unwrap();
        let state = handle.wait_for_completion().await;
        assert!(matches!(state, JobState::Failed(msg) if msg.contains("exploded")));
        assert_eq!(handle.counters().get(Counter::InputRecords), 3);
    }
}
