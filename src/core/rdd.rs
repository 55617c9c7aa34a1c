use crate::core::partition::Split;
use crate::mapper::Mapper;
use crate::stats::SplitCounters;
use crossbeam::channel::Sender;

/// RDD 特质：分区 + 按分区计算
pub trait RDD<T: Send + Sync + 'static>: Send + Sync {
    /// 获取分区列表
    fn partitions(&self) -> &[Split];

    /// 计算指定分区
    fn compute(&self, split: &Split) -> anyhow::Result<T>;

    /// 并行计算全部分区；单个分区失败不影响其他分区，`on_done` 在每个分区结束时回调
    fn collect_with<F>(&self, on_done: F) -> Vec<anyhow::Result<T>>
    where
        F: Fn(&Split) + Send + Sync,
        Self: Sized,
    {
        use rayon::prelude::*;
        self.partitions()
            .par_iter()
            .map(|p| {
                let r = self.compute(p);
                on_done(p);
                r
            })
            .collect()
    }
}

/// split 级进度事件
#[derive(Clone, Debug)]
pub enum SplitEvent {
    Completed {
        split: usize,
        counters: SplitCounters,
    },
    Failed {
        split: usize,
        attempt: usize,
        error: String,
    },
}

/// 每个 split 交给 Mapper 处理，失败按 split 重试
pub struct MapperRDD {
    splits: Vec<Split>,
    mapper: Mapper,
    max_attempts: usize,
    events: Option<Sender<SplitEvent>>,
}

impl MapperRDD {
    pub fn new(splits: Vec<Split>, mapper: Mapper, max_attempts: usize) -> Self {
        Self {
            splits,
            mapper,
            max_attempts: max_attempts.max(1),
            events: None,
        }
    }

    pub fn with_events(mut self, tx: Sender<SplitEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: SplitEvent) {
        if let Some(tx) = &self.events {
            // 无人接收时丢弃
            let _ = tx.try_send(event);
        }
    }
}

impl RDD<SplitCounters> for MapperRDD {
    fn partitions(&self) -> &[Split] {
        &self.splits
    }

    /// 每次尝试从零计数；只有成功的尝试返回计数，重试不会重复累计
    fn compute(&self, split: &Split) -> anyhow::Result<SplitCounters> {
        let mut attempt = 1;
        loop {
            match self.mapper.map_split(split) {
                Ok(counters) => {
                    self.emit(SplitEvent::Completed {
                        split: split.id,
                        counters,
                    });
                    return Ok(counters);
                }
                Err(e) => {
                    self.emit(SplitEvent::Failed {
                        split: split.id,
                        attempt,
                        error: e.to_string(),
                    });
                    if attempt >= self.max_attempts {
                        return Err(anyhow::Error::new(e).context(format!(
                            "split {} ({}) failed after {} attempt(s)",
                            split.id, split.region.name, attempt
                        )));
                    }
                    tracing::warn!(
                        "Split {} attempt {}/{} failed: {}",
                        split.id,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    attempt += 1;
                }
            }
        }
    }
}
