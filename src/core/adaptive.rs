use std::sync::atomic::{AtomicUsize, Ordering};
use sysinfo::System;

/// 自适应调度器：按系统负载决定 split worker 数
pub struct AdaptiveScheduler {
    target_parallelism: AtomicUsize,
    system: System,
}

impl Default for AdaptiveScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveScheduler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        Self {
            target_parallelism: AtomicUsize::new(num_cpus::get()),
            system: sys,
        }
    }

    /// 动态调整并行度
    pub fn adjust_parallelism(&mut self) -> usize {
        self.system.refresh_memory();

        let load = System::load_average().one;
        let cpu_count = num_cpus::get() as f64;
        let mem_free = self.system.available_memory();
        let total_mem = self.system.total_memory().max(1);
        let mem_pressure = 1.0 - (mem_free as f64 / total_mem as f64);

        let new_parallelism = if load < cpu_count * 0.3 && mem_pressure < 0.5 {
            // 系统空闲：split 多为 IO 等待，超配
            (cpu_count * 2.0) as usize
        } else if load > cpu_count * 0.8 || mem_pressure > 0.8 {
            // 系统繁忙：保守降级
            (cpu_count * 0.5) as usize
        } else {
            cpu_count as usize
        }
        .max(1);

        let old = self
            .target_parallelism
            .swap(new_parallelism, Ordering::Relaxed);

        if old != new_parallelism {
            tracing::info!(
                "Adaptive parallelism: {} -> {} (load: {:.2}, mem_pressure: {:.2})",
                old,
                new_parallelism,
                load,
                mem_pressure
            );
        }

        new_parallelism
    }

    /// 根据作业特性选择执行策略
    pub fn select_strategy(&self, task: &Task) -> ExecutionStrategy {
        let target = self.target_parallelism.load(Ordering::Relaxed).max(1);
        match task {
            Task::Rebuild { splits } | Task::VerifyOnly { splits } if *splits <= 1 => {
                ExecutionStrategy::Serial
            }
            // 只读校验不写索引表，可更激进
            Task::VerifyOnly { splits } => ExecutionStrategy::Parallel {
                workers: (*splits).min(target * 2),
            },
            Task::Rebuild { splits } => ExecutionStrategy::Parallel {
                workers: (*splits).min(target),
            },
        }
    }
}

pub enum Task {
    Rebuild { splits: usize },
    VerifyOnly { splits: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Serial,
    Parallel { workers: usize },
}

impl ExecutionStrategy {
    pub fn workers(&self) -> usize {
        match self {
            ExecutionStrategy::Serial => 1,
            ExecutionStrategy::Parallel { workers } => (*workers).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_never_exceeds_split_count() {
        let mut s = AdaptiveScheduler::new();
        let p = s.adjust_parallelism();
        assert!(p >= 1);
        assert_eq!(
            s.select_strategy(&Task::Rebuild { splits: 1 }),
            ExecutionStrategy::Serial
        );
        assert!(s.select_strategy(&Task::Rebuild { splits: 3 }).workers() <= 3);
        assert!(s.select_strategy(&Task::VerifyOnly { splits: 1000 }).workers() <= p * 2);
    }
}
