use crate::index::compare::Outcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 校验阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Before => "BEFORE",
            Phase::After => "AFTER",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BEFORE" => Some(Phase::Before),
            "AFTER" => Some(Phase::After),
            _ => None,
        }
    }
}

/// 作业计数器
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Counter {
    InputRecords,
    FailedRecords,
    ScannedDataRowCount,
    RebuiltIndexRowCount,
    BeforeRebuildValid,
    BeforeRebuildExpired,
    BeforeRebuildMissing,
    BeforeRebuildInvalid,
    BeforeRebuildInvalidExtraCells,
    BeforeRebuildInvalidMissingCells,
    AfterRebuildValid,
    AfterRebuildExpired,
    AfterRebuildMissing,
    AfterRebuildInvalid,
    AfterRebuildInvalidExtraCells,
    AfterRebuildInvalidMissingCells,
}

pub const COUNTER_SLOTS: usize = 16;

impl Counter {
    pub const ALL: [Counter; COUNTER_SLOTS] = [
        Counter::InputRecords,
        Counter::FailedRecords,
        Counter::ScannedDataRowCount,
        Counter::RebuiltIndexRowCount,
        Counter::BeforeRebuildValid,
        Counter::BeforeRebuildExpired,
        Counter::BeforeRebuildMissing,
        Counter::BeforeRebuildInvalid,
        Counter::BeforeRebuildInvalidExtraCells,
        Counter::BeforeRebuildInvalidMissingCells,
        Counter::AfterRebuildValid,
        Counter::AfterRebuildExpired,
        Counter::AfterRebuildMissing,
        Counter::AfterRebuildInvalid,
        Counter::AfterRebuildInvalidExtraCells,
        Counter::AfterRebuildInvalidMissingCells,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::InputRecords => "INPUT_RECORDS",
            Counter::FailedRecords => "FAILED_RECORDS",
            Counter::ScannedDataRowCount => "SCANNED_DATA_ROW_COUNT",
            Counter::RebuiltIndexRowCount => "REBUILT_INDEX_ROW_COUNT",
            Counter::BeforeRebuildValid => "BEFORE_REBUILD_VALID_INDEX_ROW_COUNT",
            Counter::BeforeRebuildExpired => "BEFORE_REBUILD_EXPIRED_INDEX_ROW_COUNT",
            Counter::BeforeRebuildMissing => "BEFORE_REBUILD_MISSING_INDEX_ROW_COUNT",
            Counter::BeforeRebuildInvalid => "BEFORE_REBUILD_INVALID_INDEX_ROW_COUNT",
            Counter::BeforeRebuildInvalidExtraCells => {
                "BEFORE_REBUILD_INVALID_INDEX_ROW_COUNT_COZ_EXTRA_CELLS"
            }
            Counter::BeforeRebuildInvalidMissingCells => {
                "BEFORE_REBUILD_INVALID_INDEX_ROW_COUNT_COZ_MISSING_CELLS"
            }
            Counter::AfterRebuildValid => "AFTER_REBUILD_VALID_INDEX_ROW_COUNT",
            Counter::AfterRebuildExpired => "AFTER_REBUILD_EXPIRED_INDEX_ROW_COUNT",
            Counter::AfterRebuildMissing => "AFTER_REBUILD_MISSING_INDEX_ROW_COUNT",
            Counter::AfterRebuildInvalid => "AFTER_REBUILD_INVALID_INDEX_ROW_COUNT",
            Counter::AfterRebuildInvalidExtraCells => {
                "AFTER_REBUILD_INVALID_INDEX_ROW_COUNT_COZ_EXTRA_CELLS"
            }
            Counter::AfterRebuildInvalidMissingCells => {
                "AFTER_REBUILD_INVALID_INDEX_ROW_COUNT_COZ_MISSING_CELLS"
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    fn slot(self) -> usize {
        self as usize
    }

    /// 校验结果对应的计数器（不含 invalid 总数，见 [`SplitCounters::record_outcome`]）
    pub fn for_outcome(phase: Phase, outcome: Outcome) -> Counter {
        match (phase, outcome) {
            (Phase::Before, Outcome::Valid) => Counter::BeforeRebuildValid,
            (Phase::Before, Outcome::Expired) => Counter::BeforeRebuildExpired,
            (Phase::Before, Outcome::Missing) => Counter::BeforeRebuildMissing,
            (Phase::Before, Outcome::InvalidExtraCells) => Counter::BeforeRebuildInvalidExtraCells,
            (Phase::Before, Outcome::InvalidMissingCells) => Counter::BeforeRebuildInvalidMissingCells,
            (Phase::After, Outcome::Valid) => Counter::AfterRebuildValid,
            (Phase::After, Outcome::Expired) => Counter::AfterRebuildExpired,
            (Phase::After, Outcome::Missing) => Counter::AfterRebuildMissing,
            (Phase::After, Outcome::InvalidExtraCells) => Counter::AfterRebuildInvalidExtraCells,
            (Phase::After, Outcome::InvalidMissingCells) => Counter::AfterRebuildInvalidMissingCells,
        }
    }

    fn invalid_total(phase: Phase) -> Counter {
        match phase {
            Phase::Before => Counter::BeforeRebuildInvalid,
            Phase::After => Counter::AfterRebuildInvalid,
        }
    }
}

/// 单个 split 的局部计数（成功后才并入作业计数）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCounters {
    values: [u64; COUNTER_SLOTS],
}

impl SplitCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, counter: Counter, n: u64) {
        self.values[counter.slot()] += n;
    }

    pub fn incr(&mut self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.slot()]
    }

    pub fn record_outcome(&mut self, phase: Phase, outcome: Outcome) {
        self.incr(Counter::for_outcome(phase, outcome));
        if matches!(
            outcome,
            Outcome::InvalidExtraCells | Outcome::InvalidMissingCells
        ) {
            self.incr(Counter::invalid_total(phase));
        }
    }

    pub fn merge(&mut self, other: &SplitCounters) {
        for (a, b) in self.values.iter_mut().zip(other.values.iter()) {
            *a += *b;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Counter, u64)> + '_ {
        Counter::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}

/// 作业级计数（运行期作用域，多 worker 并发合并）
#[derive(Debug)]
pub struct JobCounters {
    slots: [AtomicU64; COUNTER_SLOTS],
}

impl Default for JobCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl JobCounters {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn merge(&self, split: &SplitCounters) {
        for (c, v) in split.iter() {
            if v > 0 {
                self.slots[c.slot()].fetch_add(v, Ordering::Relaxed);
            }
        }
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slots[counter.slot()].load(Ordering::Relaxed)
    }

    pub fn get_by_name(&self, name: &str) -> Option<u64> {
        Counter::from_name(name).map(|c| self.get(c))
    }

    pub fn snapshot(&self) -> SplitCounters {
        let mut out = SplitCounters::new();
        for c in Counter::ALL {
            out.add(c, self.get(c));
        }
        out
    }
}

/// 作业结束时的计数报告
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterReport {
    pub data_table: String,
    pub index_table: String,
    pub run_ts: u64,
    pub mapper: String,
    pub verify: String,
    pub status: i32,
    pub counters: SplitCounters,
}

impl CounterReport {
    pub fn to_json(&self) -> serde_json::Value {
        let counters: serde_json::Map<String, serde_json::Value> = self
            .counters
            .iter()
            .map(|(c, v)| (c.name().to_string(), serde_json::Value::from(v)))
            .collect();
        serde_json::json!({
            "data_table": self.data_table,
            "index_table": self.index_table,
            "run_ts": self.run_ts,
            "mapper": self.mapper,
            "verify": self.verify,
            "status": self.status,
            "counters": counters,
        })
    }
}

impl fmt::Display for CounterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔════════════════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║ ix-rdd Index Tool Report                                           ║")?;
        writeln!(f, "╠════════════════════════════════════════════════════════════════════╣")?;
        writeln!(f, "║ data table:  {:<53} ║", self.data_table)?;
        writeln!(f, "║ index table: {:<53} ║", self.index_table)?;
        writeln!(
            f,
            "║ run ts: {:<20} mapper: {:<12} verify: {:<8} ║",
            self.run_ts, self.mapper, self.verify
        )?;
        writeln!(f, "║ status: {:<58} ║", self.status)?;
        writeln!(f, "╠────────────────────────────────────────────────────────────────────╣")?;
        for (c, v) in self.counters.iter() {
            writeln!(f, "║ {:<56} {:>9} ║", c.name(), v)?;
        }
        writeln!(f, "╚════════════════════════════════════════════════════════════════════╝")?;
        Ok(())
    }
}
