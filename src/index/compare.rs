use crate::index::mutation::{IndexRowImage, MutationGenerator, ProjectedVersion, INDEX_FAMILY};
use crate::index::schema::SchemaError;
use crate::storage::{CellKind, Row, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Valid,
    Expired,
    Missing,
    InvalidExtraCells,
    InvalidMissingCells,
}

impl Outcome {
    /// 需要重建（并写 Output 记录）的结果
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Outcome::Missing | Outcome::InvalidExtraCells | Outcome::InvalidMissingCells
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    MissingRow,
    ExtraRow,
    ExtraCells,
    MissingCells,
}

impl ErrorType {
    pub fn name(self) -> &'static str {
        match self {
            ErrorType::MissingRow => "MISSING_ROW",
            ErrorType::ExtraRow => "EXTRA_ROW",
            ErrorType::ExtraCells => "EXTRA_CELLS",
            ErrorType::MissingCells => "MISSING_CELLS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "MISSING_ROW" => Some(ErrorType::MissingRow),
            "EXTRA_ROW" => Some(ErrorType::ExtraRow),
            "EXTRA_CELLS" => Some(ErrorType::ExtraCells),
            "MISSING_CELLS" => Some(ErrorType::MissingCells),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub error: Option<ErrorType>,
    pub index_key: Option<Vec<u8>>,
    /// 数据行最新版本时间戳
    pub data_ts: Timestamp,
    pub message: String,
}

impl Verdict {
    fn ok(outcome: Outcome, index_key: Option<Vec<u8>>, data_ts: Timestamp) -> Self {
        Self {
            outcome,
            error: None,
            index_key,
            data_ts,
            message: String::new(),
        }
    }

    fn failed(
        outcome: Outcome,
        error: ErrorType,
        index_key: Option<Vec<u8>>,
        data_ts: Timestamp,
        message: String,
    ) -> Self {
        Self {
            outcome,
            error: Some(error),
            index_key,
            data_ts,
            message,
        }
    }
}

/// 一次作业内固定的比对参数
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareContext {
    /// 读时间点
    pub as_of: Timestamp,
    /// 墙钟（TTL 判定）
    pub now: Timestamp,
    pub ttl_ms: Option<u64>,
    pub max_lookback_ms: u64,
}

/// 数据行 ↔ 实际索引行 比对器
pub struct RowComparator<'g, 'a> {
    generator: &'g MutationGenerator<'a>,
    ctx: CompareContext,
}

fn live_values(actual: &Row) -> BTreeMap<&str, &[u8]> {
    let mut out = BTreeMap::new();
    for c in actual
        .cells
        .iter()
        .filter(|c| c.kind == CellKind::Put && c.family == INDEX_FAMILY)
    {
        // cells 同列按 ts 降序，首个即最新
        out.entry(c.qualifier.as_str()).or_insert(c.value.as_slice());
    }
    out
}

fn image_matches(image: &IndexRowImage, key: &[u8], actual: &BTreeMap<&str, &[u8]>) -> bool {
    image.key == key
        && image.cells.len() == actual.len()
        && image
            .cells
            .iter()
            .all(|c| actual.get(c.qualifier.as_str()) == Some(&c.value.as_slice()))
}

impl<'g, 'a> RowComparator<'g, 'a> {
    pub fn new(generator: &'g MutationGenerator<'a>, ctx: CompareContext) -> Self {
        Self { generator, ctx }
    }

    /// 需要读取的索引行键：最新投影的键；最新状态不入索引时取最近一次入索引的键
    pub fn probe_key(&self, versions: &[ProjectedVersion]) -> Option<Vec<u8>> {
        versions
            .iter()
            .rev()
            .find_map(|v| v.image.as_ref().map(|i| i.key.clone()))
    }

    pub fn versions(&self, data: &Row) -> Result<Vec<ProjectedVersion>, SchemaError> {
        self.generator.versions(data)
    }

    /// 比对：`versions` 来自 [`RowComparator::versions`]，`actual` 为 probe 键上的实际索引行
    pub fn compare(&self, versions: &[ProjectedVersion], actual: Option<&Row>) -> Verdict {
        let Some(latest) = versions.last() else {
            return Verdict::ok(Outcome::Valid, None, 0);
        };
        let data_ts = latest.ts;

        if let Some(ttl) = self.ctx.ttl_ms {
            if data_ts < self.ctx.now.saturating_sub(ttl) {
                return Verdict::ok(Outcome::Expired, None, data_ts);
            }
        }

        let actual = actual.filter(|r| !r.is_empty());
        let Some(expected) = latest.image.as_ref() else {
            return match actual {
                Some(row) => Verdict::failed(
                    Outcome::InvalidExtraCells,
                    ErrorType::ExtraRow,
                    Some(row.key.clone()),
                    data_ts,
                    "Index row exists for a data row that is not indexed".to_string(),
                ),
                None => Verdict::ok(Outcome::Valid, None, data_ts),
            };
        };

        let Some(actual) = actual else {
            return Verdict::failed(
                Outcome::Missing,
                ErrorType::MissingRow,
                Some(expected.key.clone()),
                data_ts,
                "Missing index row".to_string(),
            );
        };

        let actual_values = live_values(actual);
        let window_start = self.ctx.as_of.saturating_sub(self.ctx.max_lookback_ms);
        let window: Vec<&IndexRowImage> = versions
            .iter()
            .enumerate()
            .filter(|(i, v)| *i + 1 == versions.len() || v.ts > window_start)
            .filter_map(|(_, v)| v.image.as_ref())
            .collect();

        if window
            .iter()
            .any(|img| image_matches(img, &actual.key, &actual_values))
        {
            return Verdict::ok(Outcome::Valid, Some(actual.key.clone()), data_ts);
        }

        let extra: Vec<&str> = actual_values
            .iter()
            .filter(|(q, v)| {
                !window
                    .iter()
                    .any(|img| img.key == actual.key && img.value(q) == Some(**v))
            })
            .map(|(q, _)| *q)
            .collect();
        if !extra.is_empty() {
            return Verdict::failed(
                Outcome::InvalidExtraCells,
                ErrorType::ExtraCells,
                Some(actual.key.clone()),
                data_ts,
                format!("Index row has cells not derivable from the data row: {:?}", extra),
            );
        }

        let missing: Vec<&str> = expected
            .cells
            .iter()
            .map(|c| c.qualifier.as_str())
            .filter(|q| !actual_values.contains_key(q))
            .collect();
        if !missing.is_empty() {
            return Verdict::failed(
                Outcome::InvalidMissingCells,
                ErrorType::MissingCells,
                Some(actual.key.clone()),
                data_ts,
                format!("Index row is missing cells: {:?}", missing),
            );
        }

        // 每个 cell 单独可推导但来自不同版本：逻辑上已过期
        Verdict::failed(
            Outcome::InvalidExtraCells,
            ErrorType::ExtraCells,
            Some(actual.key.clone()),
            data_ts,
            "Index row mixes cells from different data versions".to_string(),
        )
    }
}
