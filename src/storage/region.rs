use super::{Cell, CellKind, Mutation, ReadMode, RegionInfo, Row, ScanRequest, TimeRange, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// 单个 region 的数据（内存存储与快照文件共用）
///
/// 每行保存原始 cell 列表（含删除标记），读取时按版本窗口与删除标记计算可见性。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionData {
    pub info: RegionInfo,
    pub rows: BTreeMap<Vec<u8>, Vec<Cell>>,
}

impl RegionData {
    pub fn new(info: RegionInfo) -> Self {
        Self {
            info,
            rows: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Put { row, cells } => {
                let slot = self.rows.entry(row.clone()).or_default();
                for cell in cells {
                    upsert_cell(slot, cell.clone());
                }
            }
            Mutation::DeleteRow { row, ts } => {
                let slot = self.rows.entry(row.clone()).or_default();
                upsert_cell(
                    slot,
                    Cell {
                        family: String::new(),
                        qualifier: String::new(),
                        value: Vec::new(),
                        ts: *ts,
                        kind: CellKind::DeleteFamily,
                    },
                );
            }
            Mutation::DeleteColumn {
                row,
                family,
                qualifier,
                ts,
            } => {
                let slot = self.rows.entry(row.clone()).or_default();
                upsert_cell(
                    slot,
                    Cell {
                        family: family.clone(),
                        qualifier: qualifier.clone(),
                        value: Vec::new(),
                        ts: *ts,
                        kind: CellKind::DeleteColumn,
                    },
                );
            }
        }
    }

    pub fn read_row(
        &self,
        key: &[u8],
        time: TimeRange,
        mode: ReadMode,
        hidden: &BTreeSet<Timestamp>,
    ) -> Option<Row> {
        let cells = self.rows.get(key)?;
        let visible = visible_cells(cells, time, mode, hidden);
        if visible.is_empty() {
            return None;
        }
        Some(Row::new(key.to_vec(), visible))
    }

    /// 区间扫描（受 request.range ∩ region 范围约束）
    pub fn scan(&self, request: &ScanRequest, hidden: &BTreeSet<Timestamp>) -> Vec<Row> {
        let Some(range) = self.info.range.intersect(&request.range) else {
            return Vec::new();
        };
        if let Some(after) = &request.after {
            if !range.stop.is_empty() && after.as_slice() >= range.stop.as_slice() {
                return Vec::new();
            }
        }
        let lower = match &request.after {
            Some(after) if after.as_slice() >= range.start.as_slice() => {
                Bound::Excluded(after.clone())
            }
            _ => Bound::Included(range.start.clone()),
        };
        let upper = if range.stop.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(range.stop.clone())
        };

        let mut out = Vec::new();
        for (key, cells) in self.rows.range((lower, upper)) {
            if out.len() >= request.limit {
                break;
            }
            let visible = visible_cells(cells, request.time, request.mode, hidden);
            if !visible.is_empty() {
                out.push(Row::new(key.clone(), visible));
            }
        }
        out
    }

    /// 按版本上界冻结一份副本（快照）；未提交事务的 cell 不进入快照
    pub fn frozen_at(&self, ts: Timestamp, hidden: &BTreeSet<Timestamp>) -> RegionData {
        let rows = self
            .rows
            .iter()
            .filter_map(|(k, cells)| {
                let kept: Vec<Cell> = cells
                    .iter()
                    .filter(|c| c.ts <= ts && !hidden.contains(&c.ts))
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (k.clone(), kept))
            })
            .collect();
        RegionData {
            info: self.info.clone(),
            rows,
        }
    }

    /// 拆出 [split_key, ..) 部分，自身保留前半
    pub fn split_off(&mut self, split_key: &[u8], right_info: RegionInfo) -> RegionData {
        let right_rows = self.rows.split_off(split_key);
        self.info.range.stop = split_key.to_vec();
        RegionData {
            info: right_info,
            rows: right_rows,
        }
    }
}

/// 同列、同 ts、同类型的 cell 覆盖旧值
fn upsert_cell(slot: &mut Vec<Cell>, cell: Cell) {
    if let Some(existing) = slot.iter_mut().find(|c| {
        c.ts == cell.ts && c.kind == cell.kind && c.family == cell.family && c.qualifier == cell.qualifier
    }) {
        existing.value = cell.value;
    } else {
        slot.push(cell);
    }
}

/// 计算可见 cell
///
/// - 版本 ts > time.max 或属于未提交事务的 cell 一律忽略
/// - 删除标记（DeleteFamily / DeleteColumn）屏蔽 ts <= 标记 ts 的 put
/// - put 还需满足 ts >= time.min
pub fn visible_cells(
    cells: &[Cell],
    time: TimeRange,
    mode: ReadMode,
    hidden: &BTreeSet<Timestamp>,
) -> Vec<Cell> {
    let candidates = cells
        .iter()
        .filter(|c| c.ts <= time.max && !hidden.contains(&c.ts));

    if mode == ReadMode::Raw {
        let mut raw: Vec<Cell> = candidates.filter(|c| c.ts >= time.min).cloned().collect();
        sort_cells(&mut raw);
        return raw;
    }

    let mut family_delete: Option<Timestamp> = None;
    let mut column_delete: HashMap<(&str, &str), Timestamp> = HashMap::new();
    let mut puts = Vec::new();
    for c in candidates {
        match c.kind {
            CellKind::DeleteFamily => {
                family_delete = Some(family_delete.map_or(c.ts, |t| t.max(c.ts)));
            }
            CellKind::DeleteColumn => {
                let e = column_delete
                    .entry((c.family.as_str(), c.qualifier.as_str()))
                    .or_insert(c.ts);
                *e = (*e).max(c.ts);
            }
            CellKind::Put => puts.push(c),
        }
    }

    let mut visible: Vec<Cell> = puts
        .into_iter()
        .filter(|c| c.ts >= time.min)
        .filter(|c| family_delete.map_or(true, |d| c.ts > d))
        .filter(|c| {
            column_delete
                .get(&(c.family.as_str(), c.qualifier.as_str()))
                .map_or(true, |d| c.ts > *d)
        })
        .cloned()
        .collect();
    sort_cells(&mut visible);

    if mode == ReadMode::Latest {
        visible.dedup_by(|b, a| a.family == b.family && a.qualifier == b.qualifier);
    }
    visible
}

fn sort_cells(cells: &mut [Cell]) {
    cells.sort_by(|a, b| {
        (a.family.as_str(), a.qualifier.as_str())
            .cmp(&(b.family.as_str(), b.qualifier.as_str()))
            .then(b.ts.cmp(&a.ts))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyRange;

    fn region() -> RegionData {
        RegionData::new(RegionInfo {
            table: "T".into(),
            name: "T,,1".into(),
            range: KeyRange::all(),
        })
    }

    fn put(row: &[u8], q: &str, v: &str, ts: Timestamp) -> Mutation {
        Mutation::Put {
            row: row.to_vec(),
            cells: vec![Cell::put("0", q, v.as_bytes().to_vec(), ts)],
        }
    }

    #[test]
    fn delete_column_masks_older_versions_only() {
        let mut r = region();
        r.apply(&put(b"k", "A", "a1", 10));
        r.apply(&put(b"k", "A", "a2", 20));
        r.apply(&Mutation::DeleteColumn {
            row: b"k".to_vec(),
            family: "0".into(),
            qualifier: "A".into(),
            ts: 15,
        });
        let none = BTreeSet::new();
        let row = r
            .read_row(b"k", TimeRange::all(), ReadMode::AllVersions, &none)
            .unwrap();
        assert_eq!(row.cells.len(), 1);
        assert_eq!(row.cells[0].value, b"a2".to_vec());

        // 读时间点早于 a2：a1 被删除标记屏蔽 → 整行不可见
        assert!(r
            .read_row(b"k", TimeRange::as_of(18), ReadMode::Latest, &none)
            .is_none());
    }

    #[test]
    fn delete_family_masks_same_timestamp() {
        let mut r = region();
        r.apply(&put(b"k", "A", "a", 10));
        r.apply(&Mutation::DeleteRow {
            row: b"k".to_vec(),
            ts: 10,
        });
        let none = BTreeSet::new();
        assert!(r
            .read_row(b"k", TimeRange::all(), ReadMode::Latest, &none)
            .is_none());
        let raw = r
            .read_row(b"k", TimeRange::all(), ReadMode::Raw, &none)
            .unwrap();
        assert_eq!(raw.cells.len(), 2);
    }

    #[test]
    fn hidden_transaction_cells_are_invisible() {
        let mut r = region();
        r.apply(&put(b"a", "A", "x", 10));
        r.apply(&put(b"b", "A", "y", 99));
        let hidden: BTreeSet<Timestamp> = [99].into_iter().collect();
        let rows = r.scan(&ScanRequest::new(KeyRange::all(), TimeRange::all()), &hidden);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, b"a".to_vec());
    }

    #[test]
    fn scan_pages_with_cursor_and_limit() {
        let mut r = region();
        for k in [b"a", b"b", b"c", b"d"] {
            r.apply(&put(k, "A", "v", 1));
        }
        let none = BTreeSet::new();
        let req = ScanRequest::new(KeyRange::all(), TimeRange::all()).limit(2);
        let first = r.scan(&req, &none);
        assert_eq!(first.len(), 2);
        let next = r.scan(&req.clone().after(Some(first[1].key.clone())), &none);
        assert_eq!(
            next.iter().map(|r| r.key.clone()).collect::<Vec<_>>(),
            vec![b"c".to_vec(), b"d".to_vec()]
        );
    }
}
