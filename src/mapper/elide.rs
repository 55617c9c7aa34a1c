use crate::index::mutation::{IndexRowImage, INDEX_FAMILY};
use crate::storage::region::RegionData;
use crate::storage::{
    Cell, CellKind, KeyRange, Mutation, ReadMode, RegionInfo, Row, TimeRange, Timestamp,
};
use std::collections::{BTreeSet, HashSet};

/// 索引表当前状态的本地镜像，用于剔除已生效的变更
///
/// - 与现有 cell 完全相同（列、ts、类型、值）的 put 与删除标记视为已生效
/// - 保留下来的变更同步写入镜像，后续判定基于写入后的状态
/// - 变更序列应用后最新投影仍不可见（被更新的删除标记屏蔽、值被更新的坏 cell 覆盖）时，
///   补一条时间戳高于该行现有 cell 的修复写入
/// - 只看 `as_of` 及之前的 cell；修复与清理写入的时间戳不超过 `as_of`，不遮蔽并发写入
pub struct IndexMirror {
    region: RegionData,
    as_of: Timestamp,
}

fn marker(kind: CellKind, family: &str, qualifier: &str, ts: u64) -> Cell {
    Cell {
        family: family.to_string(),
        qualifier: qualifier.to_string(),
        value: Vec::new(),
        ts,
        kind,
    }
}

impl IndexMirror {
    /// `rows`：索引表上相关键的原始 cell（Raw 读取），晚于 `as_of` 的 cell 被忽略
    pub fn new(table: &str, as_of: Timestamp, rows: impl IntoIterator<Item = Row>) -> Self {
        let mut region = RegionData::new(RegionInfo {
            table: table.to_string(),
            name: format!("{},mirror", table),
            range: KeyRange::all(),
        });
        for row in rows {
            let cells: Vec<Cell> = row.cells.into_iter().filter(|c| c.ts <= as_of).collect();
            if !cells.is_empty() {
                region.rows.insert(row.key, cells);
            }
        }
        Self { region, as_of }
    }

    fn has_cell(&self, row: &[u8], cell: &Cell) -> bool {
        self.region.rows.get(row).map_or(false, |cells| {
            cells.iter().any(|c| {
                c.kind == cell.kind
                    && c.ts == cell.ts
                    && c.family == cell.family
                    && c.qualifier == cell.qualifier
                    && c.value == cell.value
            })
        })
    }

    fn visible(&self, row: &[u8]) -> Option<Row> {
        self.region
            .read_row(row, TimeRange::as_of(self.as_of), ReadMode::Latest, &BTreeSet::new())
    }

    fn max_ts(&self, row: &[u8]) -> Timestamp {
        self.region
            .rows
            .get(row)
            .and_then(|cells| cells.iter().map(|c| c.ts).max())
            .unwrap_or(0)
    }

    fn keep(&mut self, m: Mutation, out: &mut Vec<Mutation>) {
        self.region.apply(&m);
        out.push(m);
    }

    /// 一个数据行的生成变更 → 实际需要写入的变更
    ///
    /// `expected`：该数据行最新状态的投影（不入索引时为 None）
    pub fn effective(
        &mut self,
        generated: Vec<Mutation>,
        expected: Option<&IndexRowImage>,
    ) -> Vec<Mutation> {
        let mut out = Vec::new();
        let mut touched: Vec<Vec<u8>> = Vec::new();
        let mut seen: HashSet<Vec<u8>> = HashSet::new();

        for m in generated {
            if seen.insert(m.row().to_vec()) {
                touched.push(m.row().to_vec());
            }
            match m {
                Mutation::Put { row, cells } => {
                    let fresh: Vec<Cell> = cells
                        .into_iter()
                        .filter(|c| !self.has_cell(&row, c))
                        .collect();
                    if !fresh.is_empty() {
                        self.keep(Mutation::Put { row, cells: fresh }, &mut out);
                    }
                }
                Mutation::DeleteRow { row, ts } => {
                    if !self.has_cell(&row, &marker(CellKind::DeleteFamily, "", "", ts)) {
                        self.keep(Mutation::DeleteRow { row, ts }, &mut out);
                    }
                }
                Mutation::DeleteColumn {
                    row,
                    family,
                    qualifier,
                    ts,
                } => {
                    if !self.has_cell(&row, &marker(CellKind::DeleteColumn, &family, &qualifier, ts)) {
                        self.keep(
                            Mutation::DeleteColumn {
                                row,
                                family,
                                qualifier,
                                ts,
                            },
                            &mut out,
                        );
                    }
                }
            }
        }

        if let Some(image) = expected {
            self.repair_expected(image, &mut out);
        }
        for key in touched {
            if expected.map_or(false, |img| img.key == key) {
                continue;
            }
            // 旧键必须不可见
            if self.visible(&key).is_some() {
                let ts = self.max_ts(&key);
                self.keep(Mutation::DeleteRow { row: key, ts }, &mut out);
            }
        }
        out
    }

    fn repair_expected(&mut self, image: &IndexRowImage, out: &mut Vec<Mutation>) {
        let current = self.visible(&image.key);
        let ceiling = self.max_ts(&image.key);

        let stale: Vec<Cell> = image
            .cells
            .iter()
            .filter(|c| {
                current
                    .as_ref()
                    .and_then(|r| r.latest(&c.family, &c.qualifier))
                    .map_or(true, |v| v.value != c.value)
            })
            .map(|c| Cell {
                ts: c.ts.max(ceiling + 1),
                ..c.clone()
            })
            .collect();
        let (stale, blocked): (Vec<Cell>, Vec<Cell>) =
            stale.into_iter().partition(|c| c.ts <= self.as_of);
        if !blocked.is_empty() {
            tracing::debug!(
                "Index row {:?} has cells at the read timestamp {}, {} repair cell(s) skipped",
                image.key,
                self.as_of,
                blocked.len()
            );
        }

        let orphans: Vec<Mutation> = current
            .iter()
            .flat_map(|r| r.cells.iter())
            .filter(|c| c.family == INDEX_FAMILY && image.value(&c.qualifier).is_none())
            .map(|c| Mutation::DeleteColumn {
                row: image.key.clone(),
                family: c.family.clone(),
                qualifier: c.qualifier.clone(),
                ts: c.ts,
            })
            .collect();

        if !stale.is_empty() {
            self.keep(
                Mutation::Put {
                    row: image.key.clone(),
                    cells: stale,
                },
                out,
            );
        }
        for m in orphans {
            self.keep(m, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::mutation::{EMPTY_COLUMN, EMPTY_VALUE};

    fn image(key: &[u8], zip: &[u8], ts: u64) -> IndexRowImage {
        IndexRowImage {
            key: key.to_vec(),
            cells: vec![
                Cell::put(INDEX_FAMILY, "0:ZIP", zip.to_vec(), ts),
                Cell::put(INDEX_FAMILY, EMPTY_COLUMN, EMPTY_VALUE.to_vec(), ts),
            ],
        }
    }

    fn put_of(img: &IndexRowImage) -> Mutation {
        Mutation::Put {
            row: img.key.clone(),
            cells: img.cells.clone(),
        }
    }

    #[test]
    fn empty_index_keeps_everything() {
        let img = image(b"k1", b"1", 10);
        let mut mirror = IndexMirror::new("I", 1_000, Vec::new());
        let out = mirror.effective(vec![put_of(&img)], Some(&img));
        assert_eq!(out, vec![put_of(&img)]);
    }

    #[test]
    fn applied_mutations_are_elided() {
        let img = image(b"k1", b"1", 10);
        let existing = Row::new(img.key.clone(), img.cells.clone());
        let mut mirror = IndexMirror::new("I", 1_000, vec![existing]);
        assert!(mirror.effective(vec![put_of(&img)], Some(&img)).is_empty());
    }

    #[test]
    fn masked_put_is_repaired_above_marker() {
        let img = image(b"k1", b"1", 10);
        let mut cells = img.cells.clone();
        cells.push(marker(CellKind::DeleteFamily, "", "", 50));
        let mut mirror = IndexMirror::new("I", 1_000, vec![Row::new(img.key.clone(), cells)]);

        let out = mirror.effective(vec![put_of(&img)], Some(&img));
        assert_eq!(out.len(), 1);
        let Mutation::Put { cells, .. } = &out[0] else {
            panic!("expected repair put");
        };
        assert!(cells.iter().all(|c| c.ts == 51));

        // 再次执行无变更
        assert!(mirror.effective(vec![put_of(&img)], Some(&img)).is_empty());
    }

    #[test]
    fn cells_after_read_timestamp_are_not_masked() {
        let img = image(b"k1", b"1", 10);
        let mut cells = img.cells.clone();
        cells.push(Cell::put(INDEX_FAMILY, "0:ZIP", b"2".to_vec(), 2_000));
        let mut mirror = IndexMirror::new("I", 1_000, vec![Row::new(img.key.clone(), cells)]);
        assert!(mirror.effective(vec![put_of(&img)], Some(&img)).is_empty());
    }

    #[test]
    fn repair_never_goes_past_read_timestamp() {
        let img = image(b"k1", b"1", 10);
        let mut cells = img.cells.clone();
        cells.push(marker(CellKind::DeleteFamily, "", "", 1_000));
        let mut mirror = IndexMirror::new("I", 1_000, vec![Row::new(img.key.clone(), cells)]);
        assert!(mirror.effective(vec![put_of(&img)], Some(&img)).is_empty());
    }

    #[test]
    fn stale_old_key_and_orphan_cells_are_removed() {
        let old = image(b"k0", b"1", 10);
        let new = image(b"k1", b"1", 20);
        let mut orphan = new.cells.clone();
        orphan.push(Cell::put(INDEX_FAMILY, "0:OLD", b"x".to_vec(), 20));
        let mut mirror = IndexMirror::new(
            "I",
            1_000,
            vec![
                Row::new(old.key.clone(), old.cells.clone()),
                Row::new(new.key.clone(), orphan),
            ],
        );

        let generated = vec![
            put_of(&old),
            Mutation::DeleteRow {
                row: old.key.clone(),
                ts: 20,
            },
            put_of(&new),
        ];
        let out = mirror.effective(generated, Some(&new));
        assert!(out.contains(&Mutation::DeleteRow {
            row: b"k0".to_vec(),
            ts: 20
        }));
        assert!(out.iter().any(|m| matches!(
            m,
            Mutation::DeleteColumn { qualifier, .. } if qualifier == "0:OLD"
        )));
        assert_eq!(out.len(), 2);
    }
}
