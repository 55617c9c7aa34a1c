use crate::index::keys::{decode_row_key, IndexKeyCodec};
use crate::index::schema::{NullPolicy, ResolvedIndex, ResolvedTable, SchemaError, Value};
use crate::storage::{Cell, CellKind, Mutation, Row, Timestamp};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 索引表列族
pub const INDEX_FAMILY: &str = "0";
/// 空标记列：保证只有键、没有覆盖列的索引行也存在
pub const EMPTY_COLUMN: &str = "_0";
pub const EMPTY_VALUE: &[u8] = b"x";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnVersion {
    pub value: Value,
    pub raw: Vec<u8>,
    pub ts: Timestamp,
}

/// 数据行在某一时间点的可见状态
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowState {
    pub ts: Timestamp,
    pub values: BTreeMap<String, ColumnVersion>,
}

/// 投影得到的索引行（cell 按 qualifier 升序）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRowImage {
    pub key: Vec<u8>,
    pub cells: Vec<Cell>,
}

impl IndexRowImage {
    pub fn value(&self, qualifier: &str) -> Option<&[u8]> {
        self.cells
            .iter()
            .find(|c| c.qualifier == qualifier)
            .map(|c| c.value.as_slice())
    }
}

/// 一个数据版本及其投影（行在该时刻不存在或不入索引时 image 为 None）
#[derive(Clone, Debug)]
pub struct ProjectedVersion {
    pub ts: Timestamp,
    pub image: Option<IndexRowImage>,
}

/// 由数据行（原始 cell，含删除标记）推导索引变更
pub struct MutationGenerator<'a> {
    table: &'a ResolvedTable,
    index: &'a ResolvedIndex,
    codec: IndexKeyCodec,
    region_start: Vec<u8>,
}

impl<'a> MutationGenerator<'a> {
    /// `region_start`：数据行所在 region 的 start key（本地索引前缀）
    pub fn new(table: &'a ResolvedTable, index: &'a ResolvedIndex, region_start: &[u8]) -> Self {
        Self {
            table,
            index,
            codec: IndexKeyCodec::new(table, index),
            region_start: region_start.to_vec(),
        }
    }

    pub fn table(&self) -> &ResolvedTable {
        self.table
    }

    pub fn index(&self) -> &ResolvedIndex {
        self.index
    }

    /// 时间点 t 的可见状态；整行不可见时返回 None
    fn state_at(&self, cells: &[Cell], t: Timestamp) -> Result<Option<RowState>, SchemaError> {
        let family_delete = cells
            .iter()
            .filter(|c| c.kind == CellKind::DeleteFamily && c.ts <= t)
            .map(|c| c.ts)
            .max();
        let mut column_delete: HashMap<(&str, &str), Timestamp> = HashMap::new();
        for c in cells.iter().filter(|c| c.kind == CellKind::DeleteColumn && c.ts <= t) {
            let e = column_delete
                .entry((c.family.as_str(), c.qualifier.as_str()))
                .or_insert(c.ts);
            *e = (*e).max(c.ts);
        }

        let visible: Vec<&Cell> = cells
            .iter()
            .filter(|c| c.kind == CellKind::Put && c.ts <= t)
            .filter(|c| family_delete.map_or(true, |d| c.ts > d))
            .filter(|c| {
                column_delete
                    .get(&(c.family.as_str(), c.qualifier.as_str()))
                    .map_or(true, |d| c.ts > *d)
            })
            .collect();
        if visible.is_empty() {
            return Ok(None);
        }

        let mut values = BTreeMap::new();
        for col in self.table.value_columns() {
            let latest = visible
                .iter()
                .filter(|c| c.same_column(&col.family, &col.name))
                .max_by_key(|c| c.ts);
            if let Some(c) = latest {
                values.insert(
                    col.name.clone(),
                    ColumnVersion {
                        value: Value::from_cell_bytes(col.ty, &col.name, &c.value)?,
                        raw: c.value.clone(),
                        ts: c.ts,
                    },
                );
            }
        }
        Ok(Some(RowState { ts: t, values }))
    }

    /// 按时间升序重建行的所有状态
    pub fn states(&self, row: &Row) -> Result<Vec<(Timestamp, Option<RowState>)>, SchemaError> {
        let stamps: BTreeSet<Timestamp> = row.cells.iter().map(|c| c.ts).collect();
        stamps
            .into_iter()
            .map(|t| Ok((t, self.state_at(&row.cells, t)?)))
            .collect()
    }

    /// 将一个状态投影为索引行；被空值策略排除时返回 None
    pub fn project(&self, row_key: &[u8], pk: &[Value], state: &RowState) -> Result<Option<IndexRowImage>, SchemaError> {
        let mut ctx: BTreeMap<String, Value> = BTreeMap::new();
        for (name, v) in self.table.primary_key.iter().zip(pk) {
            ctx.insert(name.clone(), v.clone());
        }
        for col in self.table.value_columns() {
            let v = state
                .values
                .get(&col.name)
                .map(|cv| cv.value.clone())
                .unwrap_or(Value::Null);
            ctx.insert(col.name.clone(), v);
        }

        let tuple = self
            .index
            .def
            .key
            .iter()
            .map(|e| e.eval(&ctx))
            .collect::<Result<Vec<_>, _>>()?;

        let excluded = match self.index.def.null_policy {
            NullPolicy::IndexNulls => false,
            NullPolicy::SkipAllNull => tuple.iter().all(Value::is_null),
            NullPolicy::SkipAnyNull => tuple.iter().any(Value::is_null),
        };
        if excluded {
            return Ok(None);
        }

        let key = self.codec.encode(&tuple, row_key, &self.region_start)?;
        let mut cells = Vec::with_capacity(self.index.def.covered.len() + 1);
        for name in &self.index.def.covered {
            let Some(col) = self.table.column(name) else {
                return Err(SchemaError::ColumnNotFound {
                    table: self.table.full_name.clone(),
                    column: name.clone(),
                });
            };
            if let Some(cv) = state.values.get(name) {
                if !cv.value.is_null() {
                    cells.push(Cell::put(INDEX_FAMILY, col.index_qualifier(), cv.raw.clone(), cv.ts));
                }
            }
        }
        cells.push(Cell::put(INDEX_FAMILY, EMPTY_COLUMN, EMPTY_VALUE.to_vec(), state.ts));
        cells.sort_by(|a, b| a.qualifier.cmp(&b.qualifier));
        Ok(Some(IndexRowImage { key, cells }))
    }

    /// 行的每个版本及其投影（时间升序）
    pub fn versions(&self, row: &Row) -> Result<Vec<ProjectedVersion>, SchemaError> {
        let pk = decode_row_key(self.table, &row.key)?;
        self.states(row)?
            .into_iter()
            .map(|(ts, state)| {
                let image = match state {
                    Some(s) => self.project(&row.key, &pk, &s)?,
                    None => None,
                };
                Ok(ProjectedVersion { ts, image })
            })
            .collect()
    }

    /// 生成把索引表带到与数据行版本链一致的全部变更
    pub fn generate(&self, row: &Row) -> Result<Vec<Mutation>, SchemaError> {
        let mut out = Vec::new();
        let mut prev: Option<IndexRowImage> = None;
        // 同一版本链内被删除过的索引键 → 删除时间
        let mut deleted_at: HashMap<Vec<u8>, Timestamp> = HashMap::new();

        for version in self.versions(row)? {
            let ts = version.ts;
            let Some(mut image) = version.image else {
                if let Some(p) = prev.take() {
                    out.push(Mutation::DeleteRow { row: p.key.clone(), ts });
                    deleted_at.insert(p.key, ts);
                }
                continue;
            };

            let same_key = prev.as_ref().map_or(false, |p| p.key == image.key);
            if !same_key {
                if let Some(p) = prev.take() {
                    out.push(Mutation::DeleteRow { row: p.key.clone(), ts });
                    deleted_at.insert(p.key, ts);
                }
            }

            // 重新出现的键：旧 cell 时间戳不高于删除标记，提升到当前状态时间
            if let Some(d) = deleted_at.get(&image.key) {
                for c in image.cells.iter_mut() {
                    if c.ts <= *d {
                        c.ts = ts;
                    }
                }
            }

            let changed: Vec<Cell> = match prev.as_ref().filter(|_| same_key) {
                Some(p) => {
                    for old in &p.cells {
                        if image.value(&old.qualifier).is_none() {
                            out.push(Mutation::DeleteColumn {
                                row: image.key.clone(),
                                family: INDEX_FAMILY.to_string(),
                                qualifier: old.qualifier.clone(),
                                ts,
                            });
                        }
                    }
                    image
                        .cells
                        .iter()
                        .filter(|c| !p.cells.contains(c))
                        .cloned()
                        .collect()
                }
                None => image.cells.clone(),
            };
            if !changed.is_empty() {
                out.push(Mutation::Put {
                    row: image.key.clone(),
                    cells: changed,
                });
            }
            prev = Some(image);
        }
        Ok(out)
    }

    /// 最新版本的投影
    pub fn latest(&self, row: &Row) -> Result<Option<IndexRowImage>, SchemaError> {
        Ok(self.versions(row)?.pop().and_then(|v| v.image))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::index::keys::encode_row_key;
    use crate::index::schema::{Catalog, ColumnDef, ColumnType, IndexDef, IndexExpr, TableDef};
    use crate::storage::region::RegionData;
    use crate::storage::{KeyRange, ReadMode, RegionInfo, TimeRange};

    pub(crate) fn people_catalog(policy: NullPolicy) -> Catalog {
        let mut cat = Catalog::new();
        cat.add_table(TableDef::new(
            "",
            "PEOPLE",
            vec![
                ColumnDef::new("ID", ColumnType::Integer),
                ColumnDef::new("NAME", ColumnType::Varchar),
                ColumnDef::new("ZIP", ColumnType::Integer),
            ],
            &["ID"],
        ));
        let mut idx = IndexDef::new("", "BY_NAME", "PEOPLE", vec![IndexExpr::column("NAME")], &["ZIP"]);
        idx.null_policy = policy;
        cat.add_index(idx);
        cat
    }

    struct Fixture {
        table: ResolvedTable,
        index: ResolvedIndex,
        region: RegionData,
    }

    impl Fixture {
        fn new(policy: NullPolicy) -> Self {
            let cat = people_catalog(policy);
            Self {
                table: cat.resolve_table("PEOPLE", None).unwrap(),
                index: cat.resolve_index("BY_NAME", None).unwrap(),
                region: RegionData::new(RegionInfo {
                    table: "PEOPLE".into(),
                    name: "PEOPLE,,1".into(),
                    range: KeyRange::all(),
                }),
            }
        }

        fn key(&self, id: i64) -> Vec<u8> {
            encode_row_key(&self.table, &[Value::Int(id)]).unwrap()
        }

        fn put(&mut self, id: i64, col: &str, v: Value, ts: Timestamp) {
            let key = self.key(id);
            self.region.apply(&Mutation::Put {
                row: key,
                cells: vec![
                    Cell::put("0", col, v.to_cell_bytes(), ts),
                    Cell::put("0", "_0", b"x".to_vec(), ts),
                ],
            });
        }

        fn raw_row(&self, id: i64) -> Row {
            self.region
                .read_row(&self.key(id), TimeRange::all(), ReadMode::Raw, &BTreeSet::new())
                .unwrap()
        }

        fn generator(&self) -> MutationGenerator<'_> {
            MutationGenerator::new(&self.table, &self.index, b"")
        }
    }

    #[test]
    fn single_version_produces_one_put() {
        let mut f = Fixture::new(NullPolicy::IndexNulls);
        f.put(1, "NAME", Value::from("alice"), 10);
        f.put(1, "ZIP", Value::Int(94105), 10);

        let muts = f.generator().generate(&f.raw_row(1)).unwrap();
        assert_eq!(muts.len(), 1);
        let Mutation::Put { cells, .. } = &muts[0] else {
            panic!("expected put");
        };
        let quals: Vec<&str> = cells.iter().map(|c| c.qualifier.as_str()).collect();
        assert_eq!(quals, vec!["0:ZIP", "_0"]);
        assert!(cells.iter().all(|c| c.ts == 10));
    }

    #[test]
    fn key_change_deletes_old_index_row() {
        let mut f = Fixture::new(NullPolicy::IndexNulls);
        f.put(1, "NAME", Value::from("alice"), 10);
        f.put(1, "NAME", Value::from("alicia"), 20);

        let g = f.generator();
        let muts = g.generate(&f.raw_row(1)).unwrap();
        let versions = g.versions(&f.raw_row(1)).unwrap();
        let first_key = versions[0].image.as_ref().unwrap().key.clone();
        assert!(muts.contains(&Mutation::DeleteRow { row: first_key, ts: 20 }));
        assert!(matches!(muts.last(), Some(Mutation::Put { .. })));
    }

    #[test]
    fn covered_column_to_null_emits_delete_column() {
        let mut f = Fixture::new(NullPolicy::IndexNulls);
        f.put(1, "NAME", Value::from("alice"), 10);
        f.put(1, "ZIP", Value::Int(1), 10);
        let key = f.key(1);
        f.region.apply(&Mutation::DeleteColumn {
            row: key,
            family: "0".into(),
            qualifier: "ZIP".into(),
            ts: 30,
        });

        let muts = f.generator().generate(&f.raw_row(1)).unwrap();
        assert!(muts.iter().any(|m| matches!(
            m,
            Mutation::DeleteColumn { qualifier, ts: 30, .. } if qualifier == "0:ZIP"
        )));
    }

    #[test]
    fn skip_any_null_excludes_and_deletes() {
        let mut f = Fixture::new(NullPolicy::SkipAnyNull);
        f.put(1, "ZIP", Value::Int(1), 10);
        assert!(f.generator().generate(&f.raw_row(1)).unwrap().is_empty());

        f.put(1, "NAME", Value::from("bob"), 20);
        let key = f.key(1);
        f.region.apply(&Mutation::DeleteColumn {
            row: key,
            family: "0".into(),
            qualifier: "NAME".into(),
            ts: 30,
        });
        let muts = f.generator().generate(&f.raw_row(1)).unwrap();
        assert_eq!(muts.len(), 2);
        assert!(matches!(muts[1], Mutation::DeleteRow { ts: 30, .. }));
    }

    #[test]
    fn deleted_data_row_removes_index_row() {
        let mut f = Fixture::new(NullPolicy::IndexNulls);
        f.put(1, "NAME", Value::from("alice"), 10);
        let key = f.key(1);
        f.region.apply(&Mutation::DeleteRow { row: key, ts: 15 });
        let g = f.generator();
        let muts = g.generate(&f.raw_row(1)).unwrap();
        assert!(matches!(muts.last(), Some(Mutation::DeleteRow { ts: 15, .. })));
        assert!(g.latest(&f.raw_row(1)).unwrap().is_none());
    }

    #[test]
    fn recreated_key_is_not_masked_by_earlier_delete() {
        let mut f = Fixture::new(NullPolicy::IndexNulls);
        f.put(1, "NAME", Value::from("a"), 10);
        f.put(1, "ZIP", Value::Int(5), 10);
        f.put(1, "NAME", Value::from("b"), 20);
        f.put(1, "NAME", Value::from("a"), 30);

        let muts = f.generator().generate(&f.raw_row(1)).unwrap();
        let Some(Mutation::Put { cells, .. }) = muts.last() else {
            panic!("expected trailing put");
        };
        // ZIP 源时间戳 10 <= 删除标记 20，必须提升到 30
        assert!(cells.iter().all(|c| c.ts == 30));
    }

    #[test]
    fn generation_is_deterministic() {
        let mut f = Fixture::new(NullPolicy::IndexNulls);
        f.put(1, "NAME", Value::from("a"), 10);
        f.put(1, "ZIP", Value::Int(7), 12);
        f.put(1, "NAME", Value::from("c"), 14);
        let g = f.generator();
        let row = f.raw_row(1);
        assert_eq!(g.generate(&row).unwrap(), g.generate(&row).unwrap());
    }
}
