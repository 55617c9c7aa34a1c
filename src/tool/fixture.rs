//! JSON 数据集：CLI 以内存存储运行时的表结构与初始数据

use super::provision::ensure_index_table;
use crate::index::keys::encode_row_key;
use crate::index::mutation::{EMPTY_COLUMN, EMPTY_VALUE};
use crate::index::schema::{
    Catalog, ResolvedIndex, ResolvedTable, SchemaError, TableKind, Value, DEFAULT_FAMILY,
};
use crate::index::MutationGenerator;
use crate::storage::{now_ms, Cell, Mutation, ReadMode, StorageClient, TimeRange, Timestamp};
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub catalog: Catalog,
    /// 物理表全名 → 切分点（主键值元组）
    #[serde(default)]
    pub split_points: BTreeMap<String, Vec<Vec<Value>>>,
    #[serde(default)]
    pub rows: Vec<FixtureRow>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FixtureRow {
    /// 表或视图全名
    pub table: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// 租户视图可省略租户列
    pub pk: Vec<Value>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub ts: Option<Timestamp>,
    #[serde(default)]
    pub delete: bool,
    /// 写入时同步维护索引（否则只写数据表）
    #[serde(default)]
    pub maintain_indexes: bool,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read fixture {:?}", path))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Invalid fixture {:?}", path))
    }

    /// 建数据表并写入初始行；返回写入行数
    pub fn install(&self, client: &dyn StorageClient) -> anyhow::Result<usize> {
        let admin = client.admin();
        for def in &self.catalog.tables {
            if !matches!(def.kind, TableKind::Table) {
                continue;
            }
            let table = self.catalog.resolve_table(&def.full_name(), def.tenant_id.as_deref())?;
            if admin.table_exists(&table.physical_name) {
                continue;
            }
            let points = self
                .split_points
                .get(&table.full_name)
                .map(|tuples| {
                    tuples
                        .iter()
                        .map(|pk| encode_row_key(&table, pk))
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?
                .unwrap_or_default();
            admin.create_table(&table.physical_name, &points)?;
        }

        for row in &self.rows {
            let writer = RowWriter::new(client, &self.catalog, &row.table, row.tenant_id.as_deref())?;
            let ts = row.ts.unwrap_or_else(now_ms);
            if row.delete {
                writer.delete(&row.pk, ts, row.maintain_indexes)?;
            } else {
                let values: Vec<(&str, Value)> = row
                    .values
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.clone()))
                    .collect();
                if row.maintain_indexes {
                    writer.upsert_indexed(&row.pk, &values, ts)?;
                } else {
                    writer.upsert(&row.pk, &values, ts)?;
                }
            }
        }
        tracing::info!(
            "Installed fixture: {} table(s), {} index(es), {} row(s)",
            self.catalog.tables.len(),
            self.catalog.indexes.len(),
            self.rows.len()
        );
        Ok(self.rows.len())
    }
}

/// 以某租户身份向表/视图写数据，可选同步维护其索引
pub struct RowWriter<'a> {
    client: &'a dyn StorageClient,
    catalog: &'a Catalog,
    table: ResolvedTable,
    tenant: Option<String>,
}

impl<'a> RowWriter<'a> {
    pub fn new(
        client: &'a dyn StorageClient,
        catalog: &'a Catalog,
        table_full: &str,
        tenant: Option<&str>,
    ) -> Result<Self, SchemaError> {
        Ok(Self {
            client,
            catalog,
            table: catalog.resolve_table(table_full, tenant)?,
            tenant: tenant.map(str::to_string),
        })
    }

    pub fn table(&self) -> &ResolvedTable {
        &self.table
    }

    /// 多租户表省略首个租户列时以当前租户补齐
    pub fn key(&self, pk: &[Value]) -> Result<Vec<u8>, SchemaError> {
        let mut full = Vec::with_capacity(pk.len() + 1);
        if self.table.multi_tenant && pk.len() + 1 == self.table.primary_key.len() {
            if let Some(t) = &self.tenant {
                full.push(Value::Text(t.clone()));
            }
        }
        full.extend_from_slice(pk);
        encode_row_key(&self.table, &full)
    }

    /// 一次 upsert 的数据表变更：null 值写列删除标记
    pub fn mutations(
        &self,
        pk: &[Value],
        values: &[(&str, Value)],
        ts: Timestamp,
    ) -> Result<(Vec<u8>, Vec<Mutation>), SchemaError> {
        let row = self.key(pk)?;
        let mut cells = Vec::with_capacity(values.len() + 1);
        let mut deletes = Vec::new();
        for (name, value) in values {
            let column = self
                .table
                .column(name)
                .filter(|_| !self.table.is_primary_key(name))
                .ok_or_else(|| SchemaError::ColumnNotFound {
                    table: self.table.full_name.clone(),
                    column: name.to_string(),
                })?;
            if value.is_null() {
                deletes.push(Mutation::DeleteColumn {
                    row: row.clone(),
                    family: column.family.clone(),
                    qualifier: column.name.clone(),
                    ts,
                });
            } else {
                cells.push(Cell::put(&column.family, &column.name, value.to_cell_bytes(), ts));
            }
        }
        cells.push(Cell::put(DEFAULT_FAMILY, EMPTY_COLUMN, EMPTY_VALUE.to_vec(), ts));

        let mut mutations = vec![Mutation::Put {
            row: row.clone(),
            cells,
        }];
        mutations.extend(deletes);
        Ok((row, mutations))
    }

    pub fn upsert(&self, pk: &[Value], values: &[(&str, Value)], ts: Timestamp) -> anyhow::Result<Vec<u8>> {
        let (row, mutations) = self.mutations(pk, values, ts)?;
        self.client.batch_mutate(&self.table.physical_name, &mutations)?;
        Ok(row)
    }

    pub fn upsert_indexed(
        &self,
        pk: &[Value],
        values: &[(&str, Value)],
        ts: Timestamp,
    ) -> anyhow::Result<Vec<u8>> {
        let row = self.upsert(pk, values, ts)?;
        self.maintain(&row)?;
        Ok(row)
    }

    pub fn delete(&self, pk: &[Value], ts: Timestamp, maintain_indexes: bool) -> anyhow::Result<()> {
        let row = self.key(pk)?;
        self.client.batch_mutate(
            &self.table.physical_name,
            &[Mutation::DeleteRow {
                row: row.clone(),
                ts,
            }],
        )?;
        if maintain_indexes {
            self.maintain(&row)?;
        }
        Ok(())
    }

    /// 本表及（视图的）基表上的索引
    fn maintained_indexes(&self) -> Result<Vec<(ResolvedTable, ResolvedIndex)>, SchemaError> {
        let tenant = self.tenant.as_deref();
        let mut out: Vec<(ResolvedTable, ResolvedIndex)> = self
            .catalog
            .indexes_on(&self.table.full_name, tenant)
            .into_iter()
            .map(|i| (self.table.clone(), i))
            .collect();
        if self.table.is_view {
            let base = self.catalog.resolve_table(&self.table.physical_name, tenant)?;
            for i in self.catalog.indexes_on(&base.full_name, tenant) {
                out.push((base.clone(), i));
            }
        }
        Ok(out)
    }

    /// 按数据行完整版本链重放索引变更（重复写入同一 cell 无副作用）
    fn maintain(&self, row_key: &[u8]) -> anyhow::Result<()> {
        let rows = self.client.get_rows(
            &self.table.physical_name,
            &[row_key.to_vec()],
            TimeRange::all(),
            ReadMode::Raw,
        )?;
        let Some(row) = rows.into_iter().next().flatten() else {
            return Ok(());
        };
        let admin = self.client.admin();
        for (table, index) in self.maintained_indexes()? {
            ensure_index_table(admin, &table, &index)?;
            let region_start = if index.is_local() {
                admin
                    .regions(&table.physical_name)?
                    .into_iter()
                    .find(|r| r.range.contains(row_key))
                    .map(|r| r.range.start)
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            let generator = MutationGenerator::new(&table, &index, &region_start);
            let mutations = generator.generate(&row)?;
            if !mutations.is_empty() {
                self.client.batch_mutate(&index.physical_name, &mutations)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Admin, KeyRange, MemoryStore, ScanRequest};

    const FIXTURE: &str = r#"{
        "catalog": {
            "tables": [{
                "schema": "S", "name": "PEOPLE",
                "columns": [
                    {"name": "ID", "type": "INTEGER"},
                    {"name": "NAME", "type": "VARCHAR"},
                    {"name": "ZIP", "type": "INTEGER"}
                ],
                "primary_key": ["ID"]
            }],
            "indexes": [{
                "schema": "S", "name": "BY_NAME", "data_table": "S.PEOPLE",
                "key": [{"column": "NAME"}], "covered": ["ZIP"]
            }]
        },
        "split_points": {"S.PEOPLE": [[3]]},
        "rows": [
            {"table": "S.PEOPLE", "pk": [1], "values": {"NAME": "alice", "ZIP": 94105}, "ts": 10, "maintain_indexes": true},
            {"table": "S.PEOPLE", "pk": [4], "values": {"NAME": "dave", "ZIP": null}, "ts": 10},
            {"table": "S.PEOPLE", "pk": [5], "values": {"NAME": "erin"}, "ts": 10},
            {"table": "S.PEOPLE", "pk": [5], "ts": 20, "delete": true}
        ]
    }"#;

    #[test]
    fn fixture_installs_tables_and_rows() {
        let fixture: Fixture = serde_json::from_str(FIXTURE).unwrap();
        let store = MemoryStore::new();
        assert_eq!(fixture.install(&store).unwrap(), 4);

        assert_eq!(store.regions("S.PEOPLE").unwrap().len(), 2);
        assert_eq!(store.visible_row_count("S.PEOPLE").unwrap(), 2);
        // 只有维护了索引的行出现在索引表
        assert_eq!(store.visible_row_count("S.BY_NAME").unwrap(), 1);
    }

    #[test]
    fn null_values_become_column_deletes() {
        let fixture: Fixture = serde_json::from_str(FIXTURE).unwrap();
        let store = MemoryStore::new();
        fixture.install(&store).unwrap();

        let w = RowWriter::new(&store, &fixture.catalog, "S.PEOPLE", None).unwrap();
        let (_, mutations) = w
            .mutations(&[Value::Int(9)], &[("NAME", Value::Null)], 30)
            .unwrap();
        assert!(matches!(&mutations[1], Mutation::DeleteColumn { qualifier, .. } if qualifier == "NAME"));
        assert!(w.mutations(&[Value::Int(9)], &[("ID", Value::Int(1))], 30).is_err());
        assert!(w.mutations(&[Value::Int(9)], &[("NOPE", Value::Int(1))], 30).is_err());
    }

    #[test]
    fn updates_keep_index_in_sync() {
        let fixture: Fixture = serde_json::from_str(FIXTURE).unwrap();
        let store = MemoryStore::new();
        fixture.install(&store).unwrap();

        let w = RowWriter::new(&store, &fixture.catalog, "S.PEOPLE", None).unwrap();
        w.upsert_indexed(&[Value::Int(1)], &[("NAME", Value::from("alicia"))], 30)
            .unwrap();
        let rows = store
            .scan("S.BY_NAME", &ScanRequest::new(KeyRange::all(), TimeRange::all()))
            .unwrap();
        assert_eq!(rows.len(), 1);

        w.delete(&[Value::Int(1)], 40, true).unwrap();
        assert_eq!(store.visible_row_count("S.BY_NAME").unwrap(), 0);
    }
}
